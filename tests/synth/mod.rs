//! Behavioural test modules for stack synthesis.

mod bdd_steps;
mod scenarios;
mod test_helpers;
