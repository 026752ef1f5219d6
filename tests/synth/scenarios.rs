//! BDD scenarios for stack synthesis.

use rstest_bdd_macros::scenario;

use super::test_helpers::{SynthContext, synth_context};

#[scenario(
    path = "tests/features/synth.feature",
    name = "Standalone host is directly reachable"
)]
fn scenario_standalone_host(synth_context: SynthContext) {
    drop(synth_context);
}

#[scenario(
    path = "tests/features/synth.feature",
    name = "Scheduled service is reachable only through the load balancer"
)]
fn scenario_scheduled_service(synth_context: SynthContext) {
    drop(synth_context);
}

#[scenario(
    path = "tests/features/synth.feature",
    name = "Invalid topology token declares nothing"
)]
fn scenario_invalid_token(synth_context: SynthContext) {
    drop(synth_context);
}
