//! One-pass stack synthesis.
//!
//! Evaluates the declarative composition exactly once per provisioning run:
//! network, then identities, then the credential pair, then the bootstrap
//! procedure, then compute and exposure, and finally the outputs. There is
//! no internal concurrency and no retry; resource creation, ordering, and
//! rollback belong to the external provisioning engine, which consumes the
//! declared dependency edges.

use thiserror::Error;

use crate::bootstrap::{BootstrapError, BootstrapProcedure};
use crate::compute::{self, ComputeError};
use crate::config::StackContext;
use crate::template::{StackTemplate, TemplateError};
use crate::{identity, keypair, network, outputs};

/// Errors raised while synthesising a stack.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum SynthError {
    /// Raised when a resource or output declaration fails.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Raised when the generated bootstrap procedure violates its ordering
    /// invariants.
    #[error("bootstrap procedure invalid: {0}")]
    Bootstrap(#[from] BootstrapError),
    /// Raised when compute composition fails.
    #[error(transparent)]
    Compute(#[from] ComputeError),
    /// Raised when output composition fails.
    #[error(transparent)]
    Output(#[from] outputs::OutputError),
}

/// Synthesises the full stack template for one provisioning context.
///
/// The context's topology has already been validated; by the time this runs
/// an invalid token can no longer exist, so no resource is ever declared for
/// a bad configuration.
///
/// # Errors
///
/// Returns [`SynthError`] when any composer fails. The partially built
/// template is discarded; callers never observe it.
pub fn synthesize(context: &StackContext) -> Result<StackTemplate, SynthError> {
    let mut template = StackTemplate::new();

    let network = network::compose(context, &mut template)?;
    let identities = identity::compose(context, &mut template)?;
    let key_pair = keypair::provision(context, &mut template)?;

    let bootstrap = BootstrapProcedure::for_context(context);
    bootstrap.validate()?;

    let compute_resources = compute::compose(
        context,
        &mut template,
        &network,
        &identities,
        &key_pair,
        &bootstrap,
    )?;
    outputs::compose(context, &mut template, &key_pair, &compute_resources)?;

    Ok(template)
}
