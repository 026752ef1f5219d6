//! Shared context construction for integration test suites.

use devstack::{DeploymentTopology, StackContext, StackOptions};

use crate::test_constants::{REGION, STACK_NAME};

/// Builds a provisioning context with default options.
pub fn stack_context(topology: DeploymentTopology) -> StackContext {
    StackContext::new(
        String::from(STACK_NAME),
        String::from(REGION),
        topology,
        StackOptions::default(),
    )
}
