//! Constants shared across integration test suites.

/// Stack name used by test contexts.
pub const STACK_NAME: &str = "sandbox";

/// Region used by test contexts.
pub const REGION: &str = "us-east-1";
