//! Key pair lifecycle management.
//!
//! The credential pair is declared with a deterministic logical name so that
//! re-provisioning with the same stack identity and topology resolves to the
//! same logical resource. The provider generates the pair and stores the
//! private half exclusively in its encrypted parameter namespace under
//! `/ec2/keypair/{key-pair-id}`. The parameter is keyed by the
//! provider-assigned identifier, not the name, so every consumer must
//! resolve the name to the identifier before reading the parameter.
//! This system never sees, stores, or logs private material; the
//! only sanctioned reads are the bootstrap procedure's in-container
//! resolution step and the operator command emitted by the output composer.
//!
//! The pair is destroyed with the stack. That is deliberate: the environment
//! is an ephemeral sandbox, and a credential that outlives it would be an
//! orphaned secret.

use crate::config::StackContext;
use crate::template::{DeletionPolicy, Resource, ResourceRef, StackTemplate, TemplateError};
use serde_json::json;

/// Provider resource kind for key pairs.
pub const KEY_PAIR_KIND: &str = "AWS::EC2::KeyPair";

/// Logical identifier of the declared key pair.
pub const KEY_PAIR_LOGICAL_ID: &str = "DevKeyPair";

/// Encrypted parameter path prefix holding private key material, keyed by
/// the provider-assigned key pair identifier.
pub const KEY_PARAMETER_PREFIX: &str = "/ec2/keypair/";

/// Declared key pair resources.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPairResources {
    /// Deterministic logical key name.
    pub key_name: String,
    /// Handle to the declared key pair resource.
    pub key_pair: ResourceRef,
}

/// Derives the deterministic key pair name for a stack.
///
/// The name is a pure function of stack identity and topology; identical
/// inputs always yield an identical name.
#[must_use]
pub fn key_pair_name(context: &StackContext) -> String {
    format!(
        "{}-{}-key",
        context.stack_name,
        context.topology.alias()
    )
}

/// Declares the credential pair for this provisioning run.
///
/// # Errors
///
/// Returns [`TemplateError`] when the declaration conflicts with an existing
/// resource.
pub fn provision(
    context: &StackContext,
    template: &mut StackTemplate,
) -> Result<KeyPairResources, TemplateError> {
    let key_name = key_pair_name(context);
    let key_pair = template.declare(
        Resource::new(
            KEY_PAIR_LOGICAL_ID,
            KEY_PAIR_KIND,
            json!({ "KeyName": key_name }),
        )
        .deletion_policy(DeletionPolicy::Delete),
    )?;
    Ok(KeyPairResources { key_name, key_pair })
}
