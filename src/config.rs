//! Stack configuration loading via `ortho-config` and the provisioning
//! context derived from it.
//!
//! Configuration merges defaults, `devstack.toml`, and `DEVSTACK_*`
//! environment variables. Validation turns the merged values into an
//! immutable [`StackContext`] that is passed explicitly to every composer;
//! nothing downstream re-reads configuration or re-derives the topology.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::topology::{DeploymentTopology, TopologyError};

/// Stack configuration layered from defaults, files, and environment
/// variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DEVSTACK",
    discovery(
        app_name = "devstack",
        env_var = "DEVSTACK_CONFIG_PATH",
        config_file_name = "devstack.toml",
        dotfile_name = ".devstack.toml",
        project_file_name = "devstack.toml"
    )
)]
pub struct StackConfig {
    /// Stack identity used as the prefix for deterministic resource names.
    #[ortho_config(default = "devstack".to_owned())]
    pub stack_name: String,
    /// Provider region the stack is provisioned into.
    #[ortho_config(default = "us-east-1".to_owned())]
    pub region: String,
    /// Deployment topology token (`standalone-host`/`ec2` or
    /// `scheduled-service`/`fargate`).
    #[ortho_config(default = "standalone-host".to_owned())]
    pub topology: String,
    /// Whether the standalone host's root volume is encrypted.
    #[ortho_config(default = true)]
    pub encrypt_root_volume: bool,
    /// Whether the telemetry agent policy and bootstrap stage are included.
    #[ortho_config(default = true)]
    pub telemetry_agent: bool,
    /// Whether the standalone host also accepts inbound HTTPS for
    /// management-plane access.
    #[ortho_config(default = false)]
    pub management_https: bool,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl StackConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to devstack.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("devstack")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on the merged values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidStackName`] when the stack name contains
    /// characters unsafe for resource naming.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.stack_name,
            &FieldMetadata::new("stack name", "DEVSTACK_STACK_NAME", "stack_name"),
        )?;
        Self::require_field(
            &self.region,
            &FieldMetadata::new("provider region", "DEVSTACK_REGION", "region"),
        )?;
        Self::require_field(
            &self.topology,
            &FieldMetadata::new("deployment topology", "DEVSTACK_TOPOLOGY", "topology"),
        )?;
        if !self
            .stack_name
            .trim()
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        {
            return Err(ConfigError::InvalidStackName(self.stack_name.clone()));
        }
        Ok(())
    }

    /// Validates the configuration and resolves it into an immutable
    /// provisioning context.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or the topology token
    /// is outside the closed set.
    pub fn context(&self) -> Result<StackContext, ConfigError> {
        self.validate()?;
        let topology = DeploymentTopology::from_token(&self.topology)?;
        Ok(StackContext {
            stack_name: self.stack_name.trim().to_owned(),
            region: self.region.trim().to_owned(),
            topology,
            options: StackOptions {
                encrypt_root_volume: self.encrypt_root_volume,
                telemetry_agent: self.telemetry_agent,
                management_https: self.management_https,
            },
        })
    }
}

/// Optional behaviours layered over the base composition.
///
/// These collapse the original's near-duplicate stack variants (identity
/// breadth, disk encryption, telemetry agent) into one configuration
/// surface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StackOptions {
    /// Encrypt the standalone host's root volume.
    pub encrypt_root_volume: bool,
    /// Attach the telemetry agent policy and install the agent at bootstrap.
    pub telemetry_agent: bool,
    /// Allow inbound HTTPS on the standalone host security group.
    pub management_https: bool,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            encrypt_root_volume: true,
            telemetry_agent: true,
            management_https: false,
        }
    }
}

/// Immutable provisioning context threaded through every composer.
///
/// Read-only after topology selection; composers receive it by shared
/// reference and never mutate it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackContext {
    /// Stack identity prefixing deterministic resource names.
    pub stack_name: String,
    /// Provider region.
    pub region: String,
    /// Selected deployment topology.
    pub topology: DeploymentTopology,
    /// Optional behaviours.
    pub options: StackOptions,
}

impl StackContext {
    /// Creates a context directly, bypassing configuration loading.
    #[must_use]
    pub const fn new(
        stack_name: String,
        region: String,
        topology: DeploymentTopology,
        options: StackOptions,
    ) -> Self {
        Self {
            stack_name,
            region,
            topology,
            options,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates the stack name contains unsafe characters.
    #[error("stack name `{0}` must contain only ASCII letters, digits, and dashes")]
    InvalidStackName(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Indicates the topology token is outside the closed set.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
