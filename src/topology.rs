//! Deployment topology selection and validation.
//!
//! The topology token is the single branching input for the whole
//! composition: every downstream composer consults the selected
//! [`DeploymentTopology`] rather than re-deriving the mode from other state.
//! Tokens are validated against a closed set before any resource is
//! declared, so an invalid token can never leave a partially declared stack.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The structural shape of the provisioned environment.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum DeploymentTopology {
    /// A single virtual machine on a public subnet, directly reachable over
    /// SSH.
    #[default]
    StandaloneHost,
    /// A container task on a managed cluster in a private subnet, fronted by
    /// an internet-facing load balancer.
    ScheduledService,
}

impl DeploymentTopology {
    /// Canonical token accepted on the command line and in configuration.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::StandaloneHost => "standalone-host",
            Self::ScheduledService => "scheduled-service",
        }
    }

    /// Short platform alias used in deterministic resource names.
    ///
    /// These match the deployment-type tokens of the original tooling
    /// (`ec2`/`fargate`), so re-provisioning a stack that was first created
    /// with that tooling resolves to the same logical key pair.
    #[must_use]
    pub const fn alias(self) -> &'static str {
        match self {
            Self::StandaloneHost => "ec2",
            Self::ScheduledService => "fargate",
        }
    }

    /// Returns true for the clustered topology.
    #[must_use]
    pub const fn is_scheduled(self) -> bool {
        matches!(self, Self::ScheduledService)
    }

    /// Parses a topology token, accepting canonical tokens and platform
    /// aliases.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownToken`] for any value outside the
    /// closed set.
    pub fn from_token(token: &str) -> Result<Self, TopologyError> {
        match token.trim().to_ascii_lowercase().as_str() {
            "standalone-host" | "ec2" => Ok(Self::StandaloneHost),
            "scheduled-service" | "fargate" => Ok(Self::ScheduledService),
            _ => Err(TopologyError::UnknownToken(token.to_owned())),
        }
    }
}

impl fmt::Display for DeploymentTopology {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.token())
    }
}

impl FromStr for DeploymentTopology {
    type Err = TopologyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_token(value)
    }
}

/// Errors raised while validating the topology token.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TopologyError {
    /// Raised when the token is outside the closed set of accepted values.
    #[error(
        "unknown deployment topology `{0}`: expected one of `standalone-host` (alias `ec2`) or \
         `scheduled-service` (alias `fargate`)"
    )]
    UnknownToken(String),
}
