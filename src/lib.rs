//! Core library for the `devstack` provisioning tool.
//!
//! The crate composes a declarative stack template for an ephemeral,
//! single-tenant development environment reachable over SSH, in one of two
//! topologies: a standalone virtual machine, or a scheduled container task
//! fronted by a load balancer. Execution of the template belongs to the
//! external provisioning engine; this crate only decides which resources
//! must exist, wires their dependency order, and generates the first-boot
//! bootstrap procedure.

pub mod bootstrap;
pub mod compute;
pub mod config;
pub mod identity;
pub mod keypair;
pub mod network;
pub mod outputs;
pub mod synth;
pub mod template;
pub mod topology;

pub use bootstrap::{BootstrapError, BootstrapProcedure, Stage, StageKind};
pub use compute::{ComputeError, ComputeResources, SSH_PORT};
pub use config::{ConfigError, StackConfig, StackContext, StackOptions};
pub use identity::{IdentityProfile, IdentityResources, PolicyStatement};
pub use keypair::{KeyPairResources, key_pair_name};
pub use network::{AVAILABILITY_ZONE_COUNT, NetworkResources};
pub use outputs::OutputError;
pub use synth::{SynthError, synthesize};
pub use template::{
    DeletionPolicy, Output, Resource, ResourceRef, StackTemplate, TemplateError,
};
pub use topology::{DeploymentTopology, TopologyError};
