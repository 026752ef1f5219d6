//! Command-line interface definitions for the `devstack` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page.

use clap::Parser;

/// Top-level CLI for the `devstack` binary.
#[derive(Debug, Parser)]
#[command(
    name = "devstack",
    about = "Synthesise an ephemeral SSH development environment stack",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Compose the stack template for a deployment topology.
    #[command(
        name = "synth",
        about = "Compose the stack template for a deployment topology"
    )]
    Synth(SynthCommand),
}

/// Arguments for the `devstack synth` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct SynthCommand {
    /// Deployment topology token: `standalone-host` (alias `ec2`) or
    /// `scheduled-service` (alias `fargate`).
    ///
    /// Any other value is a configuration error raised before any resource
    /// is declared.
    #[arg(long, value_name = "TOPOLOGY")]
    pub(crate) topology: Option<String>,
    /// Override the stack name used as the prefix for deterministic
    /// resource names.
    #[arg(long, value_name = "NAME")]
    pub(crate) stack_name: Option<String>,
    /// Override the provider region.
    #[arg(long, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Write the synthesised template JSON to this file.
    #[arg(long, value_name = "PATH")]
    pub(crate) output: Option<String>,
}
