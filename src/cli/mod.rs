//! Command-line interface definitions for the `prbranch` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Startup script shipped with the repository.
pub(crate) const DEFAULT_STARTUP_SCRIPT: &str = "assets/upload.sh";

/// Top-level CLI for the `prbranch` binary.
#[derive(Debug, Parser)]
#[command(
    name = "prbranch",
    about = "Deploy per-pull-request preview environments to ephemeral VMs",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Launch or reuse the preview instance and deploy an artifact to it.
    #[command(
        name = "deploy",
        about = "Launch or reuse a preview instance and deploy an artifact"
    )]
    Deploy(DeployCommand),
    /// Terminate preview instances by provider id.
    #[command(name = "terminate", about = "Terminate preview instances by id")]
    Terminate(TerminateCommand),
}

/// Arguments for the `prbranch deploy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    /// Logical instance name, usually `pr-<number>`.
    ///
    /// The name is the idempotency key: deploying twice under the same name
    /// reuses the running instance.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
    /// Local artifact (file or directory) copied to the remote app directory.
    #[arg(long, value_name = "PATH")]
    pub(crate) artifact: String,
    /// Local startup script copied to the remote script directory and run.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STARTUP_SCRIPT)]
    pub(crate) script: String,
    /// Image tag handed to the startup script with `-g`.
    #[arg(long, value_name = "TAG")]
    pub(crate) tag: String,
}

/// Arguments for the `prbranch terminate` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct TerminateCommand {
    /// Provider ids of the instances to terminate, in a single batch.
    #[arg(required = true, value_name = "ID")]
    pub(crate) ids: Vec<String>,
}
