//! Binary entry point for the prbranch CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use prbranch::{
    DeployConfig, DeployError, DeployReport, DeploymentDriver, DeploymentUnit, IdentityFile,
    InstanceManager, LifecycleError, ProcessCommandRunner, RemoteConfig, ScalewayConfig,
    ScalewayProvider, terminate_instances,
};

mod cli;

use cli::{Cli, DeployCommand, TerminateCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("identity error: {0}")]
    Identity(String),
    #[error("deployment failed: {0}")]
    Deploy(#[from] DeployError),
    #[error("termination failed: {0}")]
    Terminate(#[source] LifecycleError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prbranch=info")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Deploy(command) => {
            let report = deploy(command).await?;
            write_report(io::stdout(), &report)?;
        }
        Cli::Terminate(command) => {
            let ids = terminate(command).await?;
            for id in ids {
                writeln!(io::stdout(), "terminated {id}")?;
            }
        }
    }
    Ok(())
}

fn load_provider() -> Result<(ScalewayConfig, ScalewayProvider), CliError> {
    let config =
        ScalewayConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let provider =
        ScalewayProvider::new(config.clone()).map_err(|err| CliError::Provider(err.to_string()))?;
    Ok((config, provider))
}

async fn deploy(args: DeployCommand) -> Result<DeployReport, CliError> {
    let remote =
        RemoteConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    remote
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let deploy_config =
        DeployConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    deploy_config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let (scaleway_config, provider) = load_provider()?;
    let spec = scaleway_config
        .launch_spec(&args.name)
        .map_err(|err| CliError::Config(err.to_string()))?;
    let identity =
        IdentityFile::from_config(&remote).map_err(|err| CliError::Identity(err.to_string()))?;

    let manager = InstanceManager::new(
        provider,
        ProcessCommandRunner,
        identity,
        deploy_config.manager_settings(&remote),
    );
    let mut driver = DeploymentDriver::new(manager, deploy_config.layout());
    let unit = DeploymentUnit {
        artifact: Utf8PathBuf::from(args.artifact),
        startup_script: Utf8PathBuf::from(args.script),
        image_tag: args.tag,
    };
    Ok(driver.deploy(&spec, &unit).await?)
}

async fn terminate(args: TerminateCommand) -> Result<Vec<String>, CliError> {
    let (_, provider) = load_provider()?;
    terminate_instances(&provider, args.ids)
        .await
        .map_err(CliError::Terminate)
}

fn write_report(mut target: impl Write, report: &DeployReport) -> io::Result<()> {
    let mode = if report.reused { "reused" } else { "created" };
    writeln!(
        target,
        "{} ({}, {mode}) is live at {}",
        report.name, report.instance_id, report.live_url
    )
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
