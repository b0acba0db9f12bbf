//! Preview garbage collector for prbranch.
//!
//! This binary lists the running preview instances, looks up the pull request
//! behind each one and terminates those whose pull request is closed or
//! merged. It exits non-zero when any instance could not be classified or
//! terminated.

use std::io::{self, Write as _};

use clap::Parser;
use prbranch::{
    Collector, CollectorError, ScalewayConfig, ScalewayProvider, SweepConfig, SweepReport,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "prbranch-sweep",
    about = "Terminate preview instances whose pull request is closed or merged"
)]
struct Cli {
    /// Override the grace period in seconds; younger instances are kept.
    #[arg(long, value_name = "SECONDS")]
    grace_period_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prbranch=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut sweep_config = SweepConfig::load_without_cli_args().map_err(|err| err.to_string())?;
    if let Some(secs) = cli.grace_period_secs {
        sweep_config.grace_period_secs = secs;
    }
    let statuses = sweep_config.status_source().map_err(|err| err.to_string())?;
    let scaleway_config = ScalewayConfig::load_without_cli_args().map_err(|err| err.to_string())?;
    let provider = ScalewayProvider::new(scaleway_config).map_err(|err| err.to_string())?;

    let collector =
        Collector::new(&provider, &statuses).with_grace_period(sweep_config.grace_period());
    match collector.sweep().await.and_then(SweepReport::into_result) {
        Ok(report) => write_summary(&report).map_err(|err| err.to_string()),
        Err(CollectorError::PartialSweepFailure { report }) => {
            write_summary(&report).map_err(|err| err.to_string())?;
            for failure in &report.failures {
                writeln!(io::stderr(), "{failure}").map_err(|err| err.to_string())?;
            }
            Err(format!(
                "sweep finished with {} failure(s)",
                report.failures.len()
            ))
        }
        Err(err) => Err(err.to_string()),
    }
}

fn write_summary(report: &SweepReport) -> io::Result<()> {
    let mut stdout = io::stdout();
    for id in &report.terminated {
        writeln!(stdout, "terminated {id}")?;
    }
    writeln!(
        stdout,
        "sweep complete: terminated={}, kept={}, failures={}",
        report.terminated.len(),
        report.kept.len(),
        report.failures.len()
    )
}
