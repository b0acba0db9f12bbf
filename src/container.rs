//! Container workload control on a preview host.
//!
//! Teardown is strictly sequential: stop, then remove, then prune images. A
//! failure part-way leaves the host stopped but not fully pruned; nothing is
//! rolled back.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::probe::ProbeFailurePolicy;
use crate::remote::{CommandRunner, RemoteError, RemoteExecutor};

const LIST_CONTAINERS: &str = "docker ps -aq";
const PRUNE_IMAGES: &str = "docker image prune --all --force";

/// Step of the teardown sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TeardownStep {
    /// Listing containers.
    List,
    /// Stopping containers.
    Stop,
    /// Removing containers.
    Remove,
    /// Pruning unreferenced images.
    Prune,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::List => "list",
            Self::Stop => "stop",
            Self::Remove => "remove",
            Self::Prune => "prune",
        };
        f.write_str(label)
    }
}

/// Raised when a teardown step fails.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("container {step} failed: {source}")]
pub struct ContainerError {
    /// Step that failed.
    pub step: TeardownStep,
    /// Underlying remote failure.
    #[source]
    pub source: RemoteError,
}

/// What [`ContainerController::stop_and_prune`] did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TeardownOutcome {
    /// No container was listed; no mutating command was issued.
    NothingRunning,
    /// The listed containers were stopped and removed and images pruned.
    Removed {
        /// Container identifiers that were removed.
        container_ids: Vec<String>,
    },
}

/// Inspects and tears down the containerised workload through a
/// [`RemoteExecutor`].
#[derive(Debug)]
pub struct ContainerController<'a, R: CommandRunner> {
    executor: &'a RemoteExecutor<R>,
    policy: ProbeFailurePolicy,
}

impl<'a, R: CommandRunner> ContainerController<'a, R> {
    /// Creates a controller using the default probe policy.
    #[must_use]
    pub fn new(executor: &'a RemoteExecutor<R>) -> Self {
        Self::with_policy(executor, ProbeFailurePolicy::default())
    }

    /// Creates a controller with an explicit probe policy.
    #[must_use]
    pub const fn with_policy(executor: &'a RemoteExecutor<R>, policy: ProbeFailurePolicy) -> Self {
        Self { executor, policy }
    }

    /// Returns `true` when the host lists at least one container.
    ///
    /// # Errors
    ///
    /// Only under [`ProbeFailurePolicy::Propagate`]; the default policy maps a
    /// failed listing to `false`.
    pub async fn has_running_container(&self) -> Result<bool, ContainerError> {
        Ok(!self.running_container_ids().await?.is_empty())
    }

    /// Stops and removes every listed container, then prunes images.
    ///
    /// # Errors
    ///
    /// Returns the first failing step as [`ContainerError`]. Earlier steps are
    /// not undone.
    pub async fn stop_and_prune(&self) -> Result<TeardownOutcome, ContainerError> {
        let container_ids = self.running_container_ids().await?;
        if container_ids.is_empty() {
            debug!(host = %self.executor.session().host, "no container to tear down");
            return Ok(TeardownOutcome::NothingRunning);
        }

        let joined = container_ids.join(" ");
        self.run_step(TeardownStep::Stop, &format!("docker stop {joined}"))
            .await?;
        self.run_step(TeardownStep::Remove, &format!("docker rm {joined}"))
            .await?;
        self.run_step(TeardownStep::Prune, PRUNE_IMAGES).await?;

        info!(
            host = %self.executor.session().host,
            containers = %joined,
            "previous workload removed"
        );
        Ok(TeardownOutcome::Removed { container_ids })
    }

    async fn running_container_ids(&self) -> Result<Vec<String>, ContainerError> {
        let listing = self
            .executor
            .execute(LIST_CONTAINERS)
            .await
            .map_err(|source| ContainerError {
                step: TeardownStep::List,
                source,
            });
        let stdout = self.policy.apply("container list", listing, String::new())?;
        Ok(stdout
            .split_whitespace()
            .filter(|id| id.chars().all(|ch| ch.is_ascii_alphanumeric()))
            .map(str::to_owned)
            .collect())
    }

    async fn run_step(&self, step: TeardownStep, command: &str) -> Result<(), ContainerError> {
        self.executor
            .execute(command)
            .await
            .map(|_| ())
            .map_err(|source| ContainerError { step, source })
    }
}
