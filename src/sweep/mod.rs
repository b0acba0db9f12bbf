//! Garbage collection of previews whose pull request is finished.
//!
//! A sweep runs in three steps:
//!
//! 1. **Enumerate** every running instance carrying the preview marker tag.
//!    Failure aborts the run; nothing is classified or terminated.
//! 2. **Classify** each instance. An instance is kept when its name maps to
//!    no pull request, when it is younger than the grace period, when a
//!    deployment currently holds its name lease, when its pull request is
//!    open or unknown, or when the status lookup fails. Only closed, merged
//!    and missing pull requests put an instance in the kill set. A lookup
//!    failure for one instance never blocks the others.
//! 3. **Terminate** the kill set with one batched call. A batch may fail part
//!    way through, so after a failure the instances are re-read: those no
//!    longer running count as terminated and only the rest are retried one
//!    by one, attributing failures per instance.
//!
//! Name leases of the kill set are held until termination completes, so a
//! deployment cannot adopt an instance that is about to disappear.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::directory::InstanceDirectory;
use crate::lease::{NameLease, NameLeases};
use crate::lifecycle::{ProviderFailure, terminate_instances};
use crate::provider::{ComputeProvider, InstanceDescriptor};

mod config;
mod status;

pub use config::{DEFAULT_GRACE_PERIOD_SECS, SweepConfig};
pub use status::{
    DEFAULT_GITHUB_API, GithubStatusSource, PrStatus, PrStatusSource, StatusError, StatusFuture,
};

const PR_MARKER: &str = "pr-";

/// Extracts the pull request number from a logical name.
///
/// The number follows the final `pr-` in the name, so `pr-42` and
/// `myapp-pr-42` both map to 42. Trailing text after the digits is ignored.
#[must_use]
pub fn pr_number(name: &str) -> Option<u64> {
    let (_, tail) = name.rsplit_once(PR_MARKER)?;
    let digits = tail
        .find(|ch: char| !ch.is_ascii_digit())
        .map_or(tail, |end| tail.get(..end).unwrap_or_default());
    digits.parse().ok()
}

/// Why an instance survived a sweep.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeepReason {
    /// The instance has no name tag or its name carries no PR number.
    Unmapped,
    /// The instance is younger than the grace period.
    WithinGracePeriod,
    /// A deployment holds the instance's name lease.
    Deploying,
    /// The pull request is still open.
    Open,
    /// The pull request state is unknown.
    Unknown,
    /// The status lookup failed; see the matching [`SweepFailure`].
    ClassificationFailed,
}

/// An instance left running by a sweep.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeptInstance {
    /// Provider identifier.
    pub id: String,
    /// Logical name, when tagged.
    pub name: Option<String>,
    /// Why it was kept.
    pub reason: KeepReason,
}

/// A per-instance failure recorded during a sweep.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SweepFailure {
    /// The pull request status could not be read.
    #[error("could not classify {id} (PR #{number}): {source}")]
    Classification {
        /// Provider identifier.
        id: String,
        /// Pull request number.
        number: u64,
        /// Lookup failure.
        #[source]
        source: StatusError,
    },
    /// The instance was marked for termination but terminating it failed.
    #[error("could not terminate {id}: {message}")]
    Termination {
        /// Provider identifier.
        id: String,
        /// Provider failure message.
        message: String,
    },
}

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SweepReport {
    /// Identifiers terminated by this run.
    pub terminated: Vec<String>,
    /// Instances left running.
    pub kept: Vec<KeptInstance>,
    /// Per-instance failures.
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    /// Converts a report with failures into
    /// [`CollectorError::PartialSweepFailure`].
    ///
    /// # Errors
    ///
    /// Returns the error when at least one failure was recorded.
    pub fn into_result(self) -> Result<Self, CollectorError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(CollectorError::PartialSweepFailure { report: self })
        }
    }
}

/// Errors raised by the garbage collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Listing preview instances failed; nothing was classified.
    #[error("failed to enumerate preview instances: {0}")]
    Enumerate(#[source] ProviderFailure),
    /// Some instances could not be classified or terminated.
    #[error(
        "sweep finished with {} failure(s); {} instance(s) terminated",
        report.failures.len(),
        report.terminated.len()
    )]
    PartialSweepFailure {
        /// Full report of the run.
        report: SweepReport,
    },
    /// The sweep configuration is unusable.
    #[error("invalid sweep configuration ({field}): {message}")]
    InvalidConfig {
        /// Offending field.
        field: String,
        /// Guidance for fixing it.
        message: String,
    },
}

enum Verdict {
    Kill(NameLease),
    Keep(KeepReason),
    Failed(SweepFailure),
}

/// Reclaims preview instances whose pull request is finished.
#[derive(Debug)]
pub struct Collector<'a, P: ComputeProvider, S: PrStatusSource> {
    provider: &'a P,
    statuses: &'a S,
    leases: NameLeases,
    grace_period: Duration,
}

impl<'a, P, S> Collector<'a, P, S>
where
    P: ComputeProvider,
    S: PrStatusSource,
{
    /// Creates a collector with the default grace period and a private lease
    /// registry.
    #[must_use]
    pub fn new(provider: &'a P, statuses: &'a S) -> Self {
        Self {
            provider,
            statuses,
            leases: NameLeases::new(),
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
        }
    }

    /// Shares the deployment lease registry.
    #[must_use]
    pub fn with_leases(mut self, leases: NameLeases) -> Self {
        self.leases = leases;
        self
    }

    /// Overrides the grace period.
    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Runs one sweep against the current time.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Enumerate`] when listing fails. Per-instance
    /// failures are recorded in the report, not returned.
    pub async fn sweep(&self) -> Result<SweepReport, CollectorError> {
        self.sweep_at(Utc::now()).await
    }

    /// Runs one sweep treating `now` as the current time.
    ///
    /// # Errors
    ///
    /// See [`Collector::sweep`].
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, CollectorError> {
        let instances = InstanceDirectory::new(self.provider)
            .list_previews()
            .await
            .map_err(|err| CollectorError::Enumerate(Box::new(err)))?;
        info!(count = instances.len(), "enumerated preview instances");

        let mut report = SweepReport::default();
        let mut kill = Vec::new();
        let mut held = Vec::new();
        for instance in &instances {
            match self.classify(instance, now).await {
                Verdict::Kill(lease) => {
                    kill.push(instance.id.clone());
                    held.push(lease);
                }
                Verdict::Keep(reason) => {
                    debug!(instance_id = %instance.id, ?reason, "keeping instance");
                    report.kept.push(KeptInstance {
                        id: instance.id.clone(),
                        name: instance.name().map(str::to_owned),
                        reason,
                    });
                }
                Verdict::Failed(failure) => {
                    warn!(instance_id = %instance.id, error = %failure, "classification failed");
                    report.kept.push(KeptInstance {
                        id: instance.id.clone(),
                        name: instance.name().map(str::to_owned),
                        reason: KeepReason::ClassificationFailed,
                    });
                    report.failures.push(failure);
                }
            }
        }

        if !kill.is_empty() {
            self.terminate(kill, &mut report).await;
        }
        drop(held);

        info!(
            terminated = report.terminated.len(),
            kept = report.kept.len(),
            failures = report.failures.len(),
            "sweep finished"
        );
        Ok(report)
    }

    async fn classify(&self, instance: &InstanceDescriptor, now: DateTime<Utc>) -> Verdict {
        let Some(name) = instance.name() else {
            return Verdict::Keep(KeepReason::Unmapped);
        };
        let Some(number) = pr_number(name) else {
            return Verdict::Keep(KeepReason::Unmapped);
        };
        if self.within_grace_period(instance, now) {
            return Verdict::Keep(KeepReason::WithinGracePeriod);
        }
        let Some(lease) = self.leases.try_acquire(name) else {
            return Verdict::Keep(KeepReason::Deploying);
        };

        match self.statuses.status(number).await {
            Ok(status) if status.is_inactive() => {
                debug!(instance_id = %instance.id, number, ?status, "marked for termination");
                Verdict::Kill(lease)
            }
            Ok(PrStatus::Open) => Verdict::Keep(KeepReason::Open),
            Ok(_) => Verdict::Keep(KeepReason::Unknown),
            Err(source) => Verdict::Failed(SweepFailure::Classification {
                id: instance.id.clone(),
                number,
                source,
            }),
        }
    }

    fn within_grace_period(&self, instance: &InstanceDescriptor, now: DateTime<Utc>) -> bool {
        let Some(launched_at) = instance.launched_at else {
            return false;
        };
        let age = now.signed_duration_since(launched_at);
        !age.to_std().is_ok_and(|age| age >= self.grace_period)
    }

    async fn terminate(&self, kill: Vec<String>, report: &mut SweepReport) {
        match terminate_instances(self.provider, kill.iter().cloned()).await {
            Ok(ids) => report.terminated.extend(ids),
            Err(err) => {
                warn!(error = %err, "batched termination failed; retrying individually");
                let remaining = self.still_running(&kill).await;
                for id in kill {
                    if remaining
                        .as_ref()
                        .is_some_and(|running| !running.contains(&id))
                    {
                        debug!(instance_id = %id, "terminated by the failed batch");
                        report.terminated.push(id);
                        continue;
                    }
                    match terminate_instances(self.provider, [id.clone()]).await {
                        Ok(ids) => report.terminated.extend(ids),
                        Err(err) => report.failures.push(SweepFailure::Termination {
                            id,
                            message: err.to_string(),
                        }),
                    }
                }
            }
        }
    }

    /// Identifiers from `ids` that are still running. `None` when the
    /// provider cannot say, in which case every id is retried.
    async fn still_running(&self, ids: &[String]) -> Option<BTreeSet<String>> {
        match InstanceDirectory::new(self.provider).list_previews().await {
            Ok(found) => Some(
                found
                    .into_iter()
                    .map(|descriptor| descriptor.id)
                    .filter(|id| ids.contains(id))
                    .collect(),
            ),
            Err(err) => {
                warn!(error = %err, "could not re-read instances after failed batch");
                None
            }
        }
    }
}
