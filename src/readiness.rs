//! Cooperative bounded polling.
//!
//! [`poll`] only answers "did the predicate become true within the budget".
//! Escalating exhaustion into an error is the caller's decision; the lifecycle
//! manager is the one caller that does so.

use std::future::Future;
use std::time::Duration;

use shell_escape::unix::escape;
use tokio::time::sleep;
use tracing::debug;

use crate::remote::{CommandRunner, RemoteExecutor};

/// Default readiness marker written by the bootstrap script.
pub const DEFAULT_READY_MARKER: &str = "/etc/prbranch/ready";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Interval and attempt budget for one polling phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSettings {
    /// Delay between consecutive probes.
    pub interval: Duration,
    /// Maximum number of probes.
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Invokes `predicate` up to `max_attempts` times, sleeping `interval` between
/// probes. Returns `true` on the first success and `false` once the budget is
/// spent. No sleep follows the final probe.
pub async fn poll<F, Fut>(mut predicate: F, interval: Duration, max_attempts: u32) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=max_attempts {
        if predicate().await {
            debug!(attempt, "poll predicate satisfied");
            return true;
        }
        if attempt < max_attempts {
            sleep(interval).await;
        }
    }
    debug!(max_attempts, "poll budget exhausted");
    false
}

/// Convenience wrapper around [`poll`] taking [`PollSettings`].
pub async fn poll_with<F, Fut>(predicate: F, settings: PollSettings) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll(predicate, settings.interval, settings.max_attempts).await
}

/// Returns `true` when `marker` exists on the host. Any failure, including a
/// transport error, reads as "not ready yet".
pub async fn marker_present<R: CommandRunner>(executor: &RemoteExecutor<R>, marker: &str) -> bool {
    let command = format!("test -f {}", escape(marker.into()));
    executor.execute(&command).await.is_ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tokio::time::Instant;

    use super::*;
    use crate::remote::{ConnectionPolicy, RemoteSession};
    use crate::test_support::ScriptedRunner;

    fn counting_predicate(
        succeed_on: Option<u32>,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<bool>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let predicate = move || {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(succeed_on.is_some_and(|target| call >= target))
        };
        (calls, predicate)
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(5)]
    #[tokio::test(start_paused = true)]
    async fn converges_after_exactly_k_probes(#[case] k: u32) {
        let (calls, predicate) = counting_predicate(Some(k));
        let interval = Duration::from_secs(2);
        let started = Instant::now();

        assert!(poll(predicate, interval, 5).await);

        assert_eq!(calls.load(Ordering::SeqCst), k);
        assert_eq!(started.elapsed(), interval * (k - 1));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (calls, predicate) = counting_predicate(None);
        let interval = Duration::from_secs(5);
        let started = Instant::now();

        assert!(!poll(predicate, interval, 4).await);

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), interval * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_never_probes() {
        let (calls, predicate) = counting_predicate(Some(1));
        assert!(!poll(predicate, Duration::from_secs(1), 0).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    fn executor(runner: ScriptedRunner) -> RemoteExecutor<ScriptedRunner> {
        RemoteExecutor::new(
            RemoteSession {
                user: String::from("root"),
                host: String::from("198.51.100.7"),
                identity_file: Utf8PathBuf::from("/tmp/key"),
                policy: ConnectionPolicy::default(),
            },
            runner,
        )
    }

    #[tokio::test]
    async fn marker_present_maps_exit_status_to_bool() {
        let runner = ScriptedRunner::new();
        runner.push_exit_code(1);
        runner.push_success();
        let exec = executor(runner.clone());

        assert!(!marker_present(&exec, DEFAULT_READY_MARKER).await);
        assert!(marker_present(&exec, DEFAULT_READY_MARKER).await);

        let last = runner.invocations().pop().expect("invocation");
        assert!(
            last.command_string().ends_with("test -f /etc/prbranch/ready"),
            "unexpected command: {}",
            last.command_string()
        );
    }

    #[tokio::test]
    async fn marker_present_treats_transport_failure_as_not_ready() {
        let exec = executor(ScriptedRunner::new());
        assert!(!marker_present(&exec, DEFAULT_READY_MARKER).await);
    }
}
