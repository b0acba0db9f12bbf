//! Remote command execution and file transfer over `ssh` and `scp`.
//!
//! A [`RemoteExecutor`] is bound to one host, one user and one identity file.
//! It has no knowledge of the instance lifecycle. Every invocation carries the
//! fixed [`ConnectionPolicy`]:
//!
//! - `StrictHostKeyChecking=no` and `UserKnownHostsFile=/dev/null`: hosts are
//!   created moments before they are contacted, so their keys are unknown.
//!   This is a deliberate risk acceptance for throwaway instances only; the
//!   security group and the short-lived key are the sole trust anchors.
//! - `ConnectTimeout` and `ServerAliveInterval`: the only bound on a remote
//!   call. There is no cancellation token, so an in-flight command cannot be
//!   interrupted earlier than the transport gives up.
//!
//! Failures are never retried here.

use std::ffi::OsString;

use camino::Utf8Path;
use tracing::debug;

mod config;
mod types;
mod util;

pub use config::{DEFAULT_REMOTE_USER, RemoteConfig, RemoteConfigLoadError, RemoteError};
pub use types::{
    CommandOutput, CommandRunner, ConnectionPolicy, ProcessCommandRunner, RemoteSession,
    RunnerFuture,
};
pub use util::expand_tilde;

/// Runs commands and copies files on a single remote host.
#[derive(Clone, Debug)]
pub struct RemoteExecutor<R: CommandRunner> {
    session: RemoteSession,
    runner: R,
}

impl<R: CommandRunner> RemoteExecutor<R> {
    /// Creates an executor for `session` using `runner` to spawn processes.
    #[must_use]
    pub const fn new(session: RemoteSession, runner: R) -> Self {
        Self { session, runner }
    }

    /// Returns the session this executor is bound to.
    #[must_use]
    pub const fn session(&self) -> &RemoteSession {
        &self.session
    }

    /// Executes `command` on the host and returns its standard output.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] when `ssh` cannot be started and
    /// [`RemoteError::RemoteExec`] when the command (or the transport) exits
    /// non-zero.
    ///
    /// # Security
    ///
    /// `command` is handed to the remote shell verbatim. Callers must escape
    /// any interpolated values.
    pub async fn execute(&self, command: &str) -> Result<String, RemoteError> {
        let args = self.build_ssh_args(command);
        debug!(host = %self.session.host, command, "executing remote command");
        let output = self
            .runner
            .run(&self.session.policy.ssh_bin, &args)
            .await?;
        if output.is_success() {
            return Ok(output.stdout);
        }

        Err(RemoteError::RemoteExec {
            command: command.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }

    /// Recursively copies `source` to `target` on the host.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::RemoteCopy`] when either path is empty or the
    /// transfer exits non-zero, and [`RemoteError::Spawn`] when `scp` cannot
    /// be started.
    pub async fn copy(&self, source: &Utf8Path, target: &str) -> Result<(), RemoteError> {
        if source.as_str().trim().is_empty() || target.trim().is_empty() {
            return Err(RemoteError::RemoteCopy {
                source_path: source.to_string(),
                target_path: target.to_owned(),
                reason: String::from("source and target paths are required"),
            });
        }

        let args = self.build_scp_args(source, target);
        debug!(host = %self.session.host, %source, target, "copying to remote host");
        let output = self
            .runner
            .run(&self.session.policy.scp_bin, &args)
            .await?;
        if output.is_success() {
            return Ok(());
        }

        Err(RemoteError::RemoteCopy {
            source_path: source.to_string(),
            target_path: target.to_owned(),
            reason: format!(
                "{} exited with status {}: {}",
                self.session.policy.scp_bin,
                output.status_text(),
                output.stderr
            ),
        })
    }

    fn build_ssh_args(&self, command: &str) -> Vec<OsString> {
        let mut args = self.common_options();
        args.push(OsString::from(self.session.destination()));
        args.push(OsString::from(command));
        args
    }

    fn build_scp_args(&self, source: &Utf8Path, target: &str) -> Vec<OsString> {
        let mut args = self.common_options();
        args.push(OsString::from("-r"));
        args.push(OsString::from(source.as_str()));
        args.push(OsString::from(format!(
            "{}:{target}",
            self.session.destination()
        )));
        args
    }

    fn common_options(&self) -> Vec<OsString> {
        let policy = &self.session.policy;
        let options = [
            String::from("StrictHostKeyChecking=no"),
            String::from("UserKnownHostsFile=/dev/null"),
            format!("ServerAliveInterval={}", policy.keepalive_interval.as_secs()),
            format!("ConnectTimeout={}", policy.connect_timeout.as_secs()),
            String::from("LogLevel=ERROR"),
            String::from("BatchMode=yes"),
        ];

        let mut args = Vec::with_capacity(options.len() * 2 + 2);
        for option in options {
            args.push(OsString::from("-o"));
            args.push(OsString::from(option));
        }
        args.push(OsString::from("-i"));
        args.push(OsString::from(self.session.identity_file.as_str()));
        args
    }
}
