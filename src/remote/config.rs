//! Remote shell configuration structures and validation.
//!
//! [`RemoteConfig`] carries the `ssh`/`scp` settings and the private key
//! source. Configuration is loaded via `ortho-config` which merges defaults,
//! configuration files, and environment variables.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use super::types::ConnectionPolicy;

/// Default remote login user for the stock Ubuntu images.
pub const DEFAULT_REMOTE_USER: &str = "root";

/// Remote shell settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PRBRANCH_REMOTE",
    discovery(
        app_name = "prbranch",
        env_var = "PRBRANCH_CONFIG_PATH",
        config_file_name = "prbranch.toml",
        dotfile_name = ".prbranch.toml",
        project_file_name = "prbranch.toml"
    )
)]
pub struct RemoteConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = DEFAULT_REMOTE_USER.to_owned())]
    pub user: String,
    /// Inline private key material. Written to a scoped temporary file for the
    /// lifetime of one deployment.
    pub private_key: Option<String>,
    /// Path to a private key file. Supports tilde expansion. Ignored when
    /// `private_key` is set.
    pub private_key_file: Option<String>,
    /// Seconds between SSH keepalive probes.
    #[ortho_config(default = 15)]
    pub keepalive_interval_secs: u64,
    /// Seconds allowed for establishing a connection.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u64,
}

/// Errors raised when loading the remote configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RemoteConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("remote configuration parsing failed: {0}")]
    Parse(String),
}

impl RemoteConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when a required field is empty
    /// or neither key source is configured.
    pub fn validate(&self) -> Result<(), RemoteError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.user, "user")?;
        Self::require_optional_value(self.private_key.as_deref(), "private_key")?;
        Self::require_optional_value(self.private_key_file.as_deref(), "private_key_file")?;
        if self.private_key.is_none() && self.private_key_file.is_none() {
            return Err(RemoteError::InvalidConfig {
                field: String::from("private_key"),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(RemoteError::InvalidConfig {
                field: String::from("connect_timeout_secs"),
            });
        }
        Ok(())
    }

    /// Loads configuration using defaults, configuration files, and
    /// environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, RemoteConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("prbranch")])
            .map_err(|err| RemoteConfigLoadError::Parse(err.to_string()))
    }

    /// Builds the connection policy used for every remote call.
    #[must_use]
    pub fn policy(&self) -> ConnectionPolicy {
        ConnectionPolicy {
            ssh_bin: self.ssh_bin.clone(),
            scp_bin: self.scp_bin.clone(),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), RemoteError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), RemoteError> {
        Self::require_optional_value(Some(value), field)
    }
}

/// Errors surfaced while executing commands or copying files remotely.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set PRBRANCH_REMOTE_{env_suffix} or add {field} to prbranch.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a remote command exits non-zero.
    #[error("remote command `{command}` exited with status {status_text}: {stderr}")]
    RemoteExec {
        /// Command that was run on the host.
        command: String,
        /// Exit status as reported by the transport.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when a copy cannot be attempted or the transfer fails.
    #[error("failed to copy {source_path} to {target_path}: {reason}")]
    RemoteCopy {
        /// Local source path.
        source_path: String,
        /// Remote target path.
        target_path: String,
        /// Description of the failure.
        reason: String,
    },
}
