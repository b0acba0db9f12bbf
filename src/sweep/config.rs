//! Garbage collector configuration.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use super::CollectorError;
use super::status::{DEFAULT_GITHUB_API, GithubStatusSource};

/// Default age below which an instance is never swept.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 15 * 60;

/// Sweep settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PRBRANCH_SWEEP",
    discovery(
        app_name = "prbranch",
        env_var = "PRBRANCH_CONFIG_PATH",
        config_file_name = "prbranch.toml",
        dotfile_name = ".prbranch.toml",
        project_file_name = "prbranch.toml"
    )
)]
pub struct SweepConfig {
    /// Repository whose pull requests own the previews, as `owner/name`.
    pub github_repository: String,
    /// Optional token for private repositories and higher rate limits.
    pub github_token: Option<String>,
    /// REST API base, overridable for GitHub Enterprise.
    #[ortho_config(default = DEFAULT_GITHUB_API.to_owned())]
    pub github_api_base: String,
    /// Instances younger than this many seconds are kept.
    #[ortho_config(default = DEFAULT_GRACE_PERIOD_SECS)]
    pub grace_period_secs: u64,
}

impl SweepConfig {
    /// Loads configuration from defaults, files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::InvalidConfig`] when merging fails.
    pub fn load_without_cli_args() -> Result<Self, CollectorError> {
        Self::load_from_iter([std::ffi::OsString::from("prbranch-sweep")]).map_err(|err| {
            CollectorError::InvalidConfig {
                field: String::from("configuration"),
                message: err.to_string(),
            }
        })
    }

    /// Grace period as a [`Duration`].
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Builds the GitHub status source.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::InvalidConfig`] when the repository is not of
    /// the form `owner/name`.
    pub fn status_source(&self) -> Result<GithubStatusSource, CollectorError> {
        GithubStatusSource::new(
            &self.github_repository,
            &self.github_api_base,
            self.github_token.clone(),
        )
        .ok_or_else(|| CollectorError::InvalidConfig {
            field: String::from("github_repository"),
            message: String::from(
                "expected owner/name: set PRBRANCH_SWEEP_GITHUB_REPOSITORY or add \
                 github_repository to prbranch.toml",
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(repository: &str) -> SweepConfig {
        SweepConfig {
            github_repository: repository.to_owned(),
            github_token: None,
            github_api_base: DEFAULT_GITHUB_API.to_owned(),
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
        }
    }

    #[test]
    fn default_grace_period_is_fifteen_minutes() {
        assert_eq!(config("acme/web").grace_period(), Duration::from_secs(900));
    }

    #[test]
    fn malformed_repository_names_the_field() {
        let err = config("acme").status_source().expect_err("invalid");
        assert!(matches!(
            err,
            CollectorError::InvalidConfig { ref field, .. } if field == "github_repository"
        ));
    }
}
