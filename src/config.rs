//! Configuration loading via `ortho-config`.
//!
//! Two structures live here: [`ScalewayConfig`] for the compute provider and
//! [`DeployConfig`] for the remote layout and polling budgets. Both merge
//! defaults, `prbranch.toml`, environment variables and CLI flags in that
//! order of precedence.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::bootstrap::{BootstrapScript, DEFAULT_APP_DIR, DEFAULT_INSTALL_COMMAND, DEFAULT_SCRIPT_DIR};
use crate::deploy::RemoteLayout;
use crate::lifecycle::{DEFAULT_PREVIEW_PORT, ManagerSettings};
use crate::provider::LaunchSpec;
use crate::readiness::{DEFAULT_READY_MARKER, PollSettings};
use crate::remote::RemoteConfig;

/// Scaleway specific configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls; accepted so a shared `scw` profile loads cleanly.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Preferred availability zone. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type for preview instances. Defaults to `DEV1-S`.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// Human-friendly image label (for example `Ubuntu 24.04 Noble Numbat`).
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
    /// Security group admitting SSH and the preview port.
    pub default_security_group_id: String,
    /// SSH key registered with the project. Scaleway injects project keys on
    /// boot, so the name is only recorded for the launch spec.
    #[ortho_config(default = "prbranch".to_owned())]
    pub default_key_name: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in prbranch.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl ScalewayConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("prbranch")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds the launch spec for `name` from the configured defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn launch_spec(&self, name: &str) -> Result<LaunchSpec, ConfigError> {
        self.validate()?;
        LaunchSpec::builder()
            .name(name)
            .instance_type(&self.default_instance_type)
            .image(&self.default_image)
            .architecture(&self.default_architecture)
            .security_group_id(&self.default_security_group_id)
            .key_name(&self.default_key_name)
            .build()
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                &self.secret_key,
                FieldMetadata::new(
                    "Scaleway API secret key",
                    "SCW_SECRET_KEY",
                    "secret_key",
                    "scaleway",
                ),
            ),
            (
                &self.default_project_id,
                FieldMetadata::new(
                    "Scaleway project ID",
                    "SCW_DEFAULT_PROJECT_ID",
                    "default_project_id",
                    "scaleway",
                ),
            ),
            (
                &self.default_image,
                FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image", "scaleway"),
            ),
            (
                &self.default_instance_type,
                FieldMetadata::new(
                    "instance type",
                    "SCW_DEFAULT_INSTANCE_TYPE",
                    "default_instance_type",
                    "scaleway",
                ),
            ),
            (
                &self.default_zone,
                FieldMetadata::new(
                    "availability zone",
                    "SCW_DEFAULT_ZONE",
                    "default_zone",
                    "scaleway",
                ),
            ),
            (
                &self.default_architecture,
                FieldMetadata::new(
                    "CPU architecture",
                    "SCW_DEFAULT_ARCHITECTURE",
                    "default_architecture",
                    "scaleway",
                ),
            ),
            (
                &self.default_security_group_id,
                FieldMetadata::new(
                    "security group",
                    "SCW_DEFAULT_SECURITY_GROUP_ID",
                    "default_security_group_id",
                    "scaleway",
                ),
            ),
            (
                &self.default_key_name,
                FieldMetadata::new(
                    "SSH key name",
                    "SCW_DEFAULT_KEY_NAME",
                    "default_key_name",
                    "scaleway",
                ),
            ),
        ];
        for (value, metadata) in &fields {
            require_field(value, metadata)?;
        }
        Ok(())
    }
}

/// Remote layout, preview port and readiness budgets.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PRBRANCH",
    discovery(
        app_name = "prbranch",
        env_var = "PRBRANCH_CONFIG_PATH",
        config_file_name = "prbranch.toml",
        dotfile_name = ".prbranch.toml",
        project_file_name = "prbranch.toml"
    )
)]
pub struct DeployConfig {
    /// Marker written once bootstrap finished.
    #[ortho_config(default = DEFAULT_READY_MARKER.to_owned())]
    pub ready_marker: String,
    /// Remote directory receiving the artifact.
    #[ortho_config(default = DEFAULT_APP_DIR.to_owned())]
    pub app_dir: String,
    /// Remote directory receiving and running the startup script.
    #[ortho_config(default = DEFAULT_SCRIPT_DIR.to_owned())]
    pub script_dir: String,
    /// Port the preview listens on.
    #[ortho_config(default = DEFAULT_PREVIEW_PORT)]
    pub preview_port: u16,
    /// Seconds between readiness probes.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Probes per readiness phase.
    #[ortho_config(default = 60)]
    pub poll_max_attempts: u32,
    /// Shell command installing the container runtime on first boot.
    #[ortho_config(default = DEFAULT_INSTALL_COMMAND.to_owned())]
    pub install_command: String,
}

impl DeployConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("prbranch")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks paths, port and budgets.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank paths and
    /// [`ConfigError::Invalid`] for zero budgets or a zero port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.ready_marker,
            &FieldMetadata::new("readiness marker", "PRBRANCH_READY_MARKER", "ready_marker", "prbranch"),
        )?;
        require_field(
            &self.app_dir,
            &FieldMetadata::new("application directory", "PRBRANCH_APP_DIR", "app_dir", "prbranch"),
        )?;
        require_field(
            &self.script_dir,
            &FieldMetadata::new("script directory", "PRBRANCH_SCRIPT_DIR", "script_dir", "prbranch"),
        )?;
        if self.preview_port == 0 {
            return Err(ConfigError::Invalid(String::from("preview_port must be non-zero")));
        }
        if self.poll_max_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "poll_max_attempts must be at least 1",
            )));
        }
        Ok(())
    }

    /// Remote directories for the deployment driver.
    #[must_use]
    pub fn layout(&self) -> RemoteLayout {
        RemoteLayout {
            script_dir: self.script_dir.clone(),
            app_dir: self.app_dir.clone(),
        }
    }

    /// Polling budget shared by both readiness phases.
    #[must_use]
    pub const fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.poll_max_attempts,
        }
    }

    /// Manager settings combining this configuration with the remote one.
    #[must_use]
    pub fn manager_settings(&self, remote: &RemoteConfig) -> ManagerSettings {
        let bootstrap = BootstrapScript {
            install_command: self.install_command.clone(),
            remote_user: remote.user.clone(),
            script_dir: self.script_dir.clone(),
            app_dir: self.app_dir.clone(),
            ready_marker: self.ready_marker.clone(),
        };
        ManagerSettings {
            remote_user: remote.user.clone(),
            policy: remote.policy(),
            bootstrap,
            ready_marker: self.ready_marker.clone(),
            preview_port: self.preview_port,
            running_poll: self.poll_settings(),
            marker_poll: self.poll_settings(),
            ..ManagerSettings::default()
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
