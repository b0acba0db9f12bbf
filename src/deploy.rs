//! End-to-end deployment of one preview.
//!
//! The driver launches (or reuses) the instance, waits for bootstrap to
//! finish, clears any workload still running, copies the artifact and the
//! startup script and finally runs the script. Each step must succeed before
//! the next begins. A failure leaves the instance running so that a retry
//! can reuse it; reclaiming it is the garbage collector's job.

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::info;

use crate::bootstrap::{DEFAULT_APP_DIR, DEFAULT_SCRIPT_DIR};
use crate::container::{ContainerController, ContainerError};
use crate::lifecycle::{InstanceManager, LifecycleError};
use crate::provider::{ComputeProvider, LaunchSpec};
use crate::remote::{CommandRunner, RemoteError};

/// Files and tag making up one deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentUnit {
    /// Local artifact (file or directory) copied to the app directory.
    pub artifact: Utf8PathBuf,
    /// Local startup script copied to the script directory.
    pub startup_script: Utf8PathBuf,
    /// Image tag handed to the startup script.
    pub image_tag: String,
}

/// Remote directories used by a deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteLayout {
    /// Directory receiving the startup script; the script runs from here.
    pub script_dir: String,
    /// Directory receiving the artifact.
    pub app_dir: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            script_dir: DEFAULT_SCRIPT_DIR.to_owned(),
            app_dir: DEFAULT_APP_DIR.to_owned(),
        }
    }
}

/// Errors raised while deploying.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The startup script does not exist locally. Nothing was launched.
    #[error("startup script not found: {path}")]
    MissingScript {
        /// Path that was checked.
        path: Utf8PathBuf,
    },
    /// Launching or reusing the instance failed.
    #[error("launch failed: {0}")]
    Launch(#[source] LifecycleError),
    /// The instance did not become ready.
    #[error("instance not ready: {0}")]
    Ready(#[source] LifecycleError),
    /// Stopping the previous workload failed.
    #[error("failed to stop previous workload: {0}")]
    Teardown(#[from] ContainerError),
    /// Copying a file to the instance failed.
    #[error("failed to copy {path}: {source}")]
    Copy {
        /// Local path being copied.
        path: Utf8PathBuf,
        /// Transfer failure.
        #[source]
        source: RemoteError,
    },
    /// The startup script failed.
    #[error("startup script failed: {0}")]
    Start(#[source] RemoteError),
}

/// Summary of a successful deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployReport {
    /// Logical instance name.
    pub name: String,
    /// Provider identifier of the instance.
    pub instance_id: String,
    /// Preview URL.
    pub live_url: String,
    /// Whether a running instance was reused.
    pub reused: bool,
}

/// Drives a deployment through an [`InstanceManager`].
#[derive(Debug)]
pub struct DeploymentDriver<P: ComputeProvider, R: CommandRunner + Clone> {
    manager: InstanceManager<P, R>,
    layout: RemoteLayout,
}

impl<P, R> DeploymentDriver<P, R>
where
    P: ComputeProvider,
    R: CommandRunner + Clone,
{
    /// Creates a driver around `manager`.
    #[must_use]
    pub const fn new(manager: InstanceManager<P, R>, layout: RemoteLayout) -> Self {
        Self { manager, layout }
    }

    /// The wrapped manager.
    #[must_use]
    pub const fn manager(&self) -> &InstanceManager<P, R> {
        &self.manager
    }

    /// Releases the wrapped manager, for example to destroy the instance.
    #[must_use]
    pub fn into_manager(self) -> InstanceManager<P, R> {
        self.manager
    }

    /// Deploys `unit` to the instance named in `spec`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step as [`DeployError`].
    pub async fn deploy(
        &mut self,
        spec: &LaunchSpec,
        unit: &DeploymentUnit,
    ) -> Result<DeployReport, DeployError> {
        let script_name = script_file_name(&unit.startup_script)?;

        let outcome = self.manager.launch(spec).await.map_err(DeployError::Launch)?;
        let reused = outcome.is_reused();
        let instance = self
            .manager
            .wait_until_ready()
            .await
            .map_err(DeployError::Ready)?;
        let executor = self.manager.executor().map_err(DeployError::Ready)?;

        ContainerController::with_policy(&executor, self.manager.settings().probe_policy)
            .stop_and_prune()
            .await?;

        executor
            .copy(&unit.artifact, &self.layout.app_dir)
            .await
            .map_err(|source| DeployError::Copy {
                path: unit.artifact.clone(),
                source,
            })?;
        executor
            .copy(&unit.startup_script, &self.layout.script_dir)
            .await
            .map_err(|source| DeployError::Copy {
                path: unit.startup_script.clone(),
                source,
            })?;

        let command = self.start_command(script_name, &unit.image_tag);
        executor
            .execute(&command)
            .await
            .map_err(DeployError::Start)?;

        let live_url = instance.live_url().unwrap_or_default();
        info!(name = %instance.name(), url = %live_url, reused, "preview deployed");
        Ok(DeployReport {
            name: instance.name().to_owned(),
            instance_id: instance.provider_id().unwrap_or_default().to_owned(),
            live_url,
            reused,
        })
    }

    fn start_command(&self, script_name: &str, image_tag: &str) -> String {
        format!(
            "cd {} && sh {} -a {} -g {}",
            escape(self.layout.script_dir.as_str().into()),
            escape(script_name.into()),
            escape(self.layout.app_dir.as_str().into()),
            escape(image_tag.into()),
        )
    }
}

fn script_file_name(path: &Utf8Path) -> Result<&str, DeployError> {
    let missing = || DeployError::MissingScript {
        path: path.to_path_buf(),
    };
    if !path.is_file() {
        return Err(missing());
    }
    path.file_name().ok_or_else(missing)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::identity::IdentityFile;
    use crate::lifecycle::ManagerSettings;
    use crate::readiness::PollSettings;
    use crate::test_support::{FakeProvider, ScriptedRunner};

    struct Fixture {
        _dir: TempDir,
        unit: DeploymentUnit,
        provider: FakeProvider,
        runner: ScriptedRunner,
        driver: DeploymentDriver<FakeProvider, ScriptedRunner>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
        let script = root.join("upload.sh");
        std::fs::write(&script, "#!/bin/sh\n").expect("write script");
        let artifact = root.join("app.tar");
        std::fs::write(&artifact, "payload").expect("write artifact");

        let provider = FakeProvider::new();
        let runner = ScriptedRunner::new();
        let quick = PollSettings {
            interval: Duration::from_millis(5),
            max_attempts: 2,
        };
        let settings = ManagerSettings {
            running_poll: quick,
            marker_poll: quick,
            ..ManagerSettings::default()
        };
        let identity = IdentityFile::from_key_material_in(&root, "key").expect("identity");
        let manager = InstanceManager::new(provider.clone(), runner.clone(), identity, settings);

        Fixture {
            _dir: dir,
            unit: DeploymentUnit {
                artifact,
                startup_script: script,
                image_tag: String::from("pr-42"),
            },
            provider,
            runner,
            driver: DeploymentDriver::new(manager, RemoteLayout::default()),
        }
    }

    fn spec() -> LaunchSpec {
        LaunchSpec::builder()
            .name("pr-42")
            .instance_type("DEV1-S")
            .image("ubuntu_noble")
            .security_group_id("sg-1")
            .key_name("key")
            .build()
            .expect("spec")
    }

    #[rstest]
    #[tokio::test]
    async fn deploy_copies_and_starts_in_order() {
        let mut fx = fixture();
        fx.runner.push_success(); // marker
        fx.runner.push_output(Some(0), "", ""); // container list
        fx.runner.push_success(); // copy artifact
        fx.runner.push_success(); // copy script
        fx.runner.push_success(); // start

        let report = fx.driver.deploy(&spec(), &fx.unit).await.expect("deploy");

        assert_eq!(report.live_url, "http://203.0.113.1:3000");
        assert!(!report.reused);
        let calls = fx.runner.invocations();
        let programs = calls.iter().map(|c| c.program.as_str()).collect::<Vec<_>>();
        assert_eq!(programs, vec!["ssh", "ssh", "scp", "scp", "ssh"]);
        let start = calls.last().and_then(|c| c.last_arg()).expect("start command");
        assert_eq!(
            start,
            "cd /etc/prbranch && sh upload.sh -a /etc/prbranch/app -g pr-42"
        );
        let artifact_copy = calls.get(2).map(|c| c.command_string()).expect("copy");
        assert!(artifact_copy.ends_with(":/etc/prbranch/app"), "{artifact_copy}");
    }

    #[rstest]
    #[tokio::test]
    async fn leftover_container_is_listed_once_then_removed() {
        let mut fx = fixture();
        fx.runner.push_success(); // marker
        fx.runner.push_output(Some(0), "abc123\n", ""); // container list
        fx.runner.push_success(); // stop
        fx.runner.push_success(); // rm
        fx.runner.push_success(); // prune
        fx.runner.push_success(); // copy artifact
        fx.runner.push_success(); // copy script
        fx.runner.push_success(); // start

        fx.driver.deploy(&spec(), &fx.unit).await.expect("deploy");

        let commands = fx
            .runner
            .invocations()
            .iter()
            .filter(|call| call.program == "ssh")
            .filter_map(|call| call.last_arg())
            .collect::<Vec<_>>();
        let listings = commands
            .iter()
            .filter(|cmd| cmd.starts_with("docker ps"))
            .count();
        assert_eq!(listings, 1, "{commands:?}");
        assert!(commands.contains(&String::from("docker stop abc123")));
        assert_eq!(fx.runner.pending_responses(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn missing_script_aborts_before_launch() {
        let mut fx = fixture();
        fx.unit.startup_script = Utf8PathBuf::from("/nonexistent/upload.sh");

        let err = fx.driver.deploy(&spec(), &fx.unit).await.expect_err("missing");

        assert!(matches!(err, DeployError::MissingScript { .. }));
        assert!(fx.provider.run_requests().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn failed_start_surfaces_as_start_error() {
        let mut fx = fixture();
        fx.runner.push_success();
        fx.runner.push_output(Some(0), "", "");
        fx.runner.push_success();
        fx.runner.push_success();
        fx.runner.push_failure(2);

        let err = fx.driver.deploy(&spec(), &fx.unit).await.expect_err("start");

        assert!(matches!(err, DeployError::Start(RemoteError::RemoteExec { .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn failed_copy_stops_the_sequence() {
        let mut fx = fixture();
        fx.runner.push_success();
        fx.runner.push_output(Some(0), "", "");
        fx.runner.push_failure(1);

        let err = fx.driver.deploy(&spec(), &fx.unit).await.expect_err("copy");

        assert!(matches!(err, DeployError::Copy { ref path, .. } if path == &fx.unit.artifact));
        assert_eq!(fx.runner.invocations().len(), 3);
    }
}
