//! Instance lifecycle management: idempotent launch, readiness and teardown.
//!
//! An [`InstanceManager`] owns one logical name's [`Instance`] value, the
//! identity file used to reach it and a handle on the shared [`NameLeases`].
//! Launch runs the dedup lookup and the create request under the name's lease,
//! so two launches in one process can never both miss the lookup.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::bootstrap::BootstrapScript;
use crate::container::{ContainerController, TeardownOutcome};
use crate::directory::InstanceDirectory;
use crate::identity::IdentityFile;
use crate::lease::NameLeases;
use crate::probe::ProbeFailurePolicy;
use crate::provider::{ComputeProvider, InstanceDescriptor, LaunchRequest, LaunchSpec};
use crate::readiness::{DEFAULT_READY_MARKER, PollSettings, marker_present, poll_with};
use crate::remote::{
    CommandRunner, ConnectionPolicy, DEFAULT_REMOTE_USER, RemoteExecutor, RemoteSession,
};

mod error;
mod instance;

pub use error::{LaunchFailure, LifecycleError, ProviderFailure, ReadinessPhase};
pub use instance::{DEFAULT_PREVIEW_PORT, Instance};

/// Tunables of an [`InstanceManager`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManagerSettings {
    /// Login user on the instance.
    pub remote_user: String,
    /// Connection policy for every remote call.
    pub policy: ConnectionPolicy,
    /// First-boot script submitted with create requests.
    pub bootstrap: BootstrapScript,
    /// Marker whose presence means bootstrap finished.
    pub ready_marker: String,
    /// Port of the preview workload.
    pub preview_port: u16,
    /// Budget for the running-state phase.
    pub running_poll: PollSettings,
    /// Budget for the readiness-marker phase.
    pub marker_poll: PollSettings,
    /// Handling of failed dedup and container-list probes.
    pub probe_policy: ProbeFailurePolicy,
}

impl ManagerSettings {
    /// Default settings for `remote_user`.
    #[must_use]
    pub fn for_user(remote_user: impl Into<String>) -> Self {
        let remote_user = remote_user.into();
        Self {
            bootstrap: BootstrapScript::for_user(remote_user.clone()),
            remote_user,
            policy: ConnectionPolicy::default(),
            ready_marker: DEFAULT_READY_MARKER.to_owned(),
            preview_port: DEFAULT_PREVIEW_PORT,
            running_poll: PollSettings::default(),
            marker_poll: PollSettings::default(),
            probe_policy: ProbeFailurePolicy::default(),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::for_user(DEFAULT_REMOTE_USER)
    }
}

/// Result of [`InstanceManager::launch`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LaunchOutcome {
    /// A new instance was created.
    Created(Instance),
    /// A running or starting instance with the same name was adopted and its
    /// previous workload torn down.
    Reused {
        /// The adopted instance.
        instance: Instance,
        /// What the container teardown did.
        teardown: TeardownOutcome,
    },
}

impl LaunchOutcome {
    /// The launched or adopted instance.
    #[must_use]
    pub const fn instance(&self) -> &Instance {
        match self {
            Self::Created(instance) | Self::Reused { instance, .. } => instance,
        }
    }

    /// Returns `true` when an existing instance was reused.
    #[must_use]
    pub const fn is_reused(&self) -> bool {
        matches!(self, Self::Reused { .. })
    }
}

/// Owns the lifecycle of one logical instance.
#[derive(Debug)]
pub struct InstanceManager<P: ComputeProvider, R: CommandRunner + Clone> {
    provider: P,
    runner: R,
    identity: IdentityFile,
    leases: NameLeases,
    settings: ManagerSettings,
    instance: Option<Instance>,
}

impl<P, R> InstanceManager<P, R>
where
    P: ComputeProvider,
    R: CommandRunner + Clone,
{
    /// Creates a manager with a private lease registry.
    #[must_use]
    pub fn new(provider: P, runner: R, identity: IdentityFile, settings: ManagerSettings) -> Self {
        Self {
            provider,
            runner,
            identity,
            leases: NameLeases::new(),
            settings,
            instance: None,
        }
    }

    /// Shares `leases` with other managers and the garbage collector.
    #[must_use]
    pub fn with_leases(mut self, leases: NameLeases) -> Self {
        self.leases = leases;
        self
    }

    /// Current instance, if a launch has happened.
    #[must_use]
    pub const fn instance(&self) -> Option<&Instance> {
        self.instance.as_ref()
    }

    /// Preview URL of the current instance once its address is known.
    #[must_use]
    pub fn live_url(&self) -> Option<String> {
        self.instance.as_ref().and_then(Instance::live_url)
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Launches an instance for `spec.name`, or reuses the live one.
    ///
    /// An instance that is still starting counts as live, so a relaunch
    /// before it reaches `running` adopts it instead of creating a second.
    /// On reuse the previous containerised workload is stopped and pruned
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidArgument`] for an incomplete spec and
    /// [`LifecycleError::Launch`] when the provider or the teardown fails.
    pub async fn launch(&mut self, spec: &LaunchSpec) -> Result<LaunchOutcome, LifecycleError> {
        spec.validate()
            .map_err(|err| LifecycleError::InvalidArgument(err.to_string()))?;
        let name = spec.name.clone();
        let _lease = self.leases.acquire(&name).await;

        let current = self
            .instance
            .as_ref()
            .filter(|instance| instance.name() == name)
            .cloned()
            .unwrap_or_else(|| Instance::pending(name.clone(), self.settings.preview_port));

        if let Some(existing) = self.find_duplicate(&current).await? {
            let instance = current.adopt(&existing);
            info!(name = %name, instance_id = %existing.id, state = ?existing.state, "reusing live instance");
            self.instance = Some(instance.clone());
            let teardown = self.teardown_previous_workload(&instance).await?;
            return Ok(LaunchOutcome::Reused { instance, teardown });
        }

        let request = LaunchRequest::new(spec.clone(), self.settings.bootstrap.encode());
        let created = self
            .provider
            .run_instance(&request)
            .await
            .map_err(|err| LifecycleError::Launch {
                name: name.clone(),
                source: LaunchFailure::Create(Box::new(err)),
            })?
            .ok_or_else(|| LifecycleError::Launch {
                name: name.clone(),
                source: LaunchFailure::MissingDescriptor,
            })?;

        let instance = current.adopt(&created);
        info!(name = %name, instance_id = %created.id, "instance created");
        self.instance = Some(instance.clone());
        Ok(LaunchOutcome::Created(instance))
    }

    /// Terminates `ids` with one provider call.
    ///
    /// # Errors
    ///
    /// See [`terminate_instances`].
    pub async fn terminate<I, S>(&self, ids: I) -> Result<Vec<String>, LifecycleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        terminate_instances(&self.provider, ids).await
    }

    /// Waits until the instance runs with a public address and bootstrap has
    /// written the readiness marker.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InstanceNameMissing`] before any launch and
    /// [`LifecycleError::Timeout`] when a phase exhausts its budget.
    pub async fn wait_until_ready(&mut self) -> Result<Instance, LifecycleError> {
        let current = self
            .instance
            .clone()
            .ok_or(LifecycleError::InstanceNameMissing)?;

        let descriptor =
            self.await_running(&current)
                .await
                .ok_or_else(|| LifecycleError::Timeout {
                    name: current.name().to_owned(),
                    phase: ReadinessPhase::Running,
                })?;
        let adopted = current.adopt(&descriptor);
        debug!(name = %adopted.name(), instance_id = %descriptor.id, "instance running");
        self.instance = Some(adopted.clone());

        let executor = self.executor()?;
        let marker = self.settings.ready_marker.as_str();
        let bootstrapped =
            poll_with(|| marker_present(&executor, marker), self.settings.marker_poll).await;
        if !bootstrapped {
            return Err(LifecycleError::Timeout {
                name: adopted.name().to_owned(),
                phase: ReadinessPhase::Marker,
            });
        }

        info!(name = %adopted.name(), "instance ready");
        Ok(adopted)
    }

    /// Builds a remote executor bound to the current address.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AddressUnavailable`] when no address is
    /// known yet.
    pub fn executor(&self) -> Result<RemoteExecutor<R>, LifecycleError> {
        let host = self
            .instance
            .as_ref()
            .and_then(Instance::public_address)
            .ok_or(LifecycleError::AddressUnavailable)?;
        let session = RemoteSession {
            user: self.settings.remote_user.clone(),
            host: host.to_owned(),
            identity_file: self.identity.path().to_path_buf(),
            policy: self.settings.policy.clone(),
        };
        Ok(RemoteExecutor::new(session, self.runner.clone()))
    }

    /// Terminates the owned instance, if one was launched, and releases the
    /// identity file. Returns the terminated identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Terminate`] when the provider call fails.
    pub async fn destroy(self) -> Result<Option<String>, LifecycleError> {
        let Some(id) = self
            .instance
            .as_ref()
            .and_then(Instance::provider_id)
            .map(str::to_owned)
        else {
            return Ok(None);
        };
        terminate_instances(&self.provider, [id.clone()]).await?;
        Ok(Some(id))
    }

    async fn find_duplicate(
        &self,
        current: &Instance,
    ) -> Result<Option<InstanceDescriptor>, LifecycleError> {
        let directory = InstanceDirectory::new(&self.provider);
        let lookup = directory
            .find_live(current.name(), current.provider_id())
            .await;
        let found = self
            .settings
            .probe_policy
            .apply("duplicate lookup", lookup, Vec::new())
            .map_err(|err| LifecycleError::Launch {
                name: current.name().to_owned(),
                source: LaunchFailure::Lookup(Box::new(err)),
            })?;
        if found.len() > 1 {
            warn!(
                name = %current.name(),
                count = found.len(),
                "several live instances share one name; reusing the first"
            );
        }
        Ok(found.into_iter().next())
    }

    async fn teardown_previous_workload(
        &self,
        instance: &Instance,
    ) -> Result<TeardownOutcome, LifecycleError> {
        if instance.public_address().is_none() {
            debug!(name = %instance.name(), "reused instance has no address yet; skipping teardown");
            return Ok(TeardownOutcome::NothingRunning);
        }
        let executor = self.executor()?;
        ContainerController::with_policy(&executor, self.settings.probe_policy)
            .stop_and_prune()
            .await
            .map_err(|err| LifecycleError::Launch {
                name: instance.name().to_owned(),
                source: LaunchFailure::Teardown(err),
            })
    }

    async fn await_running(&self, current: &Instance) -> Option<InstanceDescriptor> {
        let directory = &InstanceDirectory::new(&self.provider);
        let seen = &Mutex::new(None);
        let name = current.name();
        let id = current.provider_id();

        let running = poll_with(
            move || async move {
                match directory.find(name, id).await {
                    Ok(found) => {
                        let addressed = found
                            .into_iter()
                            .find(|descriptor| descriptor.public_address.is_some());
                        let hit = addressed.is_some();
                        *seen.lock().unwrap_or_else(PoisonError::into_inner) = addressed;
                        hit
                    }
                    Err(err) => {
                        debug!(name, error = %err, "running-state lookup failed");
                        false
                    }
                }
            },
            self.settings.running_poll,
        )
        .await;

        if running {
            seen.lock().unwrap_or_else(PoisonError::into_inner).take()
        } else {
            None
        }
    }
}

/// Terminates every id in `ids` with one provider call. No retry.
///
/// An absent id list is an empty iterator, for example `None::<String>`.
///
/// # Errors
///
/// Returns [`LifecycleError::InvalidArgument`] without calling the provider
/// when `ids` is empty or contains a blank entry, and
/// [`LifecycleError::Terminate`] when the provider call fails.
pub async fn terminate_instances<P, I, S>(provider: &P, ids: I) -> Result<Vec<String>, LifecycleError>
where
    P: ComputeProvider,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ids = ids
        .into_iter()
        .map(|id| id.into().trim().to_owned())
        .collect::<Vec<_>>();
    if ids.is_empty() {
        return Err(LifecycleError::InvalidArgument(String::from(
            "at least one instance id is required",
        )));
    }
    if ids.iter().any(String::is_empty) {
        return Err(LifecycleError::InvalidArgument(String::from(
            "instance ids must not be blank",
        )));
    }

    provider
        .terminate_instances(&ids)
        .await
        .map_err(|err| LifecycleError::Terminate {
            ids: ids.clone(),
            source: Box::new(err),
        })?;
    info!(instance_ids = %ids.join(","), "instances terminated");
    Ok(ids)
}
