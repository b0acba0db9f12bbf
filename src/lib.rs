//! Core library for the prbranch preview deployer.
//!
//! Every pull request gets its own short-lived compute instance. The crate
//! exposes a compute provider abstraction with a Scaleway implementation, a
//! lifecycle manager that launches or reuses the instance for a logical name
//! (create → wait for bootstrap → deploy → terminate), an `ssh`/`scp` remote
//! executor, and a garbage collector that reclaims previews whose pull request
//! is closed or merged.

pub mod bootstrap;
pub mod config;
pub mod container;
pub mod deploy;
pub mod directory;
pub mod identity;
pub mod lease;
pub mod lifecycle;
pub mod probe;
pub mod provider;
pub mod readiness;
pub mod remote;
pub mod scaleway;
pub mod sweep;
pub mod test_support;

pub use bootstrap::BootstrapScript;
pub use config::{ConfigError, DeployConfig, ScalewayConfig};
pub use container::{ContainerController, ContainerError, TeardownOutcome};
pub use deploy::{DeployError, DeployReport, DeploymentDriver, DeploymentUnit, RemoteLayout};
pub use directory::InstanceDirectory;
pub use identity::{IdentityError, IdentityFile};
pub use lease::{NameLease, NameLeases};
pub use lifecycle::{
    Instance, InstanceManager, LaunchOutcome, LifecycleError, ManagerSettings,
    terminate_instances,
};
pub use probe::ProbeFailurePolicy;
pub use provider::{
    ComputeProvider, InstanceDescriptor, InstanceQuery, InstanceStateName, LaunchRequest,
    LaunchSpec, ProviderError, StateFilter,
};
pub use readiness::PollSettings;
pub use remote::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteConfig, RemoteError,
    RemoteExecutor,
};
pub use scaleway::{ScalewayProvider, ScalewayProviderError};
pub use sweep::{
    Collector, CollectorError, GithubStatusSource, PrStatus, PrStatusSource, SweepConfig,
    SweepReport,
};
