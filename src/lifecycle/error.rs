//! Errors raised by the instance lifecycle manager.

use std::fmt;

use thiserror::Error;

use crate::container::ContainerError;
use crate::identity::IdentityError;

/// Boxed provider error, keeping the manager independent of the provider's
/// concrete error type.
pub type ProviderFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Polling phase of [`super::InstanceManager::wait_until_ready`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadinessPhase {
    /// Waiting for the provider to report the instance running with an
    /// address.
    Running,
    /// Waiting for the bootstrap readiness marker.
    Marker,
}

impl fmt::Display for ReadinessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running state"),
            Self::Marker => f.write_str("readiness marker"),
        }
    }
}

/// Cause of a failed launch.
#[derive(Debug, Error)]
pub enum LaunchFailure {
    /// The provider rejected the create request.
    #[error("create request failed: {0}")]
    Create(#[source] ProviderFailure),
    /// The provider accepted the request but described no instance.
    #[error("create response did not describe an instance")]
    MissingDescriptor,
    /// The dedup lookup failed under a propagating probe policy.
    #[error("duplicate lookup failed: {0}")]
    Lookup(#[source] ProviderFailure),
    /// Tearing down the previous workload on a reused instance failed.
    #[error(transparent)]
    Teardown(#[from] ContainerError),
}

/// Errors surfaced by [`super::InstanceManager`].
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Launching or reusing the instance failed.
    #[error("failed to launch instance {name}: {source}")]
    Launch {
        /// Logical name of the instance.
        name: String,
        /// Underlying cause.
        #[source]
        source: LaunchFailure,
    },
    /// The terminate call failed.
    #[error("failed to terminate {}: {source}", ids.join(", "))]
    Terminate {
        /// Identifiers in the failed batch.
        ids: Vec<String>,
        /// Provider failure.
        #[source]
        source: ProviderFailure,
    },
    /// The caller supplied unusable arguments. No provider call was made.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Readiness was requested before any launch set a name.
    #[error("no instance name is known; launch first")]
    InstanceNameMissing,
    /// A remote executor was requested before the address is known.
    #[error("instance has no public address yet")]
    AddressUnavailable,
    /// A polling phase exhausted its budget.
    #[error("timed out waiting for {phase} of instance {name}")]
    Timeout {
        /// Logical name of the instance.
        name: String,
        /// Phase that timed out.
        phase: ReadinessPhase,
    },
    /// The identity file could not be prepared.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}
