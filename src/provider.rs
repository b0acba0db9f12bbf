//! Compute provider abstraction for provisioning preview instances.
//!
//! The orchestration layer only needs three provider capabilities: launching
//! an instance, describing instances by tag, and terminating a batch of
//! instances. Everything else (placement, billing, image catalogues) stays
//! inside the concrete provider.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Tag key carrying the logical name of a preview instance.
pub const NAME_TAG: &str = "Name";

/// Tag key marking instances owned by this tool.
pub const PREVIEW_TAG_KEY: &str = "prbranch";

/// Tag value paired with [`PREVIEW_TAG_KEY`].
pub const PREVIEW_TAG_VALUE: &str = "preview";

/// Caller-facing description of the instance to launch for one logical name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSpec {
    /// Logical name derived from the pull request or branch.
    pub name: String,
    /// Instance size or commercial type (for example `DEV1-S`).
    pub instance_type: String,
    /// Image label or identifier to boot from.
    pub image: String,
    /// CPU architecture used to pick the image variant.
    pub architecture: String,
    /// Security group the instance joins.
    pub security_group_id: String,
    /// Optional human readable security group name.
    pub security_group_name: Option<String>,
    /// Key pair authorised to log in.
    pub key_name: String,
}

impl LaunchSpec {
    /// Starts a builder for a [`LaunchSpec`].
    #[must_use]
    pub fn builder() -> LaunchSpecBuilder {
        LaunchSpecBuilder::new()
    }

    /// Validates the spec, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when any required field is empty.
    pub fn validate(&self) -> Result<(), ProviderError> {
        let required = [
            (&self.name, "name"),
            (&self.instance_type, "instance_type"),
            (&self.image, "image"),
            (&self.architecture, "architecture"),
            (&self.security_group_id, "security_group_id"),
            (&self.key_name, "key_name"),
        ];
        for (value, field) in required {
            if value.is_empty() {
                return Err(ProviderError::Validation(field.to_owned()));
            }
        }
        Ok(())
    }
}

/// Builder for [`LaunchSpec`] that trims inputs and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LaunchSpecBuilder {
    name: String,
    instance_type: String,
    image: String,
    architecture: String,
    security_group_id: String,
    security_group_name: Option<String>,
    key_name: String,
}

impl LaunchSpecBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self {
            architecture: String::from("x86_64"),
            ..Self::default()
        }
    }

    /// Sets the logical name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the instance type.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the image label or identifier.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the architecture. Defaults to `x86_64`.
    #[must_use]
    pub fn architecture(mut self, value: impl Into<String>) -> Self {
        self.architecture = value.into();
        self
    }

    /// Sets the security group identifier.
    #[must_use]
    pub fn security_group_id(mut self, value: impl Into<String>) -> Self {
        self.security_group_id = value.into();
        self
    }

    /// Sets the optional security group name.
    #[must_use]
    pub fn security_group_name(mut self, value: Option<String>) -> Self {
        self.security_group_name = value;
        self
    }

    /// Sets the key pair identifier.
    #[must_use]
    pub fn key_name(mut self, value: impl Into<String>) -> Self {
        self.key_name = value.into();
        self
    }

    /// Builds and validates the [`LaunchSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<LaunchSpec, ProviderError> {
        let spec = LaunchSpec {
            name: self.name.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            image: self.image.trim().to_owned(),
            architecture: self.architecture.trim().to_owned(),
            security_group_id: self.security_group_id.trim().to_owned(),
            security_group_name: self
                .security_group_name
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty()),
            key_name: self.key_name.trim().to_owned(),
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Provider-level create request assembled by the lifecycle manager.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchRequest {
    /// The caller's launch spec.
    pub spec: LaunchSpec,
    /// Base64 encoded first-boot script.
    pub user_data: String,
    /// Tags applied to the new instance.
    pub tags: BTreeMap<String, String>,
}

impl LaunchRequest {
    /// Builds a request carrying the name and preview marker tags.
    #[must_use]
    pub fn new(spec: LaunchSpec, user_data: String) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(NAME_TAG.to_owned(), spec.name.clone());
        tags.insert(PREVIEW_TAG_KEY.to_owned(), PREVIEW_TAG_VALUE.to_owned());
        Self {
            spec,
            user_data,
            tags,
        }
    }
}

/// Lifecycle state as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceStateName {
    /// Booting or being allocated.
    Pending,
    /// Running and addressable.
    Running,
    /// Shutting down.
    Stopping,
    /// Powered off but still allocated.
    Stopped,
    /// Gone or being removed.
    Terminated,
    /// Any provider state without a mapping above.
    Other(String),
}

impl InstanceStateName {
    /// Maps a provider state string onto the internal view.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "pending" | "starting" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" | "stopped in place" => Self::Stopped,
            "terminated" | "shutting-down" | "deleting" => Self::Terminated,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Provider view of one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceDescriptor {
    /// Opaque provider identifier.
    pub id: String,
    /// Public address, present once the instance is running.
    pub public_address: Option<String>,
    /// Tags attached to the instance.
    pub tags: BTreeMap<String, String>,
    /// Current lifecycle state.
    pub state: InstanceStateName,
    /// Creation timestamp when the provider reports one.
    pub launched_at: Option<DateTime<Utc>>,
}

impl InstanceDescriptor {
    /// Returns the logical name tag, if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.tags.get(NAME_TAG).map(String::as_str)
    }

    /// Returns `true` when the instance is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == InstanceStateName::Running
    }

    /// Returns `true` when the instance is running or still starting.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(
            self.state,
            InstanceStateName::Running | InstanceStateName::Pending
        )
    }
}

/// Lifecycle states accepted by an [`InstanceQuery`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StateFilter {
    /// Every state.
    #[default]
    Any,
    /// Running instances only.
    Running,
    /// Running or pending instances.
    Live,
}

impl StateFilter {
    /// Returns `true` when the state of `descriptor` passes the filter.
    #[must_use]
    pub fn admits(self, descriptor: &InstanceDescriptor) -> bool {
        match self {
            Self::Any => true,
            Self::Running => descriptor.is_running(),
            Self::Live => descriptor.is_live(),
        }
    }
}

/// Filter used when describing instances.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceQuery {
    /// Tags that must all match.
    pub tags: BTreeMap<String, String>,
    /// Lifecycle states to keep.
    pub states: StateFilter,
    /// Restrict to the given identifiers.
    pub ids: Vec<String>,
}

impl InstanceQuery {
    /// Query for running instances carrying `Name=<name>`.
    #[must_use]
    pub fn running_named(name: &str) -> Self {
        Self::named(name, StateFilter::Running)
    }

    /// Query for running or pending instances carrying `Name=<name>`.
    #[must_use]
    pub fn live_named(name: &str) -> Self {
        Self::named(name, StateFilter::Live)
    }

    fn named(name: &str, states: StateFilter) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(NAME_TAG.to_owned(), name.to_owned());
        Self {
            tags,
            states,
            ids: Vec::new(),
        }
    }

    /// Query for every running instance carrying the preview marker tag.
    #[must_use]
    pub fn running_previews() -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(PREVIEW_TAG_KEY.to_owned(), PREVIEW_TAG_VALUE.to_owned());
        Self {
            tags,
            states: StateFilter::Running,
            ids: Vec::new(),
        }
    }

    /// Narrows the query to a known identifier.
    #[must_use]
    pub fn with_id(mut self, id: Option<&str>) -> Self {
        if let Some(value) = id {
            self.ids = vec![value.to_owned()];
        }
        self
    }

    /// Returns `true` when `descriptor` satisfies every filter.
    #[must_use]
    pub fn matches(&self, descriptor: &InstanceDescriptor) -> bool {
        if !self.states.admits(descriptor) {
            return false;
        }
        if !self.ids.is_empty() && !self.ids.contains(&descriptor.id) {
            return false;
        }
        self.tags
            .iter()
            .all(|(key, value)| descriptor.tags.get(key) == Some(value))
    }
}

/// Errors raised before a request reaches a provider.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by compute providers.
pub trait ComputeProvider: Send + Sync {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Submits a create request. `Ok(None)` means the provider accepted the
    /// request but returned no instance descriptor.
    fn run_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> ProviderFuture<'a, Option<InstanceDescriptor>, Self::Error>;

    /// Lists instances matching `query`.
    fn describe_instances<'a>(
        &'a self,
        query: &'a InstanceQuery,
    ) -> ProviderFuture<'a, Vec<InstanceDescriptor>, Self::Error>;

    /// Terminates every instance in `ids` with a single request.
    fn terminate_instances<'a>(&'a self, ids: &'a [String]) -> ProviderFuture<'a, (), Self::Error>;
}
