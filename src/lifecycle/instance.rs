//! The owned view of one preview instance.

use crate::provider::{InstanceDescriptor, InstanceStateName};

/// Default port the preview workload listens on.
pub const DEFAULT_PREVIEW_PORT: u16 = 3000;

/// One ephemeral instance tied to one logical name.
///
/// Values are immutable: adopting a provider descriptor yields a new value.
/// The identifier and address always come from the same descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    name: String,
    provider_id: Option<String>,
    public_address: Option<String>,
    state: InstanceStateName,
    port: u16,
}

impl Instance {
    /// An instance known only by name, before any provider response.
    #[must_use]
    pub fn pending(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            provider_id: None,
            public_address: None,
            state: InstanceStateName::Pending,
            port,
        }
    }

    /// Returns a new value carrying the identity, address and state reported
    /// in `descriptor`.
    #[must_use]
    pub fn adopt(&self, descriptor: &InstanceDescriptor) -> Self {
        Self {
            name: self.name.clone(),
            provider_id: Some(descriptor.id.clone()),
            public_address: descriptor.public_address.clone(),
            state: descriptor.state.clone(),
            port: self.port,
        }
    }

    /// Logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provider identifier once the launch is confirmed.
    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    /// Public address once the instance is running.
    #[must_use]
    pub fn public_address(&self) -> Option<&str> {
        self.public_address.as_deref()
    }

    /// Last state observed at the provider.
    #[must_use]
    pub const fn state(&self) -> &InstanceStateName {
        &self.state
    }

    /// Preview URL, available once the address is known.
    #[must_use]
    pub fn live_url(&self) -> Option<String> {
        self.public_address
            .as_ref()
            .map(|address| format!("http://{address}:{}", self.port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn descriptor(address: Option<&str>) -> InstanceDescriptor {
        InstanceDescriptor {
            id: String::from("i-0abc"),
            public_address: address.map(str::to_owned),
            tags: BTreeMap::new(),
            state: InstanceStateName::Running,
            launched_at: None,
        }
    }

    #[test]
    fn pending_instance_has_no_identity_or_url() {
        let instance = Instance::pending("pr-42", DEFAULT_PREVIEW_PORT);
        assert_eq!(instance.provider_id(), None);
        assert_eq!(instance.live_url(), None);
    }

    #[test]
    fn adopt_takes_id_and_address_together() {
        let pending = Instance::pending("pr-42", DEFAULT_PREVIEW_PORT);
        let adopted = pending.adopt(&descriptor(Some("198.51.100.20")));

        assert_eq!(adopted.name(), "pr-42");
        assert_eq!(adopted.provider_id(), Some("i-0abc"));
        assert_eq!(adopted.public_address(), Some("198.51.100.20"));
        assert_eq!(adopted.live_url().as_deref(), Some("http://198.51.100.20:3000"));
        assert_eq!(pending.provider_id(), None, "original value is untouched");
    }

    #[test]
    fn adopting_a_descriptor_without_address_clears_the_url() {
        let running = Instance::pending("pr-42", DEFAULT_PREVIEW_PORT)
            .adopt(&descriptor(Some("198.51.100.20")));
        let replaced = running.adopt(&descriptor(None));
        assert_eq!(replaced.live_url(), None);
    }
}
