//! Read-only lookups of preview instances at the compute provider.

use crate::provider::{ComputeProvider, InstanceDescriptor, InstanceQuery};

/// Queries the provider for preview instances. Never mutates anything.
#[derive(Debug)]
pub struct InstanceDirectory<'a, P: ComputeProvider> {
    provider: &'a P,
}

impl<'a, P: ComputeProvider> InstanceDirectory<'a, P> {
    /// Wraps `provider`.
    #[must_use]
    pub const fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    /// Running instances tagged with `name`, optionally narrowed to `id`.
    ///
    /// # Errors
    ///
    /// Propagates the provider error.
    pub async fn find(
        &self,
        name: &str,
        id: Option<&str>,
    ) -> Result<Vec<InstanceDescriptor>, P::Error> {
        let query = InstanceQuery::running_named(name).with_id(id);
        self.describe(&query).await
    }

    /// Running or still-starting instances tagged with `name`, optionally
    /// narrowed to `id`.
    ///
    /// # Errors
    ///
    /// Propagates the provider error.
    pub async fn find_live(
        &self,
        name: &str,
        id: Option<&str>,
    ) -> Result<Vec<InstanceDescriptor>, P::Error> {
        let query = InstanceQuery::live_named(name).with_id(id);
        self.describe(&query).await
    }

    /// Every running instance carrying the preview marker tag.
    ///
    /// # Errors
    ///
    /// Propagates the provider error.
    pub async fn list_previews(&self) -> Result<Vec<InstanceDescriptor>, P::Error> {
        self.describe(&InstanceQuery::running_previews()).await
    }

    async fn describe(&self, query: &InstanceQuery) -> Result<Vec<InstanceDescriptor>, P::Error> {
        let found = self.provider.describe_instances(query).await?;
        Ok(found
            .into_iter()
            .filter(|descriptor| !descriptor.id.is_empty() && query.matches(descriptor))
            .collect())
    }
}
