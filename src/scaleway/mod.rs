//! Scaleway implementation of the compute provider capability.
//!
//! Scaleway tags are flat strings, so key/value tags travel as `key=value`.
//! Create requests are sent with `stopped: true` so the cloud-init payload is
//! in place before the first boot; the server is powered on straight after.
//! Termination uses the `terminate` server action, which also removes the
//! attached volumes. The API has no batch endpoint, so a batch is one action
//! per server and a failure for one server does not stop the others.

mod error;
mod lifecycle;

use scaleway_rs::ScalewayApi;

use crate::config::ScalewayConfig;
use crate::provider::{
    ComputeProvider, InstanceDescriptor, InstanceQuery, LaunchRequest, ProviderFuture,
};

pub use error::ScalewayProviderError;

const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

/// Provider that manages preview instances through the Scaleway Instances API.
#[derive(Clone)]
pub struct ScalewayProvider {
    api: ScalewayApi,
    config: ScalewayConfig,
    api_base: String,
}

impl ScalewayProvider {
    /// Constructs a provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::Config`] when the configuration fails
    /// validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayProviderError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
            api_base: SCALEWAY_INSTANCE_API_BASE.to_owned(),
        })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ScalewayConfig {
        &self.config
    }

    fn zone(&self) -> &str {
        &self.config.default_zone
    }

    fn servers_url(&self) -> String {
        format!("{}/zones/{}/servers", self.api_base, self.zone())
    }
}

impl std::fmt::Debug for ScalewayProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayProvider")
            .field("zone", &self.config.default_zone)
            .field("project", &self.config.default_project_id)
            .finish_non_exhaustive()
    }
}

impl ComputeProvider for ScalewayProvider {
    type Error = ScalewayProviderError;

    fn run_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> ProviderFuture<'a, Option<InstanceDescriptor>, Self::Error> {
        Box::pin(async move {
            request.spec.validate()?;
            let image_id = self.resolve_image_id(&request.spec).await?;
            let mut server = self.create_instance_stopped(request, &image_id).await?;
            self.power_on_if_needed(&server).await?;
            server.state = String::from("starting");
            Ok(Some(server.into_descriptor()))
        })
    }

    fn describe_instances<'a>(
        &'a self,
        query: &'a InstanceQuery,
    ) -> ProviderFuture<'a, Vec<InstanceDescriptor>, Self::Error> {
        Box::pin(async move {
            let servers = self.list_servers(query).await?;
            Ok(servers
                .into_iter()
                .map(lifecycle::ServerDocument::into_descriptor)
                .collect())
        })
    }

    fn terminate_instances<'a>(&'a self, ids: &'a [String]) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            lifecycle::terminate_each(ids, |id| async move {
                self.api
                    .perform_instance_action_async(self.zone(), &id, "terminate")
                    .await
            })
            .await
        })
    }
}
