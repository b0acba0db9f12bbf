//! Server creation for the Scaleway provider.
//!
//! Scaleway instances must receive cloud-init user-data before first boot.
//! The creation request sets `stopped: true` so the payload is available when
//! the instance is powered on.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bootstrap::decode_user_data;
use crate::provider::LaunchRequest;

use super::super::{ScalewayProvider, ScalewayProviderError};
use super::{HTTP_CLIENT, ServerDocument, encode_tags};

#[derive(Serialize)]
pub(in crate::scaleway) struct CreateServerRequest {
    pub(in crate::scaleway) name: String,
    pub(in crate::scaleway) commercial_type: String,
    pub(in crate::scaleway) image: String,
    pub(in crate::scaleway) project: String,
    pub(in crate::scaleway) routed_ip_enabled: bool,
    pub(in crate::scaleway) dynamic_ip_required: bool,
    pub(in crate::scaleway) tags: Vec<String>,
    pub(in crate::scaleway) stopped: bool,
    pub(in crate::scaleway) security_group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::scaleway) cloud_init: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::scaleway) organization: Option<String>,
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: ServerDocument,
}

impl ScalewayProvider {
    pub(in crate::scaleway) fn create_payload(
        &self,
        request: &LaunchRequest,
        image_id: &str,
    ) -> Result<CreateServerRequest, ScalewayProviderError> {
        let cloud_init = if request.user_data.trim().is_empty() {
            None
        } else {
            Some(decode_user_data(&request.user_data).map_err(ScalewayProviderError::Validation)?)
        };
        Ok(CreateServerRequest {
            name: request.spec.name.clone(),
            commercial_type: request.spec.instance_type.clone(),
            image: image_id.to_owned(),
            project: self.config.default_project_id.clone(),
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags: encode_tags(&request.tags),
            stopped: true,
            security_group: request.spec.security_group_id.clone(),
            cloud_init,
            organization: self.config.default_organization_id.clone(),
        })
    }

    /// Creates a server in the stopped state.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError`] when the API request fails or the
    /// provider rejects the requested instance type.
    pub(in crate::scaleway) async fn create_instance_stopped(
        &self,
        request: &LaunchRequest,
        image_id: &str,
    ) -> Result<ServerDocument, ScalewayProviderError> {
        let payload = self.create_payload(request, image_id)?;
        debug!(
            name = %payload.name,
            commercial_type = %payload.commercial_type,
            zone = %self.zone(),
            "creating server"
        );

        let response = HTTP_CLIENT
            .post(self.servers_url())
            .header("X-Auth-Token", &self.config.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(ScalewayProviderError::provider)?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(ScalewayProviderError::provider)?;

        if status.is_success() {
            let parsed: CreateServerResponse =
                serde_json::from_slice(&body).map_err(ScalewayProviderError::provider)?;
            info!(name = %payload.name, instance_id = %parsed.server.id, "server created");
            return Ok(parsed.server);
        }

        if let Ok(api_err) = serde_json::from_slice::<scaleway_rs::ScalewayApiError>(&body)
            && Self::is_instance_type_error(&api_err, &request.spec.instance_type)
        {
            return Err(ScalewayProviderError::InstanceTypeUnavailable {
                instance_type: request.spec.instance_type.clone(),
                zone: self.zone().to_owned(),
            });
        }

        Err(ScalewayProviderError::Provider {
            message: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        server: &ServerDocument,
    ) -> Result<(), ScalewayProviderError> {
        if server.state == "running" || server.state == "starting" {
            return Ok(());
        }
        if server.allowed_actions.iter().any(|action| action == "poweron") {
            self.api
                .perform_instance_action_async(self.zone(), &server.id, "poweron")
                .await?;
            return Ok(());
        }
        Err(ScalewayProviderError::PowerOnNotAllowed {
            instance_id: server.id.clone(),
            state: server.state.clone(),
        })
    }

    fn is_instance_type_error(api_err: &scaleway_rs::ScalewayApiError, instance_type: &str) -> bool {
        matches!(api_err.resource.as_deref(), Some("commercial_type"))
            || api_err
                .resource_id
                .as_deref()
                .is_some_and(|id| id == instance_type)
    }
}
