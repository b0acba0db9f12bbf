//! Server listing for the Scaleway provider.

use std::future::Future;

use serde::Deserialize;

use crate::provider::{InstanceQuery, StateFilter};

use super::super::{ScalewayProvider, ScalewayProviderError};
use super::{HTTP_CLIENT, ServerDocument, encode_tags};

/// Servers requested per page.
pub(super) const PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
struct ListServersResponse {
    #[serde(default)]
    servers: Vec<ServerDocument>,
}

impl ScalewayProvider {
    /// Query parameters selecting page `page` of the servers described by
    /// `query`.
    ///
    /// The list endpoint filters on a single state, so live queries fetch
    /// every state and are narrowed by the caller.
    pub(in crate::scaleway) fn list_params(
        &self,
        query: &InstanceQuery,
        page: u32,
    ) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("project", self.config.default_project_id.clone()),
            ("per_page", PAGE_SIZE.to_string()),
            ("page", page.to_string()),
        ];
        if !query.tags.is_empty() {
            params.push(("tags", encode_tags(&query.tags).join(",")));
        }
        if query.states == StateFilter::Running {
            params.push(("state", String::from("running")));
        }
        if !query.ids.is_empty() {
            params.push(("servers", query.ids.join(",")));
        }
        params
    }

    /// Lists every server matching `query`, following pagination.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::Provider`] when a request fails or
    /// a response cannot be parsed.
    pub(in crate::scaleway) async fn list_servers(
        &self,
        query: &InstanceQuery,
    ) -> Result<Vec<ServerDocument>, ScalewayProviderError> {
        collect_pages(|page| self.list_page(query, page)).await
    }

    async fn list_page(
        &self,
        query: &InstanceQuery,
        page: u32,
    ) -> Result<Vec<ServerDocument>, ScalewayProviderError> {
        let response = HTTP_CLIENT
            .get(self.servers_url())
            .header("X-Auth-Token", &self.config.secret_key)
            .query(&self.list_params(query, page))
            .send()
            .await
            .map_err(ScalewayProviderError::provider)?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(ScalewayProviderError::provider)?;
        if !status.is_success() {
            return Err(ScalewayProviderError::Provider {
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: ListServersResponse =
            serde_json::from_slice(&body).map_err(ScalewayProviderError::provider)?;
        Ok(parsed.servers)
    }
}

/// Calls `fetch` for pages 1, 2, ... and concatenates the results until a
/// page holds fewer than [`PAGE_SIZE`] entries.
pub(super) async fn collect_pages<T, E, F, Fut>(mut fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    let mut collected = Vec::new();
    let mut page = 1_u32;
    loop {
        let batch = fetch(page).await?;
        let last = batch.len() < PAGE_SIZE;
        collected.extend(batch);
        if last {
            return Ok(collected);
        }
        page = page.saturating_add(1);
    }
}
