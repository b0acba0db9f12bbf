//! Server lifecycle helpers for the Scaleway provider.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::provider::{InstanceDescriptor, InstanceStateName};

use super::ScalewayProviderError;

mod create;
mod describe;
mod image;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct PublicIp {
    pub(super) address: String,
}

/// Server document as returned by the create and list endpoints.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ServerDocument {
    pub(super) id: String,
    #[serde(default)]
    pub(super) state: String,
    #[serde(default)]
    pub(super) tags: Vec<String>,
    #[serde(default)]
    pub(super) public_ip: Option<PublicIp>,
    #[serde(default)]
    pub(super) public_ips: Vec<PublicIp>,
    #[serde(default)]
    pub(super) creation_date: Option<String>,
    #[serde(default)]
    pub(super) allowed_actions: Vec<String>,
}

impl ServerDocument {
    pub(super) fn address(&self) -> Option<String> {
        self.public_ip
            .as_ref()
            .or_else(|| self.public_ips.first())
            .map(|ip| ip.address.clone())
    }

    pub(super) fn into_descriptor(self) -> InstanceDescriptor {
        let public_address = self.address();
        let launched_at = self
            .creation_date
            .as_deref()
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc));
        InstanceDescriptor {
            id: self.id,
            public_address,
            tags: decode_tags(&self.tags),
            state: InstanceStateName::parse(&self.state),
            launched_at,
        }
    }
}

/// Flattens key/value tags into Scaleway's `key=value` strings.
pub(super) fn encode_tags(tags: &BTreeMap<String, String>) -> Vec<String> {
    tags.iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect()
}

/// Splits `key=value` strings back into a map. Tags without `=` map to an
/// empty value.
pub(super) fn decode_tags(tags: &[String]) -> BTreeMap<String, String> {
    tags.iter()
        .map(|tag| {
            tag.split_once('=').map_or_else(
                || (tag.clone(), String::new()),
                |(key, value)| (key.to_owned(), value.to_owned()),
            )
        })
        .collect()
}

/// Runs `terminate` for every id, carrying on past failures.
///
/// # Errors
///
/// Returns [`ScalewayProviderError::Terminate`] naming every id whose action
/// failed.
pub(super) async fn terminate_each<F, Fut, E>(
    ids: &[String],
    mut terminate: F,
) -> Result<(), ScalewayProviderError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut failed = Vec::new();
    let mut messages = Vec::new();
    for id in ids {
        if let Err(err) = terminate(id.clone()).await {
            warn!(instance_id = %id, error = %err, "terminate action failed");
            messages.push(format!("{id}: {err}"));
            failed.push(id.clone());
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(ScalewayProviderError::Terminate {
            instance_ids: failed,
            message: messages.join("; "),
        })
    }
}

#[cfg(test)]
mod tests;
