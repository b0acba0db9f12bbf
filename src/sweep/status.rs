//! Pull-request status lookups.

use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Default GitHub REST endpoint.
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("prbranch/", env!("CARGO_PKG_VERSION"));

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Lifecycle state of a pull request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrStatus {
    /// Still open; its preview must stay.
    Open,
    /// Closed without merging.
    Closed,
    /// Merged.
    Merged,
    /// The repository reports no such pull request.
    NotFound,
    /// The state could not be determined; treated like open.
    Unknown,
}

impl PrStatus {
    /// Returns `true` when the preview for this pull request is no longer
    /// needed.
    #[must_use]
    pub const fn is_inactive(self) -> bool {
        matches!(self, Self::Closed | Self::Merged | Self::NotFound)
    }
}

/// Raised when a status lookup fails.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StatusError {
    /// The request could not be sent or its body read.
    #[error("status request for #{number} failed: {message}")]
    Request {
        /// Pull request number.
        number: u64,
        /// Transport error message.
        message: String,
    },
    /// The endpoint answered with a status other than 200 or 404.
    #[error("status request for #{number} returned HTTP {status}")]
    UnexpectedStatus {
        /// Pull request number.
        number: u64,
        /// HTTP status code.
        status: u16,
    },
    /// The response body was not a pull request document.
    #[error("status response for #{number} could not be parsed: {message}")]
    Decode {
        /// Pull request number.
        number: u64,
        /// Parser message.
        message: String,
    },
}

/// Future returned by [`PrStatusSource::status`].
pub type StatusFuture<'a> = Pin<Box<dyn Future<Output = Result<PrStatus, StatusError>> + Send + 'a>>;

/// Source of pull-request status.
pub trait PrStatusSource: Send + Sync {
    /// Looks up pull request `number`.
    fn status(&self, number: u64) -> StatusFuture<'_>;
}

#[derive(Debug, Deserialize)]
struct PullRequestDocument {
    state: String,
    #[serde(default)]
    merged: Option<bool>,
    #[serde(default)]
    merged_at: Option<String>,
}

impl PullRequestDocument {
    fn status(&self) -> PrStatus {
        if self.merged == Some(true) || self.merged_at.is_some() {
            return PrStatus::Merged;
        }
        match self.state.as_str() {
            "open" => PrStatus::Open,
            "closed" => PrStatus::Closed,
            _ => PrStatus::Unknown,
        }
    }
}

/// Reads pull-request state from the GitHub REST API.
#[derive(Clone, Debug)]
pub struct GithubStatusSource {
    api_base: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GithubStatusSource {
    /// Creates a source for `repository` given as `owner/name`.
    ///
    /// Returns `None` when `repository` is not of that form.
    #[must_use]
    pub fn new(repository: &str, api_base: &str, token: Option<String>) -> Option<Self> {
        let (owner, repo) = repository.trim().split_once('/')?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self {
            api_base: api_base.trim_end_matches('/').to_owned(),
            owner: owner.to_owned(),
            repo: repo.to_owned(),
            token: token.filter(|value| !value.trim().is_empty()),
        })
    }

    /// URL of pull request `number`.
    #[must_use]
    pub fn pull_url(&self, number: u64) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{number}",
            self.api_base, self.owner, self.repo
        )
    }

    async fn fetch(&self, number: u64) -> Result<PrStatus, StatusError> {
        let request_error = |err: reqwest::Error| StatusError::Request {
            number,
            message: err.to_string(),
        };
        let mut request = HTTP_CLIENT
            .get(self.pull_url(number))
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(request_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(PrStatus::NotFound);
        }
        if !status.is_success() {
            return Err(StatusError::UnexpectedStatus {
                number,
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(request_error)?;
        parse_pull_request(number, &body)
    }
}

impl PrStatusSource for GithubStatusSource {
    fn status(&self, number: u64) -> StatusFuture<'_> {
        Box::pin(self.fetch(number))
    }
}

fn parse_pull_request(number: u64, body: &[u8]) -> Result<PrStatus, StatusError> {
    serde_json::from_slice::<PullRequestDocument>(body)
        .map(|document| document.status())
        .map_err(|err| StatusError::Decode {
            number,
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"state":"open","merged":false,"merged_at":null}"#, PrStatus::Open)]
    #[case(r#"{"state":"closed","merged":false,"merged_at":null}"#, PrStatus::Closed)]
    #[case(r#"{"state":"closed","merged":true}"#, PrStatus::Merged)]
    #[case(r#"{"state":"closed","merged_at":"2026-01-02T03:04:05Z"}"#, PrStatus::Merged)]
    #[case(r#"{"state":"draft"}"#, PrStatus::Unknown)]
    fn documents_map_to_status(#[case] body: &str, #[case] expected: PrStatus) {
        assert_eq!(parse_pull_request(7, body.as_bytes()), Ok(expected));
    }

    #[rstest]
    fn garbage_body_is_a_decode_error() {
        assert!(matches!(
            parse_pull_request(7, b"<html>"),
            Err(StatusError::Decode { number: 7, .. })
        ));
    }

    #[rstest]
    #[case("acme/web", true)]
    #[case("acme", false)]
    #[case("/web", false)]
    #[case("acme/web/extra", false)]
    fn repository_must_be_owner_slash_name(#[case] repository: &str, #[case] valid: bool) {
        assert_eq!(
            GithubStatusSource::new(repository, DEFAULT_GITHUB_API, None).is_some(),
            valid
        );
    }

    #[rstest]
    fn pull_url_joins_base_and_number() {
        let source = GithubStatusSource::new("acme/web", "https://ghe.example/api/v3/", None)
            .expect("valid repository");
        assert_eq!(
            source.pull_url(42),
            "https://ghe.example/api/v3/repos/acme/web/pulls/42"
        );
    }

    #[rstest]
    #[case(PrStatus::Open, false)]
    #[case(PrStatus::Unknown, false)]
    #[case(PrStatus::Closed, true)]
    #[case(PrStatus::Merged, true)]
    #[case(PrStatus::NotFound, true)]
    fn only_finished_requests_are_inactive(#[case] status: PrStatus, #[case] inactive: bool) {
        assert_eq!(status.is_inactive(), inactive);
    }
}
