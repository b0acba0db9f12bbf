//! Unit tests for Scaleway lifecycle helpers.

use std::collections::HashMap;

use rstest::{fixture, rstest};
use scaleway_rs::{ScalewayApi, ScalewayImage};

use super::*;
use crate::bootstrap::BootstrapScript;
use crate::config::ScalewayConfig;
use crate::provider::{InstanceQuery, LaunchRequest, LaunchSpec};
use crate::scaleway::{SCALEWAY_INSTANCE_API_BASE, ScalewayProvider, ScalewayProviderError};

#[derive(Copy, Clone)]
struct ImageSpec {
    id: &'static str,
    arch: &'static str,
    state: &'static str,
    creation_date: &'static str,
}

fn image(spec: ImageSpec) -> ScalewayImage {
    ScalewayImage {
        id: spec.id.to_owned(),
        name: String::new(),
        arch: spec.arch.to_owned(),
        creation_date: spec.creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: spec.state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

fn available(id: &'static str, creation_date: &'static str) -> ScalewayImage {
    image(ImageSpec {
        id,
        arch: "x86_64",
        state: "available",
        creation_date,
    })
}

#[fixture]
fn provider() -> ScalewayProvider {
    ScalewayProvider {
        api: ScalewayApi::new("dummy"),
        config: ScalewayConfig {
            access_key: None,
            secret_key: String::from("dummy"),
            default_organization_id: None,
            default_project_id: String::from("proj"),
            default_zone: String::from("fr-par-1"),
            default_instance_type: String::from("DEV1-S"),
            default_image: String::from("Ubuntu 24.04 Noble Numbat"),
            default_architecture: String::from("x86_64"),
            default_security_group_id: String::from("sg-123"),
            default_key_name: String::from("prbranch"),
        },
        api_base: SCALEWAY_INSTANCE_API_BASE.to_owned(),
    }
}

fn spec() -> LaunchSpec {
    LaunchSpec::builder()
        .name("pr-42")
        .instance_type("DEV1-S")
        .image("Ubuntu 24.04 Noble Numbat")
        .security_group_id("sg-123")
        .key_name("prbranch")
        .build()
        .expect("valid spec")
}

fn server(json: &str) -> ServerDocument {
    serde_json::from_str(json).expect("server document")
}

#[rstest]
fn usable_images_discards_wrong_arch_or_state() {
    let images = vec![
        available("keep", "2025-01-01T00:00:00Z"),
        image(ImageSpec {
            id: "wrong-arch",
            arch: "arm64",
            state: "available",
            creation_date: "2025-01-01T00:00:00Z",
        }),
        image(ImageSpec {
            id: "wrong-state",
            arch: "x86_64",
            state: "failed",
            creation_date: "2025-01-01T00:00:00Z",
        }),
    ];

    let usable = ScalewayProvider::usable_images(images, &spec());
    let ids = usable.iter().map(|img| img.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["keep"]);
}

#[rstest]
fn newest_image_wins(provider: ScalewayProvider) {
    let images = vec![
        available("oldest", "2024-12-01T00:00:00Z"),
        available("newest", "2025-02-01T00:00:00Z"),
    ];
    let id = provider
        .newest_image_id(images, &spec())
        .expect("image selected");
    assert_eq!(id, "newest");
}

#[rstest]
fn no_candidate_is_image_not_found(provider: ScalewayProvider) {
    let err = provider
        .newest_image_id(Vec::new(), &spec())
        .expect_err("empty candidates should fail");
    assert!(matches!(
        err,
        ScalewayProviderError::ImageNotFound { ref zone, .. } if zone == "fr-par-1"
    ));
}

#[rstest]
#[tokio::test]
async fn project_images_take_precedence(provider: ScalewayProvider) {
    let id = provider
        .resolve_image_id_with(
            &spec(),
            || async { Ok(vec![available("project", "2024-01-01T00:00:00Z")]) },
            || async {
                Err(ScalewayProviderError::Provider {
                    message: String::from("public images must not be fetched"),
                })
            },
        )
        .await
        .expect("image selected");
    assert_eq!(id, "project");
}

#[rstest]
#[tokio::test]
async fn public_images_are_the_fallback(provider: ScalewayProvider) {
    let id = provider
        .resolve_image_id_with(
            &spec(),
            || async { Ok(Vec::new()) },
            || async { Ok(vec![available("public", "2024-01-01T00:00:00Z")]) },
        )
        .await
        .expect("image selected");
    assert_eq!(id, "public");
}

#[rstest]
fn create_payload_boots_stopped_with_plain_cloud_init(provider: ScalewayProvider) {
    let bootstrap = BootstrapScript::for_user("root");
    let request = LaunchRequest::new(spec(), bootstrap.encode());

    let payload = provider
        .create_payload(&request, "img-1")
        .expect("payload");

    assert!(payload.stopped);
    assert_eq!(payload.name, "pr-42");
    assert_eq!(payload.image, "img-1");
    assert_eq!(payload.security_group, "sg-123");
    assert_eq!(payload.cloud_init.as_deref(), Some(bootstrap.render().as_str()));
    assert_eq!(
        payload.tags,
        vec![String::from("Name=pr-42"), String::from("prbranch=preview")]
    );
}

#[rstest]
fn create_payload_rejects_undecodable_user_data(provider: ScalewayProvider) {
    let request = LaunchRequest::new(spec(), String::from("%%%"));
    assert!(matches!(
        provider.create_payload(&request, "img-1"),
        Err(ScalewayProviderError::Validation(_))
    ));
}

#[rstest]
fn list_params_encode_tags_state_and_ids(provider: ScalewayProvider) {
    let query = InstanceQuery::running_named("pr-42").with_id(Some("srv-1"));
    let params = provider.list_params(&query, 3);

    assert!(params.contains(&("tags", String::from("Name=pr-42"))));
    assert!(params.contains(&("state", String::from("running"))));
    assert!(params.contains(&("servers", String::from("srv-1"))));
    assert!(params.contains(&("project", String::from("proj"))));
    assert!(params.contains(&("page", String::from("3"))));
    assert!(params.contains(&("per_page", String::from("100"))));
}

#[rstest]
fn live_query_lists_every_state(provider: ScalewayProvider) {
    let params = provider.list_params(&InstanceQuery::live_named("pr-42"), 1);

    assert!(params.iter().all(|(key, _)| *key != "state"));
    assert!(params.contains(&("tags", String::from("Name=pr-42"))));
}

#[tokio::test]
async fn listing_follows_pages_until_a_short_one() {
    let mut requested = Vec::new();
    let servers = super::describe::collect_pages(|page| {
        requested.push(page);
        let size = if page < 3 { super::describe::PAGE_SIZE } else { 3 };
        async move { Ok::<_, ScalewayProviderError>(vec![page; size]) }
    })
    .await
    .expect("pages collected");

    assert_eq!(requested, vec![1, 2, 3]);
    assert_eq!(servers.len(), 2 * super::describe::PAGE_SIZE + 3);
    assert_eq!(servers.last(), Some(&3));
}

#[tokio::test]
async fn listing_stops_at_the_first_failed_page() {
    let mut requested = Vec::new();
    let result = super::describe::collect_pages(|page| {
        requested.push(page);
        async move {
            if page == 2 {
                Err(ScalewayProviderError::Provider {
                    message: String::from("rate limited"),
                })
            } else {
                Ok(vec![(); super::describe::PAGE_SIZE])
            }
        }
    })
    .await;

    assert!(matches!(result, Err(ScalewayProviderError::Provider { .. })));
    assert_eq!(requested, vec![1, 2]);
}

#[rstest]
fn server_document_maps_to_descriptor() {
    let descriptor = server(
        r#"{
            "id": "srv-1",
            "state": "running",
            "tags": ["Name=pr-42", "prbranch=preview", "legacy"],
            "public_ip": null,
            "public_ips": [{"address": "51.15.0.10"}],
            "creation_date": "2026-03-01T10:00:00.000000+00:00",
            "allowed_actions": ["poweroff", "terminate"]
        }"#,
    )
    .into_descriptor();

    assert!(descriptor.is_running());
    assert_eq!(descriptor.name(), Some("pr-42"));
    assert_eq!(descriptor.public_address.as_deref(), Some("51.15.0.10"));
    assert_eq!(descriptor.tags.get("legacy").map(String::as_str), Some(""));
    assert!(descriptor.launched_at.is_some());
}

#[rstest]
#[tokio::test]
async fn running_server_needs_no_power_on(provider: ScalewayProvider) {
    let doc = server(r#"{"id": "srv-1", "state": "running"}"#);
    assert!(provider.power_on_if_needed(&doc).await.is_ok());
}

#[rstest]
#[tokio::test]
async fn power_on_requires_the_action_to_be_allowed(provider: ScalewayProvider) {
    let doc = server(r#"{"id": "srv-1", "state": "stopped", "allowed_actions": []}"#);
    assert!(matches!(
        provider.power_on_if_needed(&doc).await,
        Err(ScalewayProviderError::PowerOnNotAllowed { .. })
    ));
}

#[tokio::test]
async fn terminate_continues_past_a_failed_server() {
    let ids = vec![
        String::from("srv-1"),
        String::from("srv-2"),
        String::from("srv-3"),
    ];
    let mut attempted = Vec::new();

    let err = terminate_each(&ids, |id| {
        attempted.push(id.clone());
        async move {
            if id == "srv-2" {
                Err(String::from("api down"))
            } else {
                Ok(())
            }
        }
    })
    .await
    .expect_err("one server failed");

    assert_eq!(attempted, ids);
    assert_eq!(
        err,
        ScalewayProviderError::Terminate {
            instance_ids: vec![String::from("srv-2")],
            message: String::from("srv-2: api down"),
        }
    );
}

#[tokio::test]
async fn terminate_succeeds_when_every_action_succeeds() {
    let ids = vec![String::from("srv-1"), String::from("srv-2")];
    let result = terminate_each(&ids, |_| async { Ok::<_, String>(()) }).await;
    assert!(result.is_ok());
}
