//! Behavioural tests walking a preview through deploy, redeploy and sweep.
//!
//! The scenarios drive the public API against the scripted provider, runner
//! and status source from `prbranch::test_support`.

#[path = "common/test_constants.rs"]
mod test_constants;

use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::Utc;
use prbranch::lifecycle::LifecycleError;
use prbranch::provider::InstanceStateName;
use prbranch::sweep::KeepReason;
use prbranch::test_support::{FakeProvider, ScriptedRunner, ScriptedStatusSource};
use prbranch::{
    Collector, DeploymentDriver, DeploymentUnit, IdentityFile, InstanceManager, LaunchSpec,
    ManagerSettings, NameLeases, PollSettings, PrStatus, RemoteLayout, terminate_instances,
};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use test_constants::{DEFAULT_INSTANCE_TYPE, PREVIEW_NAME};

struct World {
    _dir: TempDir,
    provider: FakeProvider,
    runner: ScriptedRunner,
    leases: NameLeases,
    unit: DeploymentUnit,
    driver: DeploymentDriver<FakeProvider, ScriptedRunner>,
}

#[fixture]
fn world() -> World {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    let script = root.join("upload.sh");
    std::fs::write(&script, "#!/bin/sh\n").unwrap_or_else(|err| panic!("write script: {err}"));
    let artifact = root.join("app.tar");
    std::fs::write(&artifact, "image").unwrap_or_else(|err| panic!("write artifact: {err}"));

    let provider = FakeProvider::new();
    let runner = ScriptedRunner::new();
    let leases = NameLeases::new();
    let quick = PollSettings {
        interval: Duration::from_millis(5),
        max_attempts: 3,
    };
    let settings = ManagerSettings {
        running_poll: quick,
        marker_poll: quick,
        ..ManagerSettings::default()
    };
    let identity = IdentityFile::from_key_material_in(&root, "preview-key")
        .unwrap_or_else(|err| panic!("identity: {err}"));
    let manager = InstanceManager::new(provider.clone(), runner.clone(), identity, settings)
        .with_leases(leases.clone());

    World {
        _dir: dir,
        provider,
        runner,
        leases,
        unit: DeploymentUnit {
            artifact,
            startup_script: script,
            image_tag: String::from("app:42"),
        },
        driver: DeploymentDriver::new(manager, RemoteLayout::default()),
    }
}

fn spec() -> LaunchSpec {
    LaunchSpec::builder()
        .name(PREVIEW_NAME)
        .instance_type(DEFAULT_INSTANCE_TYPE)
        .image("Ubuntu 24.04 Noble Numbat")
        .security_group_id("sg-preview")
        .key_name("prbranch")
        .build()
        .unwrap_or_else(|err| panic!("valid spec: {err}"))
}

fn script_fresh_deploy(runner: &ScriptedRunner) {
    runner.push_success(); // readiness marker
    runner.push_output(Some(0), "", ""); // container list
    runner.push_success(); // copy artifact
    runner.push_success(); // copy script
    runner.push_success(); // start
}

fn remote_commands(runner: &ScriptedRunner) -> Vec<String> {
    runner
        .invocations()
        .iter()
        .filter(|call| call.program == "ssh")
        .filter_map(|call| call.last_arg())
        .collect()
}

#[rstest]
#[tokio::test]
async fn redeploying_reuses_the_instance_and_replaces_the_workload(mut world: World) {
    script_fresh_deploy(&world.runner);
    let first = world
        .driver
        .deploy(&spec(), &world.unit)
        .await
        .unwrap_or_else(|err| panic!("first deploy: {err}"));
    assert!(!first.reused);
    assert_eq!(first.live_url, "http://203.0.113.1:3000");

    world.runner.push_output(Some(0), "abc123\n", ""); // container list on reuse
    world.runner.push_success(); // stop
    world.runner.push_success(); // rm
    world.runner.push_success(); // prune
    script_fresh_deploy(&world.runner);
    let second = world
        .driver
        .deploy(&spec(), &world.unit)
        .await
        .unwrap_or_else(|err| panic!("second deploy: {err}"));

    assert!(second.reused);
    assert_eq!(second.instance_id, first.instance_id);
    assert_eq!(world.provider.run_requests().len(), 1);
    assert_eq!(
        world.provider.running_ids_named(PREVIEW_NAME),
        vec![first.instance_id.clone()]
    );
    let commands = remote_commands(&world.runner);
    let stop = commands
        .iter()
        .position(|cmd| cmd == "docker stop abc123")
        .unwrap_or_else(|| panic!("stop issued: {commands:?}"));
    let start = commands
        .iter()
        .rposition(|cmd| cmd.contains("sh upload.sh -a /etc/prbranch/app -g app:42"))
        .unwrap_or_else(|| panic!("start issued: {commands:?}"));
    assert!(stop < start, "old workload stops before the new one starts");
    assert_eq!(world.runner.pending_responses(), 0);
}

#[rstest]
#[tokio::test]
async fn merged_pull_request_preview_is_swept(mut world: World) {
    script_fresh_deploy(&world.runner);
    let report = world
        .driver
        .deploy(&spec(), &world.unit)
        .await
        .unwrap_or_else(|err| panic!("deploy: {err}"));

    let statuses = ScriptedStatusSource::new().with_status(42, PrStatus::Merged);
    let later = Utc::now() + chrono::Duration::hours(1);
    let sweep = Collector::new(&world.provider, &statuses)
        .with_leases(world.leases.clone())
        .sweep_at(later)
        .await
        .unwrap_or_else(|err| panic!("sweep: {err}"));

    assert_eq!(sweep.terminated, vec![report.instance_id.clone()]);
    assert_eq!(
        world.provider.state_of(&report.instance_id),
        Some(InstanceStateName::Terminated)
    );
    assert!(world.provider.running_ids_named(PREVIEW_NAME).is_empty());
}

#[rstest]
#[tokio::test]
async fn sweep_spares_a_preview_whose_name_is_leased(mut world: World) {
    script_fresh_deploy(&world.runner);
    world
        .driver
        .deploy(&spec(), &world.unit)
        .await
        .unwrap_or_else(|err| panic!("deploy: {err}"));

    let _held = world.leases.acquire(PREVIEW_NAME).await;
    let statuses = ScriptedStatusSource::new().with_status(42, PrStatus::Closed);
    let later = Utc::now() + chrono::Duration::hours(1);
    let sweep = Collector::new(&world.provider, &statuses)
        .with_leases(world.leases.clone())
        .sweep_at(later)
        .await
        .unwrap_or_else(|err| panic!("sweep: {err}"));

    assert!(sweep.terminated.is_empty());
    assert_eq!(
        sweep.kept.first().map(|kept| kept.reason.clone()),
        Some(KeepReason::Deploying)
    );
    assert!(statuses.queried().is_empty());
}

#[rstest]
#[tokio::test]
async fn fresh_preview_survives_sweep_within_grace_period(mut world: World) {
    script_fresh_deploy(&world.runner);
    world
        .driver
        .deploy(&spec(), &world.unit)
        .await
        .unwrap_or_else(|err| panic!("deploy: {err}"));

    let statuses = ScriptedStatusSource::new().with_status(42, PrStatus::Closed);
    let sweep = Collector::new(&world.provider, &statuses)
        .sweep()
        .await
        .unwrap_or_else(|err| panic!("sweep: {err}"));

    assert!(sweep.terminated.is_empty());
    assert_eq!(
        sweep.kept.first().map(|kept| kept.reason.clone()),
        Some(KeepReason::WithinGracePeriod)
    );
}

#[rstest]
#[tokio::test]
async fn destroy_terminates_the_owned_instance(mut world: World) {
    script_fresh_deploy(&world.runner);
    let report = world
        .driver
        .deploy(&spec(), &world.unit)
        .await
        .unwrap_or_else(|err| panic!("deploy: {err}"));

    let destroyed = world
        .driver
        .into_manager()
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("destroy: {err}"));

    assert_eq!(destroyed, Some(report.instance_id.clone()));
    assert_eq!(
        world.provider.terminate_calls(),
        vec![vec![report.instance_id]]
    );
}

#[rstest]
#[case::absent(None)]
#[case::empty(Some(Vec::new()))]
#[case::blank(Some(vec![String::from(" ")]))]
#[tokio::test]
async fn terminate_rejects_missing_ids_without_calling_the_provider(
    #[case] ids: Option<Vec<String>>,
) {
    let provider = FakeProvider::new();

    let err = terminate_instances(&provider, ids.into_iter().flatten())
        .await
        .expect_err("invalid ids");

    assert!(matches!(err, LifecycleError::InvalidArgument(_)));
    assert!(provider.terminate_calls().is_empty());
}
