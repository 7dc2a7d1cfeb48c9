//! Resource tracker tests: cleanup after an interrupted run.

mod helpers;

use helpers::{assert_missing, FakeReleaser, TestEnv};
use std::fs;
use winmedia::error::Error;
use winmedia::image::ImageContainer;
use winmedia::preflight::Capabilities;
use winmedia::servicing::{self, ServiceRequest, ServicingSession};
use winmedia::tracker::{sweep_stale, MountKind, ResourceTracker};

#[test]
fn test_interrupted_run_is_swept_by_the_next_one() {
    let env = TestEnv::new();
    let tool = env.image_tool();
    let wim = env.root.join("install.wim");
    tool.create_image(&wim, &["Pro"], 0);
    helpers::create_windows_tree(&tool.index_dir(&wim, 1));
    let container = ImageContainer::open(&tool, &wim).unwrap();
    let mount_point = env.config.work_dir.join("mnt-install");
    let scratch = env.config.work_dir.join("driver-extract");

    // First run dies with a session open and a scratch directory in place.
    let mut crashed = env.tracker(FakeReleaser::default());
    crashed.register_scratch(&scratch).unwrap();
    fs::create_dir_all(scratch.join("pkg")).unwrap();
    let session = ServicingSession::mount(&tool, &mut crashed, &container, 1, &mount_point).unwrap();
    std::mem::forget(session);
    std::mem::forget(crashed);
    assert!(env.config.tracker_state().exists());

    // Second run releases both before doing anything else.
    let releaser = FakeReleaser::default();
    let mut tracker = env.tracker(releaser.clone());
    assert_eq!(releaser.released(), [mount_point.clone()]);
    assert_missing(&scratch);
    assert_missing(&env.config.tracker_state());

    let report = servicing::service(
        &tool,
        &mut tracker,
        &Capabilities::none(),
        &container,
        &ServiceRequest {
            index: 1,
            mount_point,
            directives: &[],
            registry_bypass: false,
        },
    )
    .unwrap();
    assert_eq!(report.removed(), 0);
    assert!(tracker.is_empty());
}

#[test]
fn test_stuck_mount_blocks_open_until_released() {
    let env = TestEnv::new();
    let mount_point = env.config.work_dir.join("mnt-target");

    let mut crashed = env.tracker(FakeReleaser::default());
    crashed.register_mount(&mount_point, MountKind::Device).unwrap();
    std::mem::forget(crashed);

    let stuck = FakeReleaser {
        stuck: Some("mnt-target".to_string()),
        ..FakeReleaser::default()
    };
    let result = ResourceTracker::open(env.config.tracker_state(), Box::new(stuck));
    assert!(matches!(result, Err(Error::ReleaseFailed { .. })));
    assert!(env.config.tracker_state().exists());

    let report = sweep_stale(&env.config.tracker_state(), &FakeReleaser::default()).unwrap();
    assert_eq!(report.released, [mount_point]);
    assert_missing(&env.config.tracker_state());
}

#[test]
fn test_drop_releases_open_resources() {
    let env = TestEnv::new();
    let releaser = FakeReleaser::default();
    let mount_point = env.config.work_dir.join("mnt-boot");
    {
        let mut tracker = env.tracker(releaser.clone());
        tracker.register_mount(&mount_point, MountKind::Image).unwrap();
        assert!(env.config.tracker_state().exists());
    }
    assert_eq!(releaser.released(), [mount_point]);
    assert_missing(&env.config.tracker_state());
}

#[test]
fn test_unreadable_state_file_is_discarded() {
    let env = TestEnv::new();
    fs::create_dir_all(&env.config.work_dir).unwrap();
    fs::write(env.config.tracker_state(), "{not json").unwrap();

    let tracker = env.tracker(FakeReleaser::default());
    assert!(tracker.is_empty());
    assert_missing(&env.config.tracker_state());
}
