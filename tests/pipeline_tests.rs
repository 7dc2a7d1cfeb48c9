//! End-to-end pipeline tests with fake tools.

mod helpers;

use helpers::{
    assert_exists, assert_missing, write_archive, FakeDisk, FakeExtractor, FakeImageTool, FakeReleaser, TestEnv,
    LSBLK_JSON,
};
use std::fs;
use winmedia::drivers::STAGING_DIR;
use winmedia::error::Error;
use winmedia::pipeline::{BuildRequest, Pipeline, ProvisionRequest, Tools};
use winmedia::preflight::Capabilities;
use winmedia::provision::{Bootloader, Mode};

fn tools(image: &FakeImageTool, disk: &FakeDisk) -> Tools {
    Tools {
        image: Box::new(image.clone()),
        extractor: Box::new(FakeExtractor::default()),
        disk: Box::new(disk.clone()),
        releaser: Box::new(FakeReleaser::default()),
    }
}

fn request(env: &TestEnv, profile: &str) -> BuildRequest {
    BuildRequest {
        source: env.root.join("source"),
        profile: profile.to_string(),
        override_path: None,
        index: None,
        drivers: Some(env.root.join("drivers")),
        registry_bypass: false,
    }
}

#[test]
fn test_build_services_every_index_and_stages_drivers() {
    let env = TestEnv::new();
    let image = env.image_tool();
    let disk = FakeDisk::new(LSBLK_JSON, &env.root.join("device"));
    let source = env.create_source_tree(&image, "install.wim", 0);
    env.write_preset("lite", "PATH:sources/ei.cfg\nXbox\n");
    write_archive(&env.root.join("drivers/nic.zip"), &["nic/e1d.inf"]);

    let mut pipeline = Pipeline::open(env.config.clone(), tools(&image, &disk), Capabilities::all()).unwrap();
    let summary = pipeline.build(&request(&env, "lite")).unwrap();

    let media = env.config.media_dir();
    assert_eq!(summary.media_dir, media);
    assert_eq!(summary.media_removals.len(), 1);
    assert_eq!(summary.media_removals[0].removed, 1);
    assert_missing(&media.join("sources/ei.cfg"));
    assert_eq!(summary.servicing.len(), 2);
    assert!(summary.servicing.iter().all(|r| r.removed() == 2));
    assert_eq!(summary.injection.driver_sets.len(), 1);
    assert!(summary.injection.boot_image_updated);
    assert_exists(&media.join(STAGING_DIR).join("DriverSet1/e1d.inf"));
    assert_eq!(summary.install_image.parts, [media.join("sources/install.wim")]);

    // The source tree is never edited.
    assert_exists(&source.join("sources/ei.cfg"));
    assert!(pipeline.tracker().is_empty());
    assert_eq!(image.open_mounts(), 0);
}

#[test]
fn test_shipped_minimal_profile_trims_installer_files() {
    let env = TestEnv::new();
    let image = env.image_tool();
    let disk = FakeDisk::new(LSBLK_JSON, &env.root.join("device"));
    let source = env.create_source_tree(&image, "install.wim", 0);
    fs::write(source.join("setup.exe.config"), "<configuration/>").unwrap();
    let shipped = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("presets/minimal.preset");
    env.write_preset("minimal", &fs::read_to_string(shipped).unwrap());

    let mut pipeline = Pipeline::open(env.config.clone(), tools(&image, &disk), Capabilities::none()).unwrap();
    let summary = pipeline.build(&request(&env, "minimal")).unwrap();

    let media = env.config.media_dir();
    let removed: usize = summary.media_removals.iter().map(|o| o.removed).sum();
    assert_eq!(removed, 3);
    assert_missing(&media.join("sources/ei.cfg"));
    assert_missing(&media.join("autorun.inf"));
    assert_missing(&media.join("setup.exe.config"));
    assert_exists(&media.join("setup.exe"));

    // Only explicit paths: the install image is never mounted.
    assert!(summary.servicing.is_empty());
    assert!(!image.calls().iter().any(|c| c.starts_with("mount") && c.contains("install")));
}

#[test]
fn test_esd_source_is_converted_before_servicing() {
    let env = TestEnv::new();
    let image = env.image_tool();
    let disk = FakeDisk::new(LSBLK_JSON, &env.root.join("device"));
    env.create_source_tree(&image, "install.esd", 0);
    env.write_preset("tiny", "Zune\n");

    let mut pipeline = Pipeline::open(env.config.clone(), tools(&image, &disk), Capabilities::none()).unwrap();
    let mut req = request(&env, "tiny");
    req.index = Some(2);
    let summary = pipeline.build(&req).unwrap();

    let media = env.config.media_dir();
    assert_missing(&media.join("sources/install.esd"));
    assert_eq!(summary.install_image.path, media.join("sources/install.wim"));
    assert_eq!(summary.servicing.len(), 1);
    assert_eq!(summary.servicing[0].index, 2);
    let calls = image.calls();
    assert_eq!(calls[0], "export install.esd install.wim");
    assert_eq!(calls[1], "mount install.wim 2");
}

#[test]
fn test_noop_profile_skips_servicing() {
    let env = TestEnv::new();
    let image = env.image_tool();
    let disk = FakeDisk::new(LSBLK_JSON, &env.root.join("device"));
    env.create_source_tree(&image, "install.wim", 0);

    let mut pipeline = Pipeline::open(env.config.clone(), tools(&image, &disk), Capabilities::all()).unwrap();
    let mut req = request(&env, "vanilla");
    req.registry_bypass = true;
    let summary = pipeline.build(&req).unwrap();

    assert!(summary.servicing.is_empty());
    assert!(!summary.injection.boot_image_updated);
    assert!(image.calls().is_empty());
    assert_exists(&env.config.media_dir().join("sources/ei.cfg"));
}

#[test]
fn test_unknown_profile_fails_before_copying() {
    let env = TestEnv::new();
    let image = env.image_tool();
    let disk = FakeDisk::new(LSBLK_JSON, &env.root.join("device"));
    env.create_source_tree(&image, "install.wim", 0);

    let mut pipeline = Pipeline::open(env.config.clone(), tools(&image, &disk), Capabilities::all()).unwrap();
    let result = pipeline.build(&request(&env, "ghost"));
    assert!(matches!(result, Err(Error::ProfileNotFound { .. })));
    assert_missing(&env.config.media_dir());
}

#[test]
fn test_failed_commit_aborts_with_nothing_mounted() {
    let env = TestEnv::new();
    let image = env.image_tool();
    let disk = FakeDisk::new(LSBLK_JSON, &env.root.join("device"));
    env.create_source_tree(&image, "install.wim", 0);
    env.write_preset("lite", "Xbox\n");
    image.fail_commit();

    {
        let mut pipeline =
            Pipeline::open(env.config.clone(), tools(&image, &disk), Capabilities::all()).unwrap();
        let result = pipeline.build(&request(&env, "lite"));
        assert!(matches!(result, Err(Error::CommitFailed { .. })));
    }
    assert_eq!(image.open_mounts(), 0);
    assert_missing(&env.config.tracker_state());
}

#[test]
fn test_provision_requires_prepared_media() {
    let env = TestEnv::new();
    let image = env.image_tool();
    let disk = FakeDisk::new(LSBLK_JSON, &env.root.join("device"));

    let mut pipeline = Pipeline::open(env.config.clone(), tools(&image, &disk), Capabilities::all()).unwrap();
    let result = pipeline.provision(&ProvisionRequest {
        mode: Mode::CopyToPartition,
        target: Some("/dev/sdb".into()),
        confirmation: Some("/dev/sdb".to_string()),
        bootloader: Bootloader::Firmware,
    });
    assert!(matches!(result, Err(Error::SourceImage(_))));
    assert!(disk.calls().is_empty());
}

#[test]
fn test_build_then_provision_to_device() {
    let env = TestEnv::new();
    let image = env.image_tool();
    let device_root = env.root.join("device");
    let disk = FakeDisk::new(LSBLK_JSON, &device_root);
    env.create_source_tree(&image, "install.wim", 0);

    let mut pipeline = Pipeline::open(env.config.clone(), tools(&image, &disk), Capabilities::all()).unwrap();
    pipeline.build(&request(&env, "no-op")).unwrap();
    let outcome = pipeline
        .provision(&ProvisionRequest {
            mode: Mode::CopyToPartition,
            target: Some("/dev/sdb".into()),
            confirmation: Some("/dev/sdb".to_string()),
            bootloader: Bootloader::Chainload,
        })
        .unwrap();

    assert_eq!(outcome.destination, std::path::PathBuf::from("/dev/sdb"));
    assert_exists(&device_root.join("sources/install.wim"));
    assert_exists(&device_root.join("setup.exe"));
    assert!(fs::read_to_string(&env.config.grub_fragment)
        .unwrap()
        .contains("--label WININSTALL"));
}
