//! Configuration loading from the process environment.

use serial_test::serial;
use std::path::{Path, PathBuf};
use winmedia::config::{Config, DEFAULT_BOOT_INDEX, DEFAULT_VOLUME_LABEL};

const VARS: &[&str] = &[
    "WINMEDIA_WORK_DIR",
    "WINMEDIA_PRESETS_DIR",
    "WINMEDIA_VOLUME_LABEL",
    "WINMEDIA_BOOT_INDEX",
];

fn clear() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_load_reads_environment() {
    clear();
    std::env::set_var("WINMEDIA_WORK_DIR", "/var/tmp/winmedia");
    std::env::set_var("WINMEDIA_VOLUME_LABEL", "my usb");
    std::env::set_var("WINMEDIA_BOOT_INDEX", "1");

    let config = Config::load(Path::new("/opt/winmedia"));
    assert_eq!(config.work_dir, PathBuf::from("/var/tmp/winmedia"));
    assert_eq!(config.volume_label, "MYUSB");
    assert_eq!(config.boot_index, 1);
    assert_eq!(config.presets_dir, PathBuf::from("/opt/winmedia/presets"));
    clear();
}

#[test]
#[serial]
fn test_load_defaults_without_environment() {
    clear();
    let config = Config::load(Path::new("/opt/winmedia"));
    assert_eq!(config.volume_label, DEFAULT_VOLUME_LABEL);
    assert_eq!(config.boot_index, DEFAULT_BOOT_INDEX);
    assert_eq!(config.drivers_dir, PathBuf::from("/opt/winmedia/drivers"));
}
