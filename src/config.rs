//! Configuration management for winmedia.
//!
//! Values come from the process environment (after `.env` has been loaded
//! by `dotenvy` in `main`). CLI flags override these per invocation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::image::SplitPolicy;

pub const DEFAULT_GRUB_FRAGMENT: &str = "/etc/grub.d/42_winmedia";
pub const DEFAULT_ISO_DEST: &str = "/winmedia/windows.iso";
pub const DEFAULT_VOLUME_LABEL: &str = "WININSTALL";
pub const DEFAULT_SPLIT_MARGIN_MIB: u64 = 256;
pub const DEFAULT_BOOT_INDEX: u32 = 2;

/// FAT volume labels are at most 11 characters.
const FAT_LABEL_MAX: usize = 11;

#[derive(Debug, Clone)]
pub struct Config {
    /// Scratch area: extracted media tree, mount points, tracker state.
    pub work_dir: PathBuf,
    /// Directory holding `<name>.preset` removal profiles.
    pub presets_dir: PathBuf,
    /// Default driver source directory.
    pub drivers_dir: PathBuf,
    /// GRUB fragment receiving chainload menu entries.
    pub grub_fragment: PathBuf,
    /// Where chainloadISO mode places the finished ISO.
    pub iso_dest: PathBuf,
    /// FAT32 volume label written by copyToPartition.
    pub volume_label: String,
    /// Safety margin below the FAT32 file-size ceiling for split parts.
    pub split_margin_mib: u64,
    /// Index of the Windows Setup image inside boot.wim.
    pub boot_index: u32,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load(base_dir: &Path) -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(base_dir, &vars)
    }

    /// Build configuration from an explicit variable map.
    pub fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Self {
        let path_var = |key: &str, default: PathBuf| {
            vars.get(key)
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    let path = PathBuf::from(s.trim());
                    if path.is_absolute() {
                        path
                    } else {
                        base_dir.join(path)
                    }
                })
                .unwrap_or(default)
        };

        let default_work = dirs::cache_dir()
            .map(|d| d.join("winmedia"))
            .unwrap_or_else(|| base_dir.join("work"));

        let volume_label = vars
            .get("WINMEDIA_VOLUME_LABEL")
            .map(|s| normalize_label(s))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_VOLUME_LABEL.to_string());

        let split_margin_mib = vars
            .get("WINMEDIA_SPLIT_MARGIN_MIB")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_SPLIT_MARGIN_MIB);

        let boot_index = vars
            .get("WINMEDIA_BOOT_INDEX")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|i| *i > 0)
            .unwrap_or(DEFAULT_BOOT_INDEX);

        Self {
            work_dir: path_var("WINMEDIA_WORK_DIR", default_work),
            presets_dir: path_var("WINMEDIA_PRESETS_DIR", base_dir.join("presets")),
            drivers_dir: path_var("WINMEDIA_DRIVERS_DIR", base_dir.join("drivers")),
            grub_fragment: path_var("WINMEDIA_GRUB_FRAGMENT", PathBuf::from(DEFAULT_GRUB_FRAGMENT)),
            iso_dest: path_var("WINMEDIA_ISO_DEST", PathBuf::from(DEFAULT_ISO_DEST)),
            volume_label,
            split_margin_mib,
            boot_index,
        }
    }

    /// Extracted installer tree.
    pub fn media_dir(&self) -> PathBuf {
        self.work_dir.join("media")
    }

    /// Persisted tracker registry.
    pub fn tracker_state(&self) -> PathBuf {
        self.work_dir.join(".resources.json")
    }

    pub fn split_policy(&self) -> SplitPolicy {
        SplitPolicy::fat32(self.split_margin_mib)
    }

    pub fn print(&self) {
        println!("Configuration:");
        println!("  WINMEDIA_WORK_DIR:         {}", self.work_dir.display());
        println!("  WINMEDIA_PRESETS_DIR:      {}", self.presets_dir.display());
        println!("  WINMEDIA_DRIVERS_DIR:      {}", self.drivers_dir.display());
        println!("  WINMEDIA_GRUB_FRAGMENT:    {}", self.grub_fragment.display());
        println!("  WINMEDIA_ISO_DEST:         {}", self.iso_dest.display());
        println!("  WINMEDIA_VOLUME_LABEL:     {}", self.volume_label);
        println!("  WINMEDIA_SPLIT_MARGIN_MIB: {}", self.split_margin_mib);
        println!("  WINMEDIA_BOOT_INDEX:       {}", self.boot_index);
        if self.presets_dir.is_dir() {
            println!("  Presets: FOUND");
        } else {
            println!("  Presets: NOT FOUND");
        }
    }
}

/// Uppercase, drop characters FAT rejects, clamp to 11 characters.
pub fn normalize_label(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .map(|c| c.to_ascii_uppercase())
        .take(FAT_LABEL_MAX)
        .collect()
}
