//! Hardware-requirement bypass written into the offline SYSTEM hive.

use std::fs;
use std::path::{Path, PathBuf};

use crate::common::files::resolve_ignore_case;
use crate::preflight::Capabilities;
use crate::process::Cmd;

/// Location of the SYSTEM hive inside a mounted Windows tree.
pub const SYSTEM_HIVE: &str = "Windows/System32/config/SYSTEM";

const HIVE_PREFIX: &str = "HKEY_LOCAL_MACHINE\\SYSTEM";

const LAB_CONFIG_VALUES: &[&str] = &[
    "BypassTPMCheck",
    "BypassSecureBootCheck",
    "BypassRAMCheck",
    "BypassStorageCheck",
    "BypassCPUCheck",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOutcome {
    NotRequested,
    Applied,
    /// The mounted index has no SYSTEM hive.
    NoHive,
    ToolMissing,
    Failed(String),
}

impl RegistryOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, RegistryOutcome::ToolMissing | RegistryOutcome::Failed(_))
    }
}

/// `.reg` text consumed by `hivexregedit --merge`.
pub fn bypass_reg() -> String {
    let mut reg = String::from("Windows Registry Editor Version 5.00\n\n");
    reg.push_str(&format!("[{}\\Setup\\LabConfig]\n", HIVE_PREFIX));
    for value in LAB_CONFIG_VALUES {
        reg.push_str(&format!("\"{}\"=dword:00000001\n", value));
    }
    reg.push_str(&format!("\n[{}\\Setup\\MoSetup]\n", HIVE_PREFIX));
    reg.push_str("\"AllowUpgradesWithUnsupportedTPMOrCPU\"=dword:00000001\n");
    reg
}

/// Merge the bypass keys into the mounted tree's SYSTEM hive. Never fails the
/// session: every problem is reported through the outcome.
pub fn apply_bypass(root: &Path, caps: &Capabilities) -> RegistryOutcome {
    let Some(hive) = resolve_ignore_case(root, Path::new(SYSTEM_HIVE)) else {
        tracing::info!("no SYSTEM hive in mounted image, registry bypass skipped");
        return RegistryOutcome::NoHive;
    };
    if !caps.hivexregedit {
        tracing::warn!("hivexregedit not installed, registry bypass skipped");
        return RegistryOutcome::ToolMissing;
    }

    match merge(&hive) {
        Ok(()) => {
            tracing::info!(hive = %hive.display(), "registry bypass applied");
            RegistryOutcome::Applied
        }
        Err(e) => {
            tracing::warn!("registry bypass failed: {:#}", e);
            RegistryOutcome::Failed(format!("{:#}", e))
        }
    }
}

fn merge(hive: &Path) -> anyhow::Result<()> {
    let reg_file = reg_file_path();
    fs::write(&reg_file, bypass_reg())?;
    let result = Cmd::new("hivexregedit")
        .arg("--merge")
        .arg("--prefix")
        .arg(HIVE_PREFIX)
        .arg_path(hive)
        .arg_path(&reg_file)
        .error_msg("hivexregedit --merge failed")
        .run();
    let _ = fs::remove_file(&reg_file);
    result.map(|_| ())
}

fn reg_file_path() -> PathBuf {
    std::env::temp_dir().join(format!("winmedia-bypass-{}.reg", std::process::id()))
}
