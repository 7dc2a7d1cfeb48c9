//! Environment checks: privileges, work directory, disk space.

use std::fs;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

use super::types::{CheckResult, FailureCause};

/// Bytes of free space needed per byte of source image: extracted tree,
/// converted image and split parts can coexist.
pub const SPACE_FACTOR_NUM: u64 = 5;
pub const SPACE_FACTOR_DEN: u64 = 2;

/// Mounting images and formatting devices need root.
pub fn check_privileges(required: bool) -> CheckResult {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        CheckResult::pass_with("root privileges", "running as root")
    } else if required {
        CheckResult::fail("root privileges", &format!("running as uid {}; mounting needs root", euid))
            .with_cause(FailureCause::PermissionDenied)
    } else {
        CheckResult::warn("root privileges", &format!("running as uid {}", euid))
    }
}

/// The work directory must exist (or be creatable) and be writable.
pub fn check_work_dir(work_dir: &Path) -> CheckResult {
    let name = "work directory writable";
    if let Err(e) = fs::create_dir_all(work_dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", work_dir.display(), e))
            .with_cause(FailureCause::PermissionDenied);
    }
    let probe = work_dir.join(".preflight-test");
    match fs::write(&probe, "test") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            CheckResult::pass_with(name, &work_dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", work_dir.display(), e))
            .with_cause(FailureCause::PermissionDenied),
    }
}

/// Compare free space in `work_dir` with what a source of `source_size`
/// bytes needs.
pub fn check_free_space(work_dir: &Path, source_size: Option<u64>) -> CheckResult {
    let name = "free space";
    let Some(available) = free_space(work_dir) else {
        return CheckResult::warn(name, "Could not determine free space (df failed)");
    };
    let free_gb = available as f64 / (1024.0 * 1024.0 * 1024.0);

    let Some(source_size) = source_size else {
        return CheckResult::pass_with(name, &format!("{:.1} GiB available", free_gb));
    };
    let needed = space_needed(source_size);
    if available < needed {
        CheckResult::fail(
            name,
            &format!(
                "{:.1} GiB available, {:.1} GiB needed",
                free_gb,
                needed as f64 / (1024.0 * 1024.0 * 1024.0)
            ),
        )
        .with_cause(FailureCause::InsufficientSpace {
            path: work_dir.to_path_buf(),
            needed,
            available,
        })
    } else {
        CheckResult::pass_with(name, &format!("{:.1} GiB available", free_gb))
    }
}

pub fn space_needed(source_size: u64) -> u64 {
    source_size / SPACE_FACTOR_DEN * SPACE_FACTOR_NUM
}

/// Free bytes on the filesystem holding `path` (or its nearest existing
/// ancestor), as reported by `df`.
pub fn free_space(path: &Path) -> Option<u64> {
    let existing = nearest_existing(path)?;
    let result = Cmd::new("df")
        .args(["--output=avail", "-B1"])
        .arg_path(&existing)
        .allow_fail()
        .run()
        .ok()?;
    if !result.success() {
        return None;
    }
    // Skip header line
    result.stdout.lines().nth(1)?.trim().parse().ok()
}

fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors().find(|p| p.exists()).map(Path::to_path_buf)
}
