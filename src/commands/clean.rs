//! Clean command - releases stale resources and removes the work directory.

use anyhow::Result;

use winmedia::common::cleanup_work_dir;
use winmedia::config::Config;
use winmedia::error::Error;
use winmedia::tracker::{sweep_stale, SystemReleaser};

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Release mounts and scratch directories left by an aborted run (default)
    Stale,
    /// Release stale resources, then remove the whole work directory
    All,
}

/// Execute the clean command.
pub fn cmd_clean(config: &Config, target: CleanTarget) -> Result<()> {
    let state = config.tracker_state();
    println!("Releasing resources recorded in {}...", state.display());
    let report = sweep_stale(&state, &SystemReleaser)?;
    for path in &report.released {
        println!("  Released {}", path.display());
    }
    for (path, reason) in &report.failed {
        println!("  [FAIL] {}: {}", path.display(), reason);
    }
    if let Some((path, reason)) = report.failed.first() {
        return Err(Error::ReleaseFailed {
            path: path.clone(),
            reason: reason.clone(),
        }
        .into());
    }
    if report.released.is_empty() {
        println!("  Nothing to release.");
    }

    match target {
        CleanTarget::Stale => {}
        CleanTarget::All => {
            if config.work_dir.exists() {
                println!("Removing {}...", config.work_dir.display());
                cleanup_work_dir(&config.work_dir);
                if config.work_dir.exists() {
                    anyhow::bail!("Could not remove {}", config.work_dir.display());
                }
            }
        }
    }
    println!("Clean complete.");
    Ok(())
}
