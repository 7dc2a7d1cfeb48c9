//! Preflight checks.
//!
//! Validates host tools, privileges and disk space before anything is
//! extracted or mounted. Run with `winmedia preflight` to check everything
//! is ready.

mod capabilities;
mod environment;
mod host_tools;
mod types;

use std::path::PathBuf;

use crate::common::files::tree_size;
use crate::error::{Error, Result};

pub use capabilities::Capabilities;
pub use environment::{free_space, space_needed};
pub use host_tools::{OPTIONAL_TOOLS, REQUIRED_TOOLS};
pub use types::{CheckResult, CheckStatus, FailureCause, PreflightReport};

#[derive(Debug, Clone)]
pub struct PreflightOptions {
    pub work_dir: PathBuf,
    /// Source installer, used to size the space check.
    pub source: Option<PathBuf>,
    pub require_root: bool,
}

/// Run all preflight checks.
pub fn run_preflight(options: &PreflightOptions) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools());

    println!("Checking environment...");
    checks.push(environment::check_privileges(options.require_root));
    checks.push(environment::check_work_dir(&options.work_dir));

    let source_size = options.source.as_deref().map(tree_size);
    checks.push(environment::check_free_space(&options.work_dir, source_size));

    println!();

    PreflightReport { checks }
}

/// Run preflight and fail with the first failed check's typed error.
pub fn run_preflight_or_fail(options: &PreflightOptions) -> Result<()> {
    let report = run_preflight(options);
    report.print();

    if let Some(failed) = report.failures().next() {
        return Err(failure_error(failed, report.fail_count()));
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

fn failure_error(check: &CheckResult, total: usize) -> Error {
    match &check.cause {
        Some(FailureCause::MissingTool { tool, package }) => Error::MissingTool {
            tool: tool.clone(),
            package: package.clone(),
        },
        Some(FailureCause::InsufficientSpace {
            path,
            needed,
            available,
        }) => Error::InsufficientSpace {
            path: path.clone(),
            needed: *needed,
            available: *available,
        },
        Some(FailureCause::PermissionDenied) => {
            Error::PermissionDenied(check.details.clone().unwrap_or_else(|| check.name.clone()))
        }
        None => Error::Preflight(format!("{} check(s) failed", total)),
    }
}
