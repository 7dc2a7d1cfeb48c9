//! Preflight command - runs preflight checks.

use anyhow::Result;
use std::path::PathBuf;

use winmedia::config::Config;
use winmedia::preflight::{self, PreflightOptions};

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, source: Option<PathBuf>, strict: bool) -> Result<()> {
    let options = PreflightOptions {
        work_dir: config.work_dir.clone(),
        source,
        require_root: strict,
    };
    if strict {
        preflight::run_preflight_or_fail(&options)?;
    } else {
        let report = preflight::run_preflight(&options);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to fail with an error.");
        }
    }
    Ok(())
}
