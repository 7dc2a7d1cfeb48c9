//! Build command - prepares the media tree.

use anyhow::Result;
use std::time::Instant;

use winmedia::config::Config;
use winmedia::pipeline::{BuildRequest, Pipeline, Tools};
use winmedia::preflight::{self, Capabilities, PreflightOptions};

/// Execute the build command.
pub fn cmd_build(config: &Config, request: BuildRequest, skip_preflight: bool) -> Result<()> {
    println!("=== winmedia build ===\n");
    let build_start = Instant::now();

    if skip_preflight {
        println!("[WARN] Skipping preflight checks\n");
    } else {
        preflight::run_preflight_or_fail(&PreflightOptions {
            work_dir: config.work_dir.clone(),
            source: Some(request.source.clone()),
            require_root: true,
        })?;
    }

    let caps = Capabilities::detect();
    let mut pipeline = Pipeline::open(config.clone(), Tools::system(), caps)?;
    let summary = pipeline.build(&request)?;

    println!();
    summary.print();
    println!(
        "\nBuild finished in {:.1}s. Next: 'winmedia provision iso' or 'winmedia provision partition'.",
        build_start.elapsed().as_secs_f64()
    );
    Ok(())
}
