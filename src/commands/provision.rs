//! Provision command - deploys the prepared media tree.

use anyhow::Result;

use winmedia::config::Config;
use winmedia::pipeline::{Pipeline, ProvisionRequest, Tools};
use winmedia::preflight::{self, Capabilities, PreflightOptions};

/// Provision target for the provision command.
pub enum ProvisionTarget {
    /// Build an ISO and add a GRUB chainload entry
    Iso,
    /// Write the tree to a device or directory
    Partition(ProvisionRequest),
    /// List eligible devices
    Targets,
}

/// Execute the provision command.
pub fn cmd_provision(config: &Config, target: ProvisionTarget) -> Result<()> {
    let options = PreflightOptions {
        work_dir: config.work_dir.clone(),
        source: None,
        require_root: true,
    };

    match target {
        ProvisionTarget::Targets => {
            let pipeline = Pipeline::open(config.clone(), Tools::system(), Capabilities::none())?;
            let targets = pipeline.targets()?;
            if targets.is_empty() {
                println!("No eligible devices found (the system disk is never listed).");
            } else {
                println!("Eligible devices:");
                for target in &targets {
                    println!("  {}", target.describe());
                }
            }
        }
        ProvisionTarget::Iso => {
            preflight::run_preflight_or_fail(&options)?;
            let mut pipeline = Pipeline::open(config.clone(), Tools::system(), Capabilities::detect())?;
            let outcome = pipeline.provision(&ProvisionRequest {
                mode: winmedia::provision::Mode::ChainloadIso,
                target: None,
                confirmation: None,
                bootloader: winmedia::provision::Bootloader::Chainload,
            })?;
            outcome.print(&config.grub_fragment);
        }
        ProvisionTarget::Partition(request) => {
            preflight::run_preflight_or_fail(&options)?;
            let mut pipeline = Pipeline::open(config.clone(), Tools::system(), Capabilities::detect())?;
            let outcome = pipeline.provision(&request)?;
            outcome.print(&config.grub_fragment);
        }
    }
    Ok(())
}
