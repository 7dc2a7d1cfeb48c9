//! Presets command - lists or expands removal profiles.

use anyhow::Result;
use std::path::Path;

use winmedia::config::Config;
use winmedia::preset::{self, PresetResolver};

/// Execute the presets command.
pub fn cmd_presets(config: &Config, name: Option<&str>, override_path: Option<&Path>) -> Result<()> {
    let resolver = PresetResolver::new(&config.presets_dir);

    let Some(name) = name else {
        let names = resolver.list()?;
        println!("Profiles in {}:", config.presets_dir.display());
        for name in &names {
            println!("  {}", name);
        }
        for name in preset::NOOP_PROFILES {
            println!("  {} (built in: skip servicing)", name);
        }
        return Ok(());
    };

    let directives = resolver.resolve(name, override_path)?;
    if preset::is_noop(name) {
        println!("'{}' skips servicing entirely.", name);
        return Ok(());
    }
    println!("Profile '{}' ({} directives):", name, directives.len());
    for directive in &directives {
        println!("  {}", directive);
    }
    Ok(())
}
