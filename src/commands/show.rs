//! Show command - displays information.

use anyhow::Result;

use winmedia::config::Config;
use winmedia::image::{self, ImageContainer, WimlibTool};
use winmedia::preflight::Capabilities;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the prepared install image
    Media,
}

/// Execute the show command.
pub fn cmd_show(config: &Config, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
            println!();
            let caps = Capabilities::detect();
            println!("Optional tools:");
            for (tool, _, purpose) in winmedia::preflight::OPTIONAL_TOOLS {
                let state = if caps.has(tool) { "found" } else { "missing" };
                println!("  {:<13} {:<8} {}", tool, state, purpose);
            }
        }
        ShowTarget::Media => {
            let media_dir = config.media_dir();
            let Ok(path) = image::locate_install_image(&media_dir) else {
                anyhow::bail!("No prepared media in {}. Run 'winmedia build' first.", media_dir.display());
            };
            let container = ImageContainer::open(&WimlibTool, &path)?;
            println!(
                "Install image: {} ({:?}, {} MiB on disk)",
                path.display(),
                container.format,
                container.size_on_disk() / image::MIB
            );
            for part in &container.parts {
                println!("  part: {}", part.display());
            }
            for info in &container.indices {
                println!("  [{}] {} ({} MiB)", info.index, info.name, info.total_bytes / image::MIB);
            }
        }
    }
    Ok(())
}
