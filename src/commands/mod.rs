//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Prepare the media tree
//! - `provision` - Deploy prepared media (ISO chainload or partition copy)
//! - `presets` - List or expand removal profiles
//! - `preflight` - Run preflight checks
//! - `clean` - Release stale mounts, remove the work directory
//! - `show` - Display information

pub mod build;
pub mod clean;
mod preflight;
mod presets;
pub mod provision;
pub mod show;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use preflight::cmd_preflight;
pub use presets::cmd_presets;
pub use provision::cmd_provision;
pub use show::cmd_show;
