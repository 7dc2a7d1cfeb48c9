//! winmedia - Windows install media preparation on Linux.
//!
//! Turns a Windows installer ISO into bootable media without a Windows host:
//! - converts and splits the install image to fit FAT32
//! - strips components listed in a removal profile
//! - stages third-party drivers for Windows Setup
//! - deploys as a GRUB-chainloaded ISO or onto a FAT32 partition

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use winmedia::config::Config;
use winmedia::error::Error;
use winmedia::pipeline::{BuildRequest, ProvisionRequest};
use winmedia::provision::{Bootloader, Mode};

#[derive(Parser)]
#[command(name = "winmedia")]
#[command(about = "Windows install media builder for Linux hosts")]
#[command(
    after_help = "QUICK START:\n  winmedia preflight                     Check host tools\n  winmedia build --source Win11.iso      Prepare the media tree\n  winmedia provision targets             List eligible devices\n  winmedia provision partition --target /dev/sdX --confirm /dev/sdX\n  winmedia clean                         Release stale mounts"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the media tree from an installer ISO or directory
    Build {
        /// Installer ISO or extracted installer directory
        #[arg(short, long)]
        source: PathBuf,
        /// Removal profile ("no-op" or "vanilla" skip servicing)
        #[arg(short, long, default_value = "no-op")]
        profile: String,
        /// Extra directives appended after the profile
        #[arg(long = "override")]
        override_path: Option<PathBuf>,
        /// Service only this image index (default: all)
        #[arg(long)]
        index: Option<u32>,
        /// Driver source directory (default: WINMEDIA_DRIVERS_DIR)
        #[arg(long)]
        drivers: Option<PathBuf>,
        /// Disable the TPM, Secure Boot, RAM and CPU checks in Setup
        #[arg(long)]
        bypass_requirements: bool,
        /// Index of the Setup image inside boot.wim
        #[arg(long)]
        boot_index: Option<u32>,
        /// Skip preflight checks
        #[arg(long)]
        no_preflight: bool,
    },

    /// Deploy the prepared media
    Provision {
        #[command(subcommand)]
        target: ProvisionTarget,
    },

    /// List removal profiles, or show what one expands to
    Presets {
        /// Profile to expand
        name: Option<String>,
        /// Override file appended to the profile
        #[arg(long = "override")]
        override_path: Option<PathBuf>,
    },

    /// Run preflight checks (verify host tools and free space)
    Preflight {
        /// Installer to size the free space check against
        #[arg(long)]
        source: Option<PathBuf>,
        /// Fail if any checks fail
        #[arg(long)]
        strict: bool,
    },

    /// Release mounts left by an interrupted run
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },
}

#[derive(Subcommand)]
enum ProvisionTarget {
    /// Build an ISO and add a GRUB entry that chainloads it
    Iso,
    /// Wipe a device, create one FAT32 partition and copy the media
    Partition {
        /// Device (e.g. /dev/sdb) or existing directory
        #[arg(short, long)]
        target: PathBuf,
        /// Retype the device path to allow formatting it
        #[arg(long)]
        confirm: Option<String>,
        /// How the media is booted
        #[arg(long, value_enum, default_value_t = BootloaderArg::Firmware)]
        bootloader: BootloaderArg,
    },
    /// List devices eligible for partition mode
    Targets,
}

#[derive(Clone, Copy, ValueEnum)]
enum BootloaderArg {
    /// Add a GRUB entry chainloading the partition
    Chainload,
    /// Pick the media from the firmware boot menu
    Firmware,
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Release stale mounts and scratch directories only
    Stale,
    /// Also remove the work directory
    All,
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show the prepared install image
    Media,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let base_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

    // Load .env if present
    dotenvy::dotenv().ok();
    let config = Config::load(&base_dir);

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            let code = match e.downcast_ref::<Error>() {
                Some(err) => {
                    eprintln!("hint: {}", err.hint());
                    err.exit_code()
                }
                None => 1,
            };
            ExitCode::from(code as u8)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "winmedia=info",
        1 => "winmedia=debug",
        _ => "winmedia=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands, mut config: Config) -> anyhow::Result<()> {
    match command {
        Commands::Build {
            source,
            profile,
            override_path,
            index,
            drivers,
            bypass_requirements,
            boot_index,
            no_preflight,
        } => {
            if let Some(boot_index) = boot_index {
                config.boot_index = boot_index;
            }
            let request = BuildRequest {
                source,
                profile,
                override_path,
                index,
                drivers,
                registry_bypass: bypass_requirements,
            };
            commands::cmd_build(&config, request, no_preflight)?;
        }

        Commands::Provision { target } => {
            let provision_target = match target {
                ProvisionTarget::Iso => commands::provision::ProvisionTarget::Iso,
                ProvisionTarget::Targets => commands::provision::ProvisionTarget::Targets,
                ProvisionTarget::Partition {
                    target,
                    confirm,
                    bootloader,
                } => commands::provision::ProvisionTarget::Partition(ProvisionRequest {
                    mode: Mode::CopyToPartition,
                    target: Some(target),
                    confirmation: confirm,
                    bootloader: match bootloader {
                        BootloaderArg::Chainload => Bootloader::Chainload,
                        BootloaderArg::Firmware => Bootloader::Firmware,
                    },
                }),
            };
            commands::cmd_provision(&config, provision_target)?;
        }

        Commands::Presets {
            name,
            override_path,
        } => {
            commands::cmd_presets(&config, name.as_deref(), override_path.as_deref())?;
        }

        Commands::Preflight { source, strict } => {
            commands::cmd_preflight(&config, source, strict)?;
        }

        Commands::Clean { what } => {
            let clean_target = match what {
                None | Some(CleanTarget::Stale) => commands::clean::CleanTarget::Stale,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(&config, clean_target)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Media => commands::show::ShowTarget::Media,
            };
            commands::cmd_show(&config, show_target)?;
        }
    }

    Ok(())
}
