//! One invocation of the media pipeline.
//!
//! A [`Pipeline`] owns the resource tracker for the whole run. Stages run in
//! a fixed order: working copy, conversion, servicing, driver injection,
//! splitting, and (separately) provisioning. Dropping the pipeline releases
//! whatever an aborted stage left mounted.

use std::path::PathBuf;

use crate::config::Config;
use crate::drivers::{ArchiveExtractor, DriverInjector, InjectionReport, SystemExtractor};
use crate::error::{Error, Result};
use crate::image::{self, ImageContainer, ImageConverter, ImageTool, WimlibTool};
use crate::media;
use crate::preflight::Capabilities;
use crate::preset::{self, PresetResolver, RemovalDirective};
use crate::provision::{Bootloader, DiskTool, MediaTarget, Mode, ProvisionOutcome, Provisioner, SystemDisk};
use crate::servicing::{self, RemovalOutcome, ServiceRequest, ServicingReport};
use crate::timing::Timer;
use crate::tracker::{MountReleaser, ResourceTracker, SystemReleaser};

/// External tool implementations used by a run.
pub struct Tools {
    pub image: Box<dyn ImageTool>,
    pub extractor: Box<dyn ArchiveExtractor>,
    pub disk: Box<dyn DiskTool>,
    pub releaser: Box<dyn MountReleaser>,
}

impl Tools {
    /// The real host tools.
    pub fn system() -> Self {
        Self {
            image: Box::new(WimlibTool),
            extractor: Box::new(SystemExtractor),
            disk: Box::new(SystemDisk),
            releaser: Box::new(SystemReleaser),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Installer ISO or extracted installer directory.
    pub source: PathBuf,
    pub profile: String,
    pub override_path: Option<PathBuf>,
    /// Service only this index; all indices when unset.
    pub index: Option<u32>,
    /// Driver source directory; the configured default when unset.
    pub drivers: Option<PathBuf>,
    pub registry_bypass: bool,
}

#[derive(Debug)]
pub struct BuildSummary {
    pub media_dir: PathBuf,
    pub install_image: ImageContainer,
    /// Explicit paths removed from the media tree.
    pub media_removals: Vec<RemovalOutcome>,
    pub servicing: Vec<ServicingReport>,
    pub injection: InjectionReport,
}

impl BuildSummary {
    pub fn print(&self) {
        println!("=== Build Summary ===");
        println!("  Media tree: {}", self.media_dir.display());
        for part in &self.install_image.parts {
            println!("  Install image: {}", part.display());
        }
        if !self.media_removals.is_empty() {
            let removed: usize = self.media_removals.iter().map(|o| o.removed).sum();
            println!("  Media tree: removed {} item(s)", removed);
            for o in self.media_removals.iter().filter(|o| o.removed > 0) {
                println!("    {}", o.directive);
            }
        }
        for report in &self.servicing {
            report.print();
        }
        self.injection.print();
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub mode: Mode,
    /// Device or directory for copy-to-partition.
    pub target: Option<PathBuf>,
    pub confirmation: Option<String>,
    pub bootloader: Bootloader,
}

pub struct Pipeline {
    config: Config,
    image: Box<dyn ImageTool>,
    extractor: Box<dyn ArchiveExtractor>,
    disk: Box<dyn DiskTool>,
    caps: Capabilities,
    tracker: ResourceTracker,
}

impl Pipeline {
    /// Open the tracker on the work directory (sweeping any stale state)
    /// and fix the capability set for the run.
    pub fn open(config: Config, tools: Tools, caps: Capabilities) -> Result<Self> {
        let Tools {
            image,
            extractor,
            disk,
            releaser,
        } = tools;
        let tracker = ResourceTracker::open(config.tracker_state(), releaser)?;
        Ok(Self {
            config,
            image,
            extractor,
            disk,
            caps,
            tracker,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Produce a prepared media tree in `<work>/media`.
    pub fn build(&mut self, request: &BuildRequest) -> Result<BuildSummary> {
        let resolver = PresetResolver::new(&self.config.presets_dir);
        let directives = resolver.resolve(&request.profile, request.override_path.as_deref())?;
        let media_dir = self.config.media_dir();

        println!("=== Preparing working copy ===");
        let timer = Timer::start("Working copy");
        media::prepare_media(&request.source, &media_dir)?;
        timer.finish();

        println!("=== Converting install image ===");
        let timer = Timer::start("Conversion");
        let converter = ImageConverter::new(self.image.as_ref(), self.config.split_policy());
        let install_path = image::locate_install_image(&media_dir)?;
        let container = ImageContainer::open(self.image.as_ref(), &install_path)?;
        let container = converter.convert(container)?;
        timer.finish();

        let mut media_removals = Vec::new();
        let mut servicing = Vec::new();
        let tokens: Vec<RemovalDirective> = directives.iter().filter(|d| d.is_name_token()).cloned().collect();
        if preset::is_noop(&request.profile) {
            if request.registry_bypass {
                tracing::warn!(profile = %request.profile, "requirement bypass ignored: profile skips servicing");
            }
            println!("Profile '{}': servicing skipped", request.profile);
        } else {
            if tokens.len() < directives.len() {
                println!("=== Trimming media tree ===");
                let timer = Timer::start("Media trim");
                media_removals = servicing::trim_media(&media_dir, &directives)?;
                timer.finish();
            }

            if tokens.is_empty() && !request.registry_bypass {
                println!("Profile '{}' has no image directives: image servicing skipped", request.profile);
            } else {
                println!("=== Servicing install image ({} directives) ===", tokens.len());
                let timer = Timer::start("Servicing");
                let indices: Vec<u32> = match request.index {
                    Some(i) => vec![i],
                    None => container.indices.iter().map(|i| i.index).collect(),
                };
                for index in indices {
                    let service_request = ServiceRequest {
                        index,
                        mount_point: self.config.work_dir.join("mnt-install"),
                        directives: &tokens,
                        registry_bypass: request.registry_bypass,
                    };
                    servicing.push(servicing::service(
                        self.image.as_ref(),
                        &mut self.tracker,
                        &self.caps,
                        &container,
                        &service_request,
                    )?);
                }
                timer.finish();
            }
        }

        println!("=== Injecting drivers ===");
        let timer = Timer::start("Driver injection");
        let drivers_dir = request
            .drivers
            .clone()
            .unwrap_or_else(|| self.config.drivers_dir.clone());
        let injector = DriverInjector {
            tool: self.image.as_ref(),
            extractor: self.extractor.as_ref(),
            caps: &self.caps,
            boot_index: self.config.boot_index,
            work_dir: self.config.work_dir.clone(),
        };
        let injection = injector.inject(&mut self.tracker, &media_dir, &drivers_dir)?;
        timer.finish();

        println!("=== Fitting install image to FAT32 ===");
        let timer = Timer::start("Split");
        let install_image = converter.fit_to_ceiling(container)?;
        timer.finish();

        Ok(BuildSummary {
            media_dir,
            install_image,
            media_removals,
            servicing,
            injection,
        })
    }

    /// Candidate devices for copy-to-partition.
    pub fn targets(&self) -> Result<Vec<MediaTarget>> {
        self.provisioner().candidates()
    }

    /// Deploy the prepared media tree.
    pub fn provision(&mut self, request: &ProvisionRequest) -> Result<ProvisionOutcome> {
        let media_dir = self.config.media_dir();
        image::locate_install_image(&media_dir).map_err(|_| {
            Error::SourceImage(format!(
                "no prepared media in {}; run 'winmedia build' first",
                media_dir.display()
            ))
        })?;

        match request.mode {
            Mode::ChainloadIso => {
                println!("=== Building chainload ISO ===");
                let timer = Timer::start("ISO");
                let outcome = self.provisioner().chainload_iso(&media_dir)?;
                timer.finish();
                Ok(outcome)
            }
            Mode::CopyToPartition => {
                let path = request
                    .target
                    .as_deref()
                    .ok_or_else(|| Error::TargetSelection("no --target given".to_string()))?;
                let target = if path.is_dir() {
                    MediaTarget::directory(path)?
                } else {
                    MediaTarget::select(path, &self.targets()?)?
                };

                println!("=== Writing media to {} ===", path.display());
                let timer = Timer::start("Provisioning");
                let provisioner = Provisioner {
                    disk: self.disk.as_ref(),
                    config: &self.config,
                };
                let outcome = provisioner.copy_to_partition(
                    &mut self.tracker,
                    &media_dir,
                    target,
                    request.confirmation.as_deref(),
                    request.bootloader,
                )?;
                timer.finish();
                Ok(outcome)
            }
        }
    }

    fn provisioner(&self) -> Provisioner<'_> {
        Provisioner {
            disk: self.disk.as_ref(),
            config: &self.config,
        }
    }
}
