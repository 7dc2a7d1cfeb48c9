//! Third-party driver injection.
//!
//! Vendor payloads are unpacked into a scratch area, every directory holding
//! a `.inf` becomes one `DriverSetN` under `$WinPEDriver$` in the media tree,
//! and the boot image's `startnet.cmd` is rewritten to `drvload` them before
//! Setup starts. Nothing in this stage is fatal except failing to service the
//! boot image itself.

mod discover;
mod extract;
mod startnet;

pub use discover::find_driver_roots;
pub use extract::{archive_stem, ArchiveExtractor, ArchiveFamily, SystemExtractor};
pub use startnet::{rewrite_startnet, startnet_script, BACKUP_SUFFIX, STAGING_DIR, STARTNET};

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::common::prepare_work_dir;
use crate::error::Result;
use crate::image::{self, ImageContainer, ImageTool};
use crate::preflight::Capabilities;
use crate::servicing::ServicingSession;
use crate::tracker::ResourceTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// None of the tools able to unpack the archive are installed.
    ToolMissing(Vec<&'static str>),
    ExtractionFailed(String),
}

#[derive(Debug, Clone)]
pub struct SkippedArchive {
    pub archive: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct InjectionReport {
    /// Staged `DriverSetN` directories, in order.
    pub driver_sets: Vec<PathBuf>,
    pub skipped: Vec<SkippedArchive>,
    /// Loose files that are not archives.
    pub ignored: Vec<PathBuf>,
    pub boot_image_updated: bool,
}

impl InjectionReport {
    pub fn print(&self) {
        println!("  Driver sets staged: {}", self.driver_sets.len());
        for skip in &self.skipped {
            match &skip.reason {
                SkipReason::ToolMissing(tools) => println!(
                    "  [WARN] Skipped {}: install {}",
                    skip.archive.display(),
                    tools.join(" or ")
                ),
                SkipReason::ExtractionFailed(e) => {
                    println!("  [WARN] Skipped {}: {}", skip.archive.display(), e)
                }
            }
        }
        if self.boot_image_updated {
            println!("  Boot image: startnet.cmd rewritten");
        }
    }
}

pub struct DriverInjector<'a> {
    pub tool: &'a dyn ImageTool,
    pub extractor: &'a dyn ArchiveExtractor,
    pub caps: &'a Capabilities,
    /// Index of the Setup image inside boot.wim.
    pub boot_index: u32,
    /// Parent of the scratch extraction area and the boot mount point.
    pub work_dir: PathBuf,
}

impl<'a> DriverInjector<'a> {
    pub fn scratch_dir(&self) -> PathBuf {
        self.work_dir.join("driver-extract")
    }

    pub fn boot_mount_point(&self) -> PathBuf {
        self.work_dir.join("mnt-boot")
    }

    /// Stage every driver found in `source_dir` into `media_dir` and wire the
    /// boot image to load them. Does nothing if `source_dir` is missing.
    pub fn inject(
        &self,
        tracker: &mut ResourceTracker,
        media_dir: &Path,
        source_dir: &Path,
    ) -> Result<InjectionReport> {
        let mut report = InjectionReport::default();
        if !source_dir.is_dir() {
            tracing::info!(source = %source_dir.display(), "no driver directory, skipping injection");
            return Ok(report);
        }

        let scratch = self.scratch_dir();
        let scratch_id = tracker.register_scratch(&scratch)?;
        let scratch_parent = scratch.parent().unwrap_or(&self.work_dir);
        prepare_work_dir(scratch_parent, "driver-extract").map_err(into_io)?;

        self.extract_archives(source_dir, &scratch, &mut report)?;

        let roots = find_driver_roots(&[source_dir, &scratch]);
        report.driver_sets = stage(media_dir, &roots)?;
        tracker.release(scratch_id)?;

        if report.driver_sets.is_empty() {
            tracing::info!("no .inf files found, boot image left untouched");
            return Ok(report);
        }

        let Some(boot) = image::locate_boot_image(media_dir) else {
            tracing::warn!("no sources/boot.wim; drivers are staged but will not load in WinPE");
            return Ok(report);
        };
        self.update_boot_image(tracker, &boot)?;
        report.boot_image_updated = true;

        tracing::info!(
            driver_sets = report.driver_sets.len(),
            skipped = report.skipped.len(),
            "drivers injected"
        );
        Ok(report)
    }

    fn extract_archives(
        &self,
        source_dir: &Path,
        scratch: &Path,
        report: &mut InjectionReport,
    ) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(source_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        for archive in files {
            let Some(family) = ArchiveFamily::classify(&archive) else {
                tracing::debug!(file = %archive.display(), "not an archive, skipped");
                report.ignored.push(archive);
                continue;
            };

            let available: Vec<&'static str> = family
                .tools()
                .iter()
                .copied()
                .filter(|t| self.caps.has(t))
                .collect();
            if available.is_empty() {
                tracing::warn!(
                    archive = %archive.display(),
                    "no extractor installed (need {})",
                    family.tools().join(" or ")
                );
                report.skipped.push(SkippedArchive {
                    archive,
                    reason: SkipReason::ToolMissing(family.tools().to_vec()),
                });
                continue;
            }

            let dest = unique_dest(scratch, &archive_stem(&archive));
            fs::create_dir_all(&dest)?;

            let mut last_error = None;
            for tool in &available {
                match self.extractor.extract(tool, &archive, &dest) {
                    Ok(()) => {
                        tracing::debug!(archive = %archive.display(), tool, "extracted");
                        last_error = None;
                        break;
                    }
                    Err(e) => last_error = Some(format!("{:#}", e)),
                }
            }
            if let Some(reason) = last_error {
                tracing::warn!(archive = %archive.display(), "extraction failed: {}", reason);
                report.skipped.push(SkippedArchive {
                    archive,
                    reason: SkipReason::ExtractionFailed(reason),
                });
            }
        }
        Ok(())
    }

    fn update_boot_image(&self, tracker: &mut ResourceTracker, boot: &Path) -> Result<()> {
        let container = ImageContainer::open(self.tool, boot)?;
        let session = ServicingSession::mount(
            self.tool,
            tracker,
            &container,
            self.boot_index,
            &self.boot_mount_point(),
        )?;

        if let Err(e) = rewrite_startnet(session.root()) {
            if let Err(abandon) = session.abandon(tracker) {
                tracing::error!("{}", abandon);
            }
            return Err(e);
        }
        session.commit(tracker)
    }
}

/// Copy each root into `<media>/$WinPEDriver$/DriverSetN`. An earlier
/// staging area is replaced.
fn stage(media_dir: &Path, roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let staging = media_dir.join(STAGING_DIR);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    let all: Vec<PathBuf> = roots.iter().map(|r| canonical(r)).collect();
    let mut sets = Vec::with_capacity(roots.len());
    for (n, root) in roots.iter().enumerate() {
        let dest = staging.join(format!("DriverSet{}", n + 1));
        let nested: HashSet<&Path> = all
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != n)
            .map(|(_, p)| p.as_path())
            .collect();
        let copied = copy_driver_root(root, &dest, &nested)?;
        tracing::debug!(from = %root.display(), to = %dest.display(), copied, "driver set staged");
        sets.push(dest);
    }
    Ok(sets)
}

/// Copy one driver root without the other roots nested inside it, which are
/// staged as sets of their own, and without vendor archives, which were
/// already unpacked into the scratch area.
fn copy_driver_root(root: &Path, dest: &Path, nested: &HashSet<&Path>) -> Result<usize> {
    fs::create_dir_all(dest)?;
    let walker = WalkDir::new(root)
        .follow_links(true)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && nested.contains(canonical(e.path()).as_path())));

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if ArchiveFamily::classify(entry.path()).is_some() {
            tracing::debug!(archive = %entry.path().display(), "archive left out of driver set");
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn unique_dest(scratch: &Path, stem: &str) -> PathBuf {
    let first = scratch.join(stem);
    if !first.exists() {
        return first;
    }
    (2..)
        .map(|n| scratch.join(format!("{}-{}", stem, n)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

fn into_io(e: anyhow::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e))
}
