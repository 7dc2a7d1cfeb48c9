//! Offline image servicing.
//!
//! A [`ServicingSession`] owns one read-write mount of one image index. It
//! ends in exactly one of two ways: [`ServicingSession::commit`] writes the
//! changes back, [`ServicingSession::abandon`] throws them away. A session
//! that is simply dropped stays registered with the tracker, which discards
//! it during its sweep.
//!
//! Explicit paths name files of the installer tree itself (`sources/ei.cfg`,
//! `autorun.inf`) and are removed from the media tree by [`trim_media`]. Name
//! tokens are matched inside each mounted index.

mod registry;
mod removal;

pub use registry::{apply_bypass, bypass_reg, RegistryOutcome, SYSTEM_HIVE};
pub use removal::{apply_directives, RemovalOutcome};

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::image::{ImageContainer, ImageFormat, ImageTool};
use crate::preflight::Capabilities;
use crate::preset::RemovalDirective;
use crate::tracker::{MountKind, ResourceId, ResourceTracker};

pub struct ServicingSession<'a> {
    tool: &'a dyn ImageTool,
    image: PathBuf,
    index: u32,
    mount_point: PathBuf,
    mount_id: ResourceId,
}

impl<'a> ServicingSession<'a> {
    /// Mount `index` of `container` read-write at `mount_point`.
    ///
    /// # Panics
    ///
    /// If the tracker already has an open mount at `mount_point`.
    pub fn mount(
        tool: &'a dyn ImageTool,
        tracker: &mut ResourceTracker,
        container: &ImageContainer,
        index: u32,
        mount_point: &Path,
    ) -> Result<Self> {
        let failed = |reason: String| Error::MountFailed {
            image: container.path.clone(),
            index,
            mount_point: mount_point.to_path_buf(),
            reason,
        };

        if container.format != ImageFormat::Wim {
            return Err(failed(format!(
                "{:?} containers cannot be mounted read-write",
                container.format
            )));
        }
        if !container.has_index(index) {
            return Err(failed(format!(
                "image has {} index(es), {} requested",
                container.index_count(),
                index
            )));
        }

        let mount_id = tracker.register_mount(mount_point, MountKind::Image)?;
        fs::create_dir_all(mount_point)?;

        tracing::info!(image = %container.path.display(), index, "mounting read-write");
        if let Err(e) = tool.mount_rw(&container.path, index, mount_point) {
            if let Err(release) = tracker.release(mount_id) {
                tracing::warn!("{}", release);
            }
            return Err(failed(format!("{:#}", e)));
        }

        Ok(Self {
            tool,
            image: container.path.clone(),
            index,
            mount_point: mount_point.to_path_buf(),
            mount_id,
        })
    }

    /// Root of the mounted tree.
    pub fn root(&self) -> &Path {
        &self.mount_point
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Unmount with write-back. If that fails the mount point is released
    /// without write-back before the error is returned.
    pub fn commit(self, tracker: &mut ResourceTracker) -> Result<()> {
        tracing::info!(image = %self.image.display(), index = self.index, "committing");
        match self.tool.unmount(&self.mount_point, true) {
            Ok(()) => {
                self.finish(tracker)?;
                Ok(())
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                match self.tool.unmount(&self.mount_point, false) {
                    Ok(()) => self.finish(tracker)?,
                    Err(discard) => {
                        tracing::error!("discarding after failed commit also failed: {:#}", discard)
                    }
                }
                Err(Error::CommitFailed {
                    mount_point: self.mount_point,
                    reason,
                })
            }
        }
    }

    /// Unmount without write-back.
    pub fn abandon(self, tracker: &mut ResourceTracker) -> Result<()> {
        tracing::info!(image = %self.image.display(), index = self.index, "abandoning session");
        self.tool
            .unmount(&self.mount_point, false)
            .map_err(|e| Error::ReleaseFailed {
                path: self.mount_point.clone(),
                reason: format!("{:#}", e),
            })?;
        self.finish(tracker)
    }

    fn finish(&self, tracker: &mut ResourceTracker) -> Result<()> {
        tracker.forget(self.mount_id)?;
        let _ = fs::remove_dir(&self.mount_point);
        Ok(())
    }
}

/// What one servicing pass changed.
#[derive(Debug, Clone)]
pub struct ServicingReport {
    pub index: u32,
    pub outcomes: Vec<RemovalOutcome>,
    pub registry: RegistryOutcome,
}

impl ServicingReport {
    /// Total filesystem objects removed across all directives.
    pub fn removed(&self) -> usize {
        self.outcomes.iter().map(|o| o.removed).sum()
    }

    pub fn print(&self) {
        println!("  Index {}: removed {} item(s)", self.index, self.removed());
        for o in self.outcomes.iter().filter(|o| o.removed > 0) {
            println!("    {} ({})", o.directive, o.removed);
        }
        match &self.registry {
            RegistryOutcome::NotRequested => {}
            RegistryOutcome::Applied => println!("  Requirement bypass: applied"),
            RegistryOutcome::NoHive => println!("  Requirement bypass: no SYSTEM hive, skipped"),
            RegistryOutcome::ToolMissing => println!("  [WARN] Requirement bypass skipped: hivexregedit missing"),
            RegistryOutcome::Failed(e) => println!("  [WARN] Requirement bypass failed: {}", e),
        }
    }
}

/// Remove the explicit-path directives from the top-level media tree. Name
/// tokens are skipped; they belong to the per-index sessions.
pub fn trim_media(media_dir: &Path, directives: &[RemovalDirective]) -> Result<Vec<RemovalOutcome>> {
    let paths: Vec<RemovalDirective> = directives
        .iter()
        .filter(|d| !d.is_name_token())
        .cloned()
        .collect();
    let outcomes = apply_directives(media_dir, &paths)?;
    let removed: usize = outcomes.iter().map(|o| o.removed).sum();
    tracing::info!(media = %media_dir.display(), removed, "media tree trimmed");
    Ok(outcomes)
}

/// One servicing pass over one index.
#[derive(Debug, Clone)]
pub struct ServiceRequest<'r> {
    pub index: u32,
    pub mount_point: PathBuf,
    pub directives: &'r [RemovalDirective],
    pub registry_bypass: bool,
}

/// Mount, apply directives and registry edits, commit.
///
/// A failure while editing abandons the session before returning.
pub fn service(
    tool: &dyn ImageTool,
    tracker: &mut ResourceTracker,
    caps: &Capabilities,
    container: &ImageContainer,
    request: &ServiceRequest<'_>,
) -> Result<ServicingReport> {
    let session = ServicingSession::mount(tool, tracker, container, request.index, &request.mount_point)?;

    let outcomes = match apply_directives(session.root(), request.directives) {
        Ok(outcomes) => outcomes,
        Err(e) => {
            if let Err(abandon) = session.abandon(tracker) {
                tracing::error!("{}", abandon);
            }
            return Err(e.into());
        }
    };

    let registry = if request.registry_bypass {
        apply_bypass(session.root(), caps)
    } else {
        RegistryOutcome::NotRequested
    };

    session.commit(tracker)?;

    let report = ServicingReport {
        index: request.index,
        outcomes,
        registry,
    };
    tracing::info!(index = report.index, removed = report.removed(), "servicing committed");
    Ok(report)
}
