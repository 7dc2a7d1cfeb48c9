//! Temporary-resource tracking.
//!
//! Every mount point and scratch directory the pipeline creates is registered
//! here *before* the operation that could fail. The registry is mirrored to a
//! JSON state file on every change, so a process that dies mid-run leaves a
//! record that the next [`ResourceTracker::open`] sweeps before any new image
//! operation starts.
//!
//! Release always runs in reverse acquisition order: a device mounted inside a
//! scratch directory is unmounted before the directory is deleted.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::mounts;
use crate::error::{Error, Result};
use crate::process::Cmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
    /// Read-write image mount (wimlib FUSE).
    Image,
    /// Block device mounted on a scratch mount point.
    Device,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
    Mount { path: PathBuf, mount: MountKind },
    Scratch { path: PathBuf },
}

impl Resource {
    pub fn path(&self) -> &Path {
        match self {
            Resource::Mount { path, .. } | Resource::Scratch { path } => path,
        }
    }
}

/// Handle returned by every registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceId(u64);

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    pid: u32,
    resources: Vec<Resource>,
}

/// Knows how to force a mount point loose.
pub trait MountReleaser {
    /// Unmount an image without writing changes back.
    fn release_image_mount(&self, mount_point: &Path) -> anyhow::Result<()>;
    fn release_device_mount(&self, mount_point: &Path) -> anyhow::Result<()>;
}

/// Releases mounts with the host tools.
pub struct SystemReleaser;

impl MountReleaser for SystemReleaser {
    fn release_image_mount(&self, mount_point: &Path) -> anyhow::Result<()> {
        if !mounts::is_mount_point(mount_point) {
            return Ok(());
        }
        let discard = Cmd::new("wimlib-imagex")
            .arg("unmount")
            .arg_path(mount_point)
            .error_msg("wimlib-imagex unmount failed")
            .run();
        if discard.is_err() {
            Cmd::new("fusermount")
                .arg("-u")
                .arg_path(mount_point)
                .error_msg("fusermount -u failed")
                .run()?;
        }
        Ok(())
    }

    fn release_device_mount(&self, mount_point: &Path) -> anyhow::Result<()> {
        if !mounts::is_mount_point(mount_point) {
            return Ok(());
        }
        let plain = Cmd::new("umount").arg_path(mount_point).run();
        if plain.is_err() {
            Cmd::new("umount")
                .arg("--lazy")
                .arg_path(mount_point)
                .error_msg("umount --lazy failed")
                .run()?;
        }
        Ok(())
    }
}

/// Outcome of a release pass.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub released: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ResourceTracker {
    state_file: PathBuf,
    releaser: Box<dyn MountReleaser>,
    entries: Vec<(ResourceId, Resource)>,
    next_id: u64,
}

impl ResourceTracker {
    /// Open a tracker on `state_file`, first sweeping anything a previous
    /// process left registered there.
    pub fn open(state_file: impl Into<PathBuf>, releaser: Box<dyn MountReleaser>) -> Result<Self> {
        let state_file = state_file.into();
        let report = sweep_stale(&state_file, releaser.as_ref())?;
        if !report.released.is_empty() {
            tracing::warn!(
                count = report.released.len(),
                "released resources left behind by an interrupted run"
            );
        }
        if let Some((path, reason)) = report.failed.first() {
            return Err(Error::ReleaseFailed {
                path: path.clone(),
                reason: reason.clone(),
            });
        }

        Ok(Self {
            state_file,
            releaser,
            entries: Vec::new(),
            next_id: 1,
        })
    }

    /// Register a mount point before mounting anything on it.
    ///
    /// # Panics
    ///
    /// If `path` already has a registered mount. Two sessions on one mount
    /// point is a caller bug.
    pub fn register_mount(&mut self, path: impl Into<PathBuf>, mount: MountKind) -> Result<ResourceId> {
        let path = path.into();
        assert!(
            !self.has_mount(&path),
            "mount point {} already has an open session",
            path.display()
        );
        self.register(Resource::Mount { path, mount })
    }

    /// Register a scratch directory before creating it.
    pub fn register_scratch(&mut self, path: impl Into<PathBuf>) -> Result<ResourceId> {
        self.register(Resource::Scratch { path: path.into() })
    }

    pub fn has_mount(&self, path: &Path) -> bool {
        self.entries
            .iter()
            .any(|(_, r)| matches!(r, Resource::Mount { path: p, .. } if p == path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop a resource whose owner already released it (committed session,
    /// scratch directory handed over as output).
    pub fn forget(&mut self, id: ResourceId) -> Result<()> {
        self.entries.retain(|(i, _)| *i != id);
        self.persist()
    }

    /// Release one resource now.
    pub fn release(&mut self, id: ResourceId) -> Result<()> {
        let Some(pos) = self.entries.iter().position(|(i, _)| *i == id) else {
            return Ok(());
        };
        let (_, resource) = self.entries[pos].clone();
        release_one(&resource, self.releaser.as_ref(), &[]).map_err(|reason| Error::ReleaseFailed {
            path: resource.path().to_path_buf(),
            reason,
        })?;
        self.entries.remove(pos);
        self.persist()
    }

    /// Release everything still registered, newest first. Resources that
    /// fail to release stay registered for the next sweep.
    pub fn release_all(&mut self) -> SweepReport {
        let resources: Vec<Resource> = self.entries.iter().map(|(_, r)| r.clone()).collect();
        let report = release_in_reverse(&resources, self.releaser.as_ref());

        let failed: Vec<&PathBuf> = report.failed.iter().map(|(p, _)| p).collect();
        self.entries
            .retain(|(_, r)| failed.iter().any(|p| p.as_path() == r.path()));
        if let Err(e) = self.persist() {
            tracing::error!("failed to update resource state file: {}", e);
        }
        report
    }

    fn register(&mut self, resource: Resource) -> Result<ResourceId> {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        tracing::debug!(path = %resource.path().display(), "register {:?}", resource);
        self.entries.push((id, resource));
        self.persist()?;
        Ok(id)
    }

    fn persist(&self) -> Result<()> {
        if self.entries.is_empty() {
            if self.state_file.exists() {
                fs::remove_file(&self.state_file)?;
            }
            return Ok(());
        }
        write_state(
            &self.state_file,
            &StateFile {
                pid: std::process::id(),
                resources: self.entries.iter().map(|(_, r)| r.clone()).collect(),
            },
        )
    }
}

impl Drop for ResourceTracker {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let report = self.release_all();
        for (path, reason) in &report.failed {
            tracing::error!(path = %path.display(), "could not release: {}", reason);
        }
    }
}

/// Release everything recorded in `state_file` by an earlier process.
pub fn sweep_stale(state_file: &Path, releaser: &dyn MountReleaser) -> Result<SweepReport> {
    if !state_file.exists() {
        return Ok(SweepReport::default());
    }
    let text = fs::read_to_string(state_file)?;
    let state: StateFile = serde_json::from_str(&text).unwrap_or_else(|e| {
        tracing::warn!("ignoring unreadable state file {}: {}", state_file.display(), e);
        StateFile::default()
    });

    tracing::info!(
        pid = state.pid,
        count = state.resources.len(),
        "sweeping resources from a previous run"
    );
    let report = release_in_reverse(&state.resources, releaser);

    let remaining: Vec<Resource> = state
        .resources
        .into_iter()
        .filter(|r| report.failed.iter().any(|(p, _)| p.as_path() == r.path()))
        .collect();
    if remaining.is_empty() {
        fs::remove_file(state_file)?;
    } else {
        write_state(
            state_file,
            &StateFile {
                pid: state.pid,
                resources: remaining,
            },
        )?;
    }
    Ok(report)
}

fn release_in_reverse(resources: &[Resource], releaser: &dyn MountReleaser) -> SweepReport {
    let mut report = SweepReport::default();
    for resource in resources.iter().rev() {
        let stuck: Vec<PathBuf> = report.failed.iter().map(|(p, _)| p.clone()).collect();
        match release_one(resource, releaser, &stuck) {
            Ok(()) => report.released.push(resource.path().to_path_buf()),
            Err(reason) => report.failed.push((resource.path().to_path_buf(), reason)),
        }
    }
    report
}

/// `stuck` lists mount points that could not be released; a scratch
/// directory containing one of them must not be deleted.
fn release_one(
    resource: &Resource,
    releaser: &dyn MountReleaser,
    stuck: &[PathBuf],
) -> std::result::Result<(), String> {
    match resource {
        Resource::Mount { path, mount } => {
            let result = match mount {
                MountKind::Image => releaser.release_image_mount(path),
                MountKind::Device => releaser.release_device_mount(path),
            };
            result.map_err(|e| format!("{:#}", e))?;
            // Only an empty directory is removed: a mount that silently stayed
            // busy must never have its contents deleted.
            let _ = fs::remove_dir(path);
            Ok(())
        }
        Resource::Scratch { path } => {
            if let Some(inner) = stuck.iter().find(|m| m.starts_with(path)) {
                return Err(format!("contains a mount that is still busy: {}", inner.display()));
            }
            match fs::remove_dir_all(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.to_string()),
            }
        }
    }
}

fn write_state(state_file: &Path, state: &StateFile) -> Result<()> {
    if let Some(parent) = state_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp = state_file.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, state_file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Log(Rc<RefCell<Vec<String>>>);

    struct Recorder(Log);

    impl MountReleaser for Recorder {
        fn release_image_mount(&self, p: &Path) -> anyhow::Result<()> {
            self.0 .0.borrow_mut().push(format!("image {}", p.display()));
            Ok(())
        }
        fn release_device_mount(&self, p: &Path) -> anyhow::Result<()> {
            self.0 .0.borrow_mut().push(format!("device {}", p.display()));
            Ok(())
        }
    }

    #[test]
    fn test_release_all_is_reverse_order() {
        let tmp = TempDir::new().unwrap();
        let log = Log::default();
        let mut tracker =
            ResourceTracker::open(tmp.path().join("state.json"), Box::new(Recorder(log.clone()))).unwrap();

        tracker.register_mount(tmp.path().join("a"), MountKind::Image).unwrap();
        tracker.register_mount(tmp.path().join("b"), MountKind::Device).unwrap();
        let report = tracker.release_all();

        assert!(report.is_clean());
        let calls = log.0.borrow();
        assert!(calls[0].starts_with("device"));
        assert!(calls[1].starts_with("image"));
        assert!(tracker.is_empty());
        assert!(!tmp.path().join("state.json").exists());
    }

    #[test]
    fn test_state_file_mirrors_registry() {
        let tmp = TempDir::new().unwrap();
        let state = tmp.path().join("state.json");
        let mut tracker = ResourceTracker::open(&state, Box::new(Recorder(Log::default()))).unwrap();

        let id = tracker.register_scratch(tmp.path().join("scratch")).unwrap();
        let text = fs::read_to_string(&state).unwrap();
        assert!(text.contains("\"kind\": \"scratch\""));

        tracker.forget(id).unwrap();
        assert!(!state.exists());
    }

    #[test]
    #[should_panic(expected = "already has an open session")]
    fn test_double_mount_registration_panics() {
        let tmp = TempDir::new().unwrap();
        let mut tracker =
            ResourceTracker::open(tmp.path().join("state.json"), Box::new(Recorder(Log::default()))).unwrap();
        tracker.register_mount(tmp.path().join("mnt"), MountKind::Image).unwrap();
        tracker.register_mount(tmp.path().join("mnt"), MountKind::Image).unwrap();
    }

    #[test]
    fn test_scratch_with_stuck_mount_is_kept() {
        struct Stubborn;
        impl MountReleaser for Stubborn {
            fn release_image_mount(&self, _: &Path) -> anyhow::Result<()> {
                anyhow::bail!("target is busy")
            }
            fn release_device_mount(&self, _: &Path) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let tmp = TempDir::new().unwrap();
        let scratch = tmp.path().join("scratch");
        let mount = scratch.join("mnt");
        fs::create_dir_all(mount.join("Windows")).unwrap();

        let mut tracker = ResourceTracker::open(tmp.path().join("state.json"), Box::new(Stubborn)).unwrap();
        tracker.register_scratch(&scratch).unwrap();
        tracker.register_mount(&mount, MountKind::Image).unwrap();
        let report = tracker.release_all();

        assert_eq!(report.failed.len(), 2);
        assert!(mount.join("Windows").is_dir());
        assert_eq!(tracker.len(), 2);
        std::mem::forget(tracker);
    }
}
