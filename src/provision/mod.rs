//! Media provisioning: the last, destructive stage.
//!
//! Two modes:
//!
//! - **chainload ISO**: repack the tree as an ISO next to the running system
//!   and add a GRUB entry that loop-mounts and chainloads it. No disk is
//!   touched.
//! - **copy to partition**: wipe a confirmed device, create one FAT32
//!   partition, copy the tree. A directory target just receives the copy.

mod confirm;
mod disk;
pub mod grub;
pub mod iso;
mod target;

pub use confirm::ConfirmedTarget;
pub use disk::{DiskTool, SystemDisk, SFDISK_SCRIPT};
pub use target::{parse_candidates, parse_mount_points, partition_path, MediaTarget, TargetKind};

use std::fs;
use std::path::{Path, PathBuf};

use crate::common::copy_dir_recursive;
use crate::common::files::tree_size;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::image::FAT32_CEILING;
use crate::tracker::{MountKind, ResourceTracker};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ChainloadIso,
    CopyToPartition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootloader {
    /// Add a GRUB entry that chainloads the media.
    Chainload,
    /// Leave boot selection to the firmware menu.
    Firmware,
}

#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub mode: Mode,
    /// ISO file, device or directory that received the media.
    pub destination: PathBuf,
    pub checksum: Option<PathBuf>,
    /// Title of the GRUB entry written, if any.
    pub grub_entry: Option<String>,
    pub files_copied: usize,
}

impl ProvisionOutcome {
    pub fn print(&self, fragment: &Path) {
        println!("  Media written to {}", self.destination.display());
        if let Some(sum) = &self.checksum {
            println!("  Checksum: {}", sum.display());
        }
        if self.files_copied > 0 {
            println!("  Files copied: {}", self.files_copied);
        }
        match &self.grub_entry {
            Some(title) => {
                println!("  GRUB entry \"{}\" written to {}", title, fragment.display());
                println!("  Run 'grub-mkconfig -o /boot/grub/grub.cfg' (or 'update-grub') to activate it.");
            }
            None => println!("  Select the media from the firmware boot menu."),
        }
    }
}

pub struct Provisioner<'a> {
    pub disk: &'a dyn DiskTool,
    pub config: &'a Config,
}

impl<'a> Provisioner<'a> {
    /// Devices that may be formatted: every whole disk except the one the
    /// running system lives on.
    pub fn candidates(&self) -> Result<Vec<MediaTarget>> {
        let json = self
            .disk
            .list_block_devices()
            .map_err(|e| Error::TargetSelection(format!("{:#}", e)))?;
        let root = self.disk.root_source().unwrap_or_else(|e| {
            tracing::warn!("cannot determine the system disk: {:#}", e);
            None
        });
        parse_candidates(&json, root.as_deref())
    }

    /// Repack `media_dir` as an ISO at the configured destination and point
    /// a GRUB entry at it.
    pub fn chainload_iso(&self, media_dir: &Path) -> Result<ProvisionOutcome> {
        let iso_path = &self.config.iso_dest;
        iso::build_iso(media_dir, iso_path, &self.config.volume_label).map_err(|e| Error::CopyFailed {
            dest: iso_path.clone(),
            reason: format!("{:#}", e),
        })?;
        let checksum = iso::write_checksum(iso_path).map_err(|e| Error::CopyFailed {
            dest: iso_path.clone(),
            reason: format!("checksum: {:#}", e),
        })?;

        let on_fs = grub::host_path_on_filesystem(iso_path);
        grub::install_entry(
            &self.config.grub_fragment,
            grub::ISO_ENTRY_TITLE,
            &grub::iso_entry(grub::ISO_ENTRY_TITLE, &on_fs),
        )?;

        Ok(ProvisionOutcome {
            mode: Mode::ChainloadIso,
            destination: iso_path.clone(),
            checksum: Some(checksum),
            grub_entry: Some(grub::ISO_ENTRY_TITLE.to_string()),
            files_copied: 0,
        })
    }

    /// Deploy `media_dir` onto `target`. Devices are wiped first and only
    /// after `confirmation` matches the device path exactly.
    pub fn copy_to_partition(
        &self,
        tracker: &mut ResourceTracker,
        media_dir: &Path,
        target: MediaTarget,
        confirmation: Option<&str>,
        bootloader: Bootloader,
    ) -> Result<ProvisionOutcome> {
        // Only a device formatted here carries the label the GRUB entry searches for.
        if !target.is_device() && bootloader == Bootloader::Chainload {
            return Err(Error::TargetSelection(format!(
                "{} is a directory; a chainload entry needs a device formatted with label {} \
                 (use --bootloader firmware)",
                target.path.display(),
                self.config.volume_label
            )));
        }

        let destination = target.path.clone();
        let files_copied = match target.kind {
            TargetKind::Directory => {
                copy_dir_recursive(media_dir, &target.path).map_err(|e| Error::CopyFailed {
                    dest: target.path.clone(),
                    reason: format!("{:#}", e),
                })?
            }
            TargetKind::Device => {
                check_fat32_fit(media_dir, &target.path)?;
                let needed = tree_size(media_dir);
                if target.size > 0 && needed > target.size {
                    return Err(Error::CopyFailed {
                        dest: target.path,
                        reason: format!("media needs {} bytes, device holds {}", needed, target.size),
                    });
                }
                let confirmed = ConfirmedTarget::confirm(target, confirmation.unwrap_or(""))?;
                self.write_device(tracker, media_dir, &confirmed)?
            }
        };

        let grub_entry = match bootloader {
            Bootloader::Firmware => None,
            Bootloader::Chainload => {
                let title = grub::PARTITION_ENTRY_TITLE;
                grub::install_entry(
                    &self.config.grub_fragment,
                    title,
                    &grub::label_entry(title, &self.config.volume_label),
                )?;
                Some(title.to_string())
            }
        };

        Ok(ProvisionOutcome {
            mode: Mode::CopyToPartition,
            destination,
            checksum: None,
            grub_entry,
            files_copied,
        })
    }

    fn write_device(
        &self,
        tracker: &mut ResourceTracker,
        media_dir: &Path,
        confirmed: &ConfirmedTarget,
    ) -> Result<usize> {
        let device = confirmed.target().path.clone();
        let partition_failed = |reason: String| Error::PartitionFailed {
            device: device.clone(),
            reason,
        };

        let mounted = self
            .disk
            .mount_points(&device)
            .map_err(|e| partition_failed(format!("{:#}", e)))?;
        for mp in mounted {
            tracing::info!(mount_point = %mp.display(), "unmounting");
            self.disk
                .unmount(&mp)
                .map_err(|e| partition_failed(format!("{:#}", e)))?;
        }

        println!("  Partitioning {}...", device.display());
        self.disk
            .partition(confirmed)
            .map_err(|e| partition_failed(format!("{:#}", e)))?;

        let partition = partition_path(&device);
        println!("  Formatting {} as FAT32 ({})...", partition.display(), self.config.volume_label);
        self.disk
            .format_fat32(confirmed, &partition, &self.config.volume_label)
            .map_err(|e| Error::FormatFailed {
                partition: partition.clone(),
                reason: format!("{:#}", e),
            })?;

        let mount_point = self.config.work_dir.join("mnt-target");
        let copy_failed = |reason: String| Error::CopyFailed {
            dest: partition.clone(),
            reason,
        };
        let mount_id = tracker.register_mount(&mount_point, MountKind::Device)?;
        fs::create_dir_all(&mount_point)?;
        if let Err(e) = self.disk.mount(&partition, &mount_point) {
            let _ = tracker.release(mount_id);
            return Err(copy_failed(format!("{:#}", e)));
        }

        println!("  Copying media tree...");
        let copied = match copy_dir_recursive(media_dir, &mount_point) {
            Ok(n) => n,
            Err(e) => {
                let _ = tracker.release(mount_id);
                return Err(copy_failed(format!("{:#}", e)));
            }
        };

        self.disk.sync().map_err(|e| copy_failed(format!("{:#}", e)))?;
        self.disk
            .unmount(&mount_point)
            .map_err(|e| copy_failed(format!("{:#}", e)))?;
        tracker.forget(mount_id)?;
        let _ = fs::remove_dir(&mount_point);

        tracing::info!(device = %device.display(), files = copied, "media written");
        Ok(copied)
    }
}

/// Refuse trees holding a file FAT32 cannot store, before anything is wiped.
fn check_fat32_fit(media_dir: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(media_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if len > FAT32_CEILING {
            return Err(Error::CopyFailed {
                dest: dest.to_path_buf(),
                reason: format!(
                    "{} is {} bytes, larger than FAT32 allows; rebuild so the image is split",
                    entry.path().display(),
                    len
                ),
            });
        }
    }
    Ok(())
}
