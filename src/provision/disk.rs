//! Block device operations behind a seam.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::confirm::ConfirmedTarget;
use super::target::parse_mount_points;
use crate::process::Cmd;

/// One bootable FAT32 (LBA) partition spanning the whole device.
pub const SFDISK_SCRIPT: &str = "label: dos\n,,c,*\n";

const LSBLK_COLUMNS: &str = "NAME,PATH,TYPE,RM,SIZE,LABEL,MODEL,MOUNTPOINT";

pub trait DiskTool {
    /// `lsblk --json --bytes` output for all block devices.
    fn list_block_devices(&self) -> Result<String>;
    /// Source device of the root filesystem.
    fn root_source(&self) -> Result<Option<String>>;
    /// Mount points on `device` and its partitions.
    fn mount_points(&self, device: &Path) -> Result<Vec<PathBuf>>;
    fn unmount(&self, mount_point: &Path) -> Result<()>;
    /// Write a fresh partition table with [`SFDISK_SCRIPT`].
    fn partition(&self, target: &ConfirmedTarget) -> Result<()>;
    fn format_fat32(&self, target: &ConfirmedTarget, partition: &Path, label: &str) -> Result<()>;
    fn mount(&self, partition: &Path, mount_point: &Path) -> Result<()>;
    fn sync(&self) -> Result<()>;
}

/// util-linux and dosfstools on the host.
pub struct SystemDisk;

impl DiskTool for SystemDisk {
    fn list_block_devices(&self) -> Result<String> {
        let result = Cmd::new("lsblk")
            .args(["--json", "--bytes", "--output", LSBLK_COLUMNS])
            .error_msg("lsblk failed")
            .run()?;
        Ok(result.stdout)
    }

    fn root_source(&self) -> Result<Option<String>> {
        let result = Cmd::new("findmnt")
            .args(["--noheadings", "--output", "SOURCE", "/"])
            .allow_fail()
            .run()?;
        if !result.success() {
            return Ok(None);
        }
        // btrfs reports "/dev/sda2[/@root]"
        let source = result.stdout_trimmed().split('[').next().unwrap_or("").to_string();
        Ok((!source.is_empty()).then_some(source))
    }

    fn mount_points(&self, device: &Path) -> Result<Vec<PathBuf>> {
        let result = Cmd::new("lsblk")
            .args(["--json", "--output", "PATH,MOUNTPOINT"])
            .arg_path(device)
            .error_msg(format!("lsblk {} failed", device.display()))
            .run()?;
        Ok(parse_mount_points(&result.stdout)?)
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        Cmd::new("umount")
            .arg_path(mount_point)
            .error_msg(format!("umount {} failed", mount_point.display()))
            .run()?;
        Ok(())
    }

    fn partition(&self, target: &ConfirmedTarget) -> Result<()> {
        let device = &target.target().path;
        Cmd::new("sfdisk")
            .args(["--wipe", "always", "--wipe-partitions", "always"])
            .arg_path(device)
            .stdin(SFDISK_SCRIPT)
            .error_msg("sfdisk failed to create partition table")
            .run()?;

        // Let the kernel and udev catch up before the partition node is used.
        Cmd::new("partprobe").arg_path(device).allow_fail().run()?;
        Cmd::new("udevadm").arg("settle").allow_fail().run()?;
        Ok(())
    }

    fn format_fat32(&self, _target: &ConfirmedTarget, partition: &Path, label: &str) -> Result<()> {
        Cmd::new("mkfs.vfat")
            .args(["-F", "32", "-n", label])
            .arg_path(partition)
            .error_msg("mkfs.vfat failed")
            .run()?;
        Ok(())
    }

    fn mount(&self, partition: &Path, mount_point: &Path) -> Result<()> {
        Cmd::new("mount")
            .arg_path(partition)
            .arg_path(mount_point)
            .error_msg(format!("mount {} failed", partition.display()))
            .run()?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Cmd::new("sync").error_msg("sync failed").run()?;
        Ok(())
    }
}
