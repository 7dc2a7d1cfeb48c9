//! The image tool seam and its wimlib-imagex implementation.

use anyhow::{Context, Result};
use std::path::Path;

use super::{ImageFormat, IndexInfo};
use crate::process::Cmd;

/// Operations the pipeline needs from a WIM toolkit.
pub trait ImageTool {
    /// Per-index metadata of a container.
    fn info(&self, image: &Path) -> Result<Vec<IndexInfo>>;
    /// Export every index of `src` into a new WIM at `dest`.
    fn export_all(&self, src: &Path, dest: &Path) -> Result<()>;
    /// Split `image` into parts no larger than `part_size_mib`, the first
    /// one written to `first_part`.
    fn split(&self, image: &Path, first_part: &Path, part_size_mib: u64) -> Result<()>;
    fn mount_rw(&self, image: &Path, index: u32, mount_point: &Path) -> Result<()>;
    /// Unmount, writing changes back when `commit` is set.
    fn unmount(&self, mount_point: &Path, commit: bool) -> Result<()>;
}

/// `wimlib-imagex` on the host.
pub struct WimlibTool;

const WIMLIB: &str = "wimlib-imagex";

impl ImageTool for WimlibTool {
    fn info(&self, image: &Path) -> Result<Vec<IndexInfo>> {
        let result = Cmd::new(WIMLIB)
            .arg("info")
            .arg_path(image)
            .error_msg(format!("{} info failed", WIMLIB))
            .run()?;
        Ok(parse_info(&result.stdout))
    }

    fn export_all(&self, src: &Path, dest: &Path) -> Result<()> {
        let mut cmd = Cmd::new(WIMLIB)
            .arg("export")
            .arg_path(src)
            .arg("all")
            .arg_path(dest)
            .arg("--compress=LZX");
        // Split sets: wimlib expands the glob itself.
        if ImageFormat::from_path(src) == Some(ImageFormat::Swm) {
            if let Some(stem) = src.file_stem().and_then(|s| s.to_str()) {
                let pattern = src.with_file_name(format!("{}*.swm", stem));
                cmd = cmd.arg(format!("--ref={}", pattern.display()));
            }
        }
        cmd.error_msg(format!("{} export failed", WIMLIB))
            .run_interactive()
            .with_context(|| format!("exporting {}", src.display()))?;
        Ok(())
    }

    fn split(&self, image: &Path, first_part: &Path, part_size_mib: u64) -> Result<()> {
        Cmd::new(WIMLIB)
            .arg("split")
            .arg_path(image)
            .arg_path(first_part)
            .arg(part_size_mib.to_string())
            .error_msg(format!("{} split failed", WIMLIB))
            .run_interactive()?;
        Ok(())
    }

    fn mount_rw(&self, image: &Path, index: u32, mount_point: &Path) -> Result<()> {
        Cmd::new(WIMLIB)
            .arg("mountrw")
            .arg_path(image)
            .arg(index.to_string())
            .arg_path(mount_point)
            .error_msg(format!("{} mountrw failed", WIMLIB))
            .run()?;
        Ok(())
    }

    fn unmount(&self, mount_point: &Path, commit: bool) -> Result<()> {
        let mut cmd = Cmd::new(WIMLIB).arg("unmount").arg_path(mount_point);
        if commit {
            cmd = cmd.arg("--commit");
        }
        cmd.error_msg(format!("{} unmount failed", WIMLIB)).run()?;
        Ok(())
    }
}

/// Parse the "Available Images" section of `wimlib-imagex info`.
pub fn parse_info(output: &str) -> Vec<IndexInfo> {
    let mut images = Vec::new();
    let mut current: Option<IndexInfo> = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Index" => {
                if let Some(done) = current.take() {
                    images.push(done);
                }
                if let Ok(index) = value.parse() {
                    current = Some(IndexInfo {
                        index,
                        name: String::new(),
                        total_bytes: 0,
                    });
                }
            }
            "Name" => {
                if let Some(info) = current.as_mut() {
                    info.name = value.to_string();
                }
            }
            "Total Bytes" => {
                if let Some(info) = current.as_mut() {
                    info.total_bytes = value
                        .split_whitespace()
                        .next()
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0);
                }
            }
            _ => {}
        }
    }
    if let Some(done) = current {
        images.push(done);
    }
    images
}
