//! Provisioning targets and their discovery from `lsblk`.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Whole block device; formatted before use.
    Device,
    /// Existing directory; the tree is copied into it as is.
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTarget {
    pub path: PathBuf,
    pub kind: TargetKind,
    pub removable: bool,
    pub size: u64,
    pub label: Option<String>,
    pub model: Option<String>,
}

impl MediaTarget {
    pub fn directory(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(Error::TargetSelection(format!(
                "{} is not an existing directory",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            kind: TargetKind::Directory,
            removable: false,
            size: 0,
            label: None,
            model: None,
        })
    }

    /// Pick `path` out of the eligible candidates. Directories are accepted
    /// directly; devices must be listed.
    pub fn select(path: &Path, candidates: &[MediaTarget]) -> Result<Self> {
        if path.is_dir() {
            return Self::directory(path);
        }
        candidates
            .iter()
            .find(|c| c.path == path)
            .cloned()
            .ok_or_else(|| {
                Error::TargetSelection(format!(
                    "{} is not an eligible device (system disk, not a disk, or missing)",
                    path.display()
                ))
            })
    }

    pub fn is_device(&self) -> bool {
        self.kind == TargetKind::Device
    }

    pub fn describe(&self) -> String {
        let size_gib = self.size as f64 / (1024.0 * 1024.0 * 1024.0);
        format!(
            "{:<16} {:>8.1} GiB  {:<9}  {}{}",
            self.path.display(),
            size_gib,
            if self.removable { "removable" } else { "internal" },
            self.model.as_deref().unwrap_or("-"),
            self.label
                .as_deref()
                .map(|l| format!(" [{}]", l))
                .unwrap_or_default()
        )
    }
}

/// First partition of `device`: `sdb` -> `sdb1`, `nvme0n1` -> `nvme0n1p1`.
pub fn partition_path(device: &Path) -> PathBuf {
    let name = device.to_string_lossy();
    if name.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p1", name))
    } else {
        PathBuf::from(format!("{}1", name))
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkNode>,
}

#[derive(Debug, Deserialize)]
struct LsblkNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    // Older util-linux prints "0"/"1" strings, newer prints booleans.
    #[serde(default)]
    rm: Value,
    #[serde(default)]
    size: Value,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<LsblkNode>,
}

impl LsblkNode {
    fn dev_path(&self) -> Option<String> {
        self.path
            .clone()
            .or_else(|| self.name.as_ref().map(|n| format!("/dev/{}", n)))
    }

    fn holds_system(&self, root_source: Option<&str>) -> bool {
        let is_root_mount = self.mountpoint.as_deref() == Some("/");
        let is_root_source = root_source.is_some() && self.dev_path().as_deref() == root_source;
        is_root_mount || is_root_source || self.children.iter().any(|c| c.holds_system(root_source))
    }

    fn collect_mounts(&self, out: &mut Vec<PathBuf>) {
        for child in &self.children {
            child.collect_mounts(out);
        }
        if let Some(mp) = self.mountpoint.as_deref().filter(|m| !m.is_empty() && *m != "[SWAP]") {
            out.push(PathBuf::from(mp));
        }
    }
}

fn value_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_u64() == Some(1),
        _ => false,
    }
}

fn value_u64(v: &Value) -> u64 {
    match v {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn parse(json: &str) -> Result<LsblkOutput> {
    serde_json::from_str(json)
        .map_err(|e| Error::TargetSelection(format!("cannot parse lsblk output: {}", e)))
}

/// Whole disks eligible as provisioning targets: everything except the disk
/// holding the running system (root mounted from it or `root_source` on it).
pub fn parse_candidates(lsblk_json: &str, root_source: Option<&str>) -> Result<Vec<MediaTarget>> {
    let output = parse(lsblk_json)?;
    let mut targets: Vec<MediaTarget> = output
        .blockdevices
        .iter()
        .filter(|d| d.kind.as_deref() == Some("disk"))
        .filter(|d| !d.holds_system(root_source))
        .filter_map(|d| {
            let size = value_u64(&d.size);
            if size == 0 {
                return None;
            }
            Some(MediaTarget {
                path: PathBuf::from(d.dev_path()?),
                kind: TargetKind::Device,
                removable: value_bool(&d.rm),
                size,
                label: d.label.clone(),
                model: d.model.as_ref().map(|m| m.trim().to_string()),
            })
        })
        .collect();
    targets.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(targets)
}

/// Mount points on a device and its partitions, innermost first.
pub fn parse_mount_points(lsblk_json: &str) -> Result<Vec<PathBuf>> {
    let output = parse(lsblk_json)?;
    let mut mounts = Vec::new();
    for node in &output.blockdevices {
        node.collect_mounts(&mut mounts);
    }
    Ok(mounts)
}
