//! Install image containers and the format/size normalisation around them.
//!
//! A Windows installer carries its OS image as `sources/install.esd` (solid,
//! read-only), `sources/install.wim`, or a split set `install.swm`,
//! `install2.swm`, ... The pipeline needs a WIM to service and, for FAT32
//! media, a split set when the WIM exceeds the 4 GiB file-size ceiling.

mod convert;
mod wimlib;

pub use convert::{discover_split_set, ImageConverter};
pub use wimlib::{parse_info, ImageTool, WimlibTool};

use std::path::{Path, PathBuf};

use crate::common::files::resolve_ignore_case;
use crate::error::{Error, Result};

pub const MIB: u64 = 1024 * 1024;

/// Largest file FAT32 can hold: 4 GiB - 1 byte.
pub const FAT32_CEILING: u64 = 4 * 1024 * MIB - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Solid-compressed, as distributed. Cannot be mounted read-write.
    Esd,
    Wim,
    /// One part of a split set.
    Swm,
}

impl ImageFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "esd" => Some(ImageFormat::Esd),
            "wim" => Some(ImageFormat::Wim),
            "swm" => Some(ImageFormat::Swm),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Esd => "esd",
            ImageFormat::Wim => "wim",
            ImageFormat::Swm => "swm",
        }
    }
}

/// Metadata for one index inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub index: u32,
    pub name: String,
    pub total_bytes: u64,
}

/// One on-disk image archive.
#[derive(Debug, Clone)]
pub struct ImageContainer {
    /// The container file; the first part for a split set.
    pub path: PathBuf,
    pub format: ImageFormat,
    /// All parts in order. Just `path` unless split.
    pub parts: Vec<PathBuf>,
    pub indices: Vec<IndexInfo>,
}

impl ImageContainer {
    /// Probe `path` with `tool` and record its index metadata.
    pub fn open(tool: &dyn ImageTool, path: &Path) -> Result<Self> {
        let format = ImageFormat::from_path(path).ok_or_else(|| {
            Error::SourceImage(format!("{} is not a .wim, .esd or .swm file", path.display()))
        })?;
        if !path.is_file() {
            return Err(Error::SourceImage(format!("{} does not exist", path.display())));
        }

        let indices = tool
            .info(path)
            .map_err(|e| Error::SourceImage(format!("{}: {:#}", path.display(), e)))?;
        if indices.is_empty() {
            return Err(Error::SourceImage(format!("{} contains no images", path.display())));
        }

        let parts = if format == ImageFormat::Swm {
            discover_split_set(path)?
        } else {
            vec![path.to_path_buf()]
        };

        Ok(Self {
            path: path.to_path_buf(),
            format,
            parts,
            indices,
        })
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn has_index(&self, index: u32) -> bool {
        self.indices.iter().any(|i| i.index == index)
    }

    pub fn is_split(&self) -> bool {
        self.format == ImageFormat::Swm
    }

    /// Combined on-disk size of every part.
    pub fn size_on_disk(&self) -> u64 {
        self.parts
            .iter()
            .filter_map(|p| p.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}

/// When and how to split a container for a size-limited filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPolicy {
    pub ceiling_bytes: u64,
    pub margin_bytes: u64,
}

impl SplitPolicy {
    /// FAT32 ceiling with `margin_mib` of headroom. A zero margin falls
    /// back to the default; split parts may overshoot their nominal size.
    pub fn fat32(margin_mib: u64) -> Self {
        let margin_mib = if margin_mib == 0 {
            crate::config::DEFAULT_SPLIT_MARGIN_MIB
        } else {
            margin_mib
        };
        Self {
            ceiling_bytes: FAT32_CEILING,
            margin_bytes: margin_mib * MIB,
        }
    }

    /// Nominal part size passed to the split tool, in MiB.
    pub fn part_size_mib(&self) -> u64 {
        (self.ceiling_bytes.saturating_sub(self.margin_bytes) / MIB).max(1)
    }

    pub fn needs_split(&self, size: u64) -> bool {
        size > self.ceiling_bytes
    }

    pub fn fits(&self, size: u64) -> bool {
        size <= self.ceiling_bytes
    }
}

/// Find the install image under an installer tree's `sources/` directory.
///
/// Preference order: WIM, ESD, first part of a split set.
pub fn locate_install_image(media_dir: &Path) -> Result<PathBuf> {
    let sources = resolve_ignore_case(media_dir, Path::new("sources")).ok_or_else(|| {
        Error::SourceImage(format!("{} has no sources directory", media_dir.display()))
    })?;
    for name in ["install.wim", "install.esd", "install.swm"] {
        if let Some(path) = resolve_ignore_case(&sources, Path::new(name)) {
            return Ok(path);
        }
    }
    Err(Error::SourceImage(format!(
        "no install.wim, install.esd or install.swm in {}",
        sources.display()
    )))
}

/// Locate `sources/boot.wim`.
pub fn locate_boot_image(media_dir: &Path) -> Option<PathBuf> {
    resolve_ignore_case(media_dir, Path::new("sources/boot.wim"))
}
