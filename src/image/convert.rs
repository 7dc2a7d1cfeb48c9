//! ESD/SWM to WIM conversion and size-driven splitting.

use std::fs;
use std::path::{Path, PathBuf};

use super::{ImageContainer, ImageFormat, ImageTool, SplitPolicy};
use crate::error::{Error, Result};

pub struct ImageConverter<'a> {
    tool: &'a dyn ImageTool,
    policy: SplitPolicy,
}

impl<'a> ImageConverter<'a> {
    pub fn new(tool: &'a dyn ImageTool, policy: SplitPolicy) -> Self {
        Self { tool, policy }
    }

    /// Make the container mountable read-write and small enough for the
    /// target filesystem.
    pub fn ensure_serviceable(&self, container: ImageContainer) -> Result<ImageContainer> {
        let converted = self.convert(container)?;
        self.fit_to_ceiling(converted)
    }

    /// Export an ESD (or a split set) into a single WIM next to it. The
    /// source is deleted once the WIM has been read back successfully.
    pub fn convert(&self, container: ImageContainer) -> Result<ImageContainer> {
        if container.format == ImageFormat::Wim {
            return Ok(container);
        }

        let src = container.path.clone();
        let failed = |reason: String| Error::ConversionFailed {
            image: src.clone(),
            reason,
        };

        let stem = src
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| failed("file name is not valid UTF-8".to_string()))?;
        let dest = src.with_file_name(format!("{}.{}", stem, ImageFormat::Wim.extension()));
        if dest.exists() {
            return Err(failed(format!("{} already exists", dest.display())));
        }

        println!("  Converting {} to WIM...", src.display());
        if let Err(e) = self.tool.export_all(&src, &dest) {
            let _ = fs::remove_file(&dest);
            return Err(failed(format!("{:#}", e)));
        }

        let converted = match ImageContainer::open(self.tool, &dest) {
            Ok(c) => c,
            Err(e) => {
                let _ = fs::remove_file(&dest);
                return Err(failed(format!("exported image is unreadable: {}", e)));
            }
        };
        if converted.index_count() != container.index_count() {
            let _ = fs::remove_file(&dest);
            return Err(failed(format!(
                "exported {} of {} images",
                converted.index_count(),
                container.index_count()
            )));
        }

        for part in &container.parts {
            fs::remove_file(part)?;
        }
        tracing::info!(
            from = %src.display(),
            to = %dest.display(),
            images = converted.index_count(),
            "image converted"
        );
        Ok(converted)
    }

    /// Split the container if it exceeds the ceiling. The unsplit file is
    /// removed only once every part has been verified.
    pub fn fit_to_ceiling(&self, container: ImageContainer) -> Result<ImageContainer> {
        if container.is_split() {
            self.verify_parts(&container.path, &container.parts)?;
            return Ok(container);
        }

        let size = fs::metadata(&container.path)?.len();
        if !self.policy.needs_split(size) {
            tracing::debug!(size, ceiling = self.policy.ceiling_bytes, "image fits, not splitting");
            return Ok(container);
        }
        if container.format != ImageFormat::Wim {
            return Err(Error::SplitFailed {
                image: container.path,
                reason: "only WIM images can be split; convert first".to_string(),
            });
        }

        let first_part = container.path.with_extension(ImageFormat::Swm.extension());
        println!(
            "  Splitting {} ({} MiB) into {} MiB parts...",
            container.path.display(),
            size / super::MIB,
            self.policy.part_size_mib()
        );
        if let Err(e) = self
            .tool
            .split(&container.path, &first_part, self.policy.part_size_mib())
        {
            remove_parts(&first_part);
            return Err(Error::SplitFailed {
                image: container.path,
                reason: format!("{:#}", e),
            });
        }

        let parts = match discover_split_set(&first_part)
            .and_then(|parts| self.verify_parts(&container.path, &parts).map(|_| parts))
        {
            Ok(parts) => parts,
            Err(e) => {
                remove_parts(&first_part);
                return Err(e);
            }
        };

        fs::remove_file(&container.path)?;
        tracing::info!(parts = parts.len(), "image split");

        Ok(ImageContainer {
            path: first_part,
            format: ImageFormat::Swm,
            parts,
            indices: container.indices,
        })
    }

    fn verify_parts(&self, image: &Path, parts: &[PathBuf]) -> Result<()> {
        let failed = |reason: String| Error::SplitFailed {
            image: image.to_path_buf(),
            reason,
        };
        if parts.is_empty() {
            return Err(failed("no parts were written".to_string()));
        }
        for part in parts {
            let len = fs::metadata(part)
                .map_err(|e| failed(format!("{}: {}", part.display(), e)))?
                .len();
            if len == 0 {
                return Err(failed(format!("{} is empty", part.display())));
            }
            if !self.policy.fits(len) {
                return Err(failed(format!(
                    "{} is {} bytes, over the {} byte ceiling",
                    part.display(),
                    len,
                    self.policy.ceiling_bytes
                )));
            }
        }
        Ok(())
    }
}

/// All parts of the split set whose first part is `first_part`, ordered
/// numerically (`install.swm`, `install2.swm`, ..., `install10.swm`).
pub fn discover_split_set(first_part: &Path) -> Result<Vec<PathBuf>> {
    let failed = |reason: String| Error::SplitFailed {
        image: first_part.to_path_buf(),
        reason,
    };
    let dir = first_part.parent().unwrap_or_else(|| Path::new("."));
    let stem = first_part
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| failed("file name is not valid UTF-8".to_string()))?
        .to_ascii_lowercase();

    let mut numbered = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if ImageFormat::from_path(&path) != Some(ImageFormat::Swm) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let name = name.to_ascii_lowercase();
        let Some(suffix) = name.strip_prefix(&stem) else {
            continue;
        };
        let number = if suffix.is_empty() {
            1
        } else {
            match suffix.parse::<u32>() {
                Ok(n) if n >= 2 => n,
                _ => continue,
            }
        };
        numbered.push((number, path));
    }
    numbered.sort_by_key(|(n, _)| *n);

    for (expected, (number, _)) in (1u32..).zip(&numbered) {
        if *number != expected {
            return Err(failed(format!("part {} is missing", expected)));
        }
    }
    if numbered.is_empty() {
        return Err(failed(format!("{} not found", first_part.display())));
    }
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

fn remove_parts(first_part: &Path) {
    if let Ok(parts) = discover_split_set(first_part) {
        for part in parts {
            let _ = fs::remove_file(part);
        }
    } else {
        let _ = fs::remove_file(first_part);
    }
}
