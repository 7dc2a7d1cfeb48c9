//! Vendor driver archive extraction.

use anyhow::Result;
use std::path::Path;

use crate::process::Cmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFamily {
    Zip,
    /// `.7z`, `.rar` and self-extracting `.exe` payloads.
    SevenZip,
    Cab,
    Msi,
    Tar,
}

const TAR_SUFFIXES: &[&str] = &[".tar.gz", ".tar.xz", ".tgz", ".txz", ".tar"];

impl ArchiveFamily {
    /// Classify by file name, ignoring case.
    pub fn classify(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if TAR_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            return Some(ArchiveFamily::Tar);
        }
        let ext = name.rsplit_once('.')?.1;
        match ext {
            "zip" => Some(ArchiveFamily::Zip),
            "7z" | "rar" | "exe" => Some(ArchiveFamily::SevenZip),
            "cab" => Some(ArchiveFamily::Cab),
            "msi" => Some(ArchiveFamily::Msi),
            _ => None,
        }
    }

    /// Tools able to unpack this family, preferred first.
    pub fn tools(self) -> &'static [&'static str] {
        match self {
            ArchiveFamily::Zip => &["unzip", "7z"],
            ArchiveFamily::SevenZip => &["7z"],
            ArchiveFamily::Cab => &["cabextract", "7z"],
            ArchiveFamily::Msi => &["msiextract", "7z"],
            ArchiveFamily::Tar => &["tar"],
        }
    }
}

/// File name without its archive suffix (`net.tar.gz` -> `net`).
pub fn archive_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_ascii_lowercase();
    for suffix in TAR_SUFFIXES {
        if lower.ends_with(suffix) {
            return name[..name.len() - suffix.len()].to_string();
        }
    }
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

/// Unpacks one archive with one named tool.
pub trait ArchiveExtractor {
    fn extract(&self, tool: &str, archive: &Path, dest: &Path) -> Result<()>;
}

/// Runs the host extraction tools.
pub struct SystemExtractor;

impl ArchiveExtractor for SystemExtractor {
    fn extract(&self, tool: &str, archive: &Path, dest: &Path) -> Result<()> {
        let cmd = match tool {
            "unzip" => Cmd::new("unzip").args(["-o", "-q"]).arg_path(archive).arg("-d").arg_path(dest),
            "7z" => Cmd::new("7z")
                .args(["x", "-y"])
                .arg(format!("-o{}", dest.display()))
                .arg_path(archive),
            "cabextract" => Cmd::new("cabextract").args(["-q", "-d"]).arg_path(dest).arg_path(archive),
            "msiextract" => Cmd::new("msiextract").arg("-C").arg_path(dest).arg_path(archive),
            "tar" => Cmd::new("tar").arg("-xf").arg_path(archive).arg("-C").arg_path(dest),
            other => anyhow::bail!("no extraction recipe for '{}'", other),
        };
        cmd.error_msg(format!("{} could not extract {}", tool, archive.display()))
            .run()?;
        Ok(())
    }
}
