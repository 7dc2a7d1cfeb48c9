//! Repacking the media tree as a UEFI-bootable ISO.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::common::files::resolve_ignore_case;
use crate::process::Cmd;

/// UEFI El Torito image shipped on Windows installer media.
pub const EFI_BOOT_IMAGE: &str = "efi/microsoft/boot/efisys.bin";

/// ISO9660 volume IDs are at most 32 characters.
const VOLUME_ID_MAX: usize = 32;

/// Build `iso` from `media_dir`. The El Torito UEFI entry is added when the
/// tree carries `efisys.bin`.
pub fn build_iso(media_dir: &Path, iso: &Path, volume_id: &str) -> Result<()> {
    if let Some(parent) = iso.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let volume_id: String = volume_id.chars().take(VOLUME_ID_MAX).collect();

    let mut cmd = Cmd::new("xorriso")
        .args(["-as", "mkisofs", "-iso-level", "3", "-udf", "-J", "-joliet-long", "-V"])
        .arg(&volume_id)
        .arg("-o")
        .arg_path(iso);

    match resolve_ignore_case(media_dir, Path::new(EFI_BOOT_IMAGE)) {
        Some(efi) => {
            let rel = efi.strip_prefix(media_dir).unwrap_or(&efi).to_string_lossy().into_owned();
            cmd = cmd
                .args(["-eltorito-alt-boot", "-e"])
                .arg(rel)
                .arg("-no-emul-boot");
        }
        None => tracing::warn!("{} not in media tree, ISO will not be UEFI bootable", EFI_BOOT_IMAGE),
    }

    cmd.arg_path(media_dir)
        .error_msg("xorriso failed")
        .run_interactive()?;
    Ok(())
}

/// SHA-256 of a file, lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write `<iso>.sha256` in `sha256sum` format. Returns its path.
pub fn write_checksum(iso: &Path) -> Result<PathBuf> {
    let sum = sha256_file(iso)?;
    let name = iso
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let path = iso.with_file_name(format!("{}.sha256", name));
    fs::write(&path, format!("{}  {}\n", sum, name))?;
    Ok(path)
}
