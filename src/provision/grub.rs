//! GRUB menu entries for chainloading the installer.
//!
//! Entries live in one `/etc/grub.d` fragment. Regenerating `grub.cfg` is
//! left to the operator (`grub-mkconfig` / `update-grub`).

use std::fs;
use std::path::{Path, PathBuf};

use crate::common::files::write_file_mode;
use crate::common::mounts;
use crate::error::{Error, Result};

/// Fragment header: `grub-mkconfig` runs the file and `tail` emits the rest.
pub const FRAGMENT_HEADER: &str = "#!/bin/sh\nexec tail -n +3 $0\n";

pub const ISO_ENTRY_TITLE: &str = "Windows Installer (ISO)";
pub const PARTITION_ENTRY_TITLE: &str = "Windows Installer";

/// Entry that loop-mounts an ISO file and chainloads its EFI loader.
/// `iso_on_fs` is the ISO's path relative to the root of its filesystem.
pub fn iso_entry(title: &str, iso_on_fs: &str) -> String {
    format!(
        "menuentry \"{title}\" {{\n\
         \tinsmod part_gpt\n\
         \tinsmod part_msdos\n\
         \tinsmod ext2\n\
         \tinsmod ntfs\n\
         \tinsmod iso9660\n\
         \tinsmod chain\n\
         \tsearch --no-floppy --set=root --file {iso}\n\
         \tloopback loop {iso}\n\
         \tchainloader (loop)/efi/boot/bootx64.efi\n\
         }}\n",
        title = title,
        iso = iso_on_fs
    )
}

/// Entry that finds a FAT volume by label and chainloads its EFI loader.
pub fn label_entry(title: &str, label: &str) -> String {
    format!(
        "menuentry \"{title}\" {{\n\
         \tinsmod part_msdos\n\
         \tinsmod fat\n\
         \tinsmod chain\n\
         \tsearch --no-floppy --set=root --label {label}\n\
         \tchainloader /efi/boot/bootx64.efi\n\
         }}\n",
        title = title,
        label = label
    )
}

/// Write `entry` into `fragment`, replacing an entry with the same title in
/// place or appending it.
pub fn install_entry(fragment: &Path, title: &str, entry: &str) -> Result<()> {
    let existing = match fs::read_to_string(fragment) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(Error::BootConfigFailed(format!(
                "cannot read {}: {}",
                fragment.display(),
                e
            )))
        }
    };
    let content = merge_entry(&existing, title, entry);
    write_file_mode(fragment, content, 0o755).map_err(|e| {
        Error::BootConfigFailed(format!("cannot write {}: {:#}", fragment.display(), e))
    })?;
    tracing::info!(fragment = %fragment.display(), title, "GRUB entry written");
    Ok(())
}

fn merge_entry(existing: &str, title: &str, entry: &str) -> String {
    let opener = format!("menuentry \"{}\"", title);
    let mut out = String::new();
    if !existing.starts_with(FRAGMENT_HEADER) {
        out.push_str(FRAGMENT_HEADER);
    }

    let mut replaced = false;
    let mut skipping = false;
    for line in existing.lines() {
        if skipping {
            if line == "}" {
                skipping = false;
            }
            continue;
        }
        if line.starts_with(&opener) {
            if !replaced {
                out.push_str(entry);
                replaced = true;
            }
            skipping = true;
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !replaced {
        out.push_str(entry);
    }
    out
}

/// Path of `path` relative to the root of the filesystem it lives on,
/// given the host's mount points. GRUB's `search --file` needs that form.
pub fn path_on_filesystem(path: &Path, mount_points: &[PathBuf]) -> String {
    let best = mount_points
        .iter()
        .filter(|m| path.starts_with(m))
        .max_by_key(|m| m.components().count());
    let rel = match best {
        Some(m) => path.strip_prefix(m).unwrap_or(path),
        None => path.strip_prefix("/").unwrap_or(path),
    };
    format!("/{}", rel.to_string_lossy().trim_start_matches('/'))
}

/// [`path_on_filesystem`] against the live mount table.
pub fn host_path_on_filesystem(path: &Path) -> String {
    path_on_filesystem(path, &mounts::mount_points())
}
