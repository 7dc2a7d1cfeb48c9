//! The working copy of the installer tree.
//!
//! Every later stage edits this copy; the source ISO or directory is never
//! touched.

use std::path::{Path, PathBuf};

use crate::common::{copy_dir_recursive, prepare_work_dir};
use crate::error::{Error, Result};
use crate::image;
use crate::process::Cmd;

/// Unpack `source` (installer ISO or extracted tree) into `media_dir`,
/// replacing whatever a previous run left there.
pub fn prepare_media(source: &Path, media_dir: &Path) -> Result<()> {
    let parent = media_dir.parent().unwrap_or_else(|| Path::new("."));
    let name = media_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());

    let (src_abs, media_abs) = (resolved(source), resolved(media_dir));
    if src_abs.starts_with(&media_abs) || media_abs.starts_with(&src_abs) {
        return Err(Error::SourceImage(format!(
            "{} overlaps the working copy {}; point --source at the original installer",
            source.display(),
            media_dir.display()
        )));
    }

    if source.is_dir() {
        prepare_work_dir(parent, &name).map_err(into_source)?;
        println!("Copying installer tree from {}...", source.display());
        copy_dir_recursive(source, media_dir).map_err(into_source)?;
    } else if is_iso(source) {
        prepare_work_dir(parent, &name).map_err(into_source)?;
        println!("Extracting {} with 7z...", source.display());
        Cmd::new("7z")
            .args(["x", "-y"])
            .arg_path(source)
            .arg(format!("-o{}", media_dir.display()))
            .error_msg("7z extraction failed. Install p7zip")
            .run_interactive()
            .map_err(into_source)?;
    } else {
        return Err(Error::SourceImage(format!(
            "{} is neither an installer ISO nor a directory",
            source.display()
        )));
    }

    let install = image::locate_install_image(media_dir)?;
    tracing::info!(install = %install.display(), "media tree ready");
    Ok(())
}

/// Canonical form of `path`, or of its nearest existing ancestor with the
/// rest appended when it does not exist yet.
fn resolved(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => resolved(parent).join(name),
        _ => path.to_path_buf(),
    }
}

fn is_iso(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("iso"))
}

fn into_source(e: anyhow::Error) -> Error {
    Error::SourceImage(format!("{:#}", e))
}
