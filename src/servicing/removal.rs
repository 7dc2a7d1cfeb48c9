//! Applying removal directives to a mounted tree.

use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

use crate::common::files::resolve_ignore_case;
use crate::preset::RemovalDirective;

/// How many filesystem objects one directive removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub directive: RemovalDirective,
    pub removed: usize,
}

/// Apply `directives` in order under `root`.
///
/// Name tokens are matched against the tree as it stands after the previous
/// directive, so earlier removals can change what later ones match.
pub fn apply_directives(root: &Path, directives: &[RemovalDirective]) -> io::Result<Vec<RemovalOutcome>> {
    let mut outcomes = Vec::with_capacity(directives.len());
    for directive in directives {
        let removed = match directive {
            RemovalDirective::ExplicitPath(rel) => remove_explicit(root, rel)?,
            RemovalDirective::NameToken(token) => remove_matching_dirs(root, token)?,
        };
        tracing::debug!(%directive, removed, "directive applied");
        outcomes.push(RemovalOutcome {
            directive: directive.clone(),
            removed,
        });
    }
    Ok(outcomes)
}

fn remove_explicit(root: &Path, rel: &Path) -> io::Result<usize> {
    let Some(path) = resolve_ignore_case(root, rel) else {
        return Ok(0);
    };
    // Never follow a symlink out of the tree.
    let meta = fs::symlink_metadata(&path)?;
    if meta.is_dir() {
        fs::remove_dir_all(&path)?;
    } else {
        fs::remove_file(&path)?;
    }
    Ok(1)
}

/// Remove every directory whose name contains `token` (ASCII case-insensitive).
/// A match's subtree is not descended into, so nested matches count once.
fn remove_matching_dirs(root: &Path, token: &str) -> io::Result<usize> {
    let needle = token.to_ascii_lowercase();
    let mut matches = Vec::new();

    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if entry.file_name().to_string_lossy().to_ascii_lowercase().contains(&needle) {
            matches.push(entry.into_path());
            walker.skip_current_dir();
        }
    }

    for dir in &matches {
        fs::remove_dir_all(dir)?;
    }
    Ok(matches.len())
}
