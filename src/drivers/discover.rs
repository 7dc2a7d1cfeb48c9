//! Driver root discovery.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directories that directly contain a `.inf` file, in first-seen order
/// across `search_dirs`. Each root appears once even when reachable twice.
pub fn find_driver_roots(search_dirs: &[&Path]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut roots = Vec::new();

    for dir in search_dirs {
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || !is_inf(entry.path()) {
                continue;
            }
            let Some(parent) = entry.path().parent() else {
                continue;
            };
            let canonical = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
            if seen.insert(canonical) {
                roots.push(parent.to_path_buf());
            }
        }
    }
    roots
}

fn is_inf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("inf"))
}
