//! Work directory management.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Prepare a work directory, removing it if it exists and creating it fresh.
pub fn prepare_work_dir(parent_dir: &Path, name: &str) -> Result<PathBuf> {
    let work_dir = parent_dir.join(name);

    // Clean up if it exists from a previous run
    if work_dir.exists() {
        fs::remove_dir_all(&work_dir)?;
    }
    fs::create_dir_all(&work_dir)?;

    Ok(work_dir)
}

/// Remove a work directory. Missing directories are fine.
pub fn cleanup_work_dir(path: &Path) {
    let _ = fs::remove_dir_all(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_work_dir_is_fresh() {
        let tmp = TempDir::new().unwrap();
        let first = prepare_work_dir(tmp.path(), "media").unwrap();
        fs::write(first.join("leftover"), "").unwrap();

        let second = prepare_work_dir(tmp.path(), "media").unwrap();
        assert_eq!(first, second);
        assert!(fs::read_dir(&second).unwrap().next().is_none());

        cleanup_work_dir(&second);
        assert!(!second.exists());
        cleanup_work_dir(&second);
    }
}
