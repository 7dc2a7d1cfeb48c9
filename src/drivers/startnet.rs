//! WinPE startup script rewrite.

use std::fs;
use std::path::{Path, PathBuf};

use crate::common::files::{find_child_ignore_case, resolve_ignore_case};
use crate::error::{Error, Result};

pub const STARTNET: &str = "Windows/System32/startnet.cmd";
pub const BACKUP_SUFFIX: &str = ".orig";

/// Directory under the media root holding staged driver sets.
pub const STAGING_DIR: &str = "$WinPEDriver$";

/// Drive letters probed for the staging directory. X: is the WinPE RAM disk.
const DRIVE_LETTERS: &str = "C D E F G H I J K L M N O P Q R S T U V W Y Z";

/// Startup script (CRLF) that loads every staged driver, then starts Setup.
pub fn startnet_script() -> String {
    let lines = [
        "@echo off".to_string(),
        "wpeinit".to_string(),
        format!("for %%d in ({}) do (", DRIVE_LETTERS),
        format!("    if exist \"%%d:\\{}\" (", STAGING_DIR),
        format!("        for /r \"%%d:\\{}\" %%f in (*.inf) do (", STAGING_DIR),
        "            drvload \"%%f\"".to_string(),
        "        )".to_string(),
        "    )".to_string(),
        ")".to_string(),
        "X:\\sources\\setup.exe".to_string(),
    ];
    let mut script = lines.join("\r\n");
    script.push_str("\r\n");
    script
}

/// Back up the mounted image's `startnet.cmd` (once) and replace it.
/// Returns the rewritten script's path.
pub fn rewrite_startnet(root: &Path) -> Result<PathBuf> {
    let script = resolve_ignore_case(root, Path::new(STARTNET))
        .filter(|p| p.is_file())
        .ok_or_else(|| Error::StartupScriptMissing(root.to_path_buf()))?;

    let dir = script.parent().unwrap_or(root);
    let name = script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let backup_name = format!("{}{}", name, BACKUP_SUFFIX);

    if find_child_ignore_case(dir, &backup_name).is_none() {
        fs::copy(&script, dir.join(&backup_name))?;
        tracing::debug!(backup = %backup_name, "startnet.cmd backed up");
    }

    fs::write(&script, startnet_script())?;
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::write_file_with_dirs;
    use tempfile::TempDir;

    #[test]
    fn test_script_is_crlf() {
        let script = startnet_script();
        assert!(script.starts_with("@echo off\r\nwpeinit\r\n"));
        assert!(script.ends_with("X:\\sources\\setup.exe\r\n"));
        assert!(!script.replace("\r\n", "").contains('\n'));
        assert!(script.contains("drvload"));
        assert!(!script.contains(" X "));
    }

    #[test]
    fn test_backup_made_once() {
        let tmp = TempDir::new().unwrap();
        write_file_with_dirs(tmp.path().join("Windows/System32/StartNet.cmd"), "wpeinit\r\n").unwrap();

        let script = rewrite_startnet(tmp.path()).unwrap();
        rewrite_startnet(tmp.path()).unwrap();

        let backup = tmp.path().join("Windows/System32/StartNet.cmd.orig");
        assert_eq!(fs::read_to_string(backup).unwrap(), "wpeinit\r\n");
        assert_eq!(fs::read_to_string(script).unwrap(), startnet_script());
    }

    #[test]
    fn test_missing_script() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(rewrite_startnet(tmp.path()), Err(Error::StartupScriptMissing(_))));
    }
}
