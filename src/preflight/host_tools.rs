//! Host tool availability checks.

use crate::process;

use super::types::{CheckResult, FailureCause};

/// Tools the pipeline cannot run without: (tool, package, purpose).
pub const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("wimlib-imagex", "wimlib-utils", "Required to convert, split and mount install images"),
    ("7z", "p7zip", "Required to extract the installer ISO"),
    ("sfdisk", "util-linux", "Required to partition the target device"),
    ("mkfs.vfat", "dosfstools", "Required to format the target partition"),
    ("lsblk", "util-linux", "Required to list target devices"),
    ("findmnt", "util-linux", "Required to identify the system disk"),
    ("mount", "util-linux", "Required to mount the target partition"),
    ("umount", "util-linux", "Required to release mounts"),
    ("xorriso", "xorriso", "Required for chainload ISO mode"),
];

/// Tools whose absence only degrades a best-effort step.
pub const OPTIONAL_TOOLS: &[(&str, &str, &str)] = &[
    ("unzip", "unzip", "Extracts .zip driver packages (7z is the fallback)"),
    ("cabextract", "cabextract", "Extracts .cab driver packages (7z is the fallback)"),
    ("msiextract", "msitools", "Extracts .msi driver packages (7z is the fallback)"),
    ("tar", "tar", "Extracts .tar driver packages"),
    ("hivexregedit", "hivex", "Applies the hardware requirement bypass"),
];

/// Check host tools are installed.
pub fn check_host_tools() -> Vec<CheckResult> {
    let mut results = Vec::new();

    for (tool, package, purpose) in REQUIRED_TOOLS {
        results.push(check_tool_exists(tool, package, purpose, true));
    }
    for (tool, package, purpose) in OPTIONAL_TOOLS {
        results.push(check_tool_exists(tool, package, purpose, false));
    }

    results
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg).with_cause(FailureCause::MissingTool {
                    tool: tool.to_string(),
                    package: package.to_string(),
                })
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}
