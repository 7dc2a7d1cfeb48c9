//! Typed failures for the media pipeline.
//!
//! Every fatal error belongs to one [`ErrorClass`], which decides the process
//! exit code, and carries a remediation hint the CLI prints under the message.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse failure classes exposed through the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    MissingDependency,
    InsufficientSpace,
    ImageOperation,
    BootConfiguration,
    PermissionDenied,
    Provisioning,
    InvalidInput,
}

impl ErrorClass {
    /// Exit code reported to the shell for this class.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::MissingDependency => 10,
            ErrorClass::InsufficientSpace => 11,
            ErrorClass::ImageOperation => 12,
            ErrorClass::BootConfiguration => 13,
            ErrorClass::PermissionDenied => 14,
            ErrorClass::Provisioning => 15,
            ErrorClass::InvalidInput => 16,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("removal profile '{name}' not found at {}", path.display())]
    ProfileNotFound { name: String, path: PathBuf },

    #[error("override file not found: {}", .0.display())]
    OverrideNotFound(PathBuf),

    #[error("removal profile include cycle: {}", chain.join(" -> "))]
    ProfileCycle { chain: Vec<String> },

    #[error("required host tool '{tool}' is missing (package: {package})")]
    MissingTool { tool: String, package: String },

    #[error("preflight failed: {0}")]
    Preflight(String),

    #[error(
        "insufficient space in {}: {} MiB free, {} MiB needed",
        path.display(),
        available / (1024 * 1024),
        needed / (1024 * 1024)
    )]
    InsufficientSpace {
        path: PathBuf,
        needed: u64,
        available: u64,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("source image not usable: {0}")]
    SourceImage(String),

    #[error("failed to convert {} to a mountable image: {reason}", image.display())]
    ConversionFailed { image: PathBuf, reason: String },

    #[error("failed to split {}: {reason}", image.display())]
    SplitFailed { image: PathBuf, reason: String },

    #[error("failed to mount index {index} of {} at {}: {reason}", image.display(), mount_point.display())]
    MountFailed {
        image: PathBuf,
        index: u32,
        mount_point: PathBuf,
        reason: String,
    },

    #[error("failed to commit changes from {}: {reason}", mount_point.display())]
    CommitFailed { mount_point: PathBuf, reason: String },

    #[error("failed to release {}: {reason}", path.display())]
    ReleaseFailed { path: PathBuf, reason: String },

    #[error("startup script not found in boot image mounted at {}", .0.display())]
    StartupScriptMissing(PathBuf),

    #[error("no target selected: {0}")]
    TargetSelection(String),

    #[error("confirmation '{given}' does not match target device {}", device.display())]
    ConfirmationRejected { device: PathBuf, given: String },

    #[error("failed to partition {}: {reason}", device.display())]
    PartitionFailed { device: PathBuf, reason: String },

    #[error("failed to format {}: {reason}", partition.display())]
    FormatFailed { partition: PathBuf, reason: String },

    #[error("failed to copy media tree to {}: {reason}", dest.display())]
    CopyFailed { dest: PathBuf, reason: String },

    #[error("boot configuration failed: {0}")]
    BootConfigFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::ProfileNotFound { .. }
            | Error::OverrideNotFound(_)
            | Error::ProfileCycle { .. }
            | Error::TargetSelection(_)
            | Error::ConfirmationRejected { .. } => ErrorClass::InvalidInput,
            Error::MissingTool { .. } | Error::Preflight(_) => ErrorClass::MissingDependency,
            Error::InsufficientSpace { .. } => ErrorClass::InsufficientSpace,
            Error::PermissionDenied(_) => ErrorClass::PermissionDenied,
            Error::SourceImage(_)
            | Error::ConversionFailed { .. }
            | Error::SplitFailed { .. }
            | Error::MountFailed { .. }
            | Error::CommitFailed { .. }
            | Error::ReleaseFailed { .. }
            | Error::StartupScriptMissing(_)
            | Error::Io(_) => ErrorClass::ImageOperation,
            Error::PartitionFailed { .. } | Error::FormatFailed { .. } | Error::CopyFailed { .. } => {
                ErrorClass::Provisioning
            }
            Error::BootConfigFailed(_) => ErrorClass::BootConfiguration,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }

    /// Concrete next action for the operator.
    pub fn hint(&self) -> String {
        match self {
            Error::ProfileNotFound { .. } => {
                "Run 'winmedia presets' to list available profiles, or set WINMEDIA_PRESETS_DIR."
                    .to_string()
            }
            Error::OverrideNotFound(_) => "Check the path passed to --override.".to_string(),
            Error::ProfileCycle { .. } => {
                "Remove one of the 'include' lines that closes the cycle.".to_string()
            }
            Error::MissingTool { package, .. } => {
                format!("Install '{}' and re-run 'winmedia preflight'.", package)
            }
            Error::Preflight(_) => "Re-run 'winmedia preflight' and fix the failed checks.".to_string(),
            Error::InsufficientSpace { .. } => {
                "Free disk space or point WINMEDIA_WORK_DIR at a larger filesystem.".to_string()
            }
            Error::PermissionDenied(_) => "Re-run as root (mounting and formatting need it).".to_string(),
            Error::SourceImage(_) | Error::ConversionFailed { .. } => {
                "The source image is likely corrupt or incomplete. Re-download it and verify its checksum."
                    .to_string()
            }
            Error::SplitFailed { .. } => {
                "Check free space in the work directory, then re-run the build.".to_string()
            }
            Error::MountFailed { .. } | Error::CommitFailed { .. } | Error::ReleaseFailed { .. } => {
                "Run 'winmedia clean' to release stale mounts, then re-run the build.".to_string()
            }
            Error::StartupScriptMissing(_) => {
                "Pass the setup image index with --boot-index (usually 2).".to_string()
            }
            Error::TargetSelection(_) => {
                "Run 'winmedia provision targets' to list eligible devices.".to_string()
            }
            Error::ConfirmationRejected { device, .. } => format!(
                "Retype the device path exactly: --confirm {}",
                device.display()
            ),
            Error::PartitionFailed { .. } | Error::FormatFailed { .. } => {
                "Make sure nothing holds the device open (file managers, automounters) and retry."
                    .to_string()
            }
            Error::CopyFailed { .. } => {
                "Check the device for hardware errors and that it is large enough.".to_string()
            }
            Error::BootConfigFailed(_) => {
                "Check that the GRUB fragment path is writable, or use --bootloader firmware."
                    .to_string()
            }
            Error::Io(_) => "Check permissions and free space in the work directory.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let classes = [
            ErrorClass::MissingDependency,
            ErrorClass::InsufficientSpace,
            ErrorClass::ImageOperation,
            ErrorClass::BootConfiguration,
            ErrorClass::PermissionDenied,
            ErrorClass::Provisioning,
            ErrorClass::InvalidInput,
        ];
        let mut codes: Vec<i32> = classes.iter().map(|c| c.exit_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), classes.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_commit_failure_is_image_operation() {
        let err = Error::CommitFailed {
            mount_point: PathBuf::from("/tmp/mnt"),
            reason: "busy".into(),
        };
        assert_eq!(err.class(), ErrorClass::ImageOperation);
        assert_eq!(err.exit_code(), 12);
        assert!(err.to_string().contains("/tmp/mnt"));
    }

    #[test]
    fn test_confirmation_hint_names_device() {
        let err = Error::ConfirmationRejected {
            device: PathBuf::from("/dev/sdb"),
            given: "/dev/sd".into(),
        };
        assert!(err.hint().contains("--confirm /dev/sdb"));
        assert_eq!(err.class(), ErrorClass::InvalidInput);
    }

    #[test]
    fn test_space_message_in_mib() {
        let err = Error::InsufficientSpace {
            path: PathBuf::from("/work"),
            needed: 2048 * 1024 * 1024,
            available: 1024 * 1024 * 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("1024 MiB free"));
        assert!(msg.contains("2048 MiB needed"));
    }
}
