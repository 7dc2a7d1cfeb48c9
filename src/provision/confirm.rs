//! The confirmation gate in front of every destructive disk operation.

use super::target::{MediaTarget, TargetKind};
use crate::error::{Error, Result};

/// A device the operator has confirmed by retyping its path.
///
/// Partitioning and formatting take this type, and the only way to build one
/// is [`ConfirmedTarget::confirm`].
#[derive(Debug)]
pub struct ConfirmedTarget {
    target: MediaTarget,
}

impl ConfirmedTarget {
    /// Accept `target` only if `confirmation` is exactly its device path.
    pub fn confirm(target: MediaTarget, confirmation: &str) -> Result<Self> {
        if !target.is_device() {
            return Err(Error::TargetSelection(format!(
                "{} is a directory; there is nothing to format",
                target.path.display()
            )));
        }
        if target.path.to_str() != Some(confirmation) {
            return Err(Error::ConfirmationRejected {
                device: target.path,
                given: confirmation.to_string(),
            });
        }
        tracing::info!(device = %target.path.display(), "destructive operation confirmed");
        Ok(Self { target })
    }

    pub fn target(&self) -> &MediaTarget {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn usb() -> MediaTarget {
        MediaTarget {
            path: PathBuf::from("/dev/sdb"),
            kind: TargetKind::Device,
            removable: true,
            size: 32 << 30,
            label: None,
            model: None,
        }
    }

    #[test]
    fn test_exact_match_only() {
        assert!(ConfirmedTarget::confirm(usb(), "/dev/sdb").is_ok());
        for wrong in ["/dev/sd", "/dev/sdb1", "/dev/SDB", " /dev/sdb", "/dev/sdb ", "yes", ""] {
            assert!(
                matches!(
                    ConfirmedTarget::confirm(usb(), wrong),
                    Err(Error::ConfirmationRejected { .. })
                ),
                "'{}' must be rejected",
                wrong
            );
        }
    }
}
