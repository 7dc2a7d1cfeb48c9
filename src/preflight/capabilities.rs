//! Optional host tools, detected once per run and passed down explicitly.

use crate::process;

/// Which optional tools are usable on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub unzip: bool,
    pub sevenzip: bool,
    pub cabextract: bool,
    pub msiextract: bool,
    pub tar: bool,
    pub hivexregedit: bool,
}

impl Capabilities {
    pub fn detect() -> Self {
        let caps = Self {
            unzip: process::exists("unzip"),
            sevenzip: process::exists("7z"),
            cabextract: process::exists("cabextract"),
            msiextract: process::exists("msiextract"),
            tar: process::exists("tar"),
            hivexregedit: process::exists("hivexregedit"),
        };
        tracing::debug!(?caps, "detected host capabilities");
        caps
    }

    /// Every optional tool present.
    pub fn all() -> Self {
        Self {
            unzip: true,
            sevenzip: true,
            cabextract: true,
            msiextract: true,
            tar: true,
            hivexregedit: true,
        }
    }

    /// No optional tool present.
    pub fn none() -> Self {
        Self::default()
    }

    /// Look a tool up by its command name.
    pub fn has(&self, tool: &str) -> bool {
        match tool {
            "unzip" => self.unzip,
            "7z" => self.sevenzip,
            "cabextract" => self.cabextract,
            "msiextract" => self.msiextract,
            "tar" => self.tar,
            "hivexregedit" => self.hivexregedit,
            _ => process::exists(tool),
        }
    }
}
