//! Removal profile resolution.
//!
//! A profile is a line-oriented text file `<presets_dir>/<name>.preset`:
//!
//! ```text
//! # comment
//! include minimal
//! PATH:sources/ei.cfg
//! Xbox
//! ```
//!
//! `include` lines are expanded depth-first in place, so inherited directives
//! keep their position relative to the includer's own lines.

mod directive;

pub use directive::{parse_line, Line, RemovalDirective, PATH_PREFIX};

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File extension of profile sources.
pub const PRESET_EXTENSION: &str = "preset";

/// Profile names that mean "do not service the image at all".
pub const NOOP_PROFILES: &[&str] = &["no-op", "vanilla"];

pub fn is_noop(profile: &str) -> bool {
    NOOP_PROFILES.contains(&profile)
}

/// Resolves profile names against one presets directory.
pub struct PresetResolver {
    presets_dir: PathBuf,
}

impl PresetResolver {
    pub fn new(presets_dir: impl Into<PathBuf>) -> Self {
        Self {
            presets_dir: presets_dir.into(),
        }
    }

    pub fn profile_path(&self, name: &str) -> PathBuf {
        self.presets_dir.join(format!("{}.{}", name, PRESET_EXTENSION))
    }

    /// Expand `profile` (and its includes) into an ordered directive list,
    /// followed by the directives of `override_path` if given.
    pub fn resolve(&self, profile: &str, override_path: Option<&Path>) -> Result<Vec<RemovalDirective>> {
        if is_noop(profile) {
            if override_path.is_some() {
                tracing::warn!(profile, "override ignored: profile skips servicing");
            }
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let mut stack = Vec::new();
        self.expand_profile(profile, &mut stack, &mut out)?;

        if let Some(path) = override_path {
            if !path.is_file() {
                return Err(Error::OverrideNotFound(path.to_path_buf()));
            }
            let text = fs::read_to_string(path)?;
            self.expand_text(&text, &path.display().to_string(), &mut stack, &mut out)?;
        }

        tracing::debug!(profile, directives = out.len(), "profile resolved");
        Ok(out)
    }

    /// Names of all profiles in the presets directory, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.presets_dir.is_dir() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.presets_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PRESET_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn expand_profile(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        out: &mut Vec<RemovalDirective>,
    ) -> Result<()> {
        if stack.iter().any(|s| s == name) {
            let mut chain = stack.clone();
            chain.push(name.to_string());
            return Err(Error::ProfileCycle { chain });
        }

        let path = self.profile_path(name);
        if !path.is_file() {
            return Err(Error::ProfileNotFound {
                name: name.to_string(),
                path,
            });
        }
        let text = fs::read_to_string(&path)?;

        stack.push(name.to_string());
        let result = self.expand_text(&text, name, stack, out);
        stack.pop();
        result
    }

    fn expand_text(
        &self,
        text: &str,
        source: &str,
        stack: &mut Vec<String>,
        out: &mut Vec<RemovalDirective>,
    ) -> Result<()> {
        for (lineno, raw) in text.lines().enumerate() {
            match parse_line(raw) {
                None => {}
                Some(Line::Include(name)) => self.expand_profile(&name, stack, out)?,
                Some(Line::Directive(d)) => out.push(d),
                Some(Line::Rejected(value)) => {
                    tracing::warn!(source, line = lineno + 1, value = %value, "unsafe directive dropped");
                }
            }
        }
        Ok(())
    }
}
