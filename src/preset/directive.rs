//! Removal directives and the line grammar of profile files.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Prefix marking an explicit relative path in profile text.
pub const PATH_PREFIX: &str = "PATH:";

/// One removal instruction, classified once at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalDirective {
    /// A relative path removed if present.
    ExplicitPath(PathBuf),
    /// Case-insensitive substring matched against directory names anywhere
    /// in the tree.
    NameToken(String),
}

impl RemovalDirective {
    pub fn is_name_token(&self) -> bool {
        matches!(self, RemovalDirective::NameToken(_))
    }
}

impl fmt::Display for RemovalDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalDirective::ExplicitPath(p) => write!(f, "{}{}", PATH_PREFIX, p.display()),
            RemovalDirective::NameToken(t) => write!(f, "{}", t),
        }
    }
}

/// A classified, non-empty line of a profile source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Include(String),
    Directive(RemovalDirective),
    /// Syntactically a directive, but its value is unsafe to execute.
    Rejected(String),
}

/// Classify one raw line. Returns `None` for blank and comment lines.
pub fn parse_line(raw: &str) -> Option<Line> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("include") {
        if rest.starts_with(char::is_whitespace) {
            let name = rest.trim();
            if !name.is_empty() {
                return Some(Line::Include(name.to_string()));
            }
        }
    }

    if let Some(rest) = line.strip_prefix(PATH_PREFIX) {
        let value = rest.trim();
        return Some(match safe_relative_path(value) {
            Some(path) => Line::Directive(RemovalDirective::ExplicitPath(path)),
            None => Line::Rejected(line.to_string()),
        });
    }

    Some(if is_safe_token(line) {
        Line::Directive(RemovalDirective::NameToken(line.to_string()))
    } else {
        Line::Rejected(line.to_string())
    })
}

/// Accept only paths that stay strictly below the tree root.
fn safe_relative_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() || value.contains('*') {
        return None;
    }
    let path = Path::new(value);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::ParentDir => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn is_safe_token(value: &str) -> bool {
    !value.is_empty()
        && value != "*"
        && !value.contains('/')
        && value != "."
        && value != ".."
}
