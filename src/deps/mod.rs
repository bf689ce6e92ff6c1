//! Dependency requests, ambient lookup and classification
//!
//! A request without a version is *soft*: an ambient copy in the caller's
//! `node_modules` tree wins over installing. A request with a version (or
//! `latest`) and every manifest entry are *hard*: they always come from the
//! cache store.

pub mod classify;
pub mod locate;

pub use classify::{classify, DependencyKind, PlannedDependency, Resolution, ResolutionPlan};
pub use locate::find_local_package;

use std::fmt;

/// Version token resolved to a concrete version before hashing
pub const LATEST: &str = "latest";

/// Range used for soft requests
pub const ANY_VERSION: &str = "*";

/// A caller-supplied `--with` dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRequest {
    /// Package name, including any `@scope/` prefix
    pub name: String,

    /// Version or range after the last `@`, if one was given
    pub version: Option<String>,
}

impl DependencyRequest {
    /// Parse `name`, `name@range`, `@scope/name` or `@scope/name@range`
    ///
    /// A trailing `@` with nothing after it counts as no version.
    pub fn parse(spec: &str) -> Self {
        match spec.rfind('@') {
            Some(at) if at > 0 => {
                let version = spec[at + 1..].trim();
                Self {
                    name: spec[..at].to_string(),
                    version: (!version.is_empty()).then(|| version.to_string()),
                }
            }
            _ => Self {
                name: spec.to_string(),
                version: None,
            },
        }
    }

    /// Whether the request carries no version
    pub fn is_soft(&self) -> bool {
        self.version.is_none()
    }

    /// Whether the version still needs a registry lookup
    pub fn wants_latest(&self) -> bool {
        self.version.as_deref() == Some(LATEST)
    }
}

impl fmt::Display for DependencyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}
