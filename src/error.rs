//! Error types for scrun
//!
//! All modules use `ScrunResult<T>` as their return type. A script's own
//! non-zero exit is not an error here: it travels as a plain exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for scrun operations
pub type ScrunResult<T> = Result<T, ScrunError>;

/// All errors that can occur in scrun
#[derive(Error, Debug)]
pub enum ScrunError {
    // Manifest errors
    #[error("Failed to parse inline dependencies in {path}: {message}")]
    ManifestParse { path: PathBuf, message: String },

    // Install errors
    #[error("npm install failed for {packages} (cache entry {dir})")]
    Install { packages: String, dir: PathBuf },

    #[error("Cache entry {dir} was built for a different dependency set")]
    CacheCollision { dir: PathBuf },

    // Runtime errors
    #[error("No Node.js version satisfies engine constraint \"{constraint}\"")]
    RuntimeResolution { constraint: String },

    #[error("Could not determine version of {program}: {reason}")]
    RuntimeProbe { program: String, reason: String },

    #[error("Interrupted by signal {signal}")]
    Interrupted { signal: i32 },

    #[error("Failed to launch {program}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // Target errors
    #[error("File not found: {0}")]
    ScriptNotFound(PathBuf),

    #[error("Ambiguous: \"{target}\" matches: {matches}")]
    AmbiguousTarget { target: String, matches: String },

    #[error("No executable found for {package}")]
    NoExecutable { package: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    User(String),
}

impl ScrunError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a launch failure for a program that could not be spawned
    pub fn launch(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }

    /// Exit code to report instead of a generic failure
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Interrupted { signal } => Some(128 + signal),
            _ => None,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Install { .. } => Some("Check the package names and your network connection"),
            Self::CacheCollision { .. } => Some("Remove the cache directory and run again"),
            Self::Launch { .. } | Self::RuntimeProbe { .. } => {
                Some("Make sure Node.js and npm are installed and on PATH")
            }
            Self::AmbiguousTarget { .. } => Some("Use ./ for local, --with= for npm"),
            _ => None,
        }
    }
}
