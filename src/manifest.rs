//! Inline manifest parsing
//!
//! A script may open with a dependency block written in JSON5 between two
//! marker lines, optionally preceded by a shebang:
//!
//! ```text
//! #!/usr/bin/env scrun
//! /*/ // <package>
//! { dependencies: { semver: "^7.5.4" }, engines: { node: ">=18" } }
//! /*/ // </package>
//! import semver from 'semver';
//! ```
//!
//! The markers are valid JavaScript, so the script still runs under plain node.

use crate::error::{ScrunError, ScrunResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Line prefix that opens an inline block
pub const OPEN_MARKER: &str = "/*/ // <package>";

/// Line prefix that closes an inline block
pub const CLOSE_MARKER: &str = "/*/ // </package>";

/// Dependencies, devDependencies and engines declared by a script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyManifest {
    /// Package name to version range
    pub dependencies: BTreeMap<String, String>,

    /// Package name to version range, installed alongside dependencies
    pub dev_dependencies: BTreeMap<String, String>,

    /// Engine name to constraint (only `node` is negotiated)
    pub engines: BTreeMap<String, String>,

    /// Whether the script carried an inline block at all
    pub has_inline_declaration: bool,
}

/// Shape of the JSON5 object between the markers
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InlineBlock {
    dependencies: BTreeMap<String, String>,
    dev_dependencies: BTreeMap<String, String>,
    engines: BTreeMap<String, String>,
}

impl DependencyManifest {
    /// Read a script from disk and parse its inline block
    pub async fn from_file(path: &Path) -> ScrunResult<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ScrunError::io(format!("reading script {}", path.display()), e))?;
        Self::parse(&String::from_utf8_lossy(&bytes), path)
    }

    /// Parse script content. `origin` only labels the error message.
    ///
    /// Content without an open marker, or with an open marker that is never
    /// closed, has no manifest. Only an invalid object between two markers
    /// is an error.
    pub fn parse(content: &str, origin: &Path) -> ScrunResult<Self> {
        let Some(block) = extract_block(content) else {
            return Ok(Self::default());
        };

        let parsed: InlineBlock =
            json5::from_str(&block).map_err(|e| ScrunError::ManifestParse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(Self {
            dependencies: parsed.dependencies,
            dev_dependencies: parsed.dev_dependencies,
            engines: parsed.engines,
            has_inline_declaration: true,
        })
    }
}

/// Locate the text between the markers, if both are present
fn extract_block(content: &str) -> Option<String> {
    let body = if content.starts_with("#!") {
        content.split_once('\n').map(|(_, rest)| rest).unwrap_or("")
    } else {
        content
    };

    if !body.trim_start().starts_with(OPEN_MARKER) {
        return None;
    }

    let lines: Vec<&str> = body.lines().collect();
    let open = lines.iter().position(|l| !l.trim().is_empty())?;
    let close = lines[open + 1..]
        .iter()
        .position(|l| l.trim().starts_with(CLOSE_MARKER))?
        + open
        + 1;

    Some(lines[open + 1..close].join("\n"))
}
