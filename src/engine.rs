//! Node.js version negotiation
//!
//! Decides whether a script can run under the node already on PATH or needs
//! another major version fetched through npx. The result is data: the
//! executor turns it into a command line.

use crate::error::{ScrunError, ScrunResult};
use crate::exec;
use semver::{Comparator, Op, Version, VersionReq};
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Which runtime should execute the script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeTarget {
    /// The node found on PATH (or configured) already satisfies the constraint
    Current,
    /// Run under `node@<version>`: a major number, or a literal tag passed through
    Version(String),
}

impl RuntimeTarget {
    /// Directory name that separates cache entries per runtime
    pub fn cache_segment(&self, current: Option<&Version>) -> String {
        match self {
            Self::Current => match current {
                Some(v) => format!("node-{}.{}", v.major, v.minor),
                None => "node-current".to_string(),
            },
            Self::Version(v) => format!("node-{}", sanitize_segment(v)),
        }
    }
}

impl fmt::Display for RuntimeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Version(v) => write!(f, "node@{}", v),
        }
    }
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Resolve an engine constraint against the running node version
pub fn negotiate(constraint: Option<&str>, current: &Version) -> ScrunResult<RuntimeTarget> {
    let Some(spec) = constraint.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(RuntimeTarget::Current);
    };

    if spec.chars().all(|c| c.is_ascii_digit()) {
        let caret = NodeRange::parse(&format!("^{}", spec));
        if caret.is_some_and(|r| r.satisfies(current)) {
            return Ok(RuntimeTarget::Current);
        }
        return Ok(RuntimeTarget::Version(spec.to_string()));
    }

    let Some(range) = NodeRange::parse(spec) else {
        debug!("Engine constraint {:?} is not a range, passing through", spec);
        return Ok(RuntimeTarget::Version(spec.to_string()));
    };

    if range.satisfies(current) {
        return Ok(RuntimeTarget::Current);
    }

    range
        .min_version()
        .map(|v| RuntimeTarget::Version(v.major.to_string()))
        .ok_or_else(|| ScrunError::RuntimeResolution {
            constraint: spec.to_string(),
        })
}

/// Ask a node executable for its version
pub async fn probe_version(program: &str) -> ScrunResult<Version> {
    let child = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ScrunError::launch(program, e))?;
    let output = exec::supervise(child.id(), child.wait_with_output())
        .await?
        .uninterrupted()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_node_version(&stdout).ok_or_else(|| ScrunError::RuntimeProbe {
        program: program.to_string(),
        reason: format!("unexpected output {:?}", stdout.trim()),
    })
}

/// Parse `v20.11.1` style output
pub fn parse_node_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed)).ok()
}

/// A node-style range: `||` alternatives of space-separated comparators
#[derive(Debug, Clone)]
pub struct NodeRange {
    alternatives: Vec<VersionReq>,
}

impl NodeRange {
    /// Parse node range syntax; `None` if any alternative is invalid
    pub fn parse(spec: &str) -> Option<Self> {
        let alternatives = spec
            .split("||")
            .map(|alt| translate_alternative(alt).and_then(|s| VersionReq::parse(&s).ok()))
            .collect::<Option<Vec<_>>>()?;
        Some(Self { alternatives })
    }

    /// Whether any alternative matches
    pub fn satisfies(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Lowest version that satisfies the range
    pub fn min_version(&self) -> Option<Version> {
        self.alternatives.iter().filter_map(min_for_req).min()
    }
}

/// Rewrite one node alternative into `semver` crate syntax
fn translate_alternative(alt: &str) -> Option<String> {
    let alt = alt.trim();
    if alt.is_empty() {
        return Some("*".to_string());
    }

    if let Some((low, high)) = alt.split_once(" - ") {
        let low = normalize_token(low.trim())?;
        let high = normalize_token(high.trim())?;
        return Some(format!(">={}, <={}", low, high));
    }

    let mut comparators = Vec::new();
    let mut pending_op = String::new();
    for token in alt.split_whitespace() {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(token);
            continue;
        }
        let joined = format!("{}{}", pending_op, token);
        pending_op.clear();
        comparators.push(normalize_comparator(&joined)?);
    }
    if !pending_op.is_empty() {
        return None;
    }
    Some(comparators.join(", "))
}

/// Strip `v` prefixes and read operator-less versions as node does
///
/// `18.1` is the X-range `>=18.1.0 <18.2.0`, which the `semver` crate spells
/// `=18.1`; without an operator it would read it as a caret range.
fn normalize_comparator(token: &str) -> Option<String> {
    let split = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .unwrap_or(token.len());
    let (op, version) = token.split_at(split);
    let version = normalize_token(version)?;

    let op = match op {
        "" if has_wildcard(&version) => "",
        "" => "=",
        "~>" => "~",
        other => other,
    };
    Some(format!("{}{}", op, version))
}

fn normalize_token(token: &str) -> Option<String> {
    let version = token.strip_prefix('v').unwrap_or(token);
    if version.is_empty() {
        return None;
    }
    Some(version.to_string())
}

fn has_wildcard(version: &str) -> bool {
    version
        .split(['-', '+'])
        .next()
        .unwrap_or("")
        .split('.')
        .any(|part| matches!(part, "*" | "x" | "X"))
}

/// Candidate lower bounds of a comparator set, lowest satisfying one wins
fn min_for_req(req: &VersionReq) -> Option<Version> {
    let mut candidates = vec![Version::new(0, 0, 0)];
    candidates.extend(req.comparators.iter().filter_map(lower_bound));
    candidates.into_iter().filter(|v| req.matches(v)).min()
}

fn lower_bound(cmp: &Comparator) -> Option<Version> {
    let base = Version {
        major: cmp.major,
        minor: cmp.minor.unwrap_or(0),
        patch: cmp.patch.unwrap_or(0),
        pre: cmp.pre.clone(),
        build: Default::default(),
    };
    match cmp.op {
        Op::Greater => Some(match (cmp.minor, cmp.patch) {
            (None, _) => Version::new(cmp.major + 1, 0, 0),
            (Some(minor), None) => Version::new(cmp.major, minor + 1, 0),
            (Some(_), Some(patch)) if cmp.pre.is_empty() => {
                Version::new(base.major, base.minor, patch + 1)
            }
            _ => {
                let mut next = base;
                next.pre = semver::Prerelease::new(&format!("{}.0", cmp.pre)).ok()?;
                next
            }
        }),
        Op::Less | Op::LessEq => None,
        _ => Some(base),
    }
}
