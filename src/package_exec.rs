//! Run an npm package's executable
//!
//! The package is installed into a throwaway directory, its `bin` entry is
//! run under node, and the directory is removed afterwards. Nothing here
//! touches the cache store.

use crate::deps::locate::PACKAGE_DIR;
use crate::deps::DependencyRequest;
use crate::error::{ScrunError, ScrunResult};
use crate::exec::{self, ExecutionDescriptor};
use crate::npm::PackageManager;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, warn};

/// Spec prefixes that install from a git host
const GIT_PREFIXES: &[&str] = &["git+", "github:", "gitlab:"];

/// An installed package ready to run
#[derive(Debug)]
pub struct InstalledPackage {
    dir: TempDir,
    pub bin: PathBuf,
}

impl InstalledPackage {
    /// Remove the install directory
    pub fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Install `spec` into a temporary directory and locate its executable
///
/// `bin_name` picks a specific entry of a multi-command package.
pub async fn install(
    package_manager: &dyn PackageManager,
    spec: &str,
    bin_name: Option<&str>,
) -> ScrunResult<InstalledPackage> {
    let dir = tempfile::Builder::new()
        .prefix("scrun-exec-")
        .tempdir()
        .map_err(|e| ScrunError::io("creating package directory", e))?;

    let package = serde_json::json!({
        "name": "scrun-exec",
        "version": "1.0.0",
        "private": true,
    });
    fs::write(dir.path().join("package.json"), package.to_string())
        .await
        .map_err(|e| ScrunError::io("writing package.json", e))?;

    debug!("Installing {} into {}", spec, dir.path().display());
    if !package_manager.add(dir.path(), spec).await? {
        return Err(ScrunError::Install {
            packages: spec.to_string(),
            dir: dir.path().to_path_buf(),
        });
    }

    let bin = find_bin(&dir.path().join(PACKAGE_DIR), spec, bin_name)
        .await
        .ok_or_else(|| ScrunError::NoExecutable {
            package: spec.to_string(),
        })?;
    Ok(InstalledPackage { dir, bin })
}

/// Install, run with node and clean up; returns the executable's exit code
pub async fn run(
    package_manager: &dyn PackageManager,
    spec: &str,
    bin_name: Option<&str>,
    launch: impl FnOnce(Vec<String>) -> ExecutionDescriptor,
    node_args: &[String],
    args: &[String],
) -> ScrunResult<i32> {
    let installed = install(package_manager, spec, bin_name).await?;

    let mut full = node_args.to_vec();
    full.push(installed.bin.to_string_lossy().into_owned());
    full.extend(args.iter().cloned());

    let result = exec::run(&launch(full)).await;
    installed.cleanup();
    result
}

fn is_git_spec(spec: &str) -> bool {
    GIT_PREFIXES.iter().any(|p| spec.starts_with(p))
}

async fn find_bin(modules: &Path, spec: &str, bin_name: Option<&str>) -> Option<PathBuf> {
    if is_git_spec(spec) {
        // The installed name is not known up front
        for (dir, name) in installed_packages(modules).await {
            let manifest = read_manifest(&dir).await;
            if let Some(bin) = select_bin(&manifest["bin"], &name, bin_name) {
                return Some(dir.join(bin));
            }
        }
        return None;
    }

    let name = DependencyRequest::parse(spec).name;
    let dir = modules.join(&name);
    let manifest = read_manifest(&dir).await;
    select_bin(&manifest["bin"], &name, bin_name).map(|bin| dir.join(bin))
}

/// Package directories directly under `node_modules`, scopes expanded, sorted
async fn installed_packages(modules: &Path) -> Vec<(PathBuf, String)> {
    let mut found = Vec::new();
    for (dir, name) in list_dirs(modules).await {
        if name.starts_with('@') {
            for (inner, inner_name) in list_dirs(&dir).await {
                found.push((inner, format!("{}/{}", name, inner_name)));
            }
        } else {
            found.push((dir, name));
        }
    }
    found
}

async fn list_dirs(dir: &Path) -> Vec<(PathBuf, String)> {
    let mut found = Vec::new();
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return found;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && !name.starts_with('.') {
            found.push((entry.path(), name));
        }
    }
    found.sort();
    found
}

async fn read_manifest(dir: &Path) -> Value {
    match fs::read_to_string(dir.join("package.json")).await {
        Ok(content) => serde_json::from_str(&content).unwrap_or(Value::Null),
        Err(_) => Value::Null,
    }
}

/// Pick the executable path from a `bin` field
///
/// A string is the only command. In a map the requested name wins, then the
/// entry named after the unscoped package, then the first entry.
fn select_bin(bin: &Value, package: &str, requested: Option<&str>) -> Option<String> {
    match bin {
        Value::String(path) => Some(path.clone()),
        Value::Object(commands) => {
            let unscoped = package.rsplit('/').next().unwrap_or(package);
            requested
                .and_then(|r| commands.get(r))
                .or_else(|| commands.get(unscoped))
                .or_else(|| commands.values().next())
                .and_then(Value::as_str)
                .map(str::to_string)
        }
        _ => None,
    }
}
