//! Merge manifest entries and `--with` requests into a resolution plan

use super::locate::{find_local_package, modules_dir_of};
use super::{DependencyRequest, ANY_VERSION, LATEST};
use crate::cache::DependencySet;
use crate::error::{ScrunError, ScrunResult};
use crate::manifest::DependencyManifest;
use crate::npm::PackageManager;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Whether a dependency may be satisfied by an ambient copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// No version given, ambient copy preferred
    Soft,
    /// Explicit range or pinned version, always from the cache
    Hard,
}

/// Where a dependency will be loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Already materialized in the caller's workspace
    Ambient(PathBuf),
    /// Installed into a cache entry
    Cache,
}

/// One dependency after classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDependency {
    pub name: String,
    pub range: String,
    pub kind: DependencyKind,
    /// Declared under `devDependencies`
    pub dev: bool,
    pub resolution: Resolution,
}

/// Per-dependency resolution for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPlan {
    pub dependencies: BTreeMap<String, PlannedDependency>,
}

impl ResolutionPlan {
    /// Dependencies that must be installed into the cache
    pub fn install_set(&self) -> DependencySet {
        let mut set = DependencySet::default();
        for dep in self.dependencies.values() {
            if dep.resolution != Resolution::Cache {
                continue;
            }
            let target = if dep.dev {
                &mut set.dev_dependencies
            } else {
                &mut set.dependencies
            };
            target.insert(dep.name.clone(), dep.range.clone());
        }
        set
    }

    /// Names that must never resolve to an ambient package
    pub fn hard_names(&self) -> BTreeSet<String> {
        self.dependencies
            .values()
            .filter(|d| d.kind == DependencyKind::Hard)
            .map(|d| d.name.clone())
            .collect()
    }

    /// `node_modules` directories holding the ambient soft dependencies
    pub fn ambient_module_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for dep in self.dependencies.values() {
            if let Resolution::Ambient(ref path) = dep.resolution {
                let dir = modules_dir_of(path, &dep.name);
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        dirs
    }

    pub fn get(&self, name: &str) -> Option<&PlannedDependency> {
        self.dependencies.get(name)
    }
}

/// Classify every dependency and resolve soft ones against the workspace at `cwd`
///
/// Requests override manifest entries of the same name. `latest` is turned
/// into a concrete version through `package_manager` before anything is hashed.
pub async fn classify(
    manifest: &DependencyManifest,
    requests: &[DependencyRequest],
    cwd: &Path,
    package_manager: &dyn PackageManager,
) -> ScrunResult<ResolutionPlan> {
    let mut dependencies = BTreeMap::new();

    let declared = manifest
        .dependencies
        .iter()
        .map(|entry| (entry, false))
        .chain(manifest.dev_dependencies.iter().map(|entry| (entry, true)));
    for ((name, range), dev) in declared {
        let range = if range.trim() == LATEST {
            resolve_latest(name, package_manager).await?
        } else {
            range.clone()
        };
        dependencies.insert(
            name.clone(),
            PlannedDependency {
                name: name.clone(),
                range,
                kind: DependencyKind::Hard,
                dev,
                resolution: Resolution::Cache,
            },
        );
    }

    for request in requests {
        let planned = if request.is_soft() {
            let resolution = match find_local_package(cwd, &request.name) {
                Some(path) => Resolution::Ambient(path),
                None => Resolution::Cache,
            };
            PlannedDependency {
                name: request.name.clone(),
                range: ANY_VERSION.to_string(),
                kind: DependencyKind::Soft,
                dev: false,
                resolution,
            }
        } else {
            let range = if request.wants_latest() {
                resolve_latest(&request.name, package_manager).await?
            } else {
                request.version.clone().unwrap_or_default()
            };
            PlannedDependency {
                name: request.name.clone(),
                range,
                kind: DependencyKind::Hard,
                dev: false,
                resolution: Resolution::Cache,
            }
        };
        debug!(
            name = %planned.name,
            range = %planned.range,
            kind = ?planned.kind,
            resolution = ?planned.resolution,
            "Classified dependency"
        );
        dependencies.insert(request.name.clone(), planned);
    }

    Ok(ResolutionPlan { dependencies })
}

/// A failed lookup keeps the tag; only an interrupt aborts
async fn resolve_latest(name: &str, package_manager: &dyn PackageManager) -> ScrunResult<String> {
    match package_manager.latest_version(name).await {
        Ok(version) => {
            debug!("Resolved {}@latest to {}", name, version);
            Ok(version)
        }
        Err(e @ ScrunError::Interrupted { .. }) => Err(e),
        Err(e) => {
            warn!("Could not resolve {}@latest, keeping the tag: {}", name, e);
            Ok(LATEST.to_string())
        }
    }
}
