//! Cache entry lifecycle
//!
//! Entries move Miss -> Building -> Complete. Only an entry whose
//! completion marker exists is ever used; a directory without the marker is
//! leftover from a crash and gets replaced.

use super::key::{CacheKey, DependencySet};
use crate::error::{ScrunError, ScrunResult};
use crate::npm::{InstallMode, PackageManager};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, info, warn};

/// Written last, after the install succeeded
pub const MARKER_FILE: &str = ".scrun-complete";

/// Records which dependency set produced the entry
pub const METADATA_FILE: &str = "scrun-entry.json";

/// Package description handed to npm
pub const PACKAGE_FILE: &str = "package.json";

/// Keeps staging directories of concurrent populators in one process apart
static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Name written into every generated `package.json`
const PACKAGE_NAME: &str = "scrun-cache";

/// State of a cache entry on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// No directory for the key
    Miss,
    /// Directory exists but was never finalized
    Building,
    /// Finalized and immutable
    Complete,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Miss => write!(f, "miss"),
            Self::Building => write!(f, "building"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Contents of the metadata file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub key: String,
    pub runtime: String,
    #[serde(flatten)]
    pub dependencies: DependencySet,
    pub created_at: DateTime<Utc>,
}

/// A finalized cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub dir: PathBuf,
    /// False when the entry was already complete
    pub installed: bool,
}

impl CacheEntry {
    /// `node_modules` directory inside the entry
    pub fn modules_dir(&self) -> PathBuf {
        self.dir.join("node_modules")
    }
}

/// Hooks around install attempts, used for progress display
pub trait InstallObserver: Send + Sync {
    fn attempt(&self, _mode: InstallMode, _packages: &str) {}
    fn finished(&self, _success: bool) {}
}

/// Observer that shows nothing
#[cfg(test)]
pub struct Silent;

#[cfg(test)]
impl InstallObserver for Silent {}

/// Content-addressed store rooted at a directory
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    offline_first: bool,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            offline_first: true,
        }
    }

    /// Skip the silent `--offline` attempt
    pub fn with_offline_first(mut self, offline_first: bool) -> Self {
        self.offline_first = offline_first;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Return a complete entry for the set, installing it on a miss
    pub async fn ensure(
        &self,
        set: &DependencySet,
        runtime: &str,
        package_manager: &dyn PackageManager,
        observer: &dyn InstallObserver,
    ) -> ScrunResult<CacheEntry> {
        let key = CacheKey::derive(set, runtime);
        let dir = self.entry_dir(&key);
        let state = state_of(&dir).await;
        debug!(key = %key, state = %state, dir = %dir.display(), "Cache lookup");

        if state == CacheState::Complete {
            verify_metadata(&dir, set).await?;
            return Ok(CacheEntry {
                key,
                dir,
                installed: false,
            });
        }

        let staging = self.staging_dir(&key);
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| ScrunError::io(format!("creating {}", staging.display()), e))?;

        let populated = self
            .populate(&staging, &key, set, package_manager, observer)
            .await;
        observer.finished(populated.is_ok());
        if let Err(e) = populated {
            discard(&staging).await;
            return Err(e);
        }

        self.finalize(&staging, &dir, set).await?;
        info!(key = %key, dir = %dir.display(), "Cache entry complete");
        Ok(CacheEntry {
            key,
            dir,
            installed: true,
        })
    }

    fn staging_dir(&self, key: &CacheKey) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        self.root.join(key.runtime()).join(format!(
            ".staging-{}-{}-{}-{}",
            key.hash(),
            std::process::id(),
            nanos,
            STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// Write package description, metadata, install, then the marker
    async fn populate(
        &self,
        staging: &Path,
        key: &CacheKey,
        set: &DependencySet,
        package_manager: &dyn PackageManager,
        observer: &dyn InstallObserver,
    ) -> ScrunResult<()> {
        let package = serde_json::json!({
            "name": PACKAGE_NAME,
            "private": true,
            "type": "module",
            "dependencies": set.dependencies,
            "devDependencies": set.dev_dependencies,
        });
        write_json(&staging.join(PACKAGE_FILE), &package).await?;

        let metadata = EntryMetadata {
            key: key.hash().to_string(),
            runtime: key.runtime().to_string(),
            dependencies: set.clone(),
            created_at: Utc::now(),
        };
        write_json(&staging.join(METADATA_FILE), &metadata).await?;

        let packages = set.describe();
        let mut installed = false;
        if self.offline_first {
            observer.attempt(InstallMode::Offline, &packages);
            installed = package_manager.install(staging, InstallMode::Offline).await?;
            if !installed {
                debug!("Offline install failed, retrying with network");
            }
        }
        if !installed {
            observer.attempt(InstallMode::PreferOffline, &packages);
            installed = package_manager
                .install(staging, InstallMode::PreferOffline)
                .await?;
        }
        if !installed {
            return Err(ScrunError::Install {
                packages,
                dir: self.entry_dir(key),
            });
        }

        fs::write(staging.join(MARKER_FILE), Utc::now().to_rfc3339())
            .await
            .map_err(|e| ScrunError::io("writing completion marker", e))
    }

    /// Move a populated staging directory onto the entry path
    async fn finalize(&self, staging: &Path, dir: &Path, set: &DependencySet) -> ScrunResult<()> {
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ScrunError::io(format!("creating {}", parent.display()), e))?;
        }

        for _ in 0..2 {
            match state_of(dir).await {
                CacheState::Complete => {
                    debug!("Another process finalized {} first", dir.display());
                    discard(staging).await;
                    return verify_metadata(dir, set).await;
                }
                CacheState::Building => {
                    warn!("Replacing incomplete cache entry {}", dir.display());
                    let aside = aside_path(staging);
                    match clear_stale(dir, &aside).await {
                        Ok(true) => {
                            debug!("{} was finalized while being replaced", dir.display());
                            discard(staging).await;
                            return verify_metadata(dir, set).await;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            discard(staging).await;
                            return Err(e);
                        }
                    }
                }
                CacheState::Miss => {}
            }

            match fs::rename(staging, dir).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!("Rename onto {} failed: {}", dir.display(), e),
            }
        }

        if state_of(dir).await == CacheState::Complete {
            discard(staging).await;
            return verify_metadata(dir, set).await;
        }
        discard(staging).await;
        Err(ScrunError::User(format!(
            "Could not finalize cache entry {}",
            dir.display()
        )))
    }
}

/// Sibling of the staging directory that a stale entry is moved to
fn aside_path(staging: &Path) -> PathBuf {
    let name = staging
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    staging.with_file_name(format!("{}.stale", name))
}

/// Move a marker-less entry out of the way and delete it
///
/// Another process may finalize `dir` between our state check and the move.
/// If what was moved turns out complete it is put back and `true` returned.
async fn clear_stale(dir: &Path, aside: &Path) -> ScrunResult<bool> {
    match fs::rename(dir, aside).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(ScrunError::io(
                format!("moving incomplete entry {}", dir.display()),
                e,
            ))
        }
    }

    if state_of(aside).await == CacheState::Complete && fs::rename(aside, dir).await.is_ok() {
        return Ok(true);
    }
    discard(aside).await;
    Ok(false)
}

async fn state_of(dir: &Path) -> CacheState {
    if fs::try_exists(dir.join(MARKER_FILE)).await.unwrap_or(false) {
        CacheState::Complete
    } else if fs::try_exists(dir).await.unwrap_or(false) {
        CacheState::Building
    } else {
        CacheState::Miss
    }
}

/// A complete entry must record the same set its key was derived from
async fn verify_metadata(dir: &Path, set: &DependencySet) -> ScrunResult<()> {
    let path = dir.join(METADATA_FILE);
    let content = match fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            warn!("Cache entry {} has no readable metadata: {}", dir.display(), e);
            return Ok(());
        }
    };

    match serde_json::from_str::<EntryMetadata>(&content) {
        Ok(metadata) if metadata.dependencies == *set => Ok(()),
        Ok(_) => Err(ScrunError::CacheCollision {
            dir: dir.to_path_buf(),
        }),
        Err(e) => {
            warn!("Cache entry {} has unreadable metadata: {}", dir.display(), e);
            Ok(())
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> ScrunResult<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)
        .await
        .map_err(|e| ScrunError::io(format!("writing {}", path.display()), e))
}

async fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npm::testing::FakePackageManager;
    use tempfile::TempDir;

    fn semver_set() -> DependencySet {
        let mut set = DependencySet::default();
        set.dependencies
            .insert("semver".to_string(), "^7.5.4".to_string());
        set
    }

    fn entries_under(root: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for runtime in std::fs::read_dir(root).unwrap() {
            for entry in std::fs::read_dir(runtime.unwrap().path()).unwrap() {
                found.push(entry.unwrap().path());
            }
        }
        found
    }

    #[tokio::test]
    async fn miss_installs_once_and_finalizes() {
        let root = TempDir::new().unwrap();
        let store = CacheStore::new(root.path());
        let pm = FakePackageManager::default();

        let entry = store.ensure(&semver_set(), "node-20", &pm, &Silent).await.unwrap();

        assert!(entry.installed);
        assert_eq!(pm.install_count(), 1);
        assert_eq!(state_of(&store.entry_dir(&entry.key)).await, CacheState::Complete);
        assert!(entry.dir.join(PACKAGE_FILE).exists());
        assert!(entry.dir.join(METADATA_FILE).exists());
        assert!(entry.modules_dir().join("semver/package.json").exists());
        assert_eq!(entries_under(root.path()), vec![entry.dir.clone()]);
    }

    #[tokio::test]
    async fn complete_entry_is_reused_without_install() {
        let root = TempDir::new().unwrap();
        let store = CacheStore::new(root.path());
        let pm = FakePackageManager::default();

        let first = store.ensure(&semver_set(), "node-20", &pm, &Silent).await.unwrap();
        let second = store.ensure(&semver_set(), "node-20", &pm, &Silent).await.unwrap();

        assert_eq!(first.dir, second.dir);
        assert!(!second.installed);
        assert_eq!(pm.install_count(), 1);
    }

    #[tokio::test]
    async fn runtimes_get_separate_entries() {
        let root = TempDir::new().unwrap();
        let store = CacheStore::new(root.path());
        let pm = FakePackageManager::default();

        let a = store.ensure(&semver_set(), "node-18", &pm, &Silent).await.unwrap();
        let b = store.ensure(&semver_set(), "node-20", &pm, &Silent).await.unwrap();

        assert_ne!(a.dir, b.dir);
        assert_eq!(pm.install_count(), 2);
    }

    #[tokio::test]
    async fn offline_failure_retries_with_network() {
        let root = TempDir::new().unwrap();
        let store = CacheStore::new(root.path());
        let pm = FakePackageManager {
            fail_offline: true,
            ..FakePackageManager::default()
        };

        let entry = store.ensure(&semver_set(), "node-20", &pm, &Silent).await.unwrap();
        assert_eq!(pm.install_count(), 2);
        assert_eq!(state_of(&store.entry_dir(&entry.key)).await, CacheState::Complete);
    }

    #[tokio::test]
    async fn offline_first_can_be_disabled() {
        let root = TempDir::new().unwrap();
        let store = CacheStore::new(root.path()).with_offline_first(false);
        let pm = FakePackageManager::default();

        store.ensure(&semver_set(), "node-20", &pm, &Silent).await.unwrap();
        assert_eq!(pm.install_count(), 1);
    }

    #[tokio::test]
    async fn double_failure_leaves_no_entry() {
        let root = TempDir::new().unwrap();
        let store = CacheStore::new(root.path());
        let pm = FakePackageManager {
            fail_always: true,
            ..FakePackageManager::default()
        };

        let err = store
            .ensure(&semver_set(), "node-20", &pm, &Silent)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrunError::Install { .. }));
        assert_eq!(pm.install_count(), 2);

        let key = CacheKey::derive(&semver_set(), "node-20");
        assert_eq!(state_of(&store.entry_dir(&key)).await, CacheState::Miss);
        assert!(entries_under(root.path()).is_empty());
    }

    #[tokio::test]
    async fn incomplete_entry_is_rebuilt() {
        let root = TempDir::new().unwrap();
        let store = CacheStore::new(root.path());
        let key = CacheKey::derive(&semver_set(), "node-20");
        let dir = store.entry_dir(&key);
        std::fs::create_dir_all(dir.join("node_modules/partial")).unwrap();
        assert_eq!(state_of(&store.entry_dir(&key)).await, CacheState::Building);

        let pm = FakePackageManager::default();
        let entry = store.ensure(&semver_set(), "node-20", &pm, &Silent).await.unwrap();

        assert_eq!(entry.dir, dir);
        assert_eq!(pm.install_count(), 1);
        assert!(!dir.join("node_modules/partial").exists());
        assert_eq!(state_of(&store.entry_dir(&key)).await, CacheState::Complete);
        assert_eq!(entries_under(root.path()), vec![dir]);
    }

    #[tokio::test]
    async fn concurrent_populators_share_one_entry() {
        for _ in 0..10 {
            let root = TempDir::new().unwrap();
            let store = CacheStore::new(root.path());
            let pm = FakePackageManager::default();
            let set = semver_set();

            let (a, b, c, d) = tokio::join!(
                store.ensure(&set, "node-20", &pm, &Silent),
                store.ensure(&set, "node-20", &pm, &Silent),
                store.ensure(&set, "node-20", &pm, &Silent),
                store.ensure(&set, "node-20", &pm, &Silent),
            );
            let entries = [a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap()];

            let dir = &entries[0].dir;
            assert!(entries.iter().all(|e| &e.dir == dir));
            assert!(dir.join(MARKER_FILE).exists());
            assert!(entries[0].modules_dir().join("semver/package.json").exists());
            // No staging or stale directories survive
            assert_eq!(entries_under(root.path()), vec![dir.clone()]);
            assert!((1..=4).contains(&pm.install_count()));
        }
    }

    #[tokio::test]
    async fn stale_entry_finalized_meanwhile_is_kept() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("node-20/abc");
        let aside = root.path().join("node-20/.staging-abc.stale");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MARKER_FILE), "done").unwrap();

        assert!(clear_stale(&dir, &aside).await.unwrap());
        assert!(dir.join(MARKER_FILE).exists());
        assert!(!aside.exists());
    }

    #[tokio::test]
    async fn stale_entry_is_removed() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("node-20/abc");
        let aside = root.path().join("node-20/.staging-abc.stale");
        std::fs::create_dir_all(dir.join("node_modules/partial")).unwrap();

        assert!(!clear_stale(&dir, &aside).await.unwrap());
        assert!(!dir.exists());
        assert!(!aside.exists());

        // Already gone is not an error
        assert!(!clear_stale(&dir, &aside).await.unwrap());
    }

    #[tokio::test]
    async fn mismatched_metadata_is_collision() {
        let root = TempDir::new().unwrap();
        let store = CacheStore::new(root.path());
        let pm = FakePackageManager::default();
        let entry = store.ensure(&semver_set(), "node-20", &pm, &Silent).await.unwrap();

        let mut other = DependencySet::default();
        other.dependencies.insert("chalk".to_string(), "5".to_string());
        let metadata = EntryMetadata {
            key: entry.key.hash().to_string(),
            runtime: "node-20".to_string(),
            dependencies: other,
            created_at: Utc::now(),
        };
        std::fs::write(
            entry.dir.join(METADATA_FILE),
            serde_json::to_string(&metadata).unwrap(),
        )
        .unwrap();

        let err = store
            .ensure(&semver_set(), "node-20", &pm, &Silent)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrunError::CacheCollision { .. }));
    }

    #[tokio::test]
    async fn generated_package_json_is_module() {
        let root = TempDir::new().unwrap();
        let store = CacheStore::new(root.path());
        let pm = FakePackageManager::default();
        let entry = store.ensure(&semver_set(), "node-20", &pm, &Silent).await.unwrap();

        let package: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(entry.dir.join(PACKAGE_FILE)).unwrap())
                .unwrap();
        assert_eq!(package["type"], "module");
        assert_eq!(package["dependencies"]["semver"], "^7.5.4");
    }
}
