//! Script run orchestration
//!
//! manifest -> classification -> cache entry -> runtime target ->
//! interception -> execution descriptor. Everything up to the descriptor is
//! resolution only; [`Runner::run`] is the single step that spawns.

use crate::cache::{CacheEntry, CacheStore, InstallObserver};
use crate::config::Config;
use crate::deps::{classify, DependencyRequest};
use crate::engine::{self, RuntimeTarget};
use crate::error::ScrunResult;
use crate::exec::{self, ExecutionDescriptor};
use crate::intercept::{self, InterceptPlan};
use crate::manifest::DependencyManifest;
use crate::npm::PackageManager;
use semver::Version;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Engine name negotiated by scrun; other `engines` entries are ignored
pub const NODE_ENGINE: &str = "node";

/// One invocation's inputs
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Script to run; `None` forwards straight to node (eval mode)
    pub script: Option<PathBuf>,
    pub with: Vec<DependencyRequest>,
    /// `--engine` flags, applied over the manifest's `engines`
    pub engines: BTreeMap<String, String>,
    /// Flags placed before the script
    pub node_args: Vec<String>,
    pub script_args: Vec<String>,
    /// Start of the ambient package search
    pub cwd: PathBuf,
}

pub struct Runner<'a> {
    config: &'a Config,
    store: CacheStore,
    package_manager: &'a dyn PackageManager,
    observer: &'a dyn InstallObserver,
    current: Option<Version>,
}

impl<'a> Runner<'a> {
    pub fn new(
        config: &'a Config,
        store: CacheStore,
        package_manager: &'a dyn PackageManager,
        observer: &'a dyn InstallObserver,
    ) -> Self {
        Self {
            config,
            store,
            package_manager,
            observer,
            current: None,
        }
    }

    /// Use a known node version instead of probing the configured node
    pub fn with_current_version(mut self, version: Version) -> Self {
        self.current = Some(version);
        self
    }

    /// Resolve and launch, returning the script's exit code
    pub async fn run(&self, request: &RunRequest) -> ScrunResult<i32> {
        let descriptor = self.prepare(request).await?;
        exec::run(&descriptor).await
    }

    /// Resolve everything needed to launch the script
    pub async fn prepare(&self, request: &RunRequest) -> ScrunResult<ExecutionDescriptor> {
        let manifest = match request.script {
            Some(ref script) => DependencyManifest::from_file(script).await?,
            None => DependencyManifest::default(),
        };

        let mut engines = manifest.engines.clone();
        engines.extend(request.engines.clone());
        let constraint = engines.get(NODE_ENGINE).map(String::as_str);

        let plan = classify(&manifest, &request.with, &request.cwd, self.package_manager).await?;
        let install_set = plan.install_set();

        let current = if constraint.is_some() || !install_set.is_empty() {
            Some(self.current_version().await?)
        } else {
            None
        };
        let target = match current {
            Some(ref version) => engine::negotiate(constraint, version)?,
            None => RuntimeTarget::Current,
        };
        debug!(target = %target, constraint = ?constraint, "Runtime selected");

        let entry: Option<CacheEntry> = if install_set.is_empty() {
            None
        } else {
            let runtime = target.cache_segment(current.as_ref());
            let entry = self
                .store
                .ensure(&install_set, &runtime, self.package_manager, self.observer)
                .await?;
            info!(key = %entry.key, installed = entry.installed, "Using cache entry");
            Some(entry)
        };

        let intercept_plan = InterceptPlan {
            cache_modules: entry.as_ref().map(CacheEntry::modules_dir),
            hard: if entry.is_some() {
                plan.hard_names()
            } else {
                Default::default()
            },
            ambient: plan.ambient_module_dirs(),
        };
        let interception = intercept::prepare(self.store.root(), &intercept_plan).await?;

        let mut args = interception.node_args;
        args.extend(request.node_args.iter().cloned());
        if let Some(ref script) = request.script {
            args.push(script.to_string_lossy().into_owned());
        }
        args.extend(request.script_args.iter().cloned());

        Ok(ExecutionDescriptor::node(&self.config.runtime, &target, args).with_env(interception.env))
    }

    async fn current_version(&self) -> ScrunResult<Version> {
        match self.current {
            Some(ref version) => Ok(version.clone()),
            None => engine::probe_version(&self.config.runtime.node).await,
        }
    }
}
