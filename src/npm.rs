//! Package manager abstraction
//!
//! scrun never resolves or downloads packages itself. Installation and
//! version queries are delegated to npm running as a subprocess.

use crate::config::schema::NpmConfig;
use crate::error::{ScrunError, ScrunResult};
use crate::exec;
use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{debug, warn};

/// How an install attempt may use the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Only the local npm cache, output suppressed
    Offline,
    /// Network allowed, output shown on stderr
    PreferOffline,
}

impl InstallMode {
    /// npm flag for this mode
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Offline => "--offline",
            Self::PreferOffline => "--prefer-offline",
        }
    }

    /// Whether npm output is hidden from the caller
    pub fn is_quiet(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

/// Package manager operations used by scrun
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Resolve the `latest` dist-tag of a package to a concrete version
    async fn latest_version(&self, name: &str) -> ScrunResult<String>;

    /// Install the `package.json` in `dir`. `Ok(false)` means npm ran and failed.
    async fn install(&self, dir: &Path, mode: InstallMode) -> ScrunResult<bool>;

    /// Install a single package spec into `dir` without saving it
    async fn add(&self, dir: &Path, spec: &str) -> ScrunResult<bool>;
}

/// npm invoked as a subprocess
#[derive(Debug, Clone)]
pub struct Npm {
    program: String,
    registry: Option<String>,
    run_scripts: bool,
}

impl Npm {
    /// Create from configuration
    pub fn new(config: &NpmConfig, run_scripts: bool) -> Self {
        Self {
            program: config.program.clone(),
            registry: config.registry.clone().filter(|r| !r.is_empty()),
            run_scripts,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.kill_on_drop(true);
        if let Some(ref registry) = self.registry {
            let already_set = std::env::var_os("NPM_CONFIG_REGISTRY").is_some()
                || std::env::var_os("npm_config_registry").is_some();
            if !already_set {
                cmd.env("NPM_CONFIG_REGISTRY", registry);
            }
        }
        cmd
    }

    /// Run to completion; an interrupt is forwarded to npm and then reported
    async fn wait(&self, mut cmd: Command) -> ScrunResult<ExitStatus> {
        let mut child = cmd
            .spawn()
            .map_err(|e| ScrunError::launch(&self.program, e))?;
        exec::supervise(child.id(), child.wait())
            .await?
            .uninterrupted()
    }

    fn install_args(&self) -> Vec<&'static str> {
        let mut args = vec!["install", "--no-audit", "--no-fund"];
        if !self.run_scripts {
            args.push("--ignore-scripts");
        }
        args
    }
}

#[async_trait]
impl PackageManager for Npm {
    async fn latest_version(&self, name: &str) -> ScrunResult<String> {
        let spec = format!("{}@latest", name);
        debug!("Querying npm for {}", spec);

        let child = self
            .command()
            .args(["view", &spec, "version", "--json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ScrunError::launch(&self.program, e))?;
        let output = exec::supervise(child.id(), child.wait_with_output())
            .await?
            .uninterrupted()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScrunError::User(format!(
                "npm view {} failed: {}",
                spec,
                stderr.trim()
            )));
        }

        parse_view_version(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ScrunError::User(format!("npm view {} returned no version", spec))
        })
    }

    async fn install(&self, dir: &Path, mode: InstallMode) -> ScrunResult<bool> {
        let mut args = self.install_args();
        args.push(mode.flag());
        debug!("Running npm {:?} in {}", args, dir.display());

        let mut cmd = self.command();
        cmd.args(&args).current_dir(dir).stdin(Stdio::null());
        if mode.is_quiet() {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            // npm chatter must never reach the script's stdout
            cmd.stdout(std::io::stderr()).stderr(Stdio::inherit());
        }

        let status = self.wait(cmd).await?;

        if !status.success() {
            warn!("npm install {} exited with {}", mode.flag(), status);
        }
        Ok(status.success())
    }

    async fn add(&self, dir: &Path, spec: &str) -> ScrunResult<bool> {
        let mut args: Vec<&str> = self.install_args();
        args.extend([spec, "--no-save", InstallMode::PreferOffline.flag()]);
        debug!("Running npm {:?} in {}", args, dir.display());

        let mut cmd = self.command();
        cmd.args(&args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let status = self.wait(cmd).await?;

        Ok(status.success())
    }
}

/// Extract the version from `npm view <pkg> version --json` output
fn parse_view_version(stdout: &str) -> Option<String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::String(v)) => Some(v),
        Ok(serde_json::Value::Array(items)) => items
            .iter()
            .rev()
            .find_map(|v| v.as_str().map(str::to_string)),
        Ok(_) => None,
        Err(_) => Some(trimmed.trim_matches('"').to_string()),
    }
}
