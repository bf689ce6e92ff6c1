//! Run command - classify the target and launch it

use crate::cache::CacheStore;
use crate::cli::Cli;
use crate::config::{Config, ConfigManager};
use crate::deps::DependencyRequest;
use crate::engine::{self, RuntimeTarget};
use crate::error::{ScrunError, ScrunResult};
use crate::exec::ExecutionDescriptor;
use crate::npm::Npm;
use crate::package_exec;
use crate::runner::{RunRequest, Runner, NODE_ENGINE};
use crate::ui::{InstallSpinner, UiContext};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Extensions tried after the literal path
const SCRIPT_EXTENSIONS: &[&str] = &[".js", ".cjs", ".ts", ".mjs", ".mts"];

/// File name used for scripts read from stdin
const STDIN_SCRIPT: &str = "script.mts";

/// What the first non-flag argument refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// No target: node evaluates or reads flags only
    Eval,
    /// `-`: script on stdin
    Stdin,
    /// Local script file
    File(PathBuf),
    /// npm package executable, optionally a named bin of it
    Package { spec: String, bin: Option<String> },
}

/// Execute the run command, returning the exit code for the process
pub async fn execute(cli: &Cli, config: &Config) -> ScrunResult<i32> {
    let split = cli.split_rest();
    let cwd = std::env::current_dir()
        .map_err(|e| ScrunError::io("reading current directory", e))?;
    let target = classify_target(split.target.as_deref(), &cli.with, &cwd)?;
    debug!("Target: {:?}", target);

    let npm = Npm::new(&config.npm, cli.run_postinstall);
    let spinner = InstallSpinner::new(UiContext::detect());
    let store = CacheStore::new(ConfigManager::cache_dir(config))
        .with_offline_first(config.npm.offline_first);
    let runner = Runner::new(config, store, &npm, &spinner);

    let mut request = RunRequest {
        script: None,
        with: cli
            .with
            .iter()
            .map(String::as_str)
            .map(DependencyRequest::parse)
            .collect(),
        engines: cli.engines(),
        node_args: split.node_args,
        script_args: split.target_args,
        cwd,
    };

    match target {
        Target::Eval => runner.run(&request).await,
        Target::File(path) => {
            request.script = Some(path);
            runner.run(&request).await
        }
        Target::Stdin => {
            let dir = read_stdin_script().await?;
            request.script = Some(dir.path().join(STDIN_SCRIPT));
            let result = runner.run(&request).await;
            if let Err(e) = dir.close() {
                debug!("Failed to remove stdin script: {}", e);
            }
            result
        }
        Target::Package { spec, bin } => {
            let runtime = negotiate_flag_engine(cli, config).await?;
            package_exec::run(
                &npm,
                &spec,
                bin.as_deref(),
                |args| ExecutionDescriptor::node(&config.runtime, &runtime, args),
                &request.node_args,
                &request.script_args,
            )
            .await
        }
    }
}

/// Decide what `target` names
///
/// A bare name that matches a local file is ambiguous unless `--with` says
/// which package to run.
pub fn classify_target(target: Option<&str>, with: &[String], cwd: &Path) -> ScrunResult<Target> {
    let Some(target) = target else {
        return Ok(Target::Eval);
    };

    if target == "-" {
        return Ok(Target::Stdin);
    }

    if is_local(target) {
        return find_script(target, cwd)
            .map(Target::File)
            .ok_or_else(|| ScrunError::ScriptNotFound(PathBuf::from(target)));
    }

    if let Some(first) = with.first() {
        return Ok(Target::Package {
            spec: first.clone(),
            bin: Some(target.to_string()),
        });
    }

    let matches = script_candidates(target, cwd)
        .filter(|(_, path)| path.exists())
        .map(|(name, _)| name)
        .collect::<Vec<_>>();
    if !matches.is_empty() {
        return Err(ScrunError::AmbiguousTarget {
            target: target.to_string(),
            matches: matches.join(", "),
        });
    }

    Ok(Target::Package {
        spec: target.to_string(),
        bin: None,
    })
}

fn is_local(target: &str) -> bool {
    ["/", "./", "../"].iter().any(|p| target.starts_with(p))
}

/// `target` and `target` + each extension, as written and resolved against `cwd`
fn script_candidates<'a>(target: &'a str, cwd: &'a Path) -> impl Iterator<Item = (String, PathBuf)> + 'a {
    std::iter::once(String::new())
        .chain(SCRIPT_EXTENSIONS.iter().map(|e| e.to_string()))
        .map(move |ext| {
            let name = format!("{}{}", target, ext);
            let path = cwd.join(&name);
            (name, path)
        })
}

fn find_script(target: &str, cwd: &Path) -> Option<PathBuf> {
    script_candidates(target, cwd)
        .map(|(_, path)| path)
        .find(|path| path.exists())
}

/// Read stdin into `<tempdir>/script.mts`
async fn read_stdin_script() -> ScrunResult<tempfile::TempDir> {
    let mut content = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut content)
        .await
        .map_err(|e| ScrunError::io("reading script from stdin", e))?;

    let dir = tempfile::Builder::new()
        .prefix("scrun-")
        .tempdir()
        .map_err(|e| ScrunError::io("creating stdin script directory", e))?;
    tokio::fs::write(dir.path().join(STDIN_SCRIPT), content)
        .await
        .map_err(|e| ScrunError::io("writing stdin script", e))?;
    Ok(dir)
}

/// Package execution honors `--engine` only; there is no manifest
async fn negotiate_flag_engine(cli: &Cli, config: &Config) -> ScrunResult<RuntimeTarget> {
    match cli.engines().get(NODE_ENGINE) {
        Some(constraint) => {
            let current = engine::probe_version(&config.runtime.node).await?;
            engine::negotiate(Some(constraint), &current)
        }
        None => Ok(RuntimeTarget::Current),
    }
}
