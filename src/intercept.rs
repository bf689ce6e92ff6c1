//! Module resolution interception for the launched node process
//!
//! Two small artifacts are generated per (cache dir, hard set, ambient dirs):
//! an ESM resolve hook loaded with `--experimental-loader` and a CommonJS
//! preload loaded with `-r` that wraps `Module._resolveFilename`. Both apply
//! the same rules to bare specifiers only:
//!
//! - a hard dependency resolves from the cache entry first
//! - anything else uses default resolution and falls back to the cache entry
//!   and then the ambient directories when nothing was found
//!
//! Relative, absolute, `node:` and other URL specifiers are passed through.

use crate::error::{ScrunError, ScrunResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Search-path variable consulted by node's CommonJS resolver
pub const NODE_PATH: &str = "NODE_PATH";

/// Directory under the cache root holding generated artifacts
const ARTIFACT_DIR: &str = "interceptors";

const ESM_HOOK: &str = r#"import { join } from 'node:path';
import { pathToFileURL } from 'node:url';

const CACHE = __CACHE__;
const FALLBACK = __FALLBACK__;
const HARD = new Set(__HARD__);

const isBare = (s) => !s.startsWith('.') && !s.startsWith('/') && !/^[a-zA-Z][a-zA-Z\d+.-]*:/.test(s);
const packageName = (s) => s.split('/').slice(0, s.startsWith('@') ? 2 : 1).join('/');
const notFound = (e) => e && (e.code === 'ERR_MODULE_NOT_FOUND' || e.code === 'ERR_PACKAGE_PATH_NOT_EXPORTED');
const parentIn = (dir) => pathToFileURL(join(dir, '_')).href;

async function fromDirs(dirs, specifier, context, nextResolve, original) {
  for (const dir of dirs) {
    try {
      return await nextResolve(specifier, { ...context, parentURL: parentIn(dir) });
    } catch (e) {
      if (!notFound(e)) throw e;
    }
  }
  throw original;
}

export async function resolve(specifier, context, nextResolve) {
  if (!isBare(specifier)) return nextResolve(specifier, context);
  if (CACHE && HARD.has(packageName(specifier))) {
    return nextResolve(specifier, { ...context, parentURL: parentIn(CACHE) });
  }
  try {
    return await nextResolve(specifier, context);
  } catch (e) {
    if (!notFound(e)) throw e;
    return fromDirs(FALLBACK, specifier, context, nextResolve, e);
  }
}
"#;

const CJS_PRELOAD: &str = r#"'use strict';
const Module = require('node:module');
const path = require('node:path');

const CACHE = __CACHE__;
const FALLBACK = __FALLBACK__;
const HARD = new Set(__HARD__);

const isBare = (s) => !s.startsWith('.') && !path.isAbsolute(s) && !/^[a-zA-Z][a-zA-Z\d+.-]*:/.test(s);
const packageName = (s) => s.split('/').slice(0, s.startsWith('@') ? 2 : 1).join('/');
const isBuiltin = (s) => (Module.isBuiltin ? Module.isBuiltin(s) : Module.builtinModules.includes(s));
const lookIn = (dir) => ({ paths: [path.dirname(dir)] });
const original = Module._resolveFilename;

Module._resolveFilename = function (request, parent, isMain, options) {
  if (!isBare(request) || isBuiltin(request)) {
    return original.call(this, request, parent, isMain, options);
  }
  if (CACHE && HARD.has(packageName(request))) {
    return original.call(this, request, parent, isMain, lookIn(CACHE));
  }
  try {
    return original.call(this, request, parent, isMain, options);
  } catch (e) {
    if (!e || e.code !== 'MODULE_NOT_FOUND') throw e;
    for (const dir of FALLBACK) {
      try {
        return original.call(this, request, parent, isMain, lookIn(dir));
      } catch (inner) {
        if (!inner || inner.code !== 'MODULE_NOT_FOUND') throw inner;
      }
    }
    throw e;
  }
};
"#;

/// What the launched process needs to see the planned module tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterceptPlan {
    /// `node_modules` of the cache entry, if one is used
    pub cache_modules: Option<PathBuf>,
    /// Dependencies that must come from the cache entry
    pub hard: BTreeSet<String>,
    /// `node_modules` directories of resolved soft dependencies
    pub ambient: Vec<PathBuf>,
}

/// Node flags and environment produced by [`prepare`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interception {
    /// Flags placed before any user node flags
    pub node_args: Vec<String>,
    /// Variables added to the inherited environment
    pub env: Vec<(String, OsString)>,
}

impl InterceptPlan {
    /// Nothing to redirect
    pub fn is_empty(&self) -> bool {
        self.cache_modules.is_none() && self.ambient.is_empty()
    }

    fn fallback_dirs(&self) -> Vec<&Path> {
        self.cache_modules
            .iter()
            .map(PathBuf::as_path)
            .chain(self.ambient.iter().map(PathBuf::as_path))
            .collect()
    }

    fn substitute(&self, template: &str) -> ScrunResult<String> {
        let cache = serde_json::to_string(&self.cache_modules.as_deref().map(path_text))?;
        let fallback = serde_json::to_string(
            &self.fallback_dirs().into_iter().map(path_text).collect::<Vec<_>>(),
        )?;
        let hard = serde_json::to_string(&self.hard)?;
        Ok(template
            .replace("__CACHE__", &cache)
            .replace("__FALLBACK__", &fallback)
            .replace("__HARD__", &hard))
    }

    /// Source of the ESM resolve hook
    pub fn render_esm_hook(&self) -> ScrunResult<String> {
        self.substitute(ESM_HOOK)
    }

    /// Source of the CommonJS preload
    pub fn render_cjs_preload(&self) -> ScrunResult<String> {
        self.substitute(CJS_PRELOAD)
    }

    /// `NODE_PATH` value: cache first, ambient dirs, then the inherited entries
    pub fn node_path(&self, inherited: Option<OsString>) -> ScrunResult<OsString> {
        let mut entries: Vec<PathBuf> = self
            .fallback_dirs()
            .into_iter()
            .map(Path::to_path_buf)
            .collect();
        if let Some(existing) = inherited.filter(|v| !v.is_empty()) {
            entries.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(entries)
            .map_err(|e| ScrunError::User(format!("Cannot build {}: {}", NODE_PATH, e)))
    }
}

/// Write the artifacts under `cache_root` and compose the launch flags
pub async fn prepare(cache_root: &Path, plan: &InterceptPlan) -> ScrunResult<Interception> {
    if plan.is_empty() {
        return Ok(Interception::default());
    }

    let dir = cache_root.join(ARTIFACT_DIR);
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| ScrunError::io(format!("creating {}", dir.display()), e))?;

    let preload = write_artifact(&dir, "cjs", &plan.render_cjs_preload()?).await?;
    let hook = write_artifact(&dir, "mjs", &plan.render_esm_hook()?).await?;

    let node_path = plan.node_path(std::env::var_os(NODE_PATH))?;
    Ok(Interception {
        node_args: vec![
            "-r".to_string(),
            path_text(&preload),
            "--experimental-loader".to_string(),
            file_url(&hook),
            "--no-warnings".to_string(),
        ],
        env: vec![(NODE_PATH.to_string(), node_path)],
    })
}

/// Content-addressed write; an existing file with the same name is reused
async fn write_artifact(dir: &Path, extension: &str, content: &str) -> ScrunResult<PathBuf> {
    let digest = Sha256::digest(content.as_bytes());
    let path = dir.join(format!("{}.{}", hex::encode(&digest[..6]), extension));
    if fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(path);
    }

    let temp = dir.join(format!(
        ".{}.{}.tmp",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        std::process::id()
    ));
    fs::write(&temp, content)
        .await
        .map_err(|e| ScrunError::io(format!("writing {}", temp.display()), e))?;
    fs::rename(&temp, &path)
        .await
        .map_err(|e| ScrunError::io(format!("installing {}", path.display()), e))?;
    debug!("Wrote interceptor {}", path.display());
    Ok(path)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `file://` URL for an absolute path, as `--experimental-loader` expects
fn file_url(path: &Path) -> String {
    let text = path_text(path).replace('\\', "/");
    let mut url = String::from("file://");
    if !text.starts_with('/') {
        url.push('/');
    }
    for c in text.chars() {
        match c {
            '%' => url.push_str("%25"),
            ' ' => url.push_str("%20"),
            '#' => url.push_str("%23"),
            '?' => url.push_str("%3F"),
            other => url.push(other),
        }
    }
    url
}
