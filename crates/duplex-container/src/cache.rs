//! On-disk cache artifacts: the compiled plan and the proxy manifest.
//!
//! Artifacts are written at most once. A file that already holds a plan with
//! a matching fingerprint is never rewritten; a missing, corrupt, or stale
//! file is replaced atomically (temp file + rename).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{ContainerError, Result};
use crate::plan::ResolutionPlan;

/// File name of the compiled plan inside the compilation directory.
pub const PLAN_FILE: &str = "CompiledContainer.json";

/// File name of the proxy manifest inside the proxies directory.
pub const PROXIES_FILE: &str = "proxies.json";

/// Lazily proxied definitions, recorded next to the plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyManifest {
    /// Fingerprint of the plan this manifest belongs to.
    pub fingerprint: String,
    /// Labels of proxied definitions.
    pub proxies: Vec<String>,
}

/// Path of the plan file in `dir`.
pub fn plan_path(dir: &Path) -> PathBuf {
    dir.join(PLAN_FILE)
}

/// Path of the proxy manifest in `dir`.
pub fn proxies_path(dir: &Path) -> PathBuf {
    dir.join(PROXIES_FILE)
}

/// Read a cached plan if present and valid for `definitions`.
///
/// Corrupt or stale files are reported as `None` so the caller re-derives.
pub fn load_plan(dir: &Path, definitions: &BTreeMap<String, bool>) -> Option<ResolutionPlan> {
    let path = plan_path(dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable resolution plan");
            return None;
        }
    };
    match serde_json::from_str::<ResolutionPlan>(&content) {
        Ok(plan) if plan.matches(definitions) => {
            debug!(path = %path.display(), "resolution plan is current");
            Some(plan)
        }
        Ok(_) => {
            info!(path = %path.display(), "resolution plan is stale");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt resolution plan");
            None
        }
    }
}

/// Write `plan` unless a valid plan for the same fingerprint already exists.
///
/// Returns whether a file was written.
pub fn write_plan_once(dir: &Path, plan: &ResolutionPlan) -> Result<bool> {
    let path = plan_path(dir);
    if let Ok(content) = fs::read_to_string(&path) {
        if serde_json::from_str::<ResolutionPlan>(&content)
            .is_ok_and(|existing| existing.fingerprint == plan.fingerprint)
        {
            return Ok(false);
        }
    }
    write_atomic(&path, &serde_json::to_vec_pretty(plan)?)?;
    info!(path = %path.display(), entries = plan.entries.len(), "resolution plan written");
    Ok(true)
}

/// Write the proxy manifest unless an identical one already exists.
pub fn write_proxies_once(dir: &Path, manifest: &ProxyManifest) -> Result<bool> {
    let path = proxies_path(dir);
    if let Ok(content) = fs::read_to_string(&path) {
        if serde_json::from_str::<ProxyManifest>(&content)
            .is_ok_and(|existing| existing.fingerprint == manifest.fingerprint)
        {
            return Ok(false);
        }
    }
    write_atomic(&path, &serde_json::to_vec_pretty(manifest)?)?;
    info!(path = %path.display(), proxies = manifest.proxies.len(), "proxy manifest written");
    Ok(true)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let io_err = |source| ContainerError::CacheIo {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
