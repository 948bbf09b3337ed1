//! Cache root and size-limit resolution.
//!
//! Precedence for each root: explicit override, then environment variable,
//! then a fixed default under the user cache directory.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use dirs_next::home_dir;

pub const HUB_ROOT_ENV: &str = "HUBCACHE_HOME";
pub const DEDUP_ROOT_ENV: &str = "HUBCACHE_DEDUP_HOME";
pub const CHUNK_LIMIT_ENV: &str = "HUBCACHE_CHUNK_CACHE_BYTES";
pub const SHARD_LIMIT_ENV: &str = "HUBCACHE_SHARD_CACHE_BYTES";

pub const DEFAULT_CHUNK_CACHE_BYTES: u64 = 10 * 1024 * 1024 * 1024;
pub const DEFAULT_SHARD_CACHE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Point-in-time view of the process environment, so configuration reads are
/// consistent and testable without mutating global state.
#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Resolved cache configuration: the two on-disk roots plus the dedup size
/// limits.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub hub_root: PathBuf,
    pub dedup_root: PathBuf,
    pub chunk_limit_bytes: u64,
    pub shard_limit_bytes: u64,
}

impl CacheConfig {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if no base cache directory can be determined.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let hub_root = match snapshot.var(HUB_ROOT_ENV) {
            Some(path) => absolutize(PathBuf::from(path))?,
            None => default_base(snapshot)?.join("hub"),
        };
        let dedup_root = match snapshot.var(DEDUP_ROOT_ENV) {
            Some(path) => absolutize(PathBuf::from(path))?,
            None => default_base(snapshot)?.join("dedup"),
        };
        Ok(Self {
            hub_root,
            dedup_root,
            chunk_limit_bytes: parse_limit(snapshot, CHUNK_LIMIT_ENV, DEFAULT_CHUNK_CACHE_BYTES),
            shard_limit_bytes: parse_limit(snapshot, SHARD_LIMIT_ENV, DEFAULT_SHARD_CACHE_BYTES),
        })
    }

    /// Explicit-override constructor, mainly for embedding and tests.
    #[must_use]
    pub fn with_roots(hub_root: impl Into<PathBuf>, dedup_root: impl Into<PathBuf>) -> Self {
        Self {
            hub_root: hub_root.into(),
            dedup_root: dedup_root.into(),
            chunk_limit_bytes: DEFAULT_CHUNK_CACHE_BYTES,
            shard_limit_bytes: DEFAULT_SHARD_CACHE_BYTES,
        }
    }

    #[must_use]
    pub fn chunk_limit(mut self, bytes: u64) -> Self {
        self.chunk_limit_bytes = bytes;
        self
    }

    #[must_use]
    pub fn shard_limit(mut self, bytes: u64) -> Self {
        self.shard_limit_bytes = bytes;
        self
    }
}

fn parse_limit(snapshot: &EnvSnapshot, key: &str, default: u64) -> u64 {
    match snapshot.var(key).map(str::parse::<u64>) {
        Some(Ok(value)) => value,
        Some(Err(_)) => {
            tracing::warn!(key, "ignoring unparseable size limit override");
            default
        }
        None => default,
    }
}

fn default_base(snapshot: &EnvSnapshot) -> Result<PathBuf> {
    if let Some(xdg) = snapshot.var("XDG_CACHE_HOME") {
        return Ok(PathBuf::from(xdg).join("hubcache"));
    }
    let home = home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(home.join(".cache").join("hubcache"))
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()
            .context("failed to resolve relative cache root")?
            .join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_take_precedence() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            (HUB_ROOT_ENV, "/custom/hub"),
            (DEDUP_ROOT_ENV, "/custom/dedup"),
            (CHUNK_LIMIT_ENV, "1024"),
            (SHARD_LIMIT_ENV, "2048"),
        ]);
        let config = CacheConfig::from_snapshot(&snapshot)?;
        assert_eq!(config.hub_root, PathBuf::from("/custom/hub"));
        assert_eq!(config.dedup_root, PathBuf::from("/custom/dedup"));
        assert_eq!(config.chunk_limit_bytes, 1024);
        assert_eq!(config.shard_limit_bytes, 2048);
        Ok(())
    }

    #[test]
    fn defaults_live_under_xdg_cache_home() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[("XDG_CACHE_HOME", "/xdg")]);
        let config = CacheConfig::from_snapshot(&snapshot)?;
        assert_eq!(config.hub_root, PathBuf::from("/xdg/hubcache/hub"));
        assert_eq!(config.dedup_root, PathBuf::from("/xdg/hubcache/dedup"));
        assert_eq!(config.chunk_limit_bytes, DEFAULT_CHUNK_CACHE_BYTES);
        assert_eq!(config.shard_limit_bytes, DEFAULT_SHARD_CACHE_BYTES);
        Ok(())
    }

    #[test]
    fn bad_limit_override_falls_back_to_default() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            ("XDG_CACHE_HOME", "/xdg"),
            (CHUNK_LIMIT_ENV, "ten gigabytes"),
        ]);
        let config = CacheConfig::from_snapshot(&snapshot)?;
        assert_eq!(config.chunk_limit_bytes, DEFAULT_CHUNK_CACHE_BYTES);
        Ok(())
    }
}
