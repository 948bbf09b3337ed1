//! Shard metadata store for upload-side dedup lookups.
//!
//! Shards are small JSON records, one flat file per shard id. They expire on
//! a fixed horizon after creation and are physically deleted one grace period
//! later, so a shard observed by a concurrent reader right at expiry is still
//! on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use hubcache_types::{BlobId, ChunkId, CorruptionWarning, Shard, ShardId};

use crate::fsio::write_atomic;
use crate::timestamp_secs;

/// How long a shard stays eligible for dedup lookups.
pub const SHARD_EXPIRY: Duration = Duration::from_secs(28 * 24 * 60 * 60);
/// Extra time an expired shard stays on disk before the sweep removes it.
pub const SHARD_GRACE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Shards physically removed by an expiry sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub swept: usize,
    pub swept_bytes: u64,
}

/// Store of shard records keyed by shard id.
///
/// The size bound here is advisory: shards are cheap metadata, overflow is
/// handled by expiry rather than eviction, and exceeding the bound only
/// produces a warning.
#[derive(Debug)]
pub struct ShardStore {
    root: PathBuf,
    tmp: PathBuf,
    limit_bytes: u64,
}

impl ShardStore {
    pub(crate) fn open(root: PathBuf, tmp: PathBuf, limit_bytes: u64) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create shard cache at {}", root.display()))?;
        Ok(Self {
            root,
            tmp,
            limit_bytes,
        })
    }

    fn shard_path(&self, shard: &ShardId) -> PathBuf {
        self.root.join(shard.as_str())
    }

    /// Persist a shard record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be durably written.
    pub fn put(&self, shard: &Shard) -> Result<()> {
        let dest = self.shard_path(&shard.shard_id);
        let json = serde_json::to_vec(shard).context("failed to encode shard record")?;
        write_atomic(&self.tmp, &dest, &json)
            .with_context(|| format!("failed to store shard {}", shard.shard_id))?;
        debug!(shard = %shard.shard_id, chunks = shard.chunk_count(), "shard stored");

        let resident = self.resident_bytes();
        if resident > self.limit_bytes {
            warn!(
                resident_bytes = resident,
                limit_bytes = self.limit_bytes,
                "shard cache exceeds its advisory size bound"
            );
        }
        Ok(())
    }

    /// Find a non-expired shard that records `chunk` as stored remotely.
    ///
    /// Advisory lookup: unreadable or malformed shard files are skipped, not
    /// surfaced.
    #[must_use]
    pub fn lookup(&self, chunk: &ChunkId) -> Option<ShardId> {
        let now = timestamp_secs();
        for (path, shard) in self.readable_shards() {
            if is_expired(&shard, now) {
                continue;
            }
            if shard.contains_chunk(chunk) {
                debug!(shard = %shard.shard_id, %chunk, path = %path.display(), "chunk dedup hit");
                return Some(shard.shard_id);
            }
        }
        None
    }

    /// Fetch one shard by id, expired or not.
    #[must_use]
    pub fn get(&self, shard: &ShardId) -> Option<Shard> {
        load_shard(&self.shard_path(shard)).ok()
    }

    /// All non-expired shards.
    #[must_use]
    pub fn list_active(&self) -> Vec<Shard> {
        let now = timestamp_secs();
        let mut shards: Vec<Shard> = self
            .readable_shards()
            .into_iter()
            .map(|(_, shard)| shard)
            .filter(|shard| !is_expired(shard, now))
            .collect();
        shards.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        shards
    }

    /// Physically delete shards past expiry plus grace.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store directory cannot be listed;
    /// individual removals racing other processes are tolerated.
    pub fn sweep_expired(&self) -> Result<SweepSummary> {
        let now = timestamp_secs();
        let horizon = SHARD_EXPIRY.as_secs() + SHARD_GRACE.as_secs();
        let mut summary = SweepSummary::default();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("failed to list shard cache {}", self.root.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let shard = match load_shard(&path) {
                Ok(shard) => shard,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable shard during sweep");
                    continue;
                }
            };
            if now.saturating_sub(shard.created_at) <= horizon {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if fs::remove_file(&path).is_ok() {
                summary.swept += 1;
                summary.swept_bytes += size;
            }
        }
        debug!(
            swept = summary.swept,
            swept_bytes = summary.swept_bytes,
            "shard expiry sweep complete"
        );
        Ok(summary)
    }

    /// Total bytes of shard records on disk (advisory bound monitoring).
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .flatten()
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }

    /// Flag shard files that no lookup can use.
    #[must_use]
    pub fn verify(&self) -> Vec<CorruptionWarning> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut warnings = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            if let Err(err) = load_shard(&path) {
                warnings.push(CorruptionWarning::MalformedShard {
                    path,
                    detail: err.to_string(),
                });
            }
        }
        warnings.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        warnings
    }

    fn readable_shards(&self) -> Vec<(PathBuf, Shard)> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| {
                let path = entry.path();
                load_shard(&path).ok().map(|shard| (path, shard))
            })
            .collect()
    }
}

fn is_expired(shard: &Shard, now: u64) -> bool {
    now.saturating_sub(shard.created_at) > SHARD_EXPIRY.as_secs()
}

fn load_shard(path: &Path) -> Result<Shard> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read shard at {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to decode shard at {}", path.display()))
}

/// Deterministic shard id: hash of the canonical (sorted-key) file map.
#[must_use]
pub fn shard_id_for(files: &BTreeMap<BlobId, Vec<ChunkId>>) -> ShardId {
    let mut hasher = Sha256::new();
    for (file, chunks) in files {
        hasher.update(file.as_str().as_bytes());
        hasher.update([0u8]);
        for chunk in chunks {
            hasher.update(chunk.as_str().as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xff]);
    }
    ShardId::new(hex::encode(hasher.finalize()))
}
