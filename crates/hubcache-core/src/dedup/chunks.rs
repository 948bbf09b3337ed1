//! Bounded content-addressed chunk cache for the download path.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::debug;

use hubcache_types::ChunkId;

use crate::fsio::write_atomic;

/// Nominal chunk size; the last chunk of a file may be shorter.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks evicted to bring the store back under its size limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvictionSummary {
    pub evicted: usize,
    pub evicted_bytes: u64,
}

/// Content-addressed store of immutable chunks, sharded by the first two hex
/// characters of the chunk id to bound directory fan-out.
///
/// Purely advisory: absence means "re-fetch", never an error. When an insert
/// pushes resident bytes past the limit, uniformly random resident chunks are
/// evicted; no access-order metadata is kept.
#[derive(Debug)]
pub struct ChunkStore {
    root: PathBuf,
    tmp: PathBuf,
    limit_bytes: u64,
}

impl ChunkStore {
    pub(crate) fn open(root: PathBuf, tmp: PathBuf, limit_bytes: u64) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create chunk cache at {}", root.display()))?;
        Ok(Self {
            root,
            tmp,
            limit_bytes,
        })
    }

    #[must_use]
    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    fn chunk_path(&self, chunk: &ChunkId) -> PathBuf {
        let shard = chunk.as_str().get(0..2).unwrap_or("xx");
        self.root.join(shard).join(chunk.as_str())
    }

    /// Fetch a chunk's bytes. Any failure, including the chunk vanishing
    /// between lookup and read under a concurrent eviction, is a miss.
    #[must_use]
    pub fn lookup(&self, chunk: &ChunkId) -> Option<Vec<u8>> {
        fs::read(self.chunk_path(chunk)).ok()
    }

    #[must_use]
    pub fn contains(&self, chunk: &ChunkId) -> bool {
        self.chunk_path(chunk).is_file()
    }

    /// Insert a chunk, then evict random residents until the store is back
    /// under its limit. Inserting an already-present id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be durably written.
    pub fn insert(&self, chunk: &ChunkId, bytes: &[u8]) -> Result<EvictionSummary> {
        let dest = self.chunk_path(chunk);
        if dest.exists() {
            return Ok(EvictionSummary::default());
        }
        write_atomic(&self.tmp, &dest, bytes)
            .with_context(|| format!("failed to store chunk {chunk}"))?;
        self.enforce_limit()
    }

    /// Total bytes currently resident, enumerated from disk so the answer is
    /// correct under concurrent mutation by other processes.
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        self.resident_entries()
            .iter()
            .map(|(_, size)| *size)
            .sum()
    }

    /// Evict uniformly random chunks until resident bytes fit the limit.
    ///
    /// # Errors
    ///
    /// This never fails on individual removals (a chunk already gone was
    /// evicted by someone else); the `Result` is kept for future layout
    /// failures and symmetry with `insert`.
    pub fn enforce_limit(&self) -> Result<EvictionSummary> {
        let mut entries = self.resident_entries();
        let mut total: u64 = entries.iter().map(|(_, size)| *size).sum();
        let mut summary = EvictionSummary::default();
        if total <= self.limit_bytes {
            return Ok(summary);
        }

        let mut rng = rand::thread_rng();
        while total > self.limit_bytes && !entries.is_empty() {
            let victim = rng.gen_range(0..entries.len());
            let (path, size) = entries.swap_remove(victim);
            // Already removed by a concurrent process is fine.
            let _ = fs::remove_file(&path);
            total = total.saturating_sub(size);
            summary.evicted += 1;
            summary.evicted_bytes += size;
        }
        debug!(
            evicted = summary.evicted,
            evicted_bytes = summary.evicted_bytes,
            limit_bytes = self.limit_bytes,
            "chunk cache eviction complete"
        );
        Ok(summary)
    }

    fn resident_entries(&self) -> Vec<(PathBuf, u64)> {
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .flatten()
        {
            if entry.file_type().is_file() {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                entries.push((entry.into_path(), size));
            }
        }
        entries
    }

    #[cfg(test)]
    pub(crate) fn path_of(&self, chunk: &ChunkId) -> PathBuf {
        self.chunk_path(chunk)
    }
}

/// Split bytes into fixed-size chunks with their content-hash identities.
#[must_use]
pub fn chunk_bytes(bytes: &[u8]) -> Vec<(ChunkId, &[u8])> {
    bytes
        .chunks(CHUNK_SIZE)
        .map(|data| (ChunkId::new(crate::hub::digest_hex(data)), data))
        .collect()
}
