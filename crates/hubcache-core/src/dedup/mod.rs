//! The dedup cache: sub-file deduplication below the hub cache.
//!
//! Layout under the dedup root:
//!
//! ```text
//! <dedup root>/
//!   chunk_cache/<first two hex>/<chunk id>   raw chunk bytes
//!   shard_cache/<shard id>                   JSON shard records
//!   staging/<session id>/                    resumable upload sessions
//! ```
//!
//! Everything here is advisory. A missing chunk costs a re-fetch, a missing
//! shard costs a re-upload, a deleted staging session costs resume progress.
//! None of it is a source of truth.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::CacheConfig;

pub mod chunks;
pub mod shards;
pub mod staging;

pub const CHUNK_CACHE_DIR: &str = "chunk_cache";
pub const SHARD_CACHE_DIR: &str = "shard_cache";
pub const STAGING_DIR: &str = "staging";
pub(crate) const TMP_DIR: &str = ".tmp";

/// Handle bundling the three dedup stores rooted at one directory.
#[derive(Debug)]
pub struct DedupCache {
    root: PathBuf,
    chunks: chunks::ChunkStore,
    shards: shards::ShardStore,
    staging: staging::StagingArea,
}

impl DedupCache {
    /// Open (creating if necessary) the dedup cache described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory tree cannot be created.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let root = config.dedup_root.clone();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create dedup cache root {}", root.display()))?;
        let tmp = root.join(TMP_DIR);
        let chunks = chunks::ChunkStore::open(
            root.join(CHUNK_CACHE_DIR),
            tmp.clone(),
            config.chunk_limit_bytes,
        )?;
        let shards = shards::ShardStore::open(
            root.join(SHARD_CACHE_DIR),
            tmp.clone(),
            config.shard_limit_bytes,
        )?;
        let staging = staging::StagingArea::open(root.join(STAGING_DIR), tmp)?;
        Ok(Self {
            root,
            chunks,
            shards,
            staging,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn chunks(&self) -> &chunks::ChunkStore {
        &self.chunks
    }

    #[must_use]
    pub fn shards(&self) -> &shards::ShardStore {
        &self.shards
    }

    #[must_use]
    pub fn staging(&self) -> &staging::StagingArea {
        &self.staging
    }
}

#[cfg(test)]
mod tests;
