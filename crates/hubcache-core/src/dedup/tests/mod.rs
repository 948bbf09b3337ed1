use super::*;
use anyhow::Result;
use tempfile::{tempdir, TempDir};

use hubcache_types::ChunkId;

use crate::config::CacheConfig;

fn new_cache() -> Result<(TempDir, DedupCache)> {
    let temp = tempdir()?;
    let config = CacheConfig::with_roots(temp.path().join("hub"), temp.path().join("dedup"));
    let cache = DedupCache::open(&config)?;
    Ok((temp, cache))
}

fn new_cache_with_chunk_limit(bytes: u64) -> Result<(TempDir, DedupCache)> {
    let temp = tempdir()?;
    let config = CacheConfig::with_roots(temp.path().join("hub"), temp.path().join("dedup"))
        .chunk_limit(bytes);
    let cache = DedupCache::open(&config)?;
    Ok((temp, cache))
}

fn chunk_of(data: &[u8]) -> ChunkId {
    ChunkId::new(crate::hub::digest_hex(data))
}

mod shards;
mod staging;
