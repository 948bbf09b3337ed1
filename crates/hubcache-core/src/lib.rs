//! On-disk caching and deduplication engine for versioned file trees.
//!
//! Two cooperating caches live here. The hub cache deduplicates whole files
//! across revisions of remote repositories: immutable content-addressed blobs
//! shared between revision snapshots through filesystem links. The dedup
//! cache works below file granularity: a bounded chunk cache for downloads, a
//! shard metadata store for upload-side dedup lookups, and a staging area
//! that makes interrupted uploads resumable.
//!
//! The filesystem is the only database. Every mutation is a write to a
//! uniquely-named temporary file followed by an atomic rename, so independent
//! processes sharing a cache root never observe half-written state and never
//! need a lock manager.

pub mod config;
pub mod dedup;
pub mod delete;
pub mod fetch;
mod fsio;
pub mod hub;
pub mod scan;
pub mod transfer;
pub mod upload;

pub use config::CacheConfig;
pub use dedup::chunks::{chunk_bytes, ChunkStore, EvictionSummary, CHUNK_SIZE};
pub use dedup::shards::{ShardStore, SweepSummary};
pub use dedup::staging::{StagingArea, StagingSession};
pub use dedup::DedupCache;
pub use delete::{plan_deletion, DeletionPlan, ExecutionSummary};
pub use fetch::{fetch_path, resolve_revision, FetchOutcome};
pub use hub::{HubCache, LinkStrategy, PathResolution, RepoCache};
pub use scan::{scan_hub, CacheReport, RepoReport, RevisionReport};
pub use transfer::{FetchedFile, Transfer, UploadAck};
pub use upload::{upload_file, UploadOutcome};

pub use hubcache_types::{
    BlobId, ChunkId, CorruptionWarning, RepoId, RepoKind, RevisionId, Shard, ShardId,
};

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
