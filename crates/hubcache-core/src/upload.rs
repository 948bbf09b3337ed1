//! Chunked, resumable, dedup-aware file upload.

use anyhow::{bail, Result};
use tracing::debug;

use hubcache_types::BlobId;

use crate::dedup::chunks::chunk_bytes;
use crate::dedup::shards::ShardStore;
use crate::dedup::staging::StagingSession;
use crate::hub::digest_hex;
use crate::transfer::{Transfer, UploadAck};

/// What happened to each chunk of one uploaded file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOutcome {
    pub file: BlobId,
    pub total_chunks: usize,
    /// Chunks actually sent over the transport this call.
    pub uploaded: usize,
    /// Chunks skipped because this session already had them accepted.
    pub skipped_staged: usize,
    /// Chunks skipped because an active shard records them remotely.
    pub skipped_shard: usize,
}

/// Upload one file's bytes chunk by chunk.
///
/// Every chunk takes the cheapest available path: already accepted in this
/// session, skip; recorded in an active shard, skip and note it; otherwise
/// send it and durably record acceptance before moving on. Interrupting and
/// re-running with the same session re-sends only what was never accepted.
///
/// # Errors
///
/// Returns an error if the transport fails, if the remote rejects a chunk,
/// or if progress cannot be durably recorded. Progress recorded before the
/// failure survives for a later resume.
pub fn upload_file(
    bytes: &[u8],
    transfer: &dyn Transfer,
    session: &StagingSession,
    shards: &ShardStore,
) -> Result<UploadOutcome> {
    let file = BlobId::new(digest_hex(bytes));
    let chunks = chunk_bytes(bytes);
    session.record_file(&file, &chunks.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>())?;

    let mut outcome = UploadOutcome {
        file: file.clone(),
        total_chunks: chunks.len(),
        uploaded: 0,
        skipped_staged: 0,
        skipped_shard: 0,
    };
    let already_accepted = session.accepted_chunks(&file);

    for (chunk, data) in &chunks {
        if already_accepted.contains(chunk) {
            outcome.skipped_staged += 1;
            continue;
        }
        if let Some(shard) = shards.lookup(chunk) {
            debug!(%file, %chunk, %shard, "chunk already stored remotely");
            session.record_skipped(&file, chunk)?;
            outcome.skipped_shard += 1;
            continue;
        }
        match transfer.upload_chunk(data)? {
            UploadAck::Accepted => {
                session.record_accepted(&file, chunk)?;
                outcome.uploaded += 1;
            }
            UploadAck::Rejected => {
                bail!("remote rejected chunk {chunk} of file {file}");
            }
        }
    }

    debug!(
        %file,
        total = outcome.total_chunks,
        uploaded = outcome.uploaded,
        skipped_staged = outcome.skipped_staged,
        skipped_shard = outcome.skipped_shard,
        "file upload complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::Result;
    use tempfile::{tempdir, TempDir};

    use hubcache_types::{ChunkId, RepoId, RevisionId, Shard, ShardId};

    use crate::config::CacheConfig;
    use crate::dedup::chunks::CHUNK_SIZE;
    use crate::dedup::DedupCache;
    use crate::timestamp_secs;
    use crate::transfer::FetchedFile;

    struct CountingRemote {
        uploads: AtomicUsize,
        reject_after: Option<usize>,
    }

    impl CountingRemote {
        fn accepting() -> Self {
            Self {
                uploads: AtomicUsize::new(0),
                reject_after: None,
            }
        }

        fn rejecting_after(n: usize) -> Self {
            Self {
                uploads: AtomicUsize::new(0),
                reject_after: Some(n),
            }
        }

        fn upload_count(&self) -> usize {
            self.uploads.load(Ordering::SeqCst)
        }
    }

    impl Transfer for CountingRemote {
        fn fetch_file(
            &self,
            _repo: &RepoId,
            _revision: &RevisionId,
            _path: &str,
        ) -> Result<FetchedFile> {
            Ok(FetchedFile::NotFound)
        }

        fn upload_chunk(&self, _chunk: &[u8]) -> Result<UploadAck> {
            let seen = self.uploads.fetch_add(1, Ordering::SeqCst);
            match self.reject_after {
                Some(limit) if seen >= limit => Ok(UploadAck::Rejected),
                _ => Ok(UploadAck::Accepted),
            }
        }
    }

    fn new_cache() -> Result<(TempDir, DedupCache)> {
        let temp = tempdir()?;
        let config = CacheConfig::with_roots(temp.path().join("hub"), temp.path().join("dedup"));
        let cache = DedupCache::open(&config)?;
        Ok((temp, cache))
    }

    fn payload(chunks: usize) -> Vec<u8> {
        (0..chunks)
            .flat_map(|i| vec![u8::try_from(i).unwrap_or(0xab); CHUNK_SIZE])
            .collect()
    }

    #[test]
    fn all_chunks_upload_on_a_fresh_session() -> Result<()> {
        let (_temp, cache) = new_cache()?;
        let remote = CountingRemote::accepting();
        let session = cache.staging().session("fresh")?;
        let bytes = payload(4);

        let outcome = upload_file(&bytes, &remote, &session, cache.shards())?;
        assert_eq!(outcome.total_chunks, 4);
        assert_eq!(outcome.uploaded, 4);
        assert_eq!(outcome.skipped_staged, 0);
        assert_eq!(outcome.skipped_shard, 0);
        assert_eq!(remote.upload_count(), 4);
        Ok(())
    }

    #[test]
    fn resuming_after_rejection_sends_only_missing_chunks() -> Result<()> {
        let (_temp, cache) = new_cache()?;
        let bytes = payload(5);

        // First attempt: three chunks accepted, the fourth rejected.
        let remote = CountingRemote::rejecting_after(3);
        let session = cache.staging().session("interrupted")?;
        assert!(upload_file(&bytes, &remote, &session, cache.shards()).is_err());
        assert_eq!(remote.upload_count(), 4);

        // Resume with the same session id: exactly the two unfinished chunks
        // go over the wire.
        let remote = CountingRemote::accepting();
        let session = cache.staging().session("interrupted")?;
        let outcome = upload_file(&bytes, &remote, &session, cache.shards())?;
        assert_eq!(outcome.uploaded, 2);
        assert_eq!(outcome.skipped_staged, 3);
        assert_eq!(remote.upload_count(), 2);
        Ok(())
    }

    #[test]
    fn chunks_recorded_in_active_shards_are_not_resent() -> Result<()> {
        let (_temp, cache) = new_cache()?;
        let bytes = payload(3);
        let chunk_ids: Vec<ChunkId> = chunk_bytes(&bytes).into_iter().map(|(id, _)| id).collect();

        // A prior upload published a shard covering the first two chunks.
        let mut files = BTreeMap::new();
        files.insert(BlobId::new("earlier-file"), chunk_ids[0..2].to_vec());
        cache.shards().put(&Shard {
            shard_id: ShardId::new("prior"),
            created_at: timestamp_secs(),
            files,
        })?;

        let remote = CountingRemote::accepting();
        let session = cache.staging().session("dedup")?;
        let outcome = upload_file(&bytes, &remote, &session, cache.shards())?;
        assert_eq!(outcome.uploaded, 1);
        assert_eq!(outcome.skipped_shard, 2);
        assert_eq!(remote.upload_count(), 1);
        Ok(())
    }

    #[test]
    fn committing_after_upload_enables_dedup_for_the_next_session() -> Result<()> {
        let (_temp, cache) = new_cache()?;
        let bytes = payload(2);

        let remote = CountingRemote::accepting();
        let session = cache.staging().session("first")?;
        upload_file(&bytes, &remote, &session, cache.shards())?;
        session.commit(cache.shards())?;

        // Same content in a brand-new session uploads nothing.
        let remote = CountingRemote::accepting();
        let session = cache.staging().session("second")?;
        let outcome = upload_file(&bytes, &remote, &session, cache.shards())?;
        assert_eq!(outcome.uploaded, 0);
        assert_eq!(outcome.skipped_shard, 2);
        assert_eq!(remote.upload_count(), 0);
        Ok(())
    }
}
