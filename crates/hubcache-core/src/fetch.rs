//! Cache-first file fetch: local hit, negative hit, or remote round-trip.

use anyhow::Result;
use tracing::warn;

use hubcache_types::RevisionId;

use crate::hub::{PathResolution, RepoCache};
use crate::transfer::{FetchedFile, Transfer};

/// Where a fetched file's bytes came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Served from the local cache without touching the transport.
    Hit(Vec<u8>),
    /// Fetched remotely and cached for next time.
    Fetched(Vec<u8>),
    /// The remote (or a cached negative entry) says the file does not exist.
    NotFound,
}

/// Fetch one file of one revision, consulting the cache before the remote.
///
/// A known-absent entry answers without any transport call. A broken local
/// binding (dangling link, vanished blob) degrades to a remote fetch rather
/// than an error. After a successful remote fetch the bytes are cached; if
/// caching fails the bytes are still returned, the cache just stays cold.
///
/// # Errors
///
/// Returns an error if the transport itself fails, or if the cached state
/// for this path cannot be examined.
/// Interpret a user-supplied name as a ref when one exists, otherwise as a
/// literal revision id.
///
/// # Errors
///
/// Returns an error if the refs directory cannot be read.
pub fn resolve_revision(repo: &RepoCache, rev_or_ref: &str) -> Result<RevisionId> {
    match repo.resolve_ref(rev_or_ref)? {
        Some(revision) => Ok(revision),
        None => Ok(RevisionId::new(rev_or_ref)),
    }
}

pub fn fetch_path(
    repo: &RepoCache,
    revision: &RevisionId,
    path: &str,
    transfer: &dyn Transfer,
) -> Result<FetchOutcome> {
    match repo.resolve_path(revision, path)? {
        PathResolution::KnownAbsent => return Ok(FetchOutcome::NotFound),
        PathResolution::Found(blob) => match repo.get(&blob)? {
            Some(bytes) => return Ok(FetchOutcome::Hit(bytes)),
            None => {
                warn!(repo = %repo.id(), %revision, path, %blob, "binding points at a missing blob; refetching");
            }
        },
        PathResolution::Unknown => {}
    }

    match transfer.fetch_file(repo.id(), revision, path)? {
        FetchedFile::NotFound => {
            if let Err(err) = repo.record_absent(revision, path) {
                warn!(repo = %repo.id(), %revision, path, %err, "failed to record negative entry");
            }
            Ok(FetchOutcome::NotFound)
        }
        FetchedFile::Content(bytes) => {
            match repo.put(&bytes) {
                Ok(blob) => {
                    if let Err(err) = repo.bind(revision, path, &blob) {
                        warn!(repo = %repo.id(), %revision, path, %err, "fetched file could not be bound");
                    }
                }
                Err(err) => {
                    warn!(repo = %repo.id(), %revision, path, %err, "fetched file could not be cached");
                }
            }
            Ok(FetchOutcome::Fetched(bytes))
        }
    }
}
