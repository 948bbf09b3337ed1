//! Boundary between the local caches and whatever moves bytes remotely.

use anyhow::Result;

use hubcache_types::{RepoId, RevisionId};

/// Remote answer for a single file request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchedFile {
    Content(Vec<u8>),
    NotFound,
}

/// Remote verdict on one uploaded chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadAck {
    Accepted,
    Rejected,
}

/// Transport abstraction the fetch and upload flows are written against.
///
/// Implementations decide how bytes actually move and may consult or populate
/// the chunk cache internally; callers here only rely on the answers. Errors
/// mean the transport itself failed, not that the remote answered "no".
pub trait Transfer {
    /// Fetch one file of one revision.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails before the remote can answer.
    fn fetch_file(
        &self,
        repo: &RepoId,
        revision: &RevisionId,
        path: &str,
    ) -> Result<FetchedFile>;

    /// Offer one chunk of an upload.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails before the remote can answer.
    fn upload_chunk(&self, chunk: &[u8]) -> Result<UploadAck>;
}
