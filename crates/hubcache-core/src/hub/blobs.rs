use std::fs;
use std::io::ErrorKind;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use hubcache_types::BlobId;

use crate::fsio::write_atomic;

use super::RepoCache;

pub(crate) fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl RepoCache {
    /// Store `bytes` under their content hash, returning the blob id.
    ///
    /// Idempotent: re-putting identical bytes performs no write. A partially
    /// written blob is never observable under its final id; bytes go to a
    /// temp file first and are renamed into place. Two processes racing on
    /// the same content converge on one valid blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be durably written.
    pub fn put(&self, bytes: &[u8]) -> Result<BlobId> {
        let blob = BlobId::new(digest_hex(bytes));
        let dest = self.blob_path(&blob);
        if dest.exists() {
            debug!(%blob, repo = %self.id(), "blob hit");
            return Ok(blob);
        }
        write_atomic(&self.tmp, &dest, bytes)
            .with_context(|| format!("failed to store blob {blob}"))?;
        debug!(%blob, size = bytes.len(), repo = %self.id(), "blob stored");
        Ok(blob)
    }

    /// Read a blob's bytes, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures other than absence.
    pub fn get(&self, blob: &BlobId) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(blob);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read blob at {}", path.display()))
            }
        }
    }

    #[must_use]
    pub fn exists(&self, blob: &BlobId) -> bool {
        self.blob_path(blob).is_file()
    }
}
