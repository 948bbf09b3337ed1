use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use hubcache_types::{BlobId, RevisionId};

use crate::fsio::write_atomic;

use super::blobs::digest_hex;
use super::{symlink_file, validate_rel_path, LinkStrategy, PathResolution, RepoCache, BLOBS_DIR};

impl RepoCache {
    /// Resolve a named ref to the revision it points at.
    ///
    /// # Errors
    ///
    /// Returns an error for I/O failures other than the ref being absent.
    pub fn resolve_ref(&self, name: &str) -> Result<Option<RevisionId>> {
        validate_rel_path(name)?;
        let path = self.refs_dir().join(name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(RevisionId::new(content.trim()))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read ref at {}", path.display()))
            }
        }
    }

    /// Point a ref at a revision, atomically replacing any previous value.
    ///
    /// Concurrent writers race last-writer-wins; both candidate values were
    /// valid commits of the ref, so either outcome is acceptable.
    ///
    /// # Errors
    ///
    /// Returns an error if the ref file cannot be durably written.
    pub fn update_ref(&self, name: &str, revision: &RevisionId) -> Result<()> {
        validate_rel_path(name)?;
        let path = self.refs_dir().join(name);
        write_atomic(&self.tmp, &path, revision.as_str().as_bytes())
            .with_context(|| format!("failed to update ref '{name}'"))?;
        debug!(ref_name = name, %revision, repo = %self.id(), "ref updated");
        Ok(())
    }

    /// All refs of this repository, by name relative to `refs/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the refs directory cannot be walked.
    pub fn refs(&self) -> Result<Vec<(String, RevisionId)>> {
        let refs_dir = self.refs_dir();
        let mut refs = Vec::new();
        for entry in walkdir::WalkDir::new(&refs_dir).min_depth(1) {
            let entry = entry.with_context(|| {
                format!("failed to walk refs directory {}", refs_dir.display())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .strip_prefix(&refs_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            let content = fs::read_to_string(entry.path())
                .with_context(|| format!("failed to read ref at {}", entry.path().display()))?;
            refs.push((name, RevisionId::new(content.trim())));
        }
        refs.sort();
        Ok(refs)
    }

    /// Bind `(revision, path)` to a blob already present in the content
    /// store.
    ///
    /// A differing existing binding indicates a non-deterministic remote
    /// mutation; it is overwritten and logged, never fatal. Re-binding to the
    /// same blob is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is absent or the binding cannot be
    /// created.
    pub fn bind(&self, revision: &RevisionId, path: &str, blob: &BlobId) -> Result<()> {
        validate_rel_path(path)?;
        anyhow::ensure!(
            self.exists(blob),
            "cannot bind '{path}' at {revision}: blob {blob} is not in the content store"
        );

        let dest = self.snapshot_dir(revision).join(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        if let Ok(meta) = fs::symlink_metadata(&dest) {
            match binding_blob(&dest) {
                Some(existing) if existing == *blob => return Ok(()),
                existing => {
                    warn!(
                        %revision,
                        path,
                        ?existing,
                        new = %blob,
                        "rebinding snapshot path to a different blob"
                    );
                    if meta.is_dir() {
                        fs::remove_dir_all(&dest)?;
                    } else {
                        fs::remove_file(&dest)?;
                    }
                }
            }
        }

        match self.strategy() {
            LinkStrategy::Symlink => {
                let target = relative_blob_target(path, blob);
                symlink_file(&target, &dest).with_context(|| {
                    format!("failed to link snapshot path {}", dest.display())
                })?;
            }
            LinkStrategy::Copy => {
                let bytes = self
                    .get(blob)?
                    .with_context(|| format!("blob {blob} vanished while binding '{path}'"))?;
                write_atomic(&self.tmp, &dest, &bytes)
                    .with_context(|| format!("failed to copy blob {blob} to '{path}'"))?;
            }
        }
        debug!(%revision, path, %blob, repo = %self.id(), "snapshot path bound");
        Ok(())
    }

    /// Resolve `(revision, path)` against the snapshot and negative caches.
    ///
    /// # Errors
    ///
    /// Returns an error only when the path itself is malformed.
    pub fn resolve_path(&self, revision: &RevisionId, path: &str) -> Result<PathResolution> {
        validate_rel_path(path)?;
        if self.no_exist_dir(revision).join(path).is_file() {
            return Ok(PathResolution::KnownAbsent);
        }
        let dest = self.snapshot_dir(revision).join(path);
        match fs::symlink_metadata(&dest) {
            Err(_) => Ok(PathResolution::Unknown),
            Ok(meta) if meta.is_dir() => {
                warn!(%revision, path, "snapshot path is a directory, treating as unknown");
                Ok(PathResolution::Unknown)
            }
            Ok(_) => match binding_blob(&dest) {
                Some(blob) => Ok(PathResolution::Found(blob)),
                None => {
                    warn!(%revision, path, "snapshot binding unreadable, treating as unknown");
                    Ok(PathResolution::Unknown)
                }
            },
        }
    }

    /// Read the bytes bound at `(revision, path)`, or `None` when the binding
    /// or its blob is absent.
    ///
    /// # Errors
    ///
    /// Returns an error for I/O failures other than absence.
    pub fn read(&self, revision: &RevisionId, path: &str) -> Result<Option<Vec<u8>>> {
        validate_rel_path(path)?;
        let dest = self.snapshot_dir(revision).join(path);
        match fs::read(&dest) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("failed to read snapshot path {}", dest.display())),
        }
    }

    /// Record that `(revision, path)` is confirmed absent remotely, so later
    /// resolutions return [`PathResolution::KnownAbsent`] without a network
    /// round trip.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be created.
    pub fn record_absent(&self, revision: &RevisionId, path: &str) -> Result<()> {
        validate_rel_path(path)?;
        let marker = self.no_exist_dir(revision).join(path);
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&marker, b"")
            .with_context(|| format!("failed to create negative entry {}", marker.display()))?;
        debug!(%revision, path, repo = %self.id(), "negative entry recorded");
        Ok(())
    }
}

/// Blob id a snapshot entry resolves to: the link target's file name for
/// symlink bindings, the content hash for copy bindings.
pub(crate) fn binding_blob(entry: &Path) -> Option<BlobId> {
    let meta = fs::symlink_metadata(entry).ok()?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(entry).ok()?;
        let name = target.file_name()?.to_str()?;
        Some(BlobId::new(name))
    } else if meta.is_file() {
        let bytes = fs::read(entry).ok()?;
        Some(BlobId::new(digest_hex(&bytes)))
    } else {
        None
    }
}

fn relative_blob_target(path: &str, blob: &BlobId) -> PathBuf {
    // From snapshots/<revision>/<path> back up to the repository folder:
    // one level for the snapshots dir, one for the revision, one per
    // intermediate path component.
    let ups = Path::new(path).components().count() + 1;
    let mut target = PathBuf::new();
    for _ in 0..ups {
        target.push("..");
    }
    target.push(BLOBS_DIR);
    target.push(blob.as_str());
    target
}
