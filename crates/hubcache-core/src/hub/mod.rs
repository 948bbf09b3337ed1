//! The hub cache: whole-file deduplication across repository revisions.
//!
//! On-disk layout, one folder per repository under the hub root:
//!
//! ```text
//! <hub root>/
//!   models--org--name/
//!     refs/<ref name>          content = revision id
//!     blobs/<sha256>           immutable content-addressed payloads
//!     snapshots/<revision>/<path>   links (or copies) into blobs/
//!     .no_exist/<revision>/<path>   zero-byte negative markers
//! ```
//!
//! This layout is a contract other tooling may depend on; names and nesting
//! are stable.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use hubcache_types::{BlobId, RepoId, RevisionId};

mod blobs;
mod revisions;

pub(crate) use blobs::digest_hex;
pub(crate) use revisions::binding_blob;

pub const REFS_DIR: &str = "refs";
pub const BLOBS_DIR: &str = "blobs";
pub const SNAPSHOTS_DIR: &str = "snapshots";
pub const NO_EXIST_DIR: &str = ".no_exist";
pub(crate) const TMP_DIR: &str = ".tmp";

/// How snapshot bindings share bytes with the blob store.
///
/// `Symlink` is the space-efficient default. `Copy` is the degraded fallback
/// for filesystems without symlink support: behaviorally identical for every
/// caller, it just stores one full copy per binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStrategy {
    Symlink,
    Copy,
}

/// Result of resolving a `(revision, path)` binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathResolution {
    Found(BlobId),
    Unknown,
    KnownAbsent,
}

/// Handle on a hub cache root shared by any number of processes.
#[derive(Clone, Debug)]
pub struct HubCache {
    root: PathBuf,
    strategy: LinkStrategy,
}

impl HubCache {
    /// Open (creating if necessary) the hub cache at `root` and probe once
    /// for symlink support.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create hub cache root {}", root.display()))?;
        let strategy = probe_link_support(&root);
        Ok(Self { root, strategy })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn strategy(&self) -> LinkStrategy {
        self.strategy
    }

    pub(crate) fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    /// Handle on one repository's cache folder, creating its layout on first
    /// use.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder tree cannot be created.
    pub fn repo(&self, id: &RepoId) -> Result<RepoCache> {
        let dir = self.root.join(id.folder_name());
        for sub in [REFS_DIR, BLOBS_DIR, SNAPSHOTS_DIR, NO_EXIST_DIR] {
            let path = dir.join(sub);
            fs::create_dir_all(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
        }
        Ok(RepoCache {
            id: id.clone(),
            dir,
            tmp: self.tmp_dir(),
            strategy: self.strategy,
        })
    }
}

/// One repository's slice of the hub cache.
#[derive(Clone, Debug)]
pub struct RepoCache {
    id: RepoId,
    dir: PathBuf,
    tmp: PathBuf,
    strategy: LinkStrategy,
}

impl RepoCache {
    #[must_use]
    pub fn id(&self) -> &RepoId {
        &self.id
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn strategy(&self) -> LinkStrategy {
        self.strategy
    }

    pub(crate) fn refs_dir(&self) -> PathBuf {
        self.dir.join(REFS_DIR)
    }

    pub(crate) fn blobs_dir(&self) -> PathBuf {
        self.dir.join(BLOBS_DIR)
    }

    pub(crate) fn snapshot_dir(&self, revision: &RevisionId) -> PathBuf {
        self.dir.join(SNAPSHOTS_DIR).join(revision.as_str())
    }

    pub(crate) fn no_exist_dir(&self, revision: &RevisionId) -> PathBuf {
        self.dir.join(NO_EXIST_DIR).join(revision.as_str())
    }

    /// Final on-disk location of a blob, whether or not it exists yet.
    #[must_use]
    pub fn blob_path(&self, blob: &BlobId) -> PathBuf {
        self.blobs_dir().join(blob.as_str())
    }

    /// Revisions with a snapshot directory in this repository.
    #[must_use]
    pub fn revisions(&self) -> Vec<RevisionId> {
        let mut revisions = Vec::new();
        let Ok(entries) = fs::read_dir(self.dir.join(SNAPSHOTS_DIR)) else {
            return revisions;
        };
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                revisions.push(RevisionId::new(entry.file_name().to_string_lossy()));
            }
        }
        revisions.sort();
        revisions
    }
}

/// Snapshot paths must stay inside their snapshot directory.
pub(crate) fn validate_rel_path(path: &str) -> Result<()> {
    let candidate = Path::new(path);
    anyhow::ensure!(
        candidate.is_relative() && !path.is_empty(),
        "binding path must be relative and non-empty (got '{path}')"
    );
    anyhow::ensure!(
        candidate
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_))),
        "binding path must not contain '..' or '.' components (got '{path}')"
    );
    Ok(())
}

fn probe_link_support(root: &Path) -> LinkStrategy {
    static DEGRADED_WARNING: Once = Once::new();

    let probe_dir = root.join(TMP_DIR).join("link-probe");
    let supported = (|| -> io::Result<()> {
        fs::create_dir_all(&probe_dir)?;
        let target = probe_dir.join("target");
        let link = probe_dir.join("link");
        let _ = fs::remove_file(&link);
        fs::write(&target, b"probe")?;
        symlink_file(Path::new("target"), &link)?;
        fs::read(&link).map(|_| ())
    })();
    let _ = fs::remove_dir_all(&probe_dir);

    match supported {
        Ok(()) => {
            debug!(root = %root.display(), "hub cache using symlink bindings");
            LinkStrategy::Symlink
        }
        Err(err) => {
            DEGRADED_WARNING.call_once(|| {
                warn!(
                    root = %root.display(),
                    %err,
                    "symlinks unavailable; falling back to per-revision file copies \
                     (correct, but revisions no longer share file storage)"
                );
            });
            LinkStrategy::Copy
        }
    }
}

#[cfg(unix)]
pub(crate) fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
pub(crate) fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn symlink_file(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests;
