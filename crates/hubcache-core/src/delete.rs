//! Revision deletion: immutable plan first, tolerant execution second.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use hubcache_types::{BlobId, RepoId, RevisionId};

use crate::fsio::tree_size;
use crate::hub::{binding_blob, HubCache, RepoCache, REFS_DIR};

/// Everything the deletion of a set of revisions would remove.
///
/// A plan is a point-in-time snapshot: it never mutates the cache, and the
/// cache may drift between planning and execution. Execution re-checks every
/// path, so a stale plan degrades to skipped entries, never to an error.
#[derive(Clone, Debug)]
pub struct DeletionPlan {
    paths: Vec<(PathBuf, u64)>,
    refs: Vec<PathBuf>,
    expected_bytes_freed: u64,
}

/// What actually happened when a plan ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub freed_bytes: u64,
    /// Entries that were already gone or could not be removed.
    pub skipped_paths: usize,
}

impl DeletionPlan {
    /// Snapshot directories, blob files, and repo folders the plan removes,
    /// with their sizes at planning time.
    #[must_use]
    pub fn paths_to_delete(&self) -> &[(PathBuf, u64)] {
        &self.paths
    }

    /// Ref files that would point at deleted revisions.
    #[must_use]
    pub fn refs_to_delete(&self) -> &[PathBuf] {
        &self.refs
    }

    #[must_use]
    pub fn expected_bytes_freed(&self) -> u64 {
        self.expected_bytes_freed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.refs.is_empty()
    }

    /// Remove everything the plan names. Per-entry failures and entries
    /// already removed by someone else are logged and skipped.
    pub fn execute(self) -> ExecutionSummary {
        let mut summary = ExecutionSummary::default();
        for (path, size) in self.paths {
            match remove_path(&path) {
                Removal::Removed => summary.freed_bytes += size,
                Removal::Skipped => summary.skipped_paths += 1,
            }
        }
        for path in self.refs {
            if matches!(remove_path(&path), Removal::Skipped) {
                summary.skipped_paths += 1;
            }
        }
        debug!(
            freed_bytes = summary.freed_bytes,
            skipped_paths = summary.skipped_paths,
            "deletion plan executed"
        );
        summary
    }
}

enum Removal {
    Removed,
    Skipped,
}

fn remove_path(path: &Path) -> Removal {
    let Ok(meta) = fs::symlink_metadata(path) else {
        debug!(path = %path.display(), "planned path already gone, skipping");
        return Removal::Skipped;
    };
    let outcome = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match outcome {
        Ok(()) => Removal::Removed,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to remove planned path, skipping");
            Removal::Skipped
        }
    }
}

/// Plan the removal of `revisions` across every repository in the hub.
///
/// Revisions no repository knows are silently ignored. Blobs are planned for
/// deletion only when no surviving revision still binds them; repositories
/// left with no revisions are removed wholesale.
///
/// # Errors
///
/// Returns an error if the hub root cannot be listed.
pub fn plan_deletion(hub: &HubCache, revisions: &[RevisionId]) -> Result<DeletionPlan> {
    let doomed_set: BTreeSet<&RevisionId> = revisions.iter().collect();
    let mut plan = DeletionPlan {
        paths: Vec::new(),
        refs: Vec::new(),
        expected_bytes_freed: 0,
    };

    let entries = fs::read_dir(hub.root())
        .with_context(|| format!("failed to list hub cache root {}", hub.root().display()))?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let Some(id) = RepoId::parse_folder_name(&name) else {
            continue;
        };
        let repo = hub.repo(&id)?;
        plan_repo(&repo, &doomed_set, &mut plan)?;
    }

    plan.expected_bytes_freed = plan.paths.iter().map(|(_, size)| *size).sum();
    debug!(
        paths = plan.paths.len(),
        refs = plan.refs.len(),
        expected_bytes_freed = plan.expected_bytes_freed,
        "deletion plan built"
    );
    Ok(plan)
}

fn plan_repo(
    repo: &RepoCache,
    doomed_set: &BTreeSet<&RevisionId>,
    plan: &mut DeletionPlan,
) -> Result<()> {
    let all: Vec<RevisionId> = repo.revisions();
    let (doomed, surviving): (Vec<_>, Vec<_>) = all
        .into_iter()
        .partition(|revision| doomed_set.contains(revision));
    if doomed.is_empty() {
        return Ok(());
    }

    if surviving.is_empty() {
        // Nothing left to keep; take the whole repository folder.
        let dir = repo.dir().to_path_buf();
        let size = tree_size(&dir);
        plan.paths.push((dir, size));
        return Ok(());
    }

    let live: BTreeSet<BlobId> = surviving
        .iter()
        .flat_map(|revision| bound_blobs(repo, revision))
        .collect();
    let mut dead: BTreeSet<BlobId> = BTreeSet::new();
    for revision in &doomed {
        for blob in bound_blobs(repo, revision) {
            if !live.contains(&blob) {
                dead.insert(blob);
            }
        }
        let snapshot = repo.snapshot_dir(revision);
        let size = tree_size(&snapshot);
        plan.paths.push((snapshot, size));
        let negatives = repo.no_exist_dir(revision);
        if negatives.is_dir() {
            let size = tree_size(&negatives);
            plan.paths.push((negatives, size));
        }
    }
    for blob in dead {
        let path = repo.blob_path(&blob);
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        plan.paths.push((path, size));
    }

    for (name, target) in repo.refs()? {
        if doomed_set.contains(&target) {
            plan.refs.push(repo.dir().join(REFS_DIR).join(name));
        }
    }
    Ok(())
}

/// Blobs bound anywhere under one revision's snapshot.
fn bound_blobs(repo: &RepoCache, revision: &RevisionId) -> BTreeSet<BlobId> {
    let mut blobs = BTreeSet::new();
    for entry in walkdir::WalkDir::new(repo.snapshot_dir(revision))
        .min_depth(1)
        .into_iter()
        .flatten()
    {
        if entry.file_type().is_dir() {
            continue;
        }
        if let Some(blob) = binding_blob(entry.path()) {
            blobs.insert(blob);
        }
    }
    blobs
}
