//! Whole-cache inventory: sizes, refs, staleness, and corruption warnings.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use hubcache_types::{BlobId, CorruptionWarning, RepoId, RevisionId};

use crate::hub::{binding_blob, HubCache, BLOBS_DIR, REFS_DIR, SNAPSHOTS_DIR};

/// Inventory of one hub cache root.
///
/// Corruption never aborts a scan; everything structurally invalid ends up in
/// `warnings` and the rest of the report stays usable.
#[derive(Clone, Debug, Serialize)]
pub struct CacheReport {
    pub repositories: Vec<RepoReport>,
    /// Bytes across all repositories, shared blobs counted once per repo.
    pub total_bytes: u64,
    pub warnings: Vec<CorruptionWarning>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RepoReport {
    pub id: RepoId,
    pub path: PathBuf,
    /// Union of blob sizes across revisions plus copy-mode binding sizes.
    pub size_bytes: u64,
    pub revisions: Vec<RevisionReport>,
    pub refs: Vec<(String, RevisionId)>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RevisionReport {
    pub revision: RevisionId,
    /// Each blob counted once even when bound at several paths.
    pub size_bytes: u64,
    /// Most recent binding mtime, unix seconds.
    pub last_modified: Option<u64>,
}

/// Inventory every repository under the hub root.
///
/// # Errors
///
/// Returns an error only if the root itself cannot be listed.
pub fn scan_hub(hub: &HubCache) -> Result<CacheReport> {
    let mut report = CacheReport {
        repositories: Vec::new(),
        total_bytes: 0,
        warnings: Vec::new(),
    };

    let entries = fs::read_dir(hub.root())
        .with_context(|| format!("failed to list hub cache root {}", hub.root().display()))?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        // Dot-directories (.tmp and friends) are infrastructure, not repos.
        if name.starts_with('.') {
            continue;
        }
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let Some(id) = RepoId::parse_folder_name(&name) else {
            report
                .warnings
                .push(CorruptionWarning::MalformedRepoFolder { folder: name });
            continue;
        };
        let repo = scan_repo(id, entry.path(), &mut report.warnings);
        report.total_bytes += repo.size_bytes;
        report.repositories.push(repo);
    }
    report.repositories.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(
        repositories = report.repositories.len(),
        total_bytes = report.total_bytes,
        warnings = report.warnings.len(),
        "hub cache scan complete"
    );
    Ok(report)
}

fn scan_repo(id: RepoId, dir: PathBuf, warnings: &mut Vec<CorruptionWarning>) -> RepoReport {
    let mut repo_blobs: BTreeMap<BlobId, u64> = BTreeMap::new();
    let mut repo_copy_bytes = 0u64;
    let mut revisions = Vec::new();

    let snapshots = dir.join(SNAPSHOTS_DIR);
    if let Ok(entries) = fs::read_dir(&snapshots) {
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let revision = RevisionId::new(entry.file_name().to_string_lossy());
            let report = scan_revision(&dir, &revision, &entry.path(), warnings);
            let size_bytes = report.blobs.values().sum::<u64>() + report.copy_bytes;
            repo_copy_bytes += report.copy_bytes;
            repo_blobs.extend(report.blobs);
            revisions.push(RevisionReport {
                revision,
                size_bytes,
                last_modified: report.last_modified,
            });
        }
    }
    revisions.sort_by(|a, b| a.revision.cmp(&b.revision));

    RepoReport {
        id,
        size_bytes: repo_blobs.values().sum::<u64>() + repo_copy_bytes,
        revisions,
        refs: scan_refs(&dir, warnings),
        path: dir,
    }
}

struct RevisionScan {
    blobs: BTreeMap<BlobId, u64>,
    copy_bytes: u64,
    last_modified: Option<u64>,
}

fn scan_revision(
    repo_dir: &Path,
    revision: &RevisionId,
    snapshot_dir: &Path,
    warnings: &mut Vec<CorruptionWarning>,
) -> RevisionScan {
    let mut scan = RevisionScan {
        blobs: BTreeMap::new(),
        copy_bytes: 0,
        last_modified: None,
    };

    for entry in walkdir::WalkDir::new(snapshot_dir).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warnings.push(CorruptionWarning::MalformedSnapshot {
                    path: err
                        .path()
                        .map_or_else(|| snapshot_dir.to_path_buf(), Path::to_path_buf),
                    detail: err.to_string(),
                });
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(snapshot_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        if let Some(secs) = mtime_secs(entry.path()) {
            scan.last_modified = Some(scan.last_modified.map_or(secs, |prev| prev.max(secs)));
        }

        if entry.file_type().is_symlink() {
            match binding_blob(entry.path()) {
                Some(blob) => {
                    match fs::metadata(repo_dir.join(BLOBS_DIR).join(blob.as_str())) {
                        Ok(meta) => {
                            scan.blobs.insert(blob, meta.len());
                        }
                        Err(_) => warnings.push(CorruptionWarning::MissingBlob {
                            revision: revision.clone(),
                            path: rel,
                            blob,
                        }),
                    }
                }
                None => warnings.push(CorruptionWarning::DanglingLink {
                    path: entry.path().to_path_buf(),
                }),
            }
        } else {
            // Copy-mode binding: the bytes live here, not in blobs/.
            scan.copy_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    scan
}

fn scan_refs(repo_dir: &Path, warnings: &mut Vec<CorruptionWarning>) -> Vec<(String, RevisionId)> {
    let refs_dir = repo_dir.join(REFS_DIR);
    let mut refs = Vec::new();
    for entry in walkdir::WalkDir::new(&refs_dir).min_depth(1).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .strip_prefix(&refs_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        match fs::read_to_string(entry.path()) {
            Ok(content) => refs.push((name, RevisionId::new(content.trim()))),
            Err(err) => warnings.push(CorruptionWarning::UnreadableRef {
                path: entry.path().to_path_buf(),
                detail: err.to_string(),
            }),
        }
    }
    refs.sort();
    refs
}

fn mtime_secs(path: &Path) -> Option<u64> {
    let modified = fs::symlink_metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}
