//! Atomic filesystem primitives shared by the stores.
//!
//! Every durable write goes through [`write_atomic`]: bytes land in a
//! uniquely-named temporary file which is then renamed into place. Readers
//! either see the old state or the complete new state. Concurrent writers
//! producing identical content converge on the same final file.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Durably write `bytes` at `dest` via a temporary file in `tmp_dir`.
///
/// `tmp_dir` must live on the same filesystem as `dest` so the final rename
/// is atomic. If a concurrent writer renamed the same content into place
/// first, the losing rename is still a success: the destination holds valid
/// bytes either way.
pub(crate) fn write_atomic(tmp_dir: &Path, dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    fs::create_dir_all(tmp_dir)
        .with_context(|| format!("failed to create temp directory {}", tmp_dir.display()))?;

    let mut tmp = NamedTempFile::new_in(tmp_dir)
        .with_context(|| format!("failed to create temp file in {}", tmp_dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to write temp file for {}", dest.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to flush temp file for {}", dest.display()))?;

    match tmp.persist(dest) {
        Ok(_) => Ok(()),
        // Windows refuses to replace an existing file; a concurrent writer
        // beat us to an identical destination, which is fine.
        Err(err) if dest.exists() => {
            drop(err);
            Ok(())
        }
        Err(err) => Err(err.error)
            .with_context(|| format!("failed to move temp file into {}", dest.display())),
    }
}

/// Sum of file sizes under `root`, following nothing: symlinks count as their
/// own (link) size, exactly what the filesystem charges for them.
pub(crate) fn tree_size(root: &Path) -> u64 {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(root).into_iter().flatten() {
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    total
}
