//! Resumable upload staging sessions.
//!
//! One directory per session under `staging/`:
//!
//! ```text
//! staging/<session id>/
//!   session.json              chunks the remote has acknowledged
//!   files/<file id>.json      per-file chunk manifest and progress
//! ```
//!
//! Progress is written durably before an upload round-trip is considered
//! complete, so a crashed upload resumes from its last acknowledged chunk.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hubcache_types::{BlobId, ChunkId, Shard, ShardId};

use crate::fsio::write_atomic;
use crate::timestamp_secs;

use super::shards::{shard_id_for, ShardStore};

const SESSION_FILE: &str = "session.json";
const FILES_DIR: &str = "files";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionRecord {
    accepted: Vec<ChunkId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    chunks: Vec<ChunkId>,
    accepted: Vec<ChunkId>,
}

/// Root of all staging sessions.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    tmp: PathBuf,
}

impl StagingArea {
    pub(crate) fn open(root: PathBuf, tmp: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create staging area at {}", root.display()))?;
        Ok(Self { root, tmp })
    }

    /// Open (resuming if it already exists) the session named `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session directory cannot be created.
    pub fn session(&self, id: &str) -> Result<StagingSession> {
        anyhow::ensure!(
            !id.is_empty() && !id.contains(['/', '\\']) && id != "." && id != "..",
            "staging session id must be a plain directory name (got '{id}')"
        );
        let dir = self.root.join(id);
        fs::create_dir_all(dir.join(FILES_DIR))
            .with_context(|| format!("failed to create staging session {}", dir.display()))?;
        let resumed = dir.join(SESSION_FILE).is_file();
        if resumed {
            debug!(session = id, "resuming staging session");
        }
        Ok(StagingSession {
            id: id.to_string(),
            dir,
            tmp: self.tmp.clone(),
        })
    }

    /// Session ids currently on disk.
    #[must_use]
    pub fn sessions(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        ids.sort();
        ids
    }
}

/// One in-progress upload, holding per-file manifests and the set of chunks
/// the remote has already accepted.
#[derive(Debug)]
pub struct StagingSession {
    id: String,
    dir: PathBuf,
    tmp: PathBuf,
}

impl StagingSession {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn file_path(&self, file: &BlobId) -> PathBuf {
        self.dir.join(FILES_DIR).join(format!("{file}.json"))
    }

    fn load_session(&self) -> SessionRecord {
        load_record(&self.session_path()).unwrap_or_default()
    }

    fn load_file(&self, file: &BlobId) -> Option<FileRecord> {
        load_record(&self.file_path(file))
    }

    /// Register a file's chunk manifest. If the file was already registered,
    /// its existing record (and any resume progress in it) is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be durably written.
    pub fn record_file(&self, file: &BlobId, chunks: &[ChunkId]) -> Result<()> {
        if self.load_file(file).is_some() {
            return Ok(());
        }
        let record = FileRecord {
            chunks: chunks.to_vec(),
            accepted: Vec::new(),
        };
        self.store_file(file, &record)?;
        // An empty session record marks the session as started.
        if !self.session_path().is_file() {
            self.store_session(&self.load_session())?;
        }
        Ok(())
    }

    /// Chunks of `file` that no longer need uploading in this session.
    #[must_use]
    pub fn accepted_chunks(&self, file: &BlobId) -> BTreeSet<ChunkId> {
        self.load_file(file)
            .map(|record| record.accepted.into_iter().collect())
            .unwrap_or_default()
    }

    /// Durably record that the remote accepted `chunk` of `file`. Returns
    /// only after both the file and session records are on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if either record cannot be written.
    pub fn record_accepted(&self, file: &BlobId, chunk: &ChunkId) -> Result<()> {
        let mut record = self
            .load_file(file)
            .with_context(|| format!("file {file} is not registered in session {}", self.id))?;
        if !record.accepted.contains(chunk) {
            record.accepted.push(chunk.clone());
            self.store_file(file, &record)?;
        }
        let mut session = self.load_session();
        if !session.accepted.contains(chunk) {
            session.accepted.push(chunk.clone());
            self.store_session(&session)?;
        }
        Ok(())
    }

    /// Record that `chunk` of `file` needs no upload because a shard already
    /// holds it remotely. Only the file record advances; the chunk was never
    /// sent within this session.
    ///
    /// # Errors
    ///
    /// Returns an error if the file record cannot be written.
    pub fn record_skipped(&self, file: &BlobId, chunk: &ChunkId) -> Result<()> {
        let mut record = self
            .load_file(file)
            .with_context(|| format!("file {file} is not registered in session {}", self.id))?;
        if !record.accepted.contains(chunk) {
            record.accepted.push(chunk.clone());
            self.store_file(file, &record)?;
        }
        Ok(())
    }

    /// Finish the session: publish a shard covering every registered file's
    /// full chunk manifest, then delete the session directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the shard cannot be stored. Cleanup failures after
    /// the shard is stored are logged and tolerated; a leftover session
    /// directory costs disk space, not correctness.
    pub fn commit(self, shards: &ShardStore) -> Result<ShardId> {
        let mut files = BTreeMap::new();
        let files_dir = self.dir.join(FILES_DIR);
        let entries = fs::read_dir(&files_dir)
            .with_context(|| format!("failed to list staged files in {}", files_dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let record: FileRecord = load_record(&path)
                .with_context(|| format!("malformed staged file record {}", path.display()))?;
            files.insert(BlobId::new(stem), record.chunks);
        }
        anyhow::ensure!(
            !files.is_empty(),
            "staging session {} has no files to commit",
            self.id
        );

        let shard = Shard {
            shard_id: shard_id_for(&files),
            created_at: timestamp_secs(),
            files,
        };
        shards.put(&shard)?;
        debug!(session = %self.id, shard = %shard.shard_id, "staging session committed");

        if let Err(err) = fs::remove_dir_all(&self.dir) {
            warn!(session = %self.id, %err, "failed to clean up committed staging session");
        }
        Ok(shard.shard_id)
    }

    fn store_session(&self, record: &SessionRecord) -> Result<()> {
        let json = serde_json::to_vec(record).context("failed to encode session record")?;
        write_atomic(&self.tmp, &self.session_path(), &json)
            .with_context(|| format!("failed to store session record for {}", self.id))
    }

    fn store_file(&self, file: &BlobId, record: &FileRecord) -> Result<()> {
        let json = serde_json::to_vec(record).context("failed to encode file record")?;
        write_atomic(&self.tmp, &self.file_path(file), &json)
            .with_context(|| format!("failed to store staged file record for {file}"))
    }
}

fn load_record<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}
