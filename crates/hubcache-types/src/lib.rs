//! Domain types shared by the hubcache engine and its consumers.
//!
//! Everything here is pure data: repository identity, content-addressed ids,
//! shard records, and the corruption taxonomy surfaced by scans. No I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The kind of a remote repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoKind {
    Model,
    Dataset,
    Space,
}

impl RepoKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Dataset => "dataset",
            Self::Space => "space",
        }
    }

    /// Plural form used in on-disk folder names (`models--org--name`).
    #[must_use]
    pub fn plural(self) -> &'static str {
        match self {
            Self::Model => "models",
            Self::Dataset => "datasets",
            Self::Space => "spaces",
        }
    }

    fn from_plural(value: &str) -> Option<Self> {
        match value {
            "models" => Some(Self::Model),
            "datasets" => Some(Self::Dataset),
            "spaces" => Some(Self::Space),
            _ => None,
        }
    }
}

impl TryFrom<&str> for RepoKind {
    type Error = UnknownRepoKind;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "model" => Ok(Self::Model),
            "dataset" => Ok(Self::Dataset),
            "space" => Ok(Self::Space),
            other => Err(UnknownRepoKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown repository kind '{0}'")]
pub struct UnknownRepoKind(pub String);

/// Identity of a remote repository: kind plus optional namespace plus name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    pub kind: RepoKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl RepoId {
    /// Build an id from a `namespace/name` or bare `name` string.
    #[must_use]
    pub fn new(kind: RepoKind, full_name: &str) -> Self {
        match full_name.split_once('/') {
            Some((namespace, name)) => Self {
                kind,
                namespace: Some(namespace.to_string()),
                name: name.to_string(),
            },
            None => Self {
                kind,
                namespace: None,
                name: full_name.to_string(),
            },
        }
    }

    #[must_use]
    pub fn model(full_name: &str) -> Self {
        Self::new(RepoKind::Model, full_name)
    }

    #[must_use]
    pub fn dataset(full_name: &str) -> Self {
        Self::new(RepoKind::Dataset, full_name)
    }

    /// On-disk folder encoding: `models--namespace--name` (namespace omitted
    /// for un-namespaced repositories). This is a stable layout contract.
    #[must_use]
    pub fn folder_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}--{}--{}", self.kind.plural(), namespace, self.name),
            None => format!("{}--{}", self.kind.plural(), self.name),
        }
    }

    /// Invert [`RepoId::folder_name`]. Returns `None` for folders that do not
    /// follow the encoding.
    #[must_use]
    pub fn parse_folder_name(folder: &str) -> Option<Self> {
        let mut parts = folder.split("--");
        let kind = RepoKind::from_plural(parts.next()?)?;
        let first = parts.next()?;
        let rest: Vec<&str> = parts.collect();
        match rest.as_slice() {
            [] => Some(Self {
                kind,
                namespace: None,
                name: first.to_string(),
            }),
            [name] => Some(Self {
                kind,
                namespace: Some(first.to_string()),
                name: (*name).to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind.as_str(), namespace, self.name),
            None => write!(f, "{}/{}", self.kind.as_str(), self.name),
        }
    }
}

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_type! {
    /// Identity of an immutable blob: lowercase hex sha-256 of its bytes.
    BlobId
}
id_type! {
    /// Identity of an immutable chunk: lowercase hex sha-256 of its bytes.
    ChunkId
}
id_type! {
    /// Immutable revision identifier (commit hash), opaque to the cache.
    RevisionId
}
id_type! {
    /// Opaque shard identifier.
    ShardId
}

/// Metadata record mapping whole files to their ordered chunk sequences.
///
/// Shards are produced by successful local uploads or pulled down during
/// global dedup lookups; they are pure metadata and carry their creation
/// timestamp so the store can expire them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub shard_id: ShardId,
    /// Creation or download time, unix seconds.
    pub created_at: u64,
    /// File content hash to the ordered chunks composing that file.
    pub files: BTreeMap<BlobId, Vec<ChunkId>>,
}

impl Shard {
    #[must_use]
    pub fn contains_chunk(&self, chunk: &ChunkId) -> bool {
        self.files.values().any(|chunks| chunks.contains(chunk))
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

/// Structurally invalid cache state detected during a scan or fetch.
///
/// Corruptions are collected as warnings on the containing report; they never
/// abort the operation that found them.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CorruptionWarning {
    #[error("revision {revision} binds {path} to missing blob {blob}")]
    MissingBlob {
        revision: RevisionId,
        path: String,
        blob: BlobId,
    },
    #[error("snapshot entry {path:?} has unexpected structure: {detail}")]
    MalformedSnapshot { path: PathBuf, detail: String },
    #[error("ref file {path:?} is unreadable: {detail}")]
    UnreadableRef { path: PathBuf, detail: String },
    #[error("dangling link at {path:?}")]
    DanglingLink { path: PathBuf },
    #[error("shard file {path:?} is malformed: {detail}")]
    MalformedShard { path: PathBuf, detail: String },
    #[error("folder {folder} does not match the repository encoding")]
    MalformedRepoFolder { folder: String },
}
