//! Hub cache unit tests.

use super::*;
use anyhow::Result;
use hubcache_types::RepoId;
use tempfile::tempdir;

fn new_hub() -> Result<(tempfile::TempDir, HubCache)> {
    let temp = tempdir()?;
    let hub = HubCache::open(temp.path().join("hub"))?;
    Ok((temp, hub))
}

fn demo_repo(hub: &HubCache) -> Result<RepoCache> {
    hub.repo(&RepoId::model("org/demo"))
}

/// Same repository handle with copy bindings forced, to exercise the
/// degraded strategy on platforms where symlinks work.
fn copy_mode(repo: &RepoCache) -> RepoCache {
    let mut clone = repo.clone();
    clone.strategy = LinkStrategy::Copy;
    clone
}

mod revisions;
