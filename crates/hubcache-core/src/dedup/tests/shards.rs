use super::*;
use std::collections::BTreeMap;
use std::fs;

use hubcache_types::{BlobId, Shard, ShardId};

use crate::dedup::shards::{SHARD_EXPIRY, SHARD_GRACE};
use crate::timestamp_secs;

fn shard_with_age(id: &str, age_secs: u64, chunks: &[ChunkId]) -> Shard {
    let mut files = BTreeMap::new();
    files.insert(BlobId::new(format!("file-{id}")), chunks.to_vec());
    Shard {
        shard_id: ShardId::new(id),
        created_at: timestamp_secs().saturating_sub(age_secs),
        files,
    }
}

#[test]
fn put_then_lookup_finds_the_owning_shard() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    let chunk = chunk_of(b"uploaded chunk");
    let shard = shard_with_age("fresh", 0, &[chunk.clone()]);
    cache.shards().put(&shard)?;

    assert_eq!(cache.shards().lookup(&chunk), Some(shard.shard_id.clone()));
    assert_eq!(cache.shards().lookup(&chunk_of(b"other")), None);
    assert!(cache.shards().get(&shard.shard_id).is_some());
    Ok(())
}

#[test]
fn expired_shards_are_invisible_to_lookup_but_still_on_disk() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    let chunk = chunk_of(b"old chunk");
    // Past expiry, within the grace period.
    let shard = shard_with_age("expired", SHARD_EXPIRY.as_secs() + 60, &[chunk.clone()]);
    cache.shards().put(&shard)?;

    assert_eq!(cache.shards().lookup(&chunk), None);
    assert!(cache.shards().list_active().is_empty());
    assert!(cache.shards().get(&shard.shard_id).is_some());
    Ok(())
}

#[test]
fn sweep_removes_only_shards_past_expiry_plus_grace() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    let fresh = shard_with_age("fresh", 0, &[chunk_of(b"a")]);
    let in_grace = shard_with_age("in-grace", SHARD_EXPIRY.as_secs() + 60, &[chunk_of(b"b")]);
    let doomed = shard_with_age(
        "doomed",
        SHARD_EXPIRY.as_secs() + SHARD_GRACE.as_secs() + 60,
        &[chunk_of(b"c")],
    );
    for shard in [&fresh, &in_grace, &doomed] {
        cache.shards().put(shard)?;
    }

    let summary = cache.shards().sweep_expired()?;
    assert_eq!(summary.swept, 1);
    assert!(summary.swept_bytes > 0);
    assert!(cache.shards().get(&fresh.shard_id).is_some());
    assert!(cache.shards().get(&in_grace.shard_id).is_some());
    assert!(cache.shards().get(&doomed.shard_id).is_none());
    Ok(())
}

#[test]
fn list_active_is_sorted_by_shard_id() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    for id in ["bbb", "aaa", "ccc"] {
        cache.shards().put(&shard_with_age(id, 0, &[chunk_of(id.as_bytes())]))?;
    }
    let ids: Vec<_> = cache
        .shards()
        .list_active()
        .into_iter()
        .map(|shard| shard.shard_id)
        .collect();
    assert_eq!(ids, vec![ShardId::new("aaa"), ShardId::new("bbb"), ShardId::new("ccc")]);
    Ok(())
}

#[test]
fn malformed_shard_files_are_skipped() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    fs::write(cache.root().join(SHARD_CACHE_DIR).join("junk"), b"not json")?;
    let chunk = chunk_of(b"real chunk");
    cache.shards().put(&shard_with_age("real", 0, &[chunk.clone()]))?;

    assert_eq!(cache.shards().lookup(&chunk), Some(ShardId::new("real")));
    assert_eq!(cache.shards().list_active().len(), 1);
    // The sweep tolerates the junk file too.
    assert_eq!(cache.shards().sweep_expired()?.swept, 0);

    let warnings = cache.shards().verify();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        &warnings[0],
        hubcache_types::CorruptionWarning::MalformedShard { path, .. }
            if path.file_name().is_some_and(|n| n == "junk")
    ));
    Ok(())
}
