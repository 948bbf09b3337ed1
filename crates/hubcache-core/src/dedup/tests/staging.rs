use super::*;
use hubcache_types::BlobId;

fn manifest(parts: &[&[u8]]) -> (BlobId, Vec<ChunkId>) {
    let joined: Vec<u8> = parts.concat();
    let file = BlobId::new(crate::hub::digest_hex(&joined));
    let chunks = parts.iter().map(|part| chunk_of(part)).collect();
    (file, chunks)
}

#[test]
fn accepted_chunks_accumulate_per_file() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    let session = cache.staging().session("upload-1")?;
    let (file, chunks) = manifest(&[b"one", b"two", b"three"]);
    session.record_file(&file, &chunks)?;

    assert!(session.accepted_chunks(&file).is_empty());
    session.record_accepted(&file, &chunks[0])?;
    session.record_accepted(&file, &chunks[2])?;

    let accepted = session.accepted_chunks(&file);
    assert_eq!(accepted.len(), 2);
    assert!(accepted.contains(&chunks[0]));
    assert!(!accepted.contains(&chunks[1]));
    Ok(())
}

#[test]
fn reopening_a_session_resumes_recorded_progress() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    let (file, chunks) = manifest(&[b"alpha", b"beta"]);
    {
        let session = cache.staging().session("resume-me")?;
        session.record_file(&file, &chunks)?;
        session.record_accepted(&file, &chunks[0])?;
    }

    let session = cache.staging().session("resume-me")?;
    // Re-registering the file must not erase progress.
    session.record_file(&file, &chunks)?;
    let accepted = session.accepted_chunks(&file);
    assert!(accepted.contains(&chunks[0]));
    assert!(!accepted.contains(&chunks[1]));
    Ok(())
}

#[test]
fn skipped_chunks_count_as_done_without_a_session_entry() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    let session = cache.staging().session("skip")?;
    let (file, chunks) = manifest(&[b"dup"]);
    session.record_file(&file, &chunks)?;
    session.record_skipped(&file, &chunks[0])?;

    assert!(session.accepted_chunks(&file).contains(&chunks[0]));

    // The session-wide record only lists chunks the remote acknowledged in
    // this session, which a skipped chunk never was.
    let session_json = std::fs::read(
        cache
            .root()
            .join(STAGING_DIR)
            .join("skip")
            .join("session.json"),
    )?;
    let record: serde_json::Value = serde_json::from_slice(&session_json)?;
    assert_eq!(record["accepted"].as_array().map(Vec::len), Some(0));
    Ok(())
}

#[test]
fn commit_publishes_a_shard_and_removes_the_session() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    let session = cache.staging().session("finish")?;
    let (file_a, chunks_a) = manifest(&[b"a1", b"a2"]);
    let (file_b, chunks_b) = manifest(&[b"b1"]);
    session.record_file(&file_a, &chunks_a)?;
    session.record_file(&file_b, &chunks_b)?;
    for chunk in &chunks_a {
        session.record_accepted(&file_a, chunk)?;
    }
    session.record_accepted(&file_b, &chunks_b[0])?;

    let shard_id = session.commit(cache.shards())?;
    let shard = cache.shards().get(&shard_id).expect("shard was published");
    assert_eq!(shard.files.get(&file_a), Some(&chunks_a));
    assert_eq!(shard.files.get(&file_b), Some(&chunks_b));
    assert!(cache.staging().sessions().is_empty());

    // Every committed chunk is now discoverable for dedup.
    assert_eq!(cache.shards().lookup(&chunks_b[0]), Some(shard_id));
    Ok(())
}

#[test]
fn committing_an_empty_session_is_an_error() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    let session = cache.staging().session("empty")?;
    assert!(session.commit(cache.shards()).is_err());
    Ok(())
}

#[test]
fn session_ids_must_be_plain_directory_names() -> Result<()> {
    let (_temp, cache) = new_cache()?;
    assert!(cache.staging().session("").is_err());
    assert!(cache.staging().session("a/b").is_err());
    assert!(cache.staging().session("..").is_err());
    Ok(())
}
