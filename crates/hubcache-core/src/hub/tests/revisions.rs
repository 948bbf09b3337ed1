use super::*;
use std::fs;

fn rev(id: &str) -> RevisionId {
    RevisionId::new(id)
}

#[test]
fn bind_then_resolve_finds_the_blob() -> Result<()> {
    let (_temp, hub) = new_hub()?;
    let repo = demo_repo(&hub)?;
    let blob = repo.put(b"config contents")?;
    repo.bind(&rev("abc123"), "config.json", &blob)?;

    assert_eq!(
        repo.resolve_path(&rev("abc123"), "config.json")?,
        PathResolution::Found(blob.clone())
    );
    assert_eq!(
        repo.read(&rev("abc123"), "config.json")?.as_deref(),
        Some(b"config contents".as_slice())
    );
    assert_eq!(
        repo.resolve_path(&rev("abc123"), "missing.json")?,
        PathResolution::Unknown
    );
    Ok(())
}

#[test]
fn nested_paths_bind_and_resolve() -> Result<()> {
    let (_temp, hub) = new_hub()?;
    let repo = demo_repo(&hub)?;
    let blob = repo.put(b"weights")?;
    repo.bind(&rev("abc123"), "models/fp16/weights.bin", &blob)?;

    assert_eq!(
        repo.resolve_path(&rev("abc123"), "models/fp16/weights.bin")?,
        PathResolution::Found(blob)
    );
    assert_eq!(
        repo.read(&rev("abc123"), "models/fp16/weights.bin")?
            .as_deref(),
        Some(b"weights".as_slice())
    );
    Ok(())
}

#[test]
fn two_revisions_share_one_blob() -> Result<()> {
    let (_temp, hub) = new_hub()?;
    let repo = demo_repo(&hub)?;
    let blob = repo.put(b"shared weights")?;
    repo.bind(&rev("r1"), "weights.bin", &blob)?;
    repo.bind(&rev("r2"), "weights.bin", &blob)?;

    let blob_files: Vec<_> = fs::read_dir(repo.blobs_dir())?.collect();
    assert_eq!(blob_files.len(), 1, "both revisions reference one blob");
    assert_eq!(
        repo.resolve_path(&rev("r1"), "weights.bin")?,
        PathResolution::Found(blob.clone())
    );
    assert_eq!(
        repo.resolve_path(&rev("r2"), "weights.bin")?,
        PathResolution::Found(blob)
    );
    Ok(())
}

#[test]
fn rebinding_to_a_different_blob_overwrites() -> Result<()> {
    let (_temp, hub) = new_hub()?;
    let repo = demo_repo(&hub)?;
    let old = repo.put(b"old contents")?;
    let new = repo.put(b"new contents")?;
    repo.bind(&rev("r1"), "file.txt", &old)?;
    repo.bind(&rev("r1"), "file.txt", &new)?;

    assert_eq!(
        repo.resolve_path(&rev("r1"), "file.txt")?,
        PathResolution::Found(new)
    );
    assert_eq!(
        repo.read(&rev("r1"), "file.txt")?.as_deref(),
        Some(b"new contents".as_slice())
    );
    Ok(())
}

#[test]
fn negative_entries_short_circuit_resolution() -> Result<()> {
    let (_temp, hub) = new_hub()?;
    let repo = demo_repo(&hub)?;
    repo.record_absent(&rev("r1"), "tokenizer.json")?;

    assert_eq!(
        repo.resolve_path(&rev("r1"), "tokenizer.json")?,
        PathResolution::KnownAbsent
    );
    // Markers are scoped to their revision.
    assert_eq!(
        repo.resolve_path(&rev("r2"), "tokenizer.json")?,
        PathResolution::Unknown
    );
    Ok(())
}

#[test]
fn refs_update_and_resolve_last_writer_wins() -> Result<()> {
    let (_temp, hub) = new_hub()?;
    let repo = demo_repo(&hub)?;
    assert_eq!(repo.resolve_ref("main")?, None);

    repo.update_ref("main", &rev("commit-1"))?;
    assert_eq!(repo.resolve_ref("main")?, Some(rev("commit-1")));

    repo.update_ref("main", &rev("commit-2"))?;
    assert_eq!(repo.resolve_ref("main")?, Some(rev("commit-2")));

    repo.update_ref("release/v1", &rev("commit-1"))?;
    let refs = repo.refs()?;
    assert_eq!(
        refs,
        vec![
            ("main".to_string(), rev("commit-2")),
            ("release/v1".to_string(), rev("commit-1")),
        ]
    );
    Ok(())
}

#[test]
fn copy_strategy_is_behaviorally_identical() -> Result<()> {
    let (_temp, hub) = new_hub()?;
    let repo = copy_mode(&demo_repo(&hub)?);
    let blob = repo.put(b"copied contents")?;
    repo.bind(&rev("r1"), "file.txt", &blob)?;

    assert_eq!(
        repo.resolve_path(&rev("r1"), "file.txt")?,
        PathResolution::Found(blob)
    );
    assert_eq!(
        repo.read(&rev("r1"), "file.txt")?.as_deref(),
        Some(b"copied contents".as_slice())
    );

    // The binding is a regular file, not a link.
    let entry = repo.snapshot_dir(&rev("r1")).join("file.txt");
    assert!(!fs::symlink_metadata(&entry)?.file_type().is_symlink());
    Ok(())
}

#[test]
fn traversal_paths_are_rejected() -> Result<()> {
    let (_temp, hub) = new_hub()?;
    let repo = demo_repo(&hub)?;
    let blob = repo.put(b"x")?;
    assert!(repo.bind(&rev("r1"), "../escape", &blob).is_err());
    assert!(repo.bind(&rev("r1"), "/abs/path", &blob).is_err());
    assert!(repo.resolve_path(&rev("r1"), "").is_err());
    Ok(())
}

#[test]
fn revisions_lists_snapshot_directories() -> Result<()> {
    let (_temp, hub) = new_hub()?;
    let repo = demo_repo(&hub)?;
    let blob = repo.put(b"x")?;
    repo.bind(&rev("bbb"), "f", &blob)?;
    repo.bind(&rev("aaa"), "f", &blob)?;
    assert_eq!(repo.revisions(), vec![rev("aaa"), rev("bbb")]);
    Ok(())
}
