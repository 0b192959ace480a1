//! Pool file-id assignment and drain ordering.

use std::fs;

use senlog::pool;
use tempfile::tempdir;

#[test]
fn monotone_ids_and_oldest_first_drain() {
    let dir = tempdir().unwrap();
    let pool_dir = dir.path();

    // Drained pool: ids start at 1.
    let tmp1 = pool_dir.join(".tmp");
    fs::write(&tmp1, b"pack-1").unwrap();
    assert_eq!(pool::move_into(pool_dir, &tmp1).unwrap(), 1);
    assert!(pool_dir.join("00000001").exists());

    let tmp2 = pool_dir.join(".tmp");
    fs::write(&tmp2, b"pack-2").unwrap();
    assert_eq!(pool::move_into(pool_dir, &tmp2).unwrap(), 2);
    assert!(pool_dir.join("00000002").exists());

    assert_eq!(pool::oldest(pool_dir).unwrap(), pool_dir.join("00000001"));
    fs::remove_file(pool_dir.join("00000001")).unwrap();
    assert_eq!(pool::oldest(pool_dir).unwrap(), pool_dir.join("00000002"));
}

#[test]
fn oldest_unlink_sequence_is_strictly_increasing() {
    let dir = tempdir().unwrap();
    let pool_dir = dir.path();

    for i in 0..10u32 {
        let tmp = pool_dir.join(".tmp");
        fs::write(&tmp, format!("pack-{i}")).unwrap();
        pool::move_into(pool_dir, &tmp).unwrap();
    }

    let mut visited = Vec::new();
    while let Ok(path) = pool::oldest(pool_dir) {
        let id = u32::from_str_radix(
            path.file_name().unwrap().to_str().unwrap(),
            16,
        )
        .unwrap();
        visited.push(id);
        fs::remove_file(path).unwrap();
    }

    let mut sorted = visited.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(visited, sorted, "ids must be visited strictly in order");
    assert_eq!(visited.len(), 10);
}

#[test]
fn pack_content_travels_with_its_id() {
    let dir = tempdir().unwrap();
    let pool_dir = dir.path();

    let tmp = pool_dir.join(".ingest");
    fs::write(&tmp, b"first-pack").unwrap();
    pool::move_into(pool_dir, &tmp).unwrap();

    let tmp = pool_dir.join(".ingest");
    fs::write(&tmp, b"second-pack").unwrap();
    pool::move_into(pool_dir, &tmp).unwrap();

    let oldest = pool::oldest(pool_dir).unwrap();
    assert_eq!(fs::read(&oldest).unwrap(), b"first-pack");
}
