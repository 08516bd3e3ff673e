//! Background compaction scenarios: run selection, merge correctness,
//! and tombstone behavior across merged generations.

use std::time::Duration;

use tempfile::TempDir;
use tephra::{Config, Engine, Result};

/// Engine with a fast compaction tick so tests observe a merge quickly.
fn open_compacting_engine(dir: &TempDir) -> Engine {
    let config = Config::new(dir.path()).compaction_interval(Duration::from_millis(100));
    Engine::open_with_config(config).expect("failed to open engine")
}

/// Waits until the engine holds exactly `count` tables, up to ~5s.
async fn wait_for_table_count(db: &Engine, count: usize) -> Vec<u64> {
    for _ in 0..100 {
        let generations = db.metrics().expect("metrics failed").table_generations;
        if generations.len() == count {
            return generations;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "table count never reached {count}: {:?}",
        db.metrics().unwrap().table_generations
    );
}

#[tokio::test]
async fn test_four_tables_collapse_into_one() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = open_compacting_engine(&dir);

    for batch in 0..4 {
        for i in 0..10 {
            let key = format!("batch_{batch}_key_{i:02}");
            let value = format!("value_{batch}_{i}");
            db.put(key.as_bytes(), value.as_bytes())?;
        }
        db.flush()?;
    }

    let generations = wait_for_table_count(&db, 1).await;
    // Publication precedes input deletion; give the worker a beat to
    // finish removing the replaced files.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Every input key survives the merge.
    for batch in 0..4 {
        for i in 0..10 {
            let key = format!("batch_{batch}_key_{i:02}");
            let expected = format!("value_{batch}_{i}");
            assert_eq!(
                db.get(key.as_bytes())?,
                Some(expected.into_bytes()),
                "missing {key} after compaction"
            );
        }
    }

    // Exactly one table file remains on disk, carrying the newest
    // input's generation tag.
    let sst_files: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".sst"))
        .collect();
    assert_eq!(sst_files.len(), 1, "leftover table files: {sst_files:?}");
    assert_eq!(sst_files[0], format!("data_{:08}.sst", generations[0]));

    db.close().await
}

#[tokio::test]
async fn test_newer_generation_wins_in_merge() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = open_compacting_engine(&dir);

    db.put(b"shared", b"oldest")?;
    db.put(b"only-first", b"kept")?;
    db.flush()?;

    for batch in 0..2 {
        db.put(format!("filler_{batch}").as_bytes(), b"x")?;
        db.flush()?;
    }

    db.put(b"shared", b"newest")?;
    db.flush()?;

    wait_for_table_count(&db, 1).await;

    assert_eq!(db.get(b"shared")?, Some(b"newest".to_vec()));
    assert_eq!(db.get(b"only-first")?, Some(b"kept".to_vec()));

    db.close().await
}

#[tokio::test]
async fn test_merged_tombstone_still_masks() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = open_compacting_engine(&dir);

    db.put(b"victim", b"original")?;
    db.put(b"bystander", b"untouched")?;
    db.flush()?;

    for batch in 0..2 {
        db.put(format!("filler_{batch}").as_bytes(), b"x")?;
        db.flush()?;
    }

    db.delete(b"victim")?;
    db.flush()?;

    wait_for_table_count(&db, 1).await;

    // The tombstone from the newest generation must survive the merge
    // and keep hiding the value from the oldest one.
    assert_eq!(db.get(b"victim")?, None);
    assert_eq!(db.get(b"bystander")?, Some(b"untouched".to_vec()));
    db.close().await?;

    // And the merged table round-trips through recovery.
    let db = open_compacting_engine(&dir);
    assert_eq!(db.get(b"victim")?, None);
    assert_eq!(db.get(b"bystander")?, Some(b"untouched".to_vec()));
    db.close().await
}

#[tokio::test]
async fn test_short_runs_are_left_alone() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = open_compacting_engine(&dir);

    for batch in 0..3 {
        db.put(format!("key_{batch}").as_bytes(), b"value")?;
        db.flush()?;
    }

    // Three same-tier tables never reach the four-file fan-in; several
    // ticks must pass without a merge.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(db.metrics()?.table_generations.len(), 3);

    db.close().await
}

#[tokio::test]
async fn test_compaction_then_further_writes() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = open_compacting_engine(&dir);

    for batch in 0..4 {
        db.put(format!("key_{batch}").as_bytes(), b"value")?;
        db.flush()?;
    }
    let merged = wait_for_table_count(&db, 1).await;

    // Generations allocated after the merge stay above the merged tag.
    db.put(b"after", b"value")?;
    db.flush()?;
    let generations = db.metrics()?.table_generations;
    assert_eq!(generations.len(), 2);
    assert!(generations[1] > merged[0]);

    assert_eq!(db.get(b"after")?, Some(b"value".to_vec()));
    assert_eq!(db.get(b"key_0")?, Some(b"value".to_vec()));

    db.close().await
}
