//! Behaviour tests for the two stores the engine keeps on disk: the schema
//! store and the retained result artifacts.

use std::fs;

use quarry_core::{
    ArtifactOutcome, ColumnDef, ExecutionId, ExecutionState, OutputArtifact, OutputRetention,
    ResultSet, SchemaStore, StoreError, UtcDateTime,
};
use tempfile::tempdir;

fn artifact(id: &str) -> OutputArtifact {
    OutputArtifact {
        query_text: String::from("SELECT * FROM error_logs WHERE dt = '$d'"),
        rendered_sql: String::from("SELECT * FROM error_logs WHERE dt = '2026-01-15'"),
        database: String::from("telemetry"),
        execution_id: ExecutionId::new(id),
        state: ExecutionState::Succeeded,
        statistics: None,
        outcome: ArtifactOutcome::Rows(ResultSet::default()),
        created_at: UtcDateTime::now(),
    }
}

fn retained_ids(retention: &OutputRetention) -> Vec<String> {
    retention
        .list()
        .iter()
        .map(|artifact| artifact.execution_id.to_string())
        .collect()
}

// =============================================================================
// Schema store
// =============================================================================

#[tokio::test]
async fn recording_a_table_twice_keeps_one_entry_with_the_latest_columns() {
    // Given: a file-backed schema store
    let home = tempdir().expect("tempdir");
    let store = SchemaStore::open(home.path().join("schemas.json")).expect("open");

    // When: the same table is recorded twice under different spellings
    store
        .record("error_logs", vec![ColumnDef::new("account_id", "string")])
        .await
        .expect("first record");
    store
        .record(
            "\"ERROR_LOGS\"",
            vec![
                ColumnDef::new("account_id", "string"),
                ColumnDef::new("dt", "string"),
            ],
        )
        .await
        .expect("second record");

    // Then: one entry remains, holding the newer columns
    assert_eq!(store.tables().await, vec![String::from("error_logs")]);
    let columns = store.lookup("error_logs").await.expect("known");
    assert_eq!(columns.len(), 2);

    // And: a fresh process sees the same state
    let reopened = SchemaStore::open(home.path().join("schemas.json")).expect("reopen");
    assert_eq!(reopened.lookup("Error_Logs").await, Some(columns));
}

#[tokio::test]
async fn empty_schemas_are_refused_and_leave_the_store_untouched() {
    let store = SchemaStore::in_memory();

    let error = store
        .record("sessions", Vec::new())
        .await
        .expect_err("empty schema");

    assert!(matches!(error, StoreError::EmptySchema { .. }));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn concurrent_recordings_of_distinct_tables_all_survive() {
    // Given: several writers sharing one store
    let home = tempdir().expect("tempdir");
    let store = SchemaStore::open(home.path().join("schemas.json")).expect("open");

    // When: each records its own table at the same time
    let mut tasks = Vec::new();
    for index in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .record(&format!("table_{index}"), vec![ColumnDef::new("dt", "string")])
                .await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("record");
    }

    // Then: no write was lost, in memory or on disk
    assert_eq!(store.len().await, 8);
    let reopened = SchemaStore::open(home.path().join("schemas.json")).expect("reopen");
    assert_eq!(reopened.len().await, 8);
}

#[test]
fn missing_schema_file_opens_as_empty() {
    let home = tempdir().expect("tempdir");
    let store = SchemaStore::open(home.path().join("nested").join("schemas.json"));
    assert!(store.is_ok());
}

// =============================================================================
// Output retention
// =============================================================================

#[test]
fn recording_one_more_than_the_cap_keeps_the_most_recent() {
    // Given: retention capped at three artifacts
    let home = tempdir().expect("tempdir");
    let retention = OutputRetention::open(home.path().join("outputs"), 3).expect("open");

    // When: four artifacts are recorded
    let mut records = Vec::new();
    for id in ["exec-1", "exec-2", "exec-3", "exec-4"] {
        records.push(retention.record(&artifact(id)).expect("record"));
    }

    // Then: exactly the three most recent remain, oldest first
    assert_eq!(retained_ids(&retention), vec!["exec-2", "exec-3", "exec-4"]);

    // And: the evicted file is gone while the newest is on disk
    assert!(!retention.path_of(&records[0]).exists());
    assert!(retention.path_of(&records[3]).exists());
    let files = fs::read_dir(retention.dir())
        .expect("outputs dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".txt"))
        .count();
    assert_eq!(files, 3);
}

#[test]
fn newest_artifact_survives_even_with_a_cap_of_one() {
    let home = tempdir().expect("tempdir");
    let retention = OutputRetention::open(home.path().join("outputs"), 1).expect("open");

    for id in ["exec-1", "exec-2", "exec-3"] {
        let record = retention.record(&artifact(id)).expect("record");
        assert_eq!(retained_ids(&retention), vec![id.to_string()]);
        assert!(retention.path_of(&record).exists());
    }
}

#[test]
fn earlier_clock_readings_do_not_reorder_eviction() {
    // Given: an artifact stamped earlier than one already retained
    let home = tempdir().expect("tempdir");
    let retention = OutputRetention::open(home.path().join("outputs"), 2).expect("open");
    retention.record(&artifact("exec-1")).expect("record");
    let newer = artifact("exec-2");
    let mut stale = artifact("exec-3");
    stale.created_at = UtcDateTime::parse("2020-01-01T00:00:00Z").expect("timestamp");
    retention.record(&newer).expect("record");

    // When: the stale-stamped artifact is recorded last
    retention.record(&stale).expect("record");

    // Then: it still counts as the most recent
    assert_eq!(retained_ids(&retention), vec!["exec-2", "exec-3"]);
}

#[test]
fn reopening_with_a_lower_cap_trims_the_oldest_and_forgets_deleted_files() {
    // Given: four retained artifacts, one of which was removed by hand
    let home = tempdir().expect("tempdir");
    let dir = home.path().join("outputs");
    let retention = OutputRetention::open(&dir, 10).expect("open");
    let mut records = Vec::new();
    for id in ["exec-1", "exec-2", "exec-3", "exec-4"] {
        records.push(retention.record(&artifact(id)).expect("record"));
    }
    fs::remove_file(retention.path_of(&records[3])).expect("remove newest");
    drop(retention);

    // When: the directory is reopened with a cap of two
    let reopened = OutputRetention::open(&dir, 2).expect("reopen");

    // Then: the missing file is forgotten and the oldest survivor evicted
    assert_eq!(retained_ids(&reopened), vec!["exec-2", "exec-3"]);
}

#[test]
fn zero_cap_is_refused() {
    let home = tempdir().expect("tempdir");
    let error = OutputRetention::open(home.path().join("outputs"), 0).expect_err("zero cap");
    assert!(matches!(error, StoreError::InvalidRetentionCap));
}
