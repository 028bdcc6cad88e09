//! Local result artifacts with a bounded retention count.
//!
//! Eviction order comes from the engine's own index (creation time, then
//! insertion sequence). File modification times are never consulted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::execution::{ExecutionId, ExecutionState};
use crate::executor::ExecutionReport;
use crate::service::{format_cell, ExecutionStatistics, ResultSet};
use crate::template::QueryRequest;
use crate::timestamp::UtcDateTime;
use crate::validator::AcceptedQuery;

const INDEX_FILE: &str = "index.json";
const MAX_COLUMN_WIDTH: usize = 200;
const UNKNOWN_REASON: &str = "Unknown";

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactOutcome {
    Rows(ResultSet),
    /// The service reported `Failed` or `Cancelled`; `reason` is its message.
    Failure { state: ExecutionState, reason: String },
}

/// Immutable snapshot of one terminal execution.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArtifact {
    pub query_text: String,
    pub rendered_sql: String,
    pub database: String,
    pub execution_id: ExecutionId,
    pub state: ExecutionState,
    pub statistics: Option<ExecutionStatistics>,
    pub outcome: ArtifactOutcome,
    pub created_at: UtcDateTime,
}

impl OutputArtifact {
    pub fn from_report(
        request: &QueryRequest,
        query: &AcceptedQuery,
        report: &ExecutionReport,
    ) -> Self {
        let execution = &report.execution;
        let outcome = match &report.result {
            Some(result) => ArtifactOutcome::Rows(result.clone()),
            None => ArtifactOutcome::Failure {
                state: execution.state(),
                reason: execution
                    .failure_reason()
                    .unwrap_or(UNKNOWN_REASON)
                    .to_string(),
            },
        };

        Self {
            query_text: request.template().to_string(),
            rendered_sql: query.sql().to_string(),
            database: request.database().to_string(),
            execution_id: execution.id().clone(),
            state: execution.state(),
            statistics: execution.statistics(),
            outcome,
            created_at: UtcDateTime::now(),
        }
    }

    /// Plain-text report written to the artifact file.
    pub fn render_text(&self) -> String {
        let rule = "=".repeat(70);
        let thin_rule = "-".repeat(40);
        let statistics = self.statistics.unwrap_or_default();

        let mut lines = vec![
            String::from("Quarry Query Results"),
            rule.clone(),
            format!("Created: {}", self.created_at),
            format!("Database: {}", self.database),
            format!("Execution ID: {}", self.execution_id),
            format!("State: {}", self.state),
            format!(
                "Data scanned: {:.2} MB",
                statistics.data_scanned_bytes as f64 / 1024.0 / 1024.0
            ),
            format!("Execution time: {}ms", statistics.engine_execution_ms),
            rule,
            String::new(),
            String::from("Query:"),
            thin_rule.clone(),
            self.query_text.trim().to_string(),
            thin_rule.clone(),
        ];
        if self.rendered_sql.trim() != self.query_text.trim() {
            lines.push(String::new());
            lines.push(String::from("Rendered SQL:"));
            lines.push(thin_rule.clone());
            lines.push(self.rendered_sql.trim().to_string());
            lines.push(thin_rule);
        }
        lines.push(String::new());

        match &self.outcome {
            ArtifactOutcome::Failure { state, reason } => {
                lines.push(format!("Query {state}:"));
                lines.push(reason.clone());
            }
            ArtifactOutcome::Rows(result) => {
                lines.push(format!("Results ({} rows):", result.row_count()));
                lines.push(String::new());
                if result.rows.is_empty() {
                    lines.push(String::from("(no results)"));
                } else {
                    lines.extend(render_table(result));
                }
            }
        }

        lines.join("\n")
    }
}

fn render_table(result: &ResultSet) -> Vec<String> {
    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(format_cell).collect())
        .collect();

    let mut widths: Vec<usize> = result
        .columns
        .iter()
        .map(|column| column.name.chars().count())
        .collect();
    for row in &rows {
        for (index, cell) in row.iter().enumerate() {
            let width = cell.chars().count();
            match widths.get_mut(index) {
                Some(current) => *current = (*current).max(width),
                None => widths.push(width),
            }
        }
    }
    for width in &mut widths {
        *width = (*width).min(MAX_COLUMN_WIDTH);
    }

    let header = format_line(&widths, result.columns.iter().map(|column| column.name.as_str()));
    let mut lines = vec![header.clone(), "-".repeat(header.chars().count())];
    for row in &rows {
        lines.push(format_line(&widths, row.iter().map(String::as_str)));
    }
    lines
}

fn format_line<'a>(widths: &[usize], cells: impl Iterator<Item = &'a str>) -> String {
    widths
        .iter()
        .zip(cells.chain(std::iter::repeat("")))
        .map(|(width, cell)| {
            let clipped: String = cell.chars().take(*width).collect();
            format!("{clipped:<width$}", width = *width)
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// One retained artifact as tracked by the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedArtifact {
    pub sequence: u64,
    pub created_at: UtcDateTime,
    pub file_name: String,
    pub execution_id: ExecutionId,
    pub state: ExecutionState,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RetentionIndex {
    next_sequence: u64,
    entries: Vec<RetainedArtifact>,
}

/// Keeps at most `cap` artifacts in `dir`, evicting the oldest first.
#[derive(Debug, Clone)]
pub struct OutputRetention {
    dir: PathBuf,
    cap: usize,
    index: Arc<Mutex<RetentionIndex>>,
}

impl OutputRetention {
    pub fn open(dir: impl Into<PathBuf>, cap: usize) -> Result<Self, StoreError> {
        if cap == 0 {
            return Err(StoreError::InvalidRetentionCap);
        }
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut index = load_index(&dir.join(INDEX_FILE))?;
        let tracked = index.entries.len();
        index
            .entries
            .retain(|entry| dir.join(&entry.file_name).exists());
        if index.entries.len() != tracked {
            debug!(
                dropped = tracked - index.entries.len(),
                "dropped index entries whose files are gone"
            );
        }
        sort_entries(&mut index.entries);
        evict_over_cap(&dir, cap, &mut index.entries);
        save_index(&dir, &index)?;

        Ok(Self {
            dir,
            cap,
            index: Arc::new(Mutex::new(index)),
        })
    }

    /// Write `artifact`, then evict the oldest artifacts until at most `cap`
    /// remain. The artifact just written is always retained.
    pub fn record(&self, artifact: &OutputArtifact) -> Result<RetainedArtifact, StoreError> {
        let mut index = self.index.lock().expect("retention index lock poisoned");

        let sequence = index.next_sequence;
        let created_at = index
            .entries
            .last()
            .map_or(artifact.created_at, |last| last.created_at.max(artifact.created_at));
        let file_name = format!("query_{}_{sequence:04}.txt", created_at.format_compact());
        write_atomically(&self.dir.join(&file_name), artifact.render_text().as_bytes())?;

        let retained = RetainedArtifact {
            sequence,
            created_at,
            file_name,
            execution_id: artifact.execution_id.clone(),
            state: artifact.state,
        };
        index.next_sequence = sequence + 1;
        index.entries.push(retained.clone());
        sort_entries(&mut index.entries);
        evict_over_cap(&self.dir, self.cap, &mut index.entries);
        save_index(&self.dir, &index)?;

        info!(
            file = %retained.file_name,
            execution_id = %retained.execution_id,
            retained = index.entries.len(),
            "output artifact recorded"
        );
        Ok(retained)
    }

    /// Retained artifacts, oldest first.
    pub fn list(&self) -> Vec<RetainedArtifact> {
        self.index
            .lock()
            .expect("retention index lock poisoned")
            .entries
            .clone()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, artifact: &RetainedArtifact) -> PathBuf {
        self.dir.join(&artifact.file_name)
    }
}

fn sort_entries(entries: &mut [RetainedArtifact]) {
    entries.sort_by(|left, right| {
        (left.created_at, left.sequence).cmp(&(right.created_at, right.sequence))
    });
}

fn evict_over_cap(dir: &Path, cap: usize, entries: &mut Vec<RetainedArtifact>) {
    if entries.len() <= cap {
        return;
    }
    let excess = entries.len() - cap;
    for evicted in entries.drain(..excess) {
        match fs::remove_file(dir.join(&evicted.file_name)) {
            Ok(()) => debug!(file = %evicted.file_name, "evicted output artifact"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                file = %evicted.file_name,
                error = %error,
                "failed to delete evicted output artifact"
            ),
        }
    }
}

fn load_index(path: &Path) -> Result<RetentionIndex, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(RetentionIndex::default()),
        Err(error) => Err(error.into()),
    }
}

fn save_index(dir: &Path, index: &RetentionIndex) -> Result<(), StoreError> {
    let body = serde_json::to_vec_pretty(index)?;
    write_atomically(&dir.join(INDEX_FILE), &body)
}

fn write_atomically(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    let staging = path.with_extension("tmp");
    fs::write(&staging, body)?;
    fs::rename(&staging, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::service::ResultColumn;

    fn artifact(id: &str) -> OutputArtifact {
        OutputArtifact {
            query_text: String::from("SELECT * FROM t WHERE dt = '$d'"),
            rendered_sql: String::from("SELECT * FROM t WHERE dt = '2026-01-15'"),
            database: String::from("telemetry"),
            execution_id: ExecutionId::new(id),
            state: ExecutionState::Succeeded,
            statistics: Some(ExecutionStatistics {
                data_scanned_bytes: 2 * 1024 * 1024,
                engine_execution_ms: 840,
            }),
            outcome: ArtifactOutcome::Rows(ResultSet {
                columns: vec![
                    ResultColumn {
                        name: String::from("account_id"),
                        r#type: String::from("varchar"),
                    },
                    ResultColumn {
                        name: String::from("n"),
                        r#type: String::from("bigint"),
                    },
                ],
                rows: vec![vec![json!("acct_042"), json!(3)]],
            }),
            created_at: UtcDateTime::now(),
        }
    }

    fn files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".txt"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn keeps_exactly_the_k_most_recent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let retention = OutputRetention::open(temp.path(), 3).expect("open");

        let recorded: Vec<_> = (0..4)
            .map(|n| retention.record(&artifact(&format!("exec-{n}"))).expect("record"))
            .collect();

        let kept: Vec<_> = retention
            .list()
            .into_iter()
            .map(|entry| entry.execution_id.to_string())
            .collect();
        assert_eq!(kept, vec!["exec-1", "exec-2", "exec-3"]);
        assert_eq!(files(temp.path()).len(), 3);
        assert!(!retention.path_of(&recorded[0]).exists());
        assert!(retention.path_of(&recorded[3]).exists());
    }

    #[test]
    fn newest_survives_even_with_older_clock_reading() {
        let temp = tempfile::tempdir().expect("tempdir");
        let retention = OutputRetention::open(temp.path(), 1).expect("open");

        retention.record(&artifact("first")).expect("record");
        let mut late = artifact("second");
        late.created_at = UtcDateTime::from_unix_seconds(0).expect("epoch");
        let newest = retention.record(&late).expect("record");

        assert_eq!(retention.list(), vec![newest.clone()]);
        assert!(retention.path_of(&newest).exists());
    }

    #[test]
    fn zero_cap_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let error = OutputRetention::open(temp.path(), 0).expect_err("cap 0");
        assert!(matches!(error, StoreError::InvalidRetentionCap));
    }

    #[test]
    fn reopening_continues_sequence_and_applies_new_cap() {
        let temp = tempfile::tempdir().expect("tempdir");
        {
            let retention = OutputRetention::open(temp.path(), 5).expect("open");
            for n in 0..4 {
                retention.record(&artifact(&format!("exec-{n}"))).expect("record");
            }
        }

        let retention = OutputRetention::open(temp.path(), 2).expect("reopen");
        assert_eq!(retention.list().len(), 2);
        let next = retention.record(&artifact("exec-4")).expect("record");
        assert_eq!(next.sequence, 4);
        assert_eq!(files(temp.path()).len(), 2);
    }

    #[test]
    fn forgets_files_removed_outside_the_engine() {
        let temp = tempfile::tempdir().expect("tempdir");
        let retention = OutputRetention::open(temp.path(), 5).expect("open");
        let first = retention.record(&artifact("exec-0")).expect("record");
        retention.record(&artifact("exec-1")).expect("record");
        fs::remove_file(retention.path_of(&first)).expect("remove");

        let reopened = OutputRetention::open(temp.path(), 5).expect("reopen");
        assert_eq!(reopened.list().len(), 1);
    }

    #[test]
    fn renders_rows_report() {
        let text = artifact("exec-9").render_text();

        assert!(text.contains("Execution ID: exec-9"));
        assert!(text.contains("Data scanned: 2.00 MB"));
        assert!(text.contains("Rendered SQL:"));
        assert!(text.contains("Results (1 rows):"));
        assert!(text.contains("account_id | n"));
        assert!(text.contains("acct_042   | 3"));
    }

    #[test]
    fn renders_failure_reason_verbatim() {
        let mut failed = artifact("exec-f");
        failed.state = ExecutionState::Failed;
        failed.outcome = ArtifactOutcome::Failure {
            state: ExecutionState::Failed,
            reason: String::from("HIVE_BAD_DATA: malformed parquet"),
        };

        let text = failed.render_text();
        assert!(text.contains("Query FAILED:\nHIVE_BAD_DATA: malformed parquet"));
    }

    #[test]
    fn caps_column_width() {
        let mut wide = artifact("exec-w");
        wide.outcome = ArtifactOutcome::Rows(ResultSet {
            columns: vec![ResultColumn {
                name: String::from("payload"),
                r#type: String::from("varchar"),
            }],
            rows: vec![vec![json!("x".repeat(500))]],
        });

        let text = wide.render_text();
        let longest = text.lines().map(|line| line.chars().count()).max().unwrap_or(0);
        assert_eq!(longest, MAX_COLUMN_WIDTH);
    }
}
