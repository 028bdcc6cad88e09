//! # Quarry Warehouse
//!
//! A local stand-in for a hosted asynchronous query service: a `DuckDB`
//! database exposing one view per table directory of a hive-partitioned
//! parquet tree.
//!
//! ```text
//! <data_root>/
//! ├── error_logs/
//! │   ├── dt=2026-01-14/part-0.parquet
//! │   └── dt=2026-01-15/part-0.parquet
//! └── sessions/
//!     └── dt=2026-01-15/part-0.parquet
//! ```
//!
//! Each directory becomes `<database>.<table>`, with the `dt` partition
//! column read from the path. Submitted statements run on the blocking pool
//! and are observed through the usual submit/poll/fetch/cancel contract.

pub mod error;
pub mod pool;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ::duckdb::types::Value as DuckValue;
use ::duckdb::{Statement, ToSql};
use quarry_core::service::{
    ExecutionStatistics, ExecutionStatus, PageToken, QueryService, ResultColumn, ResultPage,
    ResultSet, ServiceError, ServiceFuture, ServiceState, Submission,
};
use quarry_core::ExecutionId;
use serde_json::{Number, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use error::WarehouseError;
pub use pool::{ConnectionPool, PooledConnection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalWarehouseConfig {
    /// Directory holding one sub-directory per table.
    pub data_root: PathBuf,
    /// Schema the table views are created in.
    pub database: String,
    pub max_pool_size: usize,
}

impl LocalWarehouseConfig {
    pub fn new(data_root: impl Into<PathBuf>, database: impl Into<String>) -> Self {
        Self {
            data_root: data_root.into(),
            database: database.into(),
            max_pool_size: 4,
        }
    }
}

enum JobState {
    Queued,
    Running,
    Succeeded(Arc<ResultSet>),
    Failed(String),
    Cancelled,
}

struct Job {
    state: JobState,
    output_location: String,
    statistics: Option<ExecutionStatistics>,
}

type Jobs = Arc<Mutex<HashMap<ExecutionId, Job>>>;

#[derive(Clone)]
pub struct LocalWarehouse {
    config: LocalWarehouseConfig,
    pool: ConnectionPool,
    jobs: Jobs,
    tables: Vec<String>,
}

impl LocalWarehouse {
    /// Create the database schema and register a view per table directory.
    pub fn open(config: LocalWarehouseConfig) -> Result<Self, WarehouseError> {
        if !is_identifier(&config.database) {
            return Err(WarehouseError::InvalidIdentifier(config.database));
        }
        if !config.data_root.is_dir() {
            return Err(WarehouseError::InvalidDataRoot {
                path: config.data_root,
            });
        }

        let pool = ConnectionPool::in_memory(config.max_pool_size)?;
        let connection = pool.acquire()?;
        connection.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {};",
            quote_identifier(&config.database)
        ))?;

        let mut table_dirs: Vec<PathBuf> = fs::read_dir(&config.data_root)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        table_dirs.sort();

        let mut tables = Vec::new();
        for dir in table_dirs {
            let Some(name) = dir.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !is_identifier(name) {
                warn!(directory = %dir.display(), "skipping directory that is not a valid table name");
                continue;
            }
            let mut files = Vec::new();
            collect_parquet_files(&dir, &mut files)?;
            if files.is_empty() {
                debug!(table = name, "skipping table directory without parquet files");
                continue;
            }

            let pattern = dir.join("**").join("*.parquet");
            connection.execute_batch(&format!(
                "CREATE OR REPLACE VIEW {}.{} AS SELECT * FROM read_parquet('{}', hive_partitioning = true);",
                quote_identifier(&config.database),
                quote_identifier(name),
                escape_sql_string(&pattern.to_string_lossy())
            ))?;
            tables.push(name.to_string());
        }
        drop(connection);

        info!(
            database = %config.database,
            data_root = %config.data_root.display(),
            tables = tables.len(),
            "local warehouse opened"
        );
        Ok(Self {
            config,
            pool,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            tables,
        })
    }

    pub fn config(&self) -> &LocalWarehouseConfig {
        &self.config
    }

    /// Registered table names, sorted.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, Job>> {
        self.jobs.lock().expect("warehouse job table mutex poisoned")
    }
}

impl QueryService for LocalWarehouse {
    fn submit<'a>(&'a self, submission: Submission) -> ServiceFuture<'a, ExecutionId> {
        Box::pin(async move {
            if submission.database() != self.config.database {
                return Err(ServiceError::rejected(format!(
                    "database '{}' does not exist",
                    submission.database()
                )));
            }
            if submission.sql().trim().is_empty() {
                return Err(ServiceError::rejected("query must not be empty"));
            }

            let execution_id = ExecutionId::new(Uuid::new_v4().to_string());
            let output_location = format!("{}{}.csv", submission.result_location(), execution_id);
            self.lock_jobs().insert(
                execution_id.clone(),
                Job {
                    state: JobState::Queued,
                    output_location,
                    statistics: None,
                },
            );

            let jobs = Arc::clone(&self.jobs);
            let pool = self.pool.clone();
            let database = self.config.database.clone();
            let sql = submission.sql().to_string();
            let job_id = execution_id.clone();
            tokio::task::spawn_blocking(move || run_job(&jobs, &pool, &database, &sql, &job_id));

            debug!(execution_id = %execution_id, workgroup = submission.workgroup(), "job queued");
            Ok(execution_id)
        })
    }

    fn poll<'a>(&'a self, execution_id: &'a ExecutionId) -> ServiceFuture<'a, ExecutionStatus> {
        Box::pin(async move {
            let jobs = self.lock_jobs();
            let job = jobs
                .get(execution_id)
                .ok_or_else(|| unknown_execution(execution_id))?;

            let mut status = match &job.state {
                JobState::Queued => ExecutionStatus::new(ServiceState::Queued),
                JobState::Running => ExecutionStatus::new(ServiceState::Running),
                JobState::Succeeded(_) => ExecutionStatus::new(ServiceState::Succeeded)
                    .with_result_location(job.output_location.clone()),
                JobState::Failed(reason) => ExecutionStatus::failed(reason.clone()),
                JobState::Cancelled => ExecutionStatus::new(ServiceState::Cancelled)
                    .with_failure_reason("Query cancelled by user"),
            };
            if let Some(statistics) = job.statistics {
                status = status.with_statistics(statistics);
            }
            Ok(status)
        })
    }

    fn fetch<'a>(
        &'a self,
        execution_id: &'a ExecutionId,
        page_token: Option<PageToken>,
        max_results: usize,
    ) -> ServiceFuture<'a, ResultPage> {
        Box::pin(async move {
            let result = {
                let jobs = self.lock_jobs();
                let job = jobs
                    .get(execution_id)
                    .ok_or_else(|| unknown_execution(execution_id))?;
                match &job.state {
                    JobState::Succeeded(result) => Arc::clone(result),
                    _ => {
                        return Err(ServiceError::rejected(format!(
                            "execution {execution_id} has not succeeded"
                        )))
                    }
                }
            };

            let offset = match &page_token {
                Some(PageToken(token)) => token
                    .parse::<usize>()
                    .map_err(|_| ServiceError::rejected(format!("invalid page token '{token}'")))?,
                None => 0,
            };
            let start = offset.min(result.rows.len());
            let end = start.saturating_add(max_results.max(1)).min(result.rows.len());

            Ok(ResultPage {
                columns: result.columns.clone(),
                rows: result.rows[start..end].to_vec(),
                next_token: (end < result.rows.len()).then(|| PageToken(end.to_string())),
            })
        })
    }

    fn cancel<'a>(&'a self, execution_id: &'a ExecutionId) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let mut jobs = self.lock_jobs();
            let job = jobs
                .get_mut(execution_id)
                .ok_or_else(|| unknown_execution(execution_id))?;
            if matches!(job.state, JobState::Queued | JobState::Running) {
                job.state = JobState::Cancelled;
                info!(execution_id = %execution_id, "execution cancelled");
            }
            Ok(())
        })
    }
}

fn unknown_execution(execution_id: &ExecutionId) -> ServiceError {
    ServiceError::not_found(format!("execution {execution_id} not found"))
}

fn run_job(jobs: &Jobs, pool: &ConnectionPool, database: &str, sql: &str, execution_id: &ExecutionId) {
    {
        let mut guard = jobs.lock().expect("warehouse job table mutex poisoned");
        match guard.get_mut(execution_id) {
            Some(job) if matches!(job.state, JobState::Queued) => job.state = JobState::Running,
            _ => return,
        }
    }

    let started = Instant::now();
    let outcome = run_statement(pool, database, sql);
    let statistics = ExecutionStatistics {
        data_scanned_bytes: 0,
        engine_execution_ms: started.elapsed().as_millis() as u64,
    };

    let mut guard = jobs.lock().expect("warehouse job table mutex poisoned");
    let Some(job) = guard.get_mut(execution_id) else {
        return;
    };
    if matches!(job.state, JobState::Cancelled) {
        debug!(execution_id = %execution_id, "discarding result of cancelled execution");
        return;
    }
    job.statistics = Some(statistics);
    job.state = match outcome {
        Ok(result) => JobState::Succeeded(Arc::new(result)),
        Err(error) => {
            debug!(execution_id = %execution_id, error = %error, "execution failed");
            JobState::Failed(error.to_string())
        }
    };
}

fn run_statement(
    pool: &ConnectionPool,
    database: &str,
    sql: &str,
) -> Result<ResultSet, WarehouseError> {
    let connection = pool.acquire()?;
    connection.execute_batch(&format!("SET schema = '{}';", escape_sql_string(database)))?;

    let sql = sql.trim().trim_end_matches(';').trim();
    let mut statement = connection.prepare(sql)?;
    let mut cursor = statement.query([] as [&dyn ToSql; 0])?;

    // Column metadata is only available once the statement has run.
    let columns = cursor.as_ref().map(result_columns).unwrap_or_default();
    let mut rows = Vec::new();
    while let Some(row) = cursor.next()? {
        rows.push(read_row(row, columns.len())?);
    }

    Ok(ResultSet { columns, rows })
}

fn result_columns(statement: &Statement<'_>) -> Vec<ResultColumn> {
    (0..statement.column_count())
        .map(|index| ResultColumn {
            name: statement
                .column_name(index)
                .map(|name| name.to_string())
                .unwrap_or_else(|_| format!("_col{index}")),
            r#type: statement.column_type(index).to_string(),
        })
        .collect()
}

fn read_row(row: &::duckdb::Row<'_>, column_count: usize) -> Result<Vec<Value>, ::duckdb::Error> {
    let mut output = Vec::with_capacity(column_count);
    for index in 0..column_count {
        let value: DuckValue = row.get(index)?;
        output.push(to_json_value(value));
    }
    Ok(output)
}

fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::SmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::Int(value) => Value::Number(Number::from(value)),
        DuckValue::BigInt(value) => Value::Number(Number::from(value)),
        DuckValue::UTinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::USmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::UInt(value) => Value::Number(Number::from(value)),
        DuckValue::UBigInt(value) => Value::Number(Number::from(value)),
        DuckValue::Float(value) => number_from_f64(f64::from(value)),
        DuckValue::Double(value) => number_from_f64(value),
        DuckValue::Text(value) => Value::String(value),
        DuckValue::Blob(value) => Value::String(hex::encode(value)),
        other => Value::String(format!("{other:?}")),
    }
}

fn number_from_f64(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn collect_parquet_files(root: &Path, files: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_parquet_files(path.as_path(), files)?;
            continue;
        }
        if path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension.eq_ignore_ascii_case("parquet"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn quote_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}
