//! Durable table-name → columns map learned from `DESCRIBE` results.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::service::{format_cell, ResultSet};
use crate::timestamp::UtcDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub recorded_at: UtcDateTime,
}

type SchemaMap = BTreeMap<String, SchemaEntry>;

/// Thread-safe schema store, optionally backed by a JSON file.
///
/// Writers hold the lock for the whole merge-and-persist step, so readers see
/// either the old entry or the new one.
#[derive(Debug, Clone)]
pub struct SchemaStore {
    path: Option<PathBuf>,
    inner: Arc<tokio::sync::RwLock<SchemaMap>>,
}

impl SchemaStore {
    /// Load the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => SchemaMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => SchemaMap::new(),
            Err(error) => return Err(error.into()),
        };
        debug!(path = %path.display(), tables = entries.len(), "schema store loaded");

        Ok(Self {
            path: Some(path),
            inner: Arc::new(tokio::sync::RwLock::new(entries)),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Arc::new(tokio::sync::RwLock::new(SchemaMap::new())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert or replace the columns of `table`.
    pub async fn record(
        &self,
        table: &str,
        columns: Vec<ColumnDef>,
    ) -> Result<SchemaEntry, StoreError> {
        let key = normalize_table_name(table);
        if columns.is_empty() {
            return Err(StoreError::EmptySchema { table: key });
        }
        let entry = SchemaEntry {
            table: key.clone(),
            columns,
            recorded_at: UtcDateTime::now(),
        };

        let mut guard = self.inner.write().await;
        let mut next = guard.clone();
        let replaced = next.insert(key.clone(), entry.clone()).is_some();
        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        *guard = next;

        info!(
            table = %key,
            columns = entry.columns.len(),
            replaced,
            "schema recorded"
        );
        Ok(entry)
    }

    pub async fn lookup(&self, table: &str) -> Option<Vec<ColumnDef>> {
        let guard = self.inner.read().await;
        guard
            .get(&normalize_table_name(table))
            .map(|entry| entry.columns.clone())
    }

    pub async fn entry(&self, table: &str) -> Option<SchemaEntry> {
        let guard = self.inner.read().await;
        guard.get(&normalize_table_name(table)).cloned()
    }

    pub async fn contains(&self, table: &str) -> bool {
        let guard = self.inner.read().await;
        guard.contains_key(&normalize_table_name(table))
    }

    /// Known table names, sorted.
    pub async fn tables(&self) -> Vec<String> {
        let guard = self.inner.read().await;
        guard.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        let guard = self.inner.read().await;
        guard.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn persist(path: &Path, entries: &SchemaMap) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(entries)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, body)?;
    fs::rename(&staging, path)?;
    Ok(())
}

/// Lower-cased, quote-free form of a possibly qualified table name.
///
/// `"Telemetry".ERROR_LOGS` and `telemetry.error_logs` name the same entry.
pub fn normalize_table_name(name: &str) -> String {
    name.trim()
        .split('.')
        .map(|part| {
            part.trim()
                .trim_matches(|ch| ch == '"' || ch == '`')
                .to_ascii_lowercase()
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Turn `DESCRIBE` output into column definitions.
///
/// Accepts two-column rows (`col_name`, `data_type`) and single-cell rows
/// holding tab-separated text. Blank lines and `#` section headers are
/// skipped; a column repeated in the partition section is kept once.
pub fn parse_describe_rows(result: &ResultSet) -> Vec<ColumnDef> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();

    for row in &result.rows {
        let cells: Vec<String> = match row.as_slice() {
            [single] => format_cell(single)
                .split('\t')
                .map(|cell| cell.trim().to_string())
                .collect(),
            _ => row.iter().map(|cell| format_cell(cell).trim().to_string()).collect(),
        };

        let (Some(name), Some(data_type)) = (cells.first(), cells.get(1)) else {
            continue;
        };
        if name.is_empty() || name.starts_with('#') || data_type.is_empty() {
            continue;
        }
        if seen.insert(name.to_ascii_lowercase()) {
            columns.push(ColumnDef::new(name.clone(), data_type.clone()));
        }
    }

    columns
}
