//! One investigation: render → validate → execute → record.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::QuarryConfig;
use crate::error::{SessionError, ValidationError};
use crate::execution::QueryExecution;
use crate::executor::{AbortHandle, ExecutionReport, QueryExecutor};
use crate::retention::{OutputArtifact, OutputRetention, RetainedArtifact};
use crate::schema_store::{parse_describe_rows, SchemaEntry, SchemaStore};
use crate::service::{format_cell, QueryService, ResultSet};
use crate::template::QueryRequest;
use crate::validator::{validate, AcceptedQuery};

/// A successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvestigationOutcome {
    pub execution: QueryExecution,
    pub result: ResultSet,
    pub artifact: RetainedArtifact,
    /// Set when the query was a `DESCRIBE` whose columns were recorded.
    pub schema_update: Option<SchemaEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    pub discovered: Vec<SchemaEntry>,
    /// Tables already known and left alone.
    pub skipped: Vec<String>,
}

pub struct InvestigationSession {
    executor: QueryExecutor,
    schemas: SchemaStore,
    outputs: OutputRetention,
    database: String,
    result_location: String,
}

impl InvestigationSession {
    pub fn new(
        executor: QueryExecutor,
        schemas: SchemaStore,
        outputs: OutputRetention,
        database: impl Into<String>,
        result_location: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            schemas,
            outputs,
            database: database.into(),
            result_location: result_location.into(),
        }
    }

    /// Build a session whose stores live under the configured home.
    pub fn from_config(
        service: Arc<dyn QueryService>,
        config: &QuarryConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let schemas = SchemaStore::open(config.schema_path())?;
        let outputs = OutputRetention::open(config.outputs_dir(), config.retention_cap)?;

        Ok(Self::new(
            QueryExecutor::new(service, config.executor.clone()),
            schemas,
            outputs,
            config.database.clone(),
            config.result_location.clone(),
        ))
    }

    /// A request for `template` against this session's database.
    pub fn request(&self, template: impl Into<String>) -> QueryRequest {
        QueryRequest::new(template, self.database.clone(), self.result_location.clone())
    }

    /// Render and validate without contacting the query service.
    pub fn check(&self, request: &QueryRequest) -> Result<AcceptedQuery, ValidationError> {
        validate(request.render()?).into_result()
    }

    pub async fn run(
        &self,
        request: &QueryRequest,
        abort: &AbortHandle,
    ) -> Result<InvestigationOutcome, SessionError> {
        let accepted = self.check(request)?;
        let report = self.executor.execute(&accepted, request, abort).await?;

        let artifact = OutputArtifact::from_report(request, &accepted, &report);
        let retained = self.outputs.record(&artifact)?;

        let ExecutionReport { execution, result } = report;
        let Some(result) = result else {
            return Err(SessionError::ServiceReportedFailure {
                execution_id: execution.id().clone(),
                state: execution.state(),
                reason: execution.failure_reason().unwrap_or("Unknown").to_string(),
                artifact: retained.file_name,
            });
        };

        let schema_update = match accepted.rendered().describe_target() {
            Some(table) => self.learn_schema(table, &result).await?,
            None => None,
        };

        Ok(InvestigationOutcome {
            execution,
            result,
            artifact: retained,
            schema_update,
        })
    }

    async fn learn_schema(
        &self,
        table: &str,
        result: &ResultSet,
    ) -> Result<Option<SchemaEntry>, SessionError> {
        let columns = parse_describe_rows(result);
        if columns.is_empty() {
            warn!(table, "DESCRIBE returned no columns; schema store unchanged");
            return Ok(None);
        }
        Ok(Some(self.schemas.record(table, columns).await?))
    }

    /// Introspect each table not yet in the schema store, or all of them
    /// when `refresh` is set.
    pub async fn discover(
        &self,
        tables: &[String],
        refresh: bool,
        abort: &AbortHandle,
    ) -> Result<DiscoveryReport, SessionError> {
        let mut report = DiscoveryReport::default();

        for table in tables {
            if !is_table_name(table) {
                return Err(SessionError::InvalidTableName(table.clone()));
            }
            if !refresh && self.schemas.contains(table).await {
                report.skipped.push(table.clone());
                continue;
            }

            let request = self.request(format!("DESCRIBE {table}"));
            let outcome = self.run(&request, abort).await?;
            if let Some(entry) = outcome.schema_update {
                report.discovered.push(entry);
            }
        }

        info!(
            discovered = report.discovered.len(),
            skipped = report.skipped.len(),
            "schema discovery finished"
        );
        Ok(report)
    }

    /// List the database's tables with `SHOW TABLES`, then [`discover`](Self::discover) them.
    pub async fn discover_all(
        &self,
        refresh: bool,
        abort: &AbortHandle,
    ) -> Result<DiscoveryReport, SessionError> {
        let listing = self.run(&self.request("SHOW TABLES"), abort).await?;
        let tables: Vec<String> = listing
            .result
            .rows
            .iter()
            .filter_map(|row| row.first())
            .map(|cell| format_cell(cell).trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        self.discover(&tables, refresh, abort).await
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn schemas(&self) -> &SchemaStore {
        &self.schemas
    }

    pub fn outputs(&self) -> &OutputRetention {
        &self.outputs
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

/// Plain or dotted identifier; nothing a template or SQL parser could misread.
fn is_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_qualified_table_names() {
        assert!(is_table_name("error_logs"));
        assert!(is_table_name("telemetry.error_logs"));
    }

    #[test]
    fn rejects_names_that_could_smuggle_sql() {
        for name in ["", "t; DROP TABLE x", "t.", "$table", "a b", "t--"] {
            assert!(!is_table_name(name), "{name}");
        }
    }
}
