//! # Quarry Core
//!
//! Safety-gated execution engine for queries against a partitioned,
//! append-only analytical warehouse served by an asynchronous, billed query
//! service (Athena style).
//!
//! ## Overview
//!
//! - **Templates** render `$name` placeholders into concrete SQL
//! - **Validation** rejects write statements and unpartitioned scans before
//!   anything is submitted
//! - **Execution** drives submit/poll/fetch with a poll deadline and bounded
//!   fetch retries
//! - **Schema store** remembers columns learned from `DESCRIBE`
//! - **Retention** keeps the newest K result artifacts on disk
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Engine settings and home directory resolution |
//! | [`error`] | Error taxonomy with stable codes |
//! | [`execution`] | Execution ids, states and the per-invocation record |
//! | [`executor`] | Submit/poll/fetch lifecycle and abort handling |
//! | [`lexer`] | SQL tokenizer and statement shape analysis |
//! | [`retention`] | Output artifacts and bounded retention |
//! | [`retry`] | Retry policy for result fetches |
//! | [`schema_store`] | Table → columns store |
//! | [`service`] | Query service contract |
//! | [`session`] | Render → validate → execute → record pipeline |
//! | [`template`] | Placeholder rendering and saved templates |
//! | [`throttling`] | Status poll rate limiting |
//! | [`timestamp`] | UTC timestamps |
//! | [`validator`] | Read-only and partition-scope gate |
//!
//! ## Pipeline
//!
//! ```text
//! QueryRequest ──render──▶ RenderedQuery ──validate──▶ AcceptedQuery
//!                                                          │
//!                                                          ▼
//!  SchemaStore ◀──DESCRIBE── OutputRetention ◀──────── QueryExecutor ──▶ QueryService
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod executor;
pub mod lexer;
pub mod retention;
pub mod retry;
pub mod schema_store;
pub mod service;
pub mod session;
pub mod template;
pub mod throttling;
pub mod timestamp;
pub mod validator;

pub use config::QuarryConfig;
pub use error::{
    ConfigError, ExecutionError, SessionError, StoreError, TemplateError, ValidationError,
};
pub use execution::{ExecutionId, ExecutionState, QueryExecution};
pub use executor::{AbortHandle, ExecutionReport, ExecutorConfig, QueryExecutor};
pub use retention::{ArtifactOutcome, OutputArtifact, OutputRetention, RetainedArtifact};
pub use retry::FetchRetry;
pub use schema_store::{ColumnDef, SchemaEntry, SchemaStore};
pub use service::{
    ExecutionStatistics, ExecutionStatus, PageToken, QueryService, ResultColumn, ResultPage,
    ResultSet, ServiceError, ServiceErrorKind, ServiceFuture, ServiceState, Submission,
};
pub use session::{DiscoveryReport, InvestigationOutcome, InvestigationSession};
pub use template::{QueryRequest, RenderedQuery, SavedTemplate};
pub use throttling::PollThrottle;
pub use timestamp::UtcDateTime;
pub use validator::{validate, AcceptedQuery, Rejection, RejectionReason, ValidationVerdict};
