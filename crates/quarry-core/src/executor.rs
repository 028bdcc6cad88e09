//! Submit, poll, fetch.
//!
//! The executor takes only [`AcceptedQuery`] values, so it can never send a
//! query the validator did not accept. One invocation:
//!
//! 1. submits the query (never retried),
//! 2. polls at a bounded interval until a terminal state or the deadline,
//! 3. fetches results only after `Succeeded`, retrying transient failures.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ExecutionError;
use crate::execution::{ExecutionId, ExecutionState, QueryExecution};
use crate::retry::FetchRetry;
use crate::service::{PageToken, QueryService, ResultPage, ResultSet, Submission};
use crate::template::QueryRequest;
use crate::throttling::PollThrottle;
use crate::validator::AcceptedQuery;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub workgroup: String,
    /// Pause between two status polls.
    pub poll_interval: Duration,
    /// Give up waiting for a terminal state after this long.
    pub poll_deadline: Duration,
    /// Status polls per second across all invocations sharing the executor.
    pub polls_per_second: u32,
    pub fetch_retry: FetchRetry,
    /// Rows requested per result page.
    pub page_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workgroup: String::from("primary"),
            poll_interval: Duration::from_secs(1),
            poll_deadline: Duration::from_secs(300),
            polls_per_second: 5,
            fetch_retry: FetchRetry::default(),
            page_size: 1000,
        }
    }
}

/// Outcome of an invocation that reached a terminal service state.
///
/// `result` is present exactly when the execution succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub execution: QueryExecution,
    pub result: Option<ResultSet>,
}

/// Operator-triggered abort signal, shareable across tasks.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn abort(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`AbortHandle::abort`] was called.
    pub async fn aborted(&self) {
        let mut receiver = self.sender.subscribe();
        if receiver.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct QueryExecutor {
    service: Arc<dyn QueryService>,
    config: ExecutorConfig,
    throttle: PollThrottle,
}

impl QueryExecutor {
    pub fn new(service: Arc<dyn QueryService>, config: ExecutorConfig) -> Self {
        let throttle = PollThrottle::per_second(config.polls_per_second);
        Self {
            service,
            config,
            throttle,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<dyn QueryService> {
        &self.service
    }

    /// Run one accepted query to completion.
    ///
    /// `Failed` and `Cancelled` service states are reported in the returned
    /// [`ExecutionReport`], not as errors.
    pub async fn execute(
        &self,
        query: &AcceptedQuery,
        request: &QueryRequest,
        abort: &AbortHandle,
    ) -> Result<ExecutionReport, ExecutionError> {
        let submission = Submission::new(query, request, &self.config.workgroup);
        let execution_id = self
            .service
            .submit(submission)
            .await
            .map_err(ExecutionError::Submission)?;
        info!(
            execution_id = %execution_id,
            database = request.database(),
            "query submitted"
        );

        let mut execution = QueryExecution::submitted(execution_id.clone());
        let waited = tokio::select! {
            biased;
            _ = abort.aborted() => None,
            outcome = self.wait_for_terminal(&mut execution) => Some(outcome),
        };
        match waited {
            Some(outcome) => outcome?,
            None => return Err(self.abandon(&execution_id).await),
        }

        info!(
            execution_id = %execution_id,
            state = %execution.state(),
            "execution reached terminal state"
        );
        if execution.state() != ExecutionState::Succeeded {
            return Ok(ExecutionReport {
                execution,
                result: None,
            });
        }

        let result = tokio::select! {
            biased;
            _ = abort.aborted() => {
                return Err(ExecutionError::Aborted {
                    execution_id: execution_id.clone(),
                    cancel_requested: false,
                });
            }
            result = self.fetch_all(&execution_id) => result?,
        };
        debug!(execution_id = %execution_id, rows = result.row_count(), "results fetched");

        Ok(ExecutionReport {
            execution,
            result: Some(result),
        })
    }

    async fn wait_for_terminal(&self, execution: &mut QueryExecution) -> Result<(), ExecutionError> {
        let started = Instant::now();
        let deadline = started + self.config.poll_deadline;

        loop {
            self.throttle.acquire().await;
            match self.service.poll(execution.id()).await {
                Ok(status) => {
                    let previous = execution.state();
                    if execution.observe(&status) {
                        debug!(
                            execution_id = %execution.id(),
                            from = %previous,
                            to = %execution.state(),
                            "execution state changed"
                        );
                    }
                    if execution.state().is_terminal() {
                        return Ok(());
                    }
                }
                Err(error) if error.retryable() => {
                    warn!(execution_id = %execution.id(), error = %error, "transient poll failure");
                }
                Err(source) => {
                    return Err(ExecutionError::Poll {
                        execution_id: execution.id().clone(),
                        source,
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let last_state = execution.state();
                execution.mark_timed_out();
                warn!(
                    execution_id = %execution.id(),
                    last_state = %last_state,
                    "poll deadline passed before a terminal state"
                );
                return Err(ExecutionError::PollTimeout {
                    execution_id: execution.id().clone(),
                    last_state,
                    waited_ms: now.duration_since(started).as_millis() as u64,
                    execution: Box::new(execution.clone()),
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn fetch_all(&self, execution_id: &ExecutionId) -> Result<ResultSet, ExecutionError> {
        let mut result = ResultSet::default();
        let mut token = None;
        let mut first = true;

        loop {
            let page = self.fetch_page(execution_id, token.take()).await?;
            if first {
                result.columns = page.columns;
                first = false;
            }
            result.rows.extend(page.rows);
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(result),
            }
        }
    }

    async fn fetch_page(
        &self,
        execution_id: &ExecutionId,
        token: Option<PageToken>,
    ) -> Result<ResultPage, ExecutionError> {
        self.config
            .fetch_retry
            .run(execution_id, || {
                self.service
                    .fetch(execution_id, token.clone(), self.config.page_size)
            })
            .await
    }

    async fn abandon(&self, execution_id: &ExecutionId) -> ExecutionError {
        warn!(execution_id = %execution_id, "abort requested; cancelling execution");
        let cancel_requested = match self.service.cancel(execution_id).await {
            Ok(()) => true,
            Err(error) => {
                warn!(execution_id = %execution_id, error = %error, "cancel request failed");
                false
            }
        };
        ExecutionError::Aborted {
            execution_id: execution_id.clone(),
            cancel_requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::service::{
        ExecutionStatus, ResultColumn, ServiceError, ServiceFuture, ServiceState,
    };
    use crate::validator::validate;

    #[derive(Default)]
    struct FakeService {
        submit_error: Option<ServiceError>,
        polls: Mutex<VecDeque<Result<ExecutionStatus, ServiceError>>>,
        fetches: Mutex<VecDeque<Result<ResultPage, ServiceError>>>,
        submit_calls: AtomicUsize,
        poll_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
        cancel_calls: AtomicUsize,
    }

    impl FakeService {
        fn with_polls(polls: Vec<Result<ExecutionStatus, ServiceError>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                ..Self::default()
            }
        }

        fn with_fetches(self, fetches: Vec<Result<ResultPage, ServiceError>>) -> Self {
            *self.fetches.lock().expect("lock") = fetches.into();
            self
        }
    }

    impl QueryService for FakeService {
        fn submit<'a>(&'a self, _submission: Submission) -> ServiceFuture<'a, ExecutionId> {
            Box::pin(async move {
                self.submit_calls.fetch_add(1, Ordering::SeqCst);
                match &self.submit_error {
                    Some(error) => Err(error.clone()),
                    None => Ok(ExecutionId::new("exec-1")),
                }
            })
        }

        fn poll<'a>(&'a self, _execution_id: &'a ExecutionId) -> ServiceFuture<'a, ExecutionStatus> {
            Box::pin(async move {
                self.poll_calls.fetch_add(1, Ordering::SeqCst);
                self.polls
                    .lock()
                    .expect("lock")
                    .pop_front()
                    .unwrap_or(Ok(ExecutionStatus::new(ServiceState::Running)))
            })
        }

        fn fetch<'a>(
            &'a self,
            _execution_id: &'a ExecutionId,
            _page_token: Option<PageToken>,
            _max_results: usize,
        ) -> ServiceFuture<'a, ResultPage> {
            Box::pin(async move {
                self.fetch_calls.fetch_add(1, Ordering::SeqCst);
                self.fetches
                    .lock()
                    .expect("lock")
                    .pop_front()
                    .unwrap_or_else(|| Ok(ResultPage::default()))
            })
        }

        fn cancel<'a>(&'a self, _execution_id: &'a ExecutionId) -> ServiceFuture<'a, ()> {
            Box::pin(async move {
                self.cancel_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            poll_interval: Duration::from_millis(1),
            poll_deadline: Duration::from_secs(5),
            polls_per_second: 10_000,
            fetch_retry: FetchRetry {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            ..ExecutorConfig::default()
        }
    }

    fn accepted() -> (AcceptedQuery, QueryRequest) {
        let request = QueryRequest::new(
            "SELECT account_id FROM error_logs WHERE dt = '$d'",
            "telemetry",
            "s3://quarry-results/query-results/",
        )
        .with_param("d", "2026-01-15");
        let query = validate(request.render().expect("render"))
            .into_result()
            .expect("accepted");
        (query, request)
    }

    fn page(rows: &[&str], next: Option<&str>) -> ResultPage {
        ResultPage {
            columns: vec![ResultColumn {
                name: String::from("account_id"),
                r#type: String::from("varchar"),
            }],
            rows: rows.iter().map(|row| vec![json!(row)]).collect(),
            next_token: next.map(|token| PageToken(token.to_string())),
        }
    }

    fn running() -> Result<ExecutionStatus, ServiceError> {
        Ok(ExecutionStatus::new(ServiceState::Running))
    }

    #[tokio::test]
    async fn polls_until_succeeded_then_fetches_once() {
        let service = Arc::new(
            FakeService::with_polls(vec![
                running(),
                running(),
                running(),
                Ok(ExecutionStatus::new(ServiceState::Succeeded)),
            ])
            .with_fetches(vec![Ok(page(&["acct_042"], None))]),
        );
        let executor = QueryExecutor::new(service.clone(), fast_config());
        let (query, request) = accepted();

        let report = executor
            .execute(&query, &request, &AbortHandle::new())
            .await
            .expect("execute");

        assert_eq!(report.execution.state(), ExecutionState::Succeeded);
        assert_eq!(report.result.expect("rows").row_count(), 1);
        assert_eq!(service.poll_calls.load(Ordering::SeqCst), 4);
        assert_eq!(service.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn follows_page_tokens() {
        let service = Arc::new(
            FakeService::with_polls(vec![Ok(ExecutionStatus::new(ServiceState::Succeeded))])
                .with_fetches(vec![
                    Ok(page(&["a", "b"], Some("p2"))),
                    Ok(page(&["c"], None)),
                ]),
        );
        let executor = QueryExecutor::new(service.clone(), fast_config());
        let (query, request) = accepted();

        let report = executor
            .execute(&query, &request, &AbortHandle::new())
            .await
            .expect("execute");

        let result = report.result.expect("rows");
        assert_eq!(result.row_count(), 3);
        assert_eq!(result.columns.len(), 1);
    }

    #[tokio::test]
    async fn transient_fetch_failures_are_retried() {
        let service = Arc::new(
            FakeService::with_polls(vec![Ok(ExecutionStatus::new(ServiceState::Succeeded))])
                .with_fetches(vec![
                    Err(ServiceError::unavailable("s3 read timed out")),
                    Err(ServiceError::throttled("slow down")),
                    Ok(page(&["acct_042"], None)),
                ]),
        );
        let executor = QueryExecutor::new(service.clone(), fast_config());
        let (query, request) = accepted();

        let report = executor
            .execute(&query, &request, &AbortHandle::new())
            .await
            .expect("execute");

        assert_eq!(report.result.expect("rows").row_count(), 1);
        assert_eq!(service.fetch_calls.load(Ordering::SeqCst), 3);
        assert_eq!(service.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_gives_up_after_retry_budget() {
        let service = Arc::new(
            FakeService::with_polls(vec![Ok(ExecutionStatus::new(ServiceState::Succeeded))])
                .with_fetches(
                    (0..10)
                        .map(|_| Err(ServiceError::unavailable("s3 read timed out")))
                        .collect(),
                ),
        );
        let executor = QueryExecutor::new(service.clone(), fast_config());
        let (query, request) = accepted();

        let error = executor
            .execute(&query, &request, &AbortHandle::new())
            .await
            .expect_err("fetch exhausted");

        assert!(matches!(error, ExecutionError::Fetch { attempts: 4, .. }));
        assert_eq!(service.fetch_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn submission_failure_is_not_retried() {
        let service = Arc::new(FakeService {
            submit_error: Some(ServiceError::unavailable("endpoint unreachable")),
            ..FakeService::default()
        });
        let executor = QueryExecutor::new(service.clone(), fast_config());
        let (query, request) = accepted();

        let error = executor
            .execute(&query, &request, &AbortHandle::new())
            .await
            .expect_err("submission fails");

        assert!(matches!(error, ExecutionError::Submission(_)));
        assert_eq!(service.submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.poll_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_execution_is_reported_without_fetching() {
        let service = Arc::new(FakeService::with_polls(vec![Ok(ExecutionStatus::failed(
            "SYNTAX_ERROR: Column 'x' cannot be resolved",
        ))]));
        let executor = QueryExecutor::new(service.clone(), fast_config());
        let (query, request) = accepted();

        let report = executor
            .execute(&query, &request, &AbortHandle::new())
            .await
            .expect("terminal");

        assert_eq!(report.execution.state(), ExecutionState::Failed);
        assert_eq!(
            report.execution.failure_reason(),
            Some("SYNTAX_ERROR: Column 'x' cannot be resolved")
        );
        assert!(report.result.is_none());
        assert_eq!(service.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_poll_errors_keep_polling() {
        let service = Arc::new(
            FakeService::with_polls(vec![
                Err(ServiceError::throttled("rate exceeded")),
                Ok(ExecutionStatus::new(ServiceState::Succeeded)),
            ])
            .with_fetches(vec![Ok(page(&[], None))]),
        );
        let executor = QueryExecutor::new(service.clone(), fast_config());
        let (query, request) = accepted();

        executor
            .execute(&query, &request, &AbortHandle::new())
            .await
            .expect("execute");
        assert_eq!(service.poll_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deadline_yields_timeout_with_execution_id() {
        let service = Arc::new(FakeService::default());
        let executor = QueryExecutor::new(
            service.clone(),
            ExecutorConfig {
                poll_interval: Duration::from_millis(5),
                poll_deadline: Duration::from_millis(40),
                ..fast_config()
            },
        );
        let (query, request) = accepted();

        let error = executor
            .execute(&query, &request, &AbortHandle::new())
            .await
            .expect_err("times out");

        match error {
            ExecutionError::PollTimeout {
                execution_id,
                last_state,
                execution,
                ..
            } => {
                assert_eq!(execution_id.as_str(), "exec-1");
                assert_eq!(last_state, ExecutionState::Running);
                assert_eq!(execution.state(), ExecutionState::TimedOut);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(service.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn abort_requests_cancellation() {
        let service = Arc::new(FakeService::default());
        let executor = QueryExecutor::new(service.clone(), fast_config());
        let (query, request) = accepted();
        let abort = AbortHandle::new();

        let trigger = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.abort();
        });

        let error = executor
            .execute(&query, &request, &abort)
            .await
            .expect_err("aborted");

        assert!(matches!(
            error,
            ExecutionError::Aborted {
                cancel_requested: true,
                ..
            }
        ));
        assert_eq!(service.cancel_calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.fetch_calls.load(Ordering::SeqCst), 0);
    }
}
