//! Background execution of accepted transactions, one tokio task each

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{CallbackDispatcher, DeliveryError};
use crate::protocol::{CallbackPayload, ProtocolContext};
use crate::registry::SharedRegistry;
use crate::response_builder::ResponseBuilder;
use crate::search_engine::SharedSearchEngine;
use crate::types::{Action, PendingRequest};

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 64;
pub const DEFAULT_TOP_N: usize = 10;

/// Work handed over by the gateway once the pending record exists
#[derive(Debug, Clone)]
pub struct Job {
    pub transaction_id: String,
    pub message_id: String,
    pub context: ProtocolContext,
    pub callback_uri: Option<String>,
    pub request: PendingRequest,
}

impl Job {
    pub fn action(&self) -> Action {
        match self.request {
            PendingRequest::Search(_) => Action::Search,
            PendingRequest::Select { .. } => Action::Select,
        }
    }
}

/// Lifecycle phases, logged as each transition happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Dispatched,
    SearchComplete,
    SearchFailed,
    Delivered,
    DeliveryFailed,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Dispatched => "dispatched",
            TaskPhase::SearchComplete => "search-complete",
            TaskPhase::SearchFailed => "search-failed",
            TaskPhase::Delivered => "delivered",
            TaskPhase::DeliveryFailed => "delivery-failed",
        }
    }
}

/// How a task ended
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Delivered { target: String },
    DeliveryFailed { kind: &'static str },
    SearchFailed { reason: String },
    Panicked { message: String },
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("product '{0}' not found")]
    ItemNotFound(String),

    #[error("executor is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub max_concurrent_tasks: usize,
    pub top_n: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// Spawns transaction tasks onto the tokio runtime.
///
/// At most `max_concurrent_tasks` run at once; the rest wait for a permit.
#[derive(Clone)]
pub struct TaskExecutor {
    engine: SharedSearchEngine,
    builder: ResponseBuilder,
    dispatcher: CallbackDispatcher,
    search_registry: SharedRegistry,
    select_registry: SharedRegistry,
    permits: Arc<Semaphore>,
    top_n: usize,
}

impl TaskExecutor {
    pub fn new(
        engine: SharedSearchEngine,
        builder: ResponseBuilder,
        dispatcher: CallbackDispatcher,
        search_registry: SharedRegistry,
        select_registry: SharedRegistry,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            engine,
            builder,
            dispatcher,
            search_registry,
            select_registry,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_tasks.max(1))),
            top_n: settings.top_n.max(1),
        }
    }

    /// Start the task for `job`. The caller must have stored the pending
    /// record first.
    pub fn spawn(&self, job: Job) -> JoinHandle<TaskOutcome> {
        let exec = self.clone();
        info!(
            "Task for transaction {} ({}) {}",
            job.transaction_id,
            job.action(),
            TaskPhase::Dispatched.as_str()
        );
        tokio::spawn(async move {
            let transaction_id = job.transaction_id.clone();
            let _permit = match exec.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!(
                        "Task for transaction {} dropped: {}",
                        transaction_id,
                        TaskError::Closed
                    );
                    return TaskOutcome::SearchFailed {
                        reason: TaskError::Closed.to_string(),
                    };
                }
            };

            match AssertUnwindSafe(exec.run(job)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Task for transaction {} panicked: {}", transaction_id, message);
                    TaskOutcome::Panicked { message }
                }
            }
        })
    }

    async fn run(&self, job: Job) -> TaskOutcome {
        let transaction_id = job.transaction_id.as_str();

        let (payload, registry) = match self.execute(&job).await {
            Ok(done) => done,
            Err(e) => {
                warn!(
                    "Transaction {} {}: {}",
                    transaction_id,
                    TaskPhase::SearchFailed.as_str(),
                    e
                );
                return TaskOutcome::SearchFailed {
                    reason: e.to_string(),
                };
            }
        };
        info!("Transaction {} {}", transaction_id, TaskPhase::SearchComplete.as_str());

        // Record before delivering so a poll can always see what was sent.
        if !registry.update(transaction_id, payload.clone()) {
            warn!(
                "Transaction {} was not registered; result will only be delivered by callback",
                transaction_id
            );
        }

        match self.dispatcher.deliver(job.callback_uri.as_deref(), &payload).await {
            Ok(receipt) => {
                info!(
                    "Transaction {} {} to {} (status {})",
                    transaction_id,
                    TaskPhase::Delivered.as_str(),
                    receipt.target,
                    receipt.status
                );
                TaskOutcome::Delivered {
                    target: receipt.target,
                }
            }
            Err(e) => {
                match &e {
                    DeliveryError::MissingEndpoint => warn!(
                        "Transaction {} {}: no callback URI; result available by poll",
                        transaction_id,
                        TaskPhase::DeliveryFailed.as_str()
                    ),
                    _ => error!(
                        "Transaction {} {} ({}): {}",
                        transaction_id,
                        TaskPhase::DeliveryFailed.as_str(),
                        e.kind(),
                        e
                    ),
                }
                TaskOutcome::DeliveryFailed { kind: e.kind() }
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<(CallbackPayload, &SharedRegistry), TaskError> {
        match &job.request {
            PendingRequest::Search(criteria) => {
                debug!("Searching for transaction {}: {:?}", job.transaction_id, criteria);
                let entries = self.engine.search(criteria, self.top_n).await;
                let response = self.builder.search_response(
                    &entries,
                    &job.transaction_id,
                    &job.message_id,
                    &job.context,
                );
                Ok((CallbackPayload::OnSearch(response), &self.search_registry))
            }
            PendingRequest::Select { item_id } => {
                let entry = self
                    .engine
                    .find_item(item_id)
                    .await
                    .ok_or_else(|| TaskError::ItemNotFound(item_id.clone()))?;
                let response = self.builder.select_response(
                    &entry,
                    &job.transaction_id,
                    &job.message_id,
                    &job.context,
                );
                Ok((CallbackPayload::OnSelect(response), &self.select_registry))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::test_support::capture_server;
    use crate::dispatcher::DEFAULT_CALLBACK_TIMEOUT;
    use crate::embedding::HashingEmbedder;
    use crate::query_parser::parse;
    use crate::registry::TransactionRegistry;
    use crate::search_engine::test_support::{sample_store, FailingEmbedder};
    use crate::search_engine::SearchEngine;
    use crate::types::TransactionStatus;
    use axum::http::StatusCode;

    struct Fixture {
        executor: TaskExecutor,
        search_registry: SharedRegistry,
        select_registry: SharedRegistry,
    }

    fn fixture(engine: SharedSearchEngine) -> Fixture {
        let search_registry = TransactionRegistry::new();
        let select_registry = TransactionRegistry::new();
        let executor = TaskExecutor::new(
            engine,
            ResponseBuilder::default(),
            CallbackDispatcher::new(DEFAULT_CALLBACK_TIMEOUT, None).unwrap(),
            search_registry.clone(),
            select_registry.clone(),
            ExecutorSettings {
                max_concurrent_tasks: 2,
                top_n: 3,
            },
        );
        Fixture {
            executor,
            search_registry,
            select_registry,
        }
    }

    fn default_engine() -> SharedSearchEngine {
        SearchEngine::new(Arc::new(HashingEmbedder::default()), Arc::new(sample_store()))
    }

    fn job(id: &str, callback: Option<String>, request: PendingRequest) -> Job {
        Job {
            transaction_id: id.to_string(),
            message_id: format!("{}-msg", id),
            context: ProtocolContext::default(),
            callback_uri: callback,
            request,
        }
    }

    #[tokio::test]
    async fn test_search_records_then_delivers() {
        let f = fixture(default_engine());
        let (base, mut rx) = capture_server(StatusCode::OK).await;
        let request = PendingRequest::Search(parse("red shirt"));
        let ctx = ProtocolContext::default();
        f.search_registry.store("t1", Some(base.clone()), request.clone(), ctx);

        let outcome = f.executor.spawn(job("t1", Some(base), request)).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Delivered { .. }));

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.path, "/bap/on_search");
        assert_eq!(seen.body["context"]["action"], "on_search");
        assert_eq!(seen.body["context"]["message_id"], "t1-msg");

        let record = f.search_registry.get("t1").unwrap();
        assert_eq!(record.status, TransactionStatus::Completed);
        assert!(f.search_registry.fetch_and_clear("t1").is_some());
    }

    #[tokio::test]
    async fn test_embedding_failure_still_completes_with_empty_catalog() {
        let engine = SearchEngine::new(Arc::new(FailingEmbedder), Arc::new(sample_store()));
        let f = fixture(engine);
        let request = PendingRequest::Search(parse("anything"));
        f.search_registry.store("t2", None, request.clone(), ProtocolContext::default());

        let outcome = f.executor.spawn(job("t2", None, request)).await.unwrap();
        assert_eq!(outcome, TaskOutcome::DeliveryFailed { kind: "missing_endpoint" });

        match f.search_registry.fetch_and_clear("t2") {
            Some(CallbackPayload::OnSearch(r)) => assert_eq!(r.items().count(), 0),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_select_goes_to_select_registry() {
        let f = fixture(default_engine());
        let request = PendingRequest::Select {
            item_id: "P2".to_string(),
        };
        f.select_registry.store("t3", None, request.clone(), ProtocolContext::default());

        f.executor.spawn(job("t3", None, request)).await.unwrap();
        assert!(f.search_registry.fetch_and_clear("t3").is_none());
        match f.select_registry.fetch_and_clear("t3") {
            Some(CallbackPayload::OnSelect(r)) => {
                assert_eq!(r.message.order.items[0].id, "P2");
                assert_eq!(r.message.order.quote.price.value, "1499.00");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_select_item_leaves_record_pending() {
        let f = fixture(default_engine());
        let request = PendingRequest::Select {
            item_id: "missing".to_string(),
        };
        f.select_registry.store("t4", None, request.clone(), ProtocolContext::default());

        let outcome = f.executor.spawn(job("t4", None, request)).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::SearchFailed { .. }));
        assert_eq!(f.select_registry.get("t4").unwrap().status, TransactionStatus::Pending);
        assert!(f.select_registry.fetch_and_clear("t4").is_none());
    }

    #[tokio::test]
    async fn test_rejected_callback_keeps_result_for_poll() {
        let f = fixture(default_engine());
        let (base, _rx) = capture_server(StatusCode::BAD_GATEWAY).await;
        let request = PendingRequest::Search(parse("jeans"));
        let ctx = ProtocolContext::default();
        f.search_registry.store("t5", Some(base.clone()), request.clone(), ctx);

        let outcome = f.executor.spawn(job("t5", Some(base), request)).await.unwrap();
        assert_eq!(outcome, TaskOutcome::DeliveryFailed { kind: "rejected" });
        assert!(f.search_registry.fetch_and_clear("t5").is_some());
    }

    #[tokio::test]
    async fn test_many_tasks_with_small_permit_pool() {
        let f = fixture(default_engine());
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let id = format!("bulk-{}", i);
                let request = PendingRequest::Search(parse("shoes"));
                f.search_registry.store(&id, None, request.clone(), ProtocolContext::default());
                f.executor.spawn(job(&id, None, request))
            })
            .collect();

        for outcome in futures::future::join_all(handles).await {
            assert_eq!(outcome.unwrap(), TaskOutcome::DeliveryFailed { kind: "missing_endpoint" });
        }
        for i in 0..10 {
            assert!(f.search_registry.fetch_and_clear(&format!("bulk-{}", i)).is_some());
        }
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"bang".to_string()), "bang");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
