//! Protocol gateway: accepts intents, records them, acknowledges, schedules work

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CallbackAuth, Config};
use crate::dispatcher::{
    CallbackDispatcher, MetadataTokenProvider, StaticTokenProvider, TokenProvider,
};
use crate::executor::{Job, TaskExecutor, TaskOutcome};
use crate::protocol::{
    AckResponse, CallbackPayload, CallbackSource, Intent, SearchRequest, SelectRequest,
};
use crate::query_parser;
use crate::registry::{SharedRegistry, TransactionRegistry};
use crate::response_builder::ResponseBuilder;
use crate::search_engine::SharedSearchEngine;
use crate::types::{Action, PendingRequest, SearchCriteria};

/// Synchronous rejections of inbound requests
#[derive(Debug, Error, PartialEq)]
pub enum GatewayError {
    #[error("Product ID not found in select request.")]
    MissingItemId,
}

/// ACK plus a handle on the background task
pub struct Accepted {
    pub ack: AckResponse,
    pub task: JoinHandle<TaskOutcome>,
}

pub struct Gateway {
    builder: ResponseBuilder,
    executor: TaskExecutor,
    search_registry: SharedRegistry,
    select_registry: SharedRegistry,
    callback_source: CallbackSource,
}

impl Gateway {
    pub fn new(
        builder: ResponseBuilder,
        executor: TaskExecutor,
        search_registry: SharedRegistry,
        select_registry: SharedRegistry,
        callback_source: CallbackSource,
    ) -> Self {
        Self {
            builder,
            executor,
            search_registry,
            select_registry,
            callback_source,
        }
    }

    /// Wire registries, executor and dispatcher from configuration
    pub fn assemble(config: &Config, engine: SharedSearchEngine) -> Result<Arc<Gateway>> {
        let tokens: Option<Arc<dyn TokenProvider>> = match &config.callback_auth {
            CallbackAuth::None => None,
            CallbackAuth::Static { token } => {
                Some(Arc::new(StaticTokenProvider::new(token.clone())))
            }
            CallbackAuth::Metadata { url } => Some(Arc::new(MetadataTokenProvider::new(
                url.clone(),
                config.callback_timeout,
            )?)),
        };
        let dispatcher = CallbackDispatcher::new(config.callback_timeout, tokens)?;
        let builder = ResponseBuilder::new(config.identity.clone(), config.branding.clone());
        let search_registry = TransactionRegistry::new();
        let select_registry = TransactionRegistry::new();
        let executor = TaskExecutor::new(
            engine,
            builder.clone(),
            dispatcher,
            search_registry.clone(),
            select_registry.clone(),
            config.executor,
        );
        Ok(Arc::new(Self::new(
            builder,
            executor,
            search_registry,
            select_registry,
            config.callback_source,
        )))
    }

    pub fn accept_search(&self, req: SearchRequest) -> Accepted {
        let context = req.context;
        let (transaction_id, message_id) = ids_for(
            context.transaction_id.as_deref(),
            context.message_id.as_deref(),
        );
        let callback_uri = context.callback_uri(self.callback_source);
        let criteria = extract_search_criteria(req.message.intent.as_ref());
        info!("Extracted search criteria for {}: {:?}", transaction_id, criteria);

        // The record must exist before the task can finish and update it.
        let request = PendingRequest::Search(criteria);
        debug!("Storing pending search {} before ACK", transaction_id);
        self.search_registry.store(
            &transaction_id,
            callback_uri.clone(),
            request.clone(),
            context.clone(),
        );

        let ack = self
            .builder
            .ack(&context, Action::Search, &transaction_id, &message_id);
        let task = self.executor.spawn(Job {
            transaction_id,
            message_id,
            context,
            callback_uri,
            request,
        });
        Accepted { ack, task }
    }

    pub fn accept_select(&self, req: SelectRequest) -> Result<Accepted, GatewayError> {
        let item_id = req.item_id().ok_or(GatewayError::MissingItemId)?.to_string();
        let context = req.context;
        let (transaction_id, message_id) = ids_for(
            context.transaction_id.as_deref(),
            context.message_id.as_deref(),
        );
        let callback_uri = context.callback_uri(self.callback_source);
        info!("Select for item '{}' in transaction {}", item_id, transaction_id);

        let request = PendingRequest::Select { item_id };
        self.select_registry.store(
            &transaction_id,
            callback_uri.clone(),
            request.clone(),
            context.clone(),
        );

        let ack = self
            .builder
            .ack(&context, Action::Select, &transaction_id, &message_id);
        let task = self.executor.spawn(Job {
            transaction_id,
            message_id,
            context,
            callback_uri,
            request,
        });
        Ok(Accepted { ack, task })
    }

    /// Deliver-once read of a completed result
    pub fn poll(&self, action: Action, transaction_id: &str) -> Option<CallbackPayload> {
        match action {
            Action::Search | Action::OnSearch => {
                self.search_registry.fetch_and_clear(transaction_id)
            }
            Action::Select | Action::OnSelect => {
                self.select_registry.fetch_and_clear(transaction_id)
            }
        }
    }
}

fn ids_for(transaction_id: Option<&str>, message_id: Option<&str>) -> (String, String) {
    let pick = |id: Option<&str>| {
        id.map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    };
    (pick(transaction_id), pick(message_id))
}

/// Fold every supported intent field into search criteria
pub fn extract_search_criteria(intent: Option<&Intent>) -> SearchCriteria {
    let Some(intent) = intent else {
        return SearchCriteria::default();
    };

    let mut criteria = query_parser::parse_opt(intent.query.as_deref());

    if let Some(item) = &intent.item {
        if let Some(descriptor) = &item.descriptor {
            let name = descriptor.name.as_deref().map(str::trim);
            if let Some(name) = name.filter(|n| !n.is_empty()) {
                criteria.keywords.push(name.to_string());
            }
        }
        let category = item.category_id.as_deref().map(str::trim);
        if let Some(category) = category.filter(|c| !c.is_empty()) {
            criteria
                .soft_hints
                .push(("category".to_string(), category.to_string()));
        }
        for group in item.descriptor.iter().flat_map(|d| d.tags.iter()) {
            let Some(code) = group.code.as_deref() else {
                continue;
            };
            if !matches!(code, "color" | "type" | "brand") {
                continue;
            }
            let value = group
                .list
                .iter()
                .find(|tag| tag.code.as_deref() == Some("name"))
                .and_then(|tag| tag.value.as_ref())
                .and_then(scalar_text);
            if let Some(value) = value {
                criteria.soft_hints.push((code.to_string(), value));
            }
        }
    }

    if let Some(payment) = &intent.payment {
        let min = payment
            .min_amount
            .as_ref()
            .and_then(|v| parse_amount("min_amount", v));
        let max = payment
            .max_amount
            .as_ref()
            .and_then(|v| parse_amount("max_amount", v));
        criteria.narrow_price(min, max);
    }

    criteria
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn parse_amount(field: &str, value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Null => return None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Some(v),
        _ => {
            warn!("Invalid {} value: {}. Skipping price filter.", field, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::search_engine::test_support::sample_store;
    use crate::search_engine::SearchEngine;
    use crate::types::TransactionStatus;
    use serde_json::json;

    fn intent(v: Value) -> Intent {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_query_and_item_fields() {
        let i = intent(json!({
            "query": "t-shirt, price > 500",
            "item": {
                "category_id": "Topwear",
                "descriptor": {
                    "name": "graphic tee",
                    "tags": [
                        {"code": "color", "list": [{"code": "name", "value": "red"}]},
                        {"code": "brand", "list": [
                            {"code": "id", "value": "x"},
                            {"code": "name", "value": "Nike"}
                        ]},
                        {"code": "fabric", "list": [{"code": "name", "value": "cotton"}]}
                    ]
                }
            }
        }));
        let c = extract_search_criteria(Some(&i));
        assert_eq!(c.keywords, vec!["t-shirt", "graphic tee"]);
        assert_eq!(c.min_price, Some(500.0));
        assert_eq!(
            c.soft_hints,
            vec![
                ("category".to_string(), "Topwear".to_string()),
                ("color".to_string(), "red".to_string()),
                ("brand".to_string(), "Nike".to_string()),
            ]
        );
    }

    #[test]
    fn test_payment_narrows_query_range() {
        let i = intent(json!({
            "query": "shoes, price > 100, price < 5000",
            "payment": {"min_amount": "1000", "max_amount": 3000}
        }));
        let c = extract_search_criteria(Some(&i));
        assert_eq!((c.min_price, c.max_price), (Some(1000.0), Some(3000.0)));
    }

    #[test]
    fn test_payment_conflict_drops_range() {
        let i = intent(json!({
            "query": "shoes, price < 500",
            "payment": {"min_amount": 800}
        }));
        let c = extract_search_criteria(Some(&i));
        assert_eq!((c.min_price, c.max_price), (None, None));
    }

    #[test]
    fn test_invalid_amount_is_ignored() {
        let i = intent(json!({"payment": {"min_amount": "cheap", "max_amount": null}}));
        let c = extract_search_criteria(Some(&i));
        assert!(!c.has_price_filter());
    }

    #[test]
    fn test_no_intent() {
        assert_eq!(extract_search_criteria(None), SearchCriteria::default());
    }

    fn gateway() -> Arc<Gateway> {
        let config = Config::from_lookup(|_| None).unwrap();
        let engine = SearchEngine::new(
            Arc::new(HashingEmbedder::default()),
            Arc::new(sample_store()),
        );
        Gateway::assemble(&config, engine).unwrap()
    }

    #[tokio::test]
    async fn test_select_without_items_creates_no_record() {
        let gateway = gateway();
        let req: SelectRequest = serde_json::from_value(json!({
            "context": {"transaction_id": "txn-empty"},
            "message": {"order": {"items": []}}
        }))
        .unwrap();

        let err = gateway.accept_select(req).err();
        assert_eq!(err, Some(GatewayError::MissingItemId));
        assert_eq!(gateway.select_registry.len(), 0);
        assert!(gateway.select_registry.get("txn-empty").is_none());
        assert_eq!(gateway.search_registry.len(), 0);
    }

    #[tokio::test]
    async fn test_accept_stores_pending_record_with_callback() {
        let gateway = gateway();
        let req: SelectRequest = serde_json::from_value(json!({
            "context": {
                "transaction_id": "txn-sel",
                "bap_uri": "https://bap.example/beckn",
                "bpp_uri": "https://ps.example/receiver"
            },
            "message": {"order": {"items": [{"id": "missing"}]}}
        }))
        .unwrap();

        let accepted = gateway.accept_select(req).unwrap();
        let record = gateway.select_registry.get("txn-sel").unwrap();
        assert_eq!(record.callback_uri.as_deref(), Some("https://ps.example/caller"));
        assert_eq!(record.status, TransactionStatus::Pending);
        accepted.task.await.unwrap();
    }

    #[test]
    fn test_ids_generated_when_missing() {
        let (t, m) = ids_for(Some("txn"), Some(" "));
        assert_eq!(t, "txn");
        assert!(Uuid::parse_str(&m).is_ok());
    }
}
