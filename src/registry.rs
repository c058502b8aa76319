//! In-memory registry of transactions awaiting (or holding) their result

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::protocol::{CallbackPayload, ProtocolContext};
use crate::types::{PendingRequest, TransactionRecord, TransactionStatus};

/// Thread-safe transaction store shared by the gateway and the executor.
///
/// Nothing is persisted; the registry lives as long as the service.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    records: Mutex<HashMap<String, TransactionRecord>>,
}

pub type SharedRegistry = Arc<TransactionRegistry>;

impl TransactionRegistry {
    pub fn new() -> SharedRegistry {
        Arc::new(Self::default())
    }

    /// Create (or overwrite) a pending record
    pub fn store(
        &self,
        transaction_id: &str,
        callback_uri: Option<String>,
        request: PendingRequest,
        context: ProtocolContext,
    ) {
        let record = TransactionRecord {
            transaction_id: transaction_id.to_string(),
            callback_uri,
            context,
            request,
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
            result: None,
        };
        if self
            .records
            .lock()
            .insert(transaction_id.to_string(), record)
            .is_some()
        {
            debug!("Overwrote existing record for transaction {}", transaction_id);
        }
    }

    /// Attach a result and mark the record completed.
    ///
    /// Returns false (and creates nothing) when the id is unknown.
    pub fn update(&self, transaction_id: &str, result: CallbackPayload) -> bool {
        let mut records = self.records.lock();
        match records.get_mut(transaction_id) {
            Some(record) => {
                record.result = Some(result);
                record.status = TransactionStatus::Completed;
                true
            }
            None => false,
        }
    }

    /// Take the result of a completed transaction, removing its record.
    ///
    /// Pending and unknown transactions both yield `None`.
    pub fn fetch_and_clear(&self, transaction_id: &str) -> Option<CallbackPayload> {
        let mut records = self.records.lock();
        let ready = records
            .get(transaction_id)
            .is_some_and(|r| r.status == TransactionStatus::Completed && r.result.is_some());
        if !ready {
            return None;
        }
        records.remove(transaction_id).and_then(|r| r.result)
    }

    /// Snapshot of a record
    pub fn get(&self, transaction_id: &str) -> Option<TransactionRecord> {
        self.records.lock().get(transaction_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Catalog, Descriptor, OnSearchMessage, OnSearchResponse};
    use crate::types::SearchCriteria;

    fn payload(tag: &str) -> CallbackPayload {
        CallbackPayload::OnSearch(OnSearchResponse {
            context: ProtocolContext {
                message_id: Some(tag.to_string()),
                ..Default::default()
            },
            message: OnSearchMessage {
                catalog: Catalog {
                    descriptor: Descriptor::named("test"),
                    providers: vec![],
                },
            },
        })
    }

    fn store_pending(reg: &TransactionRegistry, id: &str) {
        reg.store(
            id,
            Some("https://bap.example".to_string()),
            PendingRequest::Search(SearchCriteria::default()),
            ProtocolContext::default(),
        );
    }

    #[test]
    fn test_fetch_unknown_is_none() {
        let reg = TransactionRegistry::new();
        assert!(reg.fetch_and_clear("missing").is_none());
    }

    #[test]
    fn test_pending_is_not_returned_or_removed() {
        let reg = TransactionRegistry::new();
        store_pending(&reg, "t1");
        assert!(reg.fetch_and_clear("t1").is_none());
        assert_eq!(reg.get("t1").unwrap().status, TransactionStatus::Pending);
    }

    #[test]
    fn test_fetch_is_deliver_once() {
        let reg = TransactionRegistry::new();
        store_pending(&reg, "t1");
        assert!(reg.update("t1", payload("m1")));
        assert_eq!(reg.fetch_and_clear("t1"), Some(payload("m1")));
        assert!(reg.fetch_and_clear("t1").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_update_unknown_creates_nothing() {
        let reg = TransactionRegistry::new();
        assert!(!reg.update("ghost", payload("m")));
        assert!(reg.get("ghost").is_none());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn test_last_update_wins() {
        let reg = TransactionRegistry::new();
        store_pending(&reg, "t1");
        reg.update("t1", payload("first"));
        reg.update("t1", payload("second"));
        assert_eq!(reg.fetch_and_clear("t1"), Some(payload("second")));
    }

    #[test]
    fn test_store_overwrites() {
        let reg = TransactionRegistry::new();
        store_pending(&reg, "t1");
        reg.update("t1", payload("old"));
        store_pending(&reg, "t1");
        assert!(reg.fetch_and_clear("t1").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_store_update_fetch() {
        let reg = TransactionRegistry::new();
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let reg = reg.clone();
                tokio::spawn(async move {
                    let id = format!("t{}", i);
                    store_pending(&reg, &id);
                    reg.update(&id, payload(&id));
                    reg.fetch_and_clear(&id)
                })
            })
            .collect();

        for (i, result) in futures::future::join_all(handles).await.into_iter().enumerate() {
            assert_eq!(result.unwrap(), Some(payload(&format!("t{}", i))));
        }
        assert!(reg.is_empty());
    }
}
