//! Core type definitions for catalog search and transaction tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::protocol::{CallbackPayload, ProtocolContext};

/// Structured constraints derived from a search intent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub keywords: Vec<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Categorical hints folded into the semantic query, never enforced exactly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub soft_hints: Vec<(String, String)>,
}

impl SearchCriteria {
    /// Narrow the price range with additional bounds.
    ///
    /// A lower bound only ever rises and an upper bound only ever falls. If the
    /// resulting range is empty both bounds are dropped.
    pub fn narrow_price(&mut self, min: Option<f64>, max: Option<f64>) {
        if let Some(lo) = min {
            self.min_price = Some(self.min_price.map_or(lo, |cur| cur.max(lo)));
        }
        if let Some(hi) = max {
            self.max_price = Some(self.max_price.map_or(hi, |cur| cur.min(hi)));
        }
        if let (Some(lo), Some(hi)) = (self.min_price, self.max_price) {
            if lo >= hi {
                self.min_price = None;
                self.max_price = None;
            }
        }
    }

    /// Text handed to the embedder: keywords in order, then soft hints
    pub fn semantic_query(&self) -> String {
        let mut text = self.keywords.join(" ");
        for (key, value) in &self.soft_hints {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(key);
            text.push_str(": ");
            text.push_str(value);
        }
        text.trim().to_string()
    }

    pub fn has_price_filter(&self) -> bool {
        self.min_price.is_some() || self.max_price.is_some()
    }
}

/// Read-only projection of a stored catalog record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub price: f64,
    pub currency: String,
    pub master_category: Option<String>,
    pub sub_category: Option<String>,
    pub article_type: Option<String>,
    pub age_group: Option<String>,
    pub gender: Option<String>,
    pub color: Option<String>,
    pub usage: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub image_url: Option<String>,
    pub distance: f64, // lower = more relevant
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            brand: None,
            price,
            currency: DEFAULT_CURRENCY.to_string(),
            master_category: None,
            sub_category: None,
            article_type: None,
            age_group: None,
            gender: None,
            color: None,
            usage: None,
            attributes: BTreeMap::new(),
            image_url: None,
            distance: 0.0,
        }
    }

    /// Text used to index an entry in the in-memory store
    pub fn index_text(&self) -> String {
        [
            Some(self.name.as_str()),
            self.description.as_deref(),
            self.brand.as_deref(),
            self.article_type.as_deref(),
            self.color.as_deref(),
            self.usage.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }
}

pub const DEFAULT_CURRENCY: &str = "INR";

/// Which protocol action a transaction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Search,
    Select,
    OnSearch,
    OnSelect,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Search => "search",
            Action::Select => "select",
            Action::OnSearch => "on_search",
            Action::OnSelect => "on_select",
        }
    }

    /// The callback action answering this request action
    pub fn callback(&self) -> Action {
        match self {
            Action::Search | Action::OnSearch => Action::OnSearch,
            Action::Select | Action::OnSelect => Action::OnSelect,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked for
#[derive(Debug, Clone, PartialEq)]
pub enum PendingRequest {
    Search(SearchCriteria),
    Select { item_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
}

/// Registry entry for one in-flight transaction
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub callback_uri: Option<String>,
    pub context: ProtocolContext,
    pub request: PendingRequest,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub result: Option<CallbackPayload>,
}
