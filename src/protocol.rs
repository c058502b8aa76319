//! Wire structures for the discovery protocol: request intents, ACKs and callbacks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::types::Action;

pub const DEFAULT_VERSION: &str = "1.2.0";
pub const DEFAULT_DOMAIN: &str = "e-commerce";
pub const DEFAULT_COUNTRY: &str = "IND";
pub const DEFAULT_CITY: &str = "std:080";

/// Caller-defined envelope.
///
/// Known fields are named; everything else the caller sends is kept in
/// `extra` and written back out unchanged. A known key holding a structured
/// value (e.g. `"city": {"code": ...}`) also stays in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct ProtocolContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bap_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bap_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpp_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Map<String, Value>> for ProtocolContext {
    fn from(mut map: Map<String, Value>) -> Self {
        Self {
            domain: take_text(&mut map, "domain"),
            country: take_text(&mut map, "country"),
            city: take_text(&mut map, "city"),
            action: take_text(&mut map, "action"),
            version: take_text(&mut map, "version"),
            core_version: take_text(&mut map, "core_version"),
            bap_id: take_text(&mut map, "bap_id"),
            bap_uri: take_text(&mut map, "bap_uri"),
            bpp_id: take_text(&mut map, "bpp_id"),
            bpp_uri: take_text(&mut map, "bpp_uri"),
            transaction_id: take_text(&mut map, "transaction_id"),
            message_id: take_text(&mut map, "message_id"),
            timestamp: take_text(&mut map, "timestamp"),
            extra: map,
        }
    }
}

/// Lift a scalar out of the bag as text; structured values are left in place
fn take_text(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    let text = match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        Value::Array(_) | Value::Object(_) => return None,
    };
    map.remove(key);
    text
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Context field that names the callback endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackSource {
    /// Protocol server that forwarded the request. Its `/receiver` path is
    /// answered on `/caller`.
    #[default]
    BppUri,
    BapUri,
}

impl FromStr for CallbackSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bpp_uri" | "bpp" => Ok(CallbackSource::BppUri),
            "bap_uri" | "bap" => Ok(CallbackSource::BapUri),
            other => Err(format!("expected bpp_uri or bap_uri, got '{}'", other)),
        }
    }
}

impl ProtocolContext {
    /// Endpoint the result should be delivered to: the preferred field,
    /// else the other one. Blank values are ignored.
    pub fn callback_uri(&self, source: CallbackSource) -> Option<String> {
        let bpp = non_blank(self.bpp_uri.as_deref())
            .map(|uri| uri.replace("/receiver", "/caller"));
        let bap = non_blank(self.bap_uri.as_deref()).map(str::to_string);
        match source {
            CallbackSource::BppUri => bpp.or(bap),
            CallbackSource::BapUri => bap.or(bpp),
        }
    }

    /// `version`, then legacy `core_version`, then the default
    pub fn resolved_version(&self) -> String {
        self.version
            .clone()
            .or_else(|| self.core_version.clone())
            .unwrap_or_else(|| DEFAULT_VERSION.to_string())
    }

    /// Derive the context of a message this service sends back.
    ///
    /// Caller fields survive; `core_version` is folded into `version` and
    /// dropped so exactly one version key is emitted.
    pub fn respond_as(
        &self,
        action: Action,
        identity: &ServiceIdentity,
        transaction_id: &str,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> ProtocolContext {
        let mut ctx = self.clone();
        // Fields set below replace any structured value the caller sent.
        for key in [
            "version",
            "core_version",
            "action",
            "transaction_id",
            "message_id",
            "timestamp",
        ] {
            ctx.extra.remove(key);
        }
        ctx.version = Some(self.resolved_version());
        ctx.core_version = None;
        ctx.action = Some(action.as_str().to_string());
        if identity.bpp_id.is_some() {
            ctx.extra.remove("bpp_id");
            ctx.bpp_id = identity.bpp_id.clone();
        }
        if identity.bpp_uri.is_some() {
            ctx.extra.remove("bpp_uri");
            ctx.bpp_uri = identity.bpp_uri.clone();
        }
        ctx.transaction_id = Some(transaction_id.to_string());
        ctx.message_id = Some(message_id.to_string());
        ctx.timestamp = Some(format_timestamp(now));
        if ctx.domain.is_none() && !ctx.extra.contains_key("domain") {
            ctx.domain = Some(DEFAULT_DOMAIN.to_string());
        }
        if ctx.country.is_none() && !ctx.extra.contains_key("country") {
            ctx.country = Some(DEFAULT_COUNTRY.to_string());
        }
        if ctx.city.is_none() && !ctx.extra.contains_key("city") {
            ctx.city = Some(DEFAULT_CITY.to_string());
        }
        ctx
    }
}

/// Identifiers this service stamps onto outgoing contexts
#[derive(Debug, Clone, Default)]
pub struct ServiceIdentity {
    pub bpp_id: Option<String>,
    pub bpp_uri: Option<String>,
}

pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ---------------------------------------------------------------------------
// Inbound requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub context: ProtocolContext,
    #[serde(default)]
    pub message: SearchMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchMessage {
    #[serde(default)]
    pub intent: Option<Intent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Intent {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub item: Option<IntentItem>,
    #[serde(default)]
    pub payment: Option<IntentPayment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntentItem {
    #[serde(default)]
    pub descriptor: Option<IntentDescriptor>,
    #[serde(default)]
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntentDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<IntentTagGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntentTagGroup {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub list: Vec<IntentTag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntentTag {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Amounts arrive as numbers or numeric strings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntentPayment {
    #[serde(default)]
    pub min_amount: Option<Value>,
    #[serde(default)]
    pub max_amount: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectRequest {
    #[serde(default)]
    pub context: ProtocolContext,
    #[serde(default)]
    pub message: SelectMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectMessage {
    #[serde(default)]
    pub order: Option<SelectOrder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectOrder {
    #[serde(default)]
    pub items: Vec<SelectItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectItem {
    #[serde(default)]
    pub id: Option<String>,
}

impl SelectRequest {
    /// First non-empty item id in the order
    pub fn item_id(&self) -> Option<&str> {
        self.message
            .order
            .as_ref()?
            .items
            .iter()
            .filter_map(|item| item.id.as_deref())
            .map(str::trim)
            .find(|id| !id.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Acknowledgements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "NACK")]
    Nack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub status: AckStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    pub ack: Ack,
}

impl AckMessage {
    pub fn ack() -> Self {
        Self {
            ack: Ack {
                status: AckStatus::Ack,
            },
        }
    }
}

/// Receipt returned synchronously for search/select
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    pub context: ProtocolContext,
    pub message: AckMessage,
}

/// Context-free ACK used by the callback receivers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BareAck {
    pub message: AckMessage,
}

impl Default for BareAck {
    fn default() -> Self {
        Self {
            message: AckMessage::ack(),
        }
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
}

impl Descriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short_desc: None,
            long_desc: None,
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub currency: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDescriptor {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub descriptor: TagDescriptor,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagGroup {
    pub descriptor: TagDescriptor,
    pub list: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub descriptor: Descriptor,
    pub price: Price,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub descriptor: Descriptor,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub descriptor: Descriptor,
    pub providers: Vec<Provider>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnSearchMessage {
    pub catalog: Catalog,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnSearchResponse {
    pub context: ProtocolContext,
    pub message: OnSearchMessage,
}

impl OnSearchResponse {
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.message
            .catalog
            .providers
            .iter()
            .flat_map(|p| p.items.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedOrder {
    pub provider: ProviderRef,
    pub items: Vec<Item>,
    pub quote: Quote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnSelectMessage {
    pub order: SelectedOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnSelectResponse {
    pub context: ProtocolContext,
    pub message: OnSelectMessage,
}

/// Result payload delivered by callback or poll
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallbackPayload {
    OnSearch(OnSearchResponse),
    OnSelect(OnSelectResponse),
}

impl CallbackPayload {
    pub fn action(&self) -> Action {
        match self {
            CallbackPayload::OnSearch(_) => Action::OnSearch,
            CallbackPayload::OnSelect(_) => Action::OnSelect,
        }
    }

    pub fn context(&self) -> &ProtocolContext {
        match self {
            CallbackPayload::OnSearch(r) => &r.context,
            CallbackPayload::OnSelect(r) => &r.context,
        }
    }
}
