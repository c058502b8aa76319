//! Builds ACKs and on_search / on_select payloads from catalog entries

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::protocol::{
    Ack, AckMessage, AckResponse, AckStatus, Catalog, Descriptor, Image, Item, OnSearchMessage,
    OnSearchResponse, OnSelectMessage, OnSelectResponse, Price, ProtocolContext, Provider,
    ProviderRef, Quote, SelectedOrder, ServiceIdentity, Tag, TagDescriptor, TagGroup,
};
use crate::types::{Action, CatalogEntry};

pub const DEFAULT_IMAGE_BASE_URL: &str =
    "https://storage.mtls.cloud.google.com/retail_images__agenticdemo/images";

const ATTRIBUTE_TAG_GROUP: &str = "product_attributes";
const ATTRIBUTE_PREFIX: &str = "attr_";

/// Names shown in the catalog and the base path for item images
#[derive(Debug, Clone)]
pub struct CatalogBranding {
    pub catalog_name: String,
    pub catalog_short_desc: String,
    pub provider_id: String,
    pub provider_name: String,
    pub image_base_url: String,
}

impl Default for CatalogBranding {
    fn default() -> Self {
        Self {
            catalog_name: "Your E-commerce BPP".to_string(),
            catalog_short_desc: "BPP for seller services".to_string(),
            provider_id: "provider1".to_string(),
            provider_name: "Product Provider Co.".to_string(),
            image_base_url: DEFAULT_IMAGE_BASE_URL.to_string(),
        }
    }
}

/// Stateless payload builder; only the embedded timestamp varies between calls
#[derive(Debug, Clone, Default)]
pub struct ResponseBuilder {
    identity: ServiceIdentity,
    branding: CatalogBranding,
}

impl ResponseBuilder {
    pub fn new(identity: ServiceIdentity, branding: CatalogBranding) -> Self {
        Self { identity, branding }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Synchronous receipt for an accepted request
    pub fn ack(
        &self,
        context: &ProtocolContext,
        action: Action,
        transaction_id: &str,
        message_id: &str,
    ) -> AckResponse {
        self.ack_at(context, action, transaction_id, message_id, Utc::now())
    }

    pub fn ack_at(
        &self,
        context: &ProtocolContext,
        action: Action,
        transaction_id: &str,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> AckResponse {
        AckResponse {
            context: context.respond_as(action, &self.identity, transaction_id, message_id, now),
            message: AckMessage {
                ack: Ack {
                    status: AckStatus::Ack,
                },
            },
        }
    }

    pub fn search_response(
        &self,
        entries: &[CatalogEntry],
        transaction_id: &str,
        message_id: &str,
        context: &ProtocolContext,
    ) -> OnSearchResponse {
        self.search_response_at(entries, transaction_id, message_id, context, Utc::now())
    }

    pub fn search_response_at(
        &self,
        entries: &[CatalogEntry],
        transaction_id: &str,
        message_id: &str,
        context: &ProtocolContext,
        now: DateTime<Utc>,
    ) -> OnSearchResponse {
        let items = entries.iter().map(|e| self.catalog_item(e)).collect();
        OnSearchResponse {
            context: context.respond_as(
                Action::OnSearch,
                &self.identity,
                transaction_id,
                message_id,
                now,
            ),
            message: OnSearchMessage {
                catalog: Catalog {
                    descriptor: Descriptor {
                        short_desc: Some(self.branding.catalog_short_desc.clone()),
                        ..Descriptor::named(self.branding.catalog_name.clone())
                    },
                    providers: vec![Provider {
                        id: self.branding.provider_id.clone(),
                        descriptor: Descriptor::named(self.branding.provider_name.clone()),
                        items,
                    }],
                },
            },
        }
    }

    pub fn select_response(
        &self,
        entry: &CatalogEntry,
        transaction_id: &str,
        message_id: &str,
        context: &ProtocolContext,
    ) -> OnSelectResponse {
        self.select_response_at(entry, transaction_id, message_id, context, Utc::now())
    }

    pub fn select_response_at(
        &self,
        entry: &CatalogEntry,
        transaction_id: &str,
        message_id: &str,
        context: &ProtocolContext,
        now: DateTime<Utc>,
    ) -> OnSelectResponse {
        OnSelectResponse {
            context: context.respond_as(
                Action::OnSelect,
                &self.identity,
                transaction_id,
                message_id,
                now,
            ),
            message: OnSelectMessage {
                order: SelectedOrder {
                    provider: ProviderRef {
                        id: self.branding.provider_id.clone(),
                    },
                    items: vec![self.detailed_item(entry)],
                    quote: Quote {
                        price: price_of(entry),
                    },
                },
            },
        }
    }

    pub fn image_url(&self, id: &str) -> String {
        format!("{}/{}.jpg", self.branding.image_base_url.trim_end_matches('/'), id)
    }

    fn catalog_item(&self, entry: &CatalogEntry) -> Item {
        let mut tags = Vec::new();
        push_tag(&mut tags, "brand", entry.brand.as_deref());
        push_tag(&mut tags, "article_type", entry.article_type.as_deref());
        push_tag(&mut tags, "usage", entry.usage.as_deref());
        push_attribute_tags(&mut tags, entry);

        Item {
            id: entry.id.clone(),
            descriptor: Descriptor {
                short_desc: non_empty(entry.description.as_deref()),
                images: vec![Image {
                    url: self.image_url(&entry.id),
                }],
                ..Descriptor::named(entry.name.clone())
            },
            price: price_of(entry),
            category_ids: Vec::new(),
            tags: tag_groups(tags),
        }
    }

    fn detailed_item(&self, entry: &CatalogEntry) -> Item {
        let mut tags = Vec::new();
        push_tag(&mut tags, "brand", entry.brand.as_deref());
        push_tag(&mut tags, "master_category", entry.master_category.as_deref());
        push_tag(&mut tags, "sub_category", entry.sub_category.as_deref());
        push_tag(&mut tags, "article_type", entry.article_type.as_deref());
        push_tag(&mut tags, "age_group", entry.age_group.as_deref());
        push_tag(&mut tags, "gender", entry.gender.as_deref());
        push_tag(&mut tags, "color", entry.color.as_deref());
        push_tag(&mut tags, "usage", entry.usage.as_deref());
        push_attribute_tags(&mut tags, entry);

        let category_ids = [entry.master_category.as_deref(), entry.sub_category.as_deref()]
            .into_iter()
            .filter_map(non_empty)
            .collect();

        Item {
            id: entry.id.clone(),
            descriptor: Descriptor {
                long_desc: non_empty(entry.description.as_deref()),
                images: vec![Image {
                    url: self.image_url(&entry.id),
                }],
                ..Descriptor::named(entry.name.clone())
            },
            price: price_of(entry),
            category_ids,
            tags: tag_groups(tags),
        }
    }
}

fn price_of(entry: &CatalogEntry) -> Price {
    Price {
        currency: entry.currency.clone(),
        value: format!("{:.2}", entry.price),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn push_tag(tags: &mut Vec<Tag>, code: &str, value: Option<&str>) {
    if let Some(value) = non_empty(value) {
        tags.push(Tag {
            descriptor: TagDescriptor {
                code: code.to_string(),
            },
            value,
        });
    }
}

fn push_attribute_tags(tags: &mut Vec<Tag>, entry: &CatalogEntry) {
    for (key, value) in &entry.attributes {
        let rendered = match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        };
        push_tag(tags, &attribute_code(key), rendered.as_deref());
    }
}

/// `"Sleeve Length"` → `"attr_sleeve_length"`
pub fn attribute_code(key: &str) -> String {
    let normalized: String = key
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();
    format!("{}{}", ATTRIBUTE_PREFIX, normalized)
}

fn tag_groups(tags: Vec<Tag>) -> Vec<TagGroup> {
    if tags.is_empty() {
        return Vec::new();
    }
    vec![TagGroup {
        descriptor: TagDescriptor {
            code: ATTRIBUTE_TAG_GROUP.to_string(),
        },
        list: tags,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn builder() -> ResponseBuilder {
        ResponseBuilder::new(
            ServiceIdentity {
                bpp_id: Some("bpp.example".to_string()),
                bpp_uri: Some("https://bpp.example/beckn".to_string()),
            },
            CatalogBranding {
                image_base_url: "https://img.example/images/".to_string(),
                ..Default::default()
            },
        )
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
    }

    fn shirt() -> CatalogEntry {
        let mut e = CatalogEntry::new("15970", "Navy Blue Shirt", 1299.0);
        e.brand = Some("Turtle".to_string());
        e.article_type = Some("Shirts".to_string());
        e.usage = Some("".to_string());
        e.master_category = Some("Apparel".to_string());
        e.color = Some("Navy Blue".to_string());
        e.attributes.insert("Sleeve Length".to_string(), json!("Long Sleeves"));
        e.attributes.insert("Body-Fit".to_string(), json!("Slim"));
        e.attributes.insert("Pattern".to_string(), Value::Null);
        e.attributes.insert("Pockets".to_string(), json!(2));
        e.attributes.insert("Lining".to_string(), json!("  "));
        e
    }

    #[test]
    fn test_version_precedence_and_single_key() {
        let b = builder();
        let both = ProtocolContext {
            version: Some("1.1.0".to_string()),
            core_version: Some("0.9.4".to_string()),
            ..Default::default()
        };
        let legacy = ProtocolContext {
            core_version: Some("0.9.4".to_string()),
            ..Default::default()
        };

        for (ctx, expected) in [
            (both, "1.1.0"),
            (legacy, "0.9.4"),
            (ProtocolContext::default(), "1.2.0"),
        ] {
            let r = b.search_response_at(&[], "t", "m", &ctx, fixed_now());
            let v = serde_json::to_value(r).unwrap();
            assert_eq!(v["context"]["version"], expected);
            assert!(v["context"].get("core_version").is_none());
        }
    }

    #[test]
    fn test_defaults_only_when_absent() {
        let b = builder();
        let bare = b.ack_at(&ProtocolContext::default(), Action::Search, "t", "m", fixed_now());
        assert_eq!(bare.context.domain.as_deref(), Some("e-commerce"));
        assert_eq!(bare.context.country.as_deref(), Some("IND"));
        assert_eq!(bare.context.city.as_deref(), Some("std:080"));

        let ctx = ProtocolContext {
            domain: Some("ONDC:RET10".to_string()),
            country: Some("USA".to_string()),
            city: Some("std:011".to_string()),
            ..Default::default()
        };
        let r = b.ack_at(&ctx, Action::Search, "t", "m", fixed_now());
        assert_eq!(r.context.domain.as_deref(), Some("ONDC:RET10"));
        assert_eq!(r.context.country.as_deref(), Some("USA"));
        assert_eq!(r.context.city.as_deref(), Some("std:011"));
    }

    #[test]
    fn test_context_overrides_and_preserves() {
        let mut ctx = ProtocolContext {
            action: Some("search".to_string()),
            bap_id: Some("bap.example".to_string()),
            bpp_id: Some("someone-else".to_string()),
            transaction_id: Some("old".to_string()),
            ..Default::default()
        };
        ctx.extra.insert("ttl".to_string(), json!("PT30S"));

        let r = builder().search_response_at(&[], "txn-1", "msg-1", &ctx, fixed_now());
        let c = &r.context;
        assert_eq!(c.action.as_deref(), Some("on_search"));
        assert_eq!(c.bap_id.as_deref(), Some("bap.example"));
        assert_eq!(c.bpp_id.as_deref(), Some("bpp.example"));
        assert_eq!(c.bpp_uri.as_deref(), Some("https://bpp.example/beckn"));
        assert_eq!(c.transaction_id.as_deref(), Some("txn-1"));
        assert_eq!(c.message_id.as_deref(), Some("msg-1"));
        assert_eq!(c.timestamp.as_deref(), Some("2024-05-01T12:30:00.000Z"));
        assert_eq!(c.extra.get("ttl"), Some(&json!("PT30S")));
    }

    #[test]
    fn test_empty_results_give_empty_catalog() {
        let v = serde_json::to_value(builder().search_response_at(
            &[],
            "t",
            "m",
            &ProtocolContext::default(),
            fixed_now(),
        ))
        .unwrap();
        assert_eq!(v["message"]["catalog"]["providers"][0]["items"], json!([]));
        assert!(v.get("error").is_none());
    }

    #[test]
    fn test_search_item_shape() {
        let ctx = ProtocolContext::default();
        let r = builder().search_response_at(&[shirt()], "t", "m", &ctx, fixed_now());
        let item = r.items().next().unwrap();
        assert_eq!(item.id, "15970");
        assert_eq!(item.descriptor.images[0].url, "https://img.example/images/15970.jpg");
        assert_eq!(item.price.currency, "INR");
        assert_eq!(item.price.value, "1299.00");

        let codes: Vec<(&str, &str)> = item.tags[0]
            .list
            .iter()
            .map(|t| (t.descriptor.code.as_str(), t.value.as_str()))
            .collect();
        assert_eq!(
            codes,
            vec![
                ("brand", "Turtle"),
                ("article_type", "Shirts"),
                ("attr_body_fit", "Slim"),
                ("attr_pockets", "2"),
                ("attr_sleeve_length", "Long Sleeves"),
            ]
        );
    }

    #[test]
    fn test_entry_without_tags_has_no_tag_group() {
        let bare = CatalogEntry::new("1", "Plain", 10.0);
        let ctx = ProtocolContext::default();
        let r = builder().search_response_at(&[bare], "t", "m", &ctx, fixed_now());
        let v = serde_json::to_value(&r).unwrap();
        assert!(v["message"]["catalog"]["providers"][0]["items"][0].get("tags").is_none());
    }

    #[test]
    fn test_select_has_item_and_price_only_quote() {
        let ctx = ProtocolContext::default();
        let r = builder().select_response_at(&shirt(), "t", "m", &ctx, fixed_now());
        assert_eq!(r.context.action.as_deref(), Some("on_select"));
        assert_eq!(r.message.order.items.len(), 1);
        assert_eq!(r.message.order.items[0].category_ids, vec!["Apparel"]);
        assert!(r.message.order.items[0].tags[0]
            .list
            .iter()
            .any(|t| t.descriptor.code == "color" && t.value == "Navy Blue"));

        let quote = serde_json::to_value(&r.message.order.quote).unwrap();
        assert_eq!(quote, json!({"price": {"currency": "INR", "value": "1299.00"}}));
    }

    #[test]
    fn test_attribute_code() {
        assert_eq!(attribute_code("Sleeve Length"), "attr_sleeve_length");
        assert_eq!(attribute_code(" Neck-Type "), "attr_neck_type");
        assert_eq!(attribute_code("fabric"), "attr_fabric");
    }
}
