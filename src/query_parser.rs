//! Filter-expression parser: `"t-shirt, red, price > 500"` into keywords and a price range

use regex::Regex;
use std::sync::OnceLock;

use crate::types::SearchCriteria;

fn price_clause() -> &'static Regex {
    static PRICE: OnceLock<Regex> = OnceLock::new();
    PRICE.get_or_init(|| {
        Regex::new(r"(?i)^price\s*([<>]=?)\s*([0-9]+(?:\.[0-9]+)?)$")
            .expect("price pattern is valid")
    })
}

/// Parse a comma-separated filter expression.
///
/// Price comparisons narrow a single range (highest lower bound, lowest upper
/// bound). Everything else is kept verbatim as a keyword, in input order. An
/// empty range yields no price bounds at all.
pub fn parse(text: &str) -> SearchCriteria {
    let mut keywords = Vec::new();
    let mut lower = f64::NEG_INFINITY;
    let mut upper = f64::INFINITY;

    for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some(caps) = price_clause().captures(part) else {
            keywords.push(part.to_string());
            continue;
        };
        let Ok(value) = caps[2].parse::<f64>() else {
            keywords.push(part.to_string());
            continue;
        };
        if caps[1].starts_with('>') {
            lower = lower.max(value);
        } else {
            upper = upper.min(value);
        }
    }

    let mut min_price = lower.is_finite().then_some(lower);
    let mut max_price = upper.is_finite().then_some(upper);
    if let (Some(lo), Some(hi)) = (min_price, max_price) {
        if lo >= hi {
            min_price = None;
            max_price = None;
        }
    }

    SearchCriteria {
        keywords,
        min_price,
        max_price,
        soft_hints: Vec::new(),
    }
}

/// Same as [`parse`] for an optional query
pub fn parse_opt(text: Option<&str>) -> SearchCriteria {
    text.map(parse).unwrap_or_default()
}
