// src/collect/extract/amount.rs
//! Currency-amount tokens found in free text.
//!
//! Accepted shapes: optional sign, optional currency symbol (`$`, `€`, `£`),
//! digits with optional thousands separators and fraction, optional cents
//! suffix (`¢`, `cent`, `cents`) and an optional per-unit tail (`/kWh`,
//! `per MWh`, `/kW`). Cents are converted to whole currency units.

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::collect::types::RateUnit;

/// One amount-shaped token.
#[derive(Debug, Clone, PartialEq)]
pub struct Amount {
    pub value: Decimal,
    pub unit: RateUnit,
    /// Token as it appeared in the text (trimmed).
    pub raw: String,
    /// Carried a currency symbol or a cents suffix.
    pub decorated: bool,
}

fn amount_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?ix)
            (?P<sign>[-+])?
            (?P<cur>[$€£])?\s?
            (?P<num>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)
            (?P<cents>\s*(?:¢|cents?\b))?
            (?P<unit>\s*(?:/|per)\s*(?P<per>kwh|mwh|kw)\b)?",
        )
        .unwrap()
    })
}

fn unit_of(caps: &Captures<'_>) -> RateUnit {
    match caps
        .name("per")
        .map(|m| m.as_str().to_ascii_lowercase())
        .as_deref()
    {
        Some("kwh") => RateUnit::PerKwh,
        Some("mwh") => RateUnit::PerMwh,
        Some("kw") => RateUnit::PerKw,
        _ => RateUnit::Unspecified,
    }
}

fn to_amount(caps: &Captures<'_>) -> Option<Amount> {
    let num = caps.name("num")?.as_str().replace(',', "");
    let mut value = Decimal::from_str(&num).ok()?;
    let cents = caps.name("cents").is_some();
    if cents {
        value /= Decimal::ONE_HUNDRED;
    }
    if caps.name("sign").map(|m| m.as_str()) == Some("-") {
        value = -value;
    }
    Some(Amount {
        value: value.normalize(),
        unit: unit_of(caps),
        raw: caps.get(0)?.as_str().trim().to_string(),
        decorated: cents || caps.name("cur").is_some(),
    })
}

/// Every amount-shaped token in `text`, decorated or bare, in order.
pub fn find_amounts(text: &str) -> Vec<Amount> {
    amount_re()
        .captures_iter(text)
        .filter_map(|c| to_amount(&c))
        .collect()
}

/// Only tokens carrying a currency symbol or cents suffix.
pub fn find_decorated(text: &str) -> Vec<Amount> {
    find_amounts(text).into_iter().filter(|a| a.decorated).collect()
}

/// `text` is, as a whole, a single amount (e.g. a table cell or an element's text).
pub fn parse_whole(text: &str) -> Option<Amount> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    let caps = amount_re().captures(t)?;
    let whole = caps.get(0)?;
    if whole.start() != 0 || whole.end() != t.len() {
        return None;
    }
    to_amount(&caps)
}
