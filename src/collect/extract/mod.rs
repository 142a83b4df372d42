// src/collect/extract/mod.rs
//! # Extraction
//!
//! Turns fetched content into typed rates using an ordered list of
//! [`Strategy`] values. Strategies are tried in declared order and the first
//! one yielding an accepted candidate wins; anything produced by a strategy
//! other than the first is tagged [`Confidence::Low`].
//!
//! A candidate is accepted when it is amount-shaped (see [`amount`]) and its
//! value lies strictly inside [`ValueBounds`]. No accepted candidate is not an
//! error: the caller gets an empty vector.

pub mod amount;
pub mod page;

use metrics::histogram;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collect::types::{Confidence, ExtractedRate};
use amount::{find_amounts, find_decorated, parse_whole, Amount};
use page::Page;

/// One method of turning raw content into candidate values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Decorated currency tokens (`$45.23`, `9.4¢`) in visible text.
    CurrencyPattern,
    /// Amounts next to a text mentioning one of `labels`.
    LabelledText { labels: Vec<String> },
    /// Elements matched by a CSS selector (`#pool-price`, `.rate-value`).
    CssSelector { selector: String },
    /// Cells of HTML tables; restricted to the column whose header contains
    /// `column` when given.
    Table {
        #[serde(default)]
        column: Option<String>,
    },
    /// Custom pattern over visible text (or the raw payload when `raw`); the
    /// `value` group (or group 1, or the whole match) is parsed as an amount.
    Regex {
        pattern: String,
        #[serde(default)]
        raw: bool,
    },
    /// JSON payloads: RFC 6901 pointer, optionally mapping each array element
    /// to `field`.
    JsonPointer {
        pointer: String,
        #[serde(default)]
        field: Option<String>,
    },
}

impl Strategy {
    pub fn id(&self) -> &'static str {
        match self {
            Strategy::CurrencyPattern => "currency_pattern",
            Strategy::LabelledText { .. } => "labelled_text",
            Strategy::CssSelector { .. } => "css_selector",
            Strategy::Table { .. } => "table",
            Strategy::Regex { .. } => "regex",
            Strategy::JsonPointer { .. } => "json_pointer",
        }
    }

    pub fn labelled<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Strategy::LabelledText {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Strategy::CssSelector {
            selector: selector.into(),
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Strategy::Regex {
            pattern: pattern.into(),
            raw: false,
        }
    }

    /// Pattern applied to the undecoded payload, e.g. XML API responses.
    pub fn raw_regex(pattern: impl Into<String>) -> Self {
        Strategy::Regex {
            pattern: pattern.into(),
            raw: true,
        }
    }

    /// Candidate amounts in page order. Pure: same page, same output.
    pub fn candidates(&self, page: &Page<'_>) -> Vec<Amount> {
        match self {
            Strategy::CurrencyPattern => page
                .text_nodes()
                .iter()
                .flat_map(|t| find_decorated(t))
                .collect(),

            Strategy::LabelledText { labels } => labels
                .iter()
                .flat_map(|l| page.texts_near_label(l))
                .flat_map(|t| find_decorated(&t))
                .collect(),

            Strategy::CssSelector { selector } => match page.select_texts(selector) {
                Some(texts) => texts.iter().flat_map(|t| element_candidates(t)).collect(),
                None => {
                    tracing::warn!(selector = %selector, "invalid css selector");
                    Vec::new()
                }
            },

            Strategy::Table { column } => table_candidates(page, column.as_deref()),

            Strategy::Regex { pattern, raw } => match Regex::new(pattern) {
                Ok(re) => {
                    let text = if *raw {
                        page.raw().to_string()
                    } else {
                        page.visible_text()
                    };
                    re.captures_iter(&text)
                        .filter_map(|c| {
                            c.name("value")
                                .or_else(|| c.get(1))
                                .or_else(|| c.get(0))
                                .map(|m| m.as_str().to_string())
                        })
                        .flat_map(|s| find_amounts(&s).into_iter().take(1))
                        .collect()
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "invalid extraction regex");
                    Vec::new()
                }
            },

            Strategy::JsonPointer { pointer, field } => page
                .json()
                .and_then(|v| v.pointer(pointer))
                .map(|v| json_candidates(v, field.as_deref()))
                .unwrap_or_default(),
        }
    }
}

/// Decorated tokens when the element has any (so times and hours next to a
/// price are ignored); otherwise the element must be a bare amount as a whole.
fn element_candidates(text: &str) -> Vec<Amount> {
    let decorated = find_decorated(text);
    if decorated.is_empty() {
        parse_whole(text).into_iter().collect()
    } else {
        decorated
    }
}

fn table_candidates(page: &Page<'_>, column: Option<&str>) -> Vec<Amount> {
    let mut out = Vec::new();
    for rows in page.tables() {
        match column.map(str::to_lowercase) {
            Some(col) => {
                let Some(idx) = rows
                    .iter()
                    .find_map(|r| r.iter().position(|h| h.to_lowercase().contains(&col)))
                else {
                    continue;
                };
                out.extend(
                    rows.iter()
                        .filter_map(|r| r.get(idx))
                        .filter_map(|c| parse_whole(c)),
                );
            }
            // Without a column, bare numbers (hours, years) are too noisy.
            None => out.extend(
                rows.iter()
                    .flatten()
                    .filter_map(|c| parse_whole(c))
                    .filter(|a| a.decorated),
            ),
        }
    }
    out
}

fn json_candidates(v: &Value, field: Option<&str>) -> Vec<Amount> {
    match (v, field) {
        (Value::Array(items), _) => items.iter().flat_map(|i| json_candidates(i, field)).collect(),
        (Value::Object(map), Some(f)) => map
            .get(f)
            .map(|x| json_candidates(x, None))
            .unwrap_or_default(),
        (Value::Number(n), _) => parse_whole(&n.to_string()).into_iter().collect(),
        (Value::String(s), _) => parse_whole(s).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Plausibility window for extracted values (exclusive on both ends).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueBounds {
    pub min_exclusive: Decimal,
    pub max_exclusive: Decimal,
}

impl Default for ValueBounds {
    fn default() -> Self {
        Self {
            min_exclusive: Decimal::ZERO,
            max_exclusive: Decimal::from(10_000),
        }
    }
}

impl ValueBounds {
    pub fn accepts(&self, v: Decimal) -> bool {
        v > self.min_exclusive && v < self.max_exclusive
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    bounds: ValueBounds,
}

impl Extractor {
    pub fn new(bounds: ValueBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> ValueBounds {
        self.bounds
    }

    /// First accepted value for `label`, or nothing.
    pub fn extract(&self, label: &str, content: &str, strategies: &[Strategy]) -> Vec<ExtractedRate> {
        self.extract_n(label, content, strategies, 1)
    }

    /// Up to `take` accepted values from the first strategy that yields any.
    /// Extra values are labelled `label_2`, `label_3`, ...
    pub fn extract_n(
        &self,
        label: &str,
        content: &str,
        strategies: &[Strategy],
        take: usize,
    ) -> Vec<ExtractedRate> {
        let t0 = std::time::Instant::now();
        let page = Page::new(content);
        let mut out = Vec::new();

        for (i, strategy) in strategies.iter().enumerate() {
            let accepted: Vec<Amount> = strategy
                .candidates(&page)
                .into_iter()
                .filter(|a| self.bounds.accepts(a.value))
                .take(take.max(1))
                .collect();
            if accepted.is_empty() {
                tracing::debug!(label, strategy = strategy.id(), "no accepted candidate");
                continue;
            }

            let confidence = if i == 0 {
                Confidence::High
            } else {
                Confidence::Low
            };
            out = accepted
                .into_iter()
                .enumerate()
                .map(|(n, a)| ExtractedRate {
                    label: if n == 0 {
                        label.to_string()
                    } else {
                        format!("{label}_{}", n + 1)
                    },
                    value: a.value,
                    unit: a.unit,
                    strategy_used: strategy.id().to_string(),
                    confidence,
                    endpoint: None,
                })
                .collect();
            tracing::debug!(label, strategy = strategy.id(), n = out.len(), "extracted");
            break;
        }

        histogram!("collect_extract_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        out
    }
}
