// src/collect/extract/page.rs
//! Fetched content with lazily parsed views (HTML document, JSON value).
//!
//! `scraper::Html` is `!Send`, so a `Page` lives only inside a synchronous
//! extraction call and is never held across an await point.

use once_cell::unsync::OnceCell;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

const HIDDEN: [&str; 4] = ["script", "style", "noscript", "template"];

pub struct Page<'a> {
    raw: &'a str,
    html: OnceCell<Html>,
    json: OnceCell<Option<Value>>,
}

impl<'a> Page<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self {
            raw,
            html: OnceCell::new(),
            json: OnceCell::new(),
        }
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    pub fn html(&self) -> &Html {
        self.html.get_or_init(|| Html::parse_document(self.raw))
    }

    pub fn json(&self) -> Option<&Value> {
        self.json
            .get_or_init(|| serde_json::from_str(self.raw.trim_start_matches('\u{feff}')).ok())
            .as_ref()
    }

    /// Visible text nodes in document order, whitespace-collapsed, empties dropped.
    pub fn text_nodes(&self) -> Vec<String> {
        let doc = self.html();
        let mut out = Vec::new();
        for node in doc.root_element().descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| HIDDEN.contains(&e.name()))
            });
            if hidden {
                continue;
            }
            let t = collapse_ws(text);
            if !t.is_empty() {
                out.push(t);
            }
        }
        out
    }

    /// All visible text joined with single spaces.
    pub fn visible_text(&self) -> String {
        self.text_nodes().join(" ")
    }

    /// Texts of the elements around each text node mentioning `label`
    /// (case-insensitive): the node's parent, then up to three following
    /// sibling elements of that parent.
    pub fn texts_near_label(&self, label: &str) -> Vec<String> {
        let needle = label.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let doc = self.html();
        let mut out = Vec::new();
        for node in doc.root_element().descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            if !text.to_lowercase().contains(&needle) {
                continue;
            }
            let Some(parent) = node.parent().and_then(ElementRef::wrap) else {
                continue;
            };
            if HIDDEN.contains(&parent.value().name()) {
                continue;
            }
            out.push(element_text(&parent));
            for sib in parent.next_siblings().filter_map(ElementRef::wrap).take(3) {
                out.push(element_text(&sib));
            }
        }
        out
    }

    /// Texts of every element matching `selector`, or `None` if it does not parse.
    pub fn select_texts(&self, selector: &str) -> Option<Vec<String>> {
        let sel = Selector::parse(selector).ok()?;
        Some(self.html().select(&sel).map(|e| element_text(&e)).collect())
    }

    /// Tables as rows of cell texts; header cells (`th`) included as their own row.
    pub fn tables(&self) -> Vec<Vec<Vec<String>>> {
        let (Ok(table), Ok(row), Ok(cell)) = (
            Selector::parse("table"),
            Selector::parse("tr"),
            Selector::parse("th, td"),
        ) else {
            return Vec::new();
        };
        self.html()
            .select(&table)
            .map(|t| {
                t.select(&row)
                    .map(|r| r.select(&cell).map(|c| element_text(&c)).collect())
                    .collect()
            })
            .collect()
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    collapse_ws(&el.text().collect::<String>())
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
