// src/collect/region.rs
//! Fetch + extract for one region, folded into a [`RegionResult`].
//!
//! Endpoints are visited sequentially in declaration order. A failed fetch
//! marks that endpoint unreached and the next one is tried; nothing here
//! returns an error or unwinds into the orchestrator.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use metrics::counter;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use url::Url;

use crate::collect::config::CollectorSettings;
use crate::collect::error::CollectError;
use crate::collect::extract::Extractor;
use crate::collect::fetcher::{FetchRequest, Fetcher};
use crate::collect::types::{
    EndpointOutcome, ExtractedRate, RegionResult, RegionStatus, SourceDescriptor,
};

pub struct RegionCollector {
    fetcher: Arc<dyn Fetcher>,
    extractor: Extractor,
    settings: CollectorSettings,
}

/// A region whose endpoint URLs resolved; ready to be fetched.
#[derive(Debug)]
pub struct RegionPlan<'d> {
    descriptor: &'d SourceDescriptor,
    targets: Vec<Target>,
    collection_time: DateTime<Utc>,
}

/// Resolved URLs of one endpoint: what is fetched and what is reported.
#[derive(Debug, Clone, PartialEq)]
struct Target {
    fetch: Url,
    display: Url,
}

impl RegionCollector {
    pub fn new(fetcher: Arc<dyn Fetcher>, extractor: Extractor, settings: CollectorSettings) -> Self {
        Self {
            fetcher,
            extractor,
            settings,
        }
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    pub async fn collect(&self, d: &SourceDescriptor) -> RegionResult {
        match self.prepare(d) {
            Ok(plan) => self.run(plan).await,
            Err(failed) => failed,
        }
    }

    /// Resolve every endpoint URL without touching the network. A
    /// misconfigured region comes back as its final `error` result.
    pub fn prepare<'d>(&self, d: &'d SourceDescriptor) -> Result<RegionPlan<'d>, RegionResult> {
        let collection_time = Utc::now();
        match resolve_targets(d, collection_time.date_naive()) {
            Ok(targets) => Ok(RegionPlan {
                descriptor: d,
                targets,
                collection_time,
            }),
            Err(e) => {
                tracing::warn!(target: "collect", region = %d.region_id, error = %e, "region misconfigured");
                Err(RegionResult {
                    currency: d.currency.clone(),
                    ..RegionResult::failed(
                        &d.region_id,
                        &d.region_name,
                        &d.provider_name,
                        e.to_string(),
                    )
                })
            }
        }
    }

    /// Fetch and extract every endpoint of a prepared region.
    pub async fn run(&self, plan: RegionPlan<'_>) -> RegionResult {
        let RegionPlan {
            descriptor: d,
            targets,
            collection_time,
        } = plan;

        let mut rates: Vec<ExtractedRate> = Vec::new();
        let mut outcomes: Vec<EndpointOutcome> = Vec::with_capacity(targets.len());
        let mut data_sources = Vec::new();
        let mut required_unreached = Vec::new();
        let mut notes: Vec<String> = Vec::new();

        for (ep, target) in d.endpoints.iter().zip(targets) {
            let mut req = FetchRequest::new(target.fetch.as_str(), self.settings.timeout())
                .with_display_url(target.display.as_str());
            req.verify_tls = !ep.insecure_tls;
            let fetched = self.fetcher.fetch(&req).await;
            let reached = fetched.is_ok();

            let mut outcome = EndpointOutcome {
                label: ep.label.clone(),
                url: target.display.to_string(),
                status: fetched.status,
                http_status_code: fetched.http_status_code,
                elapsed_ms: fetched.elapsed_ms,
                attempts: fetched.attempts,
                data_extracted: false,
                // Transport errors may echo the full URL including the key.
                error: fetched.error.as_deref().map(|e| redact(e, &target)),
            };

            match fetched.raw_content {
                Some(content) if reached => {
                    data_sources.push(ep.path.clone());
                    let strategies = d.strategies_for(ep);
                    let extracted = guarded(&ep.label, || {
                        self.extractor
                            .extract_n(&ep.label, &content, strategies, ep.take)
                    });
                    match extracted {
                        Ok(found) if !found.is_empty() => {
                            outcome.data_extracted = true;
                            rates.extend(found.into_iter().map(|mut r| {
                                r.endpoint = Some(ep.path.clone());
                                r
                            }));
                        }
                        Ok(_) => {
                            tracing::info!(
                                target: "collect",
                                region = %d.region_id,
                                endpoint = %ep.label,
                                "no rate extracted"
                            );
                            outcome.error = Some("no strategy produced an accepted value".into());
                        }
                        Err(e) => {
                            tracing::error!(target: "collect", region = %d.region_id, error = %e, "extractor panicked");
                            outcome.error = Some(e.to_string());
                            notes.push(e.to_string());
                        }
                    }
                }
                _ => {
                    let why = outcome.error.clone().unwrap_or_else(|| "unreached".into());
                    notes.push(format!("{}: {why}", ep.label));
                    if ep.required {
                        required_unreached.push(ep.label.clone());
                    }
                }
            }
            outcomes.push(outcome);
        }

        counter!("collect_rates_total").increment(rates.len() as u64);
        let status = region_status(rates.len(), required_unreached.len());
        let error = match status {
            RegionStatus::Success => None,
            RegionStatus::Partial => Some(format!(
                "unreached required endpoints: {}",
                required_unreached.join(", ")
            )),
            RegionStatus::Error if data_sources.is_empty() => {
                Some(format!("no endpoint reached ({})", notes.join("; ")))
            }
            RegionStatus::Error => Some("no rates extracted".to_string()),
        };

        tracing::info!(
            target: "collect",
            region = %d.region_id,
            status = ?status,
            rates = rates.len(),
            reached = data_sources.len(),
            endpoints = outcomes.len(),
            "region collected"
        );

        RegionResult {
            region_id: d.region_id.clone(),
            region_name: d.region_name.clone(),
            provider_name: d.provider_name.clone(),
            currency: d.currency.clone(),
            collection_time,
            status,
            rates,
            data_sources,
            endpoints: outcomes,
            error,
        }
    }
}

/// `success` needs rates and every required endpoint reached; no rates is `error`.
pub fn region_status(rates: usize, required_unreached: usize) -> RegionStatus {
    match (rates, required_unreached) {
        (0, _) => RegionStatus::Error,
        (_, 0) => RegionStatus::Success,
        _ => RegionStatus::Partial,
    }
}

fn resolve_targets(d: &SourceDescriptor, today: NaiveDate) -> Result<Vec<Target>, CollectError> {
    if d.endpoints.is_empty() {
        return Err(CollectError::config(&d.region_id, "no endpoints declared"));
    }
    let base = Url::parse(&d.base_url)
        .map_err(|e| CollectError::config(&d.region_id, format!("invalid base_url: {e}")))?;

    let key = match &d.api_key {
        Some(k) => match &k.value {
            Some(v) => Some((k.param.as_str(), v.as_str())),
            None if k.required => {
                return Err(CollectError::config(
                    &d.region_id,
                    format!("API key required: set {}", k.env),
                ))
            }
            None => None,
        },
        None => None,
    };

    d.endpoints
        .iter()
        .map(|ep| {
            if ep.path.trim().is_empty() {
                return Err(CollectError::config(
                    &d.region_id,
                    format!("endpoint {} has an empty path", ep.label),
                ));
            }
            let path = expand_dates(&ep.path, today);
            let display = base.join(&path).map_err(|e| {
                CollectError::config(&d.region_id, format!("invalid path {}: {e}", ep.path))
            })?;
            let mut fetch = display.clone();
            if let Some((param, value)) = key {
                fetch.query_pairs_mut().append_pair(param, value);
            }
            Ok(Target { fetch, display })
        })
        .collect()
}

/// `{today}` / `{tomorrow}` in a path become `YYYYMMDD0000` (UTC).
fn expand_dates(path: &str, today: NaiveDate) -> String {
    if !path.contains('{') {
        return path.to_string();
    }
    let fmt = |d: NaiveDate| d.format("%Y%m%d0000").to_string();
    path.replace("{today}", &fmt(today))
        .replace("{tomorrow}", &fmt(today + ChronoDuration::days(1)))
}

fn redact(message: &str, target: &Target) -> String {
    if target.fetch == target.display {
        return message.to_string();
    }
    message.replace(target.fetch.as_str(), target.display.as_str())
}

/// Run an extraction, turning a panic into [`CollectError::Extraction`].
fn guarded<F>(endpoint: &str, extract: F) -> Result<Vec<ExtractedRate>, CollectError>
where
    F: FnOnce() -> Vec<ExtractedRate>,
{
    catch_unwind(AssertUnwindSafe(extract)).map_err(|panic| CollectError::Extraction {
        endpoint: endpoint.to_string(),
        message: panic_message(panic.as_ref()),
    })
}

fn panic_message(p: &(dyn std::any::Any + Send)) -> String {
    p.downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| p.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
