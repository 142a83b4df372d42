// src/collect/types.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

use crate::collect::extract::Strategy;

/// Advisory update frequency of a source. The engine never schedules on it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Hourly,
    Daily,
    #[default]
    Periodic,
}

/// Optional API key passed through as a query parameter.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey {
    /// Query parameter name, e.g. "api_key" (EIA) or "securityToken" (ENTSO-E).
    pub param: String,
    /// Environment variable the key is read from at registry load.
    pub env: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(skip)]
    pub value: Option<String>,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("param", &self.param)
            .field("env", &self.env)
            .field("required", &self.required)
            .field("value", &self.value.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One page (or API path) of a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    /// Data type of the page; becomes the label of the rates it yields.
    pub label: String,
    /// Path relative to the descriptor's `base_url`.
    pub path: String,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Skip TLS verification for known-broken certificate chains.
    #[serde(default)]
    pub insecure_tls: bool,
    /// Overrides the descriptor-level strategy list for this endpoint only.
    #[serde(default)]
    pub strategies: Option<Vec<Strategy>>,
    /// How many accepted values to keep (first match wins when 1).
    #[serde(default = "default_take")]
    pub take: usize,
}

fn default_true() -> bool {
    true
}

fn default_take() -> usize {
    1
}

impl Endpoint {
    pub fn new(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
            required: true,
            insecure_tls: false,
            strategies: None,
            take: 1,
        }
    }

    pub fn insecure(mut self) -> Self {
        self.insecure_tls = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn take(mut self, n: usize) -> Self {
        self.take = n.max(1);
        self
    }
}

/// Static metadata describing where and how to collect one jurisdiction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDescriptor {
    #[serde(rename = "id")]
    pub region_id: String,
    /// Display name, e.g. "Alberta".
    #[serde(rename = "name")]
    pub region_name: String,
    #[serde(rename = "provider")]
    pub provider_name: String,
    pub base_url: String,
    #[serde(default)]
    pub cadence: Cadence,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub strategies: Vec<Strategy>,
    #[serde(default)]
    pub api_key: Option<ApiKey>,
}

fn default_currency() -> String {
    "CAD".to_string()
}

impl SourceDescriptor {
    /// Strategy list that applies to `endpoint`.
    pub fn strategies_for<'a>(&'a self, endpoint: &'a Endpoint) -> &'a [Strategy] {
        endpoint.strategies.as_deref().unwrap_or(&self.strategies)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    HttpError,
    NetworkError,
    Timeout,
}

/// Outcome of one fetch (including its retries). Never persisted with content.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: FetchStatus,
    pub http_status_code: Option<u16>,
    pub raw_content: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub attempts: u32,
    pub error: Option<String>,
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        self.status == FetchStatus::Ok
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// Unit hint read from the text around an amount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateUnit {
    PerKwh,
    PerMwh,
    PerKw,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedRate {
    pub label: String,
    pub value: Decimal,
    #[serde(default)]
    pub unit: RateUnit,
    pub strategy_used: String,
    pub confidence: Confidence,
    /// Endpoint path the value came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    Success,
    Partial,
    Error,
}

/// Per-endpoint bookkeeping kept in the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointOutcome {
    #[serde(rename = "type")]
    pub label: String,
    pub url: String,
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
    pub elapsed_ms: u64,
    pub attempts: u32,
    pub data_extracted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionResult {
    #[serde(rename = "region")]
    pub region_id: String,
    #[serde(rename = "name")]
    pub region_name: String,
    #[serde(rename = "provider")]
    pub provider_name: String,
    pub currency: String,
    pub collection_time: DateTime<Utc>,
    pub status: RegionStatus,
    pub rates: Vec<ExtractedRate>,
    /// Endpoint paths actually reached, in declaration order.
    pub data_sources: Vec<String>,
    pub endpoints: Vec<EndpointOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegionResult {
    /// Result for a region that failed before any endpoint was attempted.
    pub fn failed(
        region_id: impl Into<String>,
        region_name: impl Into<String>,
        provider_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            region_id: region_id.into(),
            region_name: region_name.into(),
            provider_name: provider_name.into(),
            currency: String::new(),
            collection_time: Utc::now(),
            status: RegionStatus::Error,
            rates: Vec::new(),
            data_sources: Vec::new(),
            endpoints: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// First rate with the given label.
    pub fn rate(&self, label: &str) -> Option<&ExtractedRate> {
        self.rates.iter().find(|r| r.label == label)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub total_regions: usize,
    pub successful: usize,
    pub partial: usize,
    pub failed: usize,
    pub rates_collected_count: usize,
    pub success_rate: f64,
}

impl RunSummary {
    pub fn from_results(results: &[RegionResult]) -> Self {
        let total_regions = results.len();
        let count = |s: RegionStatus| results.iter().filter(|r| r.status == s).count();
        let successful = count(RegionStatus::Success);
        let success_rate = if total_regions == 0 {
            0.0
        } else {
            successful as f64 / total_regions as f64
        };
        Self {
            total_regions,
            successful,
            partial: count(RegionStatus::Partial),
            failed: count(RegionStatus::Error),
            rates_collected_count: results.iter().map(|r| r.rates.len()).sum(),
            success_rate,
        }
    }
}

/// Complete output of one orchestrator invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub collection_start: DateTime<Utc>,
    pub collection_end: DateTime<Utc>,
    pub duration_seconds: f64,
    pub cancelled: bool,
    /// Keyed by region id on the wire; kept in run order.
    #[serde(serialize_with = "serialize_in_run_order")]
    pub region_results: Vec<RegionResult>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn region(&self, region_id: &str) -> Option<&RegionResult> {
        self.region_results.iter().find(|r| r.region_id == region_id)
    }
}

fn serialize_in_run_order<S: Serializer>(
    results: &[RegionResult],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(results.iter().map(|r| (r.region_id.as_str(), r)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn result_with(id: &str, status: RegionStatus, n_rates: usize) -> RegionResult {
        let mut r = RegionResult::failed(id, id, "P", "x");
        r.status = status;
        r.rates = (0..n_rates)
            .map(|i| ExtractedRate {
                label: format!("l{i}"),
                value: dec!(1.5),
                unit: RateUnit::Unspecified,
                strategy_used: "currency_pattern".into(),
                confidence: Confidence::High,
                endpoint: None,
            })
            .collect();
        r
    }

    #[test]
    fn summary_counts_and_rate() {
        let rs = vec![
            result_with("a", RegionStatus::Success, 2),
            result_with("b", RegionStatus::Partial, 1),
            result_with("c", RegionStatus::Error, 0),
            result_with("d", RegionStatus::Success, 3),
        ];
        let s = RunSummary::from_results(&rs);
        assert_eq!(s.total_regions, 4);
        assert_eq!(s.successful, 2);
        assert_eq!(s.partial, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.rates_collected_count, 6);
        assert!((s.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_summary_has_zero_rate() {
        let s = RunSummary::from_results(&[]);
        assert_eq!(s.total_regions, 0);
        assert_eq!(s.success_rate, 0.0);
    }

    #[test]
    fn api_key_debug_redacts_value() {
        let k = ApiKey {
            param: "api_key".into(),
            env: "EIA_API_KEY".into(),
            required: true,
            value: Some("secret-123".into()),
        };
        let s = format!("{k:?}");
        assert!(!s.contains("secret-123"));
        assert!(s.contains("<redacted>"));
    }

    #[test]
    fn report_serializes_regions_as_ordered_map() {
        let now = Utc::now();
        let report = RunReport {
            collection_start: now,
            collection_end: now,
            duration_seconds: 0.0,
            cancelled: false,
            region_results: vec![
                result_with("zeta", RegionStatus::Success, 1),
                result_with("alpha", RegionStatus::Error, 0),
            ],
            summary: RunSummary::default(),
        };
        let s = serde_json::to_string(&report).unwrap();
        let z = s.find("\"zeta\":").unwrap();
        let a = s.find("\"alpha\":").unwrap();
        assert!(z < a, "run order must be preserved");
        let v: serde_json::Value = serde_json::from_str(&s).unwrap();
        assert_eq!(v["region_results"]["zeta"]["rates"][0]["value"], 1.5);
        assert_eq!(v["region_results"]["zeta"]["provider"], "P");
    }
}
