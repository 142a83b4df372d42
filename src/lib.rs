// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod collect;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::collect::config::{load_default, load_from, CollectorSettings, LoadedConfig};
pub use crate::collect::error::CollectError;
pub use crate::collect::extract::{Extractor, Strategy, ValueBounds};
pub use crate::collect::fetcher::{FetchRequest, Fetcher, HttpFetcher, RetryPolicy};
pub use crate::collect::registry::SourceRegistry;
pub use crate::collect::sink::{JsonFileSink, MemorySink, ReportSink};
pub use crate::collect::types::{
    Cadence, Confidence, ExtractedRate, FetchResult, FetchStatus, RegionResult, RegionStatus,
    RunReport, RunSummary, SourceDescriptor,
};
pub use crate::collect::Orchestrator;
