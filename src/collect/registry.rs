// src/collect/registry.rs
//! # Source Registry
//!
//! Ordered, read-only set of [`SourceDescriptor`]s the orchestrator iterates.
//!
//! - Built explicitly and handed to the orchestrator (no global lookup).
//! - Declaration order is the collection order.
//! - Ids are unique; [`SourceRegistry::merged_with`] replaces same ids in place
//!   and appends new ones.
//! - [`SourceRegistry::builtin`] seeds the Canadian provinces and territories,
//!   US EIA and European ENTSO-E.

use serde::Serialize;
use std::collections::HashSet;

use crate::collect::error::CollectError;
use crate::collect::extract::Strategy;
use crate::collect::types::{ApiKey, Cadence, Endpoint, SourceDescriptor};

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    regions: Vec<SourceDescriptor>,
}

/// One line of [`SourceRegistry::summary`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RegionSummary {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub cadence: Cadence,
    pub endpoints: usize,
    pub api_key_required: bool,
}

impl SourceRegistry {
    pub fn new(regions: Vec<SourceDescriptor>) -> Result<Self, CollectError> {
        let mut seen = HashSet::new();
        for d in &regions {
            if d.region_id.trim().is_empty() {
                return Err(CollectError::config("<unnamed>", "empty region id"));
            }
            if !seen.insert(d.region_id.as_str()) {
                return Err(CollectError::DuplicateRegion(d.region_id.clone()));
            }
        }
        Ok(Self { regions })
    }

    pub fn get(&self, region_id: &str) -> Option<&SourceDescriptor> {
        self.regions.iter().find(|d| d.region_id == region_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|d| d.region_id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// `overrides` replace descriptors with the same id (keeping their
    /// position); unknown ids are appended in their given order.
    pub fn merged_with(mut self, overrides: Vec<SourceDescriptor>) -> Result<Self, CollectError> {
        for o in overrides {
            match self.regions.iter_mut().find(|d| d.region_id == o.region_id) {
                Some(slot) => *slot = o,
                None => self.regions.push(o),
            }
        }
        Self::new(self.regions)
    }

    /// Fill API key values from the process environment.
    pub fn resolve_api_keys(self) -> Self {
        self.resolve_api_keys_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_api_keys_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for d in &mut self.regions {
            if let Some(key) = d.api_key.as_mut() {
                key.value = lookup(&key.env).filter(|v| !v.trim().is_empty());
                tracing::debug!(
                    region = %d.region_id,
                    env = %key.env,
                    present = key.value.is_some(),
                    "api key resolved"
                );
            }
        }
        self
    }

    pub fn summary(&self) -> Vec<RegionSummary> {
        self.regions
            .iter()
            .map(|d| RegionSummary {
                id: d.region_id.clone(),
                name: d.region_name.clone(),
                provider: d.provider_name.clone(),
                cadence: d.cadence,
                endpoints: d.endpoints.len(),
                api_key_required: d.api_key.as_ref().is_some_and(|k| k.required),
            })
            .collect()
    }

    /// Built-in sources. Pages change without notice; values are best effort.
    pub fn builtin() -> Self {
        Self {
            regions: builtin_regions(),
        }
    }
}

fn region(
    id: &str,
    name: &str,
    provider: &str,
    base_url: &str,
    cadence: Cadence,
) -> SourceDescriptor {
    SourceDescriptor {
        region_id: id.to_string(),
        region_name: name.to_string(),
        provider_name: provider.to_string(),
        base_url: base_url.to_string(),
        cadence,
        currency: "CAD".to_string(),
        endpoints: Vec::new(),
        strategies: vec![
            Strategy::labelled(["per kWh", "energy charge", "rate", "price"]),
            Strategy::CurrencyPattern,
        ],
        api_key: None,
    }
}

/// Regulated utilities publishing a single residential rate page.
fn utility(id: &str, name: &str, provider: &str, base_url: &str, path: &str) -> SourceDescriptor {
    SourceDescriptor {
        endpoints: vec![Endpoint::new("residential_rate", path)],
        ..region(id, name, provider, base_url, Cadence::Periodic)
    }
}

fn builtin_regions() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor {
            endpoints: vec![
                Endpoint::new("current_pool_price", "reports/price/pool-price/").with_strategies(
                    vec![
                        Strategy::regex(r"(?i)pool price.*?(?P<value>\$\s?\d+(?:\.\d+)?)"),
                        Strategy::labelled(["pool price", "current price"]),
                        Strategy::CurrencyPattern,
                    ],
                ),
                Endpoint::new("recent_prices", "reports/price/historical-price-data/")
                    .with_strategies(vec![
                        Strategy::Table {
                            column: Some("price".into()),
                        },
                        Strategy::CurrencyPattern,
                    ])
                    .take(5)
                    .optional(),
                Endpoint::new("current_rro_rate", "reports/price/regulated-rate-option-rro/")
                    .with_strategies(vec![
                        Strategy::labelled(["rro rate", "regulated rate"]),
                        Strategy::regex(r"(?i)(?:RRO|regulated).*?(?P<value>\$\s?\d+(?:\.\d+)?)"),
                        Strategy::CurrencyPattern,
                    ]),
            ],
            ..region("alberta", "Alberta", "AESO", "https://www.aeso.ca/", Cadence::Hourly)
        },
        SourceDescriptor {
            endpoints: vec![
                Endpoint::new("residential_rate", "residential-rates.html"),
                Endpoint::new("business_rate", "business-rates.html"),
                Endpoint::new("time_of_use_rates", "time-of-use-rates.html")
                    .take(3)
                    .optional(),
            ],
            ..region(
                "british_columbia",
                "British Columbia",
                "BC Hydro",
                "https://www.bchydro.com/accounts-billing/rates-energy-use/electricity-rates/",
                Cadence::Daily,
            )
        },
        SourceDescriptor {
            endpoints: vec![
                Endpoint::new("current_hoep", "price-overview").with_strategies(vec![
                    Strategy::regex(r"(?i)HOEP\)?:?\s*(?P<value>\$?\s?\d+(?:\.\d+)?\s*(?:¢|cents?)?)"),
                    Strategy::labelled(["hourly ontario energy price", "hoep"]),
                    Strategy::CurrencyPattern,
                ]),
                Endpoint::new("current_global_adjustment", "global-adjustment"),
            ],
            ..region(
                "ontario",
                "Ontario",
                "IESO",
                "https://www.ieso.ca/en/power-data/",
                Cadence::Hourly,
            )
        },
        SourceDescriptor {
            endpoints: vec![
                Endpoint::new(
                    "residential_rate",
                    "residential/customer-space/account-and-billing/rates/",
                ),
                Endpoint::new("business_rate", "business/customers/rates/"),
                Endpoint::new(
                    "calculator_rates",
                    "residential/customer-space/account-and-billing/rates/rate-calculator/",
                )
                .take(3)
                .optional(),
            ],
            ..region(
                "quebec",
                "Quebec",
                "Hydro-Québec",
                "https://www.hydroquebec.com/",
                Cadence::Periodic,
            )
        },
        utility(
            "manitoba",
            "Manitoba",
            "Manitoba Hydro",
            "https://www.hydro.mb.ca/",
            "customer_service/rates/",
        ),
        utility(
            "saskatchewan",
            "Saskatchewan",
            "SaskPower",
            "https://www.saskpower.com/",
            "our-company/about-us/rates-and-fuels/",
        ),
        utility(
            "nova_scotia",
            "Nova Scotia",
            "Nova Scotia Power",
            "https://www.nspower.ca/",
            "en/home/customer-service/rates-and-billing/rates",
        ),
        utility(
            "new_brunswick",
            "New Brunswick",
            "NB Power",
            "https://www.nbpower.com/",
            "en/home/customer-service/rates-and-billing/rates",
        ),
        utility(
            "newfoundland_labrador",
            "Newfoundland & Labrador",
            "NL Hydro",
            "https://www.nlhydro.com/",
            "customer-service/rates/",
        ),
        utility(
            "prince_edward_island",
            "Prince Edward Island",
            "Maritime Electric",
            "https://www.maritimeelectric.com/",
            "en/home/customer-service/rates-and-billing/rates",
        ),
        utility(
            "northwest_territories",
            "Northwest Territories",
            "NT Power",
            "https://www.ntpc.com/",
            "rates/",
        ),
        utility(
            "nunavut",
            "Nunavut",
            "Qulliq Energy",
            "https://www.qec.nu.ca/",
            "customer-service/rates/",
        ),
        utility(
            "yukon",
            "Yukon",
            "Yukon Energy",
            "https://www.yukonenergy.ca/",
            "customer-service/rates/",
        ),
        SourceDescriptor {
            currency: "USD".to_string(),
            endpoints: vec![
                Endpoint::new(
                    "retail_price",
                    "electricity/retail-sales/data/?frequency=monthly&data[0]=price\
                     &facets[sectorid][]=RES&sort[0][column]=period&sort[0][direction]=desc&length=5",
                ),
                Endpoint::new(
                    "state_retail_prices",
                    "electricity/retail-sales/data/?frequency=monthly&data[0]=price\
                     &facets[stateid][]=CA&facets[stateid][]=TX&facets[stateid][]=NY\
                     &facets[sectorid][]=RES&sort[0][column]=period&sort[0][direction]=desc&length=3",
                )
                .take(3)
                .optional(),
            ],
            strategies: vec![Strategy::JsonPointer {
                pointer: "/response/data".into(),
                field: Some("price".into()),
            }],
            api_key: Some(ApiKey {
                param: "api_key".into(),
                env: "EIA_API_KEY".into(),
                required: true,
                value: None,
            }),
            ..region(
                "united_states",
                "United States",
                "EIA (Energy Information Administration)",
                "https://api.eia.gov/v2/",
                Cadence::Periodic,
            )
        },
        SourceDescriptor {
            currency: "EUR".to_string(),
            endpoints: vec![Endpoint::new(
                "day_ahead_price",
                "api?documentType=A44&in_Domain=10Y1001A1001A82H&out_Domain=10Y1001A1001A82H\
                 &periodStart={today}&periodEnd={tomorrow}",
            )
            .take(24)],
            strategies: vec![Strategy::raw_regex(
                r"<price\.amount>(?P<value>-?\d+(?:\.\d+)?)</price\.amount>",
            )],
            api_key: Some(ApiKey {
                param: "securityToken".into(),
                env: "ENTSOE_SECURITY_TOKEN".into(),
                required: true,
                value: None,
            }),
            ..region(
                "europe",
                "Europe (DE-LU)",
                "ENTSO-E",
                "https://web-api.tp.entsoe.eu/",
                Cadence::Daily,
            )
        },
    ]
}
