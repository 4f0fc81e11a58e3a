use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::domain::{Granularity, MarketConvention, SourceId};
use crate::pipeline::normalize::{DisaggregationPolicy, SourceSchema};
use crate::pipeline::{AcceptanceConfig, MergePolicies};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub run: RunConfig,
    pub export: ExportConfig,
    pub sim: SimConfig,
}

/// Everything one pipeline run needs besides its delivery range.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RunConfig {
    pub market: MarketConvention,
    /// Longest delivery range a single run may cover, in days.
    pub max_span_days: u32,
    /// Days ahead covered by the default scheduled run.
    pub horizon_days: i64,
    #[validate(nested)]
    pub sources: SourcesConfig,
    pub merge: MergePolicies,
    #[validate(nested)]
    pub acceptance: AcceptanceConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            market: MarketConvention::default(),
            max_span_days: 14,
            horizon_days: 7,
            sources: SourcesConfig::default(),
            merge: MergePolicies::default(),
            acceptance: AcceptanceConfig::default(),
        }
    }
}

/// Per-source feed schemas. Defaults match the simulated ERCOT-style feeds.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SourcesConfig {
    #[validate(nested)]
    pub solar: SourceSchema,
    #[validate(nested)]
    pub wind: SourceSchema,
    #[validate(nested)]
    pub load: SourceSchema,
}

impl SourcesConfig {
    pub fn for_source(&self, source: SourceId) -> &SourceSchema {
        match source {
            SourceId::Solar => &self.solar,
            SourceId::Wind => &self.wind,
            SourceId::Load => &self.load,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            solar: SourceSchema {
                unit: "MW".to_string(),
                granularity: Granularity::Hourly,
                disaggregation: DisaggregationPolicy::Repeat,
                timestamp_field: None,
                date_field: Some("DELIVERY_DATE".to_string()),
                hour_field: Some("HOUR_ENDING".to_string()),
                value_field: "COP_HSL_SYSTEM_WIDE".to_string(),
                published_field: None,
                max_drop_fraction: 0.25,
            },
            wind: SourceSchema {
                unit: "MW".to_string(),
                granularity: Granularity::PerInterval,
                disaggregation: DisaggregationPolicy::Repeat,
                timestamp_field: Some("intervalEnding".to_string()),
                date_field: None,
                hour_field: None,
                value_field: "systemWide".to_string(),
                published_field: Some("postedDatetime".to_string()),
                max_drop_fraction: 0.25,
            },
            load: SourceSchema {
                unit: "MW".to_string(),
                granularity: Granularity::Hourly,
                disaggregation: DisaggregationPolicy::SplitEven,
                timestamp_field: None,
                date_field: Some("DeliveryDate".to_string()),
                hour_field: Some("HourEnding".to_string()),
                value_field: "SystemTotal".to_string(),
                published_field: None,
                max_drop_fraction: 0.25,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/runs"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

impl Config {
    /// Load configuration: built-in defaults, then the optional TOML file,
    /// then `GRIDCAST__`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/gridcast.toml"))
            .merge(Env::prefixed("GRIDCAST__").split("__"));
        let cfg: Config = figment.extract()?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Cross-field checks `validator` cannot express.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if let Err(msg) = self.run.market.validate() {
            anyhow::bail!("invalid market convention: {msg}");
        }
        for source in [SourceId::Solar, SourceId::Wind, SourceId::Load] {
            if let Err(msg) = self.run.sources.for_source(source).check_fields() {
                anyhow::bail!("invalid schema for {source}: {msg}");
            }
        }
        if self.run.max_span_days == 0 {
            anyhow::bail!("max_span_days must be at least 1");
        }
        if self.run.horizon_days < 1 || self.run.horizon_days > self.run.max_span_days as i64 {
            anyhow::bail!(
                "horizon_days must be between 1 and max_span_days ({})",
                self.run.max_span_days
            );
        }
        Ok(())
    }
}
