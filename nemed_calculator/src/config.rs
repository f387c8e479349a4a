//! Pipeline configuration.
//!
//! Configuration is passed explicitly to every stage; nothing here is global.
//! `PipelineConfig` can be loaded from a JSON file where every field is
//! optional.

use crate::error::{NemedError, Result};
use crate::models::{Granularity, MARKET_REGION};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pseudo-unit reported by the price setter files for Basslink flows.
pub const BASSLINK_UNIT_ID: &str = "T-V-MNSP1";

/// Which value wins when INITIALMW and SCADAVALUE disagree beyond tolerance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    InitialMw,
    #[default]
    Scada,
    Average,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub use_initialmw: bool,
    pub use_scada: bool,
    pub overwrite: OverwritePolicy,
    /// Sources closer than this (MW) are considered to agree.
    pub tolerance_mw: f64,
    pub clamp_negative: bool,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            use_initialmw: false,
            use_scada: true,
            overwrite: OverwritePolicy::Scada,
            tolerance_mw: 1.0,
            clamp_negative: true,
        }
    }
}

impl ReconciliationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.use_initialmw && !self.use_scada {
            return Err(NemedError::validation(
                "No dispatch source selected. At least one of use_initialmw or use_scada must be set",
            ));
        }
        if !(self.tolerance_mw >= 0.0) {
            return Err(NemedError::validation("tolerance_mw must be a non-negative number"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub reconciliation: ReconciliationConfig,
    /// Decimal places applied to aggregated output; `None` keeps full precision.
    pub decimal_precision: Option<u32>,
    pub market_region_label: String,
    pub excluded_price_setters: Vec<String>,
    pub drop_missing_factor: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reconciliation: ReconciliationConfig::default(),
            decimal_precision: Some(2),
            market_region_label: MARKET_REGION.to_string(),
            excluded_price_setters: vec![BASSLINK_UNIT_ID.to_string()],
            drop_missing_factor: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.reconciliation.validate()?;
        if self.market_region_label.trim().is_empty() {
            return Err(NemedError::validation("market_region_label must not be empty"));
        }
        Ok(())
    }
}

/// Switches for the interval emissions calculator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmissionsOptions {
    pub region_filter: Option<Vec<String>>,
    pub sent_out: bool,
    pub use_ramp: bool,
    pub drop_missing_factor: bool,
    pub reconciliation: ReconciliationConfig,
}

impl Default for EmissionsOptions {
    fn default() -> Self {
        Self {
            region_filter: None,
            sent_out: true,
            use_ramp: true,
            drop_missing_factor: true,
            reconciliation: ReconciliationConfig::default(),
        }
    }
}

impl EmissionsOptions {
    /// The region filter, treating an empty list as no filter.
    pub fn regions(&self) -> Option<&[String]> {
        self.region_filter
            .as_deref()
            .filter(|regions| !regions.is_empty())
    }

    /// Short tag of every switch that changes calculator output, used to keep
    /// cached chunks for different option sets apart.
    pub fn variant_tag(&self) -> String {
        let mut parts = vec![
            if self.sent_out { "so" } else { "ag" }.to_string(),
            if self.use_ramp { "ramp" } else { "step" }.to_string(),
            if self.drop_missing_factor { "drop" } else { "keep" }.to_string(),
        ];
        let r = &self.reconciliation;
        if *r != ReconciliationConfig::default() {
            let sources = format!(
                "{}{}",
                if r.use_initialmw { "i" } else { "" },
                if r.use_scada { "s" } else { "" }
            );
            let negative = if r.clamp_negative { "" } else { "-neg" };
            parts.push(
                format!("{}-{:?}-{}{}", sources, r.overwrite, r.tolerance_mw, negative).to_lowercase(),
            );
        }
        if let Some(regions) = self.regions() {
            let mut sorted: Vec<String> = regions.iter().map(|r| r.to_uppercase()).collect();
            sorted.sort();
            sorted.dedup();
            parts.push(sorted.join("-"));
        }
        parts.join("_")
    }
}

/// Caller-facing parameters of `get_total_emissions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TotalEmissionsRequest {
    pub region_filter: Option<Vec<String>>,
    pub granularity: Granularity,
    pub sent_out: bool,
    pub use_ramp: bool,
}

impl Default for TotalEmissionsRequest {
    fn default() -> Self {
        Self {
            region_filter: None,
            granularity: Granularity::Interval,
            sent_out: true,
            use_ramp: true,
        }
    }
}

impl TotalEmissionsRequest {
    pub fn emissions_options(&self, config: &PipelineConfig) -> EmissionsOptions {
        EmissionsOptions {
            region_filter: self.region_filter.clone(),
            sent_out: self.sent_out,
            use_ramp: self.use_ramp,
            drop_missing_factor: config.drop_missing_factor,
            reconciliation: config.reconciliation.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarginalOptions {
    /// Non-generating pseudo-units never weighted into the marginal intensity.
    pub excluded_units: Vec<String>,
}

impl Default for MarginalOptions {
    fn default() -> Self {
        Self {
            excluded_units: vec![BASSLINK_UNIT_ID.to_string()],
        }
    }
}

impl From<&PipelineConfig> for MarginalOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            excluded_units: config.excluded_price_setters.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "decimal_precision": 4, "reconciliation": { "overwrite": "average" } }"#)
                .unwrap();
        assert_eq!(config.decimal_precision, Some(4));
        assert_eq!(config.reconciliation.overwrite, OverwritePolicy::Average);
        assert!(config.reconciliation.use_scada);
        assert_eq!(config.reconciliation.tolerance_mw, 1.0);
        assert_eq!(config.market_region_label, "NEM");
        assert_eq!(config.excluded_price_setters, vec![BASSLINK_UNIT_ID.to_string()]);
    }

    #[test]
    fn test_no_source_is_rejected() {
        let config = ReconciliationConfig {
            use_initialmw: false,
            use_scada: false,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_variant_tag_distinguishes_options() {
        let base = EmissionsOptions::default();
        assert_eq!(base.variant_tag(), "so_ramp_drop");

        let filtered = EmissionsOptions {
            region_filter: Some(vec!["vic1".to_string(), "NSW1".to_string()]),
            use_ramp: false,
            ..Default::default()
        };
        assert_eq!(filtered.variant_tag(), "so_step_drop_NSW1-VIC1");

        let empty_filter = EmissionsOptions {
            region_filter: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(empty_filter.variant_tag(), base.variant_tag());

        let averaged = EmissionsOptions {
            reconciliation: ReconciliationConfig {
                use_initialmw: true,
                overwrite: OverwritePolicy::Average,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_ne!(averaged.variant_tag(), base.variant_tag());
    }
}
