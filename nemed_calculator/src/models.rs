use crate::error::NemedError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Label used for the synthetic whole-of-market region.
pub const MARKET_REGION: &str = "NEM";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DispatchType {
    Generator,
    Load,
}

impl DispatchType {
    /// Parse the MMS `DISPATCHTYPE` / registration list spelling.
    pub fn from_mms(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GENERATOR" => Some(DispatchType::Generator),
            "LOAD" => Some(DispatchType::Load),
            _ => None,
        }
    }
}

/// Raw DISPATCHLOAD row (market target at the start of the interval).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchLoadRow {
    pub unit_id: String,
    pub interval_end: NaiveDateTime,
    pub initial_mw: Option<f64>,
    pub intervention: bool,
}

/// Raw DISPATCH_UNIT_SCADA row (measured output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScadaRow {
    pub unit_id: String,
    pub interval_end: NaiveDateTime,
    pub scada_mw: Option<f64>,
}

/// Reconciled dispatch value, at most one per (unit, interval_end).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchObservation {
    pub unit_id: String,
    pub interval_end: NaiveDateTime,
    pub dispatch_mw: f64,
}

/// Raw DUDETAILSUMMARY row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitDetailRow {
    pub unit_id: String,
    pub start_date: NaiveDateTime,
    pub dispatch_type: DispatchType,
    pub region: String,
}

/// Registration list fuel/technology descriptors for a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorInfoRow {
    pub unit_id: String,
    pub dispatch_type: Option<DispatchType>,
    pub fuel_source: Option<String>,
    pub technology: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuxLoadRow {
    pub effective_from: NaiveDate,
    pub unit_id: String,
    pub pct_aux_load: Option<f64>,
}

/// Static attributes of a dispatchable unit, joined from the reference tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitReference {
    pub unit_id: String,
    pub region: String,
    pub dispatch_type: DispatchType,
    pub fuel_source: Option<String>,
    pub technology: Option<String>,
    pub aux_load_pct: Option<f64>,
}

impl UnitReference {
    pub fn is_generator(&self) -> bool {
        self.dispatch_type == DispatchType::Generator
    }

    /// Units known only from the registration list have no region.
    pub fn has_region(&self) -> bool {
        !self.region.is_empty()
    }

    /// Share of as-generated energy that is sent out. Missing aux load means 0%.
    pub fn sent_out_fraction(&self) -> f64 {
        (100.0 - self.aux_load_pct.unwrap_or(0.0)) / 100.0
    }

    pub fn is_hydro(&self) -> bool {
        self.fuel_source.as_deref().map_or(false, is_hydro_label)
    }
}

/// Raw DUALLOC row mapping a generating set onto its DUID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GensetMapping {
    pub effective_date: NaiveDateTime,
    pub unit_id: String,
    pub genset_id: String,
}

/// Raw GENUNITS row as published for one month.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GensetFactorRow {
    pub genset_id: String,
    pub year: i32,
    pub month: u32,
    pub intensity: Option<f64>,
    pub energy_source: Option<String>,
}

/// Monthly CO2-e intensity (tCO2-e/MWh) of a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmissionsFactorRecord {
    pub unit_id: String,
    pub year: i32,
    pub month: u32,
    pub intensity: Option<f64>,
    pub energy_source: Option<String>,
}

impl EmissionsFactorRecord {
    pub fn is_hydro(&self) -> bool {
        self.energy_source.as_deref().map_or(false, is_hydro_label)
    }
}

/// Whole-word match, so "Hydro - Gravity" counts and "Hydrogen" does not.
pub fn is_hydro_label(label: &str) -> bool {
    label
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word.eq_ignore_ascii_case("hydro"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntervalEmissionRecord {
    pub unit_id: String,
    pub interval_end: NaiveDateTime,
    pub region: String,
    pub energy_mwh: f64,
    pub energy_sent_out_mwh: Option<f64>,
    pub emissions_intensity: Option<f64>,
    pub total_emissions: Option<f64>,
}

impl IntervalEmissionRecord {
    /// Energy the emissions were computed against.
    pub fn accounted_energy(&self) -> f64 {
        self.energy_sent_out_mwh.unwrap_or(self.energy_mwh)
    }
}

/// One unit's contribution to setting the energy price in an interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSettingRecord {
    pub period_id: NaiveDateTime,
    pub region: String,
    pub unit_id: String,
    /// Marginal MW change of the unit for a 1 MW regional demand increase.
    pub increase: Option<f64>,
    pub price: Option<f64>,
    /// Offer band the unit was dispatched in and its price at the regional node.
    pub band_no: Option<i64>,
    pub rrn_band_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Granularity {
    #[default]
    Interval,
    Hour,
    Day,
    Month,
    Year,
}

impl Granularity {
    pub const ALL: [Granularity; 5] = [
        Granularity::Interval,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Month,
        Granularity::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Interval => "interval",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }
}

impl FromStr for Granularity {
    type Err = NemedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interval" => Ok(Granularity::Interval),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(NemedError::Validation(format!(
                "invalid granularity '{}'. Must be one of [interval, hour, day, month, year]",
                other
            ))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Regional totals for one time bucket `[time_begin, time_end)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedSeriesRecord {
    pub time_begin: NaiveDateTime,
    pub time_end: NaiveDateTime,
    pub region: String,
    pub energy: f64,
    pub total_emissions: f64,
    pub intensity_index: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarginalEmissionRecord {
    pub interval_end: NaiveDateTime,
    pub region: String,
    pub intensity_index: f64,
    pub dominant_unit_id: String,
    pub dominant_energy_source: Option<String>,
    pub dominant_technology: Option<String>,
    pub price: Option<f64>,
    pub dominant_band_no: Option<i64>,
    pub dominant_band_price: Option<f64>,
}

/// Result of a total-emissions request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalEmissions {
    pub granularity: Granularity,
    pub unit_records: Vec<IntervalEmissionRecord>,
    pub series: Vec<AggregatedSeriesRecord>,
}

impl TotalEmissions {
    pub fn empty(granularity: Granularity) -> Self {
        Self {
            granularity,
            unit_records: vec![],
            series: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Regions present in the series, in sorted order.
    pub fn regions(&self) -> Vec<&str> {
        let mut regions: Vec<&str> = self.series.iter().map(|r| r.region.as_str()).collect();
        regions.sort_unstable();
        regions.dedup();
        regions
    }

    pub fn series_for(&self, region: &str) -> Vec<&AggregatedSeriesRecord> {
        self.series.iter().filter(|r| r.region == region).collect()
    }
}
