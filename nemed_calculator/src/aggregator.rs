//! Regional aggregation and calendar resampling.

use crate::config::PipelineConfig;
use crate::data_loader::datetime_series;
use crate::error::Result;
use crate::intervals::{
    dispatch_interval, interval_start, start_of_day, start_of_hour, start_of_month,
    start_of_next_month, start_of_next_year, start_of_year,
};
use crate::models::{AggregatedSeriesRecord, Granularity, IntervalEmissionRecord, MARKET_REGION};
use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Accessors the aggregator reduces over.
pub trait EnergyEmissions {
    /// Start of the period the record covers; decides bucket membership.
    fn period_start(&self) -> NaiveDateTime;
    fn period_end(&self) -> NaiveDateTime;
    fn region(&self) -> &str;
    fn energy(&self) -> f64;
    /// Null emissions count as zero.
    fn emissions(&self) -> f64;
}

impl EnergyEmissions for IntervalEmissionRecord {
    fn period_start(&self) -> NaiveDateTime {
        interval_start(self.interval_end)
    }

    fn period_end(&self) -> NaiveDateTime {
        self.interval_end
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn energy(&self) -> f64 {
        self.accounted_energy()
    }

    fn emissions(&self) -> f64 {
        self.total_emissions.unwrap_or(0.0)
    }
}

impl EnergyEmissions for AggregatedSeriesRecord {
    fn period_start(&self) -> NaiveDateTime {
        self.time_begin
    }

    fn period_end(&self) -> NaiveDateTime {
        self.time_end
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn energy(&self) -> f64 {
        self.energy
    }

    fn emissions(&self) -> f64 {
        self.total_emissions
    }
}

/// Calendar bucket `[begin, end)` containing `start`.
pub fn bucket_bounds(granularity: Granularity, start: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    match granularity {
        Granularity::Interval => (start, start + dispatch_interval()),
        Granularity::Hour => {
            let begin = start_of_hour(start);
            (begin, begin + Duration::hours(1))
        }
        Granularity::Day => {
            let begin = start_of_day(start);
            (begin, begin + Duration::days(1))
        }
        Granularity::Month => (start_of_month(start), start_of_next_month(start)),
        Granularity::Year => (start_of_year(start), start_of_next_year(start)),
    }
}

pub fn intensity_index(energy: f64, emissions: f64) -> f64 {
    if energy == 0.0 {
        0.0
    } else {
        emissions / energy
    }
}

fn round_to(value: f64, precision: Option<u32>) -> f64 {
    match precision {
        Some(places) => {
            let scale = 10f64.powi(places as i32);
            (value * scale).round() / scale
        }
        None => value,
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    end: Option<NaiveDateTime>,
    energy: f64,
    emissions: f64,
}

impl Totals {
    fn add(&mut self, end: NaiveDateTime, energy: f64, emissions: f64) {
        self.end = Some(self.end.map_or(end, |e| e.max(end)));
        self.energy += energy;
        self.emissions += emissions;
    }
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    precision: Option<u32>,
    market_label: String,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            precision: Some(2),
            market_label: MARKET_REGION.to_string(),
        }
    }
}

impl Aggregator {
    pub fn new(precision: Option<u32>, market_label: impl Into<String>) -> Self {
        Self {
            precision,
            market_label: market_label.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.decimal_precision, config.market_region_label.clone())
    }

    /// Sum records into `(bucket, region)` totals, sorted by `(time_begin, region)`.
    ///
    /// With `include_market_total` a whole-market region is added per bucket,
    /// unless the input already carries that label.
    pub fn aggregate<R: EnergyEmissions>(
        &self,
        records: &[R],
        granularity: Granularity,
        include_market_total: bool,
    ) -> Vec<AggregatedSeriesRecord> {
        let already_totalled = records.iter().any(|r| r.region() == self.market_label);
        let add_market = include_market_total && !already_totalled;

        let mut buckets: BTreeMap<(NaiveDateTime, String), Totals> = BTreeMap::new();
        for record in records {
            let (begin, end) = match granularity {
                Granularity::Interval => (record.period_start(), record.period_end()),
                other => bucket_bounds(other, record.period_start()),
            };
            let (energy, emissions) = (record.energy(), record.emissions());

            buckets
                .entry((begin, record.region().to_string()))
                .or_default()
                .add(end, energy, emissions);
            if add_market {
                buckets
                    .entry((begin, self.market_label.clone()))
                    .or_default()
                    .add(end, energy, emissions);
            }
        }

        buckets
            .into_iter()
            .map(|((time_begin, region), totals)| AggregatedSeriesRecord {
                time_begin,
                time_end: totals.end.unwrap_or(time_begin),
                region,
                energy: round_to(totals.energy, self.precision),
                total_emissions: round_to(totals.emissions, self.precision),
                intensity_index: round_to(intensity_index(totals.energy, totals.emissions), self.precision),
            })
            .collect()
    }

    /// As `aggregate`, parsing the granularity from its name.
    pub fn aggregate_by<R: EnergyEmissions>(
        &self,
        records: &[R],
        by: &str,
        include_market_total: bool,
    ) -> Result<Vec<AggregatedSeriesRecord>> {
        let granularity: Granularity = by.parse()?;
        Ok(self.aggregate(records, granularity, include_market_total))
    }
}

/// Aggregate with default precision, including the whole-market region.
pub fn aggregate<R: EnergyEmissions>(records: &[R], granularity: Granularity) -> Vec<AggregatedSeriesRecord> {
    Aggregator::default().aggregate(records, granularity, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesMetric {
    Energy,
    TotalEmissions,
    IntensityIndex,
}

impl SeriesMetric {
    pub const ALL: [SeriesMetric; 3] = [
        SeriesMetric::Energy,
        SeriesMetric::TotalEmissions,
        SeriesMetric::IntensityIndex,
    ];

    pub fn column_name(&self) -> &'static str {
        match self {
            SeriesMetric::Energy => "Energy",
            SeriesMetric::TotalEmissions => "Total_Emissions",
            SeriesMetric::IntensityIndex => "Intensity_Index",
        }
    }

    fn value(&self, record: &AggregatedSeriesRecord) -> f64 {
        match self {
            SeriesMetric::Energy => record.energy,
            SeriesMetric::TotalEmissions => record.total_emissions,
            SeriesMetric::IntensityIndex => record.intensity_index,
        }
    }
}

/// Wide table of one metric: `TimeBeginning`, `TimeEnding`, then one column
/// per region. Regions without a value in a bucket are null.
pub fn to_region_table(series: &[AggregatedSeriesRecord], metric: SeriesMetric) -> Result<DataFrame> {
    let regions: BTreeSet<&str> = series.iter().map(|r| r.region.as_str()).collect();

    let mut rows: BTreeMap<NaiveDateTime, (NaiveDateTime, BTreeMap<&str, f64>)> = BTreeMap::new();
    for record in series {
        rows.entry(record.time_begin)
            .or_insert_with(|| (record.time_end, BTreeMap::new()))
            .1
            .insert(record.region.as_str(), metric.value(record));
    }

    let begins: Vec<NaiveDateTime> = rows.keys().copied().collect();
    let ends: Vec<NaiveDateTime> = rows.values().map(|(end, _)| *end).collect();

    let mut columns = vec![
        datetime_series("TimeBeginning", &begins)?,
        datetime_series("TimeEnding", &ends)?,
    ];
    for region in regions {
        let values: Vec<Option<f64>> = rows.values().map(|(_, v)| v.get(region).copied()).collect();
        columns.push(Series::new(region.into(), values));
    }

    Ok(DataFrame::new(columns)?)
}
