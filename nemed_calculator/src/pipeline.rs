//! Public entry points: month-chunked total emissions and marginal emissions.

use crate::aggregator::Aggregator;
use crate::cache::ChunkCache;
use crate::calculator::EmissionsCalculator;
use crate::config::{MarginalOptions, PipelineConfig, TotalEmissionsRequest};
use crate::data_loader::{CacheOnly, MarketDataSource, ParquetDataLoader};
use crate::error::Result;
use crate::intervals::{format_market_time, month_chunks, parse_market_time, validate_range};
use crate::marginal::MarginalResolver;
use crate::models::{MarginalEmissionRecord, TotalEmissions};
use chrono::NaiveDateTime;
use log::{info, warn};
use std::path::{Path, PathBuf};

pub struct Pipeline<S: MarketDataSource = ParquetDataLoader> {
    source: S,
    config: PipelineConfig,
    cache: ChunkCache,
}

impl Pipeline<ParquetDataLoader> {
    /// Raw tables and chunk files both live in `cache_dir`.
    pub fn from_cache_dir(cache_dir: impl Into<PathBuf>, config: PipelineConfig) -> Result<Self> {
        let cache_dir = cache_dir.into();
        let loader = ParquetDataLoader::new(&cache_dir, CacheOnly)?;
        Self::new(loader, config, cache_dir)
    }

    /// Raw tables are mirrored from `archive_dir` into `cache_dir` on demand.
    pub fn with_archive(
        cache_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let cache_dir = cache_dir.into();
        let loader = ParquetDataLoader::from_archive(&cache_dir, archive_dir)?;
        Self::new(loader, config, cache_dir)
    }
}

impl<S: MarketDataSource> Pipeline<S> {
    pub fn new(source: S, config: PipelineConfig, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            cache: ChunkCache::new(cache_dir)?,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Unit-level records and the aggregated series for `(start, end]`.
    ///
    /// The range is processed one calendar month at a time; each month's unit
    /// records are read from, or written to, the chunk cache.
    pub fn total_emissions(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        request: &TotalEmissionsRequest,
    ) -> Result<TotalEmissions> {
        validate_range(start, end)?;

        let calculator = EmissionsCalculator::new(request.emissions_options(&self.config));
        let metric = format!("total_emissions_{}", calculator.options().variant_tag());

        let mut unit_records = Vec::new();
        for (chunk_start, chunk_end) in month_chunks(start, end) {
            info!(
                "Processing total emissions from {} to {}",
                format_market_time(chunk_start),
                format_market_time(chunk_end)
            );
            let records = self.cache.get_or_compute(&metric, chunk_start, chunk_end, || {
                calculator.compute(&self.source, chunk_start, chunk_end)
            })?;
            unit_records.extend(records);
        }

        if unit_records.is_empty() {
            warn!("Total emissions result is empty for the requested range");
            return Ok(TotalEmissions::empty(request.granularity));
        }

        let include_market_total = calculator.options().regions().is_none();
        let series = Aggregator::from_config(&self.config).aggregate(
            &unit_records,
            request.granularity,
            include_market_total,
        );
        info!(
            "Aggregated {} unit records into {} {} rows",
            unit_records.len(),
            series.len(),
            request.granularity
        );

        Ok(TotalEmissions {
            granularity: request.granularity,
            unit_records,
            series,
        })
    }

    pub fn marginal_emissions(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<MarginalEmissionRecord>> {
        MarginalResolver::new(MarginalOptions::from(&self.config)).compute(&self.source, start, end)
    }

    /// As `total_emissions`, taking `yyyy/mm/dd HH:MM` strings.
    pub fn get_total_emissions(&self, start: &str, end: &str, request: &TotalEmissionsRequest) -> Result<TotalEmissions> {
        let start = parse_market_time(start, "start_time")?;
        let end = parse_market_time(end, "end_time")?;
        self.total_emissions(start, end, request)
    }

    pub fn get_marginal_emissions(&self, start: &str, end: &str) -> Result<Vec<MarginalEmissionRecord>> {
        let start = parse_market_time(start, "start_time")?;
        let end = parse_market_time(end, "end_time")?;
        self.marginal_emissions(start, end)
    }
}

/// Total emissions over raw tables already present in `cache`.
pub fn get_total_emissions(
    start: &str,
    end: &str,
    cache: &Path,
    request: &TotalEmissionsRequest,
) -> Result<TotalEmissions> {
    Pipeline::from_cache_dir(cache, PipelineConfig::default())?.get_total_emissions(start, end, request)
}

/// Marginal emissions over price setter files already present in `cache`.
pub fn get_marginal_emissions(start: &str, end: &str, cache: &Path) -> Result<Vec<MarginalEmissionRecord>> {
    Pipeline::from_cache_dir(cache, PipelineConfig::default())?.get_marginal_emissions(start, end)
}
