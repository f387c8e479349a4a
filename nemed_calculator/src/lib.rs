pub mod aggregator;
pub mod cache;
pub mod calculator;
pub mod config;
pub mod data_loader;
pub mod dispatch;
pub mod error;
pub mod intervals;
pub mod marginal;
pub mod models;
pub mod pipeline;
pub mod unit_mapping;

pub use aggregator::{aggregate, to_region_table, Aggregator, EnergyEmissions, SeriesMetric};
pub use cache::{ChunkCache, ChunkNaming, DefaultChunkNaming};
pub use calculator::{compute_interval_emissions, EmissionsCalculator};
pub use config::{EmissionsOptions, MarginalOptions, OverwritePolicy, PipelineConfig, ReconciliationConfig, TotalEmissionsRequest};
pub use data_loader::{ArchiveMirror, CacheOnly, MarketDataSource, ParquetDataLoader, RawFileStrategy};
pub use error::{NemedError, Result};
pub use marginal::{compute_marginal_emissions, MarginalResolver};
pub use models::{
    AggregatedSeriesRecord, Granularity, IntervalEmissionRecord, MarginalEmissionRecord, TotalEmissions,
};
pub use pipeline::{get_marginal_emissions, get_total_emissions, Pipeline};
