//! On-disk memoisation of month-chunk results.
//!
//! One file per `(metric, chunk)`. A present file is a valid hit; there is no
//! staleness check, so clearing the directory is the only way to refresh.

use crate::data_loader::{datetime_column, datetime_series, f64_column, read_parquet, string_column};
use crate::error::{NemedError, Result};
use crate::models::IntervalEmissionRecord;
use chrono::NaiveDateTime;
use log::{debug, info};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const CHUNK_TIME_FORMAT: &str = "%Y%m%d%H%M";

const COLUMNS: [&str; 7] = [
    "unit_id",
    "interval_end",
    "region",
    "energy_mwh",
    "energy_sent_out_mwh",
    "emissions_intensity",
    "total_emissions",
];

pub trait ChunkNaming {
    fn chunk_file_name(&self, metric: &str, start: NaiveDateTime, end: NaiveDateTime) -> String;
}

/// `<metric>_<YYYYMMDDHHMM>_<YYYYMMDDHHMM>.parquet`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultChunkNaming;

impl ChunkNaming for DefaultChunkNaming {
    fn chunk_file_name(&self, metric: &str, start: NaiveDateTime, end: NaiveDateTime) -> String {
        format!(
            "{}_{}_{}.parquet",
            metric,
            start.format(CHUNK_TIME_FORMAT),
            end.format(CHUNK_TIME_FORMAT)
        )
    }
}

pub struct ChunkCache {
    dir: PathBuf,
    naming: Box<dyn ChunkNaming>,
}

impl ChunkCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_naming(dir, DefaultChunkNaming)
    }

    pub fn with_naming(dir: impl Into<PathBuf>, naming: impl ChunkNaming + 'static) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            naming: Box::new(naming),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, metric: &str, start: NaiveDateTime, end: NaiveDateTime) -> PathBuf {
        self.dir.join(self.naming.chunk_file_name(metric, start, end))
    }

    pub fn read(&self, metric: &str, start: NaiveDateTime, end: NaiveDateTime) -> Result<Option<Vec<IntervalEmissionRecord>>> {
        let path = self.path_for(metric, start, end);
        if !path.exists() {
            return Ok(None);
        }
        let df = read_parquet(&path, &COLUMNS)?;
        Ok(Some(records_from_frame(&df)?))
    }

    pub fn write(
        &self,
        metric: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        records: &[IntervalEmissionRecord],
    ) -> Result<PathBuf> {
        let path = self.path_for(metric, start, end);
        let mut df = records_to_frame(records)?;

        // Written under a temporary name so a partial file is never a hit
        let partial = path.with_extension("parquet.partial");
        {
            let mut file = File::create(&partial)?;
            ParquetWriter::new(&mut file).finish(&mut df)?;
        }
        fs::rename(&partial, &path)?;
        debug!("Wrote {} records to {}", records.len(), path.display());
        Ok(path)
    }

    /// Cached chunk, or `compute` followed by a write.
    pub fn get_or_compute<F>(
        &self,
        metric: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        compute: F,
    ) -> Result<Vec<IntervalEmissionRecord>>
    where
        F: FnOnce() -> Result<Vec<IntervalEmissionRecord>>,
    {
        if let Some(records) = self.read(metric, start, end)? {
            info!(
                "Cache hit for {} ({} records)",
                self.naming.chunk_file_name(metric, start, end),
                records.len()
            );
            return Ok(records);
        }
        let records = compute()?;
        self.write(metric, start, end, &records)?;
        Ok(records)
    }
}

fn records_to_frame(records: &[IntervalEmissionRecord]) -> Result<DataFrame> {
    let times: Vec<NaiveDateTime> = records.iter().map(|r| r.interval_end).collect();
    let df = DataFrame::new(vec![
        Series::new("unit_id".into(), records.iter().map(|r| r.unit_id.clone()).collect::<Vec<_>>()),
        datetime_series("interval_end", &times)?,
        Series::new("region".into(), records.iter().map(|r| r.region.clone()).collect::<Vec<_>>()),
        Series::new("energy_mwh".into(), records.iter().map(|r| r.energy_mwh).collect::<Vec<_>>()),
        Series::new(
            "energy_sent_out_mwh".into(),
            records.iter().map(|r| r.energy_sent_out_mwh).collect::<Vec<_>>(),
        ),
        Series::new(
            "emissions_intensity".into(),
            records.iter().map(|r| r.emissions_intensity).collect::<Vec<_>>(),
        ),
        Series::new(
            "total_emissions".into(),
            records.iter().map(|r| r.total_emissions).collect::<Vec<_>>(),
        ),
    ])?;
    Ok(df)
}

fn records_from_frame(df: &DataFrame) -> Result<Vec<IntervalEmissionRecord>> {
    let units = string_column(df, "unit_id")?;
    let times = datetime_column(df, "interval_end")?;
    let regions = string_column(df, "region")?;
    let energy = f64_column(df, "energy_mwh")?;
    let sent_out = f64_column(df, "energy_sent_out_mwh")?;
    let intensity = f64_column(df, "emissions_intensity")?;
    let emissions = f64_column(df, "total_emissions")?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(unit_id), Some(interval_end), Some(region), Some(energy_mwh)) =
            (units[i].clone(), times[i], regions[i].clone(), energy[i])
        else {
            return Err(NemedError::NoData(format!("incomplete cached record at row {}", i)));
        };
        records.push(IntervalEmissionRecord {
            unit_id,
            interval_end,
            region,
            energy_mwh,
            energy_sent_out_mwh: sent_out[i],
            emissions_intensity: intensity[i],
            total_emissions: emissions[i],
        });
    }
    Ok(records)
}
