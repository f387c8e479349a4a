//! Raw market data acquisition.
//!
//! `MarketDataSource` is the seam the calculators fetch through. The shipped
//! implementation, `ParquetDataLoader`, reads the monthly Parquet tables the
//! ingest binary writes, the aux-load and registration CSVs, and the daily
//! price-setter JSON files. Files are looked up in a cache directory first and
//! obtained through a `RawFileStrategy` when absent.

use crate::error::{NemedError, Result};
use crate::intervals::{from_millis, IntervalRange};
use crate::models::{
    AuxLoadRow, DispatchLoadRow, DispatchType, EmissionsFactorRecord, GeneratorInfoRow,
    GensetFactorRow, GensetMapping, PriceSettingRecord, ScadaRow, UnitDetailRow,
};
use crate::unit_mapping::map_genset_factors;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use polars::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// First month GENUNITS carries emissions factors.
pub const GENUNITS_EPOCH: (i32, u32, u32) = (2011, 5, 1);
/// First month of the DISPATCH tables in the MMS archive.
pub const DISPATCH_EPOCH: (i32, u32, u32) = (2009, 7, 1);
/// First day price setter files are published.
pub const PRICE_SETTER_EPOCH: (i32, u32, u32) = (2009, 7, 1);

/// Everything the calculators need from the market operator.
pub trait MarketDataSource {
    fn fetch_dispatch_load(&self, range: IntervalRange) -> Result<Vec<DispatchLoadRow>>;
    fn fetch_dispatch_scada(&self, range: IntervalRange) -> Result<Vec<ScadaRow>>;
    fn fetch_unit_details(&self) -> Result<Vec<UnitDetailRow>>;
    fn fetch_generator_info(&self) -> Result<Vec<GeneratorInfoRow>>;
    fn fetch_aux_load(&self) -> Result<Vec<AuxLoadRow>>;
    /// Unit-level factors for every month of the range.
    fn fetch_emissions_factors(&self, range: IntervalRange) -> Result<Vec<EmissionsFactorRecord>>;
    fn fetch_price_setters(&self, range: IntervalRange) -> Result<Vec<PriceSettingRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawTable {
    DispatchLoad,
    DispatchUnitScada,
    GenUnits,
    DuAlloc,
    DuDetailSummary,
    AuxLoad,
    GeneratorsInfo,
    PriceSetter,
}

impl RawTable {
    pub fn name(&self) -> &'static str {
        match self {
            RawTable::DispatchLoad => "DISPATCHLOAD",
            RawTable::DispatchUnitScada => "DISPATCH_UNIT_SCADA",
            RawTable::GenUnits => "GENUNITS",
            RawTable::DuAlloc => "DUALLOC",
            RawTable::DuDetailSummary => "DUDETAILSUMMARY",
            RawTable::AuxLoad => "PLANT_AUXLOAD",
            RawTable::GeneratorsInfo => "GENERATORS_INFO",
            RawTable::PriceSetter => "PRICE_SETTER",
        }
    }
}

/// Which slice of a table a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKey {
    Static,
    Month(i32, u32),
    Day(NaiveDate),
}

/// Canonical on-disk name of a raw table file.
pub fn default_file_name(table: RawTable, key: FileKey) -> String {
    match (table, key) {
        (RawTable::AuxLoad, _) => "plant_auxload.csv".to_string(),
        (RawTable::GeneratorsInfo, _) => "generators_info.csv".to_string(),
        (RawTable::PriceSetter, FileKey::Day(day)) => {
            format!("NEMED_PS_DAILY_{}.json", day.format("%Y-%m-%d"))
        }
        (table, FileKey::Month(year, month)) => {
            format!("{}_{:04}{:02}.parquet", table.name(), year, month)
        }
        (table, _) => format!("{}.parquet", table.name()),
    }
}

/// How raw files missing from the cache are obtained.
pub trait RawFileStrategy {
    fn file_name(&self, table: RawTable, key: FileKey) -> String {
        default_file_name(table, key)
    }

    /// Bytes of the file, or `None` when the strategy cannot provide it.
    fn fetch(&self, table: RawTable, key: FileKey) -> Result<Option<Vec<u8>>>;
}

/// Copies raw files out of a local archive directory.
#[derive(Debug, Clone)]
pub struct ArchiveMirror {
    archive_dir: PathBuf,
}

impl ArchiveMirror {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }
}

impl RawFileStrategy for ArchiveMirror {
    fn fetch(&self, table: RawTable, key: FileKey) -> Result<Option<Vec<u8>>> {
        let path = self.archive_dir.join(self.file_name(table, key));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }
}

/// Serves only what is already in the cache directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOnly;

impl RawFileStrategy for CacheOnly {
    fn fetch(&self, _table: RawTable, _key: FileKey) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

pub struct ParquetDataLoader {
    cache_dir: PathBuf,
    strategy: Box<dyn RawFileStrategy>,
}

impl ParquetDataLoader {
    pub fn new(cache_dir: impl Into<PathBuf>, strategy: impl RawFileStrategy + 'static) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            strategy: Box::new(strategy),
        })
    }

    /// Loader that mirrors `archive_dir` into `cache_dir`.
    pub fn from_archive(cache_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::new(cache_dir, ArchiveMirror::new(archive_dir))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the cached file, fetching it through the strategy if needed.
    fn locate(&self, table: RawTable, key: FileKey) -> Result<Option<PathBuf>> {
        let path = self.cache_dir.join(self.strategy.file_name(table, key));
        if path.exists() {
            return Ok(Some(path));
        }
        match self.strategy.fetch(table, key)? {
            Some(bytes) => {
                debug!("Caching {} ({} bytes)", path.display(), bytes.len());
                fs::write(&path, bytes)?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    fn require(&self, table: RawTable, key: FileKey) -> Result<PathBuf> {
        self.locate(table, key)?.ok_or_else(|| {
            NemedError::NoData(format!(
                "{} could not be found in the cache or obtained from the archive",
                self.strategy.file_name(table, key)
            ))
        })
    }

    /// Read every monthly file of `table` overlapping `range`.
    fn read_monthly(&self, table: RawTable, range: IntervalRange, columns: &[&str]) -> Result<Vec<(FileKey, DataFrame)>> {
        let mut frames = Vec::new();
        for (year, month) in range.months() {
            let key = FileKey::Month(year, month);
            let path = self.require(table, key)?;
            frames.push((key, read_parquet(&path, columns)?));
        }
        Ok(frames)
    }
}

fn check_epoch(table: RawTable, range: IntervalRange, epoch: (i32, u32, u32)) -> Result<()> {
    let earliest = NaiveDate::from_ymd_opt(epoch.0, epoch.1, epoch.2)
        .ok_or_else(|| NemedError::validation("invalid epoch date"))?;
    if range.start.date() < earliest {
        return Err(NemedError::UnsupportedRange {
            table: table.name().to_string(),
            earliest,
        });
    }
    Ok(())
}

impl MarketDataSource for ParquetDataLoader {
    fn fetch_dispatch_load(&self, range: IntervalRange) -> Result<Vec<DispatchLoadRow>> {
        check_epoch(RawTable::DispatchLoad, range, DISPATCH_EPOCH)?;
        let mut rows = Vec::new();
        for (_, df) in self.read_monthly(
            RawTable::DispatchLoad,
            range,
            &["SETTLEMENTDATE", "DUID", "INITIALMW", "INTERVENTION"],
        )? {
            let times = datetime_column(&df, "SETTLEMENTDATE")?;
            let units = string_column(&df, "DUID")?;
            let values = f64_column(&df, "INITIALMW")?;
            let interventions = f64_column(&df, "INTERVENTION")?;
            for (((time, unit), value), intervention) in
                times.into_iter().zip(units).zip(values).zip(interventions)
            {
                let (Some(interval_end), Some(unit_id)) = (time, unit) else { continue };
                if !range.contains(interval_end) {
                    continue;
                }
                rows.push(DispatchLoadRow {
                    unit_id,
                    interval_end,
                    initial_mw: value,
                    intervention: intervention == Some(1.0),
                });
            }
        }
        info!("Loaded {} DISPATCHLOAD rows", rows.len());
        Ok(rows)
    }

    fn fetch_dispatch_scada(&self, range: IntervalRange) -> Result<Vec<ScadaRow>> {
        check_epoch(RawTable::DispatchUnitScada, range, DISPATCH_EPOCH)?;
        let mut rows = Vec::new();
        for (_, df) in self.read_monthly(
            RawTable::DispatchUnitScada,
            range,
            &["SETTLEMENTDATE", "DUID", "SCADAVALUE"],
        )? {
            let times = datetime_column(&df, "SETTLEMENTDATE")?;
            let units = string_column(&df, "DUID")?;
            let values = f64_column(&df, "SCADAVALUE")?;
            for ((time, unit), value) in times.into_iter().zip(units).zip(values) {
                let (Some(interval_end), Some(unit_id)) = (time, unit) else { continue };
                if !range.contains(interval_end) {
                    continue;
                }
                rows.push(ScadaRow {
                    unit_id,
                    interval_end,
                    scada_mw: value,
                });
            }
        }
        info!("Loaded {} DISPATCH_UNIT_SCADA rows", rows.len());
        Ok(rows)
    }

    fn fetch_unit_details(&self) -> Result<Vec<UnitDetailRow>> {
        let path = self.require(RawTable::DuDetailSummary, FileKey::Static)?;
        let df = read_parquet(&path, &["DUID", "START_DATE", "DISPATCHTYPE", "REGIONID"])?;

        let units = string_column(&df, "DUID")?;
        let starts = datetime_column(&df, "START_DATE")?;
        let types = string_column(&df, "DISPATCHTYPE")?;
        let regions = string_column(&df, "REGIONID")?;

        let mut rows = Vec::with_capacity(df.height());
        for (((unit, start), dispatch_type), region) in units.into_iter().zip(starts).zip(types).zip(regions) {
            let (Some(unit_id), Some(start_date), Some(region)) = (unit, start, region) else { continue };
            // BIDIRECTIONAL and other registrations are not accounted for
            let Some(dispatch_type) = dispatch_type.as_deref().and_then(DispatchType::from_mms) else { continue };
            rows.push(UnitDetailRow {
                unit_id,
                start_date,
                dispatch_type,
                region,
            });
        }
        Ok(rows)
    }

    fn fetch_generator_info(&self) -> Result<Vec<GeneratorInfoRow>> {
        let path = self.require(RawTable::GeneratorsInfo, FileKey::Static)?;
        let df = read_csv(&path)?;

        let units = string_column(&df, "DUID")?;
        let types = string_column(&df, "Dispatch Type")?;
        let fuels = string_column(&df, "Fuel Source - Descriptor")?;
        let technologies = string_column(&df, "Technology Type - Descriptor")?;

        Ok(units
            .into_iter()
            .zip(types)
            .zip(fuels)
            .zip(technologies)
            .filter_map(|(((unit, dispatch_type), fuel), technology)| {
                Some(GeneratorInfoRow {
                    unit_id: unit?,
                    dispatch_type: dispatch_type.as_deref().and_then(DispatchType::from_mms),
                    fuel_source: fuel,
                    technology,
                })
            })
            .collect())
    }

    fn fetch_aux_load(&self) -> Result<Vec<AuxLoadRow>> {
        let Some(path) = self.locate(RawTable::AuxLoad, FileKey::Static)? else {
            warn!("No auxiliary load table found. Assuming 0% auxiliary load for all units");
            return Ok(vec![]);
        };
        let df = read_csv(&path)?;

        let effective = string_column(&df, "EFFECTIVEFROM")?;
        let units = string_column(&df, "DUID")?;
        let pcts = f64_column(&df, "PCT_AUXILIARY_LOAD")?;

        let mut rows = Vec::with_capacity(df.height());
        for ((date, unit), pct) in effective.into_iter().zip(units).zip(pcts) {
            let (Some(date), Some(unit_id)) = (date, unit) else { continue };
            let effective_from = NaiveDate::parse_from_str(date.trim(), "%d/%m/%Y").map_err(|_| {
                NemedError::validation(format!("EFFECTIVEFROM {:?} is not in dd/mm/yyyy format", date))
            })?;
            rows.push(AuxLoadRow {
                effective_from,
                unit_id,
                pct_aux_load: pct,
            });
        }
        Ok(rows)
    }

    fn fetch_emissions_factors(&self, range: IntervalRange) -> Result<Vec<EmissionsFactorRecord>> {
        check_epoch(RawTable::GenUnits, range, GENUNITS_EPOCH)?;

        let mut factors = Vec::new();
        for (key, df) in self.read_monthly(
            RawTable::GenUnits,
            range,
            &["GENSETID", "CO2E_EMISSIONS_FACTOR", "CO2E_ENERGY_SOURCE"],
        )? {
            let FileKey::Month(year, month) = key else { continue };
            let gensets = string_column(&df, "GENSETID")?;
            let intensities = f64_column(&df, "CO2E_EMISSIONS_FACTOR")?;
            let sources = string_column(&df, "CO2E_ENERGY_SOURCE")?;
            for ((genset, intensity), energy_source) in gensets.into_iter().zip(intensities).zip(sources) {
                let Some(genset_id) = genset else { continue };
                factors.push(GensetFactorRow {
                    genset_id,
                    year,
                    month,
                    intensity,
                    energy_source,
                });
            }
        }

        let path = self.require(RawTable::DuAlloc, FileKey::Static)?;
        let df = read_parquet(&path, &["EFFECTIVEDATE", "DUID", "GENSETID"])?;
        let mut mappings = Vec::with_capacity(df.height());
        for ((date, unit), genset) in datetime_column(&df, "EFFECTIVEDATE")?
            .into_iter()
            .zip(string_column(&df, "DUID")?)
            .zip(string_column(&df, "GENSETID")?)
        {
            let (Some(effective_date), Some(unit_id), Some(genset_id)) = (date, unit, genset) else { continue };
            mappings.push(GensetMapping {
                effective_date,
                unit_id,
                genset_id,
            });
        }

        let mapped = map_genset_factors(&factors, &mappings);
        info!(
            "Mapped {} genset factors onto {} unit factor records",
            factors.len(),
            mapped.len()
        );
        Ok(mapped)
    }

    fn fetch_price_setters(&self, range: IntervalRange) -> Result<Vec<PriceSettingRecord>> {
        check_epoch(RawTable::PriceSetter, range, PRICE_SETTER_EPOCH)?;

        let mut records = Vec::new();
        for day in range.trading_days() {
            let Some(path) = self.locate(RawTable::PriceSetter, FileKey::Day(day))? else {
                warn!("Price setter file for {} not found. Continuing with remaining dates", day);
                continue;
            };
            let raw = fs::read_to_string(&path)?;
            records.extend(
                parse_price_setters(&raw)?
                    .into_iter()
                    .filter(|r| range.contains(r.period_id)),
            );
        }

        records.sort_by(|a, b| (a.period_id, &a.region).cmp(&(b.period_id, &b.region)));
        info!("Loaded {} price setter records", records.len());
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct RawPriceSetter {
    #[serde(rename = "@PeriodID")]
    period_id: String,
    #[serde(rename = "@RegionID")]
    region_id: String,
    #[serde(rename = "@Market", default)]
    market: Option<String>,
    #[serde(rename = "@DispatchedMarket", default)]
    dispatched_market: Option<String>,
    #[serde(rename = "@Unit")]
    unit: String,
    #[serde(rename = "@Price", default)]
    price: Option<Value>,
    #[serde(rename = "@BandNo", default)]
    band_no: Option<Value>,
    #[serde(rename = "@Increase", default)]
    increase: Option<Value>,
    #[serde(rename = "@RRNBandPrice", default)]
    rrn_band_price: Option<Value>,
}

/// XML-derived attributes arrive either as JSON numbers or as strings.
fn json_number(value: &Option<Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_period_id(value: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| parse_table_time(value))
}

/// Parse one daily price setter file, keeping Energy/ENOF rows only.
pub fn parse_price_setters(raw: &str) -> Result<Vec<PriceSettingRecord>> {
    let entries: Vec<RawPriceSetter> = serde_json::from_str(raw)?;
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.market.as_deref() != Some("Energy") || entry.dispatched_market.as_deref() != Some("ENOF") {
            continue;
        }
        let period_id = parse_period_id(&entry.period_id).ok_or_else(|| {
            NemedError::validation(format!("unrecognised PeriodID {:?}", entry.period_id))
        })?;
        records.push(PriceSettingRecord {
            period_id,
            region: entry.region_id,
            unit_id: entry.unit,
            increase: json_number(&entry.increase),
            price: json_number(&entry.price),
            band_no: json_number(&entry.band_no).map(|b| b as i64),
            rrn_band_price: json_number(&entry.rrn_band_price),
        });
    }
    Ok(records)
}

pub(crate) fn read_parquet(path: &Path, columns: &[&str]) -> Result<DataFrame> {
    let file = File::open(path)?;
    let df = ParquetReader::new(file)
        .with_columns(Some(columns.iter().map(|c| c.to_string()).collect()))
        .finish()?;
    Ok(df)
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Timestamp strings as they appear in MMS CSV exports and JSON files.
pub(crate) fn parse_table_time(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    ["%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

pub(crate) fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df.column(name)?.cast(&DataType::String)?;
    let values = series.str()?.into_iter().map(|v| v.map(str::to_string)).collect();
    Ok(values)
}

pub(crate) fn f64_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    let values = series.f64()?.into_iter().collect();
    Ok(values)
}

pub(crate) fn datetime_column(df: &DataFrame, name: &str) -> Result<Vec<Option<NaiveDateTime>>> {
    let series = df.column(name)?;
    if series.dtype() == &DataType::String {
        return Ok(series
            .str()?
            .into_iter()
            .map(|v| v.and_then(parse_table_time))
            .collect());
    }
    let millis = series
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        .cast(&DataType::Int64)?;
    let values = millis.i64()?.into_iter().map(|v| v.and_then(from_millis)).collect();
    Ok(values)
}

pub(crate) fn datetime_series(name: &str, values: &[NaiveDateTime]) -> Result<Series> {
    let millis: Vec<i64> = values.iter().map(|t| crate::intervals::to_millis(*t)).collect();
    Ok(Series::new(name.into(), millis).cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
}


#[cfg(test)]
mod tests {
    use super::test_support::write_parquet;
    use super::*;
    use crate::intervals::parse_market_time;
    use tempfile::TempDir;

    fn t(s: &str) -> NaiveDateTime {
        parse_market_time(s, "test").unwrap()
    }

    fn scada_frame(times: &[&str], units: &[&str], values: &[f64]) -> DataFrame {
        let times: Vec<NaiveDateTime> = times.iter().map(|s| t(s)).collect();
        DataFrame::new(vec![
            datetime_series("SETTLEMENTDATE", &times).unwrap(),
            Series::new("DUID".into(), units.to_vec()),
            Series::new("SCADAVALUE".into(), values.to_vec()),
        ])
        .unwrap()
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            default_file_name(RawTable::DispatchUnitScada, FileKey::Month(2022, 1)),
            "DISPATCH_UNIT_SCADA_202201.parquet"
        );
        assert_eq!(default_file_name(RawTable::DuAlloc, FileKey::Static), "DUALLOC.parquet");
        assert_eq!(
            default_file_name(
                RawTable::PriceSetter,
                FileKey::Day(NaiveDate::from_ymd_opt(2022, 1, 2).unwrap())
            ),
            "NEMED_PS_DAILY_2022-01-02.json"
        );
        assert_eq!(default_file_name(RawTable::AuxLoad, FileKey::Static), "plant_auxload.csv");
    }

    #[test]
    fn test_scada_fetched_from_archive_and_filtered_to_range() {
        let archive = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        write_parquet(
            &archive.path().join("DISPATCH_UNIT_SCADA_202201.parquet"),
            scada_frame(
                &["2022/01/01 00:00", "2022/01/01 00:05", "2022/01/01 00:10", "2022/01/01 00:15"],
                &["A", "A", "A", "A"],
                &[1.0, 2.0, 3.0, 4.0],
            ),
        );

        let loader = ParquetDataLoader::from_archive(cache.path(), archive.path()).unwrap();
        let range = IntervalRange::new(t("2022/01/01 00:00"), t("2022/01/01 00:10")).unwrap();
        let rows = loader.fetch_dispatch_scada(range).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].interval_end, t("2022/01/01 00:05"));
        assert_eq!(rows[1].scada_mw, Some(3.0));
        assert!(cache.path().join("DISPATCH_UNIT_SCADA_202201.parquet").exists());
    }

    #[test]
    fn test_missing_monthly_file_is_no_data() {
        let archive = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let loader = ParquetDataLoader::from_archive(cache.path(), archive.path()).unwrap();
        let range = IntervalRange::new(t("2022/01/01 00:00"), t("2022/01/01 00:10")).unwrap();
        assert!(matches!(loader.fetch_dispatch_scada(range), Err(NemedError::NoData(_))));
    }

    #[test]
    fn test_epochs_enforced() {
        let dir = TempDir::new().unwrap();
        let loader = ParquetDataLoader::from_archive(dir.path(), dir.path()).unwrap();

        let early = IntervalRange::new(t("2011/04/30 00:00"), t("2011/04/30 01:00")).unwrap();
        match loader.fetch_emissions_factors(early) {
            Err(NemedError::UnsupportedRange { table, earliest }) => {
                assert_eq!(table, "GENUNITS");
                assert_eq!(earliest, NaiveDate::from_ymd_opt(2011, 5, 1).unwrap());
            }
            other => panic!("expected UnsupportedRange, got {:?}", other.map(|v| v.len())),
        }

        let ancient = IntervalRange::new(t("2009/06/30 00:00"), t("2009/06/30 01:00")).unwrap();
        assert!(matches!(
            loader.fetch_dispatch_scada(ancient),
            Err(NemedError::UnsupportedRange { .. })
        ));
        assert!(matches!(
            loader.fetch_price_setters(ancient),
            Err(NemedError::UnsupportedRange { .. })
        ));
    }

    #[test]
    fn test_emissions_factors_mapped_through_dualloc() {
        let archive = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();

        let genunits = DataFrame::new(vec![
            Series::new("GENSETID".into(), vec!["G1", "G2"]),
            Series::new("CO2E_EMISSIONS_FACTOR".into(), vec![Some(0.8), Some(1.0)]),
            Series::new("CO2E_ENERGY_SOURCE".into(), vec!["Black coal", "Black coal"]),
        ])
        .unwrap();
        write_parquet(&archive.path().join("GENUNITS_202201.parquet"), genunits);

        let dualloc = DataFrame::new(vec![
            datetime_series("EFFECTIVEDATE", &[t("2020/01/01 00:00"), t("2020/01/01 00:00")]).unwrap(),
            Series::new("DUID".into(), vec!["ER01", "ER01"]),
            Series::new("GENSETID".into(), vec!["G1", "G2"]),
        ])
        .unwrap();
        write_parquet(&archive.path().join("DUALLOC.parquet"), dualloc);

        let loader = ParquetDataLoader::from_archive(cache.path(), archive.path()).unwrap();
        let range = IntervalRange::new(t("2022/01/01 00:00"), t("2022/01/02 00:00")).unwrap();
        let factors = loader.fetch_emissions_factors(range).unwrap();

        assert_eq!(factors.len(), 1);
        assert_eq!(factors[0].unit_id, "ER01");
        assert_eq!((factors[0].year, factors[0].month), (2022, 1));
        assert!((factors[0].intensity.unwrap() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_unit_details_and_csv_tables() {
        let archive = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();

        let details = DataFrame::new(vec![
            Series::new("DUID".into(), vec!["ER01", "HPR1", "ICON"]),
            Series::new("START_DATE".into(), vec!["2020/01/01 00:00:00", "2020/01/01 00:00:00", "2020/01/01 00:00:00"]),
            Series::new("DISPATCHTYPE".into(), vec!["GENERATOR", "LOAD", "BIDIRECTIONAL"]),
            Series::new("REGIONID".into(), vec!["NSW1", "SA1", "SA1"]),
        ])
        .unwrap();
        write_parquet(&archive.path().join("DUDETAILSUMMARY.parquet"), details);

        fs::write(
            archive.path().join("plant_auxload.csv"),
            "EFFECTIVEFROM,DUID,PCT_AUXILIARY_LOAD\n01/07/2019,ER01,5.5\n",
        )
        .unwrap();
        fs::write(
            archive.path().join("generators_info.csv"),
            "DUID,Dispatch Type,Fuel Source - Descriptor,Technology Type - Descriptor\nER01,Generator,Black Coal,Steam Sub-Critical\n",
        )
        .unwrap();

        let loader = ParquetDataLoader::from_archive(cache.path(), archive.path()).unwrap();

        let units = loader.fetch_unit_details().unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].dispatch_type, DispatchType::Load);
        assert_eq!(units[0].start_date, t("2020/01/01 00:00"));

        let aux = loader.fetch_aux_load().unwrap();
        assert_eq!(aux[0].effective_from, NaiveDate::from_ymd_opt(2019, 7, 1).unwrap());
        assert_eq!(aux[0].pct_aux_load, Some(5.5));

        let info = loader.fetch_generator_info().unwrap();
        assert_eq!(info[0].fuel_source.as_deref(), Some("Black Coal"));
        assert_eq!(info[0].dispatch_type, Some(DispatchType::Generator));
    }

    #[test]
    fn test_price_setters_keep_energy_enof_rows() {
        let raw = r#"[
            {"@PeriodID": "2022-01-01T00:05:00+10:00", "@RegionID": "NSW1", "@Market": "Energy",
             "@Price": "85.5", "@Unit": "ER01", "@DispatchedMarket": "ENOF", "@BandNo": "3",
             "@Increase": "0.6", "@RRNBandPrice": "85.5", "@BandCost": "51.3"},
            {"@PeriodID": "2022-01-01T00:05:00+10:00", "@RegionID": "NSW1", "@Market": "Energy",
             "@Price": "85.5", "@Unit": "ER01", "@DispatchedMarket": "R5RE", "@BandNo": "1",
             "@Increase": "1", "@RRNBandPrice": "1", "@BandCost": "1"},
            {"@PeriodID": "2022-01-01T00:05:00+10:00", "@RegionID": "NSW1", "@Market": "Raise6Sec",
             "@Price": "1", "@Unit": "ER01", "@DispatchedMarket": "ENOF"}
        ]"#;
        let records = parse_price_setters(raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].period_id, t("2022/01/01 00:05"));
        assert_eq!(records[0].increase, Some(0.6));
        assert_eq!(records[0].band_no, Some(3));
        assert_eq!(records[0].rrn_band_price, Some(85.5));
    }

    #[test]
    fn test_price_setter_days_read_from_archive() {
        let archive = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let day = |period: &str| {
            format!(
                r#"[{{"@PeriodID": "{}", "@RegionID": "VIC1", "@Market": "Energy", "@Price": 40,
                     "@Unit": "LYA1", "@DispatchedMarket": "ENOF", "@Increase": 1}}]"#,
                period
            )
        };
        fs::write(archive.path().join("NEMED_PS_DAILY_2022-01-01.json"), day("2022-01-02 00:00:00")).unwrap();
        fs::write(archive.path().join("NEMED_PS_DAILY_2022-01-02.json"), day("2022-01-02 00:05:00")).unwrap();

        let loader = ParquetDataLoader::from_archive(cache.path(), archive.path()).unwrap();
        let range = IntervalRange::new(t("2022/01/01 23:55"), t("2022/01/02 00:05")).unwrap();
        let records = loader.fetch_price_setters(range).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].period_id, t("2022/01/02 00:00"));
        assert_eq!(records[1].price, Some(40.0));
    }
}
