use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDateTime};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use nemed_calculator::data_loader::{default_file_name, FileKey, RawTable};
use nemed_calculator::intervals::{parse_market_time, to_millis};
use polars::prelude::*;
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

type Row = Vec<Option<String>>;

/// MMS tables the emissions calculator reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MmsTable {
    DispatchLoad,
    DispatchUnitScada,
    GenUnits,
    DuAlloc,
    DuDetailSummary,
}

impl MmsTable {
    /// Route an `I` record's `(report group, table)` pair.
    pub fn from_record(group: &str, table: &str) -> Option<Self> {
        match (group.trim(), table.trim()) {
            ("DISPATCH", "UNIT_SOLUTION") | ("DISPATCH", "DISPATCHLOAD") => Some(MmsTable::DispatchLoad),
            ("DISPATCH", "UNIT_SCADA") => Some(MmsTable::DispatchUnitScada),
            ("PARTICIPANT_REGISTRATION", "GENUNITS") => Some(MmsTable::GenUnits),
            ("PARTICIPANT_REGISTRATION", "DUALLOC") => Some(MmsTable::DuAlloc),
            ("PARTICIPANT_REGISTRATION", "DUDETAILSUMMARY") => Some(MmsTable::DuDetailSummary),
            _ => None,
        }
    }

    pub fn raw_table(&self) -> RawTable {
        match self {
            MmsTable::DispatchLoad => RawTable::DispatchLoad,
            MmsTable::DispatchUnitScada => RawTable::DispatchUnitScada,
            MmsTable::GenUnits => RawTable::GenUnits,
            MmsTable::DuAlloc => RawTable::DuAlloc,
            MmsTable::DuDetailSummary => RawTable::DuDetailSummary,
        }
    }

    /// Columns kept in the archive, in output order.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            MmsTable::DispatchLoad => &["SETTLEMENTDATE", "DUID", "INTERVENTION", "INITIALMW"],
            MmsTable::DispatchUnitScada => &["SETTLEMENTDATE", "DUID", "SCADAVALUE"],
            MmsTable::GenUnits => &["GENSETID", "CO2E_EMISSIONS_FACTOR", "CO2E_ENERGY_SOURCE"],
            MmsTable::DuAlloc => &["EFFECTIVEDATE", "DUID", "GENSETID"],
            MmsTable::DuDetailSummary => &["DUID", "START_DATE", "DISPATCHTYPE", "REGIONID"],
        }
    }

    /// Column whose month decides the output file, for interval tables.
    fn time_column(&self) -> Option<&'static str> {
        match self {
            MmsTable::DispatchLoad | MmsTable::DispatchUnitScada => Some("SETTLEMENTDATE"),
            _ => None,
        }
    }

    fn is_monthly(&self) -> bool {
        matches!(
            self,
            MmsTable::DispatchLoad | MmsTable::DispatchUnitScada | MmsTable::GenUnits
        )
    }
}

fn column_type(name: &str) -> DataType {
    match name {
        "SETTLEMENTDATE" | "EFFECTIVEDATE" | "START_DATE" => DataType::Datetime(TimeUnit::Milliseconds, None),
        "INTERVENTION" | "INITIALMW" | "SCADAVALUE" | "CO2E_EMISSIONS_FACTOR" => DataType::Float64,
        _ => DataType::Utf8,
    }
}

/// Rows of the routed tables found in one MMS CSV file.
#[derive(Debug, Default)]
pub struct ParsedMmsFile {
    pub tables: HashMap<MmsTable, Vec<Row>>,
    /// Publication month taken from the file name, used for GENUNITS.
    pub file_month: Option<(i32, u32)>,
}

impl ParsedMmsFile {
    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

/// `PUBLIC_DVD_GENUNITS_202201010000.CSV` style names carry the month.
pub fn month_from_file_name(name: &str) -> Option<(i32, u32)> {
    let re = Regex::new(r"(\d{4})(\d{2})\d{6}").ok()?;
    let caps = re.captures(name)?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// Parse the C/I/D record layout. `I` records open a table section and name
/// its columns from the fifth field on; `D` records carry values for the
/// most recent section.
pub fn parse_mms_file(path: &Path) -> Result<ParsedMmsFile> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open MMS file {:?}", path))?;

    let mut parsed = ParsedMmsFile {
        file_month: path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(month_from_file_name),
        ..Default::default()
    };
    let mut section: Option<(MmsTable, Vec<Option<usize>>)> = None;

    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed record in {:?}", path))?;
        match record.get(0).map(str::trim) {
            Some("I") => {
                section = MmsTable::from_record(
                    record.get(1).unwrap_or_default(),
                    record.get(2).unwrap_or_default(),
                )
                .map(|table| {
                    let header: Vec<&str> = record.iter().skip(4).map(str::trim).collect();
                    let positions = table
                        .columns()
                        .iter()
                        .map(|c| header.iter().position(|h| h == c).map(|p| p + 4))
                        .collect();
                    (table, positions)
                });
            }
            Some("D") => {
                let Some((table, positions)) = &section else { continue };
                let row: Row = positions
                    .iter()
                    .map(|p| {
                        p.and_then(|i| record.get(i))
                            .map(str::trim)
                            .filter(|v| !v.is_empty())
                            .map(str::to_string)
                    })
                    .collect();
                parsed.tables.entry(*table).or_default().push(row);
            }
            _ => {}
        }
    }

    Ok(parsed)
}

/// Converts extracted MMS CSV files into the Parquet archive layout the
/// calculator's loader mirrors.
pub struct MmsTableProcessor {
    csv_dir: PathBuf,
    archive_dir: PathBuf,
}

impl MmsTableProcessor {
    pub fn new(csv_dir: PathBuf, archive_dir: PathBuf) -> Self {
        Self { csv_dir, archive_dir }
    }

    pub fn process_all(&self) -> Result<Vec<PathBuf>> {
        println!("🚀 MMS Table Processor");
        println!("Using {} CPU cores", rayon::current_num_threads());
        println!("{}", "=".repeat(80));

        fs::create_dir_all(&self.archive_dir)?;

        let mut csv_files: Vec<PathBuf> = fs::read_dir(&self.csv_dir)
            .with_context(|| format!("CSV directory not found: {:?}", self.csv_dir))?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                let is_csv = path.extension()?.to_str()?.eq_ignore_ascii_case("csv");
                is_csv.then_some(path)
            })
            .collect();
        csv_files.sort();

        if csv_files.is_empty() {
            println!("⚠️  No CSV files found in {}", self.csv_dir.display());
            return Ok(vec![]);
        }
        println!("📊 Found {} CSV files", csv_files.len());

        let pb = ProgressBar::new(csv_files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?,
        );

        let parsed: Vec<ParsedMmsFile> = csv_files
            .par_iter()
            .filter_map(|file| {
                pb.inc(1);
                match parse_mms_file(file) {
                    Ok(parsed) => Some(parsed),
                    Err(e) => {
                        pb.println(format!("  ❌ {:?}: {}", file.file_name().unwrap_or_default(), e));
                        None
                    }
                }
            })
            .collect();
        pb.finish_with_message("Files parsed");

        let total_rows: usize = parsed.iter().map(ParsedMmsFile::row_count).sum();
        println!("📋 Routed {} rows from {} files", total_rows, parsed.len());

        let partitions = partition_rows(parsed);
        let mut written = Vec::with_capacity(partitions.len());
        for ((table, key), rows) in partitions {
            let path = self.archive_dir.join(default_file_name(table.raw_table(), key));
            println!("  💾 {} ({} rows)", path.display(), rows.len());
            write_table(&path, table, rows)
                .with_context(|| format!("Failed to write {:?}", path))?;
            written.push(path);
        }

        println!("\n✅ Wrote {} archive files to {}", written.len(), self.archive_dir.display());
        Ok(written)
    }
}

/// Group rows by output file. Interval tables split on the month of the
/// timestamp itself, GENUNITS on the publication month, the rest are static.
/// Identical rows from overlapping files collapse.
fn partition_rows(parsed: Vec<ParsedMmsFile>) -> BTreeMap<(MmsTable, FileKey), BTreeSet<Row>> {
    let mut partitions: BTreeMap<(MmsTable, FileKey), BTreeSet<Row>> = BTreeMap::new();
    let mut unkeyed = 0usize;

    for file in parsed {
        for (table, rows) in file.tables {
            let time_index = table
                .time_column()
                .and_then(|c| table.columns().iter().position(|name| *name == c));

            for row in rows {
                let key = if let Some(i) = time_index {
                    let Some(t) = row[i].as_deref().and_then(parse_mms_time) else {
                        unkeyed += 1;
                        continue;
                    };
                    FileKey::Month(t.year(), t.month())
                } else if table.is_monthly() {
                    let Some((year, month)) = file.file_month else {
                        unkeyed += 1;
                        continue;
                    };
                    FileKey::Month(year, month)
                } else {
                    FileKey::Static
                };
                partitions.entry((table, key)).or_default().insert(row);
            }
        }
    }

    if unkeyed > 0 {
        warn!("Skipped {} rows with no usable timestamp or publication month", unkeyed);
    }
    partitions
}

fn parse_mms_time(value: &str) -> Option<NaiveDateTime> {
    parse_market_time(value, "MMS timestamp").ok()
}

fn write_table(path: &Path, table: MmsTable, rows: BTreeSet<Row>) -> Result<()> {
    let rows: Vec<Row> = rows.into_iter().collect();
    let mut columns = Vec::with_capacity(table.columns().len());

    for (i, name) in table.columns().iter().enumerate() {
        let values = rows.iter().map(|r| r[i].as_deref());
        let series = match column_type(name) {
            DataType::Float64 => Series::new(
                name,
                values.map(|v| v.and_then(|s| s.parse::<f64>().ok())).collect::<Vec<_>>(),
            ),
            DataType::Datetime(unit, tz) => Series::new(
                name,
                values
                    .map(|v| v.and_then(parse_mms_time).map(to_millis))
                    .collect::<Vec<_>>(),
            )
            .cast(&DataType::Datetime(unit, tz))?,
            _ => Series::new(name, values.collect::<Vec<_>>()),
        };
        columns.push(series);
    }

    let mut df = DataFrame::new(columns)?;
    let mut file = fs::File::create(path)?;
    ParquetWriter::new(&mut file).finish(&mut df)?;
    Ok(())
}

pub fn ingest_mms_tables(csv_dir: PathBuf, archive_dir: PathBuf) -> Result<Vec<PathBuf>> {
    MmsTableProcessor::new(csv_dir, archive_dir).process_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nemed_calculator::data_loader::{MarketDataSource, ParquetDataLoader};
    use nemed_calculator::intervals::IntervalRange;
    use tempfile::TempDir;

    const SCADA_FILE: &str = "C,NEMP.WORLD,DISPATCH_UNIT_SCADA,AEMO,PUBLIC,2022/01/01,00:00:00,0000000001,MMSDM,0000000001
I,DISPATCH,UNIT_SCADA,1,SETTLEMENTDATE,DUID,SCADAVALUE
D,DISPATCH,UNIT_SCADA,1,\"2022/01/31 23:55:00\",ER01,650.5
D,DISPATCH,UNIT_SCADA,1,\"2022/02/01 00:00:00\",ER01,652
D,DISPATCH,UNIT_SCADA,1,\"2022/02/01 00:05:00\",ER01,
C,\"END OF REPORT\",5
";

    const REGISTRATION_FILE: &str = "C,NEMP.WORLD,REGISTRATION,AEMO,PUBLIC,2022/01/01,00:00:00,0000000001,MMSDM,0000000001
I,PARTICIPANT_REGISTRATION,DUALLOC,1,EFFECTIVEDATE,VERSIONNO,DUID,GENSETID,LASTCHANGED
D,PARTICIPANT_REGISTRATION,DUALLOC,1,\"2020/01/01 00:00:00\",1,ER01,ERGT01,\"2020/01/01 00:00:00\"
I,PARTICIPANT_REGISTRATION,STADUALLOC,1,DUID,STATIONID
D,PARTICIPANT_REGISTRATION,STADUALLOC,1,ER01,ERARING
I,PARTICIPANT_REGISTRATION,GENUNITS,2,GENSETID,LASTCHANGED,CO2E_EMISSIONS_FACTOR,CO2E_ENERGY_SOURCE,CO2E_DATA_SOURCE
D,PARTICIPANT_REGISTRATION,GENUNITS,2,ERGT01,\"2021/06/01 00:00:00\",0.91,\"Black coal\",NGA
";

    #[test]
    fn test_routing_of_mms_sections() {
        assert_eq!(MmsTable::from_record("DISPATCH", "UNIT_SOLUTION"), Some(MmsTable::DispatchLoad));
        assert_eq!(MmsTable::from_record("DISPATCH", "UNIT_SCADA"), Some(MmsTable::DispatchUnitScada));
        assert_eq!(MmsTable::from_record("PARTICIPANT_REGISTRATION", "GENUNITS"), Some(MmsTable::GenUnits));
        assert_eq!(MmsTable::from_record("PARTICIPANT_REGISTRATION", "STADUALLOC"), None);
        assert_eq!(MmsTable::from_record("DISPATCH", "PRICE"), None);
    }

    #[test]
    fn test_month_from_file_name() {
        assert_eq!(month_from_file_name("PUBLIC_DVD_GENUNITS_202201010000.CSV"), Some((2022, 1)));
        assert_eq!(month_from_file_name("PUBLIC_DVD_DUALLOC_201105010000.CSV"), Some((2011, 5)));
        assert_eq!(month_from_file_name("generators_info.csv"), None);
    }

    #[test]
    fn test_parse_keeps_only_routed_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("PUBLIC_DVD_GENUNITS_202201010000.CSV");
        fs::write(&path, REGISTRATION_FILE).unwrap();

        let parsed = parse_mms_file(&path).unwrap();

        assert_eq!(parsed.file_month, Some((2022, 1)));
        assert_eq!(parsed.tables.len(), 2);
        assert_eq!(
            parsed.tables[&MmsTable::DuAlloc],
            vec![vec![
                Some("2020/01/01 00:00:00".to_string()),
                Some("ER01".to_string()),
                Some("ERGT01".to_string()),
            ]]
        );
        assert_eq!(
            parsed.tables[&MmsTable::GenUnits][0],
            vec![
                Some("ERGT01".to_string()),
                Some("0.91".to_string()),
                Some("Black coal".to_string()),
            ]
        );
    }

    #[test]
    fn test_ingested_archive_is_readable_by_loader() {
        let dir = TempDir::new().unwrap();
        let csv_dir = dir.path().join("csv");
        let archive_dir = dir.path().join("archive");
        fs::create_dir_all(&csv_dir).unwrap();
        fs::write(csv_dir.join("PUBLIC_DVD_DISPATCH_UNIT_SCADA_202201010000.CSV"), SCADA_FILE).unwrap();
        // Overlapping copy of the same rows collapses
        fs::write(csv_dir.join("PUBLIC_DISPATCHSCADA_202201312355.CSV"), SCADA_FILE).unwrap();
        fs::write(csv_dir.join("PUBLIC_DVD_GENUNITS_202201010000.CSV"), REGISTRATION_FILE).unwrap();

        let written = ingest_mms_tables(csv_dir, archive_dir.clone()).unwrap();
        let names: BTreeSet<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            BTreeSet::from([
                "DISPATCH_UNIT_SCADA_202201.parquet".to_string(),
                "DISPATCH_UNIT_SCADA_202202.parquet".to_string(),
                "GENUNITS_202201.parquet".to_string(),
                "DUALLOC.parquet".to_string(),
            ])
        );

        let loader = ParquetDataLoader::from_archive(dir.path().join("cache"), &archive_dir).unwrap();
        let start = parse_market_time("2022/01/31 23:50", "start").unwrap();
        let end = parse_market_time("2022/02/01 00:05", "end").unwrap();
        let scada = loader.fetch_dispatch_scada(IntervalRange::new(start, end).unwrap()).unwrap();
        let values: Vec<Option<f64>> = scada.iter().map(|r| r.scada_mw).collect();
        assert_eq!(values, vec![Some(650.5), Some(652.0), None]);

        let factors = loader
            .fetch_emissions_factors(IntervalRange::new(start, start + chrono::Duration::minutes(5)).unwrap())
            .unwrap();
        assert_eq!(factors.len(), 1);
        assert_eq!(factors[0].unit_id, "ER01");
        assert_eq!(factors[0].intensity, Some(0.91));
    }
}
