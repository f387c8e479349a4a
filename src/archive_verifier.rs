use anyhow::{Context, Result};
use glob::glob;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

const INTERVAL_MILLIS: i64 = 5 * 60 * 1000;

/// Findings for one monthly dispatch file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileReport {
    pub path: PathBuf,
    pub records: usize,
    pub units: usize,
    pub duplicates: usize,
    pub gaps: usize,
    pub unsorted: bool,
}

impl FileReport {
    pub fn issues(&self) -> usize {
        self.duplicates + self.gaps + usize::from(self.unsorted)
    }
}

/// Check one DISPATCHLOAD / DISPATCH_UNIT_SCADA file for repeated
/// `(SETTLEMENTDATE, DUID)` keys, missing dispatch intervals between the
/// first and last timestamp, and rows out of time order.
pub fn verify_dispatch_file(path: &Path) -> Result<FileReport> {
    let df = ParquetReader::new(File::open(path)?)
        .with_columns(Some(vec!["SETTLEMENTDATE".to_string(), "DUID".to_string()]))
        .finish()
        .with_context(|| format!("Failed to read {:?}", path))?;

    let times: Vec<Option<i64>> = df
        .column("SETTLEMENTDATE")?
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        .cast(&DataType::Int64)?
        .i64()?
        .into_iter()
        .collect();
    let units: Vec<Option<&str>> = df.column("DUID")?.utf8()?.into_iter().collect();

    let mut seen = HashSet::with_capacity(times.len());
    let mut duplicates = 0;
    for key in times.iter().zip(units.iter()) {
        if !seen.insert(key) {
            duplicates += 1;
        }
    }

    let present: Vec<i64> = times.iter().flatten().copied().collect();
    let unsorted = present.windows(2).any(|w| w[1] < w[0]);

    let mut distinct = present.clone();
    distinct.sort_unstable();
    distinct.dedup();
    let gaps = distinct
        .windows(2)
        .map(|w| ((w[1] - w[0]) / INTERVAL_MILLIS - 1).max(0) as usize)
        .sum();

    let distinct_units: HashSet<&str> = units.iter().flatten().copied().collect();

    Ok(FileReport {
        path: path.to_path_buf(),
        records: df.height(),
        units: distinct_units.len(),
        duplicates,
        gaps,
        unsorted,
    })
}

pub fn verify_archive(archive_dir: &Path) -> Result<Vec<FileReport>> {
    println!("\n🔍 Archive Quality Verification");
    println!("{}", "=".repeat(60));

    let mut reports = Vec::new();
    for table in ["DISPATCHLOAD", "DISPATCH_UNIT_SCADA"] {
        let pattern = archive_dir.join(format!("{}_*.parquet", table));
        let files: Vec<PathBuf> = glob(&pattern.to_string_lossy())?
            .filter_map(Result::ok)
            .collect();
        if files.is_empty() {
            continue;
        }

        println!("\n📁 Checking {} {} files", files.len(), table);
        for file in files {
            println!("\n  Verifying: {}", file.display());
            let report = verify_dispatch_file(&file)?;

            if report.duplicates > 0 {
                println!("    ❌ Found {} duplicate entries", report.duplicates);
            } else {
                println!("    ✅ No duplicates found");
            }
            if report.gaps > 0 {
                println!("    ⚠️  Found {} missing intervals", report.gaps);
            } else {
                println!("    ✅ No gaps in time series");
            }
            if report.unsorted {
                println!("    ⚠️  Data is not sorted by SETTLEMENTDATE");
            } else {
                println!("    ✅ Data is properly sorted");
            }
            println!("    📊 Total records: {}", report.records);
            println!("    📊 Unique units: {}", report.units);

            reports.push(report);
        }
    }

    let total_issues: usize = reports.iter().map(FileReport::issues).sum();
    println!("\n{}", "=".repeat(60));
    if total_issues == 0 {
        println!("✅ Archive verification passed! No issues found.");
    } else {
        println!("⚠️  Archive verification found {} issues", total_issues);
    }

    Ok(reports)
}
