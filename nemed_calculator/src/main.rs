use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use nemed_calculator::intervals::format_market_time;
use nemed_calculator::{
    to_region_table, Granularity, MarginalEmissionRecord, Pipeline, PipelineConfig, SeriesMetric,
    TotalEmissions, TotalEmissionsRequest,
};
use polars::prelude::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nemed_calculator")]
#[command(about = "Calculate NEM regional emissions and marginal emissions intensity")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Total emissions, energy and intensity index per region
    Total(TotalArgs),
    /// Marginal (price-setting) emissions intensity per dispatch interval
    Marginal(CommonArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Start time (yyyy/mm/dd HH:MM), exclusive
    #[arg(long)]
    start: String,

    /// End time (yyyy/mm/dd HH:MM), inclusive
    #[arg(long)]
    end: String,

    /// Cache directory for raw tables and computed chunks
    #[arg(long)]
    cache: PathBuf,

    /// Archive directory written by the ingest processor; raw tables are
    /// read from the cache only when omitted
    #[arg(long)]
    archive: Option<PathBuf>,

    /// JSON pipeline configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "summary")]
    output: OutputFormat,
}

#[derive(Args)]
struct TotalArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Regions to include (e.g. NSW1,VIC1); all regions plus NEM when omitted
    #[arg(long, value_delimiter = ',')]
    regions: Vec<String>,

    /// Aggregation granularity: interval, hour, day, month or year
    #[arg(long, default_value = "interval")]
    by: String,

    /// Use as-generated instead of sent-out energy
    #[arg(long)]
    as_generated: bool,

    /// Use stepped dispatch instead of a linear ramp between points
    #[arg(long)]
    step: bool,

    /// Keep unit intervals that have no emissions factor
    #[arg(long)]
    keep_missing: bool,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Summary,
}

fn build_pipeline(common: &CommonArgs, keep_missing: bool) -> Result<Pipeline> {
    let mut config = match &common.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if keep_missing {
        config.drop_missing_factor = false;
    }

    let pipeline = match &common.archive {
        Some(archive) => Pipeline::with_archive(&common.cache, archive, config)?,
        None => Pipeline::from_cache_dir(&common.cache, config)?,
    };
    Ok(pipeline)
}

fn print_total(result: &TotalEmissions, output: &OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result.series)?);
        }
        OutputFormat::Csv => {
            let mut tables = Vec::new();
            for metric in SeriesMetric::ALL {
                let mut df = to_region_table(&result.series, metric)?;
                let mut buffer = Vec::new();
                CsvWriter::new(&mut buffer).include_header(true).finish(&mut df)?;
                tables.push(format!("# {}\n{}", metric.column_name(), String::from_utf8(buffer)?));
            }
            print!("{}", tables.join("\n"));
        }
        OutputFormat::Summary => {
            println!("NEM Emissions Summary");
            println!("=====================");
            println!("Granularity: {}", result.granularity);
            println!("Unit interval records: {}", result.unit_records.len());
            if let (Some(first), Some(last)) = (result.series.first(), result.series.last()) {
                println!(
                    "Period: {} to {}",
                    format_market_time(first.time_begin),
                    format_market_time(last.time_end)
                );
            }
            println!();
            println!("{:<8} {:>16} {:>18} {:>12}", "Region", "Energy (MWh)", "Emissions (tCO2e)", "Intensity");
            for region in result.regions() {
                let rows = result.series_for(region);
                let energy: f64 = rows.iter().map(|r| r.energy).sum();
                let emissions: f64 = rows.iter().map(|r| r.total_emissions).sum();
                let intensity = if energy == 0.0 { 0.0 } else { emissions / energy };
                println!("{:<8} {:>16.2} {:>18.2} {:>12.4}", region, energy, emissions, intensity);
            }
        }
    }
    Ok(())
}

fn print_marginal(records: &[MarginalEmissionRecord], output: &OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(records)?);
        }
        OutputFormat::Csv => {
            println!("Time,Region,Intensity_Index,DUID,CO2E_ENERGY_SOURCE,Technology,Price,BandNo,RRNBandPrice");
            for r in records {
                println!(
                    "{},{},{:.4},{},{},{},{},{},{}",
                    format_market_time(r.interval_end),
                    r.region,
                    r.intensity_index,
                    r.dominant_unit_id,
                    r.dominant_energy_source.as_deref().unwrap_or(""),
                    r.dominant_technology.as_deref().unwrap_or(""),
                    r.price.map(|p| format!("{:.2}", p)).unwrap_or_default(),
                    r.dominant_band_no.map(|b| b.to_string()).unwrap_or_default(),
                    r.dominant_band_price.map(|p| format!("{:.2}", p)).unwrap_or_default()
                );
            }
        }
        OutputFormat::Summary => {
            let mut by_region: std::collections::BTreeMap<&str, (f64, usize)> = std::collections::BTreeMap::new();
            for r in records {
                let entry = by_region.entry(r.region.as_str()).or_insert((0.0, 0));
                entry.0 += r.intensity_index;
                entry.1 += 1;
            }

            println!("Marginal Emissions Summary");
            println!("==========================");
            println!("Intervals resolved: {}", records.len());
            println!();
            for (region, (total, count)) in by_region {
                println!("  {}: mean marginal intensity {:.4} tCO2e/MWh over {} intervals", region, total / count as f64, count);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Total(args) => {
            info!("Starting total emissions calculation");
            let pipeline = build_pipeline(&args.common, args.keep_missing)?;
            let request = TotalEmissionsRequest {
                region_filter: (!args.regions.is_empty()).then(|| args.regions.clone()),
                granularity: args.by.parse::<Granularity>()?,
                sent_out: !args.as_generated,
                use_ramp: !args.step,
            };
            let result = pipeline.get_total_emissions(&args.common.start, &args.common.end, &request)?;
            print_total(&result, &args.common.output)?;
        }
        Command::Marginal(common) => {
            info!("Starting marginal emissions calculation");
            let pipeline = build_pipeline(&common, false)?;
            let records = pipeline.get_marginal_emissions(&common.start, &common.end)?;
            print_marginal(&records, &common.output)?;
        }
    }

    Ok(())
}
