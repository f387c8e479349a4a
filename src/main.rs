use anyhow::Result;
use std::path::PathBuf;

mod archive_verifier;
mod intensity_chart;
mod mms_extractor;
mod mms_table_processor;

fn print_usage() {
    println!("🚀 NEM Emissions Processor");
    println!("{}", "=".repeat(60));
    println!("Usage:");
    println!("  --extract <directory>                              Unzip NEMWEB/MMS archives into <directory>/csv");
    println!("  --ingest <csv_dir> <archive_dir>                   Convert MMS CSV tables into monthly Parquet");
    println!("  --verify <archive_dir>                             Check dispatch tables for duplicates and gaps");
    println!("  --chart <archive_dir> <cache_dir> <start> <end> [by]  Chart regional emissions intensity");
    println!();
    println!("Example: --chart archive cache \"2022/01/01 00:00\" \"2022/02/01 00:00\" day");
}

fn main() -> Result<()> {
    env_logger::init();

    // Set Rayon to use all available cores
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()?;

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("--extract") if args.len() > 2 => {
            mms_extractor::extract_mms_archives(PathBuf::from(&args[2]))?;
        }
        Some("--ingest") if args.len() > 3 => {
            let start = std::time::Instant::now();
            mms_table_processor::ingest_mms_tables(PathBuf::from(&args[2]), PathBuf::from(&args[3]))?;
            println!("\n✅ Processing complete in {:?}!", start.elapsed());
        }
        Some("--verify") if args.len() > 2 => {
            archive_verifier::verify_archive(&PathBuf::from(&args[2]))?;
        }
        Some("--chart") if args.len() > 5 => {
            let by = args.get(6).map(String::as_str).unwrap_or("day");
            intensity_chart::generate_intensity_chart(
                &PathBuf::from(&args[2]),
                &PathBuf::from(&args[3]),
                &args[4],
                &args[5],
                by,
            )?;
        }
        _ => print_usage(),
    }

    Ok(())
}
