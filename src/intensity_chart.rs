use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDateTime};
use nemed_calculator::{Granularity, Pipeline, PipelineConfig, TotalEmissions, TotalEmissionsRequest};
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Intensity index per region as `(hours since origin, index)` points,
/// plotted at the end of each bucket.
pub fn intensity_lines(result: &TotalEmissions) -> (Option<NaiveDateTime>, BTreeMap<String, Vec<(f64, f64)>>) {
    let origin = result.series.iter().map(|r| r.time_begin).min();
    let mut lines: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();

    if let Some(origin) = origin {
        for row in &result.series {
            let hours = (row.time_end - origin).num_minutes() as f64 / 60.0;
            lines
                .entry(row.region.clone())
                .or_default()
                .push((hours, row.intensity_index));
        }
    }
    for points in lines.values_mut() {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    (origin, lines)
}

pub fn render_intensity_chart(result: &TotalEmissions, output_path: &Path) -> Result<()> {
    let (origin, lines) = intensity_lines(result);
    let origin = origin.ok_or_else(|| anyhow!("No emissions series to chart"))?;

    let max_x = lines
        .values()
        .flatten()
        .map(|(x, _)| *x)
        .fold(0.0, f64::max);
    let max_y = lines
        .values()
        .flatten()
        .map(|(_, y)| *y)
        .fold(0.0, f64::max);

    let root = BitMapBackend::new(output_path, (1200, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Emissions Intensity Index ({})", result.granularity),
            ("sans-serif", 30).into_font(),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..max_x.max(1.0), 0.0..(max_y * 1.1).max(0.1))?;

    chart
        .configure_mesh()
        .x_desc("Market time")
        .y_desc("Intensity (tCO2e/MWh)")
        .x_label_formatter(&|hours| {
            let t = origin + Duration::minutes((hours * 60.0).round() as i64);
            t.format("%Y/%m/%d %H:%M").to_string()
        })
        .draw()?;

    for (idx, (region, points)) in lines.iter().enumerate() {
        let color = Palette99::pick(idx);
        chart
            .draw_series(LineSeries::new(points.iter().copied(), &color))?
            .label(region.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], Palette99::pick(idx)));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Compute totals from the archive for `(start, end]` and chart them into
/// `<cache_dir>/charts`.
pub fn generate_intensity_chart(
    archive_dir: &Path,
    cache_dir: &Path,
    start: &str,
    end: &str,
    by: &str,
) -> Result<PathBuf> {
    println!("📊 Generating Emissions Intensity Chart");
    println!("{}", "=".repeat(80));

    let pipeline = Pipeline::with_archive(cache_dir, archive_dir, PipelineConfig::default())?;
    let request = TotalEmissionsRequest {
        granularity: by.parse::<Granularity>()?,
        ..Default::default()
    };
    let result = pipeline.get_total_emissions(start, end, &request)?;
    println!("Loaded {} aggregated rows across {} regions", result.series.len(), result.regions().len());

    let output_dir = cache_dir.join("charts");
    std::fs::create_dir_all(&output_dir)?;
    let file_name = format!(
        "intensity_{}_{}_{}.png",
        request.granularity,
        start.replace(['/', ' ', ':'], ""),
        end.replace(['/', ' ', ':'], "")
    );
    let output_path = output_dir.join(file_name);

    render_intensity_chart(&result, &output_path)?;
    println!("✅ Chart written to {}", output_path.display());
    Ok(output_path)
}
