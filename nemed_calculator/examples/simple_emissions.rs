use chrono::{Duration, NaiveDate};
use nemed_calculator::intervals::IntervalRange;
use nemed_calculator::models::{DispatchObservation, DispatchType, EmissionsFactorRecord, UnitReference};
use nemed_calculator::unit_mapping::{FactorTable, UnitRegistry};
use nemed_calculator::{Aggregator, EmissionsCalculator, EmissionsOptions, Granularity};

fn main() {
    // Two units in different regions: a coal unit and a gas peaker
    let mut registry = UnitRegistry::default();
    registry.add_unit(UnitReference {
        unit_id: "COAL1".to_string(),
        region: "NSW1".to_string(),
        dispatch_type: DispatchType::Generator,
        fuel_source: Some("Fossil".to_string()),
        technology: Some("Steam Sub-Critical".to_string()),
        aux_load_pct: Some(6.0),
    });
    registry.add_unit(UnitReference {
        unit_id: "PEAK1".to_string(),
        region: "SA1".to_string(),
        dispatch_type: DispatchType::Generator,
        fuel_source: Some("Fossil".to_string()),
        technology: Some("Open Cycle Gas turbines (OCGT)".to_string()),
        aux_load_pct: None,
    });

    let factors = FactorTable::from_records(vec![
        EmissionsFactorRecord {
            unit_id: "COAL1".to_string(),
            year: 2022,
            month: 3,
            intensity: Some(0.92),
            energy_source: Some("Black coal".to_string()),
        },
        EmissionsFactorRecord {
            unit_id: "PEAK1".to_string(),
            year: 2022,
            month: 3,
            intensity: Some(0.65),
            energy_source: Some("Natural Gas (Pipeline)".to_string()),
        },
    ]);

    // Two hours of dispatch: coal flat at 500 MW, the peaker ramping up in the second hour
    let start = NaiveDate::from_ymd_opt(2022, 3, 1)
        .unwrap()
        .and_hms_opt(16, 0, 0)
        .unwrap();
    let mut dispatch = vec![];
    for i in 0..=24 {
        let interval_end = start + Duration::minutes(5 * i);
        dispatch.push(DispatchObservation {
            unit_id: "COAL1".to_string(),
            interval_end,
            dispatch_mw: 500.0,
        });
        dispatch.push(DispatchObservation {
            unit_id: "PEAK1".to_string(),
            interval_end,
            dispatch_mw: if i < 12 { 0.0 } else { 10.0 * (i - 11) as f64 },
        });
    }

    let range = IntervalRange::new(start, start + Duration::hours(2)).unwrap();
    let calculator = EmissionsCalculator::new(EmissionsOptions::default());
    let records = calculator
        .calculate(&dispatch, &registry, &factors, range)
        .unwrap();
    let hourly = Aggregator::default().aggregate(&records, Granularity::Hour, true);

    println!("NEM Emissions Example");
    println!("=====================");
    println!("Unit interval records: {}", records.len());
    println!();
    for row in &hourly {
        println!(
            "  {} to {}  {:<5} energy {:>8.2} MWh  emissions {:>8.2} tCO2e  intensity {:.4}",
            row.time_begin.format("%H:%M"),
            row.time_end.format("%H:%M"),
            row.region,
            row.energy,
            row.total_emissions,
            row.intensity_index
        );
    }
}
