//! Reconciliation of the two raw dispatch sources into one value per unit
//! and interval.

use crate::config::{OverwritePolicy, ReconciliationConfig};
use crate::error::Result;
use crate::models::{DispatchLoadRow, DispatchObservation, ScadaRow};
use chrono::NaiveDateTime;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};

type IntervalKey = (NaiveDateTime, String);

/// At intervals where an intervention pricing run occurred, keep only the
/// intervention rows. Other intervals are untouched.
pub fn apply_interventions(rows: &[DispatchLoadRow]) -> Vec<DispatchLoadRow> {
    let intervened: HashSet<NaiveDateTime> = rows
        .iter()
        .filter(|r| r.intervention)
        .map(|r| r.interval_end)
        .collect();

    if intervened.is_empty() {
        return rows.to_vec();
    }

    info!(
        "Intervention periods found in {} intervals. Keeping intervention dispatch for those intervals",
        intervened.len()
    );
    rows.iter()
        .filter(|r| r.intervention || !intervened.contains(&r.interval_end))
        .cloned()
        .collect()
}

/// Collapse repeated (interval, unit) values to their mean. Null values are
/// skipped so the other source can fill the gap.
fn average_duplicates<I>(values: I, label: &str) -> BTreeMap<IntervalKey, f64>
where
    I: IntoIterator<Item = (NaiveDateTime, String, Option<f64>)>,
{
    let mut sums: BTreeMap<IntervalKey, (f64, usize)> = BTreeMap::new();
    let mut duplicates = 0usize;

    for (interval_end, unit_id, value) in values {
        let Some(value) = value else { continue };
        let entry = sums.entry((interval_end, unit_id)).or_insert((0.0, 0));
        if entry.1 > 0 {
            duplicates += 1;
        }
        entry.0 += value;
        entry.1 += 1;
    }

    if duplicates > 0 {
        warn!(
            "Found {} duplicate timestamped {} values. Averaging duplicates",
            duplicates, label
        );
    }

    sums.into_iter()
        .map(|(key, (sum, count))| (key, sum / count as f64))
        .collect()
}

/// Outer-join DISPATCHLOAD and SCADA values per (unit, interval).
///
/// Only one source present: that value is used. Both present and within
/// `tolerance_mw`: their mean. Both present and further apart: resolved by
/// the overwrite policy and reported as a warning. Output is ordered by
/// interval then unit.
pub fn reconcile_dispatch(
    load: &[DispatchLoadRow],
    scada: &[ScadaRow],
    config: &ReconciliationConfig,
) -> Result<Vec<DispatchObservation>> {
    config.validate()?;

    let initial = if config.use_initialmw {
        let rows = apply_interventions(load);
        average_duplicates(
            rows.into_iter().map(|r| (r.interval_end, r.unit_id, r.initial_mw)),
            "INITIALMW",
        )
    } else {
        BTreeMap::new()
    };

    let measured = if config.use_scada {
        average_duplicates(
            scada
                .iter()
                .map(|r| (r.interval_end, r.unit_id.clone(), r.scada_mw)),
            "SCADAVALUE",
        )
    } else {
        BTreeMap::new()
    };

    let keys: BTreeSet<&IntervalKey> = initial.keys().chain(measured.keys()).collect();
    let mut observations = Vec::with_capacity(keys.len());
    let mut discrepancies = 0usize;

    for key in keys {
        let value = match (initial.get(key), measured.get(key)) {
            (Some(&initial_mw), Some(&scada_mw)) => {
                if (initial_mw - scada_mw).abs() < config.tolerance_mw {
                    (initial_mw + scada_mw) / 2.0
                } else {
                    discrepancies += 1;
                    match config.overwrite {
                        OverwritePolicy::InitialMw => initial_mw,
                        OverwritePolicy::Scada => scada_mw,
                        OverwritePolicy::Average => (initial_mw + scada_mw) / 2.0,
                    }
                }
            }
            (Some(&initial_mw), None) => initial_mw,
            (None, Some(&scada_mw)) => scada_mw,
            (None, None) => continue,
        };

        let dispatch_mw = if config.clamp_negative && value < 0.0 {
            0.0
        } else {
            value
        };

        observations.push(DispatchObservation {
            unit_id: key.1.clone(),
            interval_end: key.0,
            dispatch_mw,
        });
    }

    if discrepancies > 0 {
        warn!(
            "Discrepancy between SCADAVALUE and INITIALMW for {} unit intervals. Overwriting using {:?}",
            discrepancies, config.overwrite
        );
    }

    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervals::parse_market_time;
    use std::collections::HashSet;

    fn t(s: &str) -> NaiveDateTime {
        parse_market_time(s, "test").unwrap()
    }

    fn load(unit: &str, time: &str, mw: f64, intervention: bool) -> DispatchLoadRow {
        DispatchLoadRow {
            unit_id: unit.to_string(),
            interval_end: t(time),
            initial_mw: Some(mw),
            intervention,
        }
    }

    fn scada(unit: &str, time: &str, mw: Option<f64>) -> ScadaRow {
        ScadaRow {
            unit_id: unit.to_string(),
            interval_end: t(time),
            scada_mw: mw,
        }
    }

    fn both_sources(overwrite: OverwritePolicy) -> ReconciliationConfig {
        ReconciliationConfig {
            use_initialmw: true,
            use_scada: true,
            overwrite,
            ..Default::default()
        }
    }

    #[test]
    fn test_one_observation_per_unit_interval() {
        let loads = vec![
            load("A", "2022/01/01 00:05", 10.0, false),
            load("A", "2022/01/01 00:05", 12.0, false),
            load("B", "2022/01/01 00:05", 5.0, false),
        ];
        let scadas = vec![
            scada("A", "2022/01/01 00:05", Some(11.5)),
            scada("A", "2022/01/01 00:05", Some(11.0)),
            scada("C", "2022/01/01 00:10", Some(3.0)),
        ];

        let result = reconcile_dispatch(&loads, &scadas, &both_sources(OverwritePolicy::Scada)).unwrap();

        let keys: HashSet<(String, NaiveDateTime)> = result
            .iter()
            .map(|o| (o.unit_id.clone(), o.interval_end))
            .collect();
        assert_eq!(keys.len(), result.len());
        assert_eq!(result.len(), 3);

        // A: initial mean 11.0, scada mean 11.25, within tolerance -> mean of both
        let a = result.iter().find(|o| o.unit_id == "A").unwrap();
        assert!((a.dispatch_mw - 11.125).abs() < 1e-9);
    }

    #[test]
    fn test_single_source_fills_gaps() {
        let loads = vec![load("A", "2022/01/01 00:05", 10.0, false)];
        let scadas = vec![
            scada("A", "2022/01/01 00:05", None),
            scada("B", "2022/01/01 00:05", Some(7.0)),
        ];
        let result = reconcile_dispatch(&loads, &scadas, &both_sources(OverwritePolicy::Scada)).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].unit_id, "A");
        assert_eq!(result[0].dispatch_mw, 10.0);
        assert_eq!(result[1].dispatch_mw, 7.0);
    }

    #[test]
    fn test_overwrite_policies_beyond_tolerance() {
        let loads = vec![load("A", "2022/01/01 00:05", 10.0, false)];
        let scadas = vec![scada("A", "2022/01/01 00:05", Some(20.0))];

        let pick = |policy| {
            reconcile_dispatch(&loads, &scadas, &both_sources(policy)).unwrap()[0].dispatch_mw
        };
        assert_eq!(pick(OverwritePolicy::Scada), 20.0);
        assert_eq!(pick(OverwritePolicy::InitialMw), 10.0);
        assert_eq!(pick(OverwritePolicy::Average), 15.0);
    }

    #[test]
    fn test_interventions_replace_pricing_run() {
        let loads = vec![
            load("A", "2022/01/01 00:05", 10.0, false),
            load("A", "2022/01/01 00:05", 30.0, true),
            load("A", "2022/01/01 00:10", 12.0, false),
        ];
        let filtered = apply_interventions(&loads);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|r| r.initial_mw != Some(10.0)));

        let config = ReconciliationConfig {
            use_initialmw: true,
            use_scada: false,
            ..Default::default()
        };
        let result = reconcile_dispatch(&loads, &[], &config).unwrap();
        assert_eq!(result[0].dispatch_mw, 30.0);
        assert_eq!(result[1].dispatch_mw, 12.0);
    }

    #[test]
    fn test_negative_values_clamped() {
        let scadas = vec![scada("A", "2022/01/01 00:05", Some(-2.5))];
        let clamped = reconcile_dispatch(&[], &scadas, &ReconciliationConfig::default()).unwrap();
        assert_eq!(clamped[0].dispatch_mw, 0.0);

        let raw = ReconciliationConfig {
            clamp_negative: false,
            ..Default::default()
        };
        let kept = reconcile_dispatch(&[], &scadas, &raw).unwrap();
        assert_eq!(kept[0].dispatch_mw, -2.5);
    }

    #[test]
    fn test_default_config_ignores_dispatchload() {
        let loads = vec![load("A", "2022/01/01 00:05", 10.0, false)];
        let result = reconcile_dispatch(&loads, &[], &ReconciliationConfig::default()).unwrap();
        assert!(result.is_empty());
    }
}
