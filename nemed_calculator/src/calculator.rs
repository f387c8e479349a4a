use crate::config::EmissionsOptions;
use crate::data_loader::MarketDataSource;
use crate::dispatch::reconcile_dispatch;
use crate::error::{NemedError, Result};
use crate::intervals::{dispatch_interval, interval_hours, validate_range, IntervalRange};
use crate::models::{DispatchObservation, IntervalEmissionRecord};
use crate::unit_mapping::{FactorTable, UnitRegistry};
use chrono::NaiveDateTime;
use log::{info, warn};
use std::collections::BTreeMap;

/// Per-unit, per-interval energy and emissions.
pub struct EmissionsCalculator {
    options: EmissionsOptions,
}

impl EmissionsCalculator {
    pub fn new(options: EmissionsOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EmissionsOptions {
        &self.options
    }

    /// Fetch everything needed for intervals ending in `(start, end]` and
    /// compute their emissions.
    pub fn compute(
        &self,
        source: &dyn MarketDataSource,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<IntervalEmissionRecord>> {
        validate_range(start, end)?;
        let range = IntervalRange::new(start, end)?;

        // Ramp energy needs the observation stamped `start` as predecessor
        let dispatch_range = if self.options.use_ramp {
            range.extend_back(1)
        } else {
            range
        };

        let reconciliation = &self.options.reconciliation;
        let load = if reconciliation.use_initialmw {
            source.fetch_dispatch_load(dispatch_range)?
        } else {
            vec![]
        };
        let scada = if reconciliation.use_scada {
            source.fetch_dispatch_scada(dispatch_range)?
        } else {
            vec![]
        };
        let dispatch = reconcile_dispatch(&load, &scada, reconciliation)?;

        let registry = UnitRegistry::build(
            &source.fetch_unit_details()?,
            &source.fetch_generator_info()?,
            &source.fetch_aux_load()?,
        );
        let factors = FactorTable::from_records(source.fetch_emissions_factors(range)?);

        info!(
            "Computing emissions for {} dispatch observations, {} units, {} factor records",
            dispatch.len(),
            registry.len(),
            factors.len()
        );
        self.calculate(&dispatch, &registry, &factors, range)
    }

    /// Pure part of the calculation. `dispatch` may include the observation
    /// stamped `range.start`; it only feeds ramp interpolation.
    pub fn calculate(
        &self,
        dispatch: &[DispatchObservation],
        registry: &UnitRegistry,
        factors: &FactorTable,
        range: IntervalRange,
    ) -> Result<Vec<IntervalEmissionRecord>> {
        let regions = self.options.regions();
        if let Some(regions) = regions {
            let known = registry.regions();
            if !regions.iter().any(|r| known.iter().any(|k| k.eq_ignore_ascii_case(r))) {
                return Err(NemedError::Validation(format!(
                    "filter_regions values {:?} were not found in NEM regions {:?}",
                    regions, known
                )));
            }
        }

        let mut by_unit: BTreeMap<&str, Vec<&DispatchObservation>> = BTreeMap::new();
        for obs in dispatch {
            let Some(unit) = registry.get(&obs.unit_id) else { continue };
            if !unit.is_generator() || !unit.has_region() {
                continue;
            }
            if let Some(regions) = regions {
                if !regions.iter().any(|r| r.eq_ignore_ascii_case(&unit.region)) {
                    continue;
                }
            }
            by_unit.entry(obs.unit_id.as_str()).or_default().push(obs);
        }

        let hours = interval_hours();
        let mut records = Vec::new();
        let mut missing_factor = 0usize;

        for (unit_id, mut series) in by_unit {
            let Some(unit) = registry.get(unit_id) else { continue };
            series.sort_by_key(|o| o.interval_end);

            let mut previous: Option<&DispatchObservation> = None;
            for obs in series {
                let energy = if self.options.use_ramp {
                    let predecessor = previous
                        .filter(|p| p.interval_end + dispatch_interval() == obs.interval_end);
                    previous = Some(obs);
                    match predecessor {
                        Some(p) => (0.5 * (obs.dispatch_mw - p.dispatch_mw) + p.dispatch_mw) * hours,
                        None => continue,
                    }
                } else {
                    obs.dispatch_mw * hours
                };

                if !range.contains(obs.interval_end) {
                    continue;
                }

                let factor = factors.lookup(unit_id, obs.interval_end);
                let hydro = factor.map_or(false, |f| f.is_hydro()) || unit.is_hydro();
                let intensity = match factor.and_then(|f| f.intensity) {
                    Some(intensity) => Some(intensity),
                    None if hydro => Some(0.0),
                    None => None,
                };
                if intensity.is_none() {
                    missing_factor += 1;
                    if self.options.drop_missing_factor {
                        continue;
                    }
                }

                let (energy_sent_out_mwh, total_emissions) = if self.options.sent_out {
                    let sent_out = energy * unit.sent_out_fraction();
                    (Some(sent_out), intensity.map(|i| sent_out * i))
                } else {
                    (None, intensity.map(|i| energy * i))
                };

                records.push(IntervalEmissionRecord {
                    unit_id: unit_id.to_string(),
                    interval_end: obs.interval_end,
                    region: unit.region.clone(),
                    energy_mwh: energy,
                    energy_sent_out_mwh,
                    emissions_intensity: intensity,
                    total_emissions,
                });
            }
        }

        if missing_factor > 0 {
            warn!(
                "{} unit intervals have no emissions factor and were {}",
                missing_factor,
                if self.options.drop_missing_factor { "dropped" } else { "kept without emissions" }
            );
        }
        if records.is_empty() {
            warn!("Emissions result is empty. Check the region filter and the requested range");
        }

        records.sort_by(|a, b| (a.interval_end, &a.unit_id).cmp(&(b.interval_end, &b.unit_id)));
        Ok(records)
    }
}

/// Interval emissions for `(start, end]` using `options`.
pub fn compute_interval_emissions(
    source: &dyn MarketDataSource,
    start: NaiveDateTime,
    end: NaiveDateTime,
    options: &EmissionsOptions,
) -> Result<Vec<IntervalEmissionRecord>> {
    EmissionsCalculator::new(options.clone()).compute(source, start, end)
}
