use crate::models::{
    AuxLoadRow, DispatchType, EmissionsFactorRecord, GeneratorInfoRow, GensetFactorRow,
    GensetMapping, UnitDetailRow, UnitReference,
};
use chrono::{Datelike, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Static unit attributes keyed by DUID.
#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    units: HashMap<String, UnitReference>,
}

impl UnitRegistry {
    /// Join the registration tables into one reference record per unit.
    ///
    /// The latest DUDETAILSUMMARY row and the latest aux-load row per unit
    /// win. Units that only appear in the generator info list are registered
    /// without a region. They describe price setters but never produce
    /// interval emissions.
    pub fn build(details: &[UnitDetailRow], info: &[GeneratorInfoRow], aux: &[AuxLoadRow]) -> Self {
        let mut latest: HashMap<&str, &UnitDetailRow> = HashMap::new();
        for row in details {
            latest
                .entry(row.unit_id.as_str())
                .and_modify(|current| {
                    if row.start_date >= current.start_date {
                        *current = row;
                    }
                })
                .or_insert(row);
        }

        let mut latest_aux: HashMap<&str, &AuxLoadRow> = HashMap::new();
        for row in aux {
            latest_aux
                .entry(row.unit_id.as_str())
                .and_modify(|current| {
                    if row.effective_from >= current.effective_from {
                        *current = row;
                    }
                })
                .or_insert(row);
        }

        let info_by_unit: HashMap<&str, &GeneratorInfoRow> =
            info.iter().map(|row| (row.unit_id.as_str(), row)).collect();

        let mut units = HashMap::new();
        for (unit_id, detail) in latest {
            let descriptors = info_by_unit.get(unit_id);
            units.insert(
                unit_id.to_string(),
                UnitReference {
                    unit_id: unit_id.to_string(),
                    region: detail.region.clone(),
                    dispatch_type: detail.dispatch_type,
                    fuel_source: descriptors.and_then(|d| d.fuel_source.clone()),
                    technology: descriptors.and_then(|d| d.technology.clone()),
                    aux_load_pct: latest_aux.get(unit_id).and_then(|a| a.pct_aux_load),
                },
            );
        }

        for row in info {
            if units.contains_key(&row.unit_id) {
                continue;
            }
            let Some(dispatch_type) = row.dispatch_type else { continue };
            units.insert(
                row.unit_id.clone(),
                UnitReference {
                    unit_id: row.unit_id.clone(),
                    region: String::new(),
                    dispatch_type,
                    fuel_source: row.fuel_source.clone(),
                    technology: row.technology.clone(),
                    aux_load_pct: latest_aux.get(row.unit_id.as_str()).and_then(|a| a.pct_aux_load),
                },
            );
        }

        Self { units }
    }

    pub fn add_unit(&mut self, unit: UnitReference) {
        self.units.insert(unit.unit_id.clone(), unit);
    }

    pub fn get(&self, unit_id: &str) -> Option<&UnitReference> {
        self.units.get(unit_id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Every region with at least one registered unit.
    pub fn regions(&self) -> BTreeSet<&str> {
        self.units
            .values()
            .map(|u| u.region.as_str())
            .filter(|r| !r.is_empty())
            .collect()
    }
}

/// Map monthly genset factors onto DUIDs.
///
/// Each genset follows its latest DUALLOC mapping. A unit fed by several
/// gensets gets the mean of their non-null factors and the energy source of
/// the first genset listed.
pub fn map_genset_factors(
    factors: &[GensetFactorRow],
    mappings: &[GensetMapping],
) -> Vec<EmissionsFactorRecord> {
    let mut latest: HashMap<&str, &GensetMapping> = HashMap::new();
    for mapping in mappings {
        latest
            .entry(mapping.genset_id.as_str())
            .and_modify(|current| {
                if mapping.effective_date >= current.effective_date {
                    *current = mapping;
                }
            })
            .or_insert(mapping);
    }

    struct Accumulator {
        sum: f64,
        count: usize,
        energy_source: Option<String>,
    }

    let mut grouped: BTreeMap<(String, i32, u32), Accumulator> = BTreeMap::new();
    for factor in factors {
        let Some(mapping) = latest.get(factor.genset_id.as_str()) else { continue };
        let acc = grouped
            .entry((mapping.unit_id.clone(), factor.year, factor.month))
            .or_insert_with(|| Accumulator {
                sum: 0.0,
                count: 0,
                energy_source: factor.energy_source.clone(),
            });
        if let Some(intensity) = factor.intensity {
            acc.sum += intensity;
            acc.count += 1;
        }
    }

    grouped
        .into_iter()
        .map(|((unit_id, year, month), acc)| EmissionsFactorRecord {
            unit_id,
            year,
            month,
            intensity: (acc.count > 0).then(|| acc.sum / acc.count as f64),
            energy_source: acc.energy_source,
        })
        .collect()
}

/// Emissions factors keyed by `(unit_id, year, month)`.
#[derive(Debug, Clone, Default)]
pub struct FactorTable {
    factors: HashMap<(String, i32, u32), EmissionsFactorRecord>,
}

impl FactorTable {
    /// First record per key wins.
    pub fn from_records(records: Vec<EmissionsFactorRecord>) -> Self {
        let mut factors = HashMap::with_capacity(records.len());
        for record in records {
            factors
                .entry((record.unit_id.clone(), record.year, record.month))
                .or_insert(record);
        }
        Self { factors }
    }

    /// Factor for the month containing `interval_end`.
    pub fn lookup(&self, unit_id: &str, interval_end: NaiveDateTime) -> Option<&EmissionsFactorRecord> {
        self.factors
            .get(&(unit_id.to_string(), interval_end.year(), interval_end.month()))
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

/// Simplified technology name from the registration list descriptors.
pub fn technology_label(
    fuel: Option<&str>,
    technology: Option<&str>,
    dispatch_type: Option<DispatchType>,
) -> Option<String> {
    let is_load = dispatch_type == Some(DispatchType::Load);

    if let Some(f @ ("Solar" | "Wind" | "Black Coal" | "Brown Coal")) = fuel {
        return Some(f.to_string());
    }

    let label = match technology {
        Some("Battery") if is_load => "Battery Charge",
        Some("Battery") => "Battery Discharge",
        Some(t @ ("Hydro - Gravity" | "Run of River")) => t,
        Some("Pump Storage") if is_load => "Pump Storage Charge",
        Some("Pump Storage") => "Pump Storage Discharge",
        Some("-") if fuel == Some("-") && is_load => "Pump Storage Charge",
        Some("Open Cycle Gas turbines (OCGT)") => "OCGT",
        Some("Combined Cycle Gas Turbine (CCGT)") => "CCGT",
        Some("Steam Sub-Critical")
            if matches!(fuel, Some("Natural Gas / Fuel Oil" | "Natural Gas")) =>
        {
            "Gas Thermal"
        }
        Some(t) if t.contains("Engine") => "Reciprocating Engine",
        _ => return fuel.map(str::to_string),
    };
    Some(label.to_string())
}
