use crate::config::MarginalOptions;
use crate::data_loader::MarketDataSource;
use crate::error::{NemedError, Result};
use crate::intervals::{format_market_time, validate_range, IntervalRange};
use crate::models::{MarginalEmissionRecord, PriceSettingRecord};
use crate::unit_mapping::{technology_label, FactorTable, UnitRegistry};
use chrono::NaiveDateTime;
use log::{info, warn};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Marginal emissions intensity of the price-setting units.
pub struct MarginalResolver {
    options: MarginalOptions,
}

impl MarginalResolver {
    pub fn new(options: MarginalOptions) -> Self {
        Self { options }
    }

    pub fn compute(
        &self,
        source: &dyn MarketDataSource,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<MarginalEmissionRecord>> {
        validate_range(start, end)?;
        let range = IntervalRange::new(start, end)?;

        let setters = source.fetch_price_setters(range)?;
        if setters.is_empty() {
            return Err(NemedError::NoData(format!(
                "no price setter records between {} and {}",
                format_market_time(start),
                format_market_time(end)
            )));
        }

        let registry = UnitRegistry::build(&[], &source.fetch_generator_info()?, &[]);
        let factors = FactorTable::from_records(source.fetch_emissions_factors(range)?);

        info!("Resolving marginal emitters from {} price setter records", setters.len());
        Ok(self.resolve(&setters, &registry, &factors))
    }

    /// Weighted intensity and dominant unit per `(interval, region)`.
    pub fn resolve(
        &self,
        setters: &[PriceSettingRecord],
        registry: &UnitRegistry,
        factors: &FactorTable,
    ) -> Vec<MarginalEmissionRecord> {
        let mut groups: BTreeMap<(NaiveDateTime, &str), Vec<&PriceSettingRecord>> = BTreeMap::new();
        for setter in setters {
            if self.options.excluded_units.iter().any(|u| u == &setter.unit_id) {
                continue;
            }
            groups
                .entry((setter.period_id, setter.region.as_str()))
                .or_default()
                .push(setter);
        }

        let mut unmatched = 0usize;
        let mut unweighted = 0usize;
        let mut records = Vec::with_capacity(groups.len());

        for ((interval_end, region), members) in groups {
            let mut intensity_index = 0.0;
            for member in &members {
                let intensity = factors
                    .lookup(&member.unit_id, interval_end)
                    .and_then(|f| f.intensity);
                match (member.increase, intensity) {
                    (Some(weight), Some(intensity)) => intensity_index += weight * intensity,
                    (_, None) => unmatched += 1,
                    _ => {}
                }
            }

            let mut weighted: Vec<&&PriceSettingRecord> =
                members.iter().filter(|m| m.increase.is_some()).collect();
            weighted.sort_by(|a, b| a.increase.partial_cmp(&b.increase).unwrap_or(Ordering::Equal));
            let Some(dominant) = weighted.last() else {
                unweighted += 1;
                continue;
            };

            let unit = registry.get(&dominant.unit_id);
            let dominant_energy_source = factors
                .lookup(&dominant.unit_id, interval_end)
                .and_then(|f| f.energy_source.clone())
                .or_else(|| unit.and_then(|u| u.fuel_source.clone()));
            let dominant_technology = unit.and_then(|u| {
                technology_label(u.fuel_source.as_deref(), u.technology.as_deref(), Some(u.dispatch_type))
            });

            records.push(MarginalEmissionRecord {
                interval_end,
                region: region.to_string(),
                intensity_index,
                dominant_unit_id: dominant.unit_id.clone(),
                dominant_energy_source,
                dominant_technology,
                price: members.iter().find_map(|m| m.price),
                dominant_band_no: dominant.band_no,
                dominant_band_price: dominant.rrn_band_price,
            });
        }

        if unweighted > 0 {
            warn!(
                "{} interval/region groups had no price setter with an increase and were skipped",
                unweighted
            );
        }

        if unmatched > 0 {
            warn!(
                "{} price setter contributions have no emissions factor and were left out of the weighted sum",
                unmatched
            );
        }
        records
    }
}

pub fn compute_marginal_emissions(
    source: &dyn MarketDataSource,
    start: NaiveDateTime,
    end: NaiveDateTime,
    options: &MarginalOptions,
) -> Result<Vec<MarginalEmissionRecord>> {
    MarginalResolver::new(options.clone()).compute(source, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BASSLINK_UNIT_ID;
    use crate::data_loader::test_support::InMemorySource;
    use crate::intervals::parse_market_time;
    use crate::models::{DispatchType, GeneratorInfoRow};

    fn t(s: &str) -> NaiveDateTime {
        parse_market_time(s, "test").unwrap()
    }

    fn setter(period: &str, region: &str, unit: &str, increase: Option<f64>) -> PriceSettingRecord {
        PriceSettingRecord {
            period_id: t(period),
            region: region.to_string(),
            unit_id: unit.to_string(),
            increase,
            price: Some(85.0),
            band_no: Some(1),
            rrn_band_price: Some(85.0),
        }
    }

    fn source() -> InMemorySource {
        let mut source = InMemorySource::default();
        source.add_factor("COAL", 2022, 1, Some(0.8), "Black coal");
        source.add_factor("GAS", 2022, 1, Some(1.0), "Natural Gas (Pipeline)");
        source.generator_info.push(GeneratorInfoRow {
            unit_id: "GAS".to_string(),
            dispatch_type: Some(DispatchType::Generator),
            fuel_source: Some("Natural Gas".to_string()),
            technology: Some("Open Cycle Gas turbines (OCGT)".to_string()),
        });
        source.generator_info.push(GeneratorInfoRow {
            unit_id: "COAL".to_string(),
            dispatch_type: Some(DispatchType::Generator),
            fuel_source: Some("Black Coal".to_string()),
            technology: Some("Steam Sub-Critical".to_string()),
        });
        source
    }

    #[test]
    fn test_weighted_sum_and_dominant_unit() {
        let mut source = source();
        source.price_setters = vec![
            setter("2022/01/01 00:05", "NSW1", "COAL", Some(0.6)),
            setter("2022/01/01 00:05", "NSW1", "GAS", Some(0.4)),
        ];

        let records = compute_marginal_emissions(
            &source,
            t("2022/01/01 00:00"),
            t("2022/01/01 00:05"),
            &MarginalOptions::default(),
        )
        .unwrap();

        assert_eq!(records.len(), 1);
        assert!((records[0].intensity_index - 0.88).abs() < 1e-9);
        assert_eq!(records[0].dominant_unit_id, "COAL");
        assert_eq!(records[0].dominant_energy_source.as_deref(), Some("Black coal"));
        assert_eq!(records[0].dominant_technology.as_deref(), Some("Black Coal"));
        assert_eq!(records[0].price, Some(85.0));
        assert_eq!(records[0].dominant_band_no, Some(1));
        assert_eq!(records[0].dominant_band_price, Some(85.0));
    }

    #[test]
    fn test_interconnector_excluded() {
        let mut source = source();
        source.price_setters = vec![
            setter("2022/01/01 00:05", "TAS1", BASSLINK_UNIT_ID, Some(5.0)),
            setter("2022/01/01 00:05", "TAS1", "GAS", Some(0.5)),
        ];
        let records = compute_marginal_emissions(
            &source,
            t("2022/01/01 00:00"),
            t("2022/01/01 00:05"),
            &MarginalOptions::default(),
        )
        .unwrap();
        assert_eq!(records[0].dominant_unit_id, "GAS");
        assert!((records[0].intensity_index - 0.5).abs() < 1e-9);
        assert_eq!(records[0].dominant_technology.as_deref(), Some("OCGT"));
    }

    #[test]
    fn test_missing_factor_contributes_nothing_but_can_dominate() {
        let mut source = source();
        source.price_setters = vec![
            setter("2022/01/01 00:05", "QLD1", "NOFACTOR", Some(0.7)),
            setter("2022/01/01 00:05", "QLD1", "GAS", Some(0.3)),
        ];
        let records = compute_marginal_emissions(
            &source,
            t("2022/01/01 00:00"),
            t("2022/01/01 00:05"),
            &MarginalOptions::default(),
        )
        .unwrap();
        assert!((records[0].intensity_index - 0.3).abs() < 1e-9);
        assert_eq!(records[0].dominant_unit_id, "NOFACTOR");
        assert_eq!(records[0].dominant_energy_source, None);
    }

    #[test]
    fn test_tie_resolves_to_last_in_stable_order() {
        let resolver = MarginalResolver::new(MarginalOptions::default());
        let setters = vec![
            setter("2022/01/01 00:05", "SA1", "FIRST", Some(0.5)),
            setter("2022/01/01 00:05", "SA1", "SECOND", Some(0.5)),
            setter("2022/01/01 00:05", "SA1", "NULLW", None),
        ];
        let records = resolver.resolve(&setters, &UnitRegistry::default(), &FactorTable::default());
        assert_eq!(records[0].dominant_unit_id, "SECOND");
    }

    #[test]
    fn test_group_without_weights_has_no_dominant_unit() {
        let resolver = MarginalResolver::new(MarginalOptions::default());
        let setters = vec![
            setter("2022/01/01 00:05", "SA1", "NULLA", None),
            setter("2022/01/01 00:05", "SA1", "NULLB", None),
            setter("2022/01/01 00:05", "VIC1", "WEIGHTED", Some(1.0)),
        ];
        let records = resolver.resolve(&setters, &UnitRegistry::default(), &FactorTable::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].region, "VIC1");
        assert_eq!(records[0].dominant_unit_id, "WEIGHTED");
    }

    #[test]
    fn test_groups_by_interval_and_region() {
        let mut source = source();
        source.price_setters = vec![
            setter("2022/01/01 00:10", "VIC1", "GAS", Some(1.0)),
            setter("2022/01/01 00:05", "VIC1", "COAL", Some(1.0)),
            setter("2022/01/01 00:05", "NSW1", "GAS", Some(1.0)),
        ];
        let records = compute_marginal_emissions(
            &source,
            t("2022/01/01 00:00"),
            t("2022/01/01 00:10"),
            &MarginalOptions::default(),
        )
        .unwrap();
        let keys: Vec<(NaiveDateTime, &str)> = records.iter().map(|r| (r.interval_end, r.region.as_str())).collect();
        assert_eq!(
            keys,
            vec![
                (t("2022/01/01 00:05"), "NSW1"),
                (t("2022/01/01 00:05"), "VIC1"),
                (t("2022/01/01 00:10"), "VIC1"),
            ]
        );
    }

    #[test]
    fn test_no_price_setters_is_an_error() {
        let source = source();
        let err = compute_marginal_emissions(
            &source,
            t("2022/01/01 00:00"),
            t("2022/01/01 00:05"),
            &MarginalOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, NemedError::NoData(_)));
    }
}
