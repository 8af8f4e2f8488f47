//! Single-pass grouped aggregation over the admitted record stream.
//!
//! Three accumulator maps (area, month, area×month) are updated from every
//! record, so the finalized rollups are always mutually consistent for one
//! input file. Accumulators are created lazily on first sight and live only
//! for the duration of a run; idempotency comes from the loader's
//! truncate-first policy, never from merging with prior state.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use heck::ToKebabCase;
use itertools::Itertools;

use crate::{record::TransactionRecord, reduce};

/// Observation counter keyed by label, preserving first-seen order so that
/// top-of-group ties resolve the same way on every run. Bare `HashMap`
/// iteration is randomized per process and would break reproducibility.
#[derive(Debug, Default, Clone)]
pub struct CountMap {
    counts: HashMap<String, u64>,
    order: Vec<String>,
}

impl CountMap {
    pub fn bump(&mut self, label: &str) {
        self.add(label, 1);
    }

    fn add(&mut self, label: &str, amount: u64) {
        match self.counts.get_mut(label) {
            Some(count) => *count += amount,
            None => {
                self.counts.insert(label.to_string(), amount);
                self.order.push(label.to_string());
            }
        }
    }

    pub fn get(&self, label: &str) -> u64 {
        self.counts.get(label).copied().unwrap_or(0)
    }

    /// Label with the highest count; ties keep the first-seen label.
    pub fn top(&self) -> Option<(&str, u64)> {
        let mut best: Option<(&str, u64)> = None;
        for label in &self.order {
            let count = self.counts[label.as_str()];
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((label, count));
            }
        }
        best
    }

    fn merge(&mut self, other: CountMap) {
        for label in other.order {
            let amount = other.counts[label.as_str()];
            self.add(&label, amount);
        }
    }
}

#[derive(Debug, Default)]
pub struct AreaAccumulator {
    pub prices: Vec<f64>,
    pub volumes: Vec<f64>,
    pub sizes: Vec<f64>,
    pub property_types: CountMap,
    pub transactions: u64,
    pub transactions_6m: u64,
    pub transactions_12m: u64,
}

#[derive(Debug, Default)]
pub struct MonthAccumulator {
    pub transactions: u64,
    pub volume: f64,
    pub prices: Vec<f64>,
    pub areas: CountMap,
}

#[derive(Debug, Default)]
pub struct AreaMonthAccumulator {
    pub transactions: u64,
    pub volume: f64,
    pub prices: Vec<f64>,
    pub sizes: Vec<f64>,
    pub villa_count: u64,
    pub apartment_count: u64,
    pub land_count: u64,
}

/// Finalized per-area lifetime statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaStatsRow {
    pub area_name: String,
    pub area_slug: String,
    pub avg_price_sqft: f64,
    pub median_price_sqft: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub avg_transaction_value: f64,
    pub total_transactions_6m: u64,
    pub total_transactions_12m: u64,
    pub total_volume: f64,
    pub top_property_type: String,
    pub avg_unit_size: f64,
    pub data_from_date: NaiveDate,
    pub data_to_date: NaiveDate,
}

/// Finalized market-wide statistics for one calendar month.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyTrendRow {
    pub year: i32,
    pub month: u32,
    pub total_transactions: u64,
    pub total_volume: f64,
    pub avg_price_sqft: f64,
    pub median_price_sqft: f64,
    pub top_area: String,
    pub top_area_transactions: u64,
}

/// Finalized statistics for one area within one calendar month.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaMonthlyStatRow {
    pub area_name: String,
    pub year: i32,
    pub month: u32,
    pub transactions_count: u64,
    pub avg_price_sqft: f64,
    pub total_volume: f64,
    pub avg_unit_size: f64,
    pub villa_count: u64,
    pub apartment_count: u64,
    pub land_count: u64,
}

/// The three rollup row sets, each sorted by its natural key.
#[derive(Debug, Default)]
pub struct Rollups {
    pub area_stats: Vec<AreaStatsRow>,
    pub market_trends: Vec<MonthlyTrendRow>,
    pub area_monthly: Vec<AreaMonthlyStatRow>,
}

#[derive(Debug)]
pub struct AggregationEngine {
    reference: NaiveDate,
    areas: HashMap<String, AreaAccumulator>,
    months: HashMap<String, MonthAccumulator>,
    area_months: HashMap<(String, String), AreaMonthAccumulator>,
    first_date: Option<NaiveDate>,
    last_date: Option<NaiveDate>,
}

pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Whole months from `date`'s month up to the reference month. Negative when
/// the record postdates the reference.
fn months_between(reference: NaiveDate, date: NaiveDate) -> i32 {
    (reference.year() - date.year()) * 12 + reference.month() as i32 - date.month() as i32
}

impl AggregationEngine {
    /// `reference` anchors the 6/12-month recency windows. It is injected
    /// configuration, never the wall clock, so identical inputs always produce
    /// identical windows.
    pub fn new(reference: NaiveDate) -> Self {
        Self {
            reference,
            areas: HashMap::new(),
            months: HashMap::new(),
            area_months: HashMap::new(),
            first_date: None,
            last_date: None,
        }
    }

    pub fn ingest(&mut self, record: &TransactionRecord) {
        self.first_date = Some(match self.first_date {
            Some(current) => current.min(record.date),
            None => record.date,
        });
        self.last_date = Some(match self.last_date {
            Some(current) => current.max(record.date),
            None => record.date,
        });

        let key = month_key(record.date);
        let window = months_between(self.reference, record.date);

        let area = self.areas.entry(record.area_name.clone()).or_default();
        area.transactions += 1;
        if record.meter_sale_price > 0.0 {
            area.prices.push(record.meter_sale_price);
        }
        if record.actual_worth > 0.0 {
            area.volumes.push(record.actual_worth);
        }
        if record.procedure_area > 0.0 {
            area.sizes.push(record.procedure_area);
        }
        area.property_types.bump(&record.property_type);
        if window <= 6 {
            area.transactions_6m += 1;
        }
        if window <= 12 {
            area.transactions_12m += 1;
        }

        let month = self.months.entry(key.clone()).or_default();
        month.transactions += 1;
        month.volume += record.actual_worth;
        if record.meter_sale_price > 0.0 {
            month.prices.push(record.meter_sale_price);
        }
        month.areas.bump(&record.area_name);

        let area_month = self
            .area_months
            .entry((record.area_name.clone(), key))
            .or_default();
        area_month.transactions += 1;
        area_month.volume += record.actual_worth;
        if record.meter_sale_price > 0.0 {
            area_month.prices.push(record.meter_sale_price);
        }
        if record.procedure_area > 0.0 {
            area_month.sizes.push(record.procedure_area);
        }
        match record.property_type.as_str() {
            "Villa" => area_month.villa_count += 1,
            "Unit" | "Flat" => area_month.apartment_count += 1,
            "Land" => area_month.land_count += 1,
            _ => {}
        }
    }

    /// Folds a shard's accumulators into this engine: counts add, series
    /// concatenate, date ranges union. Shards must share one reference date.
    pub fn merge(&mut self, other: AggregationEngine) {
        debug_assert_eq!(self.reference, other.reference);

        for (name, shard) in other.areas {
            let area = self.areas.entry(name).or_default();
            area.transactions += shard.transactions;
            area.transactions_6m += shard.transactions_6m;
            area.transactions_12m += shard.transactions_12m;
            area.prices.extend(shard.prices);
            area.volumes.extend(shard.volumes);
            area.sizes.extend(shard.sizes);
            area.property_types.merge(shard.property_types);
        }
        for (key, shard) in other.months {
            let month = self.months.entry(key).or_default();
            month.transactions += shard.transactions;
            month.volume += shard.volume;
            month.prices.extend(shard.prices);
            month.areas.merge(shard.areas);
        }
        for (key, shard) in other.area_months {
            let area_month = self.area_months.entry(key).or_default();
            area_month.transactions += shard.transactions;
            area_month.volume += shard.volume;
            area_month.prices.extend(shard.prices);
            area_month.sizes.extend(shard.sizes);
            area_month.villa_count += shard.villa_count;
            area_month.apartment_count += shard.apartment_count;
            area_month.land_count += shard.land_count;
        }
        if let Some(date) = other.first_date {
            self.first_date = Some(self.first_date.map_or(date, |d| d.min(date)));
        }
        if let Some(date) = other.last_date {
            self.last_date = Some(self.last_date.map_or(date, |d| d.max(date)));
        }
    }

    pub fn area(&self, name: &str) -> Option<&AreaAccumulator> {
        self.areas.get(name)
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn month_count(&self) -> usize {
        self.months.len()
    }

    /// Runs the reducers over every accumulator and emits the rollup rows,
    /// sorted by natural key so repeated runs write identical tables.
    pub fn finalize(self) -> Rollups {
        // Single shared range for the whole run; only consulted when at least
        // one record was admitted, so the fallback never reaches a table.
        let from = self.first_date.unwrap_or_default();
        let to = self.last_date.unwrap_or_default();

        let area_stats = self
            .areas
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|(name, acc)| {
                let (top_property_type, _) = acc
                    .property_types
                    .top()
                    .map(|(label, count)| (label.to_string(), count))
                    .unwrap_or_default();
                AreaStatsRow {
                    area_slug: name.to_kebab_case(),
                    area_name: name,
                    avg_price_sqft: reduce::average(&acc.prices),
                    median_price_sqft: reduce::median(&acc.prices),
                    min_price: reduce::min(&acc.volumes),
                    max_price: reduce::max(&acc.volumes),
                    avg_transaction_value: reduce::average(&acc.volumes),
                    total_transactions_6m: acc.transactions_6m,
                    total_transactions_12m: acc.transactions_12m,
                    total_volume: reduce::sum(&acc.volumes),
                    top_property_type,
                    avg_unit_size: reduce::average(&acc.sizes),
                    data_from_date: from,
                    data_to_date: to,
                }
            })
            .collect();

        let market_trends = self
            .months
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|(key, acc)| {
                let (year, month) = split_month_key(&key);
                let (top_area, top_area_transactions) = acc
                    .areas
                    .top()
                    .map(|(label, count)| (label.to_string(), count))
                    .unwrap_or_default();
                MonthlyTrendRow {
                    year,
                    month,
                    total_transactions: acc.transactions,
                    total_volume: acc.volume,
                    avg_price_sqft: reduce::average(&acc.prices),
                    median_price_sqft: reduce::median(&acc.prices),
                    top_area,
                    top_area_transactions,
                }
            })
            .collect();

        let area_monthly = self
            .area_months
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|((name, key), acc)| {
                let (year, month) = split_month_key(&key);
                AreaMonthlyStatRow {
                    area_name: name,
                    year,
                    month,
                    transactions_count: acc.transactions,
                    avg_price_sqft: reduce::average(&acc.prices),
                    total_volume: acc.volume,
                    avg_unit_size: reduce::average(&acc.sizes),
                    villa_count: acc.villa_count,
                    apartment_count: acc.apartment_count,
                    land_count: acc.land_count,
                }
            })
            .collect();

        Rollups {
            area_stats,
            market_trends,
            area_monthly,
        }
    }
}

fn split_month_key(key: &str) -> (i32, u32) {
    let (year, month) = key.split_once('-').unwrap_or((key, "0"));
    (
        year.parse().unwrap_or_default(),
        month.parse().unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()
    }

    fn record(date: &str, area: &str, property_type: &str, worth: f64, price: f64) -> TransactionRecord {
        TransactionRecord {
            date: NaiveDate::parse_from_str(date, "%d-%m-%Y").unwrap(),
            area_name: area.to_string(),
            property_type: property_type.to_string(),
            actual_worth: worth,
            meter_sale_price: price,
            procedure_area: 650.0,
        }
    }

    #[test]
    fn single_record_updates_all_three_accumulators() {
        let mut engine = AggregationEngine::new(reference());
        engine.ingest(&record("01-03-2023", "Downtown", "Unit", 1_000_000.0, 1500.0));

        let area = engine.area("Downtown").unwrap();
        assert_eq!(area.transactions, 1);
        assert_eq!(area.transactions_6m, 1);
        assert_eq!(area.transactions_12m, 1);
        assert_eq!(engine.month_count(), 1);

        let rollups = engine.finalize();
        assert_eq!(rollups.area_stats.len(), 1);
        assert_eq!(rollups.area_stats[0].avg_price_sqft, 1500.0);
        assert_eq!(rollups.area_stats[0].area_slug, "downtown");
        assert_eq!(rollups.market_trends.len(), 1);
        assert_eq!(rollups.market_trends[0].year, 2023);
        assert_eq!(rollups.market_trends[0].month, 3);
        assert_eq!(rollups.area_monthly.len(), 1);
    }

    #[test]
    fn recency_windows_respect_the_reference_date() {
        let mut engine = AggregationEngine::new(reference());
        // 3 months back: inside both windows.
        engine.ingest(&record("10-03-2023", "Marina", "Unit", 1.0, 1.0));
        // 9 months back: only the 12-month window.
        engine.ingest(&record("10-09-2022", "Marina", "Unit", 1.0, 1.0));
        // 20 months back: outside both.
        engine.ingest(&record("10-10-2021", "Marina", "Unit", 1.0, 1.0));

        let area = engine.area("Marina").unwrap();
        assert_eq!(area.transactions, 3);
        assert_eq!(area.transactions_6m, 1);
        assert_eq!(area.transactions_12m, 2);
    }

    #[test]
    fn zero_amounts_count_transactions_but_stay_out_of_series() {
        let mut engine = AggregationEngine::new(reference());
        engine.ingest(&record("01-03-2023", "Downtown", "Unit", 0.0, 0.0));
        engine.ingest(&record("02-03-2023", "Downtown", "Unit", 2_000_000.0, 1200.0));

        let area = engine.area("Downtown").unwrap();
        assert_eq!(area.transactions, 2);
        assert_eq!(area.prices, vec![1200.0]);
        assert_eq!(area.volumes, vec![2_000_000.0]);
    }

    #[test]
    fn same_area_month_rows_share_one_accumulator() {
        let mut engine = AggregationEngine::new(reference());
        engine.ingest(&record("05-03-2023", "Downtown", "Unit", 1.0, 1000.0));
        engine.ingest(&record("20-03-2023", "Downtown", "Flat", 1.0, 2000.0));

        let rollups = engine.finalize();
        assert_eq!(rollups.area_monthly.len(), 1);
        let row = &rollups.area_monthly[0];
        assert_eq!(row.transactions_count, 2);
        assert_eq!(row.avg_price_sqft, 1500.0);
        assert_eq!(row.apartment_count, 2);
    }

    #[test]
    fn property_type_mapping_bumps_exactly_one_counter() {
        let mut engine = AggregationEngine::new(reference());
        engine.ingest(&record("05-03-2023", "Palm", "Villa", 1.0, 1.0));
        engine.ingest(&record("06-03-2023", "Palm", "Land", 1.0, 1.0));
        engine.ingest(&record("07-03-2023", "Palm", "Commercial", 1.0, 1.0));

        let rollups = engine.finalize();
        let row = &rollups.area_monthly[0];
        assert_eq!(row.villa_count, 1);
        assert_eq!(row.land_count, 1);
        assert_eq!(row.apartment_count, 0);
        assert_eq!(row.transactions_count, 3);
    }

    #[test]
    fn top_selection_breaks_ties_by_first_seen() {
        let mut counts = CountMap::default();
        counts.bump("Unit");
        counts.bump("Villa");
        counts.bump("Villa");
        counts.bump("Unit");
        assert_eq!(counts.top(), Some(("Unit", 2)));
    }

    #[test]
    fn months_between_handles_year_boundaries_and_future_dates() {
        let reference = reference();
        let date = |y, m| NaiveDate::from_ymd_opt(y, m, 15).unwrap();
        assert_eq!(months_between(reference, date(2023, 6)), 0);
        assert_eq!(months_between(reference, date(2022, 12)), 6);
        assert_eq!(months_between(reference, date(2022, 6)), 12);
        assert_eq!(months_between(reference, date(2023, 8)), -2);
    }

    #[test]
    fn merge_is_sum_compatible_with_a_single_pass() {
        let rows = [
            record("05-03-2023", "Downtown", "Unit", 100.0, 1000.0),
            record("06-03-2023", "Palm", "Villa", 200.0, 2000.0),
            record("07-04-2023", "Downtown", "Land", 300.0, 3000.0),
            record("08-04-2023", "Downtown", "Unit", 400.0, 4000.0),
        ];

        let mut single = AggregationEngine::new(reference());
        for row in &rows {
            single.ingest(row);
        }

        let mut left = AggregationEngine::new(reference());
        let mut right = AggregationEngine::new(reference());
        for row in &rows[..2] {
            left.ingest(row);
        }
        for row in &rows[2..] {
            right.ingest(row);
        }
        left.merge(right);

        let merged = left.finalize();
        let direct = single.finalize();
        assert_eq!(merged.area_stats, direct.area_stats);
        assert_eq!(merged.market_trends, direct.market_trends);
        assert_eq!(merged.area_monthly, direct.area_monthly);
    }

    #[test]
    fn finalize_orders_rows_by_natural_key() {
        let mut engine = AggregationEngine::new(reference());
        engine.ingest(&record("05-04-2023", "Zabeel", "Unit", 1.0, 1.0));
        engine.ingest(&record("05-03-2023", "Marina", "Unit", 1.0, 1.0));
        engine.ingest(&record("05-03-2023", "Downtown", "Unit", 1.0, 1.0));

        let rollups = engine.finalize();
        let names: Vec<_> = rollups
            .area_stats
            .iter()
            .map(|row| row.area_name.as_str())
            .collect();
        assert_eq!(names, vec!["Downtown", "Marina", "Zabeel"]);
        let months: Vec<_> = rollups
            .market_trends
            .iter()
            .map(|row| (row.year, row.month))
            .collect();
        assert_eq!(months, vec![(2023, 3), (2023, 4)]);
    }
}
