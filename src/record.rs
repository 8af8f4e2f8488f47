//! Maps tokenized lines onto typed transaction records.
//!
//! Numeric parsing is best-effort: an unparsable or negative amount degrades
//! to `0.0` (later excluded from the statistical series) instead of rejecting
//! the row. Dates and area names are hard requirements.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{Datelike, NaiveDate};
use thiserror::Error;

pub const COL_INSTANCE_DATE: &str = "instance_date";
pub const COL_AREA_NAME: &str = "area_name_en";
pub const COL_PROPERTY_TYPE: &str = "property_type_en";
pub const COL_ACTUAL_WORTH: &str = "actual_worth";
pub const COL_METER_SALE_PRICE: &str = "meter_sale_price";
pub const COL_PROCEDURE_AREA: &str = "procedure_area";

pub const REQUIRED_COLUMNS: [&str; 6] = [
    COL_INSTANCE_DATE,
    COL_AREA_NAME,
    COL_PROPERTY_TYPE,
    COL_ACTUAL_WORTH,
    COL_METER_SALE_PRICE,
    COL_PROCEDURE_AREA,
];

/// Why a data row was excluded from aggregation. Date-filtered rows are a
/// policy outcome and are counted separately from malformed ones.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SkipReason {
    #[error("row has {found} field(s) but the header defines {expected}")]
    FieldCountMismatch { expected: usize, found: usize },
    #[error("missing instance date")]
    MissingDate,
    #[error("missing area name")]
    MissingArea,
    #[error("unparsable instance date '{0}'")]
    BadDate(String),
    #[error("transaction year {year} is below the floor year {floor}")]
    BeforeFloorYear { year: i32, floor: i32 },
}

impl SkipReason {
    /// True for rows dropped by the recency policy rather than by shape.
    pub fn is_date_filtered(&self) -> bool {
        matches!(self, SkipReason::BeforeFloorYear { .. })
    }
}

/// Column name → index map built once from the header row.
#[derive(Debug)]
pub struct HeaderIndex {
    indices: HashMap<String, usize>,
    len: usize,
}

impl HeaderIndex {
    /// Builds the map and verifies all required columns are present. A missing
    /// required column is a fatal configuration problem, not a row-level skip.
    pub fn from_fields(fields: &[String]) -> Result<Self> {
        let mut indices = HashMap::new();
        for (idx, name) in fields.iter().enumerate() {
            indices.entry(name.trim().to_string()).or_insert(idx);
        }
        for required in REQUIRED_COLUMNS {
            if !indices.contains_key(required) {
                return Err(anyhow!("Input header is missing required column '{required}'"));
            }
        }
        Ok(Self {
            indices,
            len: fields.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn field<'a>(&self, fields: &'a [String], name: &str) -> &'a str {
        self.indices
            .get(name)
            .and_then(|&idx| fields.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// One admitted input row. Lives only long enough to be folded into the
/// accumulators.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub date: NaiveDate,
    pub area_name: String,
    pub property_type: String,
    pub actual_worth: f64,
    pub meter_sale_price: f64,
    pub procedure_area: f64,
}

pub fn parse_record(
    headers: &HeaderIndex,
    fields: &[String],
    floor_year: i32,
) -> Result<TransactionRecord, SkipReason> {
    if fields.len() < headers.len() {
        return Err(SkipReason::FieldCountMismatch {
            expected: headers.len(),
            found: fields.len(),
        });
    }

    let raw_date = headers.field(fields, COL_INSTANCE_DATE);
    if raw_date.is_empty() {
        return Err(SkipReason::MissingDate);
    }
    let area_name = headers.field(fields, COL_AREA_NAME);
    if area_name.is_empty() {
        return Err(SkipReason::MissingArea);
    }
    let date =
        parse_instance_date(raw_date).ok_or_else(|| SkipReason::BadDate(raw_date.to_string()))?;
    if date.year() < floor_year {
        return Err(SkipReason::BeforeFloorYear {
            year: date.year(),
            floor: floor_year,
        });
    }

    Ok(TransactionRecord {
        date,
        area_name: area_name.to_string(),
        property_type: headers.field(fields, COL_PROPERTY_TYPE).to_string(),
        actual_worth: parse_amount(headers.field(fields, COL_ACTUAL_WORTH)),
        meter_sale_price: parse_amount(headers.field(fields, COL_METER_SALE_PRICE)),
        procedure_area: parse_amount(headers.field(fields, COL_PROCEDURE_AREA)),
    })
}

/// `DD-MM-YYYY`, all components positive, and the result must be a real
/// calendar date.
fn parse_instance_date(raw: &str) -> Option<NaiveDate> {
    let mut parts = raw.splitn(3, '-');
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let year: i32 = parts.next()?.trim().parse().ok()?;
    if day == 0 || month == 0 || year <= 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_amount(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value,
        _ => 0.0,
    }
}
