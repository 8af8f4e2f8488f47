use std::{env, path::PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;

pub const DEFAULT_FLOOR_YEAR: i32 = 1990;

/// Runtime configuration for one pipeline run. Everything is supplied via the
/// environment (optionally seeded from a `.env` file); there is no CLI surface.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the transaction export (CSV/TSV).
    pub input: PathBuf,
    /// Path to the destination SQLite database.
    pub database: PathBuf,
    /// Rows with a transaction year below this are dropped before aggregation.
    pub floor_year: i32,
    /// Reference "now" for the 6/12-month recency windows. Injected so runs
    /// are reproducible; the pipeline never reads the wall clock.
    pub reference_date: NaiveDate,
    /// Optional encoding label for the input file (defaults to UTF-8).
    pub input_encoding: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let input = PathBuf::from(require_var("MARKET_INPUT")?);
        let database = PathBuf::from(require_var("MARKET_DATABASE")?);
        let reference_date = parse_reference_date(&require_var("MARKET_REFERENCE_DATE")?)?;
        let floor_year = match env::var("MARKET_FLOOR_YEAR") {
            Ok(raw) => parse_floor_year(&raw)?,
            Err(_) => DEFAULT_FLOOR_YEAR,
        };
        let input_encoding = env::var("MARKET_INPUT_ENCODING").ok();

        Ok(Self {
            input,
            database,
            floor_year,
            reference_date,
            input_encoding,
        })
    }
}

fn require_var(name: &str) -> Result<String> {
    let value = env::var(name).map_err(|_| anyhow!("Environment variable {name} is not set"))?;
    if value.trim().is_empty() {
        return Err(anyhow!("Environment variable {name} is empty"));
    }
    Ok(value)
}

pub fn parse_reference_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("Parsing MARKET_REFERENCE_DATE '{raw}' as YYYY-MM-DD"))
}

pub fn parse_floor_year(raw: &str) -> Result<i32> {
    let year: i32 = raw
        .trim()
        .parse()
        .with_context(|| format!("Parsing MARKET_FLOOR_YEAR '{raw}'"))?;
    if year <= 0 {
        return Err(anyhow!("MARKET_FLOOR_YEAR must be a positive year, got {year}"));
    }
    Ok(year)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_date_parses_iso_format() {
        let date = parse_reference_date("2023-06-01").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 6, 1).unwrap());
    }

    #[test]
    fn reference_date_rejects_day_first_format() {
        assert!(parse_reference_date("01-06-2023").is_err());
    }

    #[test]
    fn floor_year_rejects_non_positive_values() {
        assert!(parse_floor_year("0").is_err());
        assert!(parse_floor_year("-5").is_err());
        assert_eq!(parse_floor_year(" 2008 ").unwrap(), 2008);
    }
}
