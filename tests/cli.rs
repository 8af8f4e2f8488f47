use std::fs;

use assert_cmd::Command;
use predicates::{prelude::PredicateBooleanExt, str::contains};
use tempfile::tempdir;

const HEADER: &str =
    "instance_date,area_name_en,property_type_en,actual_worth,meter_sale_price,procedure_area";

fn binary() -> Command {
    Command::cargo_bin("market-rollup").expect("binary under test")
}

#[test]
fn full_run_prints_the_summary_and_exits_zero() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("transactions.csv");
    fs::write(
        &input,
        format!(
            "{HEADER}\n01-03-2023,Downtown,Unit,1000000,1500,650\nnot-a-row\n"
        ),
    )
    .unwrap();

    binary()
        .env("MARKET_INPUT", &input)
        .env("MARKET_DATABASE", dir.path().join("market.db"))
        .env("MARKET_REFERENCE_DATE", "2023-06-01")
        .env("MARKET_FLOOR_YEAR", "1990")
        .assert()
        .success()
        .stdout(
            contains("1 row(s) processed")
                .and(contains("1 malformed"))
                .and(contains("1 distinct area(s)")),
        );
}

#[test]
fn missing_input_file_exits_non_zero() {
    let dir = tempdir().unwrap();
    binary()
        .env("MARKET_INPUT", dir.path().join("does-not-exist.csv"))
        .env("MARKET_DATABASE", dir.path().join("market.db"))
        .env("MARKET_REFERENCE_DATE", "2023-06-01")
        .assert()
        .failure()
        .stderr(contains("does-not-exist.csv"));
}

#[test]
fn missing_reference_date_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("transactions.csv");
    fs::write(&input, format!("{HEADER}\n")).unwrap();

    binary()
        .env("MARKET_INPUT", &input)
        .env("MARKET_DATABASE", dir.path().join("market.db"))
        .env_remove("MARKET_REFERENCE_DATE")
        .assert()
        .failure()
        .stderr(contains("MARKET_REFERENCE_DATE"));
}

#[test]
fn bad_reference_date_format_exits_non_zero() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("transactions.csv");
    fs::write(&input, format!("{HEADER}\n")).unwrap();

    binary()
        .env("MARKET_INPUT", &input)
        .env("MARKET_DATABASE", dir.path().join("market.db"))
        .env("MARKET_REFERENCE_DATE", "01-06-2023")
        .assert()
        .failure()
        .stderr(contains("MARKET_REFERENCE_DATE"));
}
