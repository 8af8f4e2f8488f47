//! Destination store: idempotent schema migration and truncate-then-load of
//! the finalized rollups into SQLite.

use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use rusqlite::{Connection, Statement, params};

use crate::{
    aggregate::{AreaMonthlyStatRow, AreaStatsRow, MonthlyTrendRow, Rollups},
    pipeline::CancelToken,
};

/// Rows per transaction during the load phase. Also the progress interval.
const BATCH_SIZE: usize = 500;
/// Attempts per batch before the failure becomes fatal to the run.
const BATCH_ATTEMPTS: usize = 3;

const MIGRATIONS: &str = "
CREATE TABLE IF NOT EXISTS area_market_stats (
    id INTEGER PRIMARY KEY,
    area_name TEXT NOT NULL,
    area_slug TEXT NOT NULL,
    avg_price_sqft REAL NOT NULL,
    median_price_sqft REAL NOT NULL,
    min_price REAL NOT NULL,
    max_price REAL NOT NULL,
    avg_transaction_value REAL NOT NULL,
    total_transactions_6m INTEGER NOT NULL,
    total_transactions_12m INTEGER NOT NULL,
    total_volume_12m REAL NOT NULL,
    top_property_type TEXT NOT NULL,
    avg_unit_size REAL NOT NULL,
    data_from_date TEXT NOT NULL,
    data_to_date TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS market_trends (
    id INTEGER PRIMARY KEY,
    month INTEGER NOT NULL,
    year INTEGER NOT NULL,
    total_transactions INTEGER NOT NULL,
    total_volume_aed REAL NOT NULL,
    avg_price_sqft REAL NOT NULL,
    median_price_sqft REAL NOT NULL,
    top_area TEXT NOT NULL,
    top_area_transactions INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS area_monthly_stats (
    id INTEGER PRIMARY KEY,
    area_name TEXT NOT NULL,
    month INTEGER NOT NULL,
    year INTEGER NOT NULL,
    transactions_count INTEGER NOT NULL,
    avg_price_sqft REAL NOT NULL,
    total_volume REAL NOT NULL,
    avg_unit_size REAL NOT NULL,
    villa_count INTEGER NOT NULL,
    apartment_count INTEGER NOT NULL,
    land_count INTEGER NOT NULL
);
";

pub fn open(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).with_context(|| format!("Opening destination store {path:?}"))?;
    Ok(conn)
}

/// Applies the DDL for the three destination tables. Safe to run repeatedly.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(MIGRATIONS)
        .context("Applying destination table migrations")?;
    Ok(())
}

/// Truncates all three destination tables, then writes the rollups in batched
/// transactions. Truncation before any write is what makes a re-run converge
/// to the same state as a first run.
pub fn load(conn: &mut Connection, rollups: &Rollups, cancel: &CancelToken) -> Result<()> {
    truncate(conn)?;
    write_area_stats(conn, &rollups.area_stats, cancel)?;
    write_market_trends(conn, &rollups.market_trends, cancel)?;
    write_area_monthly(conn, &rollups.area_monthly, cancel)?;
    info!(
        "Load complete: {} area row(s), {} trend row(s), {} area-month row(s)",
        rollups.area_stats.len(),
        rollups.market_trends.len(),
        rollups.area_monthly.len()
    );
    Ok(())
}

fn truncate(conn: &Connection) -> Result<()> {
    // Plain INTEGER PRIMARY KEY rowids: deleting every row also restarts
    // identity numbering from 1 on the next insert.
    conn.execute_batch(
        "DELETE FROM area_market_stats;
         DELETE FROM market_trends;
         DELETE FROM area_monthly_stats;",
    )
    .context("Truncating destination tables")?;
    Ok(())
}

fn write_area_stats(
    conn: &mut Connection,
    rows: &[AreaStatsRow],
    cancel: &CancelToken,
) -> Result<()> {
    copy_rows(
        conn,
        "area_market_stats",
        "INSERT INTO area_market_stats (
            area_name, area_slug, avg_price_sqft, median_price_sqft, min_price,
            max_price, avg_transaction_value, total_transactions_6m,
            total_transactions_12m, total_volume_12m, top_property_type,
            avg_unit_size, data_from_date, data_to_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rows,
        |stmt, row| {
            stmt.execute(params![
                row.area_name,
                row.area_slug,
                row.avg_price_sqft,
                row.median_price_sqft,
                row.min_price,
                row.max_price,
                row.avg_transaction_value,
                row.total_transactions_6m as i64,
                row.total_transactions_12m as i64,
                row.total_volume,
                row.top_property_type,
                row.avg_unit_size,
                row.data_from_date.format("%Y-%m-%d").to_string(),
                row.data_to_date.format("%Y-%m-%d").to_string(),
            ])
            .map(|_| ())
        },
        cancel,
    )
}

fn write_market_trends(
    conn: &mut Connection,
    rows: &[MonthlyTrendRow],
    cancel: &CancelToken,
) -> Result<()> {
    copy_rows(
        conn,
        "market_trends",
        "INSERT INTO market_trends (
            month, year, total_transactions, total_volume_aed, avg_price_sqft,
            median_price_sqft, top_area, top_area_transactions
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rows,
        |stmt, row| {
            stmt.execute(params![
                row.month,
                row.year,
                row.total_transactions as i64,
                row.total_volume,
                row.avg_price_sqft,
                row.median_price_sqft,
                row.top_area,
                row.top_area_transactions as i64,
            ])
            .map(|_| ())
        },
        cancel,
    )
}

fn write_area_monthly(
    conn: &mut Connection,
    rows: &[AreaMonthlyStatRow],
    cancel: &CancelToken,
) -> Result<()> {
    copy_rows(
        conn,
        "area_monthly_stats",
        "INSERT INTO area_monthly_stats (
            area_name, month, year, transactions_count, avg_price_sqft,
            total_volume, avg_unit_size, villa_count, apartment_count, land_count
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rows,
        |stmt, row| {
            stmt.execute(params![
                row.area_name,
                row.month,
                row.year,
                row.transactions_count as i64,
                row.avg_price_sqft,
                row.total_volume,
                row.avg_unit_size,
                row.villa_count as i64,
                row.apartment_count as i64,
                row.land_count as i64,
            ])
            .map(|_| ())
        },
        cancel,
    )
}

/// Writes `rows` in transactions of `BATCH_SIZE`. A failed batch rolls back
/// and is retried whole; only an exhausted batch aborts the load.
fn copy_rows<T, F>(
    conn: &mut Connection,
    table: &str,
    insert_sql: &str,
    rows: &[T],
    bind: F,
    cancel: &CancelToken,
) -> Result<()>
where
    F: Fn(&mut Statement<'_>, &T) -> rusqlite::Result<()>,
{
    let total = rows.len();
    let mut written = 0usize;
    for batch in rows.chunks(BATCH_SIZE) {
        if cancel.is_cancelled() {
            anyhow::bail!("Load cancelled while writing {table}");
        }
        let mut attempt = 1;
        loop {
            match write_batch(conn, insert_sql, batch, &bind) {
                Ok(()) => break,
                Err(err) if attempt < BATCH_ATTEMPTS => {
                    warn!(
                        "Retrying batch for {table} (attempt {attempt} failed: {err})",
                    );
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("Writing rows {}..{} into {table}", written, written + batch.len())
                    });
                }
            }
        }
        written += batch.len();
        info!("{table}: wrote {written}/{total} row(s)");
    }
    Ok(())
}

fn write_batch<T, F>(
    conn: &mut Connection,
    insert_sql: &str,
    batch: &[T],
    bind: &F,
) -> rusqlite::Result<()>
where
    F: Fn(&mut Statement<'_>, &T) -> rusqlite::Result<()>,
{
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(insert_sql)?;
        for row in batch {
            bind(&mut stmt, row)?;
        }
    }
    tx.commit()
}
