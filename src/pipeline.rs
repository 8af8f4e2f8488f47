//! End-to-end driver: stream the export, aggregate, migrate, load.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};

use crate::{
    aggregate::AggregationEngine,
    config::Config,
    io_utils::{self, LineReader},
    record::{self, HeaderIndex},
    store, tokenize,
};

/// Cooperative cancellation flag, checked at the per-line boundary of the
/// parse phase and the per-batch boundary of the load phase.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters reported at the end of a run. `processed + skipped_malformed +
/// skipped_filtered` always equals the number of non-empty data lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub lines_read: u64,
    pub processed: u64,
    pub skipped_malformed: u64,
    pub skipped_filtered: u64,
    pub distinct_areas: usize,
    pub distinct_months: usize,
}

impl RunSummary {
    pub fn skipped(&self) -> u64 {
        self.skipped_malformed + self.skipped_filtered
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read {} line(s): {} row(s) processed, {} skipped ({} malformed, {} below floor year), {} distinct area(s), {} distinct month(s)",
            self.lines_read,
            self.processed,
            self.skipped(),
            self.skipped_malformed,
            self.skipped_filtered,
            self.distinct_areas,
            self.distinct_months
        )
    }
}

/// Runs the whole pipeline once. The summary is logged before the load phase,
/// so a fatal load error still leaves the aggregation counters visible.
pub fn execute(config: &Config, cancel: &CancelToken) -> Result<RunSummary> {
    let encoding = io_utils::resolve_encoding(config.input_encoding.as_deref())?;
    let delimiter = io_utils::resolve_input_delimiter(&config.input);
    let mut lines = LineReader::open(&config.input, encoding)?;

    let header_line = lines
        .next_line()
        .context("Reading header row")?
        .ok_or_else(|| anyhow!("Input file {:?} is empty", config.input))?;
    let headers = HeaderIndex::from_fields(&tokenize::split_line(&header_line, delimiter))
        .with_context(|| format!("Validating header of {:?}", config.input))?;

    let mut engine = AggregationEngine::new(config.reference_date);
    let mut summary = RunSummary {
        lines_read: 1,
        ..RunSummary::default()
    };

    while let Some(line) = lines.next_line()? {
        if cancel.is_cancelled() {
            bail!("Run cancelled during aggregation");
        }
        if line.trim().is_empty() {
            continue;
        }
        summary.lines_read += 1;
        let fields = tokenize::split_line(&line, delimiter);
        match record::parse_record(&headers, &fields, config.floor_year) {
            Ok(record) => {
                engine.ingest(&record);
                summary.processed += 1;
            }
            Err(reason) => {
                debug!("Skipping line {}: {reason}", summary.lines_read);
                if reason.is_date_filtered() {
                    summary.skipped_filtered += 1;
                } else {
                    summary.skipped_malformed += 1;
                }
            }
        }
    }

    summary.distinct_areas = engine.area_count();
    summary.distinct_months = engine.month_count();
    info!("Aggregation finished: {summary}");

    let rollups = engine.finalize();
    let mut conn = store::open(&config.database)?;
    store::migrate(&conn)?;
    store::load(&mut conn, &rollups, cancel)?;

    Ok(summary)
}
