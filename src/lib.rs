pub mod aggregate;
pub mod config;
pub mod io_utils;
pub mod pipeline;
pub mod record;
pub mod reduce;
pub mod store;
pub mod tokenize;

use std::{env, sync::OnceLock};

use anyhow::Result;
use log::LevelFilter;

use crate::{config::Config, pipeline::CancelToken};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("market_rollup", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

/// Entry point for the batch binary: load config from the environment, run the
/// pipeline once, print the run summary on stdout.
pub fn run() -> Result<()> {
    init_logging();
    let config = Config::from_env()?;
    let cancel = CancelToken::new();
    let summary = pipeline::execute(&config, &cancel)?;
    println!("{summary}");
    Ok(())
}
