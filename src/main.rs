//! Runs one pass of a configured source and writes every yielded row as a
//! JSON line to stdout.
//!
//! Usage: `sqlsource [settings-file]`, `sqlsource.toml` by default.
//! Log verbosity follows `RUST_LOG` (info when unset).

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sqlsource::Result;
use sqlsource::driver::SqliteDriver;
use sqlsource::map::SqliteKeyMap;
use sqlsource::settings::Settings;
use sqlsource::source::SqlSource;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();
    let path = std::env::args().nth(1).unwrap_or_else(|| "sqlsource.toml".to_string());
    match run(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "pass aborted");
            ExitCode::FAILURE
        }
    }
}

fn run(path: &str) -> Result<()> {
    let settings = Settings::load(path)?;
    let map = Arc::new(match &settings.map.path {
        Some(p) => SqliteKeyMap::open(p)?,
        None => SqliteKeyMap::in_memory()?,
    });
    let name = settings.migration.name.as_str();
    let high_water = map.high_water(name)?;
    let migration = settings.migration(high_water);

    let mut source = SqlSource::new(
        SqliteDriver,
        settings.target(),
        settings.definition()?,
        settings.options(),
        map.clone(),
    )?;
    info!(migration = name, query = %source, "source ready");
    match source.count(false) {
        Ok(n) => info!(count = n, "rows in source"),
        Err(e) if !e.is_fatal() => warn!(error = %e, "could not count source rows"),
        Err(e) => return Err(e),
    }

    source.start(&migration)?;
    let mut out = io::stdout().lock();
    while let Some(row) = source.current() {
        serde_json::to_writer(&mut out, row)?;
        writeln!(out)?;
        map.save(&source.key_schema().source_key(row)?, None)?;
        source.advance()?;
    }
    out.flush()?;

    if let Some(mark) = source.high_water_mark() {
        map.save_high_water(name, &mark.to_text())?;
        info!(high_water = %mark, "high water saved");
    }
    info!(
        processed = source.num_processed(),
        ignored = source.num_ignored(),
        state = ?source.state(),
        "done"
    );
    source.close()
}
