use std::fmt;

use anyhow::{anyhow, Result};
use chrono::Local;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

/// Log timestamps as local wall-clock time only (HH:MM:SS.mmmmmm+00:00)
pub struct LocalTimeOnly;

impl FormatTime for LocalTimeOnly {
	fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
		write!(w, "{}", Local::now().format("%H:%M:%S%.6f%:z"))
	}
}

/// Map the `-v` count to a level for this crate's targets.
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
	match verbosity {
		0 => LevelFilter::WARN,
		1 => LevelFilter::INFO,
		2 => LevelFilter::DEBUG,
		_ => LevelFilter::TRACE,
	}
}

/// Install the global subscriber writing to stderr.
///
/// RUST_LOG takes precedence; otherwise only this crate logs, at the level
/// chosen by `-v`.
pub fn init_logger(verbosity: u8) -> Result<()> {
	let filter = match EnvFilter::try_from_default_env() {
		Ok(filter) => filter,
		Err(_) => EnvFilter::new(format!(
			"{}={}",
			env!("CARGO_CRATE_NAME"),
			level_for_verbosity(verbosity),
		)),
	};

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_timer(LocalTimeOnly)
		.with_writer(std::io::stderr)
		.try_init()
		.map_err(|e| anyhow!("failed to initialize logger: {}", e))
}
