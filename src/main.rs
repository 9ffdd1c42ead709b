mod catalog;
mod cert;
mod cli;
mod dns;
mod log;
mod measure;
mod output;
mod resolver;
mod stamp;
mod stats;
mod transport;

use clap::Parser;
use std::time::{Duration, Instant};

use crate::cli::Cli;
use crate::measure::MeasurementConfig;
use crate::stamp::StampProtocol;

/// Upper bound for downloading a remote catalog
const CATALOG_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	log::init_logger(cli.verbose)?;

	let config = MeasurementConfig {
		timeout: Duration::from_millis(cli.timeout),
		max_inflight: cli.concurrency,
	};
	let filter = cli.filter();

	// Load and decode the catalog
	let text = catalog::load_catalog_text(&cli.list, CATALOG_DOWNLOAD_TIMEOUT).await?;
	let parsed = catalog::parse_catalog_entries(&text);
	if parsed.skipped > 0 {
		tracing::info!("{} catalog records without a usable stamp were skipped", parsed.skipped);
	}
	let stamps = parsed.stamps(&filter);
	let dnscrypt_count = stamps.iter()
		.filter(|s| s.protocol() == StampProtocol::DnsCrypt)
		.count();

	if !cli.json {
		output::print_config_summary(
			&cli.list, parsed.entries.len(), parsed.skipped, dnscrypt_count, &filter, &config,
		);
	}

	if dnscrypt_count == 0 {
		tracing::warn!("no DNSCrypt resolvers left to measure");
	}

	let start = Instant::now();
	if !cli.json {
		println!("Measuring {} resolvers...", dnscrypt_count);
	}
	let results = measure::measure_all(stamps, &config).await;
	let total_time = start.elapsed();

	if cli.json {
		output::print_json(&results, cli.show_failed)?;
	} else {
		output::print_results_table(&results);
		output::print_failures(&results);
		output::print_summary(&stats::summarize(&results), total_time);
	}

	if let Some(path) = &cli.output {
		output::write_csv(path, &results, cli.show_failed)?;
		if !cli.json {
			println!("\nResults written to: {}", path);
		}
	}

	Ok(())
}
