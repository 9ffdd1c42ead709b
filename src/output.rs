use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use crate::catalog::CatalogFilter;
use crate::measure::{MeasurementConfig, MeasurementResult};
use crate::stamp::{to_hex, StampProperties};
use crate::stats::LatencySummary;

/// Print a summary of the run configuration before measuring.
pub fn print_config_summary(
	source: &str,
	total: usize,
	skipped: usize,
	selected: usize,
	filter: &CatalogFilter,
	config: &MeasurementConfig,
) {
	println!("DNSCrypt Measurement Configuration");
	println!("==================================");
	println!("Catalog:        {}", source);
	println!("Stamps:         {} ({} records skipped)", total, skipped);
	println!("Selected:       {}", selected);
	println!("Filter:         {}", filter_label(filter));
	println!("Timeout:        {} ms", config.timeout.as_millis());
	if config.max_inflight == 0 {
		println!("Concurrency:    unbounded");
	} else {
		println!("Concurrency:    {}", config.max_inflight);
	}
	println!();
}

fn filter_label(filter: &CatalogFilter) -> String {
	let mut parts = Vec::new();
	if filter.require_no_log {
		parts.push("no logs");
	}
	if filter.require_no_filter {
		parts.push("no filter");
	}
	if filter.require_dnssec {
		parts.push("DNSSEC");
	}
	if parts.is_empty() {
		"none".to_string()
	} else {
		parts.join(", ")
	}
}

fn yes_no(flag: bool) -> &'static str {
	if flag { "yes" } else { "no" }
}

/// Print successful measurements as a table, fastest first.
pub fn print_results_table(results: &[MeasurementResult]) {
	let now = Utc::now();
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec![
		"Rank", "Provider", "Address", "Time",
		"No logs", "No filter", "DNSSEC",
		"Serial", "Certificate",
	]);

	for (i, r) in results.iter().filter(|r| !r.failed()).enumerate() {
		let stamp = r.stamp();
		let properties = stamp.properties().unwrap_or_default();
		let address = stamp.address().map(|a| a.to_string()).unwrap_or_default();
		let (serial, validity) = match r.certificate() {
			Some(cert) if cert.is_current(now) => (cert.serial().to_string(), "current".to_string()),
			Some(cert) => (
				cert.serial().to_string(),
				format!("outside {} .. {}", cert.valid_from().date_naive(), cert.valid_until().date_naive()),
			),
			None => ("-".to_string(), "-".to_string()),
		};
		table.add_row(vec![
			format!("{}", i + 1),
			stamp.label(),
			address,
			format!("{:.1} ms", r.elapsed_ms().unwrap_or_default()),
			yes_no(properties.no_log).to_string(),
			yes_no(properties.no_filter).to_string(),
			yes_no(properties.dnssec).to_string(),
			serial,
			validity,
		]);
	}

	println!("\nMeasurement Results");
	println!("===================\n");
	println!("{table}");
}

/// Print failures with their reasons.
pub fn print_failures(results: &[MeasurementResult]) {
	let failed: Vec<&MeasurementResult> = results.iter().filter(|r| r.failed()).collect();
	if failed.is_empty() {
		return;
	}
	println!("\nFailed ({}):", failed.len());
	for r in failed {
		println!("  - {}: {}", r.stamp().label(), r.error().unwrap_or("unknown error"));
	}
}

/// Print run totals and latency statistics.
pub fn print_summary(summary: &LatencySummary, total_time: Duration) {
	println!("\nSummary");
	println!("=======");
	println!("Measured:       {}", summary.measured);
	println!("Succeeded:      {}", summary.succeeded);
	println!("Failed:         {}", summary.failed);
	if summary.succeeded > 0 {
		println!("p50:            {:.1} ms", summary.p50_ms);
		println!("p95:            {:.1} ms", summary.p95_ms);
		println!("Mean:           {:.1} ms (stddev {:.1})", summary.mean_ms, summary.stddev_ms);
	}
	println!("Total time:     {:.1}s", total_time.as_secs_f64());
}

fn selected(results: &[MeasurementResult], show_failed: bool) -> Vec<&MeasurementResult> {
	results.iter()
		.filter(|r| show_failed || !r.failed())
		.collect()
}

/// Render results as pretty-printed JSON.
pub fn render_json(results: &[MeasurementResult], show_failed: bool) -> Result<String> {
	serde_json::to_string_pretty(&selected(results, show_failed))
		.map_err(|e| anyhow!("failed to serialize results: {}", e))
}

/// Print results as JSON to stdout.
pub fn print_json(results: &[MeasurementResult], show_failed: bool) -> Result<()> {
	println!("{}", render_json(results, show_failed)?);
	Ok(())
}

/// Write measurement results to a CSV file.
pub fn write_csv(path: &str, results: &[MeasurementResult], show_failed: bool) -> Result<()> {
	let mut writer = csv::Writer::from_path(path)
		.map_err(|e| anyhow!("failed to create '{}': {}", path, e))?;

	writer.write_record([
		"rank", "provider", "protocol", "address", "elapsed_ms", "failed",
		"no_log", "no_filter", "dnssec",
		"serial", "valid_from", "valid_until",
		"resolver_public_key", "magic_query", "error",
	])?;

	let mut rank = 0;
	for r in selected(results, show_failed) {
		let stamp = r.stamp();
		let StampProperties { dnssec, no_log, no_filter } = stamp.properties().unwrap_or_default();
		let rank_field = if r.failed() {
			String::new()
		} else {
			rank += 1;
			rank.to_string()
		};
		let cert = r.certificate();
		writer.write_record([
			rank_field,
			stamp.label(),
			stamp.protocol().to_string(),
			stamp.address().map(|a| a.to_string()).unwrap_or_default(),
			r.elapsed_ms().map(|ms| format!("{:.2}", ms)).unwrap_or_default(),
			r.failed().to_string(),
			no_log.to_string(),
			no_filter.to_string(),
			dnssec.to_string(),
			cert.map(|c| c.serial().to_string()).unwrap_or_default(),
			cert.map(|c| c.valid_from().to_rfc3339()).unwrap_or_default(),
			cert.map(|c| c.valid_until().to_rfc3339()).unwrap_or_default(),
			cert.map(|c| to_hex(c.resolver_public_key())).unwrap_or_default(),
			cert.map(|c| to_hex(c.magic_query())).unwrap_or_default(),
			r.error().unwrap_or_default().to_string(),
		])?;
	}

	writer.flush()?;
	tracing::info!("results written to {}", path);
	Ok(())
}
