use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::stamp::{decode, Stamp, STAMP_PREFIX};

/// Line prefix that opens a catalog record
const RECORD_MARKER: &str = "##";

/// Property requirements applied to decoded stamps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogFilter {
	pub require_no_log: bool,
	pub require_no_filter: bool,
	pub require_dnssec: bool,
}

impl CatalogFilter {
	pub fn is_active(&self) -> bool {
		self.require_no_log || self.require_no_filter || self.require_dnssec
	}

	/// Whether a stamp satisfies every active requirement.
	///
	/// Stamps without a properties byte never match an active filter.
	pub fn matches(&self, stamp: &Stamp) -> bool {
		if !self.is_active() {
			return true;
		}
		let Some(properties) = stamp.properties() else {
			return false;
		};
		(!self.require_no_log || properties.no_log)
			&& (!self.require_no_filter || properties.no_filter)
			&& (!self.require_dnssec || properties.dnssec)
	}
}

/// One named catalog record with its decoded stamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
	pub name: String,
	pub description: String,
	pub stamp: Stamp,
}

/// Parsed catalog document
#[derive(Debug, Clone, Default)]
pub struct Catalog {
	pub entries: Vec<CatalogEntry>,
	/// Records dropped because they had no decodable stamp
	pub skipped: usize,
}

impl Catalog {
	/// Stamps of the entries that pass `filter`, in document order.
	pub fn stamps(&self, filter: &CatalogFilter) -> Vec<Stamp> {
		self.entries.iter()
			.filter(|entry| filter.matches(&entry.stamp))
			.map(|entry| entry.stamp.clone())
			.collect()
	}
}

/// Decode every stamp in a catalog document.
#[allow(dead_code)]
pub fn parse_catalog(text: &str) -> Vec<Stamp> {
	parse_catalog_filtered(text, &CatalogFilter::default())
}

/// Decode the stamps of a catalog document that pass `filter`.
///
/// The binary uses `parse_catalog_entries` to keep the skipped count.
#[allow(dead_code)]
pub fn parse_catalog_filtered(text: &str, filter: &CatalogFilter) -> Vec<Stamp> {
	parse_catalog_entries(text).stamps(filter)
}

/// Parse a catalog document into named entries.
///
/// Records start at lines beginning with `##`; text before the first marker
/// is preamble. The marker line carries the record name, other plain lines
/// are description, and the last decodable `sdns://` line is the record's
/// stamp. Records without a decodable stamp are skipped and counted.
pub fn parse_catalog_entries(text: &str) -> Catalog {
	let mut catalog = Catalog::default();
	for record in split_records(text) {
		match parse_record(&record) {
			Some(entry) => catalog.entries.push(entry),
			None => catalog.skipped += 1,
		}
	}
	tracing::debug!(
		"catalog: {} entries decoded, {} records skipped",
		catalog.entries.len(), catalog.skipped,
	);
	catalog
}

fn split_records(text: &str) -> Vec<Vec<&str>> {
	let mut records = Vec::new();
	let mut current: Option<Vec<&str>> = None;
	for line in text.lines() {
		if line.trim_start().starts_with(RECORD_MARKER) {
			if let Some(record) = current.take() {
				records.push(record);
			}
			current = Some(vec![line]);
		} else if let Some(record) = current.as_mut() {
			record.push(line);
		}
	}
	if let Some(record) = current {
		records.push(record);
	}
	records
}

fn parse_record(lines: &[&str]) -> Option<CatalogEntry> {
	let mut lines = lines.iter()
		.map(|line| line.trim())
		.filter(|line| !line.is_empty());

	let marker = lines.next()?;
	let mut name = marker.trim_start_matches('#').trim().to_string();
	let mut description = Vec::new();
	let mut stamp = None;
	let mut stamp_lines = 0;

	// Later stamp lines replace earlier ones; undecodable lines are ignored
	for line in lines {
		if line.starts_with(STAMP_PREFIX) {
			stamp_lines += 1;
			match decode(line) {
				Ok(decoded) => stamp = Some(decoded),
				Err(e) => tracing::debug!("catalog record '{}': bad stamp line: {}", name, e),
			}
		} else if name.is_empty() {
			name = line.to_string();
		} else {
			description.push(line);
		}
	}

	let Some(stamp) = stamp else {
		tracing::debug!(
			"skipping catalog record '{}': no decodable stamp in {} stamp line(s)",
			name, stamp_lines,
		);
		return None;
	};
	Some(CatalogEntry {
		name,
		description: description.join("\n"),
		stamp,
	})
}

/// Load catalog text from a local path or an `https://` URL.
pub async fn load_catalog_text(source: &str, timeout: Duration) -> Result<String> {
	if source.starts_with("https://") {
		tracing::info!("downloading catalog from {}", source);
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| anyhow!("failed to build HTTP client: {}", e))?;
		let response = client.get(source).send().await
			.and_then(|r| r.error_for_status())
			.map_err(|e| anyhow!("failed to download catalog '{}': {}", source, e))?;
		return response.text().await
			.map_err(|e| anyhow!("failed to read catalog body from '{}': {}", source, e));
	}

	tokio::fs::read_to_string(source).await
		.map_err(|e| anyhow!("failed to read catalog file '{}': {}", source, e))
}
