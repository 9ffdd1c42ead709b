use clap::Parser;

use crate::catalog::CatalogFilter;

/// DNSCrypt resolver measurement tool
#[derive(Parser, Debug)]
#[command(name = "dnscrypt-measure")]
#[command(about = "Measure DNSCrypt resolvers listed in a stamp catalog")]
pub struct Cli {
	/// Resolver catalog: local path or https:// URL
	#[arg(short = 'l', long = "list", default_value = "public-resolvers.md")]
	pub list: String,

	/// Only keep resolvers that claim not to log
	#[arg(long = "nologs")]
	pub nologs: bool,

	/// Only keep resolvers that claim not to filter
	#[arg(long = "nofilter")]
	pub nofilter: bool,

	/// Only keep resolvers that claim DNSSEC validation
	#[arg(long = "dnssec")]
	pub dnssec: bool,

	/// Print results as JSON instead of a table
	#[arg(short = 'j', long = "json")]
	pub json: bool,

	/// Include failed measurements in JSON and CSV output
	#[arg(long = "show-failed")]
	pub show_failed: bool,

	/// Query timeout in milliseconds
	#[arg(short = 't', long = "timeout", default_value = "2000")]
	pub timeout: u64,

	/// Maximum concurrent measurements (0 = unbounded)
	#[arg(short = 'c', long = "concurrency", default_value = "64")]
	pub concurrency: usize,

	/// Output CSV file path
	#[arg(short = 'o', long = "output")]
	pub output: Option<String>,

	/// Increase log verbosity (repeatable)
	#[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
	pub verbose: u8,
}

impl Cli {
	pub fn filter(&self) -> CatalogFilter {
		CatalogFilter {
			require_no_log: self.nologs,
			require_no_filter: self.nofilter,
			require_dnssec: self.dnssec,
		}
	}
}
