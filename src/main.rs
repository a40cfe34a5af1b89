use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dmarcview::config::{self, Config};
use dmarcview::error::LoadError;
use dmarcview::loader::{self, ReportLoader};
use dmarcview::{aggregate, summary};

#[derive(Debug, Parser)]
#[command(name = "dmarcview", version, about = "Summarize DMARC aggregate reports")]
struct Cli {
	/// Config file, created with defaults if it does not exist
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Report directory (overrides the config file)
	#[arg(short, long)]
	dir: Option<PathBuf>,

	/// Print the aggregate as JSON
	#[arg(long)]
	json: bool,

	/// More log output (-v, -vv, -vvv)
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	let log_level = match cli.verbose {
		0 => "warn",
		1 => "info",
		2 => "debug",
		_ => "trace",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();

	/*
	 * config parsing
	 */
	let config = match &cli.config {
		Some(path) => match Config::load_or_create(path) {
			Ok(config) => config,
			Err(e) => {
				eprintln!("Error: {}", e);
				return ExitCode::FAILURE;
			},
		},
		None => config::DEFAULT,
	};

	/*
	 * report loading
	 */
	let dir = match cli.dir.clone().or_else(|| config.reports.directory.clone()) {
		Some(dir) => dir,
		None => match loader::default_report_dir() {
			Ok(dir) => dir,
			Err(e) => return startup_error(&e, None),
		},
	};

	let report_loader = ReportLoader::new(&dir).with_max_file_bytes(config.reports.max_file_bytes);
	if let Err(e) = report_loader.ensure_directory() {
		return startup_error(&e, Some(&dir));
	}

	let outcome = match report_loader.load_all() {
		Ok(outcome) => outcome,
		Err(e) => return startup_error(&e, Some(&dir)),
	};

	if !outcome.failures.is_empty() {
		eprintln!(
			"Warning: {} of {} files failed to parse",
			outcome.failures.len(),
			outcome.attempted()
		);
		for failure in &outcome.failures {
			eprintln!("{}", failure);
		}
	}

	/*
	 * output
	 */
	let mut reports = outcome.reports;
	loader::sort_by_date_descending(&mut reports);
	let aggr = aggregate(&reports);

	if cli.json {
		match serde_json::to_string_pretty(&aggr) {
			Ok(json) => println!("{}", json),
			Err(e) => {
				eprintln!("Error: {}", e);
				return ExitCode::FAILURE;
			},
		}
	} else {
		print!("{}", summary::render_report_list(&reports));
		println!();
		print!("{}", summary::render_aggregate(&aggr, &config.display));
	}

	ExitCode::SUCCESS
}

/// Prints guidance for the common first-run problems, or the error itself.
fn startup_error(err: &LoadError, dir: Option<&PathBuf>) -> ExitCode {
	let location = dir.map_or_else(|| format!("~/{}", loader::REPORT_DIR_NAME), |d| d.display().to_string());

	match err {
		LoadError::NoReports { .. } => {
			println!("No DMARC reports found!");
			println!("To use dmarcview:");
			println!("1. Place your DMARC XML reports (.xml, .xml.gz or .zip) in {}", location);
			println!("2. Run dmarcview again");
		},
		LoadError::DirectoryAccess { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied => {
			eprintln!("Permission denied when accessing the report directory.");
			eprintln!("Please check permissions for {}", location);
		},
		LoadError::NoHomeDirectory => {
			eprintln!("Could not determine your home directory.");
			eprintln!("Pass --dir or set reports.directory in a config file.");
		},
		_ => eprintln!("Error: {}", err),
	}

	ExitCode::FAILURE
}
