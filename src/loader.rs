//! Loading every report file from a directory.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, DirBuilder, File};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_FILE_BYTES;
use crate::dmarc::{self, Report};
use crate::error::{LoadError, ParseError};

/// Name of the report directory below the home directory.
pub const REPORT_DIR_NAME: &str = ".dmarcview";

/// The well-known report location, `~/.dmarcview`.
pub fn default_report_dir() -> Result<PathBuf, LoadError> {
	dirs::home_dir()
		.map(|home| home.join(REPORT_DIR_NAME))
		.ok_or(LoadError::NoHomeDirectory)
}

/// Why a single directory entry did not produce a report.
#[derive(Debug)]
pub enum FailureReason {
	/// The filename failed the path-safety check and was never opened.
	SuspiciousName,
	Parse(ParseError)
}

#[derive(Debug)]
pub struct FileFailure {
	pub file_name: String,
	pub reason: FailureReason
}

impl FileFailure {
	pub fn is_security(&self) -> bool {
		matches!(self.reason, FailureReason::SuspiciousName)
	}
}

impl fmt::Display for FileFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.reason {
			FailureReason::SuspiciousName => {
				write!(f, "Security warning: skipping suspicious filename: {}", self.file_name)
			},
			FailureReason::Parse(err) => write!(f, "Error parsing {}: {}", self.file_name, err),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
	/// Every candidate file parsed.
	Complete,
	/// Some files parsed, some failed.
	Partial
}

/// A successful load: at least one report, plus whatever failed along the way.
#[derive(Debug)]
pub struct LoadOutcome {
	pub reports: Vec<Report>,
	pub failures: Vec<FileFailure>
}

impl LoadOutcome {
	pub fn status(&self) -> LoadStatus {
		if self.failures.is_empty() {
			LoadStatus::Complete
		} else {
			LoadStatus::Partial
		}
	}

	/// Number of files that were considered, successful or not.
	pub fn attempted(&self) -> usize {
		self.reports.len() + self.failures.len()
	}

	pub fn security_skips(&self) -> usize {
		self.failures.iter().filter(|f| f.is_security()).count()
	}

	/// One-line status suitable for showing after a (re)load.
	pub fn summary_message(&self) -> String {
		match self.status() {
			LoadStatus::Complete if self.reports.len() == 1 => "Successfully loaded 1 report".to_string(),
			LoadStatus::Complete => format!("Successfully loaded {} reports", self.reports.len()),
			LoadStatus::Partial => format!(
				"Loaded {} of {} report files, {} failed",
				self.reports.len(),
				self.attempted(),
				self.failures.len()
			),
		}
	}
}

/// Checks that a directory entry name is a single plain path segment.
///
/// The name must survive normalisation unchanged, must not be absolute and must
/// not contain separators or parent segments.
pub fn is_safe_file_name(name: &str) -> bool {
	if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains('\0') {
		return false;
	}

	let path = Path::new(name);
	if path.is_absolute() {
		return false;
	}

	let mut components = path.components();
	match (components.next(), components.next()) {
		(Some(Component::Normal(segment)), None) => segment == path.as_os_str(),
		_ => false,
	}
}

/// Reads report files out of a single directory.
#[derive(Debug, Clone)]
pub struct ReportLoader {
	dir: PathBuf,
	max_file_bytes: u64
}

impl ReportLoader {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		ReportLoader {
			dir: dir.into(),
			max_file_bytes: DEFAULT_MAX_FILE_BYTES
		}
	}

	/// Loader for `~/.dmarcview`, creating the directory if needed.
	pub fn open_default() -> Result<Self, LoadError> {
		let loader = ReportLoader::new(default_report_dir()?);
		loader.ensure_directory()?;
		Ok(loader)
	}

	pub fn with_max_file_bytes(mut self, limit: u64) -> Self {
		self.max_file_bytes = limit;
		self
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Creates the report directory with owner-only access if it does not exist yet.
	///
	/// The parent must already exist.
	pub fn ensure_directory(&self) -> Result<(), LoadError> {
		match fs::metadata(&self.dir) {
			Ok(meta) if meta.is_dir() => return Ok(()),
			Ok(_) => {
				return Err(self.access_error(std::io::Error::new(
					std::io::ErrorKind::Other,
					"path exists but is not a directory"
				)));
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
			Err(e) => return Err(self.access_error(e)),
		}

		let mut builder = DirBuilder::new();
		builder.recursive(false);
		#[cfg(unix)]
		{
			use std::os::unix::fs::DirBuilderExt;
			builder.mode(0o700);
		}
		builder.create(&self.dir).map_err(|e| self.access_error(e))?;

		info!(dir = %self.dir.display(), "created report directory");
		Ok(())
	}

	/// Parses every regular file directly inside the directory.
	///
	/// Fails only when nothing could be loaded. Per-file problems of a partially
	/// successful load are returned in [`LoadOutcome::failures`].
	pub fn load_all(&self) -> Result<LoadOutcome, LoadError> {
		let entries = fs::read_dir(&self.dir).map_err(|e| self.access_error(e))?;

		let mut names = Vec::new();
		let mut seen_any = false;
		for entry in entries {
			let entry = entry.map_err(|e| self.access_error(e))?;
			seen_any = true;

			// follows symlinks; a dangling link stays a candidate and fails on open
			match fs::metadata(entry.path()) {
				Ok(meta) if meta.is_dir() => {
					debug!(entry = ?entry.file_name(), "skipping subdirectory");
					continue;
				},
				Ok(meta) if !meta.is_file() => {
					warn!(entry = ?entry.file_name(), "skipping entry that is not a regular file");
					continue;
				},
				_ => {},
			}

			names.push(entry.file_name());
		}

		if !seen_any {
			return Err(LoadError::NoReports { dir: self.dir.clone() });
		}

		names.sort();
		self.load_names(names)
	}

	/// Loads the given directory entry names in order.
	pub(crate) fn load_names(&self, names: Vec<OsString>) -> Result<LoadOutcome, LoadError> {
		let mut reports = Vec::new();
		let mut failures = Vec::new();

		for raw_name in names {
			let file_name = raw_name.to_string_lossy().into_owned();

			if raw_name.to_str().is_none() || !is_safe_file_name(&file_name) {
				warn!(file = %file_name, "skipping suspicious filename");
				failures.push(FileFailure { file_name, reason: FailureReason::SuspiciousName });
				continue;
			}

			match self.parse_file(&file_name) {
				Ok(report) => {
					debug!(file = %file_name, report_id = %report.report_metadata.report_id, "parsed report");
					reports.push(report);
				},
				Err(err) => {
					warn!(file = %file_name, error = %err, "failed to parse report");
					failures.push(FileFailure { file_name, reason: FailureReason::Parse(err) });
				},
			}
		}

		if reports.is_empty() {
			if failures.is_empty() {
				return Err(LoadError::NoReports { dir: self.dir.clone() });
			}
			return Err(LoadError::AllFailed { dir: self.dir.clone(), failures });
		}

		let outcome = LoadOutcome { reports, failures };
		if outcome.status() == LoadStatus::Partial {
			warn!(
				failed = outcome.failures.len(),
				attempted = outcome.attempted(),
				"some report files failed to load"
			);
		}
		info!("{}", outcome.summary_message());

		Ok(outcome)
	}

	/// Reads, unpacks and parses one file from the directory. `file_name` must
	/// already have passed [`is_safe_file_name`].
	fn parse_file(&self, file_name: &str) -> Result<Report, ParseError> {
		let file = File::open(self.dir.join(file_name))?;
		let data = dmarc::compression::read_limited(file, self.max_file_bytes)?;
		let xml = dmarc::read_report(data, self.max_file_bytes)?;
		dmarc::parse(&xml)
	}

	fn access_error(&self, source: std::io::Error) -> LoadError {
		LoadError::DirectoryAccess { dir: self.dir.clone(), source }
	}
}

/// Loads every report in `dir`. See [`ReportLoader::load_all`].
pub fn load_all(dir: impl Into<PathBuf>) -> Result<LoadOutcome, LoadError> {
	ReportLoader::new(dir).load_all()
}

/// Orders reports newest first by the start of their reporting window.
///
/// The sort is stable, so reports starting at the same instant keep their order.
pub fn sort_by_date_descending(reports: &mut [Report]) {
	reports.sort_by(|a, b| b.date_range().begin.cmp(&a.date_range().begin));
}
