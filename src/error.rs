//! Error types for parsing, loading and configuration.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::loader::FileFailure;

/// The input does not look like a feedback report at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
	#[error("file is empty")]
	Empty,

	#[error("file does not appear to be valid XML")]
	NotXml
}

/// A mandatory field was missing after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
	#[error("missing report ID")]
	MissingReportId,

	#[error("missing organization name")]
	MissingOrgName,

	#[error("missing domain in policy")]
	MissingPolicyDomain,

	#[error("missing date range begin")]
	MissingBegin,

	#[error("missing date range end")]
	MissingEnd
}

impl ValidationError {
	/// Name of the element the error relates to.
	pub const fn field(&self) -> &'static str {
		match self {
			Self::MissingReportId => "report_id",
			Self::MissingOrgName => "org_name",
			Self::MissingPolicyDomain => "domain",
			Self::MissingBegin => "begin",
			Self::MissingEnd => "end",
		}
	}
}

/// Which end of a `date_range` a timestamp belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
	Begin,
	End
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Endpoint::Begin => f.write_str("begin"),
			Endpoint::End => f.write_str("end"),
		}
	}
}

/// Errors produced while turning one report file into a [`crate::Report`].
#[derive(Debug, Error)]
pub enum ParseError {
	#[error(transparent)]
	Format(#[from] FormatError),

	#[error("invalid XML: {0}")]
	Decode(String),

	#[error("invalid {endpoint} timestamp: {raw:?}")]
	Timestamp { endpoint: Endpoint, raw: String },

	#[error("invalid DMARC report: {0}")]
	Validation(#[from] ValidationError),

	#[error("could not read file: {0}")]
	Io(#[from] std::io::Error),

	#[error("file exceeds the {limit} byte limit")]
	TooLarge { limit: u64 },

	#[error("could not unpack report: {0}")]
	Archive(String)
}

/// A [`ParseError`] attributed to the file it came from.
#[derive(Debug, Error)]
#[error("{file}: {source}")]
pub struct ReportFileError {
	pub file: String,
	#[source]
	pub source: ParseError
}

/// Fatal outcomes of a directory load.
#[derive(Debug, Error)]
pub enum LoadError {
	#[error("no DMARC reports found in {}", dir.display())]
	NoReports { dir: PathBuf },

	#[error("failed to parse any reports: {}", join_failures(failures))]
	AllFailed { dir: PathBuf, failures: Vec<FileFailure> },

	#[error("could not access report directory {}: {source}", dir.display())]
	DirectoryAccess {
		dir: PathBuf,
		#[source]
		source: std::io::Error
	},

	#[error("could not determine home directory")]
	NoHomeDirectory
}

impl LoadError {
	/// True when nothing at all was found to load, as opposed to everything failing.
	pub fn is_no_reports(&self) -> bool {
		matches!(self, LoadError::NoReports { .. })
	}
}

fn join_failures(failures: &[FileFailure]) -> String {
	failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("could not access config file {}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error
	},

	#[error("invalid config file: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("could not serialize config: {0}")]
	Serialize(#[from] toml::ser::Error)
}
