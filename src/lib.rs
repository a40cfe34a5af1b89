//! Loading, validation and aggregation of DMARC aggregate feedback reports.
//!
//! ```text
//! ReportLoader::load_all ──▶ dmarc::parse (per file) ──▶ Vec<Report> ──▶ aggregate()
//! ```
//!
//! Report files are read from one directory (`~/.dmarcview` by default). Plain XML,
//! gzip and single-file zip containers are accepted.

pub mod aggregate;
pub mod config;
pub mod dmarc;
pub mod error;
pub mod loader;
pub mod summary;

pub use aggregate::{aggregate, AggregatedReport, FailedRecord};
pub use config::{Config, DisplayConfig, ReportsConfig};
pub use dmarc::{parse, parse_named, DateRange, Record, Report};
pub use error::{ConfigError, FormatError, LoadError, ParseError, ReportFileError, ValidationError};
pub use loader::{load_all, sort_by_date_descending, FileFailure, LoadOutcome, LoadStatus, ReportLoader};
