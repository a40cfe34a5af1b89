//! DMARC aggregate report model, parser and file containers.

pub mod compression;
pub mod parser;
pub mod types;

pub use compression::{read_report, ReportFileType};
pub use parser::{parse, parse_named};
pub use types::{
	AuthResults, DateRange, DkimAuthResult, PolicyEvaluated, PolicyPublished, Record, RecordIdentifiers,
	RecordRow, Report, ReportMetadata, SpfAuthResult,
};
