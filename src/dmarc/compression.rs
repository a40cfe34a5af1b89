use flate2::read::GzDecoder;
use std::io::{prelude::*, Cursor};
use zip::ZipArchive;

use crate::error::ParseError;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Container a report file arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFileType {
	Xml,
	Gzip,
	Zip
}

impl ReportFileType {
	/// Guesses the container from the leading bytes. Anything unrecognised is
	/// treated as plain XML and left for the parser to judge.
	pub fn detect(data: &[u8]) -> ReportFileType {
		if data.starts_with(GZIP_MAGIC) {
			ReportFileType::Gzip
		} else if data.starts_with(ZIP_MAGIC) {
			ReportFileType::Zip
		} else {
			ReportFileType::Xml
		}
	}
}

/// Given the raw file bytes, returns the XML document inside, reading at most `limit` bytes of it.
pub fn read_report(data: Vec<u8>, limit: u64) -> Result<Vec<u8>, ParseError> {
	match ReportFileType::detect(&data) {
		ReportFileType::Xml => Ok(data),
		ReportFileType::Gzip => {
			let decoder = GzDecoder::new(Cursor::new(data));
			read_limited(decoder, limit)
		},
		ReportFileType::Zip => {
			let mut archive = ZipArchive::new(Cursor::new(data))
				.map_err(|e| ParseError::Archive(e.to_string()))?;

			if archive.len() != 1 {
				return Err(ParseError::Archive("ZIP archive has multiple or no files".to_string()));
			}

			let report_file = archive.by_index(0).map_err(|e| ParseError::Archive(e.to_string()))?;
			read_limited(report_file, limit)
		},
	}
}

/// Reads `reader` to the end, failing once more than `limit` bytes come out.
pub(crate) fn read_limited<R: Read>(reader: R, limit: u64) -> Result<Vec<u8>, ParseError> {
	let mut result = Vec::new();
	reader.take(limit.saturating_add(1)).read_to_end(&mut result)?;

	if result.len() as u64 > limit {
		return Err(ParseError::TooLarge { limit });
	}

	Ok(result)
}
