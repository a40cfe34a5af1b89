use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The reporting window of a feedback report.
///
/// Both endpoints are absolute instants decoded from epoch seconds. `begin <= end`
/// is not enforced; see [`DateRange::is_inverted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
	pub begin: DateTime<Utc>,
	pub end: DateTime<Utc>
}

impl DateRange {
	pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
		DateRange { begin, end }
	}

	/// True when the report claims to end before it begins.
	pub fn is_inverted(&self) -> bool {
		self.begin > self.end
	}

	/// Smallest range covering both `self` and `other`.
	pub fn union(&self, other: &DateRange) -> DateRange {
		DateRange {
			begin: self.begin.min(other.begin),
			end: self.end.max(other.end)
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportMetadata {
	pub org_name: String,
	pub email: String,
	pub extra_contact_info: Option<String>,
	pub report_id: String,
	pub date_range: DateRange
}

/// The DMARC policy the domain owner had published during the window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyPublished {
	pub domain: String,
	pub adkim: String,
	pub aspf: String,
	pub p: String,
	pub sp: String,
	pub pct: u32
}

/// The receiver's own verdict for a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyEvaluated {
	pub disposition: String,
	pub dkim: String,
	pub spf: String
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordRow {
	pub source_ip: String,
	/// Number of messages summarized by this row.
	pub count: u64,
	pub policy_evaluated: PolicyEvaluated
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordIdentifiers {
	pub header_from: String
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DkimAuthResult {
	pub domain: String,
	pub result: String,
	pub selector: String
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SpfAuthResult {
	pub domain: String,
	pub scope: String,
	pub result: String
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthResults {
	pub dkim: Vec<DkimAuthResult>,
	pub spf: Vec<SpfAuthResult>
}

/// One row of a feedback report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Record {
	pub row: RecordRow,
	pub identifiers: RecordIdentifiers,
	pub auth_results: AuthResults
}

impl Record {
	pub fn source_ip(&self) -> &str {
		&self.row.source_ip
	}

	pub fn header_from(&self) -> &str {
		&self.identifiers.header_from
	}

	pub fn policy(&self) -> &PolicyEvaluated {
		&self.row.policy_evaluated
	}
}

/// A parsed and validated aggregate feedback report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
	pub report_metadata: ReportMetadata,
	pub policy_published: PolicyPublished,
	pub records: Vec<Record>
}

impl Report {
	pub fn date_range(&self) -> &DateRange {
		&self.report_metadata.date_range
	}

	/// Sum of the message counts of every row.
	pub fn message_count(&self) -> u64 {
		self.records.iter().map(|r| r.row.count).sum()
	}
}
