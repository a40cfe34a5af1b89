//! Cross-report rollup statistics.

use std::collections::HashMap;

use serde::Serialize;

use crate::dmarc::{DateRange, Record, Report};

const PASS: &str = "pass";

/// A row whose policy-evaluated DKIM or SPF outcome was not `pass`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
	pub source_ip: String,
	/// The record's `header_from` domain.
	pub domain: String,
	pub count: u64,
	/// e.g. `DKIM:fail SPF:softfail`
	pub reason: String
}

/// Statistics over a set of reports. Frequency maps have no defined iteration
/// order; use [`ranked`] or [`alphabetical`] before showing them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedReport {
	pub total_reports: usize,
	/// Number of record rows, not the sum of their message counts.
	pub total_records: usize,
	/// Union of all report windows, `None` when there were no reports.
	pub date_range: Option<DateRange>,
	pub domains: HashMap<String, usize>,
	pub sources: HashMap<String, usize>,
	pub dispositions: HashMap<String, usize>,
	pub dkim_results: HashMap<String, usize>,
	pub spf_results: HashMap<String, usize>,
	pub failed_records: Vec<FailedRecord>
}

/// Combines reports into a single aggregated view.
pub fn aggregate(reports: &[Report]) -> AggregatedReport {
	let mut aggr = AggregatedReport {
		total_reports: reports.len(),
		..AggregatedReport::default()
	};

	for report in reports {
		let range = *report.date_range();
		aggr.date_range = Some(match aggr.date_range {
			Some(current) => current.union(&range),
			None => range,
		});

		bump(&mut aggr.domains, &report.policy_published.domain);

		for record in &report.records {
			aggr.total_records += 1;

			let policy = record.policy();
			bump(&mut aggr.sources, record.source_ip());
			bump(&mut aggr.dispositions, &policy.disposition);
			bump(&mut aggr.dkim_results, &policy.dkim);
			bump(&mut aggr.spf_results, &policy.spf);

			if let Some(reason) = failure_reason(record) {
				aggr.failed_records.push(FailedRecord {
					source_ip: record.source_ip().to_string(),
					domain: record.header_from().to_string(),
					count: record.row.count,
					reason
				});
			}
		}
	}

	aggr
}

fn bump(map: &mut HashMap<String, usize>, key: &str) {
	*map.entry(key.to_string()).or_insert(0) += 1;
}

/// Describes which policy-evaluated mechanisms did not pass, or `None` if both did.
fn failure_reason(record: &Record) -> Option<String> {
	let policy = record.policy();
	let mut clauses = Vec::new();

	if policy.dkim != PASS {
		clauses.push(format!("DKIM:{}", policy.dkim));
	}
	if policy.spf != PASS {
		clauses.push(format!("SPF:{}", policy.spf));
	}

	if clauses.is_empty() {
		None
	} else {
		Some(clauses.join(" ").trim().to_string())
	}
}

/// Entries ordered by descending count, ties broken by key.
pub fn ranked(map: &HashMap<String, usize>) -> Vec<(&str, usize)> {
	let mut entries: Vec<(&str, usize)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
	entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
	entries
}

/// Entries ordered by key.
pub fn alphabetical(map: &HashMap<String, usize>) -> Vec<(&str, usize)> {
	let mut entries: Vec<(&str, usize)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
	entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
	entries
}
