//! Plain-text rendering of loaded reports and their aggregate.

use std::fmt::Write;

use crate::aggregate::{alphabetical, ranked, AggregatedReport};
use crate::config::DisplayConfig;
use crate::dmarc::Report;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One line per report: window start, organization, policy domain, rows, messages.
pub fn render_report_list(reports: &[Report]) -> String {
	let mut out = String::new();

	for report in reports {
		let _ = writeln!(
			out,
			"{}  {:<30} {:<30} {:>5} records {:>7} messages",
			report.date_range().begin.format(DATE_FORMAT),
			truncate(&report.report_metadata.org_name, 30),
			truncate(&report.policy_published.domain, 30),
			report.records.len(),
			report.message_count()
		);
	}

	out
}

/// Renders the aggregate. What gets cut off is decided by `display`.
pub fn render_aggregate(aggr: &AggregatedReport, display: &DisplayConfig) -> String {
	let mut out = String::new();

	let _ = writeln!(out, "Aggregated Report");
	let _ = writeln!(out, "  Total Reports:    {}", aggr.total_reports);
	let _ = writeln!(out, "  Total Records:    {}", aggr.total_records);
	if let Some(range) = &aggr.date_range {
		let _ = writeln!(
			out,
			"  Date Range:       {} to {}",
			range.begin.format(DATE_FORMAT),
			range.end.format(DATE_FORMAT)
		);
	}

	section(&mut out, "Domains", &alphabetical(&aggr.domains));
	section(&mut out, "Dispositions", &alphabetical(&aggr.dispositions));
	section(&mut out, "DKIM Results", &alphabetical(&aggr.dkim_results));
	section(&mut out, "SPF Results", &alphabetical(&aggr.spf_results));

	let sources = ranked(&aggr.sources);
	let shown = sources.len().min(display.top_sources);
	section(&mut out, "Top Sources", &sources[..shown]);

	let _ = writeln!(out, "\nFailed Records ({})", aggr.failed_records.len());
	if !aggr.failed_records.is_empty() {
		let _ = writeln!(out, "  {:<20} {:<30} {:<8} Reason", "Source IP", "Domain", "Count");
		let _ = writeln!(out, "  {}", "-".repeat(78));
	}
	for record in aggr.failed_records.iter().take(display.failed_records) {
		let _ = writeln!(
			out,
			"  {:<20} {:<30} {:<8} {}",
			truncate(&record.source_ip, 20),
			truncate(&record.domain, 30),
			record.count,
			record.reason
		);
	}
	if aggr.failed_records.len() > display.failed_records {
		let _ = writeln!(out, "  ... and {} more", aggr.failed_records.len() - display.failed_records);
	}

	out
}

fn section(out: &mut String, title: &str, entries: &[(&str, usize)]) {
	let _ = writeln!(out, "\n{}", title);
	for (key, count) in entries {
		let _ = writeln!(out, "  {:<35} {}", key, count);
	}
}

fn truncate(s: &str, max: usize) -> String {
	if s.chars().count() <= max {
		return s.to_string();
	}
	let mut cut: String = s.chars().take(max.saturating_sub(3)).collect();
	cut.push_str("...");
	cut
}
