use std::borrow::Cow;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use super::types::{DateRange, PolicyPublished, Record, Report, ReportMetadata};
use crate::error::{Endpoint, FormatError, ParseError, ReportFileError, ValidationError};

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Length of the longest name in [`HTML_ENTITIES`].
const MAX_ENTITY_NAME: usize = 6;

/// HTML named character entities accepted in report text, as code points.
///
/// The five XML entities (`amp`, `lt`, `gt`, `quot`, `apos`) are left to the decoder.
const HTML_ENTITIES: &[(&str, u32)] = &[
	("nbsp", 160),
	("iexcl", 161),
	("cent", 162),
	("pound", 163),
	("yen", 165),
	("sect", 167),
	("copy", 169),
	("laquo", 171),
	("reg", 174),
	("deg", 176),
	("plusmn", 177),
	("middot", 183),
	("raquo", 187),
	("iquest", 191),
	("Auml", 196),
	("Ouml", 214),
	("Uuml", 220),
	("szlig", 223),
	("agrave", 224),
	("auml", 228),
	("ccedil", 231),
	("egrave", 232),
	("eacute", 233),
	("ouml", 246),
	("uuml", 252),
	("ndash", 8211),
	("mdash", 8212),
	("lsquo", 8216),
	("rsquo", 8217),
	("ldquo", 8220),
	("rdquo", 8221),
	("bull", 8226),
	("hellip", 8230),
	("euro", 8364),
	("trade", 8482),
];

/*
 * raw document shape
 *
 * The date range is decoded as strings first and converted afterwards, so a bad
 * timestamp surfaces as ParseError::Timestamp rather than as a decode failure.
 */

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDateRange {
	#[serde(deserialize_with = "present")]
	begin: Option<String>,
	#[serde(deserialize_with = "present")]
	end: Option<String>
}

/// An element that is present yields `Some`, even when its text is empty.
fn present<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	String::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReportMetadata {
	org_name: String,
	email: String,
	extra_contact_info: Option<String>,
	report_id: String,
	date_range: RawDateRange
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReport {
	report_metadata: RawReportMetadata,
	policy_published: PolicyPublished,
	record: Vec<Record>
}

/// Parses one aggregate feedback report document.
///
/// Documents carrying a DTD or entity declarations are refused outright, so
/// nothing defined by the document itself is ever expanded.
pub fn parse(data: &[u8]) -> Result<Report, ParseError> {
	check_format(data)?;

	let text = std::str::from_utf8(data)
		.map_err(|e| ParseError::Decode(format!("document is not valid UTF-8: {}", e)))?;
	let text = text.trim_start_matches('\u{feff}').trim();

	if text.contains("<!DOCTYPE") {
		return Err(ParseError::Decode("document type declarations are not permitted".to_string()));
	}
	if text.contains("<!ENTITY") {
		return Err(ParseError::Decode("entity declarations are not permitted".to_string()));
	}

	let text = rewrite_html_entities(text);
	let raw: RawReport = serde_xml_rs::from_str(&text)
		.map_err(|e| ParseError::Decode(e.to_string()))?;

	into_report(raw)
}

/// Same as [`parse`], with the error attributed to `file`.
pub fn parse_named(file: &str, data: &[u8]) -> Result<Report, ReportFileError> {
	parse(data).map_err(|source| ReportFileError {
		file: file.to_string(),
		source
	})
}

fn check_format(data: &[u8]) -> Result<(), FormatError> {
	if data.is_empty() {
		return Err(FormatError::Empty);
	}

	let data = data.strip_prefix(b"\xef\xbb\xbf").unwrap_or(data);
	let start = data.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(data.len());
	let data = &data[start..];

	if data.starts_with(b"<?xml") || contains(data, b"<feedback") || contains(data, b"<report") {
		Ok(())
	} else {
		Err(FormatError::NotXml)
	}
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
	haystack.windows(needle.len()).any(|w| w == needle)
}

/// Replaces known HTML named entities with numeric character references.
///
/// CDATA sections are copied verbatim. Unknown names are left in place for the
/// decoder to reject.
fn rewrite_html_entities(text: &str) -> Cow<'_, str> {
	if !text.contains('&') {
		return Cow::Borrowed(text);
	}

	let mut out = String::with_capacity(text.len());
	let mut rest = text;

	while let Some(pos) = rest.find(|c: char| c == '&' || c == '<') {
		out.push_str(&rest[..pos]);
		rest = &rest[pos..];

		if rest.starts_with(CDATA_OPEN) {
			let end = rest.find(CDATA_CLOSE).map_or(rest.len(), |i| i + CDATA_CLOSE.len());
			out.push_str(&rest[..end]);
			rest = &rest[end..];
		} else if rest.starts_with('<') {
			out.push('<');
			rest = &rest[1..];
		} else {
			// only a short alphanumeric name directly followed by ';' can match
			let name_len = rest[1..]
				.bytes()
				.take(MAX_ENTITY_NAME + 1)
				.take_while(u8::is_ascii_alphanumeric)
				.count();
			let entity = if name_len <= MAX_ENTITY_NAME && rest[1 + name_len..].starts_with(';') {
				let name = &rest[1..1 + name_len];
				HTML_ENTITIES
					.iter()
					.find(|(known, _)| *known == name)
					.map(|(_, code)| (name_len, *code))
			} else {
				None
			};

			match entity {
				Some((name_len, code)) => {
					// writing to a String cannot fail
					let _ = write!(out, "&#{};", code);
					rest = &rest[name_len + 2..];
				},
				None => {
					out.push('&');
					rest = &rest[1..];
				},
			}
		}
	}

	out.push_str(rest);
	Cow::Owned(out)
}

/// Converts a decimal epoch-seconds string. An absent element or a zero value is
/// unset; a present element that is not a number, blank included, is an error.
fn decode_timestamp(endpoint: Endpoint, raw: Option<String>) -> Result<Option<DateTime<Utc>>, ParseError> {
	let raw = match raw {
		Some(raw) => raw,
		None => return Ok(None),
	};

	let seconds: i64 = match raw.trim().parse() {
		Ok(seconds) => seconds,
		Err(_) => return Err(ParseError::Timestamp { endpoint, raw }),
	};

	if seconds == 0 {
		return Ok(None);
	}

	match DateTime::from_timestamp(seconds, 0) {
		Some(instant) => Ok(Some(instant)),
		None => Err(ParseError::Timestamp { endpoint, raw }),
	}
}

fn into_report(raw: RawReport) -> Result<Report, ParseError> {
	let RawReport { report_metadata: meta, policy_published, record } = raw;

	let begin = decode_timestamp(Endpoint::Begin, meta.date_range.begin)?;
	let end = decode_timestamp(Endpoint::End, meta.date_range.end)?;

	if meta.report_id.trim().is_empty() {
		return Err(ValidationError::MissingReportId.into());
	}
	if meta.org_name.trim().is_empty() {
		return Err(ValidationError::MissingOrgName.into());
	}
	if policy_published.domain.trim().is_empty() {
		return Err(ValidationError::MissingPolicyDomain.into());
	}
	let begin = begin.ok_or(ValidationError::MissingBegin)?;
	let end = end.ok_or(ValidationError::MissingEnd)?;

	let date_range = DateRange::new(begin, end);
	if date_range.is_inverted() {
		warn!(report_id = %meta.report_id, %begin, %end, "report date range ends before it begins");
	}

	Ok(Report {
		report_metadata: ReportMetadata {
			org_name: meta.org_name,
			email: meta.email,
			extra_contact_info: meta.extra_contact_info.filter(|s| !s.trim().is_empty()),
			report_id: meta.report_id,
			date_range
		},
		policy_published,
		records: record
	})
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	fn report_xml(metadata: &str, records: &str) -> String {
		format!(
			r#"<?xml version="1.0" encoding="UTF-8"?>
<feedback>
	<version>1.0</version>
	{}
	<policy_published>
		<domain>example.com</domain>
		<adkim>r</adkim>
		<aspf>r</aspf>
		<p>quarantine</p>
		<sp>none</sp>
		<pct>100</pct>
	</policy_published>
	{}
</feedback>"#,
			metadata, records
		)
	}

	fn metadata(org: &str, id: &str, begin: &str, end: &str) -> String {
		format!(
			r#"<report_metadata>
		<org_name>{}</org_name>
		<email>noreply-dmarc@receiver.example</email>
		<report_id>{}</report_id>
		<date_range>
			<begin>{}</begin>
			<end>{}</end>
		</date_range>
	</report_metadata>"#,
			org, id, begin, end
		)
	}

	const RECORD: &str = r#"<record>
		<row>
			<source_ip>192.0.2.10</source_ip>
			<count>7</count>
			<policy_evaluated>
				<disposition>none</disposition>
				<dkim>pass</dkim>
				<spf>fail</spf>
			</policy_evaluated>
		</row>
		<identifiers>
			<header_from>example.com</header_from>
		</identifiers>
		<auth_results>
			<dkim>
				<domain>example.com</domain>
				<result>pass</result>
				<selector>s1</selector>
			</dkim>
			<dkim>
				<domain>mailer.example</domain>
				<result>fail</result>
				<selector>s2</selector>
			</dkim>
			<spf>
				<domain>bounce.example</domain>
				<scope>mfrom</scope>
				<result>softfail</result>
			</spf>
		</auth_results>
	</record>"#;

	fn valid() -> String {
		report_xml(&metadata("Receiver Inc", "r-1", "1700000000", "1700086399"), RECORD)
	}

	#[test]
	fn parses_a_complete_report() {
		let report = parse(valid().as_bytes()).unwrap();

		assert_eq!(report.report_metadata.org_name, "Receiver Inc");
		assert_eq!(report.report_metadata.report_id, "r-1");
		assert_eq!(report.report_metadata.extra_contact_info, None);
		assert_eq!(report.policy_published.domain, "example.com");
		assert_eq!(report.policy_published.p, "quarantine");
		assert_eq!(report.policy_published.pct, 100);

		assert_eq!(report.records.len(), 1);
		let record = &report.records[0];
		assert_eq!(record.source_ip(), "192.0.2.10");
		assert_eq!(record.row.count, 7);
		assert_eq!(record.policy().spf, "fail");
		assert_eq!(record.header_from(), "example.com");
		assert_eq!(record.auth_results.dkim.len(), 2);
		assert_eq!(record.auth_results.dkim[1].selector, "s2");
		assert_eq!(record.auth_results.spf[0].scope, "mfrom");
	}

	#[test]
	fn decodes_epoch_seconds_as_absolute_instants() {
		let report = parse(valid().as_bytes()).unwrap();
		let range = report.date_range();

		assert_eq!(range.begin.timestamp(), 1_700_000_000);
		assert_eq!(range.begin, DateTime::from_timestamp(1_700_000_000, 0).unwrap());
		assert_eq!(range.end.timestamp(), 1_700_086_399);
	}

	#[test]
	fn report_without_records_is_valid() {
		let xml = report_xml(&metadata("Receiver Inc", "r-2", "1700000000", "1700086399"), "");
		let report = parse(xml.as_bytes()).unwrap();
		assert!(report.records.is_empty());
	}

	#[test]
	fn empty_input_is_a_format_error() {
		assert!(matches!(parse(b""), Err(ParseError::Format(FormatError::Empty))));
	}

	#[test]
	fn non_xml_input_is_a_format_error() {
		assert!(matches!(
			parse(b"this is a plain text email body"),
			Err(ParseError::Format(FormatError::NotXml))
		));
		assert!(matches!(parse(b"   \n\t "), Err(ParseError::Format(FormatError::NotXml))));
	}

	#[test]
	fn root_element_without_declaration_is_accepted() {
		let xml = valid();
		let without_decl = xml.split_once("?>").unwrap().1;
		assert!(parse(without_decl.as_bytes()).is_ok());
	}

	#[test]
	fn bad_timestamp_reports_the_raw_value() {
		let xml = report_xml(&metadata("Receiver Inc", "r-3", "not-a-number", "1700086399"), "");
		match parse(xml.as_bytes()) {
			Err(ParseError::Timestamp { endpoint, raw }) => {
				assert_eq!(endpoint, Endpoint::Begin);
				assert_eq!(raw, "not-a-number");
			},
			other => panic!("expected timestamp error, got {:?}", other),
		}

		let xml = report_xml(&metadata("Receiver Inc", "r-3", "1700000000", "12abc"), "");
		let err = parse(xml.as_bytes()).unwrap_err();
		assert!(matches!(err, ParseError::Timestamp { endpoint: Endpoint::End, .. }));
		assert!(err.to_string().contains("12abc"));
	}

	#[test]
	fn missing_mandatory_fields_are_named() {
		let cases = [
			(metadata("Receiver Inc", "", "1700000000", "1700086399"), ValidationError::MissingReportId),
			(metadata("", "r-4", "1700000000", "1700086399"), ValidationError::MissingOrgName),
			(
				metadata("Receiver Inc", "r-4", "1700000000", "1700086399").replace("<begin>1700000000</begin>", ""),
				ValidationError::MissingBegin
			),
			(metadata("Receiver Inc", "r-4", "1700000000", "0"), ValidationError::MissingEnd),
		];

		for (meta, expected) in cases {
			let xml = report_xml(&meta, "");
			match parse(xml.as_bytes()) {
				Err(ParseError::Validation(actual)) => assert_eq!(actual, expected),
				other => panic!("expected {:?}, got {:?}", expected, other),
			}
		}
	}

	#[test]
	fn blank_timestamp_is_a_timestamp_error() {
		for blank in ["", " "] {
			let xml = report_xml(&metadata("Receiver Inc", "r-8", blank, "1700086399"), "");
			match parse(xml.as_bytes()) {
				Err(ParseError::Timestamp { endpoint, raw }) => {
					assert_eq!(endpoint, Endpoint::Begin);
					assert!(raw.trim().is_empty());
				},
				other => panic!("expected timestamp error for {:?}, got {:?}", blank, other),
			}
		}

		let xml = report_xml(&metadata("Receiver Inc", "r-8", "1700000000", ""), "");
		assert!(matches!(parse(xml.as_bytes()), Err(ParseError::Timestamp { endpoint: Endpoint::End, .. })));
	}

	#[test]
	fn report_root_without_declaration_passes_format_check() {
		assert!(check_format(b"<report><report_metadata></report_metadata></report>").is_ok());
		assert!(check_format(b"  <report_metadata/>").is_ok());
		assert_eq!(check_format(b"<html></html>"), Err(FormatError::NotXml));
	}

	#[test]
	fn bare_ampersands_are_scanned_in_linear_time() {
		let mut xml = String::from("<?xml version=\"1.0\"?><feedback>");
		xml.push_str(&"&".repeat(400_000));

		let started = std::time::Instant::now();
		assert!(matches!(parse(xml.as_bytes()), Err(ParseError::Decode(_))));
		assert!(started.elapsed() < std::time::Duration::from_secs(5));

		let text = format!("{}{}", "&".repeat(100_000), ";");
		assert_eq!(rewrite_html_entities(&text), text.as_str());
	}

	#[test]
	fn entity_names_must_be_short_and_terminated() {
		assert_eq!(rewrite_html_entities("&nbsp;&nbsp &copyright; &euro;"), "&#160;&nbsp &copyright; &#8364;");
	}

	#[test]
	fn missing_policy_domain_is_rejected() {
		let xml = valid().replace("<domain>example.com</domain>\n\t\t<adkim>", "<adkim>");
		assert!(matches!(
			parse(xml.as_bytes()),
			Err(ParseError::Validation(ValidationError::MissingPolicyDomain))
		));
	}

	#[test]
	fn missing_date_range_is_rejected() {
		let meta = r#"<report_metadata>
		<org_name>Receiver Inc</org_name>
		<report_id>r-5</report_id>
	</report_metadata>"#;
		let xml = report_xml(meta, "");
		assert!(matches!(
			parse(xml.as_bytes()),
			Err(ParseError::Validation(ValidationError::MissingBegin))
		));
	}

	#[test]
	fn custom_entities_are_never_expanded() {
		let xml = r#"<?xml version="1.0"?>
<!DOCTYPE feedback [
	<!ENTITY secret "TOP-SECRET-PAYLOAD">
]>
<feedback>
	<report_metadata>
		<org_name>&secret;</org_name>
		<report_id>r-6</report_id>
		<date_range><begin>1700000000</begin><end>1700086399</end></date_range>
	</report_metadata>
	<policy_published><domain>example.com</domain></policy_published>
</feedback>"#;

		match parse(xml.as_bytes()) {
			Ok(report) => assert!(!report.report_metadata.org_name.contains("TOP-SECRET-PAYLOAD")),
			Err(err) => assert!(matches!(err, ParseError::Decode(_))),
		}
	}

	#[test]
	fn external_entities_are_refused() {
		let xml = r#"<?xml version="1.0"?>
<!DOCTYPE feedback [ <!ENTITY xxe SYSTEM "file:///etc/passwd"> ]>
<feedback><report_metadata><org_name>&xxe;</org_name></report_metadata></feedback>"#;
		assert!(matches!(parse(xml.as_bytes()), Err(ParseError::Decode(_))));
	}

	#[test]
	fn undeclared_entity_reference_fails_decoding() {
		let xml = valid().replace("Receiver Inc", "Receiver &bogus; Inc");
		assert!(matches!(parse(xml.as_bytes()), Err(ParseError::Decode(_))));
	}

	#[test]
	fn builtin_entities_are_decoded() {
		let xml = valid().replace("Receiver Inc", "Receiver&nbsp;&amp;&nbsp;Sons");
		let report = parse(xml.as_bytes()).unwrap();
		assert_eq!(report.report_metadata.org_name, "Receiver\u{a0}&\u{a0}Sons");
	}

	#[test]
	fn malformed_nesting_fails_decoding() {
		let xml = valid().replace("</org_name>", "</email>");
		assert!(matches!(parse(xml.as_bytes()), Err(ParseError::Decode(_))));

		let truncated = &valid()[..200];
		assert!(matches!(parse(truncated.as_bytes()), Err(ParseError::Decode(_))));
	}

	#[test]
	fn invalid_utf8_fails_decoding() {
		let mut data = valid().into_bytes();
		data.extend_from_slice(&[0xff, 0xfe]);
		assert!(matches!(parse(&data), Err(ParseError::Decode(_))));
	}

	#[test]
	fn inverted_date_range_is_tolerated() {
		let xml = report_xml(&metadata("Receiver Inc", "r-7", "1700086399", "1700000000"), "");
		let report = parse(xml.as_bytes()).unwrap();
		assert!(report.date_range().is_inverted());
	}

	#[test]
	fn named_errors_carry_the_filename() {
		let err = parse_named("google.com!example.com!1700000000.xml", b"").unwrap_err();
		assert_eq!(err.file, "google.com!example.com!1700000000.xml");
		assert!(matches!(err.source, ParseError::Format(FormatError::Empty)));
		assert!(err.to_string().starts_with("google.com!example.com!1700000000.xml: "));
	}

	#[test]
	fn entity_rewrite_leaves_cdata_alone() {
		let text = "<a>&copy;<![CDATA[&copy;]]>&amp;</a>";
		assert_eq!(rewrite_html_entities(text), "<a>&#169;<![CDATA[&copy;]]>&amp;</a>");
	}
}
