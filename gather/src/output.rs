//! Output formatting for parsed tables and gather reports.
//!
//! The `table` format prints the same fixed-width layout the device uses, so
//! its output parses back with [`dut_facts_core::parse`].

use serde::Serialize;

use dut_facts_core::Table;

use crate::report::GatherReport;

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum OutputFormat {
    Json,
    Yaml,
    Markdown,
    Table,
}

/// Serializes any value as JSON or YAML.
///
/// `Markdown` and `Table` have no generic rendering and fall back to JSON.
pub fn format_value<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Yaml => {
            serde_yaml::to_string(value).map_err(|e| format!("YAML serialization failed: {e}"))
        }
        OutputFormat::Json | OutputFormat::Markdown | OutputFormat::Table => {
            serde_json::to_string_pretty(value)
                .map_err(|e| format!("JSON serialization failed: {e}"))
        }
    }
}

/// Formats a parsed table.
///
/// JSON and YAML emit the records as ordered maps. `Table` fails when a
/// record's first cell is empty, since that line would parse back as a
/// continuation of the record above.
pub fn format_table(table: &Table, format: OutputFormat) -> Result<String, String> {
    let headers: Vec<&str> = table.column_names().collect();
    let rows: Vec<Vec<String>> = table
        .records
        .iter()
        .map(|record| {
            headers
                .iter()
                .map(|name| record.get(name).unwrap_or_default().to_string())
                .collect()
        })
        .collect();
    match format {
        OutputFormat::Json | OutputFormat::Yaml => format_value(&table.records, format),
        OutputFormat::Markdown => Ok(render_markdown(&headers, &rows)),
        OutputFormat::Table => {
            if let Some(first) = headers.first() {
                if rows.iter().any(|row| row.first().is_some_and(String::is_empty)) {
                    return Err(format!(
                        "table output cannot show a record with an empty '{first}' cell; \
                         use json or yaml"
                    ));
                }
            }
            Ok(render_table(&headers, &rows))
        }
    }
}

/// Formats gather reports.
pub fn format_reports(reports: &[GatherReport], format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => format_value(reports, format),
        OutputFormat::Markdown => Ok(reports_to_markdown(reports)),
        OutputFormat::Table => Ok(reports_to_table(reports)),
    }
}

/// Renders rows as a fixed-width table with a dash separator line.
///
/// A row with an empty first cell renders as an indented line, which a
/// parser reads as a continuation rather than a new record.
pub fn render_table<S: AsRef<str>>(headers: &[S], rows: &[Vec<String>]) -> String {
    let headers: Vec<&str> = headers.iter().map(AsRef::as_ref).collect();
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
                .max(1)
        })
        .collect();
    let separators: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();

    let mut out = pad_line(&headers, &widths);
    out.push_str(&pad_line(&separators, &widths));
    for row in rows {
        let cells: Vec<&str> = (0..headers.len())
            .map(|i| row.get(i).map_or("", String::as_str))
            .collect();
        out.push_str(&pad_line(&cells, &widths));
    }
    out
}

fn pad_line<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{:<width$}", cell.as_ref()))
        .collect();
    let mut line = padded.join("  ").trim_end().to_string();
    line.push('\n');
    line
}

/// Renders rows as a Markdown table, escaping `|` in cells.
pub fn render_markdown<S: AsRef<str>>(headers: &[S], rows: &[Vec<String>]) -> String {
    let headers: Vec<&str> = headers.iter().map(AsRef::as_ref).collect();
    let mut out = String::new();
    out.push_str(&format!("| {} |\n", headers.join(" | ")));
    out.push_str(&format!(
        "|{}\n",
        headers.iter().map(|_| "---|").collect::<String>()
    ));
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| c.replace('|', "\\|")).collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

fn reports_to_table(reports: &[GatherReport]) -> String {
    let headers = ["Host", "Status", "Platform", "Failures"];
    let rows: Vec<Vec<String>> = reports
        .iter()
        .map(|report| {
            vec![
                report.host.clone(),
                if report.success { "OK" } else { "FAIL" }.to_string(),
                report.platform.clone().unwrap_or_else(|| "N/A".to_string()),
                report
                    .failures
                    .iter()
                    .map(|f| format!("{}:{}", f.fact, f.code))
                    .collect::<Vec<_>>()
                    .join(","),
            ]
        })
        .collect();
    render_table(&headers, &rows)
}

fn reports_to_markdown(reports: &[GatherReport]) -> String {
    let mut out = String::new();
    for report in reports {
        out.push_str(&format!("# Facts: {}\n\n", report.host));
        out.push_str(&format!("- **Collected:** {}\n", report.collected_at));
        out.push_str(&format!(
            "- **Success:** {}\n",
            if report.success { "yes" } else { "no" }
        ));
        if let Some(ref platform) = report.platform {
            out.push_str(&format!("- **Platform:** {platform}\n"));
        }

        if let Some(ref features) = report.features {
            out.push_str("\n## Features\n\n| Feature | Status |\n|---|---|\n");
            for (name, status) in features.iter() {
                out.push_str(&format!("| {name} | {status} |\n"));
            }
        }

        if let Some(ref firmware) = report.firmware {
            out.push_str("\n## Firmware\n\n| Component | Version |\n|---|---|\n");
            for entry in firmware.entries() {
                out.push_str(&format!("| {} | {} |\n", entry.component, entry.version));
            }
        }

        if !report.failures.is_empty() {
            out.push_str("\n## Failures\n\n");
            for failure in &report.failures {
                out.push_str(&format!(
                    "- `{}` [{}]: {}\n",
                    failure.fact, failure.code, failure.detail
                ));
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatherError;

    const FEATURES: &str = "\
Feature             Status
------------------  --------
telemetry           enabled
what-just-happened  enabled
";

    #[test]
    fn test_table_output_parses_back() {
        let table = dut_facts_core::TableParser::new()
            .parse_table(FEATURES)
            .unwrap();
        let rendered = format_table(&table, OutputFormat::Table).unwrap();
        assert_eq!(
            rendered,
            "Feature             Status\n------------------  -------\ntelemetry           enabled\nwhat-just-happened  enabled\n"
        );
        let reparsed = dut_facts_core::parse(&rendered).unwrap();
        assert_eq!(reparsed, table.records);
    }

    #[test]
    fn test_table_output_rejects_empty_first_cell() {
        let table = dut_facts_core::TableParser::new()
            .with_indented_lines(dut_facts_core::IndentedLines::FillDown)
            .parse_table("Key  Value\n---  -----\n     v\n")
            .unwrap();
        let err = format_table(&table, OutputFormat::Table).unwrap_err();
        assert!(err.contains("empty 'Key' cell"), "{err}");
        assert!(format_table(&table, OutputFormat::Json).is_ok());
    }

    #[test]
    fn test_table_json_keeps_column_order() {
        let table = dut_facts_core::TableParser::new()
            .parse_table(FEATURES)
            .unwrap();
        let json = format_table(&table, OutputFormat::Json).unwrap();
        let feature = json.find("\"Feature\"").unwrap();
        let status = json.find("\"Status\"").unwrap();
        assert!(feature < status);
    }

    #[test]
    fn test_table_markdown_escapes_pipes() {
        let rows = vec![vec!["a|b".to_string()]];
        let md = render_markdown(&["Col"], &rows);
        assert!(md.contains("a\\|b"));
    }

    #[test]
    fn test_render_table_empty_cells() {
        let rows = vec![vec!["x".to_string(), String::new()]];
        assert_eq!(render_table(&["A", "Bee"], &rows), "A  Bee\n-  ---\nx\n");
    }

    #[test]
    fn test_format_reports_table() {
        let mut failing = GatherReport::new("dut-b", "2026-01-01T00:00:00+00:00");
        failing.record_failure("wjh", &GatherError::Unavailable("what-just-happened".into()));
        let mut ok = GatherReport::new("dut-a", "2026-01-01T00:00:00+00:00");
        ok.platform = Some("x86_64-mlnx_msn2410-r0".into());

        let out = format_reports(&[ok, failing], OutputFormat::Table).unwrap();
        let records = dut_facts_core::parse(&out).unwrap();
        assert_eq!(records[0].get("Status"), Some("OK"));
        assert_eq!(records[1].get("Platform"), Some("N/A"));
        assert_eq!(records[1].get("Failures"), Some("wjh:unsupported"));
    }

    #[test]
    fn test_format_reports_yaml_and_markdown() {
        let report = GatherReport::new("dut-a", "2026-01-01T00:00:00+00:00");
        let yaml = format_reports(std::slice::from_ref(&report), OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("host: dut-a"));
        let md = format_reports(&[report], OutputFormat::Markdown).unwrap();
        assert!(md.contains("# Facts: dut-a"));
    }
}
