//! Structured per-device reports.

use serde::{Deserialize, Serialize};

use crate::error::GatherError;
use crate::features::FeatureFacts;
use crate::firmware::FirmwareStatus;
use crate::runner::RunError;
use crate::wjh::WjhContext;

/// Structured failure code for a fact that could not be collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// The command could not run or exited non-zero.
    CommandFailed,
    /// The command did not finish in time.
    Timeout,
    /// Output was not a well-formed table.
    ParseFailed,
    /// A table lacked a column the fact needs.
    MissingColumn,
    /// Local filesystem failure.
    Io,
    /// The device does not support or enable what was asked.
    Unsupported,
    /// Output parsed but its content is unexpected.
    UnexpectedOutput,
    /// Configuration does not cover the device.
    Config,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommandFailed => write!(f, "command_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::ParseFailed => write!(f, "parse_failed"),
            Self::MissingColumn => write!(f, "missing_column"),
            Self::Io => write!(f, "io"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::UnexpectedOutput => write!(f, "unexpected_output"),
            Self::Config => write!(f, "config"),
        }
    }
}

impl From<&GatherError> for FailureCode {
    fn from(err: &GatherError) -> Self {
        match err {
            GatherError::Run(RunError::Timeout { .. }) => Self::Timeout,
            GatherError::Run(_) => Self::CommandFailed,
            GatherError::Parse { .. } => Self::ParseFailed,
            GatherError::Lookup(_) => Self::MissingColumn,
            GatherError::Io(_) => Self::Io,
            GatherError::UnsupportedComponent(_) | GatherError::Unavailable(_) => {
                Self::Unsupported
            }
            GatherError::UnexpectedOutput { .. }
            | GatherError::MissingComponent(_)
            | GatherError::MissingImage { .. } => Self::UnexpectedOutput,
            GatherError::Yaml(_) | GatherError::Config(_) | GatherError::ThreadPool(_) => {
                Self::Config
            }
        }
    }
}

/// One fact that could not be collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactFailure {
    /// Fact name (`platform`, `features`, `firmware`, `wjh`).
    pub fact: String,
    pub code: FailureCode,
    pub detail: String,
}

impl FactFailure {
    pub fn new(fact: impl Into<String>, err: &GatherError) -> Self {
        Self {
            fact: fact.into(),
            code: FailureCode::from(err),
            detail: err.to_string(),
        }
    }
}

/// Facts collected from one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatherReport {
    pub host: String,
    /// RFC 3339 collection time.
    pub collected_at: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureFacts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<FirmwareStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wjh: Option<WjhContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FactFailure>,
}

impl GatherReport {
    pub fn new(host: impl Into<String>, collected_at: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            collected_at: collected_at.into(),
            success: true,
            platform: None,
            features: None,
            firmware: None,
            wjh: None,
            failures: Vec::new(),
        }
    }

    /// Records a failed fact and marks the report unsuccessful.
    pub fn record_failure(&mut self, fact: &str, err: &GatherError) {
        self.failures.push(FactFailure::new(fact, err));
        self.success = false;
    }
}

/// Failure code counts across reports, ordered by code.
pub fn failure_code_summary(reports: &[GatherReport]) -> Vec<(FailureCode, usize)> {
    let mut counts = std::collections::BTreeMap::new();
    for failure in reports.iter().flat_map(|r| &r.failures) {
        *counts.entry(failure.code).or_insert(0) += 1;
    }
    counts.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dut_facts_core::{LookupError, ParseError};

    #[test]
    fn test_failure_code_display_matches_serde() {
        let codes = [
            (FailureCode::CommandFailed, "command_failed"),
            (FailureCode::Timeout, "timeout"),
            (FailureCode::ParseFailed, "parse_failed"),
            (FailureCode::MissingColumn, "missing_column"),
            (FailureCode::Io, "io"),
            (FailureCode::Unsupported, "unsupported"),
            (FailureCode::UnexpectedOutput, "unexpected_output"),
            (FailureCode::Config, "config"),
        ];

        for (code, expected) in codes {
            assert_eq!(code.to_string(), expected);
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{expected}\""));
        }
    }

    #[test]
    fn test_failure_code_from_error() {
        let timeout = GatherError::Run(RunError::Timeout {
            command: "show features".into(),
            timeout_ms: 10,
        });
        assert_eq!(FailureCode::from(&timeout), FailureCode::Timeout);

        let exit = GatherError::Run(RunError::NonZeroExit {
            command: "show features".into(),
            rc: Some(1),
            output: String::new(),
        });
        assert_eq!(FailureCode::from(&exit), FailureCode::CommandFailed);

        let parse = GatherError::parse("show features", ParseError::NoSeparator { marker: '-' });
        assert_eq!(FailureCode::from(&parse), FailureCode::ParseFailed);

        let lookup = GatherError::Lookup(LookupError {
            column: "Status".into(),
            available: vec!["Feature".into()],
        });
        assert_eq!(FailureCode::from(&lookup), FailureCode::MissingColumn);

        let missing = GatherError::Unavailable("what-just-happened".into());
        assert_eq!(FailureCode::from(&missing), FailureCode::Unsupported);
    }

    #[test]
    fn test_report_omits_empty_sections() {
        let report = GatherReport::new("dut-1", "2026-01-01T00:00:00+00:00");
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("failures"));
        assert!(!json.contains("platform"));
    }

    #[test]
    fn test_record_failure_marks_report() {
        let mut report = GatherReport::new("dut-1", "2026-01-01T00:00:00+00:00");
        report.record_failure("platform", &GatherError::Config("no platform".into()));
        assert!(!report.success);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failures"][0]["fact"], "platform");
        assert_eq!(json["failures"][0]["code"], "config");
    }

    #[test]
    fn test_failure_code_summary() {
        let mut a = GatherReport::new("a", "t");
        a.record_failure("wjh", &GatherError::Unavailable("wjh".into()));
        a.record_failure("firmware", &GatherError::MissingComponent("CPLD".into()));
        let mut b = GatherReport::new("b", "t");
        b.record_failure("wjh", &GatherError::Unavailable("wjh".into()));

        let summary = failure_code_summary(&[a, b]);
        assert_eq!(
            summary,
            vec![(FailureCode::Unsupported, 2), (FailureCode::UnexpectedOutput, 1)]
        );
    }
}
