//! Feature facts from `show features`.
//!
//! ```text
//! Feature             Status
//! ------------------  --------
//! telemetry           enabled
//! sflow               disabled
//! what-just-happened  enabled
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use dut_facts_core::{LookupError, Record};

use crate::error::{GatherError, Result};
use crate::runner::CommandRunner;

pub const SHOW_FEATURES: &str = "show features";

/// Older images label the column `State`.
const STATUS_COLUMNS: [&str; 2] = ["Status", "State"];

/// Feature name → status as printed by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFacts {
    features: BTreeMap<String, String>,
}

impl FeatureFacts {
    /// Builds facts from parsed `show features` records.
    pub fn from_records(records: &[Record]) -> std::result::Result<Self, LookupError> {
        let mut features = BTreeMap::new();
        for record in records {
            let name = record.field("Feature")?;
            let status = match STATUS_COLUMNS.iter().find_map(|column| record.get(column)) {
                Some(status) => status,
                None => record.field(STATUS_COLUMNS[0])?,
            };
            features.insert(name.to_string(), status.to_string());
        }
        Ok(Self { features })
    }

    pub fn status(&self, feature: &str) -> Option<&str> {
        self.features.get(feature).map(String::as_str)
    }

    pub fn is_enabled(&self, feature: &str) -> bool {
        self.status(feature) == Some("enabled")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.features.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Parses the text of `show features`.
pub fn parse_features(text: &str) -> Result<FeatureFacts> {
    let records = dut_facts_core::parse(text).map_err(|e| GatherError::parse(SHOW_FEATURES, e))?;
    Ok(FeatureFacts::from_records(&records)?)
}

/// Runs `show features` and parses the result.
pub fn gather_features(runner: &dyn CommandRunner) -> Result<FeatureFacts> {
    let stdout = runner.run_checked(SHOW_FEATURES)?;
    let facts = parse_features(&stdout)?;
    debug!(host = runner.host(), count = facts.len(), "gathered feature facts");
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};

    const FEATURES: &str = "\
Feature             Status
------------------  --------
telemetry           enabled
sflow               disabled
what-just-happened  enabled
";

    #[test]
    fn test_parse_features() {
        let facts = parse_features(FEATURES).unwrap();
        assert_eq!(facts.len(), 3);
        assert_eq!(facts.status("sflow"), Some("disabled"));
        assert!(facts.is_enabled("what-just-happened"));
        assert!(!facts.is_enabled("sflow"));
        assert!(!facts.is_enabled("nat"));
    }

    #[test]
    fn test_parse_features_state_column() {
        let text = "\
Feature    State
---------  --------
lldp       enabled
";
        let facts = parse_features(text).unwrap();
        assert!(facts.is_enabled("lldp"));
    }

    #[test]
    fn test_parse_features_missing_status_column() {
        let text = "\
Feature    Mode
---------  ------
lldp       auto
";
        let err = parse_features(text).unwrap_err();
        assert!(matches!(err, GatherError::Lookup(ref e) if e.column == "Status"));
    }

    #[test]
    fn test_parse_features_without_separator() {
        let err = parse_features("Feature Status\nlldp enabled\n").unwrap_err();
        assert!(matches!(err, GatherError::Parse { ref command, .. } if command == SHOW_FEATURES));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let facts = parse_features(FEATURES).unwrap();
        let json = serde_json::to_value(&facts).unwrap();
        assert_eq!(json["telemetry"], "enabled");
    }

    #[test]
    fn test_gather_features_failed_command() {
        let runner = ScriptedRunner::new("dut").respond_with(
            SHOW_FEATURES,
            CommandOutput {
                rc: Some(1),
                stdout: String::new(),
                stderr: "Usage: show [OPTIONS]\n".into(),
            },
        );
        let err = gather_features(&runner).unwrap_err();
        assert!(err.to_string().contains("rc=1"));
    }

    #[test]
    fn test_gather_features() {
        let runner = ScriptedRunner::new("dut").respond(SHOW_FEATURES, FEATURES);
        let facts = gather_features(&runner).unwrap();
        assert!(facts.is_enabled("telemetry"));
        assert_eq!(runner.calls(), vec![SHOW_FEATURES]);
    }
}
