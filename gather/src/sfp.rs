//! SFP EEPROM checks through `ethtool -m`.
//!
//! Each front-panel port maps to an SFP index derived from its first lane.
//! A readable module prints at least a handful of `key: value` lines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GatherError, Result};
use crate::runner::CommandRunner;

pub const PORT_CONFIG: &str = "sudo sonic-cfggen -d --var-json PORT";

/// Fewer lines than this means the EEPROM was not really decoded.
pub const MIN_EEPROM_LINES: usize = 5;

/// SFP index for a port's comma-separated lane list.
///
/// ```
/// use dut_facts_gather::sfp::sfp_index;
///
/// assert_eq!(sfp_index("0,1,2,3").unwrap(), 1);
/// assert_eq!(sfp_index("8,9").unwrap(), 3);
/// ```
pub fn sfp_index(lanes: &str) -> Result<u32> {
    let first = lanes.split(',').next().unwrap_or_default().trim();
    let lane: u32 = first.parse().map_err(|_| GatherError::UnexpectedOutput {
        command: PORT_CONFIG.to_string(),
        detail: format!("invalid lane list '{lanes}'"),
    })?;
    Ok(lane / 4 + 1)
}

pub fn ethtool_command(index: u32) -> String {
    format!("sudo ethtool -m sfp{index}")
}

/// Port name → lane list from the `PORT` table JSON.
pub fn parse_port_lanes(json: &str) -> Result<BTreeMap<String, String>> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| GatherError::UnexpectedOutput {
            command: PORT_CONFIG.to_string(),
            detail: e.to_string(),
        })?;
    let ports = value.as_object().ok_or_else(|| GatherError::UnexpectedOutput {
        command: PORT_CONFIG.to_string(),
        detail: "PORT table is not an object".to_string(),
    })?;
    Ok(ports
        .iter()
        .filter_map(|(port, attrs)| {
            attrs
                .get("lanes")
                .and_then(|lanes| lanes.as_str())
                .map(|lanes| (port.clone(), lanes.to_string()))
        })
        .collect())
}

/// Checks that `ethtool -m` output looks like a decoded EEPROM.
pub fn check_eeprom_output(text: &str) -> std::result::Result<(), String> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < MIN_EEPROM_LINES {
        return Err(format!(
            "expected at least {MIN_EEPROM_LINES} lines, got {}",
            lines.len()
        ));
    }
    if let Some(line) = lines.iter().find(|line| !line.contains(':')) {
        return Err(format!("unexpected line '{line}'"));
    }
    Ok(())
}

/// Outcome of one port's EEPROM read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SfpCheck {
    pub port: String,
    pub sfp: u32,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Reads one port's EEPROM.
///
/// A failed `ethtool` run or malformed output is reported in the returned
/// check; only an invalid lane list is an error.
pub fn check_port(runner: &dyn CommandRunner, port: &str, lanes: &str) -> Result<SfpCheck> {
    let sfp = sfp_index(lanes)?;
    let detail = match runner.run_checked(&ethtool_command(sfp)) {
        Ok(stdout) => check_eeprom_output(&stdout).err(),
        Err(e) => Some(e.to_string()),
    };
    debug!(host = runner.host(), port, sfp, ok = detail.is_none(), "checked sfp eeprom");
    Ok(SfpCheck {
        port: port.to_string(),
        sfp,
        ok: detail.is_none(),
        detail,
    })
}

/// Checks `ports`, or every port in the `PORT` table when empty.
pub fn check_ports(runner: &dyn CommandRunner, ports: &[String]) -> Result<Vec<SfpCheck>> {
    let lanes = parse_port_lanes(&runner.run_checked(PORT_CONFIG)?)?;
    let selected: Vec<&String> = if ports.is_empty() {
        lanes.keys().collect()
    } else {
        ports.iter().collect()
    };
    selected
        .into_iter()
        .map(|port| {
            let port_lanes = lanes.get(port).ok_or_else(|| {
                GatherError::Config(format!("port '{port}' is not in the PORT table"))
            })?;
            check_port(runner, port, port_lanes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;

    const EEPROM: &str = "\
\tIdentifier                                : 0x11 (QSFP28)
\tExtended identifier                       : 0x00
\tConnector                                 : 0x23 (No separable connector)
\tTransceiver codes                         : 0x80 0x00 0x00 0x00
\tVendor name                               : Mellanox
\tVendor PN                                 : MCP1600-C001
";

    const PORTS: &str = r#"{
        "Ethernet0": {"lanes": "0,1,2,3", "speed": "100000"},
        "Ethernet4": {"lanes": "4,5,6,7", "speed": "100000"},
        "Ethernet8": {"speed": "100000"}
    }"#;

    #[test]
    fn test_sfp_index() {
        assert_eq!(sfp_index("0").unwrap(), 1);
        assert_eq!(sfp_index("4,5,6,7").unwrap(), 2);
        assert_eq!(sfp_index("127").unwrap(), 32);
        assert!(sfp_index("").is_err());
        assert!(sfp_index("lane0").is_err());
    }

    #[test]
    fn test_parse_port_lanes_skips_ports_without_lanes() {
        let lanes = parse_port_lanes(PORTS).unwrap();
        assert_eq!(lanes.len(), 2);
        assert_eq!(lanes["Ethernet4"], "4,5,6,7");
        assert!(parse_port_lanes("[1, 2]").is_err());
    }

    #[test]
    fn test_check_eeprom_output() {
        assert!(check_eeprom_output(EEPROM).is_ok());
        assert!(check_eeprom_output("a: 1\nb: 2\n").unwrap_err().contains("at least 5"));

        let odd = format!("{EEPROM}Cannot get module EEPROM information\n");
        assert!(check_eeprom_output(&odd).unwrap_err().contains("Cannot get"));
    }

    #[test]
    fn test_check_ports() {
        let runner = ScriptedRunner::new("dut")
            .respond(PORT_CONFIG, PORTS)
            .respond(ethtool_command(1), EEPROM);
        let checks = check_ports(&runner, &[]).unwrap();
        assert_eq!(checks.len(), 2);
        assert!(checks[0].ok);
        assert_eq!(checks[1].port, "Ethernet4");
        assert_eq!(checks[1].sfp, 2);
        assert!(!checks[1].ok);
        assert!(checks[1].detail.as_deref().unwrap().contains("rc=127"));
    }

    #[test]
    fn test_check_unknown_port() {
        let runner = ScriptedRunner::new("dut").respond(PORT_CONFIG, PORTS);
        let err = check_ports(&runner, &["Ethernet99".to_string()]).unwrap_err();
        assert!(matches!(err, GatherError::Config(_)));
    }
}
