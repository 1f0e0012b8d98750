//! Platform identification from `/host/machine.conf`.

use tracing::debug;

use crate::error::{GatherError, Result};
use crate::runner::CommandRunner;

pub const MACHINE_CONF: &str = "cat /host/machine.conf";

/// Keys that carry the platform string, depending on the boot loader.
const PLATFORM_KEYS: [&str; 2] = ["onie_platform", "aboot_platform"];

/// Returns the platform string from `machine.conf` content.
///
/// The first `onie_platform` or `aboot_platform` assignment wins. Lines
/// without `=` are ignored.
///
/// # Examples
///
/// ```
/// use dut_facts_gather::platform::parse_machine_conf;
///
/// let conf = "onie_machine=mlnx_msn2010\nonie_platform=x86_64-mlnx_msn2010-r0\n";
/// assert_eq!(parse_machine_conf(conf).as_deref(), Some("x86_64-mlnx_msn2010-r0"));
/// assert_eq!(parse_machine_conf("# empty\n"), None);
/// ```
pub fn parse_machine_conf(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| PLATFORM_KEYS.contains(&key.trim()))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Reads the platform string from the device.
pub fn gather_platform(runner: &dyn CommandRunner) -> Result<String> {
    let stdout = runner.run_checked(MACHINE_CONF)?;
    let platform = parse_machine_conf(&stdout).ok_or_else(|| GatherError::UnexpectedOutput {
        command: MACHINE_CONF.to_string(),
        detail: "no onie_platform or aboot_platform entry".to_string(),
    })?;
    debug!(host = runner.host(), %platform, "resolved platform");
    Ok(platform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;

    #[test]
    fn test_parse_onie_platform() {
        let conf = "\
onie_version=2019.11-5.2.0020
onie_platform=x86_64-mlnx_msn2410-r0
onie_machine=mlnx_msn2410
";
        assert_eq!(
            parse_machine_conf(conf).as_deref(),
            Some("x86_64-mlnx_msn2410-r0")
        );
    }

    #[test]
    fn test_parse_aboot_platform() {
        let conf = "aboot_vendor=arista\naboot_platform=x86_64-arista_7050_qx32\n";
        assert_eq!(
            parse_machine_conf(conf).as_deref(),
            Some("x86_64-arista_7050_qx32")
        );
    }

    #[test]
    fn test_first_platform_key_wins() {
        let conf = "aboot_platform=first\nonie_platform=second\n";
        assert_eq!(parse_machine_conf(conf).as_deref(), Some("first"));
    }

    #[test]
    fn test_lines_without_equals_ignored() {
        let conf = "garbage line\n\nonie_platform = x86_64-dell_s6000_s1220-r0 \n";
        assert_eq!(
            parse_machine_conf(conf).as_deref(),
            Some("x86_64-dell_s6000_s1220-r0")
        );
    }

    #[test]
    fn test_missing_platform() {
        assert_eq!(parse_machine_conf("onie_machine=x\n"), None);
        assert_eq!(parse_machine_conf("onie_platform=\n"), None);
    }

    #[test]
    fn test_gather_platform_missing_key() {
        let runner = ScriptedRunner::new("dut").respond(MACHINE_CONF, "onie_arch=x86_64\n");
        let err = gather_platform(&runner).unwrap_err();
        assert!(matches!(err, GatherError::UnexpectedOutput { .. }));
    }
}
