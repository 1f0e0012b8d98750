//! Device and inventory configuration.
//!
//! Defines the YAML-serializable description of a device under test: how to
//! reach it, which firmware components its platform carries, and the
//! tech-support loop settings. The configuration is loaded once per run and
//! passed by reference to whatever needs it.
//!
//! # Example YAML
//!
//! ```yaml
//! host: dut-1.lab
//! user: admin
//! command_timeout_secs: 120
//! firmware:
//!   binaries_path: /srv/firmware
//!   components:
//!     x86_64-mlnx_msn2010-r0: BIOS,CPLD
//! techsupport:
//!   loop_count: 3
//!   loop_delay_secs: 5
//! ```

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatherError, Result};
use crate::runner::{CommandRunner, LocalRunner, SshRunner};

fn default_timeout_secs() -> u64 {
    60
}

fn default_loop_count() -> usize {
    10
}

fn default_loop_delay_secs() -> u64 {
    10
}

/// Firmware update settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmwareConfig {
    /// Directory holding `bios/` and `cpld/` image trees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binaries_path: Option<PathBuf>,
    /// Platform string → comma-separated component names
    /// (e.g. `x86_64-mlnx_msn2010-r0: BIOS,CPLD`).
    #[serde(default)]
    pub components: BTreeMap<String, String>,
}

impl FirmwareConfig {
    /// Component names configured for `platform`, in file order.
    ///
    /// # Errors
    ///
    /// Returns [`GatherError::Config`] when the platform has no entry.
    ///
    /// # Examples
    ///
    /// ```
    /// # use dut_facts_gather::config::FirmwareConfig;
    /// let mut fw = FirmwareConfig::default();
    /// fw.components.insert("x86_64-mlnx_msn2010-r0".into(), "BIOS, CPLD".into());
    /// assert_eq!(fw.components_for("x86_64-mlnx_msn2010-r0").unwrap(), vec!["BIOS", "CPLD"]);
    /// assert!(fw.components_for("unknown").is_err());
    /// ```
    pub fn components_for(&self, platform: &str) -> Result<Vec<String>> {
        let raw = self.components.get(platform).ok_or_else(|| {
            GatherError::Config(format!("no firmware components configured for '{platform}'"))
        })?;
        Ok(raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect())
    }
}

/// Tech-support loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechsupportConfig {
    /// Number of `show techsupport` runs.
    #[serde(default = "default_loop_count")]
    pub loop_count: usize,
    /// Pause between runs, in seconds.
    #[serde(default = "default_loop_delay_secs")]
    pub loop_delay_secs: u64,
    /// Value for `--since='<N> minute ago'`; `None` picks one per run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_minutes: Option<u32>,
}

impl Default for TechsupportConfig {
    fn default() -> Self {
        Self {
            loop_count: default_loop_count(),
            loop_delay_secs: default_loop_delay_secs(),
            since_minutes: None,
        }
    }
}

/// One device under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DutConfig {
    /// Host name or address.
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    /// Run commands on this machine instead of over ssh.
    #[serde(default)]
    pub local: bool,
    /// Per-command timeout.
    #[serde(default = "default_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub firmware: FirmwareConfig,
    #[serde(default)]
    pub techsupport: TechsupportConfig,
}

impl DutConfig {
    /// Minimal configuration for `host` with every other setting defaulted.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
            local: false,
            command_timeout_secs: default_timeout_secs(),
            firmware: FirmwareConfig::default(),
            techsupport: TechsupportConfig::default(),
        }
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](GatherError::Io) if the file cannot be read, or
    /// [`Yaml`](GatherError::Yaml) if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config = serde_yaml::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_yaml::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Builds the runner this configuration describes.
    pub fn runner(&self) -> Box<dyn CommandRunner> {
        if self.local {
            return Box::new(
                LocalRunner::new()
                    .with_host(&self.host)
                    .with_timeout(self.command_timeout()),
            );
        }
        let mut runner = SshRunner::new(&self.host).with_timeout(self.command_timeout());
        if let Some(user) = &self.user {
            runner = runner.with_user(user);
        }
        if let Some(port) = self.port {
            runner = runner.with_port(port);
        }
        if let Some(identity) = &self.identity_file {
            runner = runner.with_identity_file(identity);
        }
        Box::new(runner)
    }
}

/// A set of devices gathered in one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub duts: Vec<DutConfig>,
}

impl Inventory {
    /// Loads an inventory from a YAML file.
    ///
    /// # Errors
    ///
    /// Fails on I/O or YAML errors, and with [`GatherError::Config`] when the
    /// inventory lists the same host twice.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let inventory: Self = serde_yaml::from_reader(BufReader::new(file))?;
        inventory.validate()?;
        Ok(inventory)
    }

    pub fn validate(&self) -> Result<()> {
        for (i, dut) in self.duts.iter().enumerate() {
            if dut.host.trim().is_empty() {
                return Err(GatherError::Config("inventory entry with empty host".into()));
            }
            if self.duts[..i].iter().any(|other| other.host == dut.host) {
                return Err(GatherError::Config(format!(
                    "duplicate host '{}' in inventory",
                    dut.host
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
host: dut-1.lab
user: admin
port: 2222
command_timeout_secs: 120
firmware:
  binaries_path: /srv/firmware
  components:
    x86_64-mlnx_msn2010-r0: BIOS,CPLD
techsupport:
  loop_count: 3
  loop_delay_secs: 5
  since_minutes: 30
"#
    }

    #[test]
    fn test_deserialize_complete() {
        let config: DutConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.host, "dut-1.lab");
        assert_eq!(config.user.as_deref(), Some("admin"));
        assert_eq!(config.port, Some(2222));
        assert!(!config.local);
        assert_eq!(config.command_timeout(), Duration::from_secs(120));
        assert_eq!(
            config.firmware.binaries_path.as_deref(),
            Some(Path::new("/srv/firmware"))
        );
        assert_eq!(config.techsupport.loop_count, 3);
        assert_eq!(config.techsupport.since_minutes, Some(30));
    }

    #[test]
    fn test_deserialize_minimal_uses_defaults() {
        let config: DutConfig = serde_yaml::from_str("host: 10.0.0.5\n").unwrap();
        assert_eq!(config.command_timeout_secs, 60);
        assert_eq!(config.techsupport.loop_count, 10);
        assert_eq!(config.techsupport.loop_delay_secs, 10);
        assert!(config.firmware.components.is_empty());
    }

    #[test]
    fn test_components_for_platform() {
        let config: DutConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(
            config
                .firmware
                .components_for("x86_64-mlnx_msn2010-r0")
                .unwrap(),
            vec!["BIOS", "CPLD"]
        );
        assert!(matches!(
            config.firmware.components_for("x86_64-other"),
            Err(GatherError::Config(_))
        ));
    }

    #[test]
    fn test_runner_host() {
        let config: DutConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.runner().host(), "dut-1.lab");

        let mut local = DutConfig::new("switch");
        local.local = true;
        assert_eq!(local.runner().host(), "switch");
    }

    #[test]
    fn test_load_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dut.yml");

        let original: DutConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        original.save(&path).unwrap();

        let loaded = DutConfig::load(&path).unwrap();
        assert_eq!(loaded.host, original.host);
        assert_eq!(loaded.port, original.port);
        assert_eq!(loaded.firmware.components, original.firmware.components);
        assert_eq!(loaded.techsupport.loop_delay_secs, 5);
    }

    #[test]
    fn test_inventory_rejects_duplicate_hosts() {
        let inventory = Inventory {
            duts: vec![DutConfig::new("a"), DutConfig::new("b"), DutConfig::new("a")],
        };
        assert!(matches!(inventory.validate(), Err(GatherError::Config(msg)) if msg.contains("'a'")));
    }

    #[test]
    fn test_inventory_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.yml");
        std::fs::write(&path, "duts:\n  - host: a\n  - host: b\n    local: true\n").unwrap();
        let inventory = Inventory::load(&path).unwrap();
        assert_eq!(inventory.duts.len(), 2);
        assert!(inventory.duts[1].local);
    }
}
