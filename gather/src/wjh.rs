//! What-Just-Happened (WJH) drop reporting.
//!
//! WJH keeps a table of recently dropped packets. Its configuration lives in
//! two more tables: the global settings (which must be in `debug` mode for
//! per-packet entries) and the list of channels. [`WjhContext`] captures the
//! feature state and configuration once per run; drop checks take it by
//! reference.
//!
//! The drops table wraps long values onto indented lines, and its
//! `Drop Group` header is printed over two lines, so it is parsed with the
//! `Group` header rule.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dut_facts_core::{HeaderRule, LookupError, Record, TableParser};

use crate::error::{GatherError, Result};
use crate::features::FeatureFacts;
use crate::runner::CommandRunner;

pub const WJH_FEATURE: &str = "what-just-happened";
pub const SHOW_WJH: &str = "show what-just-happened";
pub const SHOW_WJH_GLOBAL: &str = "show what-just-happened configuration global";
pub const SHOW_WJH_CHANNELS: &str = "show what-just-happened configuration channels";

/// Parser configured for WJH tables.
pub fn wjh_parser() -> TableParser {
    TableParser::new().with_header_rule(HeaderRule::new("Group"))
}

/// Parses the drops table.
pub fn parse_drops(text: &str) -> Result<Vec<Record>> {
    wjh_parser()
        .parse(text)
        .map_err(|e| GatherError::parse(SHOW_WJH, e))
}

/// Returns `true` when the global configuration reports debug mode.
pub fn parse_debug_mode(text: &str) -> Result<bool> {
    let records = wjh_parser()
        .parse(text)
        .map_err(|e| GatherError::parse(SHOW_WJH_GLOBAL, e))?;
    Ok(records.iter().any(|record| record.first() == Some("debug")))
}

/// Parses the channel table.
pub fn parse_channels(text: &str) -> Result<Vec<Record>> {
    wjh_parser()
        .parse(text)
        .map_err(|e| GatherError::parse(SHOW_WJH_CHANNELS, e))
}

/// WJH state for one device, gathered once and shared by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WjhContext {
    /// The `what-just-happened` feature is enabled.
    pub enabled: bool,
    /// Global configuration is in debug mode.
    pub debug_mode: bool,
    /// Configured channels, one record per channel.
    pub channels: Vec<Record>,
}

impl WjhContext {
    /// Reads WJH configuration from the device.
    ///
    /// When the feature is not enabled the configuration commands are not
    /// run and an empty, disabled context is returned.
    pub fn load(runner: &dyn CommandRunner, features: &FeatureFacts) -> Result<Self> {
        if !features.is_enabled(WJH_FEATURE) {
            info!(host = runner.host(), "what-just-happened is not enabled");
            return Ok(Self::default());
        }
        let debug_mode = parse_debug_mode(&runner.run_checked(SHOW_WJH_GLOBAL)?)?;
        let channels = parse_channels(&runner.run_checked(SHOW_WJH_CHANNELS)?)?;
        debug!(
            host = runner.host(),
            debug_mode,
            channels = channels.len(),
            "loaded what-just-happened configuration"
        );
        Ok(Self {
            enabled: true,
            debug_mode,
            channels,
        })
    }

    /// Drop entries are only reported per packet in debug mode.
    pub fn ready(&self) -> bool {
        self.enabled && self.debug_mode
    }

    pub fn channel(&self, name: &str) -> Option<&Record> {
        self.channels
            .iter()
            .find(|record| record.get("Channel") == Some(name))
    }

    fn ensure_ready(&self) -> Result<()> {
        if !self.enabled {
            return Err(GatherError::Unavailable(WJH_FEATURE.to_string()));
        }
        if !self.debug_mode {
            return Err(GatherError::Unavailable(format!(
                "{WJH_FEATURE} debug mode"
            )));
        }
        Ok(())
    }
}

/// Protocol name WJH prints for an IP protocol number.
///
/// Only the protocols the drop checks send are known.
pub fn protocol_name(number: u8) -> Option<&'static str> {
    match number {
        6 => Some("tcp"),
        17 => Some("udp"),
        2 => Some("igmp"),
        4 => Some("ipencap"),
        _ => None,
    }
}

/// Splits a WJH `IP:Port` cell into address and port.
///
/// IPv6 addresses are bracketed when a port follows (`[2001:db8::1]:53`).
/// A bare IPv6 address without brackets has no port.
pub fn split_ip_port(cell: &str) -> (&str, Option<&str>) {
    if let Some(rest) = cell.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((ip, tail)) => (ip, tail.strip_prefix(':').filter(|p| !p.is_empty())),
            None => (rest, None),
        };
    }
    match cell.split_once(':') {
        Some((ip, port)) if !port.contains(':') => (ip, Some(port).filter(|p| !p.is_empty())),
        _ => (cell, None),
    }
}

/// A packet the test sent and expects to see dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedPacket {
    pub src_mac: String,
    pub dst_mac: String,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    /// IP protocol number (IPv4 `proto` or IPv6 next header).
    pub ip_proto: u8,
    /// Source and destination TCP ports, checked when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_ports: Option<(u16, u16)>,
}

impl ExpectedPacket {
    pub fn new(
        src_mac: impl Into<String>,
        dst_mac: impl Into<String>,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        ip_proto: u8,
    ) -> Self {
        Self {
            src_mac: src_mac.into(),
            dst_mac: dst_mac.into(),
            src_ip,
            dst_ip,
            ip_proto,
            tcp_ports: None,
        }
    }

    pub fn with_tcp_ports(mut self, sport: u16, dport: u16) -> Self {
        self.tcp_ports = Some((sport, dport));
        self
    }

    /// Checks one drop record against this packet.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when the record lacks one of the columns the
    /// match needs.
    pub fn matches(&self, record: &Record) -> std::result::Result<bool, LookupError> {
        let dmac = record.field("dMAC")?;
        let smac = record.field("sMAC")?;
        let (src_ip, src_port) = split_ip_port(record.field("Src IP:Port")?);
        let (dst_ip, dst_port) = split_ip_port(record.field("Dst IP:Port")?);
        let proto = record.field("IP Proto")?;

        if !dmac.eq_ignore_ascii_case(&self.dst_mac) || !smac.eq_ignore_ascii_case(&self.src_mac) {
            return Ok(false);
        }
        if !same_ip(src_ip, self.src_ip) || !same_ip(dst_ip, self.dst_ip) {
            return Ok(false);
        }
        if let Some((sport, dport)) = self.tcp_ports {
            if !same_port(src_port, sport) || !same_port(dst_port, dport) {
                return Ok(false);
            }
        }
        Ok(protocol_name(self.ip_proto) == Some(proto))
    }
}

fn same_ip(cell: &str, expected: IpAddr) -> bool {
    cell.parse::<IpAddr>().is_ok_and(|ip| ip == expected)
}

fn same_port(cell: Option<&str>, expected: u16) -> bool {
    cell.and_then(|p| p.parse::<u16>().ok()) == Some(expected)
}

/// Finds the first drop record matching `packet`.
pub fn find_drop<'a>(
    records: &'a [Record],
    packet: &ExpectedPacket,
) -> std::result::Result<Option<&'a Record>, LookupError> {
    for record in records {
        if packet.matches(record)? {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Reads the drops table and reports whether `packet` was recorded.
///
/// # Errors
///
/// Fails with [`GatherError::Unavailable`] unless WJH is enabled and in debug
/// mode, and on command, parse or column lookup failures.
pub fn verify_drop(
    runner: &dyn CommandRunner,
    context: &WjhContext,
    packet: &ExpectedPacket,
) -> Result<bool> {
    context.ensure_ready()?;
    let records = parse_drops(&runner.run_checked(SHOW_WJH)?)?;
    let found = find_drop(&records, packet)?.is_some();
    debug!(host = runner.host(), entries = records.len(), found, "checked drop table");
    Ok(found)
}
