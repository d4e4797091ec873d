//! Configuration management
//!
//! The controller reads one TOML file at startup. Table keys arrive as
//! strings and are converted into typed tables here, so a malformed entry
//! fails the load instead of surfacing later as a misrouted packet.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::Deserialize;
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::logging::LogConfig;
use crate::packet::MacAddr;
use crate::tables::{EndSwitchSet, MacPortTable, Slice, SlicePortTable};

/// Default destination UDP port matched by slice-1 rules.
pub const DEFAULT_SLICE_UDP_PORT: u16 = 9999;

/// Highest physical port number OpenFlow 1.0 allows.
const MAX_PHYSICAL_PORT: u16 = 0xff00;

/// On-disk layout of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_listen")]
    listen: SocketAddr,
    autonomous_host: Ipv4Addr,
    #[serde(default = "default_slice_udp_port")]
    slice_udp_port: u16,
    #[serde(default)]
    end_switches: Vec<u64>,
    #[serde(default)]
    log: LogConfig,
    #[serde(default)]
    mac_to_port: HashMap<String, HashMap<String, u16>>,
    #[serde(default)]
    slice_ports: HashMap<String, HashMap<String, u16>>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 6633))
}

fn default_slice_udp_port() -> u16 {
    DEFAULT_SLICE_UDP_PORT
}

/// Everything the classifier consults. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicingPolicy {
    pub mac_to_port: MacPortTable,
    pub slice_ports: SlicePortTable,
    pub end_switches: EndSwitchSet,
    /// TCP to or from this address rides the autonomous-drive slice.
    pub autonomous_host: Ipv4Addr,
    /// Destination UDP port matched by slice-1 rules.
    pub slice_udp_port: u16,
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub log: LogConfig,
    pub policy: SlicingPolicy,
}

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    from_toml_str(&content)
}

/// Parse configuration from TOML text.
pub fn from_toml_str(content: &str) -> Result<Config> {
    let raw: RawConfig = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

    let mut mac_to_port = MacPortTable::new();
    for (dpid, macs) in &raw.mac_to_port {
        let dpid = parse_dpid(dpid, "mac_to_port")?;
        mac_to_port.add_switch(dpid);
        for (mac, port) in macs {
            let mac: MacAddr = mac.parse()?;
            mac_to_port.insert(dpid, mac, check_port(*port, "mac_to_port", dpid)?);
        }
    }

    let mut slice_ports = SlicePortTable::new();
    for (dpid, slices) in &raw.slice_ports {
        let dpid = parse_dpid(dpid, "slice_ports")?;
        for (slice, port) in slices {
            let slice = slice
                .parse::<u8>()
                .ok()
                .and_then(Slice::of_int)
                .ok_or_else(|| {
                    Error::Config(format!("slice_ports.{}: unknown slice id {:?}", dpid, slice))
                })?;
            slice_ports.insert(dpid, slice, check_port(*port, "slice_ports", dpid)?);
        }
    }

    Ok(Config {
        listen: raw.listen,
        log: raw.log,
        policy: SlicingPolicy {
            mac_to_port,
            slice_ports,
            end_switches: raw.end_switches.into_iter().collect(),
            autonomous_host: raw.autonomous_host,
            slice_udp_port: raw.slice_udp_port,
        },
    })
}

fn parse_dpid(key: &str, table: &str) -> Result<u64> {
    let parsed = match key.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => key.parse::<u64>(),
    };
    parsed.map_err(|_| Error::Config(format!("{}: invalid datapath id {:?}", table, key)))
}

fn check_port(port: u16, table: &str, dpid: u64) -> Result<u16> {
    if port == 0 || port > MAX_PHYSICAL_PORT {
        return Err(Error::Config(format!(
            "{}.{}: {} is not a physical port number",
            table, dpid, port
        )));
    }
    Ok(port)
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn log_diagnostics(&self) {
        for warning in &self.warnings {
            warn!("{}", warning);
        }
        for e in &self.errors {
            error!("{}", e);
        }
    }
}

/// Cross-table checks. Gaps are warnings: a packet that needs a missing
/// slice port is rejected at runtime with a configuration error.
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::default();
    let policy = &config.policy;

    let mut known: Vec<u64> = policy.mac_to_port.switches().collect();
    known.sort_unstable();
    for dpid in known {
        let missing: Vec<String> = Slice::ALL
            .iter()
            .filter(|s| policy.slice_ports.get(dpid, **s).is_none())
            .map(|s| s.to_string())
            .collect();
        if missing.len() == Slice::ALL.len() {
            result.warn(format!(
                "switch {}: listed in mac_to_port but has no slice_ports; unknown destinations will be rejected",
                dpid
            ));
        } else if !missing.is_empty() {
            result.warn(format!(
                "switch {}: no slice_ports entry for slice(s) {}",
                dpid,
                missing.join(", ")
            ));
        }
        if policy.end_switches.contains(dpid) {
            result.warn(format!(
                "switch {}: end_switches entry has no effect on a switch listed in mac_to_port",
                dpid
            ));
        }
    }

    if policy.slice_udp_port == 0 {
        result.error("slice_udp_port must not be 0");
    }

    result
}
