//! Static port-resolution tables.
//!
//! Built once from configuration and only ever read afterwards, so they are
//! shared between switch connections without locking.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::packet::MacAddr;

/// Traffic isolation class. Each slice has a dedicated output port per switch.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slice {
    /// ICMP and UDP traffic.
    Control = 1,
    /// Generic TCP traffic.
    Tcp = 2,
    /// TCP traffic to or from the autonomous-drive host.
    AutonomousDrive = 3,
}

impl Slice {
    pub const ALL: [Slice; 3] = [Slice::Control, Slice::Tcp, Slice::AutonomousDrive];

    pub fn of_int(id: u8) -> Option<Slice> {
        match id {
            1 => Some(Slice::Control),
            2 => Some(Slice::Tcp),
            3 => Some(Slice::AutonomousDrive),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Output port per (switch, destination MAC).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacPortTable {
    switches: HashMap<u64, HashMap<MacAddr, u16>>,
}

impl MacPortTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dpid: u64, mac: MacAddr, port: u16) {
        self.switches.entry(dpid).or_default().insert(mac, port);
    }

    /// Registers a switch with no MAC entries. A known switch takes the
    /// slicing path even when none of its destinations are listed.
    pub fn add_switch(&mut self, dpid: u64) {
        self.switches.entry(dpid).or_default();
    }

    pub fn knows_switch(&self, dpid: u64) -> bool {
        self.switches.contains_key(&dpid)
    }

    pub fn lookup(&self, dpid: u64, mac: &MacAddr) -> Option<u16> {
        self.switches.get(&dpid).and_then(|t| t.get(mac)).copied()
    }

    pub fn switches(&self) -> impl Iterator<Item = u64> + '_ {
        self.switches.keys().copied()
    }
}

/// Output port per (switch, slice).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlicePortTable {
    switches: HashMap<u64, HashMap<Slice, u16>>,
}

impl SlicePortTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dpid: u64, slice: Slice, port: u16) {
        self.switches.entry(dpid).or_default().insert(slice, port);
    }

    pub fn get(&self, dpid: u64, slice: Slice) -> Option<u16> {
        self.switches.get(&dpid).and_then(|t| t.get(&slice)).copied()
    }

    /// Resolve the output port of `slice` on `dpid`. A missing entry is a
    /// configuration error: guessing a port would leak traffic across slices.
    pub fn port(&self, dpid: u64, slice: Slice) -> Result<u16> {
        self.get(dpid, slice)
            .ok_or(Error::MissingSlicePort { dpid, slice })
    }
}

/// Switches at the network edge, which never flood.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndSwitchSet(HashSet<u64>);

impl EndSwitchSet {
    pub fn contains(&self, dpid: u64) -> bool {
        self.0.contains(&dpid)
    }
}

impl FromIterator<u64> for EndSwitchSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        EndSwitchSet(iter.into_iter().collect())
    }
}
