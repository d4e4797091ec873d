use crate::openflow0x01::{PacketIn, SwitchFeatures};

/// Switch-originated events the controller reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchEvent {
    /// A switch finished the handshake and reported its features. Raised
    /// once per control session.
    SwitchJoined { dpid: u64, features: SwitchFeatures },
    /// A packet missed the switch's flow table.
    PacketIn { dpid: u64, packet: PacketIn },
}

impl SwitchEvent {
    /// Datapath id of the switch that raised the event.
    pub fn dpid(&self) -> u64 {
        match *self {
            SwitchEvent::SwitchJoined { dpid, .. } | SwitchEvent::PacketIn { dpid, .. } => dpid,
        }
    }
}
