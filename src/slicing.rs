use tracing::{debug, error, info, warn};

use crate::classifier::{classify, Decision, FlowRule};
use crate::config::SlicingPolicy;
use crate::error::{Error, Result};
use crate::event::SwitchEvent;
use crate::ofp_controller::{Datapath, OF0x01Controller};
use crate::openflow0x01::message::{add_flow, Message};
use crate::openflow0x01::{
    Action, PacketIn, PacketOut, Pattern, Payload, PseudoPort, SwitchFeatures, OFPCML_NO_BUFFER,
};
use crate::packet::Packet;

/// Assigns traffic to slices and installs the matching forwarding rules.
///
/// Every switch gets a table-miss rule sending unmatched packets here when it
/// joins. Each packet-in is then classified against the static policy: the
/// resulting rule is pushed to the switch so later packets of the same kind
/// stay in the data plane, and the triggering packet is sent out with the
/// same actions. Rules are fire-and-forget; nothing is tracked per switch.
pub struct SlicingController {
    policy: SlicingPolicy,
}

impl SlicingController {
    pub fn new(policy: SlicingPolicy) -> SlicingController {
        SlicingController { policy }
    }

    pub fn policy(&self) -> &SlicingPolicy {
        &self.policy
    }

    fn switch_joined(&self, dpid: u64, features: &SwitchFeatures, dp: &mut dyn Datapath) -> Result<()> {
        if !features.supports_output() {
            warn!(dpid, "switch does not advertise output actions");
        }
        let table_miss = FlowRule {
            priority: 0,
            pattern: Pattern::match_all(),
            actions: vec![Action::Output(PseudoPort::Controller(OFPCML_NO_BUFFER))],
        };
        info!(dpid, "installing table-miss rule");
        Self::install_flow(dpid, table_miss, dp)
    }

    fn packet_in(&self, dpid: u64, pkt: &PacketIn, dp: &mut dyn Datapath) -> Result<()> {
        debug!(dpid, in_port = pkt.port, len = pkt.total_len, "packet in");
        match classify(&self.policy, dpid, pkt.port, pkt.input_payload.bytes())? {
            Decision::Forward { route, rule } => {
                info!(
                    dpid,
                    in_port = pkt.port,
                    route = ?route,
                    priority = rule.priority,
                    out = ?rule.actions,
                    "installing rule"
                );
                let actions = rule.actions.clone();
                Self::install_flow(dpid, rule, dp)?;
                Self::send_packet_out(dpid, pkt, actions, dp)
            }
            Decision::Ignore(reason) => {
                debug!(dpid, in_port = pkt.port, reason = ?reason, "no action");
                Ok(())
            }
        }
    }

    /// Push `rule` to the switch. No acknowledgement is awaited.
    fn install_flow(dpid: u64, rule: FlowRule, dp: &mut dyn Datapath) -> Result<()> {
        let flow_mod = add_flow(rule.priority, rule.pattern, rule.actions);
        dp.send_message(0, Message::FlowMod(flow_mod))
            .map_err(|e| transport(dpid, e))
    }

    /// Re-inject the packet behind `pkt`. A packet buffered on the switch is
    /// referenced by its buffer id alone; otherwise the raw frame is attached.
    fn send_packet_out(dpid: u64, pkt: &PacketIn, actions: Vec<Action>, dp: &mut dyn Datapath) -> Result<()> {
        let output_payload = match pkt.input_payload {
            Payload::Buffered(id, _) => Payload::Buffered(id, vec![]),
            Payload::NotBuffered(ref data) => Payload::NotBuffered(data.clone()),
        };
        let pkt_out = PacketOut {
            output_payload,
            port_id: Some(pkt.port),
            apply_actions: actions,
        };
        dp.send_message(0, Message::PacketOut(pkt_out))
            .map_err(|e| transport(dpid, e))
    }
}

fn transport(dpid: u64, e: Error) -> Error {
    match e {
        Error::Io(source) => Error::Transport { dpid, source },
        other => other,
    }
}

/// One-line description of a frame for log records.
fn summarize(frame: &[u8]) -> String {
    match Packet::parse(frame) {
        Ok(pkt) => match pkt.ip() {
            Some(ip) => format!(
                "{} -> {} {} -> {} proto {} ({} bytes)",
                pkt.dl_src,
                pkt.dl_dst,
                ip.src,
                ip.dst,
                ip.proto,
                frame.len()
            ),
            None => format!(
                "{} -> {} type {:#06x} ({} bytes)",
                pkt.dl_src,
                pkt.dl_dst,
                pkt.dl_typ,
                frame.len()
            ),
        },
        Err(_) => format!("undecodable frame ({} bytes)", frame.len()),
    }
}

impl OF0x01Controller for SlicingController {
    fn dispatch(&self, event: SwitchEvent, dp: &mut dyn Datapath) {
        match event {
            SwitchEvent::SwitchJoined { dpid, features } => {
                if let Err(e) = self.switch_joined(dpid, &features, dp) {
                    error!(dpid, error = %e, "failed to install table-miss rule");
                }
            }
            SwitchEvent::PacketIn { dpid, packet } => match self.packet_in(dpid, &packet, dp) {
                Ok(()) => {}
                Err(Error::MissingSlicePort { slice, .. }) => error!(
                    dpid,
                    slice = %slice,
                    in_port = packet.port,
                    packet = %summarize(packet.input_payload.bytes()),
                    "slice has no output port on this switch"
                ),
                Err(e @ Error::Decode(_)) => warn!(
                    dpid,
                    in_port = packet.port,
                    len = packet.input_payload.bytes().len(),
                    error = %e,
                    "dropping undecodable packet"
                ),
                Err(e @ Error::Encode(_)) => warn!(
                    dpid,
                    in_port = packet.port,
                    error = %e,
                    "packet-out not sent"
                ),
                Err(e) => warn!(dpid, in_port = packet.port, error = %e, "packet-in handling failed"),
            },
        }
    }

    fn switch_disconnected(&self, dpid: u64) {
        info!(dpid, "switch disconnected");
    }
}
