//! Packet classification.
//!
//! Decides, for a frame that missed a switch's flow table, which rule to
//! install and where the frame itself goes. The checks run in a fixed order
//! and the first one that applies wins:
//!
//!  1. link-discovery frames are ignored outright;
//!  2. a switch missing from the MAC table floods, unless it is an end switch;
//!  3. a destination MAC listed for the switch is forwarded on its static port;
//!  4. otherwise the transport picks a slice: UDP, then TCP touching the
//!     autonomous-drive host, then other TCP, then ICMP. Anything else is
//!     dropped.

use std::net::Ipv4Addr;

use crate::config::SlicingPolicy;
use crate::error::{Error, Result};
use crate::openflow0x01::{Action, Pattern, PseudoPort};
use crate::packet::{EthTyp, IpProto, MacAddr, Packet, Tp};
use crate::tables::Slice;

/// A rule to push to the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRule {
    pub priority: u16,
    pub pattern: Pattern,
    pub actions: Vec<Action>,
}

/// How the output port was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    StaticMac,
    Slice(Slice),
    Flood,
}

/// Why a packet produced no rule and no packet-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    LinkDiscovery,
    /// Known switch, unknown destination, and no slice claims the transport.
    Unclassified,
    /// Unknown switch at the network edge.
    EndSwitch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Forward { route: Route, rule: FlowRule },
    Ignore(IgnoreReason),
}

const RULE_PRIORITY: u16 = 1;
const UDP_RULE_PRIORITY: u16 = 2;

/// Classify the frame `frame` that arrived on `in_port` of switch `dpid`.
///
/// Fails with `Error::Decode` when the frame is too broken to classify and
/// with `Error::MissingSlicePort` when the chosen slice has no port on
/// this switch.
pub fn classify(policy: &SlicingPolicy, dpid: u64, in_port: u16, frame: &[u8]) -> Result<Decision> {
    let eth_typ = Packet::peek_eth_typ(frame).ok_or_else(|| Error::truncated("ethernet header"))?;
    if eth_typ == EthTyp::Lldp as u16 {
        return Ok(Decision::Ignore(IgnoreReason::LinkDiscovery));
    }

    if !policy.mac_to_port.knows_switch(dpid) {
        if policy.end_switches.contains(dpid) {
            return Ok(Decision::Ignore(IgnoreReason::EndSwitch));
        }
        return Ok(Decision::Forward {
            route: Route::Flood,
            rule: FlowRule {
                priority: RULE_PRIORITY,
                pattern: Pattern {
                    in_port: Some(in_port),
                    ..Pattern::match_all()
                },
                actions: vec![Action::Output(PseudoPort::Flood)],
            },
        });
    }

    let dl_dst = Packet::peek_dl_dst(frame).ok_or_else(|| Error::truncated("ethernet header"))?;
    if let Some(port) = policy.mac_to_port.lookup(dpid, &dl_dst) {
        return Ok(Decision::Forward {
            route: Route::StaticMac,
            rule: FlowRule {
                priority: RULE_PRIORITY,
                pattern: Pattern {
                    dl_dst: Some(dl_dst),
                    ..Pattern::match_all()
                },
                actions: vec![Action::Output(PseudoPort::PhysicalPort(port))],
            },
        });
    }

    let pkt = Packet::parse(frame)?;
    let ip = match pkt.ip() {
        Some(ip) => ip,
        None => return Ok(Decision::Ignore(IgnoreReason::Unclassified)),
    };
    let (slice, priority, pattern) = match ip.tp {
        Tp::Udp(_) => (
            Slice::Control,
            UDP_RULE_PRIORITY,
            Pattern {
                tp_dst: Some(policy.slice_udp_port),
                ..ip_pattern(in_port, pkt.dl_dst, None, IpProto::Udp)
            },
        ),
        Tp::Tcp(_) if touches(policy.autonomous_host, ip.src, ip.dst) => (
            Slice::AutonomousDrive,
            RULE_PRIORITY,
            ip_pattern(in_port, pkt.dl_dst, Some(pkt.dl_src), IpProto::Tcp),
        ),
        Tp::Tcp(_) => (
            Slice::Tcp,
            RULE_PRIORITY,
            ip_pattern(in_port, pkt.dl_dst, Some(pkt.dl_src), IpProto::Tcp),
        ),
        Tp::Icmp(_) => (
            Slice::Control,
            RULE_PRIORITY,
            ip_pattern(in_port, pkt.dl_dst, Some(pkt.dl_src), IpProto::Icmp),
        ),
        Tp::Unparsable(..) => return Ok(Decision::Ignore(IgnoreReason::Unclassified)),
    };
    let port = policy.slice_ports.port(dpid, slice)?;
    Ok(Decision::Forward {
        route: Route::Slice(slice),
        rule: FlowRule {
            priority,
            pattern,
            actions: vec![Action::Output(PseudoPort::PhysicalPort(port))],
        },
    })
}

fn touches(host: Ipv4Addr, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
    src == host || dst == host
}

fn ip_pattern(in_port: u16, dl_dst: MacAddr, dl_src: Option<MacAddr>, proto: IpProto) -> Pattern {
    Pattern {
        in_port: Some(in_port),
        dl_dst: Some(dl_dst),
        dl_src,
        dl_typ: Some(EthTyp::Ip as u16),
        nw_proto: Some(proto as u8),
        ..Pattern::match_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::packet::frames::*;

    const H1: &str = "00:00:00:00:00:01";
    const UNKNOWN: &str = "00:00:00:00:00:42";

    fn policy() -> SlicingPolicy {
        config::from_toml_str(include_str!("../slicing.toml")).unwrap().policy
    }

    fn forward(decision: Decision) -> (Route, FlowRule) {
        match decision {
            Decision::Forward { route, rule } => (route, rule),
            other => panic!("expected a forward decision, got {:?}", other),
        }
    }

    fn out_port(rule: &FlowRule) -> PseudoPort {
        match rule.actions.as_slice() {
            [Action::Output(pp)] => *pp,
            other => panic!("expected a single output action, got {:?}", other),
        }
    }

    #[test]
    fn test_known_mac_uses_static_port() {
        let frame = ip_frame("00:00:00:00:00:02", H1, "10.0.0.1", "10.0.0.2", 6, &tcp(1, 2));
        let (route, rule) = forward(classify(&policy(), 1, 1, &frame).unwrap());
        assert_eq!(route, Route::StaticMac);
        assert_eq!(rule.priority, 1);
        assert_eq!(out_port(&rule), PseudoPort::PhysicalPort(2));
        assert_eq!(
            rule.pattern,
            Pattern {
                dl_dst: Some(mac("00:00:00:00:00:02")),
                ..Pattern::match_all()
            }
        );
    }

    #[test]
    fn test_known_mac_needs_only_ethernet() {
        // ARP or a broken IP header still forwards when the MAC is known.
        let frame = ethernet("00:00:00:00:00:07", H1, EthTyp::Ip as u16, &[0x45, 0, 0]);
        let (route, rule) = forward(classify(&policy(), 4, 2, &frame).unwrap());
        assert_eq!(route, Route::StaticMac);
        assert_eq!(out_port(&rule), PseudoPort::PhysicalPort(4));
    }

    #[test]
    fn test_lldp_always_ignored() {
        let policy = policy();
        let frame = ethernet("01:80:c2:00:00:0e", H1, EthTyp::Lldp as u16, &[0; 32]);
        for dpid in [1, 2, 3, 4, 5, 99] {
            assert_eq!(
                classify(&policy, dpid, 1, &frame).unwrap(),
                Decision::Ignore(IgnoreReason::LinkDiscovery)
            );
        }
        // even when the destination is a listed MAC
        let frame = ethernet("00:00:00:00:00:02", H1, EthTyp::Lldp as u16, &[]);
        assert_eq!(
            classify(&policy, 1, 1, &frame).unwrap(),
            Decision::Ignore(IgnoreReason::LinkDiscovery)
        );
    }

    #[test]
    fn test_udp_goes_to_control_slice() {
        let frame = ip_frame(UNKNOWN, H1, "10.0.0.1", "10.0.0.9", 17, &udp(40000, 9999));
        let (route, rule) = forward(classify(&policy(), 2, 1, &frame).unwrap());
        assert_eq!(route, Route::Slice(Slice::Control));
        assert_eq!(rule.priority, 2);
        assert_eq!(out_port(&rule), PseudoPort::PhysicalPort(2));
        assert_eq!(
            rule.pattern,
            Pattern {
                in_port: Some(1),
                dl_dst: Some(mac(UNKNOWN)),
                dl_typ: Some(0x0800),
                nw_proto: Some(17),
                tp_dst: Some(9999),
                ..Pattern::match_all()
            }
        );
    }

    #[test]
    fn test_udp_rule_uses_configured_port() {
        let frame = ip_frame(UNKNOWN, H1, "10.0.0.1", "10.0.0.9", 17, &udp(40000, 53));
        let (route, rule) = forward(classify(&policy(), 1, 3, &frame).unwrap());
        assert_eq!(route, Route::Slice(Slice::Control));
        assert_eq!(rule.pattern.tp_dst, Some(9999));
        assert_eq!(out_port(&rule), PseudoPort::PhysicalPort(4));
    }

    #[test]
    fn test_tcp_to_autonomous_host() {
        let policy = policy();
        for (src, dst) in [("192.0.0.1", "10.0.0.5"), ("10.0.0.5", "192.0.0.1")] {
            let frame = ip_frame(UNKNOWN, H1, src, dst, 6, &tcp(5000, 80));
            let (route, rule) = forward(classify(&policy, 1, 2, &frame).unwrap());
            assert_eq!(route, Route::Slice(Slice::AutonomousDrive));
            assert_eq!(rule.priority, 1);
            assert_eq!(out_port(&rule), PseudoPort::PhysicalPort(5));
            assert_eq!(
                rule.pattern,
                Pattern {
                    in_port: Some(2),
                    dl_dst: Some(mac(UNKNOWN)),
                    dl_src: Some(mac(H1)),
                    dl_typ: Some(0x0800),
                    nw_proto: Some(6),
                    ..Pattern::match_all()
                }
            );
        }
    }

    #[test]
    fn test_other_tcp_on_switch_two() {
        let frame = ip_frame(UNKNOWN, H1, "10.0.0.1", "10.0.0.3", 6, &tcp(5000, 22));
        let (route, rule) = forward(classify(&policy(), 2, 1, &frame).unwrap());
        assert_eq!(route, Route::Slice(Slice::Tcp));
        assert_eq!(rule.priority, 1);
        assert_eq!(out_port(&rule), PseudoPort::PhysicalPort(3));
    }

    #[test]
    fn test_icmp_goes_to_control_slice() {
        let frame = ip_frame(UNKNOWN, H1, "10.0.0.1", "10.0.0.3", 1, &icmp_echo());
        let (route, rule) = forward(classify(&policy(), 4, 1, &frame).unwrap());
        assert_eq!(route, Route::Slice(Slice::Control));
        assert_eq!(rule.priority, 1);
        assert_eq!(out_port(&rule), PseudoPort::PhysicalPort(2));
        assert_eq!(rule.pattern.nw_proto, Some(1));
        assert_eq!(rule.pattern.dl_src, Some(mac(H1)));
        assert_eq!(rule.pattern.tp_dst, None);
    }

    #[test]
    fn test_unclassified_traffic_is_dropped() {
        let policy = policy();
        let gre = ip_frame(UNKNOWN, H1, "10.0.0.1", "10.0.0.3", 47, &[0; 8]);
        assert_eq!(
            classify(&policy, 1, 1, &gre).unwrap(),
            Decision::Ignore(IgnoreReason::Unclassified)
        );
        let arp = ethernet("ff:ff:ff:ff:ff:ff", H1, EthTyp::Arp as u16, &[0; 28]);
        assert_eq!(
            classify(&policy, 1, 1, &arp).unwrap(),
            Decision::Ignore(IgnoreReason::Unclassified)
        );
    }

    #[test]
    fn test_unknown_switch_floods() {
        let frame = ip_frame(UNKNOWN, H1, "10.0.0.1", "10.0.0.3", 6, &tcp(1, 2));
        let (route, rule) = forward(classify(&policy(), 3, 2, &frame).unwrap());
        assert_eq!(route, Route::Flood);
        assert_eq!(rule.priority, 1);
        assert_eq!(rule.actions, vec![Action::Output(PseudoPort::Flood)]);
        assert_eq!(
            rule.pattern,
            Pattern {
                in_port: Some(2),
                ..Pattern::match_all()
            }
        );
    }

    #[test]
    fn test_unknown_end_switch_is_silent() {
        let mut policy = policy();
        policy.end_switches = vec![3].into_iter().collect();
        let frame = ip_frame(UNKNOWN, H1, "10.0.0.1", "10.0.0.3", 6, &tcp(1, 2));
        assert_eq!(
            classify(&policy, 3, 2, &frame).unwrap(),
            Decision::Ignore(IgnoreReason::EndSwitch)
        );
    }

    #[test]
    fn test_missing_slice_port_is_configuration_error() {
        let policy = policy();
        // switch 2 has no autonomous-drive port
        let frame = ip_frame(UNKNOWN, H1, "192.0.0.1", "10.0.0.3", 6, &tcp(1, 2));
        match classify(&policy, 2, 1, &frame) {
            Err(Error::MissingSlicePort { dpid: 2, slice: Slice::AutonomousDrive }) => {}
            other => panic!("expected missing slice port, got {:?}", other),
        }
        // switch 5 has no slice ports at all
        let frame = ip_frame(UNKNOWN, H1, "10.0.0.1", "10.0.0.3", 1, &icmp_echo());
        assert!(matches!(
            classify(&policy, 5, 1, &frame),
            Err(Error::MissingSlicePort { dpid: 5, .. })
        ));
    }

    #[test]
    fn test_broken_frames_are_decode_errors() {
        let policy = policy();
        assert!(matches!(classify(&policy, 1, 1, &[0; 6]), Err(Error::Decode(_))));
        let short_udp = ip_frame(UNKNOWN, H1, "10.0.0.1", "10.0.0.3", 17, &[0; 3]);
        assert!(matches!(classify(&policy, 1, 1, &short_udp), Err(Error::Decode(_))));
    }
}
