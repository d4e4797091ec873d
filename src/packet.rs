//! Decoding of the frames carried inside packet-in messages.
//!
//! Only the headers the slicing classifier looks at are decoded: Ethernet
//! (with an optional 802.1Q tag), IPv4 and the TCP/UDP/ICMP headers above it.
//! Anything else is kept as raw bytes next to its protocol number.

use std::fmt;
use std::io::Cursor;
use std::net::Ipv4Addr;
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, Result};

/// MAC address (6 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    /// Parse a colon- or hyphen-separated MAC address such as "00:00:00:00:00:02".
    fn from_str(s: &str) -> Result<Self> {
        let sep = if s.contains('-') { '-' } else { ':' };
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() != 6 {
            return Err(Error::Config(format!("invalid MAC address {:?}", s)));
        }
        let mut addr = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(Error::Config(format!("invalid MAC address {:?}", s)));
            }
            addr[i] = u8::from_str_radix(part, 16)
                .map_err(|_| Error::Config(format!("invalid hex in MAC address {:?}", s)))?;
        }
        Ok(MacAddr(addr))
    }
}

/// Ethernet types the controller distinguishes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EthTyp {
    Ip = 0x0800,
    Arp = 0x0806,
    Vlan = 0x8100,
    Lldp = 0x88cc,
}

/// IPv4 protocol numbers of the transports the controller distinguishes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProto {
    Icmp = 0x01,
    Tcp = 0x06,
    Udp = 0x11,
}

/// TCP header of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tcp {
    pub src: u16,
    pub dst: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u16,
    pub window: u16,
}

const TCP_HEADER_LEN: usize = 20;

impl Tcp {
    fn parse(buf: &[u8]) -> Result<Tcp> {
        if buf.len() < TCP_HEADER_LEN {
            return Err(Error::truncated("TCP header"));
        }
        let mut bytes = Cursor::new(buf);
        let src = bytes.read_u16::<BigEndian>()?;
        let dst = bytes.read_u16::<BigEndian>()?;
        let seq = bytes.read_u32::<BigEndian>()?;
        let ack = bytes.read_u32::<BigEndian>()?;
        let flags = bytes.read_u16::<BigEndian>()? & 0x01ff;
        let window = bytes.read_u16::<BigEndian>()?;
        Ok(Tcp {
            src,
            dst,
            seq,
            ack,
            flags,
            window,
        })
    }
}

/// UDP header of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Udp {
    pub src: u16,
    pub dst: u16,
    pub length: u16,
}

impl Udp {
    fn size_of() -> usize {
        8
    }

    fn parse(buf: &[u8]) -> Result<Udp> {
        if buf.len() < Self::size_of() {
            return Err(Error::truncated("UDP header"));
        }
        let mut bytes = Cursor::new(buf);
        Ok(Udp {
            src: bytes.read_u16::<BigEndian>()?,
            dst: bytes.read_u16::<BigEndian>()?,
            length: bytes.read_u16::<BigEndian>()?,
        })
    }
}

/// ICMP header of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmp {
    pub typ: u8,
    pub code: u8,
}

impl Icmp {
    fn size_of() -> usize {
        4
    }

    fn parse(buf: &[u8]) -> Result<Icmp> {
        if buf.len() < Self::size_of() {
            return Err(Error::truncated("ICMP header"));
        }
        Ok(Icmp {
            typ: buf[0],
            code: buf[1],
        })
    }
}

/// Represents packets at the transport protocol level, which are encapsulated
/// within the IPv4 payload. At present, we only support TCP, UDP, and ICMP
/// explicitly; otherwise, the raw bytes and IPv4 protocol number are provided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tp {
    Tcp(Tcp),
    Udp(Udp),
    Icmp(Icmp),
    Unparsable(u8, Vec<u8>),
}

/// IPv4 header of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ip {
    pub tos: u8,
    pub ttl: u8,
    pub proto: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub tp: Tp,
}

const IPV4_MIN_HEADER_LEN: usize = 20;

impl Ip {
    fn parse(buf: &[u8]) -> Result<Ip> {
        if buf.len() < IPV4_MIN_HEADER_LEN {
            return Err(Error::truncated("IPv4 header"));
        }
        let mut bytes = Cursor::new(buf);
        let vhl = bytes.read_u8()?;
        if (vhl >> 4) != 4 {
            return Err(Error::Decode(format!("IP version {} is not 4", vhl >> 4)));
        }
        let header_len = (vhl & 0x0f) as usize * 4;
        if header_len < IPV4_MIN_HEADER_LEN || buf.len() < header_len {
            return Err(Error::Decode(format!("bad IPv4 header length {}", header_len)));
        }
        let tos = bytes.read_u8()?;
        bytes.set_position(8);
        let ttl = bytes.read_u8()?;
        let proto = bytes.read_u8()?;
        bytes.set_position(12);
        let src = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        let dst = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        let rest = &buf[header_len..];
        // A known transport whose header does not decode is an error, not an
        // opaque payload: the classifier must not guess a slice for it.
        let tp = match proto {
            t if t == IpProto::Icmp as u8 => Tp::Icmp(Icmp::parse(rest)?),
            t if t == IpProto::Tcp as u8 => Tp::Tcp(Tcp::parse(rest)?),
            t if t == IpProto::Udp as u8 => Tp::Udp(Udp::parse(rest)?),
            _ => Tp::Unparsable(proto, rest.to_vec()),
        };
        Ok(Ip {
            tos,
            ttl,
            proto,
            src,
            dst,
            tp,
        })
    }
}

/// Represents a packet at the network protocol level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nw {
    Ip(Ip),
    Unparsable(u16, Vec<u8>),
}

/// Represents a packet at the ethernet protocol level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    pub dl_vlan: Option<u16>,
    pub dl_typ: u16,
    pub nw: Nw,
}

const ETH_HEADER_LEN: usize = 14;

impl Packet {
    /// Decode an Ethernet frame. Only the Ethernet header is mandatory; an
    /// IPv4 ether-type whose header is broken is reported as a decode error.
    pub fn parse(buf: &[u8]) -> Result<Packet> {
        if buf.len() < ETH_HEADER_LEN {
            return Err(Error::truncated("ethernet header"));
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&buf[0..6]);
        src.copy_from_slice(&buf[6..12]);
        let mut bytes = Cursor::new(buf);
        bytes.set_position(12);
        let typ = bytes.read_u16::<BigEndian>()?;
        let (tag, typ) = if typ == EthTyp::Vlan as u16 {
            if buf.len() < ETH_HEADER_LEN + 4 {
                return Err(Error::truncated("802.1Q tag"));
            }
            let tci = bytes.read_u16::<BigEndian>()?;
            (Some(tci & 0x0fff), bytes.read_u16::<BigEndian>()?)
        } else {
            (None, typ)
        };
        let rest = &buf[bytes.position() as usize..];
        let nw = if typ == EthTyp::Ip as u16 {
            Nw::Ip(Ip::parse(rest)?)
        } else {
            Nw::Unparsable(typ, rest.to_vec())
        };
        Ok(Packet {
            dl_src: MacAddr(src),
            dl_dst: MacAddr(dst),
            dl_vlan: tag,
            dl_typ: typ,
            nw,
        })
    }

    /// Cheap peek at the ether-type, so link-discovery frames can be skipped
    /// before anything else is decoded.
    pub fn peek_eth_typ(buf: &[u8]) -> Option<u16> {
        if buf.len() < ETH_HEADER_LEN {
            return None;
        }
        Some(u16::from_be_bytes([buf[12], buf[13]]))
    }

    /// Destination MAC of a frame, without decoding anything above Ethernet.
    pub fn peek_dl_dst(buf: &[u8]) -> Option<MacAddr> {
        if buf.len() < ETH_HEADER_LEN {
            return None;
        }
        let mut dst = [0u8; 6];
        dst.copy_from_slice(&buf[0..6]);
        Some(MacAddr(dst))
    }

    /// The IPv4 header, when the frame carries one.
    pub fn ip(&self) -> Option<&Ip> {
        match self.nw {
            Nw::Ip(ref ip) => Some(ip),
            Nw::Unparsable(..) => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::frames::*;
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let m: MacAddr = "00:00:00:00:00:02".parse().unwrap();
        assert_eq!(m, MacAddr([0, 0, 0, 0, 0, 2]));
        assert_eq!(m.to_string(), "00:00:00:00:00:02");
        assert_eq!("aa-bb-cc-dd-ee-ff".parse::<MacAddr>().unwrap().to_string(), "aa:bb:cc:dd:ee:ff");
        assert!("00:00:00:00:02".parse::<MacAddr>().is_err());
        assert!("00:00:00:00:00:zz".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_parse_tcp_frame() {
        let frame = ip_frame(
            "00:00:00:00:00:02",
            "00:00:00:00:00:01",
            "10.0.0.1",
            "192.0.0.1",
            IpProto::Tcp as u8,
            &tcp(40000, 80),
        );
        let pkt = Packet::parse(&frame).unwrap();
        assert_eq!(pkt.dl_dst, mac("00:00:00:00:00:02"));
        assert_eq!(pkt.dl_src, mac("00:00:00:00:00:01"));
        assert_eq!(pkt.dl_typ, EthTyp::Ip as u16);
        let ip = pkt.ip().unwrap();
        assert_eq!(ip.dst, Ipv4Addr::new(192, 0, 0, 1));
        match ip.tp {
            Tp::Tcp(ref t) => {
                assert_eq!(t.src, 40000);
                assert_eq!(t.dst, 80);
                assert_eq!(t.flags, 0x002);
            }
            ref other => panic!("expected TCP, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_udp_and_icmp() {
        let udp_frame = ip_frame("00:00:00:00:00:09", "00:00:00:00:00:01", "10.0.0.1", "10.0.0.9", 17, &udp(5000, 9999));
        match Packet::parse(&udp_frame).unwrap().ip().unwrap().tp {
            Tp::Udp(ref u) => assert_eq!(u.dst, 9999),
            ref other => panic!("expected UDP, got {:?}", other),
        }
        let icmp_frame = ip_frame("00:00:00:00:00:09", "00:00:00:00:00:01", "10.0.0.1", "10.0.0.9", 1, &icmp_echo());
        match Packet::parse(&icmp_frame).unwrap().ip().unwrap().tp {
            Tp::Icmp(ref i) => assert_eq!(i.typ, 8),
            ref other => panic!("expected ICMP, got {:?}", other),
        }
    }

    #[test]
    fn test_vlan_tag() {
        let mut payload = vec![0x20, 0x0a];
        payload.extend_from_slice(&(EthTyp::Arp as u16).to_be_bytes());
        payload.extend_from_slice(&[0; 28]);
        let frame = ethernet("ff:ff:ff:ff:ff:ff", "00:00:00:00:00:01", EthTyp::Vlan as u16, &payload);
        let pkt = Packet::parse(&frame).unwrap();
        assert_eq!(pkt.dl_vlan, Some(10));
        assert_eq!(pkt.dl_typ, EthTyp::Arp as u16);
        assert!(pkt.ip().is_none());
    }

    #[test]
    fn test_truncated_frames() {
        assert!(matches!(Packet::parse(&[0; 10]), Err(Error::Decode(_))));
        let short_tcp = ip_frame("00:00:00:00:00:02", "00:00:00:00:00:01", "10.0.0.1", "10.0.0.2", 6, &[0; 8]);
        assert!(matches!(Packet::parse(&short_tcp), Err(Error::Decode(_))));
        let not_v4 = ethernet("00:00:00:00:00:02", "00:00:00:00:00:01", EthTyp::Ip as u16, &[0x60; 40]);
        assert!(matches!(Packet::parse(&not_v4), Err(Error::Decode(_))));
    }

    #[test]
    fn test_other_ip_protocol_kept_raw() {
        let frame = ip_frame("00:00:00:00:00:02", "00:00:00:00:00:01", "10.0.0.1", "10.0.0.2", 47, &[1, 2, 3]);
        let pkt = Packet::parse(&frame).unwrap();
        assert_eq!(pkt.ip().unwrap().tp, Tp::Unparsable(47, vec![1, 2, 3]));
    }

    #[test]
    fn test_peek_lldp() {
        let frame = ethernet("01:80:c2:00:00:0e", "00:00:00:00:00:01", EthTyp::Lldp as u16, &[]);
        assert_eq!(Packet::peek_eth_typ(&frame), Some(0x88cc));
        assert_eq!(Packet::peek_eth_typ(&[0; 4]), None);
    }
}
