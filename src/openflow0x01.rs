use std::io::{self, BufRead, Cursor, Read};
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{set_bit, test_bit};
use crate::error::{Error, Result};
use crate::packet::MacAddr;

/// OpenFlow protocol version implemented by this module.
pub const OFP_VERSION: u8 = 0x01;

/// OpenFlow 1.0 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Vendor,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    PortMod,
    StatsReq,
    StatsResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
}

impl MsgCode {
    const ALL: [MsgCode; 22] = [
        MsgCode::Hello,
        MsgCode::Error,
        MsgCode::EchoReq,
        MsgCode::EchoResp,
        MsgCode::Vendor,
        MsgCode::FeaturesReq,
        MsgCode::FeaturesResp,
        MsgCode::GetConfigReq,
        MsgCode::GetConfigResp,
        MsgCode::SetConfig,
        MsgCode::PacketIn,
        MsgCode::FlowRemoved,
        MsgCode::PortStatus,
        MsgCode::PacketOut,
        MsgCode::FlowMod,
        MsgCode::PortMod,
        MsgCode::StatsReq,
        MsgCode::StatsResp,
        MsgCode::BarrierReq,
        MsgCode::BarrierResp,
        MsgCode::QueueGetConfigReq,
        MsgCode::QueueGetConfigResp,
    ];

    pub fn of_int(code: u8) -> Option<MsgCode> {
        Self::ALL.get(code as usize).copied()
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message body.
    fn size_of(msg: &Self) -> usize;
    /// Parse a body buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self>;
    /// Marshal a message body into a `u8` buffer.
    fn marshal(msg: Self, bytes: &mut Vec<u8>) -> io::Result<()>;
}

// ofp_flow_wildcards bit positions.
const OFPFW_IN_PORT: u32 = 0;
const OFPFW_DL_VLAN: u32 = 1;
const OFPFW_DL_SRC: u32 = 2;
const OFPFW_DL_DST: u32 = 3;
const OFPFW_DL_TYPE: u32 = 4;
const OFPFW_NW_PROTO: u32 = 5;
const OFPFW_TP_SRC: u32 = 6;
const OFPFW_TP_DST: u32 = 7;
const OFPFW_NW_SRC_SHIFT: u32 = 8;
const OFPFW_NW_DST_SHIFT: u32 = 14;
const OFPFW_DL_VLAN_PCP: u32 = 20;
const OFPFW_NW_TOS: u32 = 21;
/// Mask value meaning "ignore every address bit".
const OFPFW_NW_ALL: u32 = 32;

/// Wire size of `ofp_match`.
const OFP_MATCH_LEN: usize = 40;

/// Fields to match against flows. `None` wildcards the field.
///
/// VLAN, VLAN priority and IP ToS are always wildcarded; the slicing policy
/// never keys on them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pattern {
    pub in_port: Option<u16>,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub dl_typ: Option<u16>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl Pattern {
    /// A pattern with every field wildcarded.
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// Whether every field is wildcarded.
    pub fn is_match_all(&self) -> bool {
        *self == Pattern::match_all()
    }

    fn wildcards(&self) -> u32 {
        let mut w = 0;
        w = set_bit(OFPFW_IN_PORT, w, self.in_port.is_none());
        w = set_bit(OFPFW_DL_VLAN, w, true);
        w = set_bit(OFPFW_DL_SRC, w, self.dl_src.is_none());
        w = set_bit(OFPFW_DL_DST, w, self.dl_dst.is_none());
        w = set_bit(OFPFW_DL_TYPE, w, self.dl_typ.is_none());
        w = set_bit(OFPFW_NW_PROTO, w, self.nw_proto.is_none());
        w = set_bit(OFPFW_TP_SRC, w, self.tp_src.is_none());
        w = set_bit(OFPFW_TP_DST, w, self.tp_dst.is_none());
        if self.nw_src.is_none() {
            w |= OFPFW_NW_ALL << OFPFW_NW_SRC_SHIFT;
        }
        if self.nw_dst.is_none() {
            w |= OFPFW_NW_ALL << OFPFW_NW_DST_SHIFT;
        }
        w = set_bit(OFPFW_DL_VLAN_PCP, w, true);
        set_bit(OFPFW_NW_TOS, w, true)
    }

    fn marshal(p: &Pattern, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(p.wildcards())?;
        bytes.write_u16::<BigEndian>(p.in_port.unwrap_or(0))?;
        bytes.extend_from_slice(&p.dl_src.unwrap_or_default().0);
        bytes.extend_from_slice(&p.dl_dst.unwrap_or_default().0);
        bytes.write_u16::<BigEndian>(0)?; // dl_vlan
        bytes.write_u8(0)?; // dl_vlan_pcp
        bytes.write_u8(0)?; // pad
        bytes.write_u16::<BigEndian>(p.dl_typ.unwrap_or(0))?;
        bytes.write_u8(0)?; // nw_tos
        bytes.write_u8(p.nw_proto.unwrap_or(0))?;
        bytes.write_u16::<BigEndian>(0)?; // pad
        bytes.write_u32::<BigEndian>(p.nw_src.map(u32::from).unwrap_or(0))?;
        bytes.write_u32::<BigEndian>(p.nw_dst.map(u32::from).unwrap_or(0))?;
        bytes.write_u16::<BigEndian>(p.tp_src.unwrap_or(0))?;
        bytes.write_u16::<BigEndian>(p.tp_dst.unwrap_or(0))
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Pattern> {
        let w = bytes.read_u32::<BigEndian>()?;
        let in_port = bytes.read_u16::<BigEndian>()?;
        let mut dl_src = [0u8; 6];
        bytes.read_exact(&mut dl_src)?;
        let mut dl_dst = [0u8; 6];
        bytes.read_exact(&mut dl_dst)?;
        bytes.consume(4); // dl_vlan, dl_vlan_pcp, pad
        let dl_typ = bytes.read_u16::<BigEndian>()?;
        bytes.consume(1); // nw_tos
        let nw_proto = bytes.read_u8()?;
        bytes.consume(2);
        let nw_src = bytes.read_u32::<BigEndian>()?;
        let nw_dst = bytes.read_u32::<BigEndian>()?;
        let tp_src = bytes.read_u16::<BigEndian>()?;
        let tp_dst = bytes.read_u16::<BigEndian>()?;
        let unless = |bit: u32| !test_bit(bit, w);
        Ok(Pattern {
            in_port: Some(in_port).filter(|_| unless(OFPFW_IN_PORT)),
            dl_src: Some(MacAddr(dl_src)).filter(|_| unless(OFPFW_DL_SRC)),
            dl_dst: Some(MacAddr(dl_dst)).filter(|_| unless(OFPFW_DL_DST)),
            dl_typ: Some(dl_typ).filter(|_| unless(OFPFW_DL_TYPE)),
            nw_proto: Some(nw_proto).filter(|_| unless(OFPFW_NW_PROTO)),
            nw_src: Self::parse_nw(w >> OFPFW_NW_SRC_SHIFT, nw_src)?,
            nw_dst: Self::parse_nw(w >> OFPFW_NW_DST_SHIFT, nw_dst)?,
            tp_src: Some(tp_src).filter(|_| unless(OFPFW_TP_SRC)),
            tp_dst: Some(tp_dst).filter(|_| unless(OFPFW_TP_DST)),
        })
    }

    fn parse_nw(mask: u32, addr: u32) -> Result<Option<Ipv4Addr>> {
        match mask & 0x3f {
            0 => Ok(Some(Ipv4Addr::from(addr))),
            m if m >= OFPFW_NW_ALL => Ok(None),
            m => Err(Error::Decode(format!("unsupported IPv4 prefix wildcard /{}", 32 - m))),
        }
    }
}

/// Port behavior.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u16),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    /// Send to the controller, carrying at most this many bytes of the packet.
    Controller(u16),
    Local,
}

#[repr(u16)]
enum OfpPort {
    Max = 0xff00,
    InPort = 0xfff8,
    Table = 0xfff9,
    Normal = 0xfffa,
    Flood = 0xfffb,
    All = 0xfffc,
    Controller = 0xfffd,
    Local = 0xfffe,
    None = 0xffff,
}

/// `max_len` asking the switch to send the full packet rather than buffer it.
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

impl PseudoPort {
    fn of_int(p: u16) -> Result<Option<PseudoPort>> {
        if (OfpPort::None as u16) == p {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    fn make(p: u16, len: u16) -> Result<PseudoPort> {
        let port = match p {
            p if p == (OfpPort::InPort as u16) => PseudoPort::InPort,
            p if p == (OfpPort::Table as u16) => PseudoPort::Table,
            p if p == (OfpPort::Normal as u16) => PseudoPort::Normal,
            p if p == (OfpPort::Flood as u16) => PseudoPort::Flood,
            p if p == (OfpPort::All as u16) => PseudoPort::AllPorts,
            p if p == (OfpPort::Controller as u16) => PseudoPort::Controller(len),
            p if p == (OfpPort::Local as u16) => PseudoPort::Local,
            p if p <= (OfpPort::Max as u16) => PseudoPort::PhysicalPort(p),
            p => return Err(Error::Decode(format!("unsupported port number {:#x}", p))),
        };
        Ok(port)
    }

    fn to_int(pp: PseudoPort) -> u16 {
        match pp {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::InPort as u16,
            PseudoPort::Table => OfpPort::Table as u16,
            PseudoPort::Normal => OfpPort::Normal as u16,
            PseudoPort::Flood => OfpPort::Flood as u16,
            PseudoPort::AllPorts => OfpPort::All as u16,
            PseudoPort::Controller(_) => OfpPort::Controller as u16,
            PseudoPort::Local => OfpPort::Local as u16,
        }
    }

    fn marshal_opt(pp: Option<PseudoPort>, bytes: &mut Vec<u8>) -> io::Result<()> {
        let p = pp.map(PseudoPort::to_int).unwrap_or(OfpPort::None as u16);
        bytes.write_u16::<BigEndian>(p)
    }
}

/// Actions associated with flows and packets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
}

#[repr(u16)]
enum OfpActionType {
    Output,
}

/// Wire size of `ofp_action_output`.
const OFP_ACTION_OUTPUT_LEN: usize = 8;

impl Action {
    fn type_code(a: &Action) -> OfpActionType {
        match *a {
            Action::Output(_) => OfpActionType::Output,
        }
    }

    fn size_of(a: &Action) -> usize {
        match *a {
            Action::Output(_) => OFP_ACTION_OUTPUT_LEN,
        }
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Action> {
        let action_code = bytes.read_u16::<BigEndian>()?;
        let len = bytes.read_u16::<BigEndian>()?;
        if action_code != OfpActionType::Output as u16 {
            return Err(Error::Decode(format!("unsupported action type {}", action_code)));
        }
        if len as usize != OFP_ACTION_OUTPUT_LEN {
            return Err(Error::Decode(format!("bad output action length {}", len)));
        }
        let port_code = bytes.read_u16::<BigEndian>()?;
        let max_len = bytes.read_u16::<BigEndian>()?;
        Ok(Action::Output(PseudoPort::make(port_code, max_len)?))
    }

    /// Parse `len` bytes worth of actions.
    fn parse_sequence(bytes: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<Action>> {
        let end = bytes.position() as usize + len;
        if end > bytes.get_ref().len() {
            return Err(Error::truncated("action list"));
        }
        let mut actions = vec![];
        while (bytes.position() as usize) < end {
            actions.push(Action::parse(bytes)?);
        }
        Ok(actions)
    }

    fn move_controller_last(acts: Vec<Action>) -> Vec<Action> {
        let (mut to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts
            .into_iter()
            .partition(|act| matches!(*act, Action::Output(PseudoPort::Controller(_))));
        not_to_ctrl.append(&mut to_ctrl);
        not_to_ctrl
    }

    fn marshal(act: Action, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(Action::type_code(&act) as u16)?;
        bytes.write_u16::<BigEndian>(Action::size_of(&act) as u16)?;
        match act {
            Action::Output(pp) => {
                bytes.write_u16::<BigEndian>(PseudoPort::to_int(pp))?;
                bytes.write_u16::<BigEndian>(match pp {
                    PseudoPort::Controller(w) => w,
                    _ => 0,
                })
            }
        }
    }
}

/// How long before a flow entry expires.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub stp: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub arp_match_ip: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        Capabilities {
            flow_stats: test_bit(0, d),
            table_stats: test_bit(1, d),
            port_stats: test_bit(2, d),
            stp: test_bit(3, d),
            ip_reasm: test_bit(5, d),
            queue_stats: test_bit(6, d),
            arp_match_ip: test_bit(7, d),
        }
    }

    fn to_int(c: &Capabilities) -> u32 {
        let mut d = 0;
        d = set_bit(0, d, c.flow_stats);
        d = set_bit(1, d, c.table_stats);
        d = set_bit(2, d, c.port_stats);
        d = set_bit(3, d, c.stp);
        d = set_bit(5, d, c.ip_reasm);
        d = set_bit(6, d, c.queue_stats);
        set_bit(7, d, c.arp_match_ip)
    }
}

/// Description of a physical port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDesc {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub name: String,
    /// Port administratively down (`OFPPC_PORT_DOWN`).
    pub down: bool,
    /// No physical link present (`OFPPS_LINK_DOWN`).
    pub link_down: bool,
}

/// Wire size of `ofp_phy_port`.
const OFP_PHY_PORT_LEN: usize = 48;

impl PortDesc {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PortDesc> {
        let port_no = bytes.read_u16::<BigEndian>()?;
        let mut hw_addr = [0u8; 6];
        bytes.read_exact(&mut hw_addr)?;
        let mut name = [0u8; 16];
        bytes.read_exact(&mut name)?;
        let name_len = name.iter().position(|b| *b == 0).unwrap_or(name.len());
        let config = bytes.read_u32::<BigEndian>()?;
        let state = bytes.read_u32::<BigEndian>()?;
        // curr, advertised, supported, peer
        bytes.consume(16);
        Ok(PortDesc {
            port_no,
            hw_addr: MacAddr(hw_addr),
            name: String::from_utf8_lossy(&name[..name_len]).into_owned(),
            down: test_bit(0, config),
            link_down: test_bit(0, state),
        })
    }

    fn marshal(pd: &PortDesc, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(pd.port_no)?;
        bytes.extend_from_slice(&pd.hw_addr.0);
        let mut name = [0u8; 16];
        let raw = pd.name.as_bytes();
        let n = raw.len().min(15);
        name[..n].copy_from_slice(&raw[..n]);
        bytes.extend_from_slice(&name);
        bytes.write_u32::<BigEndian>(set_bit(0, 0, pd.down))?;
        bytes.write_u32::<BigEndian>(set_bit(0, 0, pd.link_down))?;
        bytes.extend_from_slice(&[0; 16]);
        Ok(())
    }
}

/// Switch features, the capability descriptor a switch reports at handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub supported_capabilities: Capabilities,
    /// Bitmap of supported `ofp_action_type`s.
    pub supported_actions: u32,
    pub ports: Vec<PortDesc>,
}

const OFP_SWITCH_FEATURES_LEN: usize = 24;

impl SwitchFeatures {
    /// Whether the datapath can execute output actions at all.
    pub fn supports_output(&self) -> bool {
        test_bit(OfpActionType::Output as u32, self.supported_actions)
    }
}

impl MessageType for SwitchFeatures {
    fn size_of(sf: &SwitchFeatures) -> usize {
        OFP_SWITCH_FEATURES_LEN + sf.ports.len() * OFP_PHY_PORT_LEN
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures> {
        if buf.len() < OFP_SWITCH_FEATURES_LEN {
            return Err(Error::truncated("features reply"));
        }
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        bytes.consume(3);
        let supported_capabilities = Capabilities::of_int(bytes.read_u32::<BigEndian>()?);
        let supported_actions = bytes.read_u32::<BigEndian>()?;
        let num_ports = (buf.len() - OFP_SWITCH_FEATURES_LEN) / OFP_PHY_PORT_LEN;
        let ports = (0..num_ports)
            .map(|_| PortDesc::parse(&mut bytes))
            .collect::<Result<Vec<_>>>()?;
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            supported_capabilities,
            supported_actions,
            ports,
        })
    }

    fn marshal(sf: SwitchFeatures, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u64::<BigEndian>(sf.datapath_id)?;
        bytes.write_u32::<BigEndian>(sf.num_buffers)?;
        bytes.write_u8(sf.num_tables)?;
        bytes.extend_from_slice(&[0; 3]);
        bytes.write_u32::<BigEndian>(Capabilities::to_int(&sf.supported_capabilities))?;
        bytes.write_u32::<BigEndian>(sf.supported_actions)?;
        for port in &sf.ports {
            PortDesc::marshal(port, bytes)?;
        }
        Ok(())
    }
}

/// Type of modification to perform on a flow table.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl FlowModCmd {
    fn of_int(c: u16) -> Result<FlowModCmd> {
        match c {
            0 => Ok(FlowModCmd::AddFlow),
            1 => Ok(FlowModCmd::ModFlow),
            2 => Ok(FlowModCmd::ModStrictFlow),
            3 => Ok(FlowModCmd::DeleteFlow),
            4 => Ok(FlowModCmd::DeleteStrictFlow),
            c => Err(Error::Decode(format!("unknown flow_mod command {}", c))),
        }
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

/// Fixed part of `ofp_flow_mod` after the match.
const OFP_FLOW_MOD_LEN: usize = 24;

/// `buffer_id` meaning "no buffered packet".
const OFP_NO_BUFFER: u32 = 0xffff_ffff;

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        (if check_overlap { 1 << 1 } else { 0 }) | (if notify_when_removed { 1 << 0 } else { 0 })
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        2 & flags != 0
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        1 & flags != 0
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        OFP_MATCH_LEN + OFP_FLOW_MOD_LEN + Action::size_of_sequence(&msg.actions)
    }

    fn parse(buf: &[u8]) -> Result<FlowMod> {
        if buf.len() < OFP_MATCH_LEN + OFP_FLOW_MOD_LEN {
            return Err(Error::truncated("flow_mod"));
        }
        let mut bytes = Cursor::new(buf);
        let pattern = Pattern::parse(&mut bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let command = FlowModCmd::of_int(bytes.read_u16::<BigEndian>()?)?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let prio = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u16::<BigEndian>()?)?;
        let flags = bytes.read_u16::<BigEndian>()?;
        let rest = buf.len() - bytes.position() as usize;
        let actions = Action::parse_sequence(&mut bytes, rest)?;
        Ok(FlowMod {
            command,
            pattern,
            priority: prio,
            actions,
            cookie,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: FlowMod::notify_when_removed_of_flags(flags),
            apply_to_packet: match buffer_id {
                OFP_NO_BUFFER => None,
                n => Some(n),
            },
            out_port,
            check_overlap: FlowMod::check_overlap_of_flags(flags),
        })
    }

    fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) -> io::Result<()> {
        Pattern::marshal(&fm.pattern, bytes)?;
        bytes.write_u64::<BigEndian>(fm.cookie)?;
        bytes.write_u16::<BigEndian>(fm.command as u16)?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout))?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout))?;
        bytes.write_u16::<BigEndian>(fm.priority)?;
        bytes.write_u32::<BigEndian>(fm.apply_to_packet.unwrap_or(OFP_NO_BUFFER))?;
        PseudoPort::marshal_opt(fm.out_port, bytes)?;
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(fm.check_overlap, fm.notify_when_removed))?;
        for act in Action::move_controller_last(fm.actions) {
            if act == Action::Output(PseudoPort::Table) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "OFPP_TABLE not allowed in installed flow",
                ));
            }
            Action::marshal(act, bytes)?;
        }
        Ok(())
    }
}

/// The data associated with a packet received by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Buffered on the switch under this id; the bytes are the (possibly
    /// truncated) copy the switch sent along.
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        match *payload {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf.len(),
        }
    }

    /// The frame bytes carried with the payload.
    pub fn bytes(&self) -> &[u8] {
        match *self {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf,
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    ExplicitSend,
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
}

/// Fixed part of `ofp_packet_in`, including the pad byte.
const OFP_PACKET_IN_LEN: usize = 10;

impl MessageType for PacketIn {
    fn size_of(pi: &PacketIn) -> usize {
        OFP_PACKET_IN_LEN + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn> {
        if buf.len() < OFP_PACKET_IN_LEN {
            return Err(Error::truncated("packet_in"));
        }
        let mut bytes = Cursor::new(buf);
        let buf_id = bytes.read_u32::<BigEndian>()?;
        let total_len = bytes.read_u16::<BigEndian>()?;
        let port = bytes.read_u16::<BigEndian>()?;
        let reason = match bytes.read_u8()? {
            0 => PacketInReason::NoMatch,
            1 => PacketInReason::ExplicitSend,
            r => return Err(Error::Decode(format!("unknown packet_in reason {}", r))),
        };
        let data = buf[OFP_PACKET_IN_LEN..].to_vec();
        let payload = match buf_id {
            OFP_NO_BUFFER => Payload::NotBuffered(data),
            n => Payload::Buffered(n, data),
        };
        Ok(PacketIn {
            input_payload: payload,
            total_len,
            port,
            reason,
        })
    }

    fn marshal(pi: PacketIn, bytes: &mut Vec<u8>) -> io::Result<()> {
        let (buf_id, data) = match pi.input_payload {
            Payload::Buffered(n, data) => (n, data),
            Payload::NotBuffered(data) => (OFP_NO_BUFFER, data),
        };
        bytes.write_u32::<BigEndian>(buf_id)?;
        bytes.write_u16::<BigEndian>(pi.total_len)?;
        bytes.write_u16::<BigEndian>(pi.port)?;
        bytes.write_u8(pi.reason as u8)?;
        bytes.write_u8(0)?;
        bytes.extend_from_slice(&data);
        Ok(())
    }
}

/// Represents packets sent from the controller.
///
/// A buffered payload goes out as its buffer id alone; the switch resolves
/// it locally. Only unbuffered payloads carry their bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

const OFP_PACKET_OUT_LEN: usize = 8;

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        let data = match po.output_payload {
            Payload::Buffered(..) => 0,
            Payload::NotBuffered(ref buf) => buf.len(),
        };
        OFP_PACKET_OUT_LEN + Action::size_of_sequence(&po.apply_actions) + data
    }

    fn parse(buf: &[u8]) -> Result<PacketOut> {
        if buf.len() < OFP_PACKET_OUT_LEN {
            return Err(Error::truncated("packet_out"));
        }
        let mut bytes = Cursor::new(buf);
        let buf_id = bytes.read_u32::<BigEndian>()?;
        let in_port = bytes.read_u16::<BigEndian>()?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        let apply_actions = Action::parse_sequence(&mut bytes, actions_len)?;
        let data = buf[bytes.position() as usize..].to_vec();
        Ok(PacketOut {
            output_payload: match buf_id {
                OFP_NO_BUFFER => Payload::NotBuffered(data),
                n => Payload::Buffered(n, data),
            },
            port_id: match in_port {
                p if p == OfpPort::None as u16 => None,
                p => Some(p),
            },
            apply_actions,
        })
    }

    fn marshal(po: PacketOut, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(match po.output_payload {
            Payload::Buffered(n, _) => n,
            Payload::NotBuffered(_) => OFP_NO_BUFFER,
        })?;
        bytes.write_u16::<BigEndian>(po.port_id.unwrap_or(OfpPort::None as u16))?;
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&po.apply_actions) as u16)?;
        for act in Action::move_controller_last(po.apply_actions) {
            Action::marshal(act, bytes)?;
        }
        if let Payload::NotBuffered(data) = po.output_payload {
            bytes.extend_from_slice(&data);
        }
        Ok(())
    }
}

/// Error message (datapath -> controller). Type and code are kept raw; they
/// are only ever logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl MessageType for ErrorMsg {
    fn size_of(e: &ErrorMsg) -> usize {
        4 + e.data.len()
    }

    fn parse(buf: &[u8]) -> Result<ErrorMsg> {
        if buf.len() < 4 {
            return Err(Error::truncated("error message"));
        }
        let mut bytes = Cursor::new(buf);
        Ok(ErrorMsg {
            typ: bytes.read_u16::<BigEndian>()?,
            code: bytes.read_u16::<BigEndian>()?,
            data: buf[4..].to_vec(),
        })
    }

    fn marshal(e: ErrorMsg, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(e.typ)?;
        bytes.write_u16::<BigEndian>(e.code)?;
        bytes.extend_from_slice(&e.data);
        Ok(())
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PacketOut(PacketOut),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PacketOut(_) => MsgCode::PacketOut,
            }
        }

        /// Marshal the body of the OpenFlow message `msg`.
        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> io::Result<()> {
            match msg {
                Message::Hello | Message::FeaturesReq => Ok(()),
                Message::EchoRequest(buf) | Message::EchoReply(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::Error(e) => ErrorMsg::marshal(e, bytes),
                Message::FeaturesReply(sf) => SwitchFeatures::marshal(sf, bytes),
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::PacketOut(packet_out) => PacketOut::marshal(packet_out, bytes),
            }
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            let body = match *msg {
                Message::Hello | Message::FeaturesReq => 0,
                Message::EchoRequest(ref buf) | Message::EchoReply(ref buf) => buf.len(),
                Message::Error(ref e) => ErrorMsg::size_of(e),
                Message::FeaturesReply(ref sf) => SwitchFeatures::size_of(sf),
                Message::FlowMod(ref flow_mod) => FlowMod::size_of(flow_mod),
                Message::PacketIn(ref packet_in) => PacketIn::size_of(packet_in),
                Message::PacketOut(ref packet_out) => PacketOut::size_of(packet_out),
            };
            OfpHeader::size() + body
        }

        fn header_of(xid: u32, msg: &Message) -> OfpHeader {
            OfpHeader::new(
                OFP_VERSION,
                Self::msg_code_of_message(msg) as u8,
                Self::size_of(msg) as u16,
                xid,
            )
        }

        fn marshal(xid: u32, msg: Message) -> Result<Vec<u8>> {
            let size = Self::size_of(&msg);
            if size > u16::MAX as usize {
                return Err(Error::Encode(format!("message of {} bytes exceeds OpenFlow length field", size)));
            }
            let hdr = Self::header_of(xid, &msg);
            let mut bytes = Vec::with_capacity(size);
            OfpHeader::marshal(&mut bytes, hdr)?;
            Message::marshal_body(msg, &mut bytes)?;
            Ok(bytes)
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message)> {
            let msg = match header.type_code()? {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => Message::Error(ErrorMsg::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                t => return Err(Error::UnsupportedMessage(t as u8)),
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// and `actions`.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            command: FlowModCmd::AddFlow,
            pattern,
            priority: prio,
            actions,
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::message::*;
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;

    fn split(bytes: &[u8]) -> (OfpHeader, &[u8]) {
        let mut hdr = [0u8; 8];
        hdr.copy_from_slice(&bytes[..8]);
        (OfpHeader::parse(hdr).unwrap(), &bytes[8..])
    }

    #[test]
    fn test_match_all_wildcards_everything() {
        let mut bytes = vec![];
        Pattern::marshal(&Pattern::match_all(), &mut bytes).unwrap();
        assert_eq!(bytes.len(), OFP_MATCH_LEN);
        assert_eq!(&bytes[..4], &0x0038_20ffu32.to_be_bytes());
        assert!(bytes[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_dst_mac_match_layout() {
        let pattern = Pattern {
            dl_dst: Some(MacAddr([0, 0, 0, 0, 0, 2])),
            ..Pattern::match_all()
        };
        let mut bytes = vec![];
        Pattern::marshal(&pattern, &mut bytes).unwrap();
        let w = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert!(!test_bit(OFPFW_DL_DST, w));
        assert!(test_bit(OFPFW_DL_SRC, w));
        assert!(test_bit(OFPFW_IN_PORT, w));
        assert_eq!(&bytes[12..18], &[0, 0, 0, 0, 0, 2]);
    }

    #[test]
    fn test_table_miss_flow_mod_bytes() {
        let fm = add_flow(
            0,
            Pattern::match_all(),
            vec![Action::Output(PseudoPort::Controller(OFPCML_NO_BUFFER))],
        );
        let bytes = Message::marshal(0, Message::FlowMod(fm)).unwrap();
        assert_eq!(bytes.len(), 8 + 40 + 24 + 8);
        assert_eq!(bytes[1], MsgCode::FlowMod as u8);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]) as usize, bytes.len());
        // priority
        assert_eq!(&bytes[8 + 40 + 14..8 + 40 + 16], &[0, 0]);
        // buffer id: none
        assert_eq!(&bytes[8 + 40 + 16..8 + 40 + 20], &[0xff; 4]);
        // output action to the controller, full packet
        assert_eq!(&bytes[72..80], &[0, 0, 0, 8, 0xff, 0xfd, 0xff, 0xff]);
    }

    #[test]
    fn test_flow_mod_decodes_as_sent() {
        let pattern = Pattern {
            in_port: Some(3),
            dl_dst: Some(MacAddr([0, 0, 0, 0, 0, 9])),
            dl_typ: Some(0x0800),
            nw_proto: Some(17),
            tp_dst: Some(9999),
            ..Pattern::match_all()
        };
        let fm = add_flow(2, pattern, vec![Action::Output(PseudoPort::PhysicalPort(4))]);
        let bytes = Message::marshal(5, Message::FlowMod(fm.clone())).unwrap();
        let (header, body) = split(&bytes);
        let (xid, msg) = Message::parse(&header, body).unwrap();
        assert_eq!(xid, 5);
        assert_eq!(msg, Message::FlowMod(fm));
    }

    #[test]
    fn test_controller_actions_go_last() {
        let acts = vec![
            Action::Output(PseudoPort::Controller(128)),
            Action::Output(PseudoPort::PhysicalPort(1)),
        ];
        assert_eq!(
            Action::move_controller_last(acts),
            vec![
                Action::Output(PseudoPort::PhysicalPort(1)),
                Action::Output(PseudoPort::Controller(128)),
            ]
        );
    }

    #[test]
    fn test_packet_out_omits_data_when_buffered() {
        let po = PacketOut {
            output_payload: Payload::Buffered(42, vec![1, 2, 3, 4]),
            port_id: Some(1),
            apply_actions: vec![Action::Output(PseudoPort::Flood)],
        };
        let bytes = Message::marshal(0, Message::PacketOut(po)).unwrap();
        assert_eq!(bytes.len(), 8 + 8 + 8);
        assert_eq!(&bytes[8..12], &42u32.to_be_bytes());
        assert_eq!(&bytes[12..14], &1u16.to_be_bytes());
        assert_eq!(&bytes[14..16], &8u16.to_be_bytes());
    }

    #[test]
    fn test_packet_out_carries_data_when_unbuffered() {
        let po = PacketOut {
            output_payload: Payload::NotBuffered(vec![0xaa; 60]),
            port_id: Some(2),
            apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(3))],
        };
        let bytes = Message::marshal(0, Message::PacketOut(po.clone())).unwrap();
        assert_eq!(bytes.len(), 8 + 8 + 8 + 60);
        assert_eq!(&bytes[8..12], &[0xff; 4]);
        let (header, body) = split(&bytes);
        assert_eq!(Message::parse(&header, body).unwrap().1, Message::PacketOut(po));
    }

    #[test]
    fn test_packet_in_skips_pad_byte() {
        let mut body = vec![0, 0, 1, 0, 0, 4, 0, 7, 0, 0];
        body.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let pi = PacketIn::parse(&body).unwrap();
        assert_eq!(pi.input_payload, Payload::Buffered(256, vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(pi.port, 7);
        assert_eq!(pi.total_len, 4);
        assert_eq!(pi.reason, PacketInReason::NoMatch);
    }

    #[test]
    fn test_features_reply_with_ports() {
        let sf = SwitchFeatures {
            datapath_id: 0x0000_0000_0000_0002,
            num_buffers: 256,
            num_tables: 254,
            supported_capabilities: Capabilities {
                flow_stats: true,
                table_stats: true,
                ..Capabilities::default()
            },
            supported_actions: 0xfff,
            ports: vec![PortDesc {
                port_no: 1,
                hw_addr: MacAddr([0x12, 0, 0, 0, 0, 1]),
                name: "s2-eth1".to_string(),
                down: false,
                link_down: false,
            }],
        };
        let bytes = Message::marshal(3, Message::FeaturesReply(sf.clone())).unwrap();
        assert_eq!(bytes.len(), 8 + 24 + 48);
        let (header, body) = split(&bytes);
        let (_, msg) = Message::parse(&header, body).unwrap();
        assert_eq!(msg, Message::FeaturesReply(sf.clone()));
        assert!(sf.supports_output());
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let pkt_out = PacketOut {
            output_payload: Payload::NotBuffered(vec![0; u16::MAX as usize]),
            port_id: Some(1),
            apply_actions: vec![Action::Output(PseudoPort::Flood)],
        };
        match Message::marshal(0, Message::PacketOut(pkt_out)) {
            Err(Error::Encode(msg)) => assert!(msg.contains("exceeds")),
            other => panic!("expected encode error, got {:?}", other),
        }
    }

    #[test]
    fn test_unhandled_message_type() {
        let header = OfpHeader::new(OFP_VERSION, MsgCode::PortStatus as u8, 8 + 56, 0);
        assert!(matches!(
            Message::parse(&header, &[0; 56]),
            Err(Error::UnsupportedMessage(12))
        ));
    }

    #[test]
    fn test_bad_port_number() {
        assert!(PseudoPort::make(0xff10, 0).is_err());
        assert_eq!(PseudoPort::of_int(0xffff).unwrap(), None);
        assert_eq!(PseudoPort::of_int(0xfffb).unwrap(), Some(PseudoPort::Flood));
    }
}
