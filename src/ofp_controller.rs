use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::SwitchEvent;
use crate::ofp_header::{OfpHeader, OFP_HEADER_LEN};
use crate::ofp_message::OfpMessage;
use crate::openflow0x01::message::Message;
use crate::openflow0x01::{MsgCode, OFP_VERSION};

/// Southbound half of a switch control channel.
pub trait Datapath {
    /// Send `msg` to the switch without waiting for any reply.
    fn send_message(&mut self, xid: u32, msg: Message) -> Result<()>;
}

impl Datapath for TcpStream {
    fn send_message(&mut self, xid: u32, msg: Message) -> Result<()> {
        let bytes = Message::marshal(xid, msg)?;
        self.write_all(&bytes)?;
        Ok(())
    }
}

/// OpenFlow 1.0 Controller
///
/// Implementors only react to `SwitchEvent`s; the session protocol (hello,
/// features request, echo keep-alive) is run by `handle_client_connected`.
/// Implementations are shared by every connection thread.
pub trait OF0x01Controller: Sync {
    /// React to one event from the switch behind `dp`. Runs to completion
    /// before the next message of that switch is read.
    fn dispatch(&self, event: SwitchEvent, dp: &mut dyn Datapath);

    /// The control session of switch `dpid` ended.
    fn switch_disconnected(&self, dpid: u64);

    /// Perform handshake and begin loop reading incoming messages from client stream.
    ///
    /// Returns when the switch closes the connection. A message that fails
    /// to decode is logged and skipped; the session continues.
    fn handle_client_connected(&self, stream: &mut TcpStream) -> Result<()> {
        stream.send_message(0, Message::Hello)?;
        debug!(peer = ?stream.peer_addr().ok(), "sent hello");
        let mut dpid: Option<u64> = None;
        let result = loop {
            let mut buf = [0u8; OFP_HEADER_LEN];
            match stream.read_exact(&mut buf) {
                Ok(()) => {}
                Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => break Ok(()),
                Err(e) => break Err(Error::Io(e)),
            }
            let header = match OfpHeader::parse(buf) {
                Ok(h) => h,
                // Without a usable length the stream cannot be re-synchronised.
                Err(e) => break Err(e),
            };
            let mut body = vec![0u8; header.body_length()];
            if let Err(e) = stream.read_exact(&mut body) {
                break Err(Error::Io(e));
            }

            if header.version() != OFP_VERSION && header.type_code().ok() != Some(MsgCode::Hello) {
                break Err(Error::Decode(format!(
                    "switch speaks OpenFlow version {:#x}",
                    header.version()
                )));
            }

            let msg = match Message::parse(&header, &body) {
                Ok((_, msg)) => msg,
                Err(Error::UnsupportedMessage(code)) => {
                    debug!(dpid = ?dpid, code, "ignoring unhandled message type");
                    continue;
                }
                Err(e) => {
                    warn!(dpid = ?dpid, error = %e, "dropping undecodable message");
                    continue;
                }
            };
            let outcome = match msg {
                Message::Hello => stream.send_message(0, Message::FeaturesReq),
                Message::EchoRequest(payload) => {
                    stream.send_message(header.xid(), Message::EchoReply(payload))
                }
                Message::FeaturesReply(features) => {
                    if dpid.is_some() {
                        debug!(dpid = ?dpid, "ignoring repeated features reply");
                        continue;
                    }
                    let id = features.datapath_id;
                    dpid = Some(id);
                    info!(dpid = id, ports = features.ports.len(), "switch connected");
                    self.dispatch(SwitchEvent::SwitchJoined { dpid: id, features }, stream);
                    Ok(())
                }
                Message::PacketIn(packet) => {
                    match dpid {
                        Some(id) => self.dispatch(SwitchEvent::PacketIn { dpid: id, packet }, stream),
                        None => warn!(in_port = packet.port, "packet-in before features reply"),
                    }
                    Ok(())
                }
                Message::Error(err) => {
                    warn!(dpid = ?dpid, typ = err.typ, code = err.code, "switch reported an error");
                    Ok(())
                }
                Message::EchoReply(_)
                | Message::FeaturesReq
                | Message::FlowMod(_)
                | Message::PacketOut(_) => {
                    debug!(dpid = ?dpid, "ignoring unexpected message");
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                break Err(e);
            }
        };
        if let Some(id) = dpid {
            self.switch_disconnected(id);
        }
        result
    }
}
