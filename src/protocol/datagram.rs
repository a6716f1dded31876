//! Datagram messages
//!
//! Each datagram is one complete message: a fixed application header
//! followed by the per-type body. The header binds the datagram to a
//! session and orders it within that session's stream:
//!
//! ```text
//! type: u16 | client_id: u16 | seq: u16 | body...
//! ```
//!
//! Unknown type tags decode to `None` and are ignored by the dispatcher.

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::*;
use super::wire;
use crate::error::CodecError;

/// Fixed datagram header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub msg_type: u16,
    pub client_id: u16,
    pub seq: u16,
}

/// One receiver's signal report
#[derive(Debug, Clone, PartialEq)]
pub struct RxSignal {
    /// Single-character receiver id
    pub id: char,
    pub siglev: f32,
    pub enabled: bool,
    pub sql_open: bool,
    pub active: bool,
}

/// A typed datagram message body
#[derive(Debug, Clone, PartialEq)]
pub enum UdpMsg {
    /// Keepalive; also the reply that confirms datagram endpoint learning
    Heartbeat,
    /// One Opus packet. The server arbitrates on the session's current
    /// talkgroup; the carried id is the sender's view of it.
    Audio { tg: u32, payload: Bytes },
    /// Talker is done; remaining buffered samples should be played out
    FlushSamples,
    /// Flush acknowledgement
    AllSamplesFlushed,
    /// Periodic per-receiver telemetry
    SignalStrengthValues { rxs: Vec<RxSignal> },
}

impl UdpMsg {
    pub fn msg_type(&self) -> u16 {
        match self {
            UdpMsg::Heartbeat => UDP_MSG_HEARTBEAT,
            UdpMsg::Audio { .. } => UDP_MSG_AUDIO,
            UdpMsg::FlushSamples => UDP_MSG_FLUSH_SAMPLES,
            UdpMsg::AllSamplesFlushed => UDP_MSG_ALL_SAMPLES_FLUSHED,
            UdpMsg::SignalStrengthValues { .. } => UDP_MSG_SIGNAL_STRENGTH_VALUES,
        }
    }

    /// Serialize a complete datagram for the given session binding
    pub fn encode(&self, client_id: u16, seq: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(UDP_HEADER_SIZE + 16);
        buf.put_u16(self.msg_type());
        buf.put_u16(client_id);
        buf.put_u16(seq);
        match self {
            UdpMsg::Heartbeat | UdpMsg::FlushSamples | UdpMsg::AllSamplesFlushed => {}
            UdpMsg::Audio { tg, payload } => {
                buf.put_u32(*tg);
                wire::put_blob(&mut buf, payload);
            }
            UdpMsg::SignalStrengthValues { rxs } => {
                buf.put_u16(rxs.len() as u16);
                for rx in rxs {
                    buf.put_u8(rx.id as u8);
                    buf.put_f32(rx.siglev);
                    wire::put_bool(&mut buf, rx.enabled);
                    wire::put_bool(&mut buf, rx.sql_open);
                    wire::put_bool(&mut buf, rx.active);
                }
            }
        }
        buf.freeze()
    }

    /// Parse a datagram. The header always decodes when present; an
    /// unknown type yields `(header, None)`.
    pub fn decode(mut buf: Bytes) -> Result<(UdpHeader, Option<UdpMsg>), CodecError> {
        let header = UdpHeader {
            msg_type: wire::get_u16(&mut buf)?,
            client_id: wire::get_u16(&mut buf)?,
            seq: wire::get_u16(&mut buf)?,
        };
        let msg = match header.msg_type {
            UDP_MSG_HEARTBEAT => Some(UdpMsg::Heartbeat),
            UDP_MSG_AUDIO => Some(UdpMsg::Audio {
                tg: wire::get_u32(&mut buf)?,
                payload: wire::get_blob(&mut buf)?,
            }),
            UDP_MSG_FLUSH_SAMPLES => Some(UdpMsg::FlushSamples),
            UDP_MSG_ALL_SAMPLES_FLUSHED => Some(UdpMsg::AllSamplesFlushed),
            UDP_MSG_SIGNAL_STRENGTH_VALUES => {
                let count = wire::get_u16(&mut buf)? as usize;
                let mut rxs = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    rxs.push(RxSignal {
                        id: wire::get_u8(&mut buf)? as char,
                        siglev: wire::get_f32(&mut buf)?,
                        enabled: wire::get_bool(&mut buf)?,
                        sql_open: wire::get_bool(&mut buf)?,
                        active: wire::get_bool(&mut buf)?,
                    });
                }
                Some(UdpMsg::SignalStrengthValues { rxs })
            }
            _ => None,
        };
        Ok((header, msg))
    }
}
