//! Stream control messages
//!
//! Every control message is one variant of [`Message`]. The wire form is
//! the `u16` type tag followed by the per-type body; the length-prefixed
//! frame envelope is handled separately by [`crate::protocol::framing`].
//!
//! Decoding an unknown type tag yields `Ok(None)` rather than an error so
//! that newer peers can introduce message kinds without breaking us.

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::*;
use super::wire;
use crate::error::CodecError;

/// Negotiated wire-protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtoVer {
    pub major: u16,
    pub minor: u16,
}

impl ProtoVer {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Lowest protocol version this server accepts
    pub const MIN: ProtoVer = ProtoVer::new(1, 0);

    /// Highest protocol version this server accepts
    pub const MAX: ProtoVer = ProtoVer::new(2, 999);

    pub fn is_supported(&self) -> bool {
        (Self::MIN..=Self::MAX).contains(self)
    }
}

impl std::fmt::Display for ProtoVer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A typed control message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Keepalive, echoed back by the server
    Heartbeat,
    /// First message from a node, announcing its protocol version
    ProtoVer(ProtoVer),
    /// Random nonce the node must sign with its shared secret
    AuthChallenge { challenge: Vec<u8> },
    /// The node's callsign and HMAC over the challenge
    AuthResponse { callsign: String, digest: Vec<u8> },
    /// Authentication accepted
    AuthOk,
    /// Fatal error, sent just before disconnecting the peer
    Error { message: String },
    /// Server metadata sent after authentication. The node uses the
    /// assigned id to tag its datagrams.
    ServerInfo { client_id: u16 },
    NodeJoined { callsign: String },
    NodeLeft { callsign: String },
    /// Talker notifications for protocol v1 nodes, which have no explicit
    /// talkgroup concept on the wire
    TalkerStartV1 { callsign: String },
    TalkerStopV1 { callsign: String },
    TalkerStart { tg: u32, callsign: String },
    TalkerStop { tg: u32, callsign: String },
    /// Tune to a talkgroup (0 leaves the current one)
    SelectTg { tg: u32 },
    /// Replace the set of talkgroups monitored for activity notifications
    TgMonitor { tgs: Vec<u32> },
    /// Node self-description as a JSON document
    NodeInfo { json: String },
    /// Ask the members of the caller's talkgroup to change channel
    RequestQsy { tg: u32 },
}

impl Message {
    pub fn msg_type(&self) -> u16 {
        match self {
            Message::Heartbeat => MSG_HEARTBEAT,
            Message::ProtoVer(_) => MSG_PROTO_VER,
            Message::AuthChallenge { .. } => MSG_AUTH_CHALLENGE,
            Message::AuthResponse { .. } => MSG_AUTH_RESPONSE,
            Message::AuthOk => MSG_AUTH_OK,
            Message::Error { .. } => MSG_ERROR,
            Message::ServerInfo { .. } => MSG_SERVER_INFO,
            Message::NodeJoined { .. } => MSG_NODE_JOINED,
            Message::NodeLeft { .. } => MSG_NODE_LEFT,
            Message::TalkerStartV1 { .. } => MSG_TALKER_START_V1,
            Message::TalkerStopV1 { .. } => MSG_TALKER_STOP_V1,
            Message::TalkerStart { .. } => MSG_TALKER_START,
            Message::TalkerStop { .. } => MSG_TALKER_STOP,
            Message::SelectTg { .. } => MSG_SELECT_TG,
            Message::TgMonitor { .. } => MSG_TG_MONITOR,
            Message::NodeInfo { .. } => MSG_NODE_INFO,
            Message::RequestQsy { .. } => MSG_REQUEST_QSY,
        }
    }

    /// Serialize the message, type tag included
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u16(self.msg_type());
        match self {
            Message::Heartbeat | Message::AuthOk => {}
            Message::ProtoVer(ver) => {
                buf.put_u16(ver.major);
                buf.put_u16(ver.minor);
            }
            Message::AuthChallenge { challenge } => {
                wire::put_blob(&mut buf, challenge);
            }
            Message::AuthResponse { callsign, digest } => {
                wire::put_string(&mut buf, callsign);
                wire::put_blob(&mut buf, digest);
            }
            Message::Error { message } => {
                wire::put_string(&mut buf, message);
            }
            Message::ServerInfo { client_id } => {
                buf.put_u16(*client_id);
            }
            Message::NodeJoined { callsign }
            | Message::NodeLeft { callsign }
            | Message::TalkerStartV1 { callsign }
            | Message::TalkerStopV1 { callsign } => {
                wire::put_string(&mut buf, callsign);
            }
            Message::TalkerStart { tg, callsign } | Message::TalkerStop { tg, callsign } => {
                buf.put_u32(*tg);
                wire::put_string(&mut buf, callsign);
            }
            Message::SelectTg { tg } | Message::RequestQsy { tg } => {
                buf.put_u32(*tg);
            }
            Message::TgMonitor { tgs } => {
                buf.put_u16(tgs.len() as u16);
                for tg in tgs {
                    buf.put_u32(*tg);
                }
            }
            Message::NodeInfo { json } => {
                wire::put_string(&mut buf, json);
            }
        }
        buf.freeze()
    }

    /// Parse one message from a frame body. Returns `Ok(None)` for an
    /// unknown type tag.
    pub fn decode(mut buf: Bytes) -> Result<Option<Message>, CodecError> {
        let msg_type = wire::get_u16(&mut buf)?;
        let msg = match msg_type {
            MSG_HEARTBEAT => Message::Heartbeat,
            MSG_PROTO_VER => Message::ProtoVer(ProtoVer::new(
                wire::get_u16(&mut buf)?,
                wire::get_u16(&mut buf)?,
            )),
            MSG_AUTH_CHALLENGE => Message::AuthChallenge {
                challenge: wire::get_blob(&mut buf)?.to_vec(),
            },
            MSG_AUTH_RESPONSE => Message::AuthResponse {
                callsign: wire::get_string(&mut buf)?,
                digest: wire::get_blob(&mut buf)?.to_vec(),
            },
            MSG_AUTH_OK => Message::AuthOk,
            MSG_ERROR => Message::Error {
                message: wire::get_string(&mut buf)?,
            },
            MSG_SERVER_INFO => Message::ServerInfo {
                client_id: wire::get_u16(&mut buf)?,
            },
            MSG_NODE_JOINED => Message::NodeJoined {
                callsign: wire::get_string(&mut buf)?,
            },
            MSG_NODE_LEFT => Message::NodeLeft {
                callsign: wire::get_string(&mut buf)?,
            },
            MSG_TALKER_START_V1 => Message::TalkerStartV1 {
                callsign: wire::get_string(&mut buf)?,
            },
            MSG_TALKER_STOP_V1 => Message::TalkerStopV1 {
                callsign: wire::get_string(&mut buf)?,
            },
            MSG_TALKER_START => Message::TalkerStart {
                tg: wire::get_u32(&mut buf)?,
                callsign: wire::get_string(&mut buf)?,
            },
            MSG_TALKER_STOP => Message::TalkerStop {
                tg: wire::get_u32(&mut buf)?,
                callsign: wire::get_string(&mut buf)?,
            },
            MSG_SELECT_TG => Message::SelectTg {
                tg: wire::get_u32(&mut buf)?,
            },
            MSG_TG_MONITOR => {
                let count = wire::get_u16(&mut buf)? as usize;
                let mut tgs = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    tgs.push(wire::get_u32(&mut buf)?);
                }
                Message::TgMonitor { tgs }
            }
            MSG_NODE_INFO => Message::NodeInfo {
                json: wire::get_string(&mut buf)?,
            },
            MSG_REQUEST_QSY => Message::RequestQsy {
                tg: wire::get_u32(&mut buf)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let encoded = msg.encode();
        let decoded = Message::decode(encoded).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn handshake_messages_roundtrip() {
        roundtrip(Message::ProtoVer(ProtoVer::new(2, 0)));
        roundtrip(Message::AuthChallenge {
            challenge: vec![1, 2, 3, 4, 5],
        });
        roundtrip(Message::AuthResponse {
            callsign: "SM0XYZ".into(),
            digest: vec![0xaa; 32],
        });
        roundtrip(Message::AuthOk);
        roundtrip(Message::ServerInfo { client_id: 42 });
        roundtrip(Message::Error {
            message: "access denied".into(),
        });
    }

    #[test]
    fn membership_messages_roundtrip() {
        roundtrip(Message::SelectTg { tg: 9110 });
        roundtrip(Message::TgMonitor {
            tgs: vec![91, 240, 9110],
        });
        roundtrip(Message::NodeInfo {
            json: r#"{"qth":[]}"#.into(),
        });
        roundtrip(Message::RequestQsy { tg: 0 });
    }

    #[test]
    fn talker_notifications_roundtrip() {
        roundtrip(Message::TalkerStart {
            tg: 91,
            callsign: "SM0ABC".into(),
        });
        roundtrip(Message::TalkerStop {
            tg: 91,
            callsign: "SM0ABC".into(),
        });
        roundtrip(Message::TalkerStartV1 {
            callsign: "SM0ABC".into(),
        });
        roundtrip(Message::TalkerStopV1 {
            callsign: "SM0ABC".into(),
        });
    }

    #[test]
    fn unknown_type_is_ignored() {
        let mut buf = BytesMut::new();
        buf.put_u16(0x7777);
        buf.put_slice(&[1, 2, 3]);
        assert_eq!(Message::decode(buf.freeze()).unwrap(), None);
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut buf = BytesMut::new();
        buf.put_u16(MSG_TALKER_START);
        buf.put_u16(0);
        assert!(Message::decode(buf.freeze()).is_err());
    }

    #[test]
    fn proto_ver_ordering() {
        assert!(ProtoVer::new(1, 999) < ProtoVer::new(2, 0));
        assert!(ProtoVer::new(2, 0).is_supported());
        assert!(ProtoVer::new(1, 0).is_supported());
        assert!(!ProtoVer::new(0, 6).is_supported());
        assert!(!ProtoVer::new(3, 0).is_supported());
    }
}
