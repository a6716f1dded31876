//! Protocol constants
//!
//! Message type tags and wire limits shared by both transports. Every
//! message begins with a `u16` type tag; unknown tags are ignored by
//! decoders so new message kinds can be added without breaking old peers.

/// Stream message type tags
pub const MSG_HEARTBEAT: u16 = 1;
pub const MSG_PROTO_VER: u16 = 5;
pub const MSG_AUTH_CHALLENGE: u16 = 10;
pub const MSG_AUTH_RESPONSE: u16 = 11;
pub const MSG_AUTH_OK: u16 = 12;
pub const MSG_ERROR: u16 = 13;
pub const MSG_SERVER_INFO: u16 = 100;
pub const MSG_NODE_JOINED: u16 = 102;
pub const MSG_NODE_LEFT: u16 = 103;
pub const MSG_TALKER_START_V1: u16 = 104;
pub const MSG_TALKER_STOP_V1: u16 = 105;
pub const MSG_TALKER_START: u16 = 106;
pub const MSG_TALKER_STOP: u16 = 107;
pub const MSG_SELECT_TG: u16 = 108;
pub const MSG_TG_MONITOR: u16 = 109;
pub const MSG_NODE_INFO: u16 = 110;
pub const MSG_REQUEST_QSY: u16 = 111;

/// Datagram message type tags
pub const UDP_MSG_HEARTBEAT: u16 = 1;
pub const UDP_MSG_AUDIO: u16 = 2;
pub const UDP_MSG_FLUSH_SAMPLES: u16 = 3;
pub const UDP_MSG_ALL_SAMPLES_FLUSHED: u16 = 4;
pub const UDP_MSG_SIGNAL_STRENGTH_VALUES: u16 = 5;

/// Size of the datagram application header: type + client id + sequence
pub const UDP_HEADER_SIZE: usize = 6;

/// Maximum accepted stream frame body size. A peer announcing a larger
/// frame is disconnected rather than buffered.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Length of the random authentication challenge in bytes
pub const AUTH_CHALLENGE_LEN: usize = 20;

/// Default port shared by the stream and datagram transports
pub const DEFAULT_LISTEN_PORT: u16 = 5300;
