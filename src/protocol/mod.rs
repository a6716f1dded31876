//! Wire protocol: typed messages, datagram header, stream framing
//!
//! The reflector speaks two transports on the same port number: a framed
//! reliable stream for control messages and a connectionless datagram
//! socket for audio and telemetry. Both carry the same kind of envelope,
//! a `u16` type tag followed by the per-type body, in network byte order.

pub mod constants;
pub mod datagram;
pub mod framing;
pub mod message;
pub mod wire;

pub use datagram::{RxSignal, UdpHeader, UdpMsg};
pub use framing::{write_frame, FrameReader};
pub use message::{Message, ProtoVer};
