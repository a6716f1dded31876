//! Audio reflector for remote radio-link nodes
//!
//! The reflector interconnects a fleet of nodes over a dual-transport
//! session: a framed reliable stream for control traffic and a datagram
//! socket on the same port number for Opus audio and telemetry. Nodes
//! authenticate with a challenge/response handshake, tune to logical
//! channels called talkgroups and exchange voice; the server elects one
//! talker per talkgroup, fans its audio out to the other members,
//! deposes talkers that hold the channel past the squelch timeout and
//! can gate transmissions through a voice-activity classifier that
//! rejects carrier without speech.
//!
//! # Architecture
//!
//! ```text
//!   TCP streams ──► frame reader ──┐
//!   UDP socket  ──► datagram pump ─┼──► event channel ──► dispatcher
//!   /status, control channel ──────┘                        (one task)
//!                                                             │
//!             session writer queues ◄── broadcasts ◄──────────┤
//!             datagram sink ◄─────────── audio fan-out ◄──────┘
//! ```
//!
//! All state lives in the single dispatcher task; the socket tasks are
//! thin pumps. See [`reflector::Reflector`] for the core and
//! [`server::ReflectorServer`] for the socket wiring.

pub mod error;
pub mod protocol;
pub mod reflector;
pub mod registry;
pub mod server;
pub mod session;
pub mod status;
pub mod vad;

pub use error::{Error, Result};
pub use reflector::Reflector;
pub use server::{ReflectorServer, ServerConfig};
