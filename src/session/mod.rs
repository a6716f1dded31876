//! Per-peer sessions and broadcast filters

pub mod client;
pub mod filter;

pub use client::{auth_digest, Client, ConState, HandshakeStep, RxState, SeqCheck};
pub use filter::Filter;
