//! Events feeding the dispatch loop
//!
//! All sockets, timers and the control surface funnel into one `mpsc`
//! channel consumed by a single dispatcher task. Handlers run to
//! completion between receives, which is what lets the session and
//! talkgroup state be mutated without locks.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::Message;

/// One unit of work for the dispatcher
#[derive(Debug)]
pub enum Event {
    /// A stream connection was accepted. The dispatcher allocates a
    /// session id and answers through `reply`; `None` means the id pool
    /// is exhausted and the connection must be dropped.
    StreamConnected {
        addr: SocketAddr,
        tx: mpsc::UnboundedSender<Message>,
        reply: oneshot::Sender<Option<u16>>,
    },
    /// A decoded control message from a stream peer
    StreamMessage { client_id: u16, msg: Message },
    /// The stream ended, cleanly or not
    StreamClosed { client_id: u16, reason: String },
    /// A raw datagram from the shared socket
    Datagram { addr: SocketAddr, data: Bytes },
    /// Deferred session deletion, scheduled by the dispatcher itself so
    /// that work already queued behind the disconnect still resolves the
    /// session
    Reap { client_id: u16 },
    /// A control-channel line, answered with `Ok` or a reason
    Command {
        line: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Snapshot request from the status endpoint
    StatusQuery {
        reply: oneshot::Sender<serde_json::Value>,
    },
}
