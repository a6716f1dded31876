//! Socket plumbing
//!
//! Binds the shared stream/datagram port, spawns the thin pump tasks and
//! hands everything decoded to the dispatcher. Per connection there is a
//! reader task feeding the event channel and a writer task draining the
//! session's outbound queue; the writer shutting down is what closes the
//! stream when the core tears a session down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::protocol::{write_frame, FrameReader, Message};
use crate::reflector::{Event, Reflector};
use crate::server::config::ServerConfig;
use crate::status;
use crate::vad::{GateBank, SileroVad};

/// The reflector server: sockets, pumps and the dispatch loop
pub struct ReflectorServer {
    cfg: ServerConfig,
}

impl ReflectorServer {
    pub fn new(cfg: ServerConfig) -> Self {
        Self { cfg }
    }

    /// Bind the transports and run until the process is stopped
    pub async fn run(self) -> Result<()> {
        let bind = SocketAddr::from(([0, 0, 0, 0], self.cfg.listen_port));
        let listener = TcpListener::bind(bind).await?;
        let udp = Arc::new(UdpSocket::bind(bind).await?);
        tracing::info!(addr = %bind, "reflector listening");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (udp_tx, mut udp_out) = mpsc::unbounded_channel::<(SocketAddr, Bytes)>();

        // Outbound datagram pump
        let udp_send = Arc::clone(&udp);
        tokio::spawn(async move {
            while let Some((addr, data)) = udp_out.recv().await {
                if let Err(e) = udp_send.send_to(&data, addr).await {
                    tracing::warn!(peer = %addr, error = %e, "datagram send failed");
                }
            }
        });

        // Inbound datagram pump
        let udp_recv = Arc::clone(&udp);
        let datagram_tx = event_tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match udp_recv.recv_from(&mut buf).await {
                    Ok((n, addr)) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        if datagram_tx.send(Event::Datagram { addr, data }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "datagram receive failed");
                    }
                }
            }
        });

        let vad = self.build_vad_bank()?;

        if let Some(port) = self.cfg.http_srv_port {
            tokio::spawn(status::http::serve(port, event_tx.clone()));
        }
        if let Some(path) = self.cfg.command_socket.clone() {
            tokio::spawn(status::control::serve(path, event_tx.clone()));
        }

        // Accept loop
        let accept_tx = event_tx.clone();
        let idle_timeout = self.cfg.idle_timeout;
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        let events = accept_tx.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, peer, events, idle_timeout).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                }
            }
        });

        Reflector::new(self.cfg, vad, udp_tx, event_tx)
            .run(event_rx)
            .await;
        Ok(())
    }

    fn build_vad_bank(&self) -> Result<Option<GateBank>> {
        let Some(settings) = &self.cfg.vad else {
            return Ok(None);
        };
        let classifier = SileroVad::load(
            &settings.model_path,
            settings.gate.sample_rate,
            settings.threshold,
        )?;
        tracing::info!(
            model = %settings.model_path.display(),
            callsigns = ?settings.callsigns,
            "voice gate enabled"
        );
        Ok(Some(GateBank::new(
            settings.gate.clone(),
            settings.callsigns.clone(),
            Box::new(classifier),
        )))
    }
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<Event>,
    idle_timeout: Duration,
) {
    let _ = socket.set_nodelay(true);
    let (read_half, mut write_half) = socket.into_split();

    let (tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (reply_tx, reply_rx) = oneshot::channel();
    if events
        .send(Event::StreamConnected {
            addr: peer,
            tx,
            reply: reply_tx,
        })
        .is_err()
    {
        return;
    }
    let client_id = match reply_rx.await {
        Ok(Some(id)) => id,
        // Id pool exhausted or the dispatcher is gone
        _ => return,
    };

    // The writer lives until the core drops the session's sender, which
    // is also how a server-initiated disconnect closes the stream.
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if write_frame(&mut write_half, &msg.encode()).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut reader = FrameReader::new(read_half);
    let reason = loop {
        match tokio::time::timeout(idle_timeout, reader.next_frame()).await {
            Err(_) => break "idle timeout".to_string(),
            Ok(Ok(None)) => break "connection closed by peer".to_string(),
            Ok(Ok(Some(frame))) => match Message::decode(frame) {
                Ok(Some(msg)) => {
                    if events.send(Event::StreamMessage { client_id, msg }).is_err() {
                        return;
                    }
                }
                // Unknown message types are tolerated
                Ok(None) => {}
                Err(e) => break format!("codec error: {e}"),
            },
            Ok(Err(e)) => break e.to_string(),
        }
    };
    let _ = events.send(Event::StreamClosed { client_id, reason });
}
