//! The reflector core
//!
//! Owns every session, the talkgroup registry and the voice gate, and
//! dispatches all events from the socket tasks. Runs as a single task;
//! no handler suspends while touching shared state.
//!
//! Outbound traffic leaves through two sinks: each session's writer
//! channel for stream messages and the datagram sink for UDP. Both are
//! plain `mpsc` senders, which keeps every handler synchronous and the
//! whole core testable without sockets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{Message, UdpMsg};
use crate::registry::{SqlTimeout, TalkerEvent, TgRegistry};
use crate::server::config::ServerConfig;
use crate::session::{Client, ConState, Filter, HandshakeStep};
use crate::vad::{GateBank, GateVerdict};

use super::event::Event;

/// Datagrams queued for the UDP socket task
pub type DatagramSink = mpsc::UnboundedSender<(SocketAddr, Bytes)>;

pub struct Reflector {
    cfg: ServerConfig,
    sessions: HashMap<u16, Client>,
    next_client_id: u16,
    tgs: TgRegistry,
    vad: Option<GateBank>,
    udp_tx: DatagramSink,
    /// Loops back into our own queue for deferred deletion
    event_tx: mpsc::UnboundedSender<Event>,
    /// Rotating cursor through the random-QSY range
    random_qsy_cursor: u32,
}

impl Reflector {
    pub fn new(
        cfg: ServerConfig,
        vad: Option<GateBank>,
        udp_tx: DatagramSink,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let tgs = TgRegistry::new(cfg.sql_timeout, cfg.restricted_tgs.clone());
        let random_qsy_cursor = cfg.random_qsy_range.map(|(_, hi)| hi).unwrap_or(0);
        Self {
            cfg,
            sessions: HashMap::new(),
            next_client_id: 0,
            tgs,
            vad,
            udp_tx,
            event_tx,
            random_qsy_cursor,
        }
    }

    /// Drive the dispatch loop until the event channel closes
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        loop {
            let deadline = self.tgs.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, Instant::now()),
                    None => break,
                },
                _ = sleep_until(deadline) => self.handle_sql_timeouts(Instant::now()),
            }
        }
    }

    /// Dispatch one event. `now` is passed in so tests can drive time.
    pub fn handle_event(&mut self, event: Event, now: Instant) {
        match event {
            Event::StreamConnected { addr, tx, reply } => {
                let _ = reply.send(self.accept_stream(addr, tx));
            }
            Event::StreamMessage { client_id, msg } => {
                self.handle_stream_message(client_id, msg);
            }
            Event::StreamClosed { client_id, reason } => {
                self.handle_stream_closed(client_id, &reason);
            }
            Event::Datagram { addr, data } => {
                self.handle_datagram(addr, data, now);
            }
            Event::Reap { client_id } => {
                self.reap(client_id);
            }
            Event::Command { line, reply } => {
                let _ = reply.send(self.handle_command(&line));
            }
            Event::StatusQuery { reply } => {
                let _ = reply.send(self.status_json());
            }
        }
    }

    /// Depose talkers whose squelch deadline has passed
    pub fn handle_sql_timeouts(&mut self, now: Instant) {
        for SqlTimeout {
            tg,
            talker,
            auto_qsy,
        } in self.tgs.expire(now)
        {
            let callsign = self.callsign_of(talker);
            tracing::info!(callsign = %callsign, tg, "squelch timeout, talker deposed");

            if let Some(client) = self.sessions.get_mut(&talker) {
                client.block_for(self.cfg.sql_timeout_blocktime, now);
            }
            self.emit_talker_events(&[TalkerEvent::Stopped { tg, client: talker }]);
            if auto_qsy {
                self.request_auto_qsy(tg);
            }
        }
    }

    // ------------------------------------------------------------------
    // Stream plane
    // ------------------------------------------------------------------

    fn accept_stream(
        &mut self,
        addr: SocketAddr,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Option<u16> {
        let Some(id) = self.allocate_id() else {
            tracing::warn!(peer = %addr, "session id pool exhausted, dropping connection");
            return None;
        };
        tracing::info!(peer = %addr, client_id = id, "client connected");
        self.sessions.insert(id, Client::new(id, addr, tx));
        Some(id)
    }

    /// Ids are handed out by a wrapping counter and a freed id only
    /// becomes reusable once the session's deferred reap has run.
    fn allocate_id(&mut self) -> Option<u16> {
        for _ in 0..=u16::MAX as u32 {
            let id = self.next_client_id;
            self.next_client_id = self.next_client_id.wrapping_add(1);
            if !self.sessions.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }

    fn handle_stream_message(&mut self, client_id: u16, msg: Message) {
        let Some(client) = self.sessions.get(&client_id) else {
            return;
        };
        match client.state() {
            ConState::Disconnected => {}
            ConState::Connected => self.handle_connected_message(client_id, msg),
            _ => self.handle_handshake_message(client_id, msg),
        }
    }

    fn handle_handshake_message(&mut self, client_id: u16, msg: Message) {
        let client = self.sessions.get_mut(&client_id).expect("checked by caller");
        match client.handle_handshake_msg(&msg, &self.cfg.users) {
            HandshakeStep::Reply(replies) => {
                for reply in replies {
                    client.send_msg(reply);
                }
            }
            HandshakeStep::Authenticated(replies) => {
                for reply in replies {
                    client.send_msg(reply);
                }
                self.on_authenticated(client_id);
            }
            HandshakeStep::Reject { reply, reason } => {
                client.send_msg(reply);
                tracing::warn!(peer = %client.stream_addr(), %reason, "handshake failed");
                self.disconnect(client_id, &reason);
            }
        }
    }

    fn on_authenticated(&mut self, client_id: u16) {
        let client = &self.sessions[&client_id];
        let callsign = client.callsign().to_string();
        let proto_ver = client.proto_ver();
        tracing::info!(callsign = %callsign, %proto_ver, client_id, "node logged in");

        self.broadcast_msg(
            &Message::NodeJoined {
                callsign: callsign.clone(),
            },
            &Filter::Except(client_id),
        );

        // v1 nodes have no talkgroup selection on the wire; pin them to
        // the configured legacy talkgroup.
        if proto_ver.major == 1 {
            self.select_tg(client_id, self.cfg.tg_for_v1_clients);
        }
    }

    fn handle_connected_message(&mut self, client_id: u16, msg: Message) {
        match msg {
            Message::Heartbeat => {
                self.sessions[&client_id].send_msg(Message::Heartbeat);
            }
            Message::SelectTg { tg } => {
                self.select_tg(client_id, tg);
            }
            Message::TgMonitor { tgs } => {
                if let Some(client) = self.sessions.get_mut(&client_id) {
                    client.set_monitored_tgs(tgs);
                }
            }
            Message::NodeInfo { json } => {
                let info = match serde_json::from_str(&json) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(
                            callsign = %self.callsign_of(client_id),
                            error = %e,
                            "malformed node info, ignored"
                        );
                        return;
                    }
                };
                if let Some(client) = self.sessions.get_mut(&client_id) {
                    client.set_node_info(info);
                }
            }
            Message::RequestQsy { tg } => {
                self.request_qsy(client_id, tg);
            }
            other => {
                let reason =
                    format!("unexpected message type {} while connected", other.msg_type());
                tracing::warn!(callsign = %self.callsign_of(client_id), %reason, "protocol violation");
                self.disconnect(client_id, &reason);
            }
        }
    }

    fn handle_stream_closed(&mut self, client_id: u16, reason: &str) {
        match self.sessions.get(&client_id).map(Client::state) {
            // Already torn down by us; the reap is scheduled
            None | Some(ConState::Disconnected) => {}
            Some(_) => self.disconnect(client_id, reason),
        }
    }

    /// Tear a session down: leave its talkgroup, announce the departure
    /// and schedule the deferred deletion. Idempotent.
    fn disconnect(&mut self, client_id: u16, reason: &str) {
        let Some(client) = self.sessions.get_mut(&client_id) else {
            return;
        };
        if client.state() == ConState::Disconnected {
            return;
        }
        let callsign = client.callsign().to_string();
        let peer = client.stream_addr();
        client.mark_disconnected();

        if let Some(vad) = &mut self.vad {
            vad.reset(client_id);
        }
        let events = self.tgs.remove_client(client_id);
        self.emit_talker_events(&events);

        if callsign.is_empty() {
            tracing::info!(peer = %peer, %reason, "client disconnected");
        } else {
            tracing::info!(callsign = %callsign, %reason, "node disconnected");
            self.broadcast_msg(&Message::NodeLeft { callsign }, &Filter::Except(client_id));
        }

        let _ = self.event_tx.send(Event::Reap { client_id });
    }

    fn reap(&mut self, client_id: u16) {
        if let Some(client) = self.sessions.get(&client_id) {
            if client.state() == ConState::Disconnected {
                tracing::debug!(client_id, "session reaped");
                self.sessions.remove(&client_id);
            }
        }
    }

    fn select_tg(&mut self, client_id: u16, tg: u32) {
        let events = self.tgs.join(client_id, tg);
        self.emit_talker_events(&events);
        tracing::info!(callsign = %self.callsign_of(client_id), tg, "selected talkgroup");
    }

    // ------------------------------------------------------------------
    // Datagram plane
    // ------------------------------------------------------------------

    fn handle_datagram(&mut self, addr: SocketAddr, data: Bytes, now: Instant) {
        let (header, msg) = match UdpMsg::decode(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "unparseable datagram");
                return;
            }
        };

        let Some(client) = self.sessions.get_mut(&header.client_id) else {
            tracing::warn!(peer = %addr, client_id = header.client_id, "datagram with unknown client id");
            return;
        };
        if client.state() != ConState::Connected {
            tracing::warn!(peer = %addr, client_id = header.client_id, "datagram for inactive session");
            return;
        }

        // Datagrams must come from the stream peer's address; the port is
        // learned from the first one and pinned afterwards.
        if addr.ip() != client.stream_addr().ip() {
            tracing::warn!(
                callsign = %client.callsign(),
                peer = %addr,
                expected = %client.stream_addr().ip(),
                "datagram source ip mismatch"
            );
            return;
        }
        if client.remote_udp_port() == 0 {
            client.set_remote_udp_port(addr.port());
            self.send_udp_to(header.client_id, &UdpMsg::Heartbeat);
        } else if addr.port() != client.remote_udp_port() {
            tracing::warn!(
                callsign = %self.callsign_of(header.client_id),
                port = addr.port(),
                expected = self.sessions[&header.client_id].remote_udp_port(),
                "datagram source port mismatch"
            );
            return;
        }

        let client = self.sessions.get_mut(&header.client_id).expect("looked up above");
        match client.check_udp_rx_seq(header.seq) {
            crate::session::SeqCheck::OutOfOrder => {
                tracing::info!(
                    callsign = %client.callsign(),
                    seq = header.seq,
                    expected = client.expected_udp_rx_seq(),
                    "dropping out of sequence datagram"
                );
                return;
            }
            crate::session::SeqCheck::Accepted { lost } if lost > 0 => {
                tracing::info!(callsign = %client.callsign(), lost, "datagram frames lost");
            }
            crate::session::SeqCheck::Accepted { .. } => {}
        }

        match msg {
            // Endpoint learning above already answered the heartbeat
            Some(UdpMsg::Heartbeat) | Some(UdpMsg::AllSamplesFlushed) => {}
            Some(UdpMsg::Audio { payload, .. }) => {
                self.handle_audio(header.client_id, payload, now);
            }
            Some(UdpMsg::FlushSamples) => {
                self.handle_flush(header.client_id);
            }
            Some(UdpMsg::SignalStrengthValues { rxs }) => {
                let client = self.sessions.get_mut(&header.client_id).expect("looked up above");
                if !client.is_blocked(now) {
                    for rx in rxs {
                        client.update_rx(
                            rx.id,
                            crate::session::RxState {
                                siglev: rx.siglev,
                                enabled: rx.enabled,
                                sql_open: rx.sql_open,
                                active: rx.active,
                            },
                        );
                    }
                }
            }
            // Unknown types are ignored for forward compatibility
            None => {}
        }
    }

    fn handle_audio(&mut self, client_id: u16, payload: Bytes, now: Instant) {
        let client = &self.sessions[&client_id];
        if client.is_blocked(now) || payload.is_empty() {
            return;
        }
        let tg = self.tgs.tg_of(client_id);
        if tg == 0 {
            return;
        }

        let gated = self
            .vad
            .as_ref()
            .is_some_and(|vad| vad.applies_to(client.callsign()))
            && !client.voice_detected;
        if !gated {
            self.talker_broadcast(client_id, tg, payload, now);
            return;
        }

        let vad = self.vad.as_mut().expect("gated implies a bank");
        match vad.ingest(client_id, payload) {
            Ok(GateVerdict::Buffered) => {}
            Ok(GateVerdict::Released(packets)) => {
                tracing::info!(callsign = %self.callsign_of(client_id), "voice confirmed, releasing buffered audio");
                if let Some(client) = self.sessions.get_mut(&client_id) {
                    client.voice_detected = true;
                }
                for packet in packets {
                    self.talker_broadcast(client_id, tg, packet, now);
                }
            }
            Ok(GateVerdict::Denied) => {
                tracing::warn!(callsign = %self.callsign_of(client_id), "no voice within gate budget");
                self.disconnect(client_id, "no voice detected");
            }
            Err(e) => {
                // Fail closed: keep the audio gated
                tracing::warn!(callsign = %self.callsign_of(client_id), error = %e, "voice gate error");
            }
        }
    }

    /// Elect a talker if needed and rebroadcast the packet when, and only
    /// when, the sender holds the talker slot.
    fn talker_broadcast(&mut self, client_id: u16, tg: u32, payload: Bytes, now: Instant) {
        let events = self.tgs.claim_talker(tg, client_id, now);
        self.emit_talker_events(&events);
        if self.tgs.talker_of(tg) == Some(client_id) {
            self.broadcast_udp(
                &UdpMsg::Audio { tg, payload },
                &Filter::Tg(tg).and(Filter::Except(client_id)),
            );
        }
    }

    fn handle_flush(&mut self, client_id: u16) {
        let tg = self.tgs.tg_of(client_id);
        if tg > 0 && self.tgs.talker_of(tg) == Some(client_id) {
            let events = self.tgs.release_talker(tg, client_id);
            self.emit_talker_events(&events);
        }
        // Waiting for every member to confirm its own flush would stall
        // large reflectors, so the flush is acknowledged right away.
        self.send_udp_to(client_id, &UdpMsg::AllSamplesFlushed);
    }

    // ------------------------------------------------------------------
    // Talker notifications
    // ------------------------------------------------------------------

    fn emit_talker_events(&mut self, events: &[TalkerEvent]) {
        for event in events {
            // A talker transition restarts gate evaluation for everyone
            // tuned to the talkgroup
            let (TalkerEvent::Stopped { tg, .. } | TalkerEvent::Started { tg, .. }) = *event;
            if self.vad.is_some() {
                let members: Vec<u16> = self.tgs.members(tg).collect();
                let vad = self.vad.as_mut().expect("checked above");
                for member in members {
                    vad.reset(member);
                }
            }
            match *event {
                TalkerEvent::Stopped { tg, client } => {
                    if let Some(vad) = &mut self.vad {
                        vad.reset(client);
                    }
                    if let Some(session) = self.sessions.get_mut(&client) {
                        session.voice_detected = false;
                    }
                    let callsign = self.callsign_of(client);
                    tracing::info!(callsign = %callsign, tg, "talker stop");

                    self.broadcast_msg(
                        &Message::TalkerStop {
                            tg,
                            callsign: callsign.clone(),
                        },
                        &Filter::v2_clients().and(Filter::Tg(tg).or(Filter::TgMonitor(tg))),
                    );
                    if tg == self.cfg.tg_for_v1_clients {
                        self.broadcast_msg(
                            &Message::TalkerStopV1 { callsign },
                            &Filter::v1_clients(),
                        );
                    }
                    // Remaining members reset their jitter buffers
                    self.broadcast_udp(
                        &UdpMsg::FlushSamples,
                        &Filter::Tg(tg).and(Filter::Except(client)),
                    );
                }
                TalkerEvent::Started { tg, client } => {
                    let callsign = self.callsign_of(client);
                    tracing::info!(callsign = %callsign, tg, "talker start");

                    self.broadcast_msg(
                        &Message::TalkerStart {
                            tg,
                            callsign: callsign.clone(),
                        },
                        &Filter::v2_clients().and(Filter::Tg(tg).or(Filter::TgMonitor(tg))),
                    );
                    if tg == self.cfg.tg_for_v1_clients {
                        self.broadcast_msg(
                            &Message::TalkerStartV1 { callsign },
                            &Filter::v1_clients(),
                        );
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // QSY
    // ------------------------------------------------------------------

    fn request_qsy(&mut self, client_id: u16, mut tg: u32) {
        let current_tg = self.tgs.tg_of(client_id);
        if current_tg == 0 {
            tracing::info!(
                callsign = %self.callsign_of(client_id),
                "cannot request QSY while not in a talkgroup"
            );
            return;
        }
        if tg == 0 {
            match self.next_random_qsy_tg() {
                Some(free) => tg = free,
                None => return,
            }
        }
        tracing::info!(
            callsign = %self.callsign_of(client_id),
            from_tg = current_tg,
            to_tg = tg,
            "QSY requested"
        );
        self.broadcast_msg(
            &Message::RequestQsy { tg },
            &Filter::v2_clients()
                .and(Filter::Tg(current_tg))
                .and(Filter::Except(client_id)),
        );
    }

    fn request_auto_qsy(&mut self, from_tg: u32) {
        let Some(tg) = self.next_random_qsy_tg() else {
            return;
        };
        tracing::info!(from_tg, to_tg = tg, "auto QSY");
        self.broadcast_msg(
            &Message::RequestQsy { tg },
            &Filter::v2_clients().and(Filter::Tg(from_tg)),
        );
    }

    /// Rotate the cursor through the configured range and return the
    /// first talkgroup with no members
    fn next_random_qsy_tg(&mut self) -> Option<u32> {
        let Some((lo, hi)) = self.cfg.random_qsy_range else {
            tracing::warn!("random QSY requested but RANDOM_QSY_RANGE is empty");
            return None;
        };
        let range_size = hi - lo + 1;
        for _ in 0..range_size {
            self.random_qsy_cursor = if self.random_qsy_cursor < hi {
                self.random_qsy_cursor + 1
            } else {
                lo
            };
            if self.tgs.is_empty_tg(self.random_qsy_cursor) {
                return Some(self.random_qsy_cursor);
            }
        }
        tracing::warn!("no free talkgroup available for QSY");
        None
    }

    // ------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------

    /// Send a control message to every CONNECTED session the filter
    /// selects
    fn broadcast_msg(&self, msg: &Message, filter: &Filter) {
        for client in self.sessions.values() {
            if client.state() == ConState::Connected && filter.matches(client, &self.tgs) {
                client.send_msg(msg.clone());
            }
        }
    }

    /// Send a datagram to every CONNECTED session the filter selects.
    /// Sessions that have not learned their datagram endpoint yet are
    /// skipped.
    fn broadcast_udp(&mut self, msg: &UdpMsg, filter: &Filter) {
        let targets: Vec<u16> = self
            .sessions
            .values()
            .filter(|client| {
                client.state() == ConState::Connected && filter.matches(client, &self.tgs)
            })
            .map(Client::id)
            .collect();
        for id in targets {
            self.send_udp_to(id, msg);
        }
    }

    fn send_udp_to(&mut self, client_id: u16, msg: &UdpMsg) {
        let Some(client) = self.sessions.get_mut(&client_id) else {
            return;
        };
        let Some(addr) = client.udp_addr() else {
            return;
        };
        let seq = client.next_udp_tx_seq();
        let _ = self.udp_tx.send((addr, msg.encode(client_id, seq)));
    }

    fn callsign_of(&self, client_id: u16) -> String {
        self.sessions
            .get(&client_id)
            .map(|client| client.callsign().to_string())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    /// Apply one control-channel line. Only `CFG` is understood; only the
    /// squelch-timeout knobs take live effect.
    fn handle_command(&mut self, line: &str) -> Result<(), String> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("CFG") => {}
            Some(other) => {
                return Err(format!("Unknown command '{other}'. Valid commands are: CFG"));
            }
            None => return Err(format!("Invalid command line '{line}'")),
        }
        let (Some(section), Some(key), Some(value), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!(
                "Invalid command line '{line}'. Usage: CFG <section> <key> <value>"
            ));
        };

        match (section, key) {
            ("GLOBAL", "SQL_TIMEOUT") => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| format!("Illegal value '{value}' for GLOBAL/SQL_TIMEOUT"))?;
                self.cfg.sql_timeout = (secs > 0).then(|| std::time::Duration::from_secs(secs));
                self.tgs.set_sql_timeout(self.cfg.sql_timeout);
                tracing::info!(secs, "SQL_TIMEOUT updated");
                Ok(())
            }
            ("GLOBAL", "SQL_TIMEOUT_BLOCKTIME") => {
                let secs: u64 = value.parse().map_err(|_| {
                    format!("Illegal value '{value}' for GLOBAL/SQL_TIMEOUT_BLOCKTIME")
                })?;
                self.cfg.sql_timeout_blocktime = std::time::Duration::from_secs(secs);
                tracing::info!(secs, "SQL_TIMEOUT_BLOCKTIME updated");
                Ok(())
            }
            _ => Err(format!("Unsupported configuration variable {section}/{key}")),
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Snapshot of all authenticated nodes for the status endpoint
    fn status_json(&self) -> serde_json::Value {
        let mut nodes = serde_json::Map::new();
        for client in self.sessions.values() {
            if client.state() != ConState::Connected || client.callsign().is_empty() {
                continue;
            }
            let mut node = match client.node_info() {
                serde_json::Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            };
            node.insert(
                "protoVer".into(),
                serde_json::json!({
                    "majorVer": client.proto_ver().major,
                    "minorVer": client.proto_ver().minor,
                }),
            );

            let mut tg = self.tgs.tg_of(client.id());
            if !self.tgs.show_activity(tg) {
                tg = 0;
            }
            node.insert("tg".into(), tg.into());
            node.insert("restrictedTG".into(), self.tgs.is_restricted(tg).into());
            node.insert(
                "monitoredTGs".into(),
                client.monitored_tgs().iter().copied().collect::<Vec<u32>>().into(),
            );
            let is_talker = tg != 0 && self.tgs.talker_of(tg) == Some(client.id());
            node.insert("isTalker".into(), is_talker.into());

            patch_qth(&mut node, client, is_talker);
            nodes.insert(client.callsign().to_string(), node.into());
        }
        serde_json::json!({ "nodes": nodes })
    }
}

/// Fill live receiver telemetry and transmitter state into the node's
/// own `qth` descriptor
fn patch_qth(node: &mut serde_json::Map<String, serde_json::Value>, client: &Client, is_talker: bool) {
    let Some(serde_json::Value::Array(qths)) = node.get_mut("qth") else {
        return;
    };
    for qth in qths {
        if let Some(serde_json::Value::Object(rxs)) = qth.get_mut("rx") {
            for (id, rx) in rxs {
                let mut chars = id.chars();
                let (Some(rx_id), None) = (chars.next(), chars.next()) else {
                    continue;
                };
                let Some(state) = client.rx_state().get(&rx_id) else {
                    continue;
                };
                if let serde_json::Value::Object(rx) = rx {
                    rx.insert("siglev".into(), state.siglev.into());
                    rx.insert("enabled".into(), state.enabled.into());
                    rx.insert("sql_open".into(), state.sql_open.into());
                    rx.insert("active".into(), state.active.into());
                }
            }
        }
        if let Some(serde_json::Value::Object(txs)) = qth.get_mut("tx") {
            for tx in txs.values_mut() {
                if let serde_json::Value::Object(tx) = tx {
                    tx.insert("transmit".into(), is_talker.into());
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
