//! Per-peer session state
//!
//! A [`Client`] is created when a stream connection is accepted and lives
//! until the deferred reap after disconnect. It tracks the handshake
//! state machine, the learned datagram endpoint, datagram sequence
//! counters, talkgroup subscriptions, per-receiver telemetry and the
//! squelch-timeout blocking penalty.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tokio::sync::mpsc;

use crate::protocol::constants::AUTH_CHALLENGE_LEN;
use crate::protocol::{Message, ProtoVer};

type HmacSha256 = Hmac<Sha256>;

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConState {
    /// Waiting for the node to announce its protocol version
    ExpectProtoVer,
    /// Client-side only: waiting for the server's challenge
    ExpectAuthChallenge,
    /// Challenge sent, waiting for the signed response
    ExpectAuthResponse,
    /// Authenticated and in normal operation
    Connected,
    /// Tearing down; excluded from all broadcasts, reaped on a later tick
    Disconnected,
}

/// Latest signal report for one receiver
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RxState {
    pub siglev: f32,
    pub enabled: bool,
    pub sql_open: bool,
    pub active: bool,
}

/// Result of feeding one inbound datagram sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// In the forward window; `lost` frames were skipped
    Accepted { lost: u16 },
    /// Behind the expected counter, drop the datagram
    OutOfOrder,
}

/// What the handshake machine wants done after a control message
#[derive(Debug)]
pub enum HandshakeStep {
    /// Send these replies and keep going
    Reply(Vec<Message>),
    /// Authentication completed; send the replies, then announce the node
    Authenticated(Vec<Message>),
    /// Send the error reply and disconnect the session
    Reject { reply: Message, reason: String },
}

/// One node's server-side session
#[derive(Debug)]
pub struct Client {
    id: u16,
    stream_addr: SocketAddr,
    /// Learned from the first datagram; 0 until then
    udp_port: u16,
    state: ConState,
    proto_ver: ProtoVer,
    callsign: String,
    challenge: [u8; AUTH_CHALLENGE_LEN],
    /// Self-description reported by the node, echoed in status output
    node_info: serde_json::Value,
    monitored_tgs: BTreeSet<u32>,
    rx_state: HashMap<char, RxState>,
    next_udp_rx_seq: u16,
    next_udp_tx_seq: u16,
    blocked_until: Option<Instant>,
    /// Latched once the voice gate confirms speech for this talk session
    pub voice_detected: bool,
    tx: Option<mpsc::UnboundedSender<Message>>,
}

impl Client {
    pub fn new(id: u16, stream_addr: SocketAddr, tx: mpsc::UnboundedSender<Message>) -> Self {
        let mut challenge = [0u8; AUTH_CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut challenge);
        Self {
            id,
            stream_addr,
            udp_port: 0,
            state: ConState::ExpectProtoVer,
            proto_ver: ProtoVer::new(0, 0),
            callsign: String::new(),
            challenge,
            node_info: serde_json::Value::Null,
            monitored_tgs: BTreeSet::new(),
            rx_state: HashMap::new(),
            next_udp_rx_seq: 0,
            next_udp_tx_seq: 0,
            blocked_until: None,
            voice_detected: false,
            tx: Some(tx),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn state(&self) -> ConState {
        self.state
    }

    pub fn proto_ver(&self) -> ProtoVer {
        self.proto_ver
    }

    /// Empty until authentication completes
    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn stream_addr(&self) -> SocketAddr {
        self.stream_addr
    }

    pub fn remote_udp_port(&self) -> u16 {
        self.udp_port
    }

    pub fn set_remote_udp_port(&mut self, port: u16) {
        self.udp_port = port;
    }

    /// Datagram destination, once the endpoint has been learned
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        (self.udp_port != 0).then(|| SocketAddr::new(self.stream_addr.ip(), self.udp_port))
    }

    pub fn monitored_tgs(&self) -> &BTreeSet<u32> {
        &self.monitored_tgs
    }

    pub fn set_monitored_tgs(&mut self, tgs: impl IntoIterator<Item = u32>) {
        self.monitored_tgs = tgs.into_iter().filter(|tg| *tg != 0).collect();
    }

    pub fn node_info(&self) -> &serde_json::Value {
        &self.node_info
    }

    pub fn set_node_info(&mut self, info: serde_json::Value) {
        self.node_info = info;
    }

    pub fn rx_state(&self) -> &HashMap<char, RxState> {
        &self.rx_state
    }

    pub fn update_rx(&mut self, id: char, state: RxState) {
        self.rx_state.insert(id, state);
    }

    /// Queue a control message for the writer task. Silently dropped once
    /// the session is tearing down.
    pub fn send_msg(&self, msg: Message) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(msg);
        }
    }

    /// Mark the session disconnected and close the outbound channel,
    /// which makes the writer task shut the stream down.
    pub fn mark_disconnected(&mut self) {
        self.state = ConState::Disconnected;
        self.tx = None;
    }

    /// Next outbound datagram sequence number
    pub fn next_udp_tx_seq(&mut self) -> u16 {
        let seq = self.next_udp_tx_seq;
        self.next_udp_tx_seq = self.next_udp_tx_seq.wrapping_add(1);
        seq
    }

    /// Apply the half-range rule to an inbound sequence number. The
    /// expected counter only advances on accept.
    pub fn check_udp_rx_seq(&mut self, seq: u16) -> SeqCheck {
        let diff = seq.wrapping_sub(self.next_udp_rx_seq);
        if diff > 0x7fff {
            return SeqCheck::OutOfOrder;
        }
        self.next_udp_rx_seq = seq.wrapping_add(1);
        SeqCheck::Accepted { lost: diff }
    }

    pub fn expected_udp_rx_seq(&self) -> u16 {
        self.next_udp_rx_seq
    }

    /// Apply the squelch-timeout penalty
    pub fn block_for(&mut self, duration: Duration, now: Instant) {
        if !duration.is_zero() {
            self.blocked_until = Some(now + duration);
        }
    }

    pub fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    /// Drive the handshake with one inbound control message. Only valid
    /// while the session is not yet connected.
    pub fn handle_handshake_msg(
        &mut self,
        msg: &Message,
        users: &HashMap<String, String>,
    ) -> HandshakeStep {
        match (self.state, msg) {
            (ConState::ExpectProtoVer, Message::ProtoVer(ver)) => {
                if !ver.is_supported() {
                    return HandshakeStep::Reject {
                        reply: Message::Error {
                            message: format!("unsupported protocol version {ver}"),
                        },
                        reason: format!("unsupported protocol version {ver}"),
                    };
                }
                self.proto_ver = *ver;
                self.state = ConState::ExpectAuthResponse;
                HandshakeStep::Reply(vec![Message::AuthChallenge {
                    challenge: self.challenge.to_vec(),
                }])
            }
            (ConState::ExpectAuthResponse, Message::AuthResponse { callsign, digest }) => {
                let Some(secret) = users.get(callsign) else {
                    return self.reject_auth(callsign);
                };
                if !self.verify_digest(secret, digest) {
                    return self.reject_auth(callsign);
                }
                self.callsign = callsign.clone();
                self.state = ConState::Connected;
                HandshakeStep::Authenticated(vec![
                    Message::AuthOk,
                    Message::ServerInfo { client_id: self.id },
                ])
            }
            (_, other) => HandshakeStep::Reject {
                reply: Message::Error {
                    message: "protocol error".into(),
                },
                reason: format!("unexpected message type {} during handshake", other.msg_type()),
            },
        }
    }

    fn reject_auth(&self, callsign: &str) -> HandshakeStep {
        HandshakeStep::Reject {
            reply: Message::Error {
                message: "access denied".into(),
            },
            reason: format!("access denied for callsign {callsign}"),
        }
    }

    fn verify_digest(&self, secret: &str, digest: &[u8]) -> bool {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("any key size works");
        mac.update(&self.challenge);
        mac.verify_slice(digest).is_ok()
    }
}

/// Compute the response digest for a challenge. Shared with tests and
/// client implementations.
pub fn auth_digest(secret: &str, challenge: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("any key size works");
    mac.update(challenge);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> (Client, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "10.0.0.1:40000".parse().unwrap();
        (Client::new(1, addr, tx), rx)
    }

    fn users() -> HashMap<String, String> {
        HashMap::from([("SM0XYZ".to_string(), "hunter2".to_string())])
    }

    #[test]
    fn handshake_happy_path() {
        let (mut client, _rx) = test_client();
        assert_eq!(client.state(), ConState::ExpectProtoVer);

        let step =
            client.handle_handshake_msg(&Message::ProtoVer(ProtoVer::new(2, 0)), &users());
        let challenge = match step {
            HandshakeStep::Reply(msgs) => match &msgs[0] {
                Message::AuthChallenge { challenge } => challenge.clone(),
                other => panic!("expected challenge, got {other:?}"),
            },
            other => panic!("expected reply, got {other:?}"),
        };
        assert_eq!(client.state(), ConState::ExpectAuthResponse);

        let response = Message::AuthResponse {
            callsign: "SM0XYZ".into(),
            digest: auth_digest("hunter2", &challenge),
        };
        match client.handle_handshake_msg(&response, &users()) {
            HandshakeStep::Authenticated(msgs) => {
                assert_eq!(msgs[0], Message::AuthOk);
                assert_eq!(msgs[1], Message::ServerInfo { client_id: 1 });
            }
            other => panic!("expected authentication, got {other:?}"),
        }
        assert_eq!(client.state(), ConState::Connected);
        assert_eq!(client.callsign(), "SM0XYZ");
    }

    #[test]
    fn bad_digest_is_rejected() {
        let (mut client, _rx) = test_client();
        client.handle_handshake_msg(&Message::ProtoVer(ProtoVer::new(2, 0)), &users());

        let response = Message::AuthResponse {
            callsign: "SM0XYZ".into(),
            digest: vec![0u8; 32],
        };
        assert!(matches!(
            client.handle_handshake_msg(&response, &users()),
            HandshakeStep::Reject { .. }
        ));
    }

    #[test]
    fn unknown_callsign_is_rejected() {
        let (mut client, _rx) = test_client();
        let step =
            client.handle_handshake_msg(&Message::ProtoVer(ProtoVer::new(2, 0)), &users());
        let challenge = match step {
            HandshakeStep::Reply(msgs) => match &msgs[0] {
                Message::AuthChallenge { challenge } => challenge.clone(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        let response = Message::AuthResponse {
            callsign: "PIRATE".into(),
            digest: auth_digest("hunter2", &challenge),
        };
        assert!(matches!(
            client.handle_handshake_msg(&response, &users()),
            HandshakeStep::Reject { .. }
        ));
    }

    #[test]
    fn unexpected_message_rejects() {
        let (mut client, _rx) = test_client();
        assert!(matches!(
            client.handle_handshake_msg(&Message::SelectTg { tg: 1 }, &users()),
            HandshakeStep::Reject { .. }
        ));
    }

    #[test]
    fn unsupported_version_rejects() {
        let (mut client, _rx) = test_client();
        assert!(matches!(
            client.handle_handshake_msg(&Message::ProtoVer(ProtoVer::new(3, 0)), &users()),
            HandshakeStep::Reject { .. }
        ));
    }

    #[test]
    fn sequence_window_accepts_forward_half_range() {
        let (mut client, _rx) = test_client();

        assert_eq!(client.check_udp_rx_seq(0), SeqCheck::Accepted { lost: 0 });
        assert_eq!(client.check_udp_rx_seq(1), SeqCheck::Accepted { lost: 0 });
        // Gap of three frames
        assert_eq!(client.check_udp_rx_seq(5), SeqCheck::Accepted { lost: 3 });
        // Behind the counter now
        assert_eq!(client.check_udp_rx_seq(4), SeqCheck::OutOfOrder);
        // Expected counter did not move on the drop
        assert_eq!(client.expected_udp_rx_seq(), 6);
    }

    #[test]
    fn sequence_window_wraps() {
        let (mut client, _rx) = test_client();
        assert_eq!(
            client.check_udp_rx_seq(0x7fff),
            SeqCheck::Accepted { lost: 0x7fff }
        );
        assert_eq!(
            client.check_udp_rx_seq(0xfffe),
            SeqCheck::Accepted { lost: 0x7ffe }
        );
        assert_eq!(client.check_udp_rx_seq(0xffff), SeqCheck::Accepted { lost: 0 });
        // The expected counter wraps past zero
        assert_eq!(client.check_udp_rx_seq(0x0001), SeqCheck::Accepted { lost: 1 });
        assert_eq!(client.expected_udp_rx_seq(), 2);
        assert_eq!(client.check_udp_rx_seq(0xffff), SeqCheck::OutOfOrder);
    }

    #[test]
    fn sequence_acceptance_matches_window_model() {
        // The set of accepted datagrams must be exactly those whose seq
        // lies in [expected, expected + 0x8000) mod 2^16.
        let (mut client, _rx) = test_client();
        let mut state = 0x9af3u32;
        for _ in 0..10_000 {
            // xorshift, deterministic
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let seq = (state & 0xffff) as u16;
            let expected = client.expected_udp_rx_seq();
            let in_window = seq.wrapping_sub(expected) < 0x8000;
            match client.check_udp_rx_seq(seq) {
                SeqCheck::Accepted { .. } => {
                    assert!(in_window);
                    assert_eq!(client.expected_udp_rx_seq(), seq.wrapping_add(1));
                }
                SeqCheck::OutOfOrder => {
                    assert!(!in_window);
                    assert_eq!(client.expected_udp_rx_seq(), expected);
                }
            }
        }
    }

    #[test]
    fn blocking_window() {
        let (mut client, _rx) = test_client();
        let now = Instant::now();
        assert!(!client.is_blocked(now));

        client.block_for(Duration::from_secs(5), now);
        assert!(client.is_blocked(now));
        assert!(client.is_blocked(now + Duration::from_secs(4)));
        assert!(!client.is_blocked(now + Duration::from_secs(5)));
    }

    #[test]
    fn zero_blocktime_never_blocks() {
        let (mut client, _rx) = test_client();
        let now = Instant::now();
        client.block_for(Duration::ZERO, now);
        assert!(!client.is_blocked(now));
    }

    #[test]
    fn monitored_tgs_drop_the_reserved_id() {
        let (mut client, _rx) = test_client();
        client.set_monitored_tgs([0, 91, 240]);
        assert_eq!(
            client.monitored_tgs().iter().copied().collect::<Vec<_>>(),
            vec![91, 240]
        );
    }
}
