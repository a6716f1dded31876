//! Broadcast filter predicates
//!
//! A [`Filter`] selects the subset of sessions a broadcast goes to. It is
//! a pure predicate evaluated at send time; the fan-out itself adds the
//! invariant that only CONNECTED sessions ever receive anything.
//!
//! Filters compose with [`and`](Filter::and), [`or`](Filter::or) and
//! [`negate`](Filter::negate).

use crate::protocol::ProtoVer;
use crate::registry::TgRegistry;
use crate::session::Client;

/// A composable predicate over sessions
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every session
    All,
    /// Matches every session except the given one
    Except(u16),
    /// Matches members of a talkgroup
    Tg(u32),
    /// Matches sessions monitoring a talkgroup for activity
    TgMonitor(u32),
    /// Matches sessions whose protocol version lies in the inclusive range
    ProtoVerRange(ProtoVer, ProtoVer),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// All protocol v1 sessions
    pub fn v1_clients() -> Filter {
        Filter::ProtoVerRange(ProtoVer::new(1, 0), ProtoVer::new(1, 999))
    }

    /// All protocol v2 sessions
    pub fn v2_clients() -> Filter {
        Filter::ProtoVerRange(ProtoVer::new(2, 0), ProtoVer::new(2, 999))
    }

    pub fn and(self, other: Filter) -> Filter {
        Filter::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Filter {
        Filter::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Filter {
        Filter::Not(Box::new(self))
    }

    /// Evaluate the predicate for one session
    pub fn matches(&self, client: &Client, tgs: &TgRegistry) -> bool {
        match self {
            Filter::All => true,
            Filter::Except(id) => client.id() != *id,
            Filter::Tg(tg) => *tg != 0 && tgs.tg_of(client.id()) == *tg,
            Filter::TgMonitor(tg) => client.monitored_tgs().contains(tg),
            Filter::ProtoVerRange(lo, hi) => {
                let ver = client.proto_ver();
                *lo <= ver && ver <= *hi
            }
            Filter::And(a, b) => a.matches(client, tgs) && b.matches(client, tgs),
            Filter::Or(a, b) => a.matches(client, tgs) || b.matches(client, tgs),
            Filter::Not(inner) => !inner.matches(client, tgs),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;

    use tokio::sync::mpsc;

    use super::*;
    use crate::protocol::Message;
    use crate::session::auth_digest;
    use crate::session::client::HandshakeStep;

    fn connected_client(id: u16, callsign: &str, ver: ProtoVer) -> Client {
        let (tx, _rx) = mpsc::unbounded_channel();
        // Leak the receiver so sends do not error; tests only inspect
        // filter decisions.
        std::mem::forget(_rx);
        let addr: SocketAddr = "10.0.0.1:40000".parse().unwrap();
        let mut client = Client::new(id, addr, tx);
        let users = HashMap::from([(callsign.to_string(), "secret".to_string())]);
        let step = client.handle_handshake_msg(&Message::ProtoVer(ver), &users);
        let challenge = match step {
            HandshakeStep::Reply(msgs) => match &msgs[0] {
                Message::AuthChallenge { challenge } => challenge.clone(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        client.handle_handshake_msg(
            &Message::AuthResponse {
                callsign: callsign.into(),
                digest: auth_digest("secret", &challenge),
            },
            &users,
        );
        client
    }

    fn registry() -> TgRegistry {
        TgRegistry::new(None, Default::default())
    }

    #[test]
    fn tg_filter_matches_members_only() {
        let mut tgs = registry();
        let a = connected_client(1, "A", ProtoVer::new(2, 0));
        let b = connected_client(2, "B", ProtoVer::new(2, 0));
        tgs.join(1, 91);

        assert!(Filter::Tg(91).matches(&a, &tgs));
        assert!(!Filter::Tg(91).matches(&b, &tgs));
        // The reserved id never matches, even for sessions outside any TG
        assert!(!Filter::Tg(0).matches(&b, &tgs));
    }

    #[test]
    fn monitor_filter_uses_subscriptions() {
        let tgs = registry();
        let mut a = connected_client(1, "A", ProtoVer::new(2, 0));
        a.set_monitored_tgs([91, 240]);

        assert!(Filter::TgMonitor(240).matches(&a, &tgs));
        assert!(!Filter::TgMonitor(9).matches(&a, &tgs));
    }

    #[test]
    fn proto_ver_range_is_inclusive() {
        let tgs = registry();
        let v1 = connected_client(1, "A", ProtoVer::new(1, 3));
        let v2 = connected_client(2, "B", ProtoVer::new(2, 0));

        assert!(Filter::v1_clients().matches(&v1, &tgs));
        assert!(!Filter::v1_clients().matches(&v2, &tgs));
        assert!(Filter::v2_clients().matches(&v2, &tgs));
    }

    #[test]
    fn combinators_compose() {
        let mut tgs = registry();
        let a = connected_client(1, "A", ProtoVer::new(2, 0));
        let b = connected_client(2, "B", ProtoVer::new(2, 0));
        tgs.join(1, 91);
        tgs.join(2, 91);

        let except_a = Filter::Tg(91).and(Filter::Except(1));
        assert!(!except_a.matches(&a, &tgs));
        assert!(except_a.matches(&b, &tgs));

        let either = Filter::Except(1).or(Filter::Tg(91));
        assert!(either.matches(&a, &tgs));

        assert!(Filter::Except(1).negate().matches(&a, &tgs));
        assert!(!Filter::Except(1).negate().matches(&b, &tgs));
    }
}
