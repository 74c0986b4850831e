use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::registry::{roster_of, Connection, Member, Registry};
use crate::protocol::{Frame, Message, MessageType};

/// Default depth of each connection's outbound queue.
pub const SEND_BUF: usize = 256;

/// Broadcast engine: owns the registry, interprets inbound events and fans them out.
pub struct Hub {
    registry: Registry,
    next_id: AtomicU64,
    send_buffer: usize,
}

impl Hub {
    pub fn new(send_buffer: usize) -> Self {
        Self {
            registry: Registry::new(),
            next_id: AtomicU64::new(1),
            send_buffer: send_buffer.max(1),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Create a connection, register it and hand back the receiving end of its
    /// outbound queue for the write pump.
    pub fn connect(&self) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.send_buffer);
        let connection = Connection::new(id, tx);
        self.registry.add(connection.clone());
        info!(conn_id = id, total = self.registry.len(), "+client");
        (connection, rx)
    }

    /// Handle one decoded inbound event from `connection`.
    pub fn dispatch(&self, connection: &Connection, msg: Message) {
        match msg.msg_type {
            MessageType::Join => match msg.user {
                Some(user) => {
                    debug!(conn_id = connection.id(), user = %user, "join");
                    if self.registry.set_name(connection.id(), user) {
                        self.broadcast_roster();
                    }
                }
                None => debug!(conn_id = connection.id(), "join without user ignored"),
            },
            MessageType::Message => match (msg.user, msg.text) {
                (Some(user), Some(text)) => {
                    self.broadcast(&Message::chat(user, text));
                }
                _ => debug!(conn_id = connection.id(), "incomplete message ignored"),
            },
            MessageType::Typing => match msg.user {
                Some(user) => {
                    self.broadcast(&Message::typing(user, msg.text));
                }
                None => debug!(conn_id = connection.id(), "typing without user ignored"),
            },
            MessageType::Users | MessageType::Unknown => {
                debug!(conn_id = connection.id(), kind = ?msg.msg_type, "event ignored");
            }
        }
    }

    /// Deliver `msg` to every registered connection, evicting any whose write fails.
    /// Returns the number of successful deliveries.
    pub fn broadcast(&self, msg: &Message) -> usize {
        let frame = match msg.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode event");
                return 0;
            }
        };
        self.fan_out(frame, &self.registry.snapshot())
    }

    /// Compute the roster from a fresh snapshot and send it to everyone in it.
    pub fn broadcast_roster(&self) -> usize {
        let members = self.registry.snapshot();
        let users = roster_of(&members);
        debug!(users = users.len(), recipients = members.len(), "roster");
        match Message::users(users).encode() {
            Ok(frame) => self.fan_out(frame, &members),
            Err(e) => {
                warn!(error = %e, "failed to encode roster");
                0
            }
        }
    }

    pub fn roster(&self) -> Vec<String> {
        self.registry.roster()
    }

    fn fan_out(&self, frame: Frame, members: &[Member]) -> usize {
        let mut delivered = 0;
        for member in members {
            match member.connection.deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        conn_id = member.connection.id(),
                        user = %member.name,
                        error = %e,
                        "dropping client"
                    );
                    self.evict(&member.connection);
                }
            }
        }
        delivered
    }

    fn evict(&self, connection: &Connection) {
        self.registry.remove(connection.id());
        connection.close();
    }

    /// Teardown for a connection whose serving task is finishing: remove, close,
    /// then tell everyone left. Runs at most once per connection.
    pub fn disconnect(&self, connection: &Connection) {
        if !connection.begin_teardown() {
            return;
        }
        let removed = self.registry.remove(connection.id());
        connection.close();
        info!(
            conn_id = connection.id(),
            user = removed.as_ref().map_or("", |m| m.name.as_str()),
            total = self.registry.len(),
            "-client"
        );
        self.broadcast_roster();
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(SEND_BUF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn recv(rx: &mut mpsc::Receiver<Frame>) -> Option<Message> {
        rx.try_recv()
            .ok()
            .map(|frame| Message::decode(frame.as_bytes()).unwrap())
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Message> {
        std::iter::from_fn(|| recv(rx)).collect()
    }

    fn rosters(msgs: &[Message]) -> Vec<Vec<String>> {
        msgs.iter()
            .filter(|m| m.msg_type == MessageType::Users)
            .map(|m| m.users.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn connect_registers_unnamed() {
        let hub = Hub::default();
        let (a, _ra) = hub.connect();
        let (b, _rb) = hub.connect();
        assert_ne!(a.id(), b.id());
        assert_eq!(hub.registry().len(), 2);
        assert!(hub.roster().is_empty());
    }

    #[test]
    fn join_broadcasts_roster_to_everyone() {
        let hub = Hub::default();
        let (a, mut ra) = hub.connect();
        let (_b, mut rb) = hub.connect();

        hub.dispatch(&a, Message::join("ann"));

        let expected = Message::users(vec!["ann".into()]);
        assert_eq!(recv(&mut ra), Some(expected.clone()));
        assert_eq!(recv(&mut rb), Some(expected));
    }

    #[test]
    fn rejoin_with_same_name_does_not_duplicate() {
        let hub = Hub::default();
        let (a, mut ra) = hub.connect();
        let (b, _rb) = hub.connect();

        hub.dispatch(&a, Message::join("ann"));
        hub.dispatch(&b, Message::join("bob"));
        hub.dispatch(&a, Message::join("ann"));

        let last = rosters(&drain(&mut ra)).pop().unwrap();
        assert_eq!(last.len(), 2);
        let names: HashSet<_> = last.into_iter().collect();
        assert_eq!(names, HashSet::from(["ann".to_string(), "bob".to_string()]));
    }

    #[test]
    fn rejoin_with_new_name_replaces_old() {
        let hub = Hub::default();
        let (a, mut ra) = hub.connect();
        hub.dispatch(&a, Message::join("ann"));
        hub.dispatch(&a, Message::join("anna"));

        let all = rosters(&drain(&mut ra));
        assert_eq!(all, vec![vec!["ann".to_string()], vec!["anna".to_string()]]);
    }

    #[test]
    fn message_reaches_everyone_including_sender() {
        let hub = Hub::default();
        let (a, mut ra) = hub.connect();
        let (_b, mut rb) = hub.connect();
        let (_c, mut rc) = hub.connect();

        hub.dispatch(&a, Message::chat("A", "hi"));

        let expected = Message::chat("A", "hi");
        for rx in [&mut ra, &mut rb, &mut rc] {
            assert_eq!(drain(rx), vec![expected.clone()]);
        }
    }

    #[test]
    fn message_is_forwarded_without_join() {
        let hub = Hub::default();
        let (a, mut ra) = hub.connect();
        hub.dispatch(&a, Message::chat("nobody", "still delivered"));
        assert_eq!(recv(&mut ra), Some(Message::chat("nobody", "still delivered")));
        assert!(hub.roster().is_empty());
    }

    #[test]
    fn typing_is_fanned_out_without_state_change() {
        let hub = Hub::default();
        let (a, mut ra) = hub.connect();
        let (_b, mut rb) = hub.connect();
        hub.dispatch(&a, Message::typing("ann", None));

        assert_eq!(recv(&mut ra), Some(Message::typing("ann", None)));
        assert_eq!(recv(&mut rb), Some(Message::typing("ann", None)));
        assert_eq!(hub.registry().name_of(a.id()).as_deref(), Some(""));
    }

    #[test]
    fn unknown_and_incomplete_events_are_ignored() {
        let hub = Hub::default();
        let (a, mut ra) = hub.connect();
        let (_b, mut rb) = hub.connect();

        hub.dispatch(&a, Message::decode(br#"{"type":"ping"}"#).unwrap());
        hub.dispatch(&a, Message::decode(br#"{"type":"message","user":"A"}"#).unwrap());
        hub.dispatch(&a, Message::decode(br#"{"type":"join"}"#).unwrap());
        hub.dispatch(&a, Message::users(vec!["forged".into()]));

        assert!(drain(&mut ra).is_empty());
        assert!(drain(&mut rb).is_empty());
        assert!(!a.is_closed());
        assert_eq!(hub.registry().len(), 2);
    }

    #[test]
    fn failed_write_evicts_only_the_failing_peer() {
        let hub = Hub::default();
        let (a, mut ra) = hub.connect();
        let (b, rb) = hub.connect();
        let (c, mut rc) = hub.connect();
        hub.dispatch(&a, Message::join("A"));
        hub.dispatch(&b, Message::join("B"));
        hub.dispatch(&c, Message::join("C"));
        drain(&mut ra);
        drain(&mut rc);

        drop(rb);
        let delivered = hub.broadcast(&Message::chat("A", "hi"));

        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut rc), vec![Message::chat("A", "hi")]);
        assert!(!hub.registry().contains(b.id()));
        assert!(b.is_closed());

        hub.broadcast_roster();
        let roster = rosters(&drain(&mut rc)).pop().unwrap();
        assert_eq!(roster, vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn slow_peer_is_evicted_when_queue_fills() {
        let hub = Hub::new(2);
        let (a, mut ra) = hub.connect();
        let (slow, _slow_rx) = hub.connect();

        for i in 0..3 {
            hub.dispatch(&a, Message::chat("A", format!("m{i}")));
            drain(&mut ra);
        }

        assert!(!hub.registry().contains(slow.id()));
        assert!(slow.is_closed());
        assert!(hub.registry().contains(a.id()));
    }

    #[test]
    fn disconnect_sends_one_roster_without_the_leaver() {
        let hub = Hub::default();
        let (a, mut ra) = hub.connect();
        let (b, mut rb) = hub.connect();
        let (c, mut rc) = hub.connect();
        hub.dispatch(&a, Message::join("ann"));
        hub.dispatch(&b, Message::join("bob"));
        hub.dispatch(&c, Message::join("cat"));
        drain(&mut ra);
        drain(&mut rb);
        drain(&mut rc);

        hub.disconnect(&b);
        hub.disconnect(&b);

        for rx in [&mut ra, &mut rc] {
            let got = rosters(&drain(rx));
            assert_eq!(got, vec![vec!["ann".to_string(), "cat".to_string()]]);
        }
        assert!(drain(&mut rb).is_empty());
        assert!(b.is_closed());
        assert_eq!(hub.registry().len(), 2);
    }

    #[test]
    fn disconnect_after_eviction_still_updates_roster() {
        let hub = Hub::default();
        let (a, mut ra) = hub.connect();
        let (b, rb) = hub.connect();
        hub.dispatch(&b, Message::join("bob"));
        drain(&mut ra);

        drop(rb);
        hub.dispatch(&a, Message::chat("A", "hi"));
        hub.disconnect(&b);

        let msgs = drain(&mut ra);
        assert_eq!(msgs[0], Message::chat("A", "hi"));
        assert_eq!(rosters(&msgs), vec![Vec::<String>::new()]);
    }
}
