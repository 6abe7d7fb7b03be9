//! Routing of queued inbound messages to the protocol handlers.

use crate::id::PeerId;
use crate::membership_list::MergeOutcome;
use crate::message::{Message, WireEntry};
use crate::network::InboundMessage;
use crate::node::{MembershipState, Node};
use crate::Tick;

impl Node {
    /// Handles every message in the inbox, oldest first. Returns how many were taken.
    pub fn check_messages(&mut self, now: Tick) -> usize {
        let mut handled = 0;
        while let Some(inbound) = self.inbox.pop_front() {
            self.handle(now, inbound);
            handled += 1;
        }
        return handled;
    }

    fn handle(&mut self, now: Tick, inbound: InboundMessage) {
        self.stats.messages_received += 1;
        let message = match Message::decode(inbound.content) {
            Ok(message) => message,
            Err(err) => {
                self.stats.decode_failures += 1;
                log::warn!("{} dropping malformed msg from {}: {}", self.me, inbound.sender_address, err);
                return;
            }
        };
        log::debug!("{} receive {} from {}", self.me, message.kind(), inbound.sender_address);
        match message {
            Message::JoinRequest { peer, heartbeat } => self.on_join_request(now, peer, heartbeat),
            Message::JoinReply { entries } => self.on_join_reply(now, entries),
            Message::Heartbeat { entries } => self.on_heartbeat(now, entries),
        }
    }

    fn on_join_request(&mut self, now: Tick, requester: PeerId, heartbeat: u64) {
        if !self.is_active() {
            self.stats.messages_ignored += 1;
            log::debug!("{} not in the group yet, ignoring join request of {}", self.me, requester);
            return;
        }
        if self.config.admission.admit(&mut self.rng) {
            let outcome = self.members.merge_entry(WireEntry::new(requester, heartbeat), now);
            if outcome == MergeOutcome::Inserted {
                self.audit.record_add(self.me, requester);
            }
        } else {
            log::info!("{} declined to admit {}", self.me, requester);
        }
        let reply = Message::JoinReply { entries: self.members.snapshot() };
        self.send(requester, &reply);
    }

    fn on_join_reply(&mut self, now: Tick, entries: Vec<WireEntry>) {
        if self.state != MembershipState::Joining {
            self.stats.messages_ignored += 1;
            log::debug!("{} ignoring join reply in state {:?}", self.me, self.state);
            return;
        }
        let me = self.me;
        let audit = &self.audit;
        self.members.replace_with(entries, now, |entry| audit.record_add(me, entry.peer));
        self.touch_self(now);
        self.state = MembershipState::Active;
        log::info!("{} joined the group with {} members at {}", self.me, self.members.len(), now);
    }

    fn on_heartbeat(&mut self, now: Tick, entries: Vec<WireEntry>) {
        if !self.is_active() {
            self.stats.messages_ignored += 1;
            return;
        }
        for entry in entries {
            // only the owner advances its own row
            if entry.peer == self.me {
                continue;
            }
            if self.members.merge_entry(entry, now) == MergeOutcome::Inserted {
                self.audit.record_add(self.me, entry.peer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use crate::audit::{AuditKind, MemoryAuditLog};
    use crate::config::{AdmissionPolicy, Config};
    use crate::network::{InMemoryNetwork, NetworkClient, OutboundMessage};

    use super::*;

    fn node(network: &InMemoryNetwork, audit: &Arc<MemoryAuditLog>, id: u32, config: Config) -> Node {
        let peer = PeerId::new(id, 0);
        Node::new(peer, config, Box::new(network.attach(peer)), audit.clone()).with_seed(id as u64)
    }

    fn wire(id: u32, heartbeat: u64) -> WireEntry {
        WireEntry::new(PeerId::new(id, 0), heartbeat)
    }

    #[test]
    fn join_bootstrap() {
        let network = InMemoryNetwork::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let mut introducer = node(&network, &audit, 1, Config::default());
        let mut joiner = node(&network, &audit, 2, Config::default());
        introducer.start(0);
        joiner.start(0);
        //when
        introducer.receive();
        introducer.check_messages(1);
        joiner.receive();
        joiner.check_messages(2);
        //then
        let both = vec![PeerId::new(1, 0), PeerId::new(2, 0)];
        assert_eq!(both, introducer.members().peers());
        assert_eq!(Some(1), introducer.members().get(&PeerId::new(2, 0)).map(|entry| entry.last_update));
        assert_eq!(MembershipState::Active, joiner.state());
        assert_eq!(both, joiner.members().peers());
        assert!(joiner.members().iter().all(|entry| entry.last_update == 2 && entry.heartbeat == 0));
        assert_eq!(1, audit.count(AuditKind::Added, PeerId::new(1, 0), PeerId::new(2, 0)));
        assert_eq!(1, audit.count(AuditKind::Added, PeerId::new(2, 0), PeerId::new(1, 0)));
        assert_eq!(1, audit.count(AuditKind::Added, PeerId::new(2, 0), PeerId::new(2, 0)));
    }

    #[test]
    fn rejected_joiner_still_gets_a_reply() {
        let network = InMemoryNetwork::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let stingy = Config { admission: AdmissionPolicy::Random { probability: 0.0 }, ..Config::default() };
        let mut introducer = node(&network, &audit, 1, stingy);
        let mut joiner = node(&network, &audit, 2, Config::default());
        introducer.start(0);
        joiner.start(0);
        //when
        introducer.step(1);
        joiner.receive();
        joiner.check_messages(2);
        //then
        assert_eq!(vec![PeerId::new(1, 0)], introducer.members().peers());
        assert!(joiner.is_active());
        assert!(joiner.members().contains(&PeerId::new(2, 0)));
    }

    #[test]
    fn join_request_ignored_until_active() {
        let network = InMemoryNetwork::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let mut joiner = node(&network, &audit, 2, Config::default());
        let other = network.attach(PeerId::new(3, 0));
        network.attach(PeerId::new(1, 0));
        joiner.start(0);
        let request = Message::JoinRequest { peer: PeerId::new(3, 0), heartbeat: 0 };
        other.send(OutboundMessage { content: request.encode(), target_address: PeerId::new(2, 0) }).unwrap();
        let beat = Message::Heartbeat { entries: vec![wire(3, 4)] };
        other.send(OutboundMessage { content: beat.encode(), target_address: PeerId::new(2, 0) }).unwrap();
        //when
        joiner.step(1);
        //then
        assert!(joiner.members().is_empty());
        assert_eq!(2, joiner.stats().messages_ignored);
    }

    #[test]
    fn heartbeat_merges_entries_except_self() {
        let network = InMemoryNetwork::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let mut introducer = node(&network, &audit, 1, Config::default());
        let mut other = network.attach(PeerId::new(2, 0));
        introducer.start(0);
        let beat = Message::Heartbeat { entries: vec![wire(1, 99), wire(2, 4), wire(3, 1)] };
        other.send(OutboundMessage { content: beat.encode(), target_address: PeerId::new(1, 0) }).unwrap();
        //when
        introducer.receive();
        introducer.check_messages(5);
        //then
        assert_eq!(0, introducer.members().get(&PeerId::new(1, 0)).unwrap().heartbeat);
        assert_eq!(4, introducer.members().get(&PeerId::new(2, 0)).unwrap().heartbeat);
        assert_eq!(5, introducer.members().get(&PeerId::new(3, 0)).unwrap().last_update);
        assert!(other.drain().is_empty());
    }

    #[test]
    fn malformed_messages_are_dropped() {
        let network = InMemoryNetwork::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let mut introducer = node(&network, &audit, 1, Config::default());
        let other = network.attach(PeerId::new(2, 0));
        introducer.start(0);
        let before = introducer.members().snapshot();
        let good = Message::Heartbeat { entries: vec![wire(2, 1)] }.encode();
        for content in [Bytes::new(), Bytes::from_static(&[9, 1]), good.slice(..good.len() - 1)] {
            other.send(OutboundMessage { content, target_address: PeerId::new(1, 0) }).unwrap();
        }
        //when
        introducer.receive();
        let handled = introducer.check_messages(1);
        //then
        assert_eq!(3, handled);
        assert_eq!(3, introducer.stats().decode_failures);
        assert_eq!(before, introducer.members().snapshot());
    }
}
