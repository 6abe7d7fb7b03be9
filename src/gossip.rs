//! Periodic failure detection and heartbeat dissemination.

use crate::message::{Message, WireEntry};
use crate::node::Node;
use crate::Tick;

impl Node {
    /// Rows this node would gossip at `now`: every row not suspected, self included.
    pub fn gossip_payload(&self, now: Tick) -> Vec<WireEntry> {
        self.members.gossip_payload(now, self.config.fail_window)
    }

    pub(crate) fn node_loop_ops(&mut self, now: Tick) {
        self.heartbeat += 1;
        self.touch_self(now);
        self.remove_failed_members(now);

        let targets = self.members.get_k_random_members(self.config.fanout, self.me, &mut self.rng);
        if targets.is_empty() {
            log::trace!("{} knows nobody else, nothing to gossip", self.me);
            return;
        }
        let heartbeat = Message::Heartbeat { entries: self.gossip_payload(now) };
        let content = heartbeat.encode();
        for target in targets {
            self.send_bytes(target, heartbeat.kind(), content.clone());
        }
    }

    fn remove_failed_members(&mut self, now: Tick) {
        let me = self.me;
        let audit = &self.audit;
        let removed = self.members.prune_expired(now, self.config.fail_window, self.config.remove_window, |entry| {
            log::info!("{} removing {} silent since {}", me, entry.peer, entry.last_update);
            audit.record_remove(me, entry.peer);
        });
        if removed > 0 {
            log::debug!("{} removed {} members at {}", me, removed, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::audit::{AuditKind, MemoryAuditLog};
    use crate::config::Config;
    use crate::id::PeerId;
    use crate::network::{InMemoryNetwork, NetworkClient, OutboundMessage};

    use super::*;

    fn introducer(network: &InMemoryNetwork, audit: &Arc<MemoryAuditLog>) -> Node {
        let me = PeerId::new(1, 0);
        let mut node = Node::new(me, Config::default(), Box::new(network.attach(me)), audit.clone()).with_seed(1);
        node.start(0);
        return node;
    }

    fn beat(entries: Vec<WireEntry>) -> OutboundMessage {
        OutboundMessage { content: Message::Heartbeat { entries }.encode(), target_address: PeerId::new(1, 0) }
    }

    #[test]
    fn tick_advances_own_heartbeat() {
        let network = InMemoryNetwork::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let mut node = introducer(&network, &audit);
        //when
        for now in 1..=3 {
            node.step(now);
        }
        //then
        assert_eq!(3, node.heartbeat());
        assert_eq!(vec![WireEntry::new(PeerId::new(1, 0), 3)], node.gossip_payload(3));
        assert_eq!(0, node.stats().messages_sent);
    }

    #[test]
    fn gossips_to_at_most_fanout_members() {
        let network = InMemoryNetwork::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let mut node = introducer(&network, &audit);
        let mut b = network.attach(PeerId::new(2, 0));
        let mut c = network.attach(PeerId::new(3, 0));
        b.send(beat(vec![WireEntry::new(PeerId::new(2, 0), 1)])).unwrap();
        //when only one other member is known
        node.step(1);
        //then exactly one heartbeat goes out
        assert_eq!(1, b.drain().len());
        assert!(c.drain().is_empty());

        b.send(beat(vec![WireEntry::new(PeerId::new(3, 0), 1)])).unwrap();
        //when two other members are known
        node.step(2);
        //then two picks, possibly the same member twice
        let received = b.drain().len() + c.drain().len();
        assert_eq!(2, received);
        assert_eq!(3, node.stats().messages_sent);
    }

    #[test]
    fn suspected_member_is_withheld_then_removed() {
        let network = InMemoryNetwork::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let mut node = introducer(&network, &audit);
        let b = network.attach(PeerId::new(2, 0));
        let gone = PeerId::new(3, 0);
        b.send(beat(vec![WireEntry::new(gone, 4)])).unwrap();
        node.step(1);
        let config = node.config().clone();
        let mut now = 1;
        //when still inside the fail window
        while now < 1 + config.fail_window {
            now += 1;
            node.step(now);
            assert!(node.gossip_payload(now).iter().any(|entry| entry.peer == gone));
        }
        //then past it the member is withheld but kept
        now += 1;
        node.step(now);
        assert!(node.gossip_payload(now).iter().all(|entry| entry.peer != gone));
        assert!(node.members().contains(&gone));
        //when the removal deadline is one tick away
        while now < 1 + config.removal_deadline() - 1 {
            now += 1;
            node.step(now);
        }
        assert!(node.members().contains(&gone));
        //then at the deadline it is removed, once
        now += 1;
        node.step(now);
        assert!(!node.members().contains(&gone));
        assert_eq!(1, audit.count(AuditKind::Removed, PeerId::new(1, 0), gone));
    }

    #[test]
    fn sent_heartbeats_leave_out_suspected_members() {
        let network = InMemoryNetwork::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let mut node = introducer(&network, &audit);
        let mut b = network.attach(PeerId::new(2, 0));
        let silent = PeerId::new(3, 0);
        b.send(beat(vec![WireEntry::new(PeerId::new(2, 0), 1), WireEntry::new(silent, 4)])).unwrap();
        let fail_window = node.config().fail_window;
        let mut before_suspicion = Vec::new();
        let mut after_suspicion = Vec::new();
        //when b keeps beating while 3:0 stays silent
        for now in 1..=20 {
            if now > 1 {
                b.send(beat(vec![WireEntry::new(PeerId::new(2, 0), now)])).unwrap();
            }
            node.step(now);
            for inbound in b.drain() {
                let entries = match Message::decode(inbound.content).unwrap() {
                    Message::Heartbeat { entries } => entries,
                    other => panic!("unexpected {:?}", other),
                };
                if now - 1 > fail_window {
                    after_suspicion.push(entries);
                } else {
                    before_suspicion.push(entries);
                }
            }
        }
        //then
        assert!(!before_suspicion.is_empty());
        assert!(before_suspicion.iter().all(|entries| entries.iter().any(|entry| entry.peer == silent)));
        assert!(!after_suspicion.is_empty());
        for entries in &after_suspicion {
            assert!(entries.iter().all(|entry| entry.peer != silent), "{:?}", entries);
            assert!(entries.iter().any(|entry| entry.peer == PeerId::new(1, 0)));
            assert!(entries.iter().any(|entry| entry.peer == PeerId::new(2, 0)));
        }
        assert!(node.members().contains(&silent));
    }

    #[test]
    fn suspected_member_recovers_on_fresh_heartbeat() {
        let network = InMemoryNetwork::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let mut node = introducer(&network, &audit);
        let b = network.attach(PeerId::new(2, 0));
        let flaky = PeerId::new(3, 0);
        b.send(beat(vec![WireEntry::new(flaky, 1)])).unwrap();
        node.step(1);
        for now in 2..=10 {
            node.step(now);
        }
        assert!(node.gossip_payload(10).iter().all(|entry| entry.peer != flaky));
        //when
        b.send(beat(vec![WireEntry::new(flaky, 2)])).unwrap();
        node.step(11);
        //then
        assert!(node.gossip_payload(11).contains(&WireEntry::new(flaky, 2)));
        for now in 12..=30 {
            node.step(now);
        }
        assert!(node.members().contains(&flaky));
        assert_eq!(0, audit.count(AuditKind::Removed, PeerId::new(1, 0), flaky));
    }
}
