use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::id::PeerId;
use crate::membership_list::{MembershipList, MergeOutcome};
use crate::message::Message;
use crate::network::{InboundMessage, NetworkClient, OutboundMessage};
use crate::Tick;

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum MembershipState {
    Uninitialized,
    /// Join request sent, waiting for the introducer's reply.
    Joining,
    Active,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeStats {
    pub messages_sent: u64,
    pub send_failures: u64,
    pub messages_received: u64,
    pub decode_failures: u64,
    /// Well-formed messages that made no sense in the current state.
    pub messages_ignored: u64,
}

/// One group member. Owns its table exclusively; peers only ever see encoded
/// snapshots of it.
pub struct Node {
    pub(crate) me: PeerId,
    pub(crate) heartbeat: u64,
    pub(crate) state: MembershipState,
    pub(crate) members: MembershipList,
    pub(crate) config: Config,
    pub(crate) network: Box<dyn NetworkClient>,
    pub(crate) audit: Arc<dyn AuditLog>,
    pub(crate) rng: StdRng,
    pub(crate) inbox: VecDeque<InboundMessage>,
    pub(crate) stats: NodeStats,
}

impl Node {
    pub fn new(me: PeerId, config: Config, network: Box<dyn NetworkClient>, audit: Arc<dyn AuditLog>) -> Node {
        return Node {
            me,
            heartbeat: 0,
            state: MembershipState::Uninitialized,
            members: MembershipList::new(),
            config,
            network,
            audit,
            rng: StdRng::from_entropy(),
            inbox: VecDeque::new(),
            stats: NodeStats::default(),
        };
    }

    /// Fixes the source of randomness used for gossip targets and admission.
    pub fn with_seed(mut self, seed: u64) -> Node {
        self.rng = StdRng::seed_from_u64(seed);
        return self;
    }

    pub fn address(&self) -> PeerId {
        self.me
    }

    pub fn heartbeat(&self) -> u64 {
        self.heartbeat
    }

    pub fn state(&self) -> MembershipState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == MembershipState::Active
    }

    pub fn is_introducer(&self) -> bool {
        self.me == self.config.introducer
    }

    pub fn members(&self) -> &MembershipList {
        &self.members
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// Introduces this node to the group. The introducer boots the group on its
    /// own; everybody else asks the introducer and waits in `Joining`.
    pub fn start(&mut self, now: Tick) {
        if self.state != MembershipState::Uninitialized {
            log::warn!("{} already started, state {:?}", self.me, self.state);
            return;
        }
        self.members = MembershipList::new();
        self.heartbeat = 0;
        if self.is_introducer() {
            log::info!("{} starting up group at {}", self.me, now);
            self.touch_self(now);
            self.state = MembershipState::Active;
        } else {
            log::info!("{} trying to join via {} at {}", self.me, self.config.introducer, now);
            let request = Message::JoinRequest { peer: self.me, heartbeat: self.heartbeat };
            self.state = MembershipState::Joining;
            self.send(self.config.introducer, &request);
        }
    }

    /// Moves everything the transport queued for us into the local inbox.
    pub fn receive(&mut self) -> usize {
        let messages = self.network.drain();
        let count = messages.len();
        self.inbox.extend(messages);
        return count;
    }

    /// One clock tick: handle queued messages, then, once in the group, run
    /// failure detection and gossip.
    pub fn tick(&mut self, now: Tick) {
        self.check_messages(now);
        if !self.is_active() {
            return;
        }
        self.node_loop_ops(now);
    }

    /// `receive` followed by `tick`, for drivers that don't need to separate them.
    pub fn step(&mut self, now: Tick) {
        self.receive();
        self.tick(now);
    }

    pub(crate) fn touch_self(&mut self, now: Tick) {
        if self.members.touch_self(self.me, self.heartbeat, now) == MergeOutcome::Inserted {
            self.audit.record_add(self.me, self.me);
        }
    }

    pub(crate) fn send(&mut self, target: PeerId, message: &Message) {
        self.send_bytes(target, message.kind(), message.encode());
    }

    pub(crate) fn send_bytes(&mut self, target: PeerId, kind: &str, content: Bytes) {
        self.stats.messages_sent += 1;
        match self.network.send(OutboundMessage { content, target_address: target }) {
            Ok(_) => { log::trace!("{} sent {} to {}", self.me, kind, target) }
            Err(err) => {
                self.stats.send_failures += 1;
                log::debug!("{} wasn't able to send {} to {}, {:?}", self.me, kind, target, err)
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("me", &self.me)
            .field("heartbeat", &self.heartbeat)
            .field("state", &self.state)
            .field("members", &self.members)
            .finish()
    }
}

#[cfg(test)]
fn test_node(
    network: &crate::network::InMemoryNetwork,
    audit: &Arc<crate::audit::MemoryAuditLog>,
    id: u32,
) -> Node {
    let peer = PeerId::new(id, 0);
    return Node::new(peer, Config::default(), Box::new(network.attach(peer)), audit.clone()).with_seed(id as u64);
}

#[test]
fn introducer_boots_group_alone() {
    let network = crate::network::InMemoryNetwork::new();
    let audit = Arc::new(crate::audit::MemoryAuditLog::new());
    let mut introducer = test_node(&network, &audit, 1);
    //when
    introducer.start(0);
    //then
    assert_eq!(MembershipState::Active, introducer.state());
    assert_eq!(vec![PeerId::new(1, 0)], introducer.members().peers());
    assert_eq!(0, introducer.members().get(&PeerId::new(1, 0)).unwrap().heartbeat);
    assert_eq!(0, network.stats().sent);
    assert_eq!(1, audit.events().len());
}

#[test]
fn joiner_waits_for_reply() {
    let network = crate::network::InMemoryNetwork::new();
    let audit = Arc::new(crate::audit::MemoryAuditLog::new());
    let mut introducer_link = network.attach(PeerId::new(1, 0));
    let mut joiner = test_node(&network, &audit, 2);
    //when
    joiner.start(3);
    for now in 4..10 {
        joiner.step(now);
    }
    //then
    assert_eq!(MembershipState::Joining, joiner.state());
    assert!(joiner.members().is_empty());
    assert_eq!(0, joiner.heartbeat());
    let sent = crate::network::NetworkClient::drain(&mut introducer_link);
    assert_eq!(1, sent.len());
    assert_eq!(
        Message::JoinRequest { peer: PeerId::new(2, 0), heartbeat: 0 },
        Message::decode(sent[0].content.clone()).unwrap()
    );
}

#[test]
fn start_twice_is_ignored() {
    let network = crate::network::InMemoryNetwork::new();
    let audit = Arc::new(crate::audit::MemoryAuditLog::new());
    let mut introducer = test_node(&network, &audit, 1);
    introducer.start(0);
    introducer.tick(1);
    //when
    introducer.start(2);
    //then
    assert_eq!(1, introducer.heartbeat());
    assert_eq!(1, audit.events().len());
}
