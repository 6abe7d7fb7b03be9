use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::id::PeerId;

#[derive(PartialEq, Debug, Clone)]
pub struct InboundMessage {
    pub sender_address: PeerId,
    pub content: Bytes,
}

#[derive(PartialEq, Debug, Clone)]
pub struct OutboundMessage {
    pub target_address: PeerId,
    pub content: Bytes,
}

/// Best-effort datagram transport as seen by one member.
pub trait NetworkClient: Send {
    /// Fire-and-forget. `Ok` does not mean the message arrives.
    fn send(&self, message: OutboundMessage) -> anyhow::Result<()>;

    /// Everything queued for this member so far, in arrival order. Never blocks.
    fn drain(&mut self) -> Vec<InboundMessage>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

struct Routes {
    senders: HashMap<PeerId, Sender<InboundMessage>>,
    drop_probability: f64,
    rng: StdRng,
}

struct Shared {
    routes: Mutex<Routes>,
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// In-process network: one channel per attached member, optionally lossy.
#[derive(Clone)]
pub struct InMemoryNetwork {
    shared: Arc<Shared>,
}

impl InMemoryNetwork {
    pub fn new() -> InMemoryNetwork {
        return InMemoryNetwork::with_rng(StdRng::from_entropy());
    }

    pub fn with_seed(seed: u64) -> InMemoryNetwork {
        return InMemoryNetwork::with_rng(StdRng::seed_from_u64(seed));
    }

    fn with_rng(rng: StdRng) -> InMemoryNetwork {
        let routes = Routes { senders: HashMap::new(), drop_probability: 0.0, rng };
        let shared = Shared {
            routes: Mutex::new(routes),
            sent: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        return InMemoryNetwork { shared: Arc::new(shared) };
    }

    /// Registers `address` and hands back its client. Re-attaching replaces the
    /// previous channel; messages queued on the old one are lost.
    pub fn attach(&self, address: PeerId) -> InMemoryNetworkClient {
        let (sender, receiver) = mpsc::channel();
        self.routes().senders.insert(address, sender);
        return InMemoryNetworkClient { network: self.clone(), my_address: address, receiver };
    }

    /// Makes `address` unreachable. Later sends to it count as dropped.
    pub fn detach(&self, address: PeerId) {
        self.routes().senders.remove(&address);
    }

    /// Probability in `[0, 1]` that any single message is lost.
    pub fn set_drop_probability(&self, probability: f64) {
        let probability = if probability.is_nan() { 0.0 } else { probability.clamp(0.0, 1.0) };
        self.routes().drop_probability = probability;
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            sent: self.shared.sent.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    fn routes(&self) -> std::sync::MutexGuard<'_, Routes> {
        self.shared.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, from: PeerId, message: OutboundMessage) -> anyhow::Result<()> {
        self.shared.sent.fetch_add(1, Ordering::Relaxed);
        let mut routes = self.routes();
        let lossy = routes.drop_probability;
        if lossy > 0.0 && routes.rng.gen_bool(lossy) {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("Dropping msg from {} to {}", from, message.target_address);
            return Ok(());
        }
        let result = match routes.senders.get(&message.target_address) {
            None => Err(anyhow!("no route to {}", message.target_address)),
            Some(sender) => sender
                .send(InboundMessage { sender_address: from, content: message.content })
                .map_err(|_| anyhow!("{} is no longer receiving", message.target_address)),
        };
        match result {
            Ok(()) => self.shared.delivered.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.shared.dropped.fetch_add(1, Ordering::Relaxed),
        };
        return result;
    }
}

impl Default for InMemoryNetwork {
    fn default() -> Self {
        InMemoryNetwork::new()
    }
}

pub struct InMemoryNetworkClient {
    network: InMemoryNetwork,
    my_address: PeerId,
    receiver: Receiver<InboundMessage>,
}

impl InMemoryNetworkClient {
    pub fn address(&self) -> PeerId {
        self.my_address
    }
}

impl NetworkClient for InMemoryNetworkClient {
    fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        log::trace!("Send {} bytes from {} to {}", message.content.len(), self.my_address, message.target_address);
        return self.network.deliver(self.my_address, message);
    }

    fn drain(&mut self) -> Vec<InboundMessage> {
        self.receiver.try_iter().collect()
    }
}

#[test]
fn should_received_and_send_messages() {
    let network = InMemoryNetwork::new();
    let server_address = PeerId::new(1, 0);
    let client_address = PeerId::new(2, 0);
    let mut server = network.attach(server_address);
    let client = network.attach(client_address);
    //when
    client.send(OutboundMessage { content: Bytes::from("test"), target_address: server_address }).unwrap();
    client.send(OutboundMessage { content: Bytes::from("again"), target_address: server_address }).unwrap();
    //then
    let expected = vec![
        InboundMessage { content: Bytes::from("test"), sender_address: client_address },
        InboundMessage { content: Bytes::from("again"), sender_address: client_address },
    ];
    assert_eq!(expected, server.drain());
    assert!(server.drain().is_empty());
    assert_eq!(NetworkStats { sent: 2, delivered: 2, dropped: 0 }, network.stats());
}

#[test]
fn unreachable_peer_is_an_error() {
    let network = InMemoryNetwork::new();
    let client = network.attach(PeerId::new(2, 0));
    network.attach(PeerId::new(3, 0));
    network.detach(PeerId::new(3, 0));
    //when
    let result = client.send(OutboundMessage { content: Bytes::from("x"), target_address: PeerId::new(3, 0) });
    //then
    assert!(result.is_err());
    assert_eq!(1, network.stats().dropped);
}

#[test]
fn fully_lossy_network_drops_silently() {
    let network = InMemoryNetwork::with_seed(7);
    network.set_drop_probability(1.0);
    let mut server = network.attach(PeerId::new(1, 0));
    let client = network.attach(PeerId::new(2, 0));
    for _ in 0..10 {
        client.send(OutboundMessage { content: Bytes::from("x"), target_address: PeerId::new(1, 0) }).unwrap();
    }
    assert!(server.drain().is_empty());
    assert_eq!(NetworkStats { sent: 10, delivered: 0, dropped: 10 }, network.stats());
}
