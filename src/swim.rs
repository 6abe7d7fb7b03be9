//! Drivers that supply the clock: a lockstep simulation of a whole group in
//! one thread, and a member running on its own thread with a real period.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use crate::audit::MemoryAuditLog;
use crate::config::Config;
use crate::error::ConfigError;
use crate::id::PeerId;
use crate::network::{InMemoryNetwork, NetworkStats};
use crate::node::Node;
use crate::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePlan {
    None,
    /// One random member other than the introducer crashes at `at`.
    Single { at: Tick },
    /// Half of the members other than the introducer crash at `at`.
    Multi { at: Tick },
}

/// Messages are lost with `probability` during ticks `[from, until)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropWindow {
    pub probability: f64,
    pub from: Tick,
    pub until: Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub peers: usize,
    //ticks between two consecutive member starts, introducer first
    pub start_interval: Tick,
    pub failure: FailurePlan,
    pub drop: Option<DropWindow>,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig { peers: 10, start_interval: 1, failure: FailurePlan::None, drop: None, seed: None }
    }
}

struct SimulatedMember {
    node: Node,
    start_at: Tick,
    failed: bool,
}

impl SimulatedMember {
    fn running(&self, now: Tick) -> bool {
        !self.failed && now > self.start_at
    }
}

/// A whole group on one global clock. Each tick every running member first
/// receives, then every running member runs its tick, so a message sent at
/// tick `t` is handled at `t + 1`.
pub struct Simulation {
    members: Vec<SimulatedMember>,
    network: InMemoryNetwork,
    audit: Arc<MemoryAuditLog>,
    plan: SimulationConfig,
    introducer: PeerId,
    rng: StdRng,
    now: Tick,
}

impl Simulation {
    /// Members are `1:0`, `2:0`, ... `n:0`; the introducer must be one of them.
    pub fn new(config: Config, plan: SimulationConfig) -> anyhow::Result<Simulation> {
        config.validate().context("invalid membership config")?;
        if let Some(drop) = plan.drop {
            if !(0.0..=1.0).contains(&drop.probability) {
                return Err(ConfigError::DropProbability(drop.probability)).context("invalid simulation config");
            }
        }
        let ids = u32::try_from(plan.peers).context("too many peers")?;
        let introducer = config.introducer;
        if introducer.port() != 0 || introducer.id() == 0 || introducer.id() > ids {
            bail!("introducer {} is not one of the {} simulated peers", introducer, plan.peers);
        }

        let mut rng = match plan.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let network = match plan.seed {
            Some(seed) => InMemoryNetwork::with_seed(seed.wrapping_add(1)),
            None => InMemoryNetwork::new(),
        };
        let audit = Arc::new(MemoryAuditLog::new());

        let mut order: Vec<PeerId> = (1..=ids).map(|id| PeerId::new(id, 0)).collect();
        order.retain(|peer| *peer != introducer);
        order.insert(0, introducer);
        let mut members = Vec::with_capacity(order.len());
        for (index, peer) in order.into_iter().enumerate() {
            let node = Node::new(peer, config.clone(), Box::new(network.attach(peer)), audit.clone());
            let node = node.with_seed(rand::Rng::gen(&mut rng));
            members.push(SimulatedMember { node, start_at: index as Tick * plan.start_interval, failed: false });
        }
        return Ok(Simulation { members, network, audit, plan, introducer, rng, now: 0 });
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn audit(&self) -> &MemoryAuditLog {
        &self.audit
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.network.stats()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.members.iter().map(|member| &member.node)
    }

    pub fn node(&self, peer: PeerId) -> Option<&Node> {
        self.nodes().find(|node| node.address() == peer)
    }

    pub fn is_failed(&self, peer: PeerId) -> bool {
        self.members.iter().any(|member| member.failed && member.node.address() == peer)
    }

    /// Members that have been started and have not crashed.
    pub fn alive(&self) -> Vec<PeerId> {
        self.members.iter()
            .filter(|member| !member.failed && self.now > member.start_at)
            .map(|member| member.node.address())
            .collect()
    }

    /// Stops `peer` from receiving and ticking, as if its process died. It is
    /// also cut off the network, so messages sent to it count as dropped.
    pub fn crash(&mut self, peer: PeerId) {
        if let Some(member) = self.members.iter_mut().find(|member| member.node.address() == peer) {
            if !member.failed {
                log::info!("Node {} failed at time {}", peer, self.now);
                member.failed = true;
                self.network.detach(peer);
            }
        }
    }

    pub fn step(&mut self) {
        let now = self.now;
        self.apply_drop_window(now);
        self.apply_failure_plan(now);

        for member in self.members.iter_mut().filter(|member| member.running(now)) {
            member.node.receive();
        }
        for member in self.members.iter_mut().filter(|member| !member.failed) {
            if member.start_at == now {
                member.node.start(now);
            } else if now > member.start_at {
                member.node.tick(now);
            }
        }
        self.now += 1;
    }

    pub fn run(&mut self, ticks: Tick) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// True when every alive member is active and knows exactly the alive members.
    pub fn converged(&self) -> bool {
        let alive: BTreeSet<PeerId> = self.alive().into_iter().collect();
        self.members.iter()
            .filter(|member| alive.contains(&member.node.address()))
            .all(|member| {
                member.node.is_active()
                    && member.node.members().peers().into_iter().collect::<BTreeSet<_>>() == alive
            })
    }

    fn apply_drop_window(&mut self, now: Tick) {
        if let Some(drop) = self.plan.drop {
            if now == drop.from {
                log::info!("Message drops start at {} with probability {}", now, drop.probability);
                self.network.set_drop_probability(drop.probability);
            }
            if now == drop.until {
                log::info!("Message drops stop at {}", now);
                self.network.set_drop_probability(0.0);
            }
        }
    }

    fn apply_failure_plan(&mut self, now: Tick) {
        let count = match self.plan.failure {
            FailurePlan::Single { at } if at == now => 1,
            FailurePlan::Multi { at } if at == now => (self.members.len() - 1) / 2,
            _ => return,
        };
        let introducer = self.introducer;
        let mut candidates: Vec<PeerId> = self.alive().into_iter().filter(|peer| *peer != introducer).collect();
        candidates.shuffle(&mut self.rng);
        for peer in candidates.into_iter().take(count) {
            self.crash(peer);
        }
    }
}

/// Runs `node` on its own thread, one tick per `period` of wall time, with a
/// local tick counter. The node is handed back once `cancellation_token` fires.
pub fn start_member(mut node: Node, period: Duration, cancellation_token: CancellationToken) -> JoinHandle<Node> {
    return thread::spawn(move || {
        let mut now: Tick = 0;
        node.start(now);
        loop {
            let before_tick = Instant::now();
            now += 1;
            node.step(now);
            if cancellation_token.is_cancelled() {
                log::debug!("Member {} will be stopped at tick {}", node.address(), now);
                break;
            }
            let duration_of_exec = before_tick.elapsed();
            if duration_of_exec < period {
                thread::sleep(period - duration_of_exec);
            }
        }
        node
    });
}

#[test]
fn introducer_must_be_simulated() {
    let config = Config { introducer: PeerId::new(9, 0), ..Config::default() };
    let plan = SimulationConfig { peers: 3, ..SimulationConfig::default() };
    assert!(Simulation::new(config, plan).is_err());

    let plan = SimulationConfig {
        drop: Some(DropWindow { probability: 2.0, from: 0, until: 1 }),
        ..SimulationConfig::default()
    };
    assert!(Simulation::new(Config::default(), plan).is_err());
}

#[test]
fn staggered_start() {
    let plan = SimulationConfig { peers: 3, start_interval: 2, seed: Some(3), ..SimulationConfig::default() };
    let mut simulation = Simulation::new(Config::default(), plan).unwrap();
    //when
    simulation.run(1);
    //then
    assert!(simulation.node(PeerId::new(1, 0)).unwrap().is_active());
    assert_eq!(crate::node::MembershipState::Uninitialized, simulation.node(PeerId::new(2, 0)).unwrap().state());
    simulation.run(3);
    assert_eq!(crate::node::MembershipState::Joining, simulation.node(PeerId::new(2, 0)).unwrap().state());
    assert_eq!(crate::node::MembershipState::Uninitialized, simulation.node(PeerId::new(3, 0)).unwrap().state());
}

#[test]
fn messages_to_crashed_member_are_dropped() {
    let plan = SimulationConfig { peers: 3, seed: Some(21), ..SimulationConfig::default() };
    let mut simulation = Simulation::new(Config::default(), plan).unwrap();
    simulation.run(60);
    let before = simulation.network_stats();
    let failures_before: u64 = simulation.nodes().map(|node| node.stats().send_failures).sum();
    assert_eq!(0, before.dropped);
    //when
    simulation.crash(PeerId::new(3, 0));
    simulation.run(20);
    //then
    let after = simulation.network_stats();
    let failures_after: u64 = simulation.nodes().map(|node| node.stats().send_failures).sum();
    assert!(after.dropped > 0);
    assert_eq!(after.sent, after.delivered + after.dropped);
    assert_eq!(after.dropped, failures_after - failures_before);
    assert!(after.delivered - before.delivered < after.sent - before.sent);
}

#[test]
fn single_failure_never_hits_introducer() {
    let plan = SimulationConfig {
        peers: 4,
        failure: FailurePlan::Single { at: 20 },
        seed: Some(11),
        ..SimulationConfig::default()
    };
    let mut simulation = Simulation::new(Config::default(), plan).unwrap();
    //when
    simulation.run(21);
    //then
    let failed: Vec<PeerId> = simulation.nodes().map(|node| node.address()).filter(|peer| simulation.is_failed(*peer)).collect();
    assert_eq!(1, failed.len());
    assert_ne!(PeerId::new(1, 0), failed[0]);
    assert_eq!(3, simulation.alive().len());
}
