use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gossip_membership::{
    start_member, AuditKind, AuditLog, Config, DropWindow, FailurePlan, InMemoryNetwork, LogAuditLog, MembershipState,
    Node, PeerId, Simulation, SimulationConfig,
};
use tokio_util::sync::CancellationToken;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn three_members(seed: u64) -> Simulation {
    let plan = SimulationConfig { peers: 3, seed: Some(seed), ..SimulationConfig::default() };
    return Simulation::new(Config::default(), plan).unwrap();
}

#[test]
fn join_bootstrap_through_introducer() {
    init_logger();
    let mut simulation = three_members(1);
    //when introducer starts at 0, 2:0 at 1, and its request is answered at 2
    simulation.run(4);
    //then
    let introducer = simulation.node(PeerId::new(1, 0)).unwrap();
    let joiner = simulation.node(PeerId::new(2, 0)).unwrap();
    assert!(introducer.members().contains(&PeerId::new(2, 0)));
    assert_eq!(MembershipState::Active, joiner.state());
    assert!(joiner.members().contains(&PeerId::new(1, 0)));
    assert!(joiner.members().contains(&PeerId::new(2, 0)));
}

#[test]
fn three_members_converge() {
    init_logger();
    let mut simulation = three_members(7);
    //when
    simulation.run(60);
    //then
    assert!(simulation.converged());
    let config = Config::default();
    for node in simulation.nodes() {
        assert_eq!(3, node.members().len());
        for entry in node.members().iter() {
            let owner = simulation.node(entry.peer).unwrap();
            assert!(entry.heartbeat <= owner.heartbeat());
            assert!(owner.heartbeat() - entry.heartbeat <= config.fail_window, "{:?} lags behind {}", entry, owner.address());
        }
    }
}

#[test]
fn crashed_member_is_suspected_then_removed_once() {
    init_logger();
    let config = Config::default();
    let mut simulation = three_members(21);
    simulation.run(60);
    assert!(simulation.converged());
    let crashed = PeerId::new(3, 0);
    let observers = vec![PeerId::new(1, 0), PeerId::new(2, 0)];

    //when
    simulation.crash(crashed);
    let sent_before_crash = simulation.network_stats().sent;
    let mut waited = 0;
    let all_suspect = |simulation: &Simulation| {
        let now = simulation.now() - 1;
        observers.iter().all(|peer| {
            let node = simulation.node(*peer).unwrap();
            node.members().get(&crashed).map_or(true, |entry| entry.suspected(now, config.fail_window))
        })
    };
    while !all_suspect(&simulation) && waited < config.removal_deadline() {
        simulation.step();
        waited += 1;
    }

    //then it is withheld from gossip but still known
    let now = simulation.now() - 1;
    for peer in &observers {
        let node = simulation.node(*peer).unwrap();
        assert!(node.gossip_payload(now).iter().all(|entry| entry.peer != crashed));
        assert!(node.members().contains(&crashed), "{} dropped {} too early", peer, crashed);
    }

    //when the removal deadline has passed everywhere
    simulation.run(config.removal_deadline() + 10);

    //then
    let stats = simulation.network_stats();
    let send_failures: u64 = observers.iter().map(|peer| simulation.node(*peer).unwrap().stats().send_failures).sum();
    assert!(stats.sent > sent_before_crash);
    assert!(stats.dropped > 0, "heartbeats to {} must not count as delivered", crashed);
    assert_eq!(stats.dropped, send_failures);
    for peer in &observers {
        let node = simulation.node(*peer).unwrap();
        assert!(!node.members().contains(&crashed));
        assert_eq!(1, simulation.audit().count(AuditKind::Removed, *peer, crashed));
    }
    assert!(simulation.converged());
}

#[test]
fn survivors_converge_after_multi_failure() {
    init_logger();
    let plan = SimulationConfig {
        peers: 10,
        failure: FailurePlan::Multi { at: 60 },
        seed: Some(5),
        ..SimulationConfig::default()
    };
    let mut simulation = Simulation::new(Config::default(), plan).unwrap();
    //when
    simulation.run(160);
    //then
    assert_eq!(6, simulation.alive().len());
    assert!(simulation.converged());
    let failed: Vec<PeerId> = simulation.nodes().map(|node| node.address()).filter(|peer| simulation.is_failed(*peer)).collect();
    assert_eq!(4, failed.len());
    for peer in failed {
        assert!(!simulation.audit().removals_of(peer).is_empty());
    }
}

#[test]
fn lossy_network_still_converges() {
    init_logger();
    let plan = SimulationConfig {
        peers: 10,
        drop: Some(DropWindow { probability: 0.2, from: 15, until: 100 }),
        seed: Some(13),
        ..SimulationConfig::default()
    };
    let mut simulation = Simulation::new(Config::default(), plan).unwrap();
    //when
    simulation.run(200);
    //then
    assert!(simulation.network_stats().dropped > 0);
    assert!(simulation.converged());
}

#[test]
fn run_two_members_on_threads() {
    init_logger();
    let network = InMemoryNetwork::new();
    let audit: Arc<dyn AuditLog> = Arc::new(LogAuditLog);
    let address_1 = PeerId::new(1, 0);
    let address_2 = PeerId::new(2, 0);
    let member_1 = Node::new(address_1, Config::default(), Box::new(network.attach(address_1)), audit.clone());
    let member_2 = Node::new(address_2, Config::default(), Box::new(network.attach(address_2)), audit.clone());

    let cancellation_token = CancellationToken::new();
    let join_handler_1 = start_member(member_1, Duration::from_millis(10), cancellation_token.clone());
    // let the introducer come up before the join request is sent
    thread::sleep(Duration::from_millis(50));
    let join_handler_2 = start_member(member_2, Duration::from_millis(10), cancellation_token.clone());

    thread::sleep(Duration::from_millis(500));
    cancellation_token.cancel();
    let member_1 = join_handler_1.join().expect("Fail in await");
    let member_2 = join_handler_2.join().expect("Fail in await");

    assert!(member_1.is_active());
    assert!(member_2.is_active());
    assert_eq!(2, member_1.members().len());
    assert_eq!(2, member_2.members().len());
    assert!(member_1.heartbeat() > 0);
    assert!(member_2.heartbeat() > 0);
}
