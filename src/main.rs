//! Runs a simulated group and reports how the membership views ended up.
//!
//! ```text
//! gossip-membership --peers 10 --ticks 700 --failure single --fail-at 100
//! gossip-membership --drop-probability 0.1 --drop-from 50 --drop-until 300
//! ```

use clap::{Parser, ValueEnum};
use gossip_membership::{
    AdmissionPolicy, AuditKind, Config, DropWindow, FailurePlan, PeerId, Simulation, SimulationConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Failure {
    None,
    Single,
    Multi,
}

/// Gossip membership simulator
#[derive(Parser, Debug)]
#[command(name = "gossip-membership")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of members
    #[arg(long, default_value = "10")]
    peers: usize,

    /// Ticks to simulate
    #[arg(long, default_value = "700")]
    ticks: u64,

    /// Ticks between two member starts
    #[arg(long, default_value = "1")]
    start_interval: u64,

    /// Ticks of silence before a member is no longer gossiped
    #[arg(long, default_value = "5")]
    fail_window: u64,

    /// Further ticks of silence before a member is removed
    #[arg(long, default_value = "20")]
    remove_window: u64,

    /// Well-known join address
    #[arg(long, default_value = "1:0")]
    introducer: PeerId,

    /// Members gossiped to per tick
    #[arg(long, default_value = "2")]
    fanout: usize,

    /// Admit joiners only with this probability
    #[arg(long)]
    admission_probability: Option<f64>,

    #[arg(long, value_enum, default_value = "none")]
    failure: Failure,

    /// Tick at which the failure happens
    #[arg(long, default_value = "100")]
    fail_at: u64,

    #[arg(long, default_value = "0")]
    drop_probability: f64,

    #[arg(long, default_value = "50")]
    drop_from: u64,

    #[arg(long, default_value = "300")]
    drop_until: u64,

    /// Seed for a reproducible run
    #[arg(long, env = "GOSSIP_SEED")]
    seed: Option<u64>,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            fail_window: self.fail_window,
            remove_window: self.remove_window,
            introducer: self.introducer,
            fanout: self.fanout,
            admission: match self.admission_probability {
                Some(probability) => AdmissionPolicy::Random { probability },
                None => AdmissionPolicy::Always,
            },
        }
    }

    fn plan(&self) -> SimulationConfig {
        let failure = match self.failure {
            Failure::None => FailurePlan::None,
            Failure::Single => FailurePlan::Single { at: self.fail_at },
            Failure::Multi => FailurePlan::Multi { at: self.fail_at },
        };
        let drop = (self.drop_probability > 0.0).then(|| DropWindow {
            probability: self.drop_probability,
            from: self.drop_from,
            until: self.drop_until,
        });
        SimulationConfig { peers: self.peers, start_interval: self.start_interval, failure, drop, seed: self.seed }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut simulation = Simulation::new(cli.config(), cli.plan())?;
    simulation.run(cli.ticks);

    for node in simulation.nodes() {
        let peer = node.address();
        if simulation.is_failed(peer) {
            log::info!("{} failed", peer);
            continue;
        }
        let view: Vec<String> = node.members().iter()
            .map(|entry| format!("{}(hb={})", entry.peer, entry.heartbeat))
            .collect();
        log::info!("{} {:?} heartbeat={} view=[{}]", peer, node.state(), node.heartbeat(), view.join(", "));
    }

    let events = simulation.audit().events();
    let added = events.iter().filter(|event| event.kind == AuditKind::Added).count();
    let removed = events.len() - added;
    let stats = simulation.network_stats();
    log::info!("audit: {} additions, {} removals", added, removed);
    log::info!("network: sent={} delivered={} dropped={}", stats.sent, stats.delivered, stats.dropped);
    log::info!("converged: {}", simulation.converged());
    return Ok(());
}
