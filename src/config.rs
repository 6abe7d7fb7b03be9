use rand::Rng;

use crate::error::ConfigError;
use crate::id::PeerId;
use crate::Tick;

/// Well-known address every non-introducer sends its join request to.
pub const DEFAULT_INTRODUCER: PeerId = PeerId::new(1, 0);

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    //ticks of silence after which a member is no longer gossiped
    pub fail_window: Tick,
    //additional ticks of silence after which the member is dropped
    pub remove_window: Tick,
    pub introducer: PeerId,
    //members pushed to per tick. Bigger fanout converges faster on big groups
    pub fanout: usize,
    pub admission: AdmissionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fail_window: 5,
            remove_window: 20,
            introducer: DEFAULT_INTRODUCER,
            fanout: 2,
            admission: AdmissionPolicy::Always,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fail_window == 0 {
            return Err(ConfigError::ZeroFailWindow);
        }
        if self.fail_window.checked_add(self.remove_window).is_none() {
            return Err(ConfigError::WindowOverflow(self.fail_window, self.remove_window));
        }
        if self.fanout == 0 {
            return Err(ConfigError::ZeroFanout);
        }
        if let AdmissionPolicy::Random { probability } = self.admission {
            if !(0.0..=1.0).contains(&probability) {
                return Err(ConfigError::AdmissionProbability(probability));
            }
        }
        return Ok(());
    }

    /// Tick count after which a silent member is gone from every table.
    pub fn removal_deadline(&self) -> Tick {
        self.fail_window.saturating_add(self.remove_window)
    }
}

/// Decides whether a join request adds the requester to the table.
/// A join reply is sent either way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdmissionPolicy {
    Always,
    /// Admits with the given probability. Reproduces the coin-flip admission
    /// of older deployments; rejected joiners only enter tables once their
    /// own gossip reaches other members.
    Random { probability: f64 },
}

impl AdmissionPolicy {
    pub fn admit<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        match self {
            AdmissionPolicy::Always => true,
            AdmissionPolicy::Random { probability } => {
                !probability.is_nan() && rng.gen_bool(probability.clamp(0.0, 1.0))
            }
        }
    }
}

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert_eq!(Ok(()), config.validate());
    assert_eq!(25, config.removal_deadline());
    assert_eq!(PeerId::new(1, 0), config.introducer);
}

#[test]
fn rejects_invalid_config() {
    let zero_fail = Config { fail_window: 0, ..Config::default() };
    assert_eq!(Err(ConfigError::ZeroFailWindow), zero_fail.validate());

    let zero_fanout = Config { fanout: 0, ..Config::default() };
    assert_eq!(Err(ConfigError::ZeroFanout), zero_fanout.validate());

    let bad_probability = Config { admission: AdmissionPolicy::Random { probability: 1.5 }, ..Config::default() };
    assert_eq!(Err(ConfigError::AdmissionProbability(1.5)), bad_probability.validate());
}

#[test]
fn rejects_overflowing_windows() {
    let huge = Config { remove_window: u64::MAX, ..Config::default() };
    //then
    assert_eq!(Err(ConfigError::WindowOverflow(5, u64::MAX)), huge.validate());
    assert_eq!(u64::MAX, huge.removal_deadline());

    let largest = Config { fail_window: 1, remove_window: u64::MAX - 1, ..Config::default() };
    assert_eq!(Ok(()), largest.validate());
}

#[test]
fn unvalidated_huge_windows_never_expire() {
    let huge = Config { remove_window: u64::MAX, ..Config::default() };
    let network = crate::network::InMemoryNetwork::new();
    let me = PeerId::new(1, 0);
    let audit = std::sync::Arc::new(crate::audit::MemoryAuditLog::new());
    let mut node = crate::node::Node::new(me, huge, Box::new(network.attach(me)), audit.clone());
    //when
    let quiet = PeerId::new(2, 0);
    node.start(0);
    node.members.merge_entry(crate::message::WireEntry::new(quiet, 1), 0);
    for now in 1..=40 {
        node.step(now);
    }
    //then
    assert!(node.members().contains(&quiet));
    assert!(audit.removals_of(quiet).is_empty());
}

#[test]
fn admission_policies() {
    let mut rng = rand::thread_rng();
    assert!((0..100).all(|_| AdmissionPolicy::Always.admit(&mut rng)));
    assert!((0..100).all(|_| AdmissionPolicy::Random { probability: 1.0 }.admit(&mut rng)));
    assert!((0..100).all(|_| !AdmissionPolicy::Random { probability: 0.0 }.admit(&mut rng)));
}
