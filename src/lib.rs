//! Gossip-style group membership with heartbeat based failure detection.
//!
//! Each [`Node`] keeps its own [`MembershipList`], bumps its heartbeat once per
//! tick, pushes the rows it still trusts to a couple of random members, and
//! drops members whose heartbeat stopped advancing. Transport, clock and audit
//! log are supplied from outside through [`NetworkClient`], the `now` argument
//! and [`AuditLog`].

mod dispatch;
mod gossip;

pub mod audit;
pub mod config;
pub mod error;
pub mod id;
pub mod membership_list;
pub mod message;
pub mod network;
pub mod node;
pub mod swim;

/// One unit of the logical clock driving the protocol.
pub type Tick = u64;

pub use audit::{AuditEvent, AuditKind, AuditLog, LogAuditLog, MemoryAuditLog};
pub use config::{AdmissionPolicy, Config, DEFAULT_INTRODUCER};
pub use error::{ConfigError, DecodeError};
pub use id::PeerId;
pub use membership_list::{MemberEntry, MembershipList, MergeOutcome};
pub use message::{Message, WireEntry};
pub use network::{InMemoryNetwork, InMemoryNetworkClient, InboundMessage, NetworkClient, OutboundMessage};
pub use node::{MembershipState, Node, NodeStats};
pub use swim::{start_member, DropWindow, FailurePlan, Simulation, SimulationConfig};
