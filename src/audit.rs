//! Observers of membership changes. Purely informational: nothing recorded here
//! feeds back into the protocol.

use std::sync::{Mutex, PoisonError};

use crate::id::PeerId;

pub trait AuditLog: Send + Sync {
    fn record_add(&self, observer: PeerId, observed: PeerId);

    fn record_remove(&self, observer: PeerId, observed: PeerId);
}

/// Writes one line per change through the `log` facade under the `audit` target.
#[derive(Debug, Default)]
pub struct LogAuditLog;

impl AuditLog for LogAuditLog {
    fn record_add(&self, observer: PeerId, observed: PeerId) {
        log::info!(target: "audit", "[{}] Node {} joined", observer, observed);
    }

    fn record_remove(&self, observer: PeerId, observed: PeerId) {
        log::info!(target: "audit", "[{}] Node {} removed", observer, observed);
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum AuditKind {
    Added,
    Removed,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub observer: PeerId,
    pub observed: PeerId,
}

/// Keeps every event in arrival order, for inspection after a run.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> MemoryAuditLog {
        MemoryAuditLog::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, kind: AuditKind, observer: PeerId, observed: PeerId) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.kind == kind && event.observer == observer && event.observed == observed)
            .count()
    }

    pub fn removals_of(&self, observed: PeerId) -> Vec<PeerId> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.kind == AuditKind::Removed && event.observed == observed)
            .map(|event| event.observer)
            .collect()
    }

    fn push(&self, kind: AuditKind, observer: PeerId, observed: PeerId) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
            .push(AuditEvent { kind, observer, observed });
    }
}

impl AuditLog for MemoryAuditLog {
    fn record_add(&self, observer: PeerId, observed: PeerId) {
        self.push(AuditKind::Added, observer, observed);
    }

    fn record_remove(&self, observer: PeerId, observed: PeerId) {
        self.push(AuditKind::Removed, observer, observed);
    }
}

#[test]
fn memory_audit_log_counts_events() {
    let audit = MemoryAuditLog::new();
    let (a, b, c) = (PeerId::new(1, 0), PeerId::new(2, 0), PeerId::new(3, 0));
    //when
    audit.record_add(a, b);
    audit.record_add(a, c);
    audit.record_remove(a, c);
    audit.record_remove(b, c);
    //then
    assert_eq!(4, audit.events().len());
    assert_eq!(1, audit.count(AuditKind::Added, a, c));
    assert_eq!(1, audit.count(AuditKind::Removed, a, c));
    assert_eq!(0, audit.count(AuditKind::Removed, a, b));
    assert_eq!(vec![a, b], audit.removals_of(c));
}
