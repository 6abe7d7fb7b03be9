use rand::Rng;

use crate::id::PeerId;
use crate::message::WireEntry;
use crate::Tick;

/// One row of a node's membership table.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct MemberEntry {
    pub peer: PeerId,
    pub heartbeat: u64,
    /// Local tick at which a higher heartbeat for `peer` was last accepted.
    pub last_update: Tick,
}

impl MemberEntry {
    pub fn new(peer: PeerId, heartbeat: u64, last_update: Tick) -> MemberEntry {
        return MemberEntry { peer, heartbeat, last_update };
    }

    pub fn age(&self, now: Tick) -> Tick {
        now.saturating_sub(self.last_update)
    }

    /// Silent for longer than `fail_window`: kept, but no longer gossiped.
    pub fn suspected(&self, now: Tick, fail_window: Tick) -> bool {
        self.age(now) > fail_window
    }

    pub fn expired(&self, now: Tick, fail_window: Tick, remove_window: Tick) -> bool {
        self.age(now) >= fail_window.saturating_add(remove_window)
    }

    pub fn to_wire(&self) -> WireEntry {
        WireEntry::new(self.peer, self.heartbeat)
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum MergeOutcome {
    Inserted,
    Refreshed,
    Ignored,
}

/// Ordered set of members, unique by peer.
#[derive(Debug, Default, Clone)]
pub struct MembershipList {
    entries: Vec<MemberEntry>,
}

impl MembershipList {
    pub fn new() -> MembershipList {
        return MembershipList { entries: Vec::new() };
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, peer: &PeerId) -> Option<&MemberEntry> {
        self.entries.iter().find(|entry| entry.peer == *peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.get(peer).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemberEntry> {
        self.entries.iter()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.entries.iter().map(|entry| entry.peer).collect()
    }

    /// Anti-entropy merge: only a strictly higher heartbeat is accepted, and
    /// it is stamped with the local `now`, never with anything from the sender.
    pub fn merge_entry(&mut self, incoming: WireEntry, now: Tick) -> MergeOutcome {
        match self.entries.iter_mut().find(|entry| entry.peer == incoming.peer) {
            None => {
                self.entries.push(MemberEntry::new(incoming.peer, incoming.heartbeat, now));
                MergeOutcome::Inserted
            }
            Some(stored) if incoming.heartbeat > stored.heartbeat => {
                stored.heartbeat = incoming.heartbeat;
                stored.last_update = now;
                MergeOutcome::Refreshed
            }
            Some(_) => MergeOutcome::Ignored,
        }
    }

    pub fn touch_self(&mut self, me: PeerId, heartbeat: u64, now: Tick) -> MergeOutcome {
        match self.entries.iter_mut().find(|entry| entry.peer == me) {
            None => {
                self.entries.push(MemberEntry::new(me, heartbeat, now));
                MergeOutcome::Inserted
            }
            Some(stored) => {
                stored.heartbeat = heartbeat;
                stored.last_update = now;
                MergeOutcome::Refreshed
            }
        }
    }

    /// Drops every row silent for `fail_window + remove_window` ticks or more.
    /// `on_remove` sees each row before it goes.
    pub fn prune_expired<F>(&mut self, now: Tick, fail_window: Tick, remove_window: Tick, mut on_remove: F) -> usize
        where F: FnMut(&MemberEntry),
    {
        let before = self.entries.len();
        self.entries.retain(|entry| {
            if entry.expired(now, fail_window, remove_window) {
                on_remove(entry);
                return false;
            }
            true
        });
        return before - self.entries.len();
    }

    /// Every row, suspected or not.
    pub fn snapshot(&self) -> Vec<WireEntry> {
        self.entries.iter().map(MemberEntry::to_wire).collect()
    }

    /// Rows fit to be gossiped: everything not suspected at `now`.
    pub fn gossip_payload(&self, now: Tick, fail_window: Tick) -> Vec<WireEntry> {
        self.entries.iter()
            .filter(|entry| !entry.suspected(now, fail_window))
            .map(MemberEntry::to_wire)
            .collect()
    }

    /// Discards the current rows and adopts `entries`, each stamped with `now`.
    /// Duplicated peers in `entries` collapse to the highest heartbeat.
    pub fn replace_with<I, F>(&mut self, entries: I, now: Tick, mut on_insert: F)
        where I: IntoIterator<Item = WireEntry>,
              F: FnMut(&MemberEntry),
    {
        self.entries.clear();
        for entry in entries {
            if self.merge_entry(entry, now) == MergeOutcome::Inserted {
                if let Some(inserted) = self.entries.last() {
                    on_insert(inserted);
                }
            }
        }
    }

    /// Picks up to `k` gossip targets other than `me`, uniformly and with
    /// repetition. The i-th pick happens only when more than i other rows exist.
    pub fn get_k_random_members<R: Rng + ?Sized>(&self, k: usize, me: PeerId, rng: &mut R) -> Vec<PeerId> {
        let others: Vec<PeerId> = self.entries.iter()
            .map(|entry| entry.peer)
            .filter(|peer| *peer != me)
            .collect();
        let mut result = Vec::with_capacity(k.min(others.len()));
        for i in 0..k {
            if others.len() <= i {
                break;
            }
            result.push(others[rng.gen_range(0..others.len())]);
        }
        return result;
    }
}

#[cfg(test)]
fn peer(id: u32) -> PeerId {
    PeerId::new(id, 0)
}

#[cfg(test)]
fn wire(id: u32, heartbeat: u64) -> WireEntry {
    WireEntry::new(peer(id), heartbeat)
}

#[test]
fn merge_inserts_unknown_peer_with_local_time() {
    let mut list = MembershipList::new();
    //when
    let outcome = list.merge_entry(wire(2, 40), 7);
    //then
    assert_eq!(MergeOutcome::Inserted, outcome);
    assert_eq!(Some(&MemberEntry::new(peer(2), 40, 7)), list.get(&peer(2)));
}

#[test]
fn merge_is_monotonic() {
    let mut list = MembershipList::new();
    list.merge_entry(wire(2, 5), 1);
    let sequence = [(3, 2), (5, 3), (9, 4), (8, 5), (9, 6), (1, 7), (12, 8)];
    let mut previous = list.get(&peer(2)).copied().unwrap();
    for (heartbeat, now) in sequence {
        //when
        let outcome = list.merge_entry(wire(2, heartbeat), now);
        //then
        let stored = list.get(&peer(2)).copied().unwrap();
        assert!(stored.heartbeat >= previous.heartbeat);
        if heartbeat <= previous.heartbeat {
            assert_eq!(MergeOutcome::Ignored, outcome);
            assert_eq!(previous, stored);
        } else {
            assert_eq!(MergeOutcome::Refreshed, outcome);
            assert_eq!(MemberEntry::new(peer(2), heartbeat, now), stored);
        }
        previous = stored;
    }
    assert_eq!(1, list.len());
}

#[test]
fn merging_same_heartbeat_twice_is_idempotent() {
    let mut list = MembershipList::new();
    list.merge_entry(wire(1, 3), 0);
    list.merge_entry(wire(2, 4), 2);
    let after_first = list.clone().snapshot();
    let first_row = list.get(&peer(2)).copied();
    //when
    list.merge_entry(wire(2, 4), 9);
    //then
    assert_eq!(after_first, list.snapshot());
    assert_eq!(first_row, list.get(&peer(2)).copied());
}

#[test]
fn touch_self_always_wins() {
    let mut list = MembershipList::new();
    assert_eq!(MergeOutcome::Inserted, list.touch_self(peer(1), 0, 0));
    list.merge_entry(wire(1, 10), 1);
    //when
    let outcome = list.touch_self(peer(1), 3, 4);
    //then
    assert_eq!(MergeOutcome::Refreshed, outcome);
    assert_eq!(Some(&MemberEntry::new(peer(1), 3, 4)), list.get(&peer(1)));
    assert_eq!(1, list.len());
}

#[test]
fn prune_removes_exactly_at_deadline() {
    let (fail, remove) = (5, 20);
    let mut list = MembershipList::new();
    list.merge_entry(wire(2, 1), 10);
    list.merge_entry(wire(3, 1), 12);
    let mut removed = Vec::new();
    //when one tick before the deadline
    list.prune_expired(10 + fail + remove - 1, fail, remove, |entry| removed.push(entry.peer));
    //then
    assert!(removed.is_empty());
    assert_eq!(2, list.len());
    //when at the deadline
    let count = list.prune_expired(10 + fail + remove, fail, remove, |entry| removed.push(entry.peer));
    //then
    assert_eq!(1, count);
    assert_eq!(vec![peer(2)], removed);
    assert!(!list.contains(&peer(2)));
    assert!(list.contains(&peer(3)));
}

#[test]
fn suspected_rows_are_withheld_but_mergeable() {
    let (fail, remove) = (5, 20);
    let mut list = MembershipList::new();
    list.touch_self(peer(1), 30, 30);
    list.merge_entry(wire(2, 7), 20);
    list.merge_entry(wire(3, 2), 25);
    let now = 30;
    //then
    assert!(list.get(&peer(2)).unwrap().suspected(now, fail));
    assert!(!list.get(&peer(3)).unwrap().suspected(now, fail));
    assert_eq!(vec![wire(1, 30), wire(3, 2)], list.gossip_payload(now, fail));
    assert_eq!(3, list.snapshot().len());
    //when a fresher heartbeat arrives before removal
    assert_eq!(0, list.prune_expired(now, fail, remove, |_| {}));
    assert_eq!(MergeOutcome::Refreshed, list.merge_entry(wire(2, 8), now));
    //then
    assert!(list.gossip_payload(now, fail).contains(&wire(2, 8)));
}

#[test]
fn replace_with_stamps_local_time() {
    let mut list = MembershipList::new();
    list.merge_entry(wire(9, 9), 0);
    let mut inserted = Vec::new();
    //when
    list.replace_with(vec![wire(1, 4), wire(2, 0), wire(1, 6)], 11, |entry| inserted.push(entry.peer));
    //then
    assert_eq!(vec![peer(1), peer(2)], inserted);
    assert_eq!(vec![peer(1), peer(2)], list.peers());
    assert!(list.iter().all(|entry| entry.last_update == 11));
    assert_eq!(6, list.get(&peer(1)).unwrap().heartbeat);
}

#[test]
fn pick_k_random_members_excludes_self() {
    let mut rng = rand::thread_rng();
    let mut list = MembershipList::new();
    list.touch_self(peer(1), 0, 0);
    assert!(list.get_k_random_members(2, peer(1), &mut rng).is_empty());

    list.merge_entry(wire(2, 0), 0);
    //when
    let picked = list.get_k_random_members(2, peer(1), &mut rng);
    //then
    assert_eq!(vec![peer(2)], picked);

    list.merge_entry(wire(3, 0), 0);
    for _ in 0..50 {
        let picked = list.get_k_random_members(2, peer(1), &mut rng);
        assert_eq!(2, picked.len());
        assert!(picked.iter().all(|target| *target == peer(2) || *target == peer(3)));
    }
}
