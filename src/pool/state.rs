//! Pool bookkeeping
//!
//! Everything here is plain data guarded by the pool's lock. A name is in
//! `idle` exactly when its slot is `Available`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::types::RecentUse;

/// Where a sandbox is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Being created and started
    Provisioning,
    /// In the available set
    Available,
    /// Lent out
    Leased,
    /// Taken from the available set, being wiped and probed
    Validating,
    /// A stop+remove sequence is in flight
    Deleting,
    /// Not tracked by the pool
    Gone,
}

#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub state: SandboxState,
    pub last_used: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct PoolState {
    /// Available sandboxes, least recently returned first
    idle: VecDeque<String>,
    slots: HashMap<String, Slot>,
    /// Names whose removal failed; retried by the reaper
    retry: HashSet<String>,
}

impl PoolState {
    pub fn state_of(&self, name: &str) -> SandboxState {
        self.slots
            .get(name)
            .map(|slot| slot.state)
            .unwrap_or(SandboxState::Gone)
    }

    pub fn available(&self) -> usize {
        self.idle.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot.state, SandboxState::Leased | SandboxState::Validating))
            .count()
    }

    /// Every sandbox the pool currently owns, including ones being deleted
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn idle_names(&self) -> Vec<String> {
        self.idle.iter().cloned().collect()
    }

    /// Register a sandbox that is about to be created
    pub fn track(&mut self, name: &str) {
        self.slots.insert(
            name.to_string(),
            Slot {
                state: SandboxState::Provisioning,
                last_used: Instant::now(),
            },
        );
    }

    /// Forget a sandbox that never came up
    pub fn untrack(&mut self, name: &str) {
        self.slots.remove(name);
    }

    pub fn set_state(&mut self, name: &str, state: SandboxState) {
        if let Some(slot) = self.slots.get_mut(name) {
            slot.state = state;
        }
    }

    /// Pop the least recently returned available sandbox for validation
    pub fn take_idle(&mut self) -> Option<String> {
        let name = self.idle.pop_front()?;
        self.set_state(&name, SandboxState::Validating);
        Some(name)
    }

    /// Put a sandbox back in the available set
    pub fn push_idle(&mut self, name: &str) {
        let now = Instant::now();
        let slot = self.slots.entry(name.to_string()).or_insert(Slot {
            state: SandboxState::Available,
            last_used: now,
        });
        slot.state = SandboxState::Available;
        slot.last_used = now;
        if !self.idle.iter().any(|n| n == name) {
            self.idle.push_back(name.to_string());
        }
    }

    /// Mark `name` as being deleted
    ///
    /// Returns false when another caller already owns the deletion. Names the
    /// pool never tracked are claimed too, so strays can be removed.
    pub fn claim_deletion(&mut self, name: &str) -> bool {
        if self.state_of(name) == SandboxState::Deleting {
            return false;
        }
        self.idle.retain(|n| n != name);
        self.retry.remove(name);
        let now = Instant::now();
        self.slots
            .entry(name.to_string())
            .and_modify(|slot| slot.state = SandboxState::Deleting)
            .or_insert(Slot {
                state: SandboxState::Deleting,
                last_used: now,
            });
        true
    }

    /// Settle a deletion; failed removals are queued for the reaper
    pub fn finish_deletion(&mut self, name: &str, removed: bool) {
        self.slots.remove(name);
        if !removed {
            self.retry.insert(name.to_string());
        }
    }

    pub fn take_retries(&mut self) -> Vec<String> {
        self.retry.drain().collect()
    }

    /// Oldest-idle-first sandboxes to evict, never shrinking below `target`
    pub fn reap_candidates(&self, target: usize, idle_timeout: Duration, now: Instant) -> Vec<String> {
        let excess = self.idle.len().saturating_sub(target);
        if excess == 0 {
            return Vec::new();
        }
        self.idle
            .iter()
            .filter(|name| {
                self.slots
                    .get(name.as_str())
                    .is_some_and(|slot| now.saturating_duration_since(slot.last_used) >= idle_timeout)
            })
            .take(excess)
            .cloned()
            .collect()
    }

    /// Most recently returned available sandboxes, newest first
    pub fn recent(&self, limit: usize, now: Instant) -> Vec<RecentUse> {
        self.idle
            .iter()
            .rev()
            .take(limit)
            .filter_map(|name| {
                let slot = self.slots.get(name)?;
                Some(RecentUse {
                    name: name.clone(),
                    idle_secs: now.saturating_duration_since(slot.last_used).as_secs(),
                })
            })
            .collect()
    }
}

/// Whether a released sandbox goes back to the available set
///
/// `total` counts the sandbox being released. Overflow up to
/// `target + slack` is tolerated; beyond that the sandbox is kept only while
/// the available set is below target and the hard cap holds.
pub(crate) fn keep_on_release(
    available: usize,
    total: usize,
    target: usize,
    slack: usize,
    max_total: usize,
) -> bool {
    let excessive = total > target + slack;
    !excessive || (available < target && total <= max_total)
}
