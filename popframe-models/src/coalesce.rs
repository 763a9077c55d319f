//! Per-region build coalescing.
//!
//! The artifact cache does no locking of its own, so at most one task may
//! write a region at a time. The first caller for a region becomes the
//! leader and does the work; callers arriving while it runs subscribe to
//! the leader's broadcast and receive the same outcome.
//!
//! ```text
//! get_or_build(42) ─┐
//!                   │                      leader
//! recalculate(42) ──┼──► BuildCoalescer ──► compute ──► cache
//!                   │          │                 │
//! get_or_build(42) ─┘          ▼                 │
//!                     followers receive ◄────────┘
//!                     the same outcome
//! ```
//!
//! The leader's work runs in its own task holding the [`LeaderGuard`], so a
//! caller that stops waiting does not stop the computation. A guard that is
//! dropped before completing (the task panicked) releases the slot;
//! followers then observe a closed channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use popframe_core::{PopframeError, PopframeResult, RegionId};
use serde_json::json;
use tokio::sync::broadcast;

/// What the leader did with the region slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A current artifact is in the cache.
    Built,
    /// The region's entries were removed from the cache.
    Invalidated,
}

pub(crate) type Outcome = PopframeResult<Completion>;

/// Counters for monitoring how often work is shared.
#[derive(Debug, Default)]
pub struct CoalescerStats {
    total: AtomicU64,
    coalesced: AtomicU64,
}

impl CoalescerStats {
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Share of registrations that joined an in-flight computation.
    pub fn coalescing_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.coalesced() as f64 / total as f64
        }
    }
}

/// In-flight map of region id to the leader's result channel.
#[derive(Debug, Default)]
pub struct BuildCoalescer {
    in_flight: DashMap<RegionId, broadcast::Sender<Outcome>>,
    stats: CoalescerStats,
}

pub(crate) enum Registration {
    Leader(LeaderGuard),
    Follower(broadcast::Receiver<Outcome>),
}

impl BuildCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(self: &Arc<Self>, region_id: RegionId) -> Registration {
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        match self.in_flight.entry(region_id) {
            Entry::Occupied(entry) => {
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%region_id, "Joining in-flight computation");
                Registration::Follower(entry.get().subscribe())
            }
            Entry::Vacant(entry) => {
                let (sender, _) = broadcast::channel(1);
                entry.insert(sender.clone());
                Registration::Leader(LeaderGuard {
                    coalescer: Arc::clone(self),
                    region_id,
                    sender,
                    finished: false,
                })
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, region_id: RegionId) -> bool {
        self.in_flight.contains_key(&region_id)
    }

    pub fn stats(&self) -> &CoalescerStats {
        &self.stats
    }
}

/// Held by the task doing the work for a region; releases the slot on drop.
pub(crate) struct LeaderGuard {
    coalescer: Arc<BuildCoalescer>,
    region_id: RegionId,
    sender: broadcast::Sender<Outcome>,
    finished: bool,
}

impl LeaderGuard {
    /// Release the slot and hand `outcome` to every follower.
    pub(crate) fn complete(mut self, outcome: &Outcome) {
        self.coalescer.in_flight.remove(&self.region_id);
        self.finished = true;
        let waiters = self.sender.receiver_count();
        // no receivers is fine
        let _ = self.sender.send(outcome.clone());
        if waiters > 0 {
            tracing::debug!(region_id = %self.region_id, waiters, "Shared outcome with waiters");
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.coalescer.in_flight.remove(&self.region_id);
            tracing::warn!(region_id = %self.region_id, "Computation abandoned before completion");
        }
    }
}

/// Wait for the leader's outcome.
pub(crate) async fn follow(mut receiver: broadcast::Receiver<Outcome>, region_id: RegionId) -> Outcome {
    match receiver.recv().await {
        Ok(outcome) => outcome,
        Err(e) => Err(PopframeError::internal(
            "computation abandoned",
            json!({ "region_id": region_id }),
            json!({ "error": e.to_string() }),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_registration_follows_leader() {
        let coalescer = Arc::new(BuildCoalescer::new());
        let region = RegionId::new(42);

        let Registration::Leader(guard) = coalescer.register(region) else {
            panic!("first registration must lead");
        };
        let Registration::Follower(receiver) = coalescer.register(region) else {
            panic!("second registration must follow");
        };
        assert!(coalescer.is_in_flight(region));

        guard.complete(&Ok(Completion::Built));
        assert!(!coalescer.is_in_flight(region));
        assert_eq!(follow(receiver, region).await, Ok(Completion::Built));

        assert_eq!(coalescer.stats().total(), 2);
        assert_eq!(coalescer.stats().coalesced(), 1);
        assert!((coalescer.stats().coalescing_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_followers() {
        let coalescer = Arc::new(BuildCoalescer::new());
        let region = RegionId::new(7);

        let leader = coalescer.register(region);
        let Registration::Follower(receiver) = coalescer.register(region) else {
            panic!("second registration must follow");
        };
        drop(leader);

        assert_eq!(coalescer.in_flight_count(), 0);
        let err = follow(receiver, region).await.expect_err("leader vanished");
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.message(), "computation abandoned");

        assert!(matches!(coalescer.register(region), Registration::Leader(_)));
    }

    #[test]
    fn test_regions_do_not_block_each_other() {
        let coalescer = Arc::new(BuildCoalescer::new());
        let a = coalescer.register(RegionId::new(1));
        let b = coalescer.register(RegionId::new(2));
        assert!(matches!(a, Registration::Leader(_)));
        assert!(matches!(b, Registration::Leader(_)));
        assert_eq!(coalescer.in_flight_count(), 2);
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let coalescer = Arc::new(BuildCoalescer::new());
        let region = RegionId::new(9);
        let Registration::Leader(guard) = coalescer.register(region) else {
            panic!("first registration must lead");
        };
        let Registration::Follower(receiver) = coalescer.register(region) else {
            panic!("second registration must follow");
        };

        let failure = PopframeError::not_found("matrix for region 9 not found", json!({}));
        guard.complete(&Err(failure.clone()));
        assert_eq!(follow(receiver, region).await, Err(failure));
    }
}
