//! Per-caller sequence generation and pending-request correlation.
//!
//! The correlator bridges the boundary between a caller's logical thread
//! and the driver worker tasks. A caller allocates a sequence number,
//! registers a [`Suspension`] under `(caller, sequence)`, and awaits it;
//! the worker later resolves the same key with a [`Reply`]. Resumption is
//! plain message passing over a oneshot channel, so the correlator is not
//! tied to any particular scheduler.
//!
//! The pending table and the sequence counters are independent concurrent
//! maps; no lock is held across both, and none is held while a caller is
//! suspended.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{error, warn};

use crate::error::DbError;
use crate::value::Row;

/// Opaque identifier for a logical thread, supplied by the host runtime.
///
/// Stable for the life of the logical thread; sequence numbers are scoped
/// to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerId(u32);

impl CallerId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for CallerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a completed request resumes its caller with.
#[derive(Debug)]
pub(crate) enum Reply {
    Rows(Vec<Row>),
    Committed,
    Error(DbError),
}

/// A request dispatched but not yet completed.
struct PendingRequest {
    connection: String,
    created_at: Instant,
    resume: oneshot::Sender<Reply>,
}

/// The receiver half handed to a suspending caller.
///
/// Awaiting [`resume`](Self::resume) is the single suspension point in the
/// gateway.
pub(crate) struct Suspension {
    rx: oneshot::Receiver<Reply>,
}

impl Suspension {
    /// Blocks the logical thread until the matching completion arrives.
    ///
    /// A sender dropped without completing (entry evicted, worker died
    /// mid-request) resumes with a `ProtocolAnomaly` error rather than
    /// hanging forever.
    pub(crate) async fn resume(self) -> Reply {
        self.rx.await.unwrap_or_else(|_| {
            Reply::Error(DbError::anomaly("pending request evicted before completion"))
        })
    }
}

/// Shared pending-request table plus per-caller sequence counters.
#[derive(Default)]
pub(crate) struct Correlator {
    pending: DashMap<(CallerId, i64), PendingRequest>,
    counters: DashMap<CallerId, AtomicI64>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates the next sequence number for `caller`.
    ///
    /// Monotonically increasing per caller, starting at 1; zero is reserved
    /// for fire-and-forget dispatch and is never returned here. The 63-bit
    /// positive range makes wrap-around collision with a live entry
    /// practically unreachable; `register` still checks.
    pub(crate) fn next_sequence(&self, caller: CallerId) -> i64 {
        let seq = self
            .counters
            .entry(caller)
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        debug_assert!(seq > 0, "sequence counter wrapped for caller {caller}");
        seq
    }

    /// Registers a pending request and returns the caller's suspension.
    pub(crate) fn register(
        &self,
        caller: CallerId,
        sequence: i64,
        connection: &str,
    ) -> Suspension {
        let (tx, rx) = oneshot::channel();
        let prior = self.pending.insert(
            (caller, sequence),
            PendingRequest {
                connection: connection.to_string(),
                created_at: Instant::now(),
                resume: tx,
            },
        );
        if prior.is_some() {
            // Replacing drops the old sender, so the stale waiter resumes
            // with an anomaly instead of hanging.
            error!(%caller, sequence, "sequence collision replaced a live pending request");
            debug_assert!(false, "sequence collision for ({caller}, {sequence})");
        }
        Suspension { rx }
    }

    /// Resolves a pending request, resuming its suspended caller.
    ///
    /// A completion for an unknown pair is a protocol anomaly: logged,
    /// dropped, and harmless to every other entry.
    pub(crate) fn complete(&self, caller: CallerId, sequence: i64, reply: Reply) {
        match self.pending.remove(&(caller, sequence)) {
            Some((_, entry)) => {
                if entry.resume.send(reply).is_err() {
                    warn!(
                        %caller,
                        sequence,
                        connection = %entry.connection,
                        "caller went away before its completion arrived"
                    );
                }
            }
            None => {
                warn!(%caller, sequence, "completion for unknown request dropped");
            }
        }
    }

    /// Silently removes one entry. Sender-side cleanup for a dispatch that
    /// registered but failed to enqueue.
    pub(crate) fn discard(&self, caller: CallerId, sequence: i64) {
        self.pending.remove(&(caller, sequence));
    }

    /// Number of pending requests targeting `connection`.
    pub(crate) fn pending_count(&self, connection: &str) -> usize {
        self.pending
            .iter()
            .filter(|entry| entry.connection == connection)
            .count()
    }

    /// Drops entries older than `ttl`, reclaiming requests whose completion
    /// will never arrive. Evicted waiters resume with an anomaly error.
    pub(crate) fn evict_older_than(&self, ttl: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, entry| entry.created_at.elapsed() < ttl);
        let evicted = before.saturating_sub(self.pending.len());
        if evicted > 0 {
            warn!(evicted, "evicted stale pending requests");
        }
        evicted
    }

    /// Teardown notification: drops every entry and the counter for a
    /// logical thread that no longer exists.
    pub(crate) fn discard_caller(&self, caller: CallerId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(owner, _), _| *owner != caller);
        self.counters.remove(&caller);
        before.saturating_sub(self.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_monotonic_and_per_caller() {
        let c = Correlator::new();
        let a = CallerId::new(1);
        let b = CallerId::new(2);
        assert_eq!(c.next_sequence(a), 1);
        assert_eq!(c.next_sequence(a), 2);
        assert_eq!(c.next_sequence(b), 1);
        assert_eq!(c.next_sequence(a), 3);
    }

    #[test]
    fn no_two_outstanding_entries_share_a_key() {
        let c = Correlator::new();
        let caller = CallerId::new(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let seq = c.next_sequence(caller);
            assert!(seen.insert(seq));
            let _s = c.register(caller, seq, "db");
        }
        assert_eq!(c.pending_count("db"), 100);
    }

    #[tokio::test]
    async fn complete_resumes_the_suspension() {
        let c = Correlator::new();
        let caller = CallerId::new(1);
        let seq = c.next_sequence(caller);
        let suspension = c.register(caller, seq, "db");

        c.complete(caller, seq, Reply::Committed);
        assert!(matches!(suspension.resume().await, Reply::Committed));
        assert_eq!(c.pending_count("db"), 0);
    }

    #[tokio::test]
    async fn unknown_completion_is_a_noop() {
        let c = Correlator::new();
        let caller = CallerId::new(1);
        let seq = c.next_sequence(caller);
        let suspension = c.register(caller, seq, "db");

        // Wrong sequence, wrong caller: neither touches the live entry.
        c.complete(caller, seq + 100, Reply::Committed);
        c.complete(CallerId::new(99), seq, Reply::Committed);
        assert_eq!(c.pending_count("db"), 1);

        c.complete(caller, seq, Reply::Rows(Vec::new()));
        assert!(matches!(suspension.resume().await, Reply::Rows(_)));
    }

    #[tokio::test]
    async fn evicted_suspension_resumes_with_anomaly() {
        let c = Correlator::new();
        let caller = CallerId::new(3);
        let seq = c.next_sequence(caller);
        let suspension = c.register(caller, seq, "db");

        assert_eq!(c.evict_older_than(Duration::ZERO), 1);
        assert_eq!(c.pending_count("db"), 0);
        match suspension.resume().await {
            Reply::Error(e) => {
                assert_eq!(e.kind, crate::error::ErrorKind::ProtocolAnomaly);
            }
            other => panic!("expected anomaly, got {other:?}"),
        }
    }

    #[test]
    fn eviction_keeps_fresh_entries() {
        let c = Correlator::new();
        let caller = CallerId::new(4);
        let seq = c.next_sequence(caller);
        let _s = c.register(caller, seq, "db");
        assert_eq!(c.evict_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(c.pending_count("db"), 1);
    }

    #[test]
    fn discard_caller_reclaims_only_that_caller() {
        let c = Correlator::new();
        let gone = CallerId::new(1);
        let alive = CallerId::new(2);
        let _a = c.register(gone, c.next_sequence(gone), "db");
        let _b = c.register(gone, c.next_sequence(gone), "db");
        let _c = c.register(alive, c.next_sequence(alive), "db");

        assert_eq!(c.discard_caller(gone), 2);
        assert_eq!(c.pending_count("db"), 1);
    }

    #[test]
    fn pending_count_is_per_connection() {
        let c = Correlator::new();
        let caller = CallerId::new(1);
        let _a = c.register(caller, c.next_sequence(caller), "db1");
        let _b = c.register(caller, c.next_sequence(caller), "db2");
        assert_eq!(c.pending_count("db1"), 1);
        assert_eq!(c.pending_count("db2"), 1);
        assert_eq!(c.pending_count("db3"), 0);
    }
}
