//! The coordination protocol: a bounded multi-producer / single-consumer
//! ring of text records plus a shared best-score watermark.
//!
//! Three named semaphores guard the shared segment:
//!
//! - `free` (initially [`RING_CAPACITY`]): backpressure; a producer blocks
//!   here while the ring is full, so at most `RING_CAPACITY` records are
//!   ever in flight.
//! - `used` (initially 0): the consumer blocks here while the ring is
//!   empty.
//! - `mutex` (initially 1): serializes the compound producer step:
//!   re-check watermark, write slot, advance write index, lower watermark.
//!
//! The consumer side needs no mutex: `read_index` has a single writer.
//!
//! Shutdown is two-phase. Phase one: the consumer makes the one-time 0→1
//! `terminate` transition. Phase two: it posts [`RING_CAPACITY`] free
//! permits, waking every producer blocked on a full ring; each woken
//! producer observes the flag, re-posts one permit (so the wake cascades
//! to any number of blocked producers), and exits without submitting.

use std::fmt;

use crate::coloring::record_edge_count;
use crate::sem::{NamedSemaphore, SemError};
use crate::shm::{SharedSegment, ShmError, MAX_RECORD_LEN, RING_CAPACITY};

// ============================================================================
// Resource names
// ============================================================================

/// Names of the four shared resources, known to both process roles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingNames {
    /// Shared-memory segment name.
    pub segment: String,
    /// Free-slot semaphore name.
    pub free: String,
    /// Used-slot semaphore name.
    pub used: String,
    /// Mutex semaphore name.
    pub mutex: String,
}

impl RingNames {
    /// Derives the four names from a common prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            segment: format!("/{prefix}_ring"),
            free: format!("/{prefix}_free"),
            used: format!("/{prefix}_used"),
            mutex: format!("/{prefix}_mutex"),
        }
    }
}

impl Default for RingNames {
    fn default() -> Self {
        Self::with_prefix("tricolor")
    }
}

// ============================================================================
// Protocol results
// ============================================================================

/// What became of a producer's submission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The record was written and the watermark lowered.
    Accepted,
    /// The watermark improved past this candidate while the producer was
    /// computing or waiting; the claimed slot was returned unused.
    Superseded,
    /// The terminate flag is set; the producer must exit without
    /// submitting.
    ShuttingDown,
    /// The record exceeds [`MAX_RECORD_LEN`] and was rejected before
    /// claiming a slot.
    RecordTooLong,
}

/// A record taken off the ring by the consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    /// The removal-set record (possibly empty).
    pub record: String,
    /// Number of edge tokens in the record.
    pub edges: u32,
}

// ============================================================================
// SolutionRing
// ============================================================================

/// One process role's handle to the shared ring and its semaphores.
///
/// The supervisor holds the owning handle (creation and teardown); each
/// generator holds an attached handle. Dropping the owner closes and
/// unlinks every resource; dropping an attached handle only detaches.
#[derive(Debug)]
pub struct SolutionRing {
    segment: SharedSegment,
    free: NamedSemaphore,
    used: NamedSemaphore,
    mutex: NamedSemaphore,
}

impl SolutionRing {
    /// Creates the segment and semaphores (supervisor side).
    ///
    /// Resources created before a later step fails are rolled back by
    /// their owning handles' `Drop` on the error return path.
    ///
    /// # Errors
    /// Fails if any resource already exists or cannot be created.
    pub fn create(names: &RingNames) -> Result<Self, ProtocolError> {
        let segment = SharedSegment::create(&names.segment)?;
        let free = NamedSemaphore::create(&names.free, RING_CAPACITY as u32)?;
        let used = NamedSemaphore::create(&names.used, 0)?;
        let mutex = NamedSemaphore::create(&names.mutex, 1)?;
        Ok(Self {
            segment,
            free,
            used,
            mutex,
        })
    }

    /// Attaches to pre-existing resources (generator side).
    ///
    /// # Errors
    /// Fails fast if the supervisor has not created the resources.
    pub fn attach(names: &RingNames) -> Result<Self, ProtocolError> {
        let segment = SharedSegment::attach(&names.segment)?;
        let free = NamedSemaphore::open(&names.free)?;
        let used = NamedSemaphore::open(&names.used)?;
        let mutex = NamedSemaphore::open(&names.mutex)?;
        Ok(Self {
            segment,
            free,
            used,
            mutex,
        })
    }

    /// Current watermark (smallest accepted removal-set size).
    #[inline]
    pub fn watermark(&self) -> u32 {
        self.segment.best_edge_count()
    }

    /// Whether the terminate broadcast has been issued.
    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.segment.is_terminated()
    }

    /// Outstanding free permits. Diagnostic only.
    pub fn free_permits(&self) -> Result<i32, ProtocolError> {
        Ok(self.free.value()?)
    }

    /// Outstanding used permits. Diagnostic only.
    pub fn used_permits(&self) -> Result<i32, ProtocolError> {
        Ok(self.used.value()?)
    }

    /// Submits a candidate record claiming `edge_count` removed edges
    /// (producer side).
    ///
    /// Blocks while the ring is full. The watermark is re-checked under
    /// the mutex: a candidate that was an improvement when computed may be
    /// superseded by the time the producer holds the lock, in which case
    /// the claimed free permit is returned and nothing is written.
    ///
    /// # Errors
    /// Fails on semaphore faults; never on protocol-level rejection
    /// (rejections are [`SubmitOutcome`] variants).
    pub fn submit(&self, record: &str, edge_count: u32) -> Result<SubmitOutcome, ProtocolError> {
        if self.segment.is_terminated() {
            return Ok(SubmitOutcome::ShuttingDown);
        }
        if record.len() > MAX_RECORD_LEN {
            return Ok(SubmitOutcome::RecordTooLong);
        }

        // Backpressure wait. A signal wakes us early; re-poll the flag and
        // keep waiting otherwise.
        loop {
            match self.free.wait() {
                Ok(()) => break,
                Err(SemError::Interrupted) => {
                    if self.segment.is_terminated() {
                        return Ok(SubmitOutcome::ShuttingDown);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Shutdown may have begun while we were blocked. Hand the permit
        // onward so the wake reaches every other blocked producer.
        if self.segment.is_terminated() {
            self.free.post()?;
            return Ok(SubmitOutcome::ShuttingDown);
        }

        loop {
            match self.mutex.wait() {
                Ok(()) => break,
                Err(SemError::Interrupted) => {}
                Err(e) => {
                    let _ = self.free.post();
                    return Err(e.into());
                }
            }
        }

        let best = self.segment.best_edge_count();
        if edge_count >= best {
            // Acquire-then-abandon: the free permit must go back, or the
            // ring's advertised capacity shrinks permanently.
            self.mutex.post()?;
            self.free.post()?;
            return Ok(SubmitOutcome::Superseded);
        }

        let idx = self.segment.advance_write_index();
        self.segment.write_slot(idx, record.as_bytes());
        self.segment.set_best_edge_count(edge_count);
        self.mutex.post()?;
        self.used.post()?;
        Ok(SubmitOutcome::Accepted)
    }

    /// Takes the oldest record off the ring (consumer side).
    ///
    /// Blocks while the ring is empty.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Interrupted`] when a signal interrupts the
    /// wait (the supervisor's cue to poll its stop flag) and
    /// [`ProtocolError::CorruptRecord`] if a slot fails the defensive
    /// read; the slot is still released in that case.
    pub fn consume(&self) -> Result<Submission, ProtocolError> {
        match self.used.wait() {
            Ok(()) => {}
            Err(SemError::Interrupted) => return Err(ProtocolError::Interrupted),
            Err(e) => return Err(e.into()),
        }

        let idx = self.segment.advance_read_index();
        let bytes = self.segment.read_slot(idx);
        self.segment.clear_slot(idx);
        let decoded = String::from_utf8(bytes);
        self.free.post()?;

        match decoded {
            Ok(record) => {
                let edges = record_edge_count(&record);
                Ok(Submission { record, edges })
            }
            Err(e) => Err(ProtocolError::CorruptRecord {
                slot: idx,
                cause: e.to_string(),
            }),
        }
    }

    /// Issues the terminate broadcast (consumer side).
    ///
    /// Idempotent: only the first call makes the 0→1 transition and posts
    /// the [`RING_CAPACITY`] free permits that unblock waiting producers.
    /// Returns whether this call made the transition.
    ///
    /// # Errors
    /// Fails only on semaphore faults.
    pub fn request_shutdown(&self) -> Result<bool, ProtocolError> {
        if !self.segment.set_terminated() {
            return Ok(false);
        }
        for _ in 0..RING_CAPACITY {
            self.free.post()?;
        }
        Ok(true)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors crossing the protocol boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Shared-segment setup failed.
    Segment(ShmError),
    /// A semaphore operation failed.
    Semaphore(SemError),
    /// A blocking consume was interrupted by a signal.
    Interrupted,
    /// A consumed slot failed the defensive read.
    CorruptRecord {
        /// Slot index.
        slot: usize,
        /// Decoding failure text.
        cause: String,
    },
}

impl From<ShmError> for ProtocolError {
    fn from(e: ShmError) -> Self {
        ProtocolError::Segment(e)
    }
}

impl From<SemError> for ProtocolError {
    fn from(e: SemError) -> Self {
        match e {
            SemError::Interrupted => ProtocolError::Interrupted,
            other => ProtocolError::Semaphore(other),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Segment(e) => write!(f, "{e}"),
            ProtocolError::Semaphore(e) => write!(f, "{e}"),
            ProtocolError::Interrupted => write!(f, "blocking wait interrupted by signal"),
            ProtocolError::CorruptRecord { slot, cause } => {
                write!(f, "corrupt record in slot {slot}: {cause}")
            }
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Segment(e) => Some(e),
            ProtocolError::Semaphore(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::EDGE_CEILING;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn unique_names(tag: &str) -> RingNames {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        RingNames::with_prefix(&format!(
            "tricolor_test_{tag}_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// A record naming `count` distinct edges.
    fn record_with(count: u32) -> String {
        (0..count)
            .map(|i| format!("{i}-{}", i + 1))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn accept_gate_requires_strict_improvement() {
        let ring = SolutionRing::create(&unique_names("gate")).unwrap();
        assert_eq!(ring.watermark(), EDGE_CEILING);

        assert_eq!(ring.submit(&record_with(3), 3).unwrap(), SubmitOutcome::Accepted);
        assert_eq!(ring.watermark(), 3);

        // Equal is not an improvement.
        assert_eq!(
            ring.submit(&record_with(3), 3).unwrap(),
            SubmitOutcome::Superseded
        );
        assert_eq!(
            ring.submit(&record_with(5), 5).unwrap(),
            SubmitOutcome::Superseded
        );

        assert_eq!(ring.submit(&record_with(1), 1).unwrap(), SubmitOutcome::Accepted);
        assert_eq!(ring.watermark(), 1);
    }

    #[test]
    fn superseded_submission_returns_its_permit() {
        let ring = SolutionRing::create(&unique_names("abandon")).unwrap();

        // Adversarial interleaving: counts 3 and 5 against watermark 8,
        // count 3 reaching the mutex first.
        assert_eq!(ring.submit(&record_with(3), 3).unwrap(), SubmitOutcome::Accepted);
        assert_eq!(
            ring.submit(&record_with(5), 5).unwrap(),
            SubmitOutcome::Superseded
        );

        // Exactly one record in flight; the abandoned permit came back.
        assert_eq!(ring.used_permits().unwrap(), 1);
        assert_eq!(ring.free_permits().unwrap(), RING_CAPACITY as i32 - 1);

        let sub = ring.consume().unwrap();
        assert_eq!(sub.edges, 3);
        assert_eq!(ring.free_permits().unwrap(), RING_CAPACITY as i32);
    }

    #[test]
    fn consume_returns_records_in_fifo_order() {
        let ring = SolutionRing::create(&unique_names("fifo")).unwrap();
        ring.submit(&record_with(4), 4).unwrap();
        ring.submit(&record_with(2), 2).unwrap();

        let first = ring.consume().unwrap();
        assert_eq!(first.record, record_with(4));
        assert_eq!(first.edges, 4);

        let second = ring.consume().unwrap();
        assert_eq!(second.record, record_with(2));
        assert_eq!(second.edges, 2);
    }

    #[test]
    fn oversize_record_is_rejected_without_claiming_a_slot() {
        let ring = SolutionRing::create(&unique_names("oversize")).unwrap();
        let record = "1000-2000 ".repeat(12);
        assert!(record.len() > MAX_RECORD_LEN);
        assert_eq!(
            ring.submit(&record, 7).unwrap(),
            SubmitOutcome::RecordTooLong
        );
        assert_eq!(ring.free_permits().unwrap(), RING_CAPACITY as i32);
        assert_eq!(ring.used_permits().unwrap(), 0);
    }

    #[test]
    fn terminate_transition_happens_once_and_posts_the_burst() {
        let ring = SolutionRing::create(&unique_names("term")).unwrap();
        ring.submit("", 0).unwrap();
        let sub = ring.consume().unwrap();
        assert_eq!(sub.edges, 0);
        assert_eq!(sub.record, "");

        assert!(ring.request_shutdown().unwrap());
        assert!(!ring.request_shutdown().unwrap());
        // One burst only: all slots free, plus RING_CAPACITY wake permits.
        assert_eq!(ring.free_permits().unwrap(), 2 * RING_CAPACITY as i32);

        // Producers observe the flag before touching the semaphores.
        assert_eq!(
            ring.submit(&record_with(1), 1).unwrap(),
            SubmitOutcome::ShuttingDown
        );
    }

    #[test]
    fn shutdown_wakes_a_producer_blocked_on_a_full_ring() {
        let ring = Arc::new(SolutionRing::create(&unique_names("wake")).unwrap());

        // Simulate a full ring by draining every free permit.
        for _ in 0..RING_CAPACITY {
            ring.free.wait().unwrap();
        }

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.submit("0-1", 1))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        assert!(ring.request_shutdown().unwrap());
        let outcome = producer.join().unwrap().unwrap();
        assert_eq!(outcome, SubmitOutcome::ShuttingDown);

        // The woken producer re-posted its permit for the next waiter.
        assert!(ring.free_permits().unwrap() >= RING_CAPACITY as i32);
    }

    #[test]
    fn attach_without_supervisor_fails_fast() {
        let err = SolutionRing::attach(&unique_names("orphan")).unwrap_err();
        assert!(matches!(err, ProtocolError::Segment(ShmError::Open { .. })));
    }

    #[test]
    fn attached_handle_shares_the_owner_state() {
        let names = unique_names("pair");
        let owner = SolutionRing::create(&names).unwrap();
        let attached = SolutionRing::attach(&names).unwrap();

        assert_eq!(
            attached.submit(&record_with(2), 2).unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(owner.watermark(), 2);

        let sub = owner.consume().unwrap();
        assert_eq!(sub.edges, 2);

        owner.request_shutdown().unwrap();
        assert!(attached.is_shutting_down());
    }

    #[test]
    fn concurrent_submitters_keep_the_watermark_monotonic() {
        let names = unique_names("stress");
        let ring = Arc::new(SolutionRing::create(&names).unwrap());

        let submitters: Vec<_> = (0..8)
            .map(|_| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    // Every thread walks the full ladder down to zero; the
                    // gate decides who lands each rung.
                    for count in (0..EDGE_CEILING).rev() {
                        ring.submit(&record_with(count), count).unwrap();
                    }
                })
            })
            .collect();

        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut seen = Vec::new();
                loop {
                    let sub = ring.consume().unwrap();
                    // Slot integrity: the record really names that many
                    // edges (no torn or interleaved writes).
                    assert_eq!(sub.record, record_with(sub.edges));
                    let done = sub.edges == 0;
                    seen.push(sub.edges);
                    if done {
                        ring.request_shutdown().unwrap();
                        return seen;
                    }
                }
            })
        };

        for t in submitters {
            t.join().unwrap();
        }
        let seen = consumer.join().unwrap();

        // Accepted counts are strictly decreasing end to end.
        for pair in seen.windows(2) {
            assert!(pair[1] < pair[0], "watermark regressed: {seen:?}");
        }
        assert_eq!(*seen.last().unwrap(), 0);
    }
}
