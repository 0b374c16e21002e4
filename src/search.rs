//! Process-role drivers: the generator work loop and the supervisor
//! consume loop.
//!
//! Both loops are deliberately free of resource setup: the binaries own
//! creation/attachment and teardown, the loops own only the protocol
//! traffic. That keeps every path here drivable from tests with in-process
//! threads standing in for the worker processes.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;

use crate::coloring::{conflict_edges, random_coloring, render_record};
use crate::graph::Graph;
use crate::ring::{ProtocolError, SolutionRing, SubmitOutcome};
use crate::shm::EDGE_CEILING;

/// Why a role's loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// A zero-edge record proved the graph 3-colorable.
    Solved,
    /// The operator's stop flag was observed.
    Interrupted,
    /// The terminate broadcast was observed.
    ShutdownObserved,
}

/// Final state of a supervisor run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// Smallest removal-set size seen (0 when solved).
    pub best: u32,
    /// Record of the best accepted solution.
    pub record: String,
    /// Why the loop ended.
    pub reason: StopReason,
}

// ============================================================================
// Generator
// ============================================================================

/// Runs the generator work loop until the terminate broadcast.
///
/// Each pass colors the graph uniformly at random, collects the
/// monochromatic edges while they can still beat the watermark, and hands
/// an improving candidate to the protocol. Non-improving candidates are
/// dropped locally without touching the ring.
///
/// Shutdown is polled at the loop top and inside `submit` (the documented
/// poll points); this loop otherwise never exits on its own.
///
/// # Errors
/// Fails only on semaphore or segment faults.
pub fn generator_loop<R: Rng>(
    ring: &SolutionRing,
    graph: &Graph,
    rng: &mut R,
) -> Result<StopReason, ProtocolError> {
    loop {
        if ring.is_shutting_down() {
            return Ok(StopReason::ShutdownObserved);
        }

        let colors = random_coloring(graph.vertex_count(), rng);
        let Some(removal) = conflict_edges(graph, &colors, ring.watermark()) else {
            // Reached the watermark mid-scan: cannot improve, try again.
            continue;
        };

        let record = render_record(&removal);
        match ring.submit(&record, removal.len() as u32)? {
            SubmitOutcome::Accepted | SubmitOutcome::Superseded => {}
            SubmitOutcome::ShuttingDown => return Ok(StopReason::ShutdownObserved),
            SubmitOutcome::RecordTooLong => {
                // Unreachable while MAX_VERTEX_INDEX bounds token width.
                eprintln!(
                    "generator: dropping oversize candidate ({} edges)",
                    removal.len()
                );
            }
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Runs the supervisor consume loop until solved or interrupted.
///
/// Prints one line per strictly improving solution and the terminal line
/// when a zero-edge record arrives, then issues the terminate broadcast.
/// Setting `stop` (from a signal handler) takes the identical controlled
/// shutdown path; a corrupt slot is reported and skipped, not fatal.
///
/// # Errors
/// Fails only on semaphore or segment faults.
pub fn supervisor_loop(
    ring: &SolutionRing,
    stop: &AtomicBool,
) -> Result<RunOutcome, ProtocolError> {
    let mut best = EDGE_CEILING;
    let mut best_record = String::new();

    loop {
        if stop.load(Ordering::SeqCst) {
            ring.request_shutdown()?;
            return Ok(RunOutcome {
                best,
                record: best_record,
                reason: StopReason::Interrupted,
            });
        }

        let sub = match ring.consume() {
            Ok(sub) => sub,
            // A signal interrupted the wait; the loop top polls `stop`.
            Err(ProtocolError::Interrupted) => continue,
            Err(ProtocolError::CorruptRecord { slot, cause }) => {
                eprintln!("supervisor: discarding corrupt record in slot {slot}: {cause}");
                continue;
            }
            Err(e) => return Err(e),
        };

        if sub.edges == 0 {
            println!("Graph is 3-colorable!");
            ring.request_shutdown()?;
            return Ok(RunOutcome {
                best: 0,
                record: String::new(),
                reason: StopReason::Solved,
            });
        }

        if sub.edges < best {
            best = sub.edges;
            best_record = sub.record;
            println!("Found solution with {best} edges: {best_record}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::parse_edge_list;
    use crate::ring::RingNames;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn unique_names(tag: &str) -> RingNames {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        RingNames::with_prefix(&format!(
            "tricolor_test_{tag}_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    fn spawn_generators(
        names: &RingNames,
        edges: &str,
        count: usize,
    ) -> Vec<thread::JoinHandle<StopReason>> {
        (0..count)
            .map(|worker| {
                let names = names.clone();
                let tokens: Vec<String> = edges.split(' ').map(str::to_string).collect();
                thread::spawn(move || {
                    let parsed = parse_edge_list(&tokens).unwrap();
                    let graph = Graph::from_edges(&parsed);
                    let ring = SolutionRing::attach(&names).unwrap();
                    let mut rng = XorShiftRng::seed_from_u64(0x5eed + worker as u64);
                    generator_loop(&ring, &graph, &mut rng).unwrap()
                })
            })
            .collect()
    }

    #[test]
    fn triangle_end_to_end_reaches_zero_and_broadcasts() {
        let names = unique_names("triangle");
        let ring = SolutionRing::create(&names).unwrap();
        let generators = spawn_generators(&names, "0-1 1-2 0-2", 3);

        let stop = AtomicBool::new(false);
        let outcome = supervisor_loop(&ring, &stop).unwrap();
        assert_eq!(outcome.reason, StopReason::Solved);
        assert_eq!(outcome.best, 0);
        assert!(ring.is_shutting_down());

        for g in generators {
            assert_eq!(g.join().unwrap(), StopReason::ShutdownObserved);
        }
    }

    #[test]
    fn four_clique_converges_to_one_and_never_reports_zero() {
        let names = unique_names("clique");
        let ring = Arc::new(SolutionRing::create(&names).unwrap());
        let generators = spawn_generators(&names, "0-1 0-2 0-3 1-2 1-3 2-3", 2);

        // K4 needs at least one removed edge; the watermark must settle at
        // exactly 1 without any consumer taking records off the ring (at
        // most EDGE_CEILING records are ever accepted, so nothing blocks).
        let deadline = Instant::now() + Duration::from_secs(10);
        while ring.watermark() > 1 {
            assert!(Instant::now() < deadline, "watermark never reached 1");
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(ring.watermark(), 1);

        ring.request_shutdown().unwrap();
        for g in generators {
            assert_eq!(g.join().unwrap(), StopReason::ShutdownObserved);
        }

        // Drain the backlog: every accepted record names at least one edge.
        while ring.used_permits().unwrap() > 0 {
            let sub = ring.consume().unwrap();
            assert!(sub.edges >= 1, "a zero-edge record for a 4-clique");
        }
        assert_eq!(ring.watermark(), 1);
    }

    #[test]
    fn supervisor_stop_flag_takes_the_controlled_shutdown_path() {
        let names = unique_names("interrupt");
        let ring = SolutionRing::create(&names).unwrap();

        let stop = AtomicBool::new(true);
        let outcome = supervisor_loop(&ring, &stop).unwrap();
        assert_eq!(outcome.reason, StopReason::Interrupted);
        assert_eq!(outcome.best, EDGE_CEILING);
        assert!(ring.is_shutting_down());
    }

    #[test]
    fn supervisor_tracks_strict_improvements_until_terminal() {
        let names = unique_names("improve");
        let ring = SolutionRing::create(&names).unwrap();
        ring.submit("0-1 1-2 2-3 3-4", 4).unwrap();
        ring.submit("0-1 1-2", 2).unwrap();
        ring.submit("", 0).unwrap();

        let stop = AtomicBool::new(false);
        let outcome = supervisor_loop(&ring, &stop).unwrap();
        assert_eq!(outcome.reason, StopReason::Solved);
        assert_eq!(outcome.best, 0);
    }

    #[test]
    fn generator_observes_a_preexisting_broadcast() {
        let names = unique_names("late");
        let ring = SolutionRing::create(&names).unwrap();
        ring.request_shutdown().unwrap();

        let graph = Graph::from_edges(&parse_edge_list(&["0-1"]).unwrap());
        let mut rng = XorShiftRng::seed_from_u64(9);
        let reason = generator_loop(&ring, &graph, &mut rng).unwrap();
        assert_eq!(reason, StopReason::ShutdownObserved);
    }
}
