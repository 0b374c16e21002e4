//! # tricolor
//!
//! Distributed randomized search for a smallest set of edges whose removal
//! makes an undirected graph 3-colorable.
//!
//! The work is split across processes: many short-lived **generators**
//! color the graph uniformly at random and collect the conflicting edges
//! as a repair candidate, while a single **supervisor** tracks the best
//! (smallest) candidate seen and shuts the whole system down once a
//! zero-edge candidate proves the graph 3-colorable.
//!
//! The processes coordinate through a fixed-capacity ring of text records
//! in POSIX shared memory, guarded by three named semaphores: a free-slot
//! counter (backpressure), a used-slot counter (consumer wake-up), and a
//! mutex serializing the producers' compound watermark-and-write step.
//!
//! ## Quick Start
//!
//! Supervisor side (owns the shared resources):
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use tricolor::prelude::*;
//!
//! # fn main() -> Result<(), tricolor::ring::ProtocolError> {
//! let ring = SolutionRing::create(&RingNames::default())?;
//! let stop = AtomicBool::new(false);
//! let outcome = supervisor_loop(&ring, &stop)?;
//! println!("best removal set: {} edges", outcome.best);
//! # Ok(())
//! # }
//! ```
//!
//! Generator side (attaches to a running supervisor):
//!
//! ```no_run
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//! use tricolor::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let edges = parse_edge_list(&["0-1", "1-2", "0-2"])?;
//! let graph = Graph::from_edges(&edges);
//! let ring = SolutionRing::attach(&RingNames::default())?;
//! let mut rng = SmallRng::from_os_rng();
//! generator_loop(&ring, &graph, &mut rng)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`graph`]: edge-list model and `"i-j"` token parsing.
//! - [`coloring`]: randomized 3-colorings and conflict-edge candidates.
//! - [`sem`]: POSIX named semaphores with blocking, interruptible waits.
//! - [`shm`]: the shared segment and its typed accessors.
//! - [`ring`]: the bounded MPSC submission protocol with the shared
//!   watermark and two-phase shutdown.
//! - [`search`]: the generator and supervisor loop drivers.
//!
//! ## Platform Notes
//!
//! Requires POSIX shared memory (`shm_open`) and named semaphores
//! (`sem_open`); Linux and other POSIX systems only. Unsafe code is
//! confined to the `sem` and `shm` OS boundaries.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_panics_doc)] // Panics are protocol-internal invariants

pub mod coloring;
pub mod graph;
pub mod ring;
pub mod search;
pub mod sem;
pub mod shm;

/// Re-export commonly used types for convenience.
pub mod prelude {
    pub use crate::coloring::{conflict_edges, random_coloring, render_record};
    pub use crate::graph::{parse_edge_list, Edge, Graph};
    pub use crate::ring::{RingNames, SolutionRing, SubmitOutcome, Submission};
    pub use crate::search::{generator_loop, supervisor_loop, RunOutcome, StopReason};
    pub use crate::shm::{EDGE_CEILING, MAX_RECORD_LEN, RING_CAPACITY};
}
