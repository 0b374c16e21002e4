//! Randomized 3-coloring repair candidates.
//!
//! A candidate is built by coloring every vertex uniformly at random with
//! one of three colors and collecting the edges whose endpoints collide.
//! Removing exactly those edges makes the colored graph proper, so the
//! collected set is a valid (if rarely minimal) repair. The scan aborts as
//! soon as the set can no longer beat the shared watermark.

use crate::graph::{Edge, Graph};
use rand::Rng;

/// Number of available colors.
pub const COLORS: u8 = 3;

/// Assigns each vertex a uniform random color in `1..=COLORS`.
pub fn random_coloring<R: Rng>(n: usize, rng: &mut R) -> Vec<u8> {
    (0..n).map(|_| rng.random_range(1..=COLORS)).collect()
}

/// Collects the monochromatic edges of `graph` under `colors`.
///
/// Scans the upper triangle only, so each undirected edge is counted once.
/// Returns `None` as soon as the running count reaches `limit`: such a
/// candidate cannot improve on the watermark and is abandoned early.
///
/// # Panics
/// Panics in debug builds if `colors` is shorter than the vertex count.
pub fn conflict_edges(graph: &Graph, colors: &[u8], limit: u32) -> Option<Vec<Edge>> {
    debug_assert!(colors.len() >= graph.vertex_count());
    if limit == 0 {
        return None;
    }
    let mut removal = Vec::new();
    for u in 0..graph.vertex_count() {
        for v in graph.neighbors_above(u) {
            if colors[u] != colors[v] {
                continue;
            }
            removal.push(Edge::new(u as u32, v as u32));
            if removal.len() as u32 >= limit {
                return None;
            }
        }
    }
    Some(removal)
}

/// Whether `colors` is a proper coloring of `graph` (no monochromatic edge).
pub fn is_proper(graph: &Graph, colors: &[u8]) -> bool {
    (0..graph.vertex_count())
        .all(|u| graph.neighbors_above(u).all(|v| colors[u] != colors[v]))
}

// ============================================================================
// Wire records
// ============================================================================

/// Renders a removal set as the wire record: space-separated `"i-j"`
/// tokens, no trailing separator, empty for the empty set.
pub fn render_record(edges: &[Edge]) -> String {
    let mut out = String::new();
    for (i, e) in edges.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&e.to_string());
    }
    out
}

/// Number of edges named by a wire record. The empty record has zero.
#[inline]
pub fn record_edge_count(record: &str) -> u32 {
    record.split_whitespace().count() as u32
}
