//! A generator process: attaches to the supervisor's shared resources and
//! submits randomized repair candidates until the shutdown broadcast.

use std::process;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use tricolor::graph::{parse_edge_list, Graph};
use tricolor::ring::{RingNames, SolutionRing};
use tricolor::search::generator_loop;

fn usage_and_exit(prog: &str) -> ! {
    eprintln!("Usage: {prog} <v1-v2> [<v3-v4> ...]");
    process::exit(2)
}

fn main() {
    let prog = std::env::args()
        .next()
        .unwrap_or_else(|| "generator".to_string());

    let tokens: Vec<String> = std::env::args().skip(1).collect();
    if tokens.is_empty() {
        usage_and_exit(&prog);
    }

    let edges = match parse_edge_list(&tokens) {
        Ok(edges) => edges,
        Err(e) => {
            eprintln!("{prog}: {e}");
            usage_and_exit(&prog);
        }
    };
    let graph = Graph::from_edges(&edges);

    // The supervisor must have created the resources already; a missing
    // segment is a fatal error, never a wait condition.
    let ring = match SolutionRing::attach(&RingNames::default()) {
        Ok(ring) => ring,
        Err(e) => {
            eprintln!("{prog}: {e} (is the supervisor running?)");
            process::exit(1);
        }
    };

    let mut rng = SmallRng::from_os_rng();
    match generator_loop(&ring, &graph, &mut rng) {
        // The only voluntary exit is an observed shutdown broadcast.
        Ok(_) => {}
        Err(e) => {
            eprintln!("{prog}: {e}");
            process::exit(1);
        }
    }
}
