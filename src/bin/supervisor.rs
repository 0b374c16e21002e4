//! The supervisor process: owns the shared resources, consumes candidate
//! records, tracks the best solution, and broadcasts shutdown.

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

use tricolor::ring::{RingNames, SolutionRing};
use tricolor::search::{supervisor_loop, StopReason};

/// Set by the signal handler; polled by the consume loop.
static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signal: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

/// Installs SIGINT/SIGTERM handlers.
///
/// `sa_flags` is deliberately 0: without `SA_RESTART`, a `sem_wait` the
/// consumer is blocked in returns `EINTR`, which is what wakes the consume
/// loop to observe the stop flag.
fn install_signal_handlers() -> Result<(), String> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        for signal in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(format!(
                    "could not install handler for signal {signal}: {}",
                    std::io::Error::last_os_error()
                ));
            }
        }
    }
    Ok(())
}

fn main() {
    let prog = std::env::args()
        .next()
        .unwrap_or_else(|| "supervisor".to_string());

    // The supervisor takes no arguments or options.
    if std::env::args().count() > 1 {
        eprintln!("Usage: {prog}");
        process::exit(2);
    }

    if let Err(msg) = install_signal_handlers() {
        eprintln!("{prog}: {msg}");
        process::exit(1);
    }

    let names = RingNames::default();
    let ring = match SolutionRing::create(&names) {
        Ok(ring) => ring,
        Err(e) => {
            eprintln!("{prog}: {e}");
            process::exit(1);
        }
    };

    match supervisor_loop(&ring, &STOP) {
        Ok(outcome) => {
            if outcome.reason == StopReason::Interrupted {
                println!("Supervisor shuts down.");
            }
            // Dropping the owning handle closes and unlinks the segment
            // and semaphores exactly once.
        }
        Err(e) => {
            eprintln!("{prog}: {e}");
            drop(ring);
            process::exit(1);
        }
    }
}
