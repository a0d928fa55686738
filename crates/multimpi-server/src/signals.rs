//! Signal handling: SIGHUP/SIGTERM drain, SIGINT mostly ignored.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::state::AppState;

/// The broker shares a process group with its owner, whose ^C handling
/// decides when to tear it down. A third SIGINT exits regardless.
const SIGINT_LIMIT: u32 = 2;

pub fn install_signal_handlers(state: Arc<AppState>) -> std::io::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        let mut interrupts = 0;
        loop {
            tokio::select! {
                Some(()) = hangup.recv() => {
                    info!("received SIGHUP, draining");
                    state.shutdown();
                }
                Some(()) = terminate.recv() => {
                    info!("received SIGTERM, draining");
                    state.shutdown();
                }
                Some(()) = interrupt.recv() => {
                    interrupts += 1;
                    if interrupts > SIGINT_LIMIT {
                        warn!("SIGINT number {}, exiting", interrupts);
                        std::process::exit(1);
                    }
                    info!("SIGINT number {} ignored", interrupts);
                }
                else => break,
            }
        }
    });

    Ok(())
}

/// Ask the kernel to SIGKILL us when the owning process dies.
#[cfg(target_os = "linux")]
pub fn die_with_parent() {
    use nix::sys::prctl::set_pdeathsig;
    use nix::sys::signal::Signal;

    if let Err(e) = set_pdeathsig(Signal::SIGKILL) {
        warn!("could not set parent-death signal: {}", e);
    }
}

#[cfg(not(target_os = "linux"))]
pub fn die_with_parent() {}
