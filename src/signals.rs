// src/signals.rs

//! Interrupt listener
//!
//! Signal handlers only record which signal arrived; the main path polls
//! [`InterruptListener::received`] between child-process checks and runs
//! cleanup itself. Once cleanup starts the listener is disarmed, after
//! which any further recognised signal terminates the process at once with
//! `128 + signal`, so a hung cleanup can always be killed.

use crate::error::{Error, Result};
use signal_hook::SigId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::debug;

#[cfg(unix)]
const SIGNALS: &[i32] = &[
    signal_hook::consts::SIGINT,
    signal_hook::consts::SIGTERM,
    signal_hook::consts::SIGHUP,
];

#[cfg(not(unix))]
const SIGNALS: &[i32] = &[signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM];

/// How often blocking waits check for a signal
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Records interrupt-class signals for the lifetime of a staging run
#[derive(Debug)]
pub struct InterruptListener {
    received: Arc<AtomicUsize>,
    disarmed: Arc<AtomicBool>,
    ids: Vec<SigId>,
}

impl InterruptListener {
    /// Register handlers for SIGINT, SIGTERM and (on Unix) SIGHUP
    pub fn install() -> Result<Self> {
        let received = Arc::new(AtomicUsize::new(0));
        let disarmed = Arc::new(AtomicBool::new(false));
        let mut ids = Vec::with_capacity(SIGNALS.len() * 2);

        for &signal in SIGNALS {
            // Checked before the flag is stored, so it only fires once disarmed
            let shutdown = signal_hook::flag::register_conditional_shutdown(
                signal,
                128 + signal,
                Arc::clone(&disarmed),
            )
            .map_err(Error::Signal)?;
            ids.push(shutdown);

            let record = signal_hook::flag::register_usize(
                signal,
                Arc::clone(&received),
                signal as usize,
            )
            .map_err(Error::Signal)?;
            ids.push(record);
        }

        debug!("Installed handlers for signals {:?}", SIGNALS);
        Ok(Self {
            received,
            disarmed,
            ids,
        })
    }

    /// The last recognised signal received, if any
    pub fn received(&self) -> Option<i32> {
        match self.received.load(Ordering::SeqCst) {
            0 => None,
            signal => i32::try_from(signal).ok(),
        }
    }

    /// Let any further recognised signal terminate the process immediately
    pub fn disarm(&self) {
        self.disarmed.store(true, Ordering::SeqCst);
    }

    pub fn is_disarmed(&self) -> bool {
        self.disarmed.load(Ordering::SeqCst)
    }

    /// Block until a recognised signal arrives and return its number
    pub fn wait(&self) -> i32 {
        loop {
            if let Some(signal) = self.received() {
                return signal;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for InterruptListener {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// Human-readable name of a recognised signal
pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        signal_hook::consts::SIGINT => "interrupt",
        signal_hook::consts::SIGTERM => "terminated",
        #[cfg(unix)]
        signal_hook::consts::SIGHUP => "hangup",
        _ => "signal",
    }
}
