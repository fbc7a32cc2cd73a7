// src/runner.rs

//! Guarded command execution
//!
//! The command runs as a child process with inherited stdio. The parent
//! polls both the child and the interrupt listener; whichever finishes
//! first decides how the run ends.

use crate::error::{Error, Result};
use crate::signals::{InterruptListener, POLL_INTERVAL};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long an interrupted child gets to exit on its own
pub const GRACE_PERIOD: Duration = Duration::from_secs(3);

/// How the guarded command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command exited; carries its exit code
    Exited(i32),
    /// A recognised signal arrived first; carries the signal number
    Interrupted(i32),
}

/// Run `program args...` until it exits or an interrupt arrives
pub fn run_guarded(
    program: &str,
    args: &[String],
    listener: &InterruptListener,
) -> Result<CommandOutcome> {
    let mut child = Command::new(program)
        .args(args)
        .spawn()
        .map_err(|source| Error::Spawn {
            command: program.to_string(),
            source,
        })?;
    debug!("Started {} (pid {})", program, child.id());

    loop {
        // Terminal interrupts reach the child too, so ours is checked first
        if let Some(signal) = listener.received() {
            stop_child(&mut child, GRACE_PERIOD);
            return Ok(CommandOutcome::Interrupted(signal));
        }
        if let Some(status) = child.try_wait()? {
            let code = exit_code(status);
            info!("{} exited with code {}", program, code);
            return Ok(CommandOutcome::Exited(code));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Give the child `grace` to exit, then kill it and reap it
fn stop_child(child: &mut Child, grace: Duration) {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Interrupted command exited with code {}", exit_code(status));
                return;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!("Failed to poll interrupted command: {}", e);
                break;
            }
        }
    }

    if let Err(e) = child.kill() {
        debug!("Failed to kill command: {}", e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap command: {}", e);
    }
}

/// Exit code to report for a finished child
///
/// A child killed by a signal maps to `128 + signal`, as shells do.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
