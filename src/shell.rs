//! Subprocess plumbing for shell-backed init systems
//!
//! upstart and Windows service control are driven through external commands.
//! The `CmdRunner` seam keeps the adapters testable without a live host.

use std::process::Command;
use std::time::Duration;

use crate::errors::{Error, Result};

/// Runs an external command and returns its stdout.
///
/// A non-zero exit status is an error carrying the command line and
/// whatever the command printed to stderr.
pub trait CmdRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>>;
}

/// `CmdRunner` backed by `std::process::Command`.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CmdRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(program).args(args).output()?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                cmd: format!("{} {}", program, args.join(" ")),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// Bounded fixed-delay retry policy.
///
/// Used only by the upstart start path, which has to absorb the window
/// where the init system has not yet noticed a freshly enabled conf file.
#[derive(Debug, Clone, Copy)]
pub struct RetryStrategy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(250),
        }
    }
}

impl RetryStrategy {
    /// A single attempt, no delay. Handy in tests.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Run `op` up to `attempts` times, sleeping `delay` between failures.
    /// Returns the first success or the final error.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        for attempt in 1..self.attempts.max(1) {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    log::debug!("attempt {attempt} failed, retrying: {e}");
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
            }
        }
        op()
    }
}
