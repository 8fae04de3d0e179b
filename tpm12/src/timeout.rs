//! Bounded polling
//!
//! Nothing at this layer can block, so every wait is an active poll with an
//! iteration budget. Budgets are derived from a fixed per-iteration estimate:
//! one TPM register access takes more than 330ns, so 0x100000 / 330
//! iterations is roughly one millisecond.

use core::fmt;

use crate::error::{Result, TpmError};

/// Iterations per millisecond.
pub const TIMEOUT_UNIT: u32 = 0x0010_0000 / 330;
/// TIS TIMEOUT_A, 750ms.
pub const TIMEOUT_A: u32 = TIMEOUT_UNIT * 750;
/// TIS TIMEOUT_B, 2s.
pub const TIMEOUT_B: u32 = TIMEOUT_UNIT * 2000;
/// Locality validation retries.
pub const TIMEOUT_VALIDATE: u32 = 0x100;

/// The individual waits of the locality and FIFO state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// ACCESS.tpmRegValidSts set with seize clear.
    ValidateLocality,
    /// ACCESS.activeLocality after requestUse.
    LocalityActive,
    /// STS.commandReady echoed back.
    CommandReady,
    /// Non-zero burst count while writing the command.
    CommandWrite,
    /// STS.stsValid and STS.dataAvail after tpmGo.
    DataAvailable,
    /// Non-zero burst count while reading the response.
    ResponseRead,
    /// ACCESS.activeLocality cleared after relinquish.
    LocalityRelease,
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Wait::ValidateLocality => "locality validation",
            Wait::LocalityActive => "active locality",
            Wait::CommandReady => "command ready",
            Wait::CommandWrite => "command write burst",
            Wait::DataAvailable => "data available",
            Wait::ResponseRead => "response read burst",
            Wait::LocalityRelease => "locality release",
        };
        f.write_str(name)
    }
}

/// Iteration budget for each [`Wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBudgets {
    pub validate_locality: u32,
    pub locality_active: u32,
    pub command_ready: u32,
    pub command_write: u32,
    pub data_available: u32,
    pub response_read: u32,
}

impl TimeoutBudgets {
    pub const fn default() -> Self {
        Self {
            validate_locality: TIMEOUT_VALIDATE,
            locality_active: TIMEOUT_A,
            command_ready: TIMEOUT_B,
            command_write: TIMEOUT_A,
            data_available: TIMEOUT_B,
            response_read: TIMEOUT_A,
        }
    }

    /// Same budget for every wait. Mostly useful against simulated hardware.
    pub const fn uniform(iterations: u32) -> Self {
        Self {
            validate_locality: iterations,
            locality_active: iterations,
            command_ready: iterations,
            command_write: iterations,
            data_available: iterations,
            response_read: iterations,
        }
    }

    pub fn budget(&self, wait: Wait) -> u32 {
        match wait {
            Wait::ValidateLocality => self.validate_locality,
            Wait::LocalityActive | Wait::LocalityRelease => self.locality_active,
            Wait::CommandReady => self.command_ready,
            Wait::CommandWrite => self.command_write,
            Wait::DataAvailable => self.data_available,
            Wait::ResponseRead => self.response_read,
        }
    }
}

impl Default for TimeoutBudgets {
    fn default() -> Self {
        Self::default()
    }
}

/// Poll `probe` up to `budget` times.
///
/// Returns the first `Some` value, or `TpmError::Timeout(wait)` once the
/// budget is spent. A zero budget fails without probing.
pub fn poll<T>(wait: Wait, budget: u32, mut probe: impl FnMut() -> Option<T>) -> Result<T> {
    for _ in 0..budget {
        if let Some(value) = probe() {
            return Ok(value);
        }
        core::hint::spin_loop();
    }
    log::error!("TPM: timeout waiting for {}", wait);
    Err(TpmError::Timeout(wait))
}
