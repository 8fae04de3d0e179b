//! TPM error taxonomy
//!
//! Every fallible operation in the crate returns [`TpmError`]. Collaborators
//! that speak raw TPM return codes use [`TpmError::code`].

use core::fmt;

use crate::timeout::Wait;

/// Success, as returned in the response header.
pub const TPM_SUCCESS: u32 = 0x0000_0000;
/// Caller contract violation, detected before any hardware access.
pub const TPM_BAD_PARAMETER: u32 = 0x0000_0003;
/// Hardware, timeout or protocol failure.
pub const TPM_FAIL: u32 = 0x0000_0009;
/// Output buffer cannot hold the result.
pub const TPM_NOSPACE: u32 = 0x0000_0011;

/// TPM Error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmError {
    /// Argument out of range or inconsistent; nothing was sent.
    BadParameter,
    /// A bounded poll exhausted its budget.
    Timeout(Wait),
    /// Malformed response framing or structure.
    Protocol,
    /// Response authorization HMAC did not verify.
    AuthFailure,
    /// Caller-supplied output buffer too small.
    NoSpace,
    /// No TPM was found at probe time.
    NotAvailable,
    /// Non-zero return code reported by the module, passed through verbatim.
    Module(u32),
}

impl TpmError {
    /// Raw TPM return code for collaborators that work with status words.
    pub fn code(&self) -> u32 {
        match self {
            TpmError::BadParameter => TPM_BAD_PARAMETER,
            TpmError::Timeout(_)
            | TpmError::Protocol
            | TpmError::AuthFailure
            | TpmError::NotAvailable => TPM_FAIL,
            TpmError::NoSpace => TPM_NOSPACE,
            TpmError::Module(code) => *code,
        }
    }

    /// True for failures that happened before anything reached the bus.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, TpmError::BadParameter)
    }
}

impl fmt::Display for TpmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TpmError::BadParameter => write!(f, "invalid parameter"),
            TpmError::Timeout(wait) => write!(f, "timeout waiting for {wait}"),
            TpmError::Protocol => write!(f, "malformed TPM response"),
            TpmError::AuthFailure => write!(f, "response authorization mismatch"),
            TpmError::NoSpace => write!(f, "output buffer too small"),
            TpmError::NotAvailable => write!(f, "no TPM present"),
            TpmError::Module(code) => write!(f, "TPM returned 0x{code:08X}"),
        }
    }
}

pub type Result<T> = core::result::Result<T, TpmError>;
