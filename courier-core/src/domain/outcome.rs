//! Dispatch outcome

use std::fmt;

/// Result of a single dispatch call
///
/// `Timeout` means "no answer" and is deliberately distinct from `Failure`,
/// which is an explicit negative status from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Failure,
    Timeout,
    BrokerError,
}

impl DispatchOutcome {
    /// Process exit code for use as a CI gate
    ///
    /// Timeout uses 124 like coreutils `timeout`; broker errors use
    /// `EX_UNAVAILABLE` from sysexits.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Timeout => 124,
            Self::BrokerError => 69,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<bool> for DispatchOutcome {
    fn from(success: bool) -> Self {
        if success { Self::Success } else { Self::Failure }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::BrokerError => "broker error",
        };
        f.write_str(s)
    }
}
