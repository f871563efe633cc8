//! Error taxonomy for checkout reconciliation.

use crate::core::types::Phase;

/// Failure reported by a backend adapter. Adapters classify, they never retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("{phase} failed (transient): {reason}")]
    Transient { phase: Phase, reason: String },

    #[error("{phase} failed: {reason}")]
    Fatal { phase: Phase, reason: String },

    /// The repository was left mid-transaction by a killed run.
    #[error("{phase} failed (interrupted transaction): {reason}")]
    Interrupted { phase: Phase, reason: String },
}

impl BackendError {
    pub fn transient(phase: Phase, reason: impl Into<String>) -> Self {
        Self::Transient {
            phase,
            reason: reason.into(),
        }
    }

    pub fn fatal(phase: Phase, reason: impl Into<String>) -> Self {
        Self::Fatal {
            phase,
            reason: reason.into(),
        }
    }

    pub fn interrupted(phase: Phase, reason: impl Into<String>) -> Self {
        Self::Interrupted {
            phase,
            reason: reason.into(),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Transient { phase, .. }
            | Self::Fatal { phase, .. }
            | Self::Interrupted { phase, .. } => *phase,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason, .. }
            | Self::Fatal { reason, .. }
            | Self::Interrupted { reason, .. } => reason,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Result type for backend adapter calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Terminal failure of a checkout invocation.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("checkout failed during {phase}: {reason}")]
    Fatal { phase: Phase, reason: String },

    #[error("checkout failed during {phase} after {attempts} attempts: {reason}")]
    RetriesExhausted {
        phase: Phase,
        attempts: u32,
        reason: String,
    },

    /// The existing repository is mid-transaction and must be recreated.
    #[error("checkout failed during {phase}: interrupted transaction: {reason}")]
    Interrupted { phase: Phase, reason: String },

    #[error("checkout failed during {phase}: {source}")]
    Io {
        phase: Phase,
        #[source]
        source: std::io::Error,
    },
}

impl CheckoutError {
    /// Phase the failure happened in, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::InvalidRequest(_) => None,
            Self::Fatal { phase, .. }
            | Self::RetriesExhausted { phase, .. }
            | Self::Interrupted { phase, .. }
            | Self::Io { phase, .. } => Some(*phase),
        }
    }

    pub(crate) fn io(phase: Phase, source: std::io::Error) -> Self {
        Self::Io { phase, source }
    }
}

impl From<BackendError> for CheckoutError {
    /// A backend failure that reaches the caller without retry is fatal,
    /// unless it reports an interrupted transaction.
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Interrupted { phase, reason } => Self::Interrupted { phase, reason },
            BackendError::Transient { phase, reason } | BackendError::Fatal { phase, reason } => {
                Self::Fatal { phase, reason }
            }
        }
    }
}
