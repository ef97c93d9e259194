//! Error taxonomy shared by the evaluator, engine and scheduler

use std::fmt;
use thiserror::Error;

/// Error classification for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network or storage timeout - safe to resubmit the identical event
    Transient,
    /// The event no longer matches what the dialog expects
    StateMismatch,
    /// A callback rejected its input deterministically
    BadInput,
    /// Persistence corruption or table misconfiguration
    Fatal,
}

impl ErrorKind {
    /// Whether the scheduler may resubmit an event that failed with this kind
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::StateMismatch)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::StateMismatch => "state_mismatch",
            Self::BadInput => "bad_input",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Callback errors
// ============================================================================

/// Error returned by a transition callback or a bot hook
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallbackError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallbackError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn bad_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StateMismatch, message)
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadInput, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

// ============================================================================
// Transport errors
// ============================================================================

/// Error reported by the chat transport collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadInput, message)
    }
}

// ============================================================================
// Dispatch errors
// ============================================================================

/// Stage of a single `Receive` invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    PreProcess,
    Evaluate,
    PostProcess,
    UpdateState,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolve => "resolve session",
            Self::PreProcess => "preprocess signal",
            Self::Evaluate => "process signal",
            Self::PostProcess => "postprocess signal",
            Self::UpdateState => "update user state",
            Self::Persist => "persist session",
        };
        f.write_str(name)
    }
}

/// Failure of one dispatch stage, tagged with the stage that failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage}: {message}")]
pub struct DispatchError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl DispatchError {
    pub fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}
