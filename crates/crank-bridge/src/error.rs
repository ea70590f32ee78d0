//! Error types surfaced by the bridge and the component adapter.

use std::error::Error;
use std::fmt;

use crate::component::{FrameId, FrameState};
use crate::host::HostError;

/// Failure raised by a user component body. Forwarded unmodified.
pub type BodyError = Box<dyn Error>;

/// Errors from the foreign object bridge and the canonical symbol table.
#[derive(Clone, Debug)]
pub enum BridgeError {
    /// No host evaluation capability is installed.
    Unavailable,
    /// The host raised while evaluating a reflection request.
    Host(HostError),
    /// A symbol lookup produced something that is not a symbol.
    NotASymbol { name: String, found: &'static str },
    /// The host answered a request with a value of the wrong kind.
    UnexpectedValue {
        request: &'static str,
        found: &'static str,
    },
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Unavailable => write!(f, "host evaluation capability unavailable"),
            BridgeError::Host(error) => write!(f, "host error: {}", error),
            BridgeError::NotASymbol { name, found } => {
                write!(f, "symbol lookup '{}' produced {} instead of a symbol", name, found)
            }
            BridgeError::UnexpectedValue { request, found } => {
                write!(f, "host answered '{}' with unexpected {}", request, found)
            }
        }
    }
}

impl Error for BridgeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BridgeError::Host(error) => Some(error),
            _ => None,
        }
    }
}

impl From<HostError> for BridgeError {
    fn from(error: HostError) -> Self {
        BridgeError::Host(error)
    }
}

/// Errors from stepping an execution frame.
#[derive(Debug)]
pub enum StepError {
    /// `step()` called while a previous step of the same frame is outstanding.
    Reentrancy { frame: FrameId },
    /// `step()` called on a frame that reached `Done` or `Failed`, or is `Closing`.
    FrameFinalized { frame: FrameId, state: FrameState },
    /// The component body raised. Surfaced once; the frame is `Failed`.
    RenderFailure { frame: FrameId, source: BodyError },
}

impl StepError {
    /// Frame the error originated from.
    pub fn frame(&self) -> FrameId {
        match self {
            StepError::Reentrancy { frame }
            | StepError::FrameFinalized { frame, .. }
            | StepError::RenderFailure { frame, .. } => *frame,
        }
    }

    /// The body's own failure, for `RenderFailure`.
    pub fn body_error(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StepError::RenderFailure { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Reentrancy { frame } => {
                write!(f, "{} stepped while a previous step is still outstanding", frame)
            }
            StepError::FrameFinalized { frame, state } => {
                write!(f, "{} is finalized ({:?}) and cannot be stepped", frame, state)
            }
            StepError::RenderFailure { frame, source } => {
                write!(f, "component in {} failed: {}", frame, source)
            }
        }
    }
}

impl Error for StepError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.body_error()
    }
}

/// Body-side failure raised by the adapter itself on the body's behalf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractViolation(pub &'static str);

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Error for ContractViolation {}
