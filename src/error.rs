//! Errors surfaced to host code by the proxy layer.

use std::time::Duration;

use plugbridge_abi::{ErrorKind, Value, WireError};
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The native core answered with a failure.
    #[error("{kind}: {message}")]
    Remote {
        kind: ErrorKind,
        message: String,
        /// Decoded structured payload (the error enum value for domain errors).
        payload: Option<Value>,
    },

    /// No response within the configured timeout. The call may still run.
    #[error("call {call_id} timed out after {after:?}")]
    Timeout { call_id: u64, after: Duration },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unknown function {0}")]
    UnknownFunction(String),

    #[error("unknown object {0}")]
    UnknownObject(String),

    #[error("object {object} has no method {method}")]
    UnknownMethod { object: String, method: String },

    #[error("object {0} has no constructor")]
    NoConstructor(String),

    #[error("failed to encode arguments: {0}")]
    Encode(#[source] WireError),

    #[error("failed to decode result: {0}")]
    Decode(#[source] WireError),

    #[error("{0}")]
    UnexpectedResult(String),
}

impl BridgeError {
    /// Failure kind reported by the native core, if this is a remote failure.
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            BridgeError::Remote { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// True for a domain error whose case is `case`.
    pub fn is_domain(&self, case: &str) -> bool {
        matches!(self.kind(), Some(ErrorKind::Domain(name)) if name == case)
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            BridgeError::Remote { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, BridgeError::Transport(TransportError::Closed(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_expose_kind_and_payload() {
        let err = BridgeError::Remote {
            kind: ErrorKind::Domain("unbalanced".into()),
            message: "postings sum to 5".into(),
            payload: Some(Value::case(1)),
        };
        assert!(err.is_domain("unbalanced"));
        assert!(!err.is_domain("not-found"));
        assert_eq!(err.payload(), Some(&Value::case(1)));
        assert_eq!(err.to_string(), "unbalanced: postings sum to 5");

        let err = BridgeError::Transport(TransportError::Closed("gone".into()));
        assert!(err.kind().is_none());
        assert!(err.is_closed());
    }
}
