//! Error kinds shared by the remote client, the host adapter and the plugin.
//!
//! Every I/O operation returns a [`BridgeError`]; [`log_and_continue`] is the one
//! place that decides a failure is logged and swallowed instead of propagated.

use core::fmt;
use std::error::Error;
use std::fmt::{Display, Formatter};

use log::error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Credentials rejected, or a call answered 401/403.
    Auth(String),
    /// Network failure, timeout, non-2xx status or an undecodable body.
    Transport(String),
    /// Command value out of range, non-numeric, or not applicable to the unit.
    Validation(String),
    /// Command received before the remote session and gateway are established.
    NotReady(String),
}

impl BridgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Auth(_) => "auth",
            BridgeError::Transport(_) => "transport",
            BridgeError::Validation(_) => "validation",
            BridgeError::NotReady(_) => "not ready",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, BridgeError::Auth(_))
    }
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Auth(m) => write!(f, "auth error: {}", m),
            BridgeError::Transport(m) => write!(f, "transport error: {}", m),
            BridgeError::Validation(m) => write!(f, "invalid command: {}", m),
            BridgeError::NotReady(m) => write!(f, "not ready: {}", m),
        }
    }
}

impl Error for BridgeError {}

/// Log a failed operation and carry on.
///
/// Returns the success value so call sites can keep using it when there is one.
pub fn log_and_continue<T>(context: &str, result: Result<T, BridgeError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            error!("{} failed ({}): {}", context, e.kind(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_success_through() {
        assert_eq!(log_and_continue("poll", Ok::<_, BridgeError>(7)), Some(7));
    }

    #[test]
    fn swallows_every_kind() {
        let errors = [
            BridgeError::Auth("rejected".into()),
            BridgeError::Transport("timeout".into()),
            BridgeError::Validation("95 out of range".into()),
            BridgeError::NotReady("no gateway".into()),
        ];
        for e in errors {
            assert_eq!(log_and_continue::<()>("command", Err(e)), None);
        }
    }

    #[test]
    fn display_names_the_kind() {
        assert_eq!(
            BridgeError::Validation("level 'abc' is not a number".into()).to_string(),
            "invalid command: level 'abc' is not a number"
        );
        assert!(BridgeError::Auth("x".into()).is_auth());
        assert!(!BridgeError::Transport("x".into()).is_auth());
    }
}
