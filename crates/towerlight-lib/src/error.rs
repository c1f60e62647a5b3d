//! Unified error type for the towerlight-lib crate.
//!
//! [`TowerLightError`] wraps module-specific errors (`OutputError`,
//! `BroadcastError`) and the configuration error kind. `From` impls allow
//! `?` to propagate across module boundaries.

use std::fmt;

use crate::broadcast::BroadcastError;
use crate::output::OutputError;

/// Unified error type for towerlight-lib operations.
#[derive(Debug)]
pub enum TowerLightError {
    /// Output line setup, write or cleanup error.
    Output(OutputError),
    /// UI broadcast error.
    Broadcast(BroadcastError),
    /// Standard I/O error (config persistence, stdin).
    Io(std::io::Error),
    /// Configuration validation error.
    Config(String),
}

impl fmt::Display for TowerLightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TowerLightError::Output(e) => write!(f, "{e}"),
            TowerLightError::Broadcast(e) => write!(f, "{e}"),
            TowerLightError::Io(e) => write!(f, "I/O error: {e}"),
            TowerLightError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for TowerLightError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TowerLightError::Output(e) => Some(e),
            TowerLightError::Broadcast(e) => Some(e),
            TowerLightError::Io(e) => Some(e),
            TowerLightError::Config(_) => None,
        }
    }
}

impl From<OutputError> for TowerLightError {
    fn from(e: OutputError) -> Self {
        TowerLightError::Output(e)
    }
}

impl From<BroadcastError> for TowerLightError {
    fn from(e: BroadcastError) -> Self {
        TowerLightError::Broadcast(e)
    }
}

impl From<std::io::Error> for TowerLightError {
    fn from(e: std::io::Error) -> Self {
        TowerLightError::Io(e)
    }
}

/// Crate-level Result alias using [`TowerLightError`].
pub type Result<T> = std::result::Result<T, TowerLightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_output_error() {
        let e: TowerLightError = OutputError::Unavailable {
            line: 19,
            reason: "not exported".into(),
        }
        .into();
        assert!(matches!(
            e,
            TowerLightError::Output(OutputError::Unavailable { line: 19, .. })
        ));
    }

    #[test]
    fn from_broadcast_error() {
        let e: TowerLightError = BroadcastError::Closed.into();
        assert!(matches!(e, TowerLightError::Broadcast(BroadcastError::Closed)));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: TowerLightError = io_err.into();
        assert!(matches!(e, TowerLightError::Io(_)));
    }

    #[test]
    fn display_output_error() {
        let e = TowerLightError::Output(OutputError::WriteFailed {
            line: 20,
            reason: "EBUSY".into(),
        });
        assert_eq!(e.to_string(), "Write to line 20 failed: EBUSY");
    }

    #[test]
    fn display_config_error() {
        let e = TowerLightError::Config("delay_on_ms must be > 0".into());
        assert_eq!(e.to_string(), "Config error: delay_on_ms must be > 0");
    }

    #[test]
    fn source_chains_output_error() {
        let e = TowerLightError::Output(OutputError::SetupFailed {
            line: 16,
            reason: "permission denied".into(),
        });
        let source = std::error::Error::source(&e).unwrap();
        assert!(source.to_string().contains("permission denied"));
    }

    #[test]
    fn source_none_for_config() {
        let e = TowerLightError::Config("test".into());
        assert!(std::error::Error::source(&e).is_none());
    }

    #[test]
    fn question_mark_propagation_output_to_towerlight() {
        fn inner() -> crate::output::Result<()> {
            Err(OutputError::Unavailable {
                line: 21,
                reason: "gone".into(),
            })
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        let err = outer().unwrap_err();
        assert!(matches!(err, TowerLightError::Output(_)));
    }
}
