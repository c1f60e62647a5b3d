//! UI badge messages and the broadcast seam.
//!
//! Messages are JSON objects tagged by `type`, matching what the badge
//! scripts in the host UI listen for:
//!
//! ```json
//! {"type":"machine_state","machine_state":"green"}
//! {"type":"navbar_status","color":"green"}
//! {"type":"event","event":"PrintStarted"}
//! ```

use std::fmt;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// A message for the UI badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiMessage {
    /// Current lamp color; empty string means "dark".
    MachineState { machine_state: String },
    /// Same information for the older navbar badge.
    NavbarStatus { color: String },
    /// Raw host event, forwarded as-is.
    Event { event: String },
}

/// Which message shape carries the lamp color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    #[default]
    MachineState,
    NavbarStatus,
}

impl UiMessage {
    /// Color announcement in the given badge shape.
    pub fn badge(kind: BadgeKind, color: impl Into<String>) -> Self {
        match kind {
            BadgeKind::MachineState => UiMessage::MachineState {
                machine_state: color.into(),
            },
            BadgeKind::NavbarStatus => UiMessage::NavbarStatus {
                color: color.into(),
            },
        }
    }

    /// The color or event carried by this message.
    pub fn label(&self) -> &str {
        match self {
            UiMessage::MachineState { machine_state } => machine_state,
            UiMessage::NavbarStatus { color } => color,
            UiMessage::Event { event } => event,
        }
    }

    pub fn to_json(&self) -> Result<String, BroadcastError> {
        serde_json::to_string(self).map_err(|e| BroadcastError::Encode(e.to_string()))
    }
}

// ── Error type ──

#[derive(Debug)]
pub enum BroadcastError {
    /// The receiving side has gone away.
    Closed,
    Io(std::io::Error),
    Encode(String),
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastError::Closed => write!(f, "Broadcast receiver closed"),
            BroadcastError::Io(e) => write!(f, "Broadcast write failed: {e}"),
            BroadcastError::Encode(e) => write!(f, "Broadcast encode failed: {e}"),
        }
    }
}

impl std::error::Error for BroadcastError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BroadcastError::Io(e) => Some(e),
            _ => None,
        }
    }
}

// ── Trait ──

/// Delivers badge messages to the UI. Called from the foreground path and
/// from the strobe thread, so implementations must be `Send + Sync`.
pub trait Broadcaster: Send + Sync {
    fn send(&self, msg: &UiMessage) -> Result<(), BroadcastError>;
}

/// Writes one JSON object per line (stdout, a pipe, a socket).
pub struct JsonLines<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLines<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Broadcaster for JsonLines<W> {
    fn send(&self, msg: &UiMessage) -> Result<(), BroadcastError> {
        let line = msg.to_json()?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}").map_err(BroadcastError::Io)?;
        out.flush().map_err(BroadcastError::Io)
    }
}

/// Logs messages at debug level; for hosts without a UI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    fn send(&self, msg: &UiMessage) -> Result<(), BroadcastError> {
        log::debug!("[ui] {}", msg.to_json()?);
        Ok(())
    }
}

pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, MutexGuard};
    use std::time::Instant;

    /// Records every message with a timestamp. Clones share the record.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingBroadcaster {
        sent: Arc<Mutex<Vec<(UiMessage, Instant)>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingBroadcaster {
        pub fn new() -> Self {
            Self::default()
        }

        fn sent(&self) -> MutexGuard<'_, Vec<(UiMessage, Instant)>> {
            self.sent.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub fn messages(&self) -> Vec<UiMessage> {
            self.sent().iter().map(|(m, _)| m.clone()).collect()
        }

        pub fn timed(&self) -> Vec<(UiMessage, Instant)> {
            self.sent().clone()
        }

        /// Labels of all messages, in order.
        pub fn labels(&self) -> Vec<String> {
            self.sent().iter().map(|(m, _)| m.label().to_string()).collect()
        }

        pub fn len(&self) -> usize {
            self.sent().len()
        }

        pub fn is_empty(&self) -> bool {
            self.sent().is_empty()
        }

        pub fn clear(&self) {
            self.sent().clear();
        }

        /// Make subsequent sends fail with `Closed` (nothing is recorded).
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl Broadcaster for RecordingBroadcaster {
        fn send(&self, msg: &UiMessage) -> Result<(), BroadcastError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(BroadcastError::Closed);
            }
            self.sent().push((msg.clone(), Instant::now()));
            Ok(())
        }
    }
}
