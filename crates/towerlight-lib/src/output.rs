//! Output lines: digital-pin trait + sysfs, embedded-hal and simulated backends.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use embedded_hal::digital::{Error as _, OutputPin, PinState};
use serde::{Deserialize, Serialize};

// ── Levels and assignments ──

/// Logical level of an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "LOW"),
            Level::High => write!(f, "HIGH"),
        }
    }
}

impl From<Level> for PinState {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => PinState::Low,
            Level::High => PinState::High,
        }
    }
}

/// Sentinel used in config files for "no line wired to this indicator".
pub const UNASSIGNED: i64 = -1;

/// Line assignment for one indicator, as read from configuration.
///
/// Serialized as an integer (`-1` for unassigned). Accepts an integer, a
/// numeric string, or `"unassigned"` / `"none"` / `""` when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAssignment", into = "i64")]
pub enum PinAssignment {
    Line(u32),
    Unassigned,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAssignment {
    Int(i64),
    Text(String),
}

impl TryFrom<RawAssignment> for PinAssignment {
    type Error = String;

    fn try_from(raw: RawAssignment) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawAssignment::Int(n) => PinAssignment::from_i64(n),
            RawAssignment::Text(s) => s.parse(),
        }
    }
}

impl From<PinAssignment> for i64 {
    fn from(pin: PinAssignment) -> Self {
        match pin {
            PinAssignment::Line(n) => i64::from(n),
            PinAssignment::Unassigned => UNASSIGNED,
        }
    }
}

impl std::str::FromStr for PinAssignment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("unassigned") || s.eq_ignore_ascii_case("none")
        {
            return Ok(PinAssignment::Unassigned);
        }
        let n: i64 = s
            .parse()
            .map_err(|_| format!("invalid line \"{s}\" (use a line number or \"unassigned\")"))?;
        PinAssignment::from_i64(n)
    }
}

impl PinAssignment {
    fn from_i64(n: i64) -> std::result::Result<Self, String> {
        if n == UNASSIGNED {
            return Ok(PinAssignment::Unassigned);
        }
        u32::try_from(n)
            .map(PinAssignment::Line)
            .map_err(|_| format!("line {n} is out of range"))
    }

    /// The wired line id, or `None` when unassigned.
    pub fn line(&self) -> Option<u32> {
        match self {
            PinAssignment::Line(n) => Some(*n),
            PinAssignment::Unassigned => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, PinAssignment::Line(_))
    }
}

impl fmt::Display for PinAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinAssignment::Line(n) => write!(f, "{n}"),
            PinAssignment::Unassigned => write!(f, "unassigned"),
        }
    }
}

// ── Error type ──

/// Output line errors. Every variant names the line it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    /// The line does not exist on this backend or was never set up.
    Unavailable { line: u32, reason: String },
    /// The line could not be configured as an output.
    SetupFailed { line: u32, reason: String },
    /// A level write was rejected.
    WriteFailed { line: u32, reason: String },
    /// The line could not be released.
    CleanupFailed { line: u32, reason: String },
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::Unavailable { line, reason } => {
                write!(f, "Line {line} unavailable: {reason}")
            }
            OutputError::SetupFailed { line, reason } => {
                write!(f, "Setup of line {line} failed: {reason}")
            }
            OutputError::WriteFailed { line, reason } => {
                write!(f, "Write to line {line} failed: {reason}")
            }
            OutputError::CleanupFailed { line, reason } => {
                write!(f, "Cleanup of line {line} failed: {reason}")
            }
        }
    }
}

impl std::error::Error for OutputError {}

impl OutputError {
    pub fn line(&self) -> u32 {
        match self {
            OutputError::Unavailable { line, .. }
            | OutputError::SetupFailed { line, .. }
            | OutputError::WriteFailed { line, .. }
            | OutputError::CleanupFailed { line, .. } => *line,
        }
    }
}

pub type Result<T> = std::result::Result<T, OutputError>;

// ── Trait ──

/// A bank of digital output lines addressed by line id.
pub trait OutputPins: Send {
    /// Short backend name for logs and status output.
    fn label(&self) -> &str;
    /// Configure `line` as an output driven to `initial`.
    fn setup(&mut self, line: u32, initial: Level) -> Result<()>;
    fn write(&mut self, line: u32, level: Level) -> Result<()>;
    /// Release `line`. Cleaning an unknown line is not an error.
    fn cleanup(&mut self, line: u32) -> Result<()>;
}

impl<P: OutputPins + ?Sized> OutputPins for Box<P> {
    fn label(&self) -> &str {
        (**self).label()
    }
    fn setup(&mut self, line: u32, initial: Level) -> Result<()> {
        (**self).setup(line, initial)
    }
    fn write(&mut self, line: u32, level: Level) -> Result<()> {
        (**self).write(line, level)
    }
    fn cleanup(&mut self, line: u32) -> Result<()> {
        (**self).cleanup(line)
    }
}

// ── Linux sysfs backend ──

/// Default sysfs GPIO class directory.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// Lines driven through the legacy `/sys/class/gpio` interface.
///
/// Line ids are kernel GPIO numbers (BCM numbering on a Raspberry Pi).
/// Only lines exported by this instance are unexported on cleanup.
pub struct SysfsGpio {
    root: PathBuf,
    exported: BTreeSet<u32>,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exported: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn line_dir(&self, line: u32) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }

    fn write_attr(&self, line: u32, attr: &str, value: &str) -> std::io::Result<()> {
        std::fs::write(self.line_dir(line).join(attr), value)
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

fn sysfs_value(level: Level) -> &'static str {
    match level {
        Level::Low => "0",
        Level::High => "1",
    }
}

impl OutputPins for SysfsGpio {
    fn label(&self) -> &str {
        "sysfs"
    }

    fn setup(&mut self, line: u32, initial: Level) -> Result<()> {
        if !self.line_dir(line).exists() {
            std::fs::write(self.root.join("export"), line.to_string()).map_err(|e| {
                OutputError::SetupFailed {
                    line,
                    reason: format!("export: {e}"),
                }
            })?;
            self.exported.insert(line);
        }
        // "low"/"high" set direction and initial value in one write (no glitch).
        let direction = match initial {
            Level::Low => "low",
            Level::High => "high",
        };
        self.write_attr(line, "direction", direction)
            .map_err(|e| OutputError::SetupFailed {
                line,
                reason: format!("direction: {e}"),
            })
    }

    fn write(&mut self, line: u32, level: Level) -> Result<()> {
        self.write_attr(line, "value", sysfs_value(level))
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OutputError::Unavailable {
                    line,
                    reason: "not exported".into(),
                },
                _ => OutputError::WriteFailed {
                    line,
                    reason: e.to_string(),
                },
            })
    }

    fn cleanup(&mut self, line: u32) -> Result<()> {
        if !self.line_dir(line).exists() {
            self.exported.remove(&line);
            return Ok(());
        }
        if let Err(e) = self.write_attr(line, "value", sysfs_value(Level::Low)) {
            log::debug!("[sysfs] could not drive line {line} low before release: {e}");
        }
        if self.exported.remove(&line) {
            std::fs::write(self.root.join("unexport"), line.to_string()).map_err(|e| {
                OutputError::CleanupFailed {
                    line,
                    reason: format!("unexport: {e}"),
                }
            })?;
        }
        Ok(())
    }
}

// ── embedded-hal backend ──

/// Adapter over any set of `embedded_hal` output pins, keyed by line id.
pub struct HalPins<P> {
    pins: BTreeMap<u32, P>,
}

impl<P> Default for HalPins<P> {
    fn default() -> Self {
        Self {
            pins: BTreeMap::new(),
        }
    }
}

impl<P: OutputPin> HalPins<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pin` under `line`, replacing any previous pin.
    pub fn with_pin(mut self, line: u32, pin: P) -> Self {
        self.pins.insert(line, pin);
        self
    }

    pub fn insert(&mut self, line: u32, pin: P) -> Option<P> {
        self.pins.insert(line, pin)
    }

    fn pin_mut(&mut self, line: u32) -> Result<&mut P> {
        self.pins.get_mut(&line).ok_or(OutputError::Unavailable {
            line,
            reason: "no pin registered".into(),
        })
    }
}

impl<P: OutputPin + Send> OutputPins for HalPins<P> {
    fn label(&self) -> &str {
        "embedded-hal"
    }

    fn setup(&mut self, line: u32, initial: Level) -> Result<()> {
        self.pin_mut(line)?
            .set_state(initial.into())
            .map_err(|e| OutputError::SetupFailed {
                line,
                reason: format!("{:?}", e.kind()),
            })
    }

    fn write(&mut self, line: u32, level: Level) -> Result<()> {
        self.pin_mut(line)?
            .set_state(level.into())
            .map_err(|e| OutputError::WriteFailed {
                line,
                reason: format!("{:?}", e.kind()),
            })
    }

    fn cleanup(&mut self, line: u32) -> Result<()> {
        let Some(pin) = self.pins.get_mut(&line) else {
            return Ok(());
        };
        pin.set_low().map_err(|e| OutputError::CleanupFailed {
            line,
            reason: format!("{:?}", e.kind()),
        })
    }
}

// ── Simulated backend ──

/// In-memory lines for dry runs. Transitions are logged at info level.
#[derive(Debug, Default)]
pub struct SimulatedPins {
    levels: BTreeMap<u32, Level>,
}

impl SimulatedPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, line: u32) -> Option<Level> {
        self.levels.get(&line).copied()
    }
}

impl OutputPins for SimulatedPins {
    fn label(&self) -> &str {
        "simulated"
    }

    fn setup(&mut self, line: u32, initial: Level) -> Result<()> {
        log::info!("[sim] line {line} configured ({initial})");
        self.levels.insert(line, initial);
        Ok(())
    }

    fn write(&mut self, line: u32, level: Level) -> Result<()> {
        let Some(current) = self.levels.get_mut(&line) else {
            return Err(OutputError::Unavailable {
                line,
                reason: "not configured".into(),
            });
        };
        if *current != level {
            log::info!("[sim] line {line} -> {level}");
            *current = level;
        }
        Ok(())
    }

    fn cleanup(&mut self, line: u32) -> Result<()> {
        if self.levels.remove(&line).is_some() {
            log::info!("[sim] line {line} released");
        }
        Ok(())
    }
}

// ── Mock backend ──

pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::time::Instant;

    /// One recorded level write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteRecord {
        pub line: u32,
        pub level: Level,
        pub at: Instant,
    }

    #[derive(Debug, Default)]
    pub struct MockState {
        /// Current level per configured line.
        pub levels: BTreeMap<u32, Level>,
        /// Lines currently set up as outputs.
        pub configured: BTreeSet<u32>,
        /// Every successful write (including setup's initial level).
        pub history: Vec<WriteRecord>,
        /// Lines whose setup and writes fail.
        pub failing: BTreeSet<u32>,
        pub setup_calls: Vec<u32>,
        pub cleanup_calls: Vec<u32>,
    }

    /// Shared in-memory pin bank for tests. Clones observe the same state,
    /// so a test can keep a handle after moving one into a driver.
    #[derive(Debug, Clone, Default)]
    pub struct MockPins {
        inner: Arc<Mutex<MockState>>,
    }

    impl MockPins {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn state(&self) -> MutexGuard<'_, MockState> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Current level of `line` (`Low` if never written).
        pub fn level(&self, line: u32) -> Level {
            self.state().levels.get(&line).copied().unwrap_or(Level::Low)
        }

        /// Lines currently HIGH, ascending.
        pub fn high_lines(&self) -> Vec<u32> {
            self.state()
                .levels
                .iter()
                .filter(|(_, l)| **l == Level::High)
                .map(|(line, _)| *line)
                .collect()
        }

        pub fn history(&self) -> Vec<WriteRecord> {
            self.state().history.clone()
        }

        /// Recorded writes for a single line, in order.
        pub fn history_for(&self, line: u32) -> Vec<WriteRecord> {
            self.state()
                .history
                .iter()
                .filter(|r| r.line == line)
                .copied()
                .collect()
        }

        pub fn clear_history(&self) {
            self.state().history.clear();
        }

        pub fn is_configured(&self, line: u32) -> bool {
            self.state().configured.contains(&line)
        }

        /// Make every subsequent setup/write on `line` fail.
        pub fn fail_line(&self, line: u32) {
            self.state().failing.insert(line);
        }

        pub fn heal_line(&self, line: u32) {
            self.state().failing.remove(&line);
        }
    }

    impl OutputPins for MockPins {
        fn label(&self) -> &str {
            "mock"
        }

        fn setup(&mut self, line: u32, initial: Level) -> Result<()> {
            let mut st = self.state();
            st.setup_calls.push(line);
            if st.failing.contains(&line) {
                return Err(OutputError::SetupFailed {
                    line,
                    reason: "injected failure".into(),
                });
            }
            st.configured.insert(line);
            st.levels.insert(line, initial);
            st.history.push(WriteRecord {
                line,
                level: initial,
                at: Instant::now(),
            });
            Ok(())
        }

        fn write(&mut self, line: u32, level: Level) -> Result<()> {
            let mut st = self.state();
            if st.failing.contains(&line) {
                return Err(OutputError::WriteFailed {
                    line,
                    reason: "injected failure".into(),
                });
            }
            if !st.configured.contains(&line) {
                return Err(OutputError::Unavailable {
                    line,
                    reason: "not configured".into(),
                });
            }
            st.levels.insert(line, level);
            st.history.push(WriteRecord {
                line,
                level,
                at: Instant::now(),
            });
            Ok(())
        }

        fn cleanup(&mut self, line: u32) -> Result<()> {
            let mut st = self.state();
            st.cleanup_calls.push(line);
            st.configured.remove(&line);
            st.levels.remove(&line);
            Ok(())
        }
    }
}
