//! State mapper: printer lifecycle state to tower line and UI color.
//!
//! [`StateMapper::resolve`] is a pure decision function: it never touches
//! hardware. The controller turns its [`Dispatch`] into line writes,
//! strobes and broadcasts.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::output::PinAssignment;

/// Printer lifecycle state as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PrinterState {
    Offline,
    Paused,
    Printing,
    Operational,
    /// Any state string without a binding (e.g. "Connecting", "Error").
    Other(String),
}

impl PrinterState {
    /// States with a default binding, in tower order (top to bottom).
    pub const KNOWN: [PrinterState; 4] = [
        PrinterState::Offline,
        PrinterState::Paused,
        PrinterState::Printing,
        PrinterState::Operational,
    ];

    /// Parse the host's state string. Surrounding whitespace is trimmed;
    /// the name itself is matched exactly (case-sensitive).
    pub fn from_host(s: &str) -> Self {
        match s.trim() {
            "Offline" => PrinterState::Offline,
            "Paused" => PrinterState::Paused,
            "Printing" => PrinterState::Printing,
            "Operational" => PrinterState::Operational,
            other => PrinterState::Other(other.to_string()),
        }
    }

    /// Host events that imply a state, in lifecycle order.
    pub const EVENTS: [&'static str; 9] = [
        "Connected",
        "PrintStarted",
        "PrintPaused",
        "PrintResumed",
        "PrintDone",
        "PrintFailed",
        "PrintCancelled",
        "Error",
        "Disconnected",
    ];

    /// Map a discrete host event to the state it implies.
    ///
    /// Returns `None` for events that say nothing about the printer's state.
    pub fn from_event(event: &str) -> Option<Self> {
        match event.trim() {
            "Connected" => Some(PrinterState::Operational),
            "Disconnected" | "Error" => Some(PrinterState::Offline),
            "PrintStarted" | "PrintResumed" => Some(PrinterState::Printing),
            "PrintPaused" => Some(PrinterState::Paused),
            "PrintDone" | "PrintFailed" | "PrintCancelled" => Some(PrinterState::Operational),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PrinterState::Offline => "Offline",
            PrinterState::Paused => "Paused",
            PrinterState::Printing => "Printing",
            PrinterState::Operational => "Operational",
            PrinterState::Other(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, PrinterState::Other(_))
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for PrinterState {
    fn from(s: String) -> Self {
        PrinterState::from_host(&s)
    }
}

impl From<&str> for PrinterState {
    fn from(s: &str) -> Self {
        PrinterState::from_host(s)
    }
}

impl From<PrinterState> for String {
    fn from(state: PrinterState) -> Self {
        state.as_str().to_string()
    }
}

// ── Bindings ──

pub const COLOR_RED: &str = "red";
pub const COLOR_YELLOW: &str = "yellow";
pub const COLOR_GREEN: &str = "green";
pub const COLOR_BLUE: &str = "blue";

/// One state's output line and UI color label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub line: PinAssignment,
    pub color: String,
}

impl Binding {
    pub fn new(line: PinAssignment, color: impl Into<String>) -> Self {
        Self {
            line,
            color: color.into(),
        }
    }
}

/// The four-color tower: Offline red, Paused yellow, Printing green, Operational blue.
pub fn four_color_bindings(
    red: PinAssignment,
    yellow: PinAssignment,
    green: PinAssignment,
    blue: PinAssignment,
) -> Vec<(PrinterState, Binding)> {
    vec![
        (PrinterState::Offline, Binding::new(red, COLOR_RED)),
        (PrinterState::Paused, Binding::new(yellow, COLOR_YELLOW)),
        (PrinterState::Printing, Binding::new(green, COLOR_GREEN)),
        (PrinterState::Operational, Binding::new(blue, COLOR_BLUE)),
    ]
}

/// Injected "should this state blink" predicate.
pub type BlinkPredicate = Arc<dyn Fn(&PrinterState) -> bool + Send + Sync>;

/// Predicate accepting exactly the given states.
pub fn blink_set(states: impl IntoIterator<Item = PrinterState>) -> BlinkPredicate {
    let states: Vec<PrinterState> = states.into_iter().collect();
    Arc::new(move |s: &PrinterState| states.contains(s))
}

// ── Decision ──

/// What the controller should do for a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Same state as before: touch nothing.
    Unchanged,
    /// No binding: every line stays LOW.
    Off,
    /// Light `line` steadily and announce `color` once.
    Static { line: PinAssignment, color: String },
    /// Blink `line`, announcing `color` on each rising edge.
    Strobe { line: PinAssignment, color: String },
}

/// Binding table plus blink policy.
#[derive(Clone)]
pub struct StateMapper {
    bindings: Vec<(PrinterState, Binding)>,
    blink: BlinkPredicate,
}

impl fmt::Debug for StateMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMapper")
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl StateMapper {
    /// Build a mapper, rejecting duplicate states and lines shared by two states.
    pub fn new(
        bindings: Vec<(PrinterState, Binding)>,
        blink: BlinkPredicate,
    ) -> std::result::Result<Self, String> {
        for (i, (state, binding)) in bindings.iter().enumerate() {
            for (other_state, other) in &bindings[..i] {
                if other_state == state {
                    return Err(format!("state {state} is bound twice"));
                }
                if binding.line.is_assigned() && other.line == binding.line {
                    return Err(format!(
                        "line {} is bound to both {other_state} and {state}",
                        binding.line
                    ));
                }
            }
        }
        Ok(Self { bindings, blink })
    }

    /// Four-color table from the configured pins and blink states.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let pins = &config.pins;
        let bindings = four_color_bindings(pins.red, pins.yellow, pins.green, pins.blue);
        let blink = blink_set(config.blink_states.iter().map(|s| PrinterState::from_host(s)));
        Self::new(bindings, blink).map_err(crate::TowerLightError::Config)
    }

    pub fn bindings(&self) -> &[(PrinterState, Binding)] {
        &self.bindings
    }

    pub fn binding(&self, state: &PrinterState) -> Option<&Binding> {
        self.bindings
            .iter()
            .find(|(s, _)| s == state)
            .map(|(_, b)| b)
    }

    pub fn is_blink_eligible(&self, state: &PrinterState) -> bool {
        (self.blink)(state)
    }

    /// Every bound line, in table order (unassigned entries included).
    pub fn lines(&self) -> Vec<PinAssignment> {
        self.bindings.iter().map(|(_, b)| b.line).collect()
    }

    /// Decide the action for `current`, given the previously applied state.
    pub fn resolve(
        &self,
        current: &PrinterState,
        previous: Option<&PrinterState>,
        blink_enabled: bool,
    ) -> Dispatch {
        if previous == Some(current) {
            return Dispatch::Unchanged;
        }
        let Some(binding) = self.binding(current) else {
            return Dispatch::Off;
        };
        let line = binding.line;
        let color = binding.color.clone();
        if blink_enabled && self.is_blink_eligible(current) {
            Dispatch::Strobe { line, color }
        } else {
            Dispatch::Static { line, color }
        }
    }
}
