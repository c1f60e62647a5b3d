//! Application configuration: TOML-based, platform-aware paths.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcast::BadgeKind;
use crate::mapping::PrinterState;
use crate::output::{DEFAULT_SYSFS_ROOT, PinAssignment};
use crate::strobe::StrobeTiming;

/// First lines of every saved config file.
const CONFIG_HEADER: &str = "# Towerlight configuration.\n\
                             # Check edits with `towerlight config` before reloading a running session.\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Drive the tower at all. When off, states are tracked but nothing is lit.
    #[serde(default = "default_true", alias = "tower_enabled")]
    pub enabled: bool,

    /// Blink lines for states listed in `blink_states` instead of lighting them steadily.
    #[serde(default = "default_true", alias = "blink_enabled")]
    pub strobe: bool,

    /// Strobe HIGH phase in milliseconds. Default: 100.
    #[serde(default = "default_delay_on_ms")]
    pub delay_on_ms: u64,

    /// Strobe LOW phase in milliseconds. Default: 1000.
    #[serde(default = "default_delay_off_ms")]
    pub delay_off_ms: u64,

    /// States that blink when `strobe` is on.
    #[serde(default = "default_blink_states")]
    pub blink_states: Vec<String>,

    /// Forward raw host events to the UI as `{"type":"event"}` messages.
    #[serde(default)]
    pub forward_events: bool,

    /// Message shape used for the lamp color: "machine_state" or "navbar_status".
    #[serde(default)]
    pub badge: BadgeKind,

    /// Consecutive failed strobe writes before the strobe gives up.
    #[serde(default = "default_max_strobe_failures")]
    pub max_strobe_failures: u32,

    /// How long to wait for a strobe thread to acknowledge a stop.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default)]
    pub pins: PinMap,

    #[serde(default)]
    pub gpio: GpioConfig,
}

/// Output line for each lamp. `-1` or `"unassigned"` leaves a lamp unwired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMap {
    #[serde(default = "default_red")]
    pub red: PinAssignment,
    #[serde(default = "default_yellow")]
    pub yellow: PinAssignment,
    #[serde(default = "default_green")]
    pub green: PinAssignment,
    #[serde(default = "default_blue")]
    pub blue: PinAssignment,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            red: default_red(),
            yellow: default_yellow(),
            green: default_green(),
            blue: default_blue(),
        }
    }
}

impl PinMap {
    /// Lamps in tower order, with their names.
    pub fn named(&self) -> [(&'static str, PinAssignment); 4] {
        [
            ("red", self.red),
            ("yellow", self.yellow),
            ("green", self.green),
            ("blue", self.blue),
        ]
    }
}

/// Which output backend drives the lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Linux `/sys/class/gpio`.
    #[default]
    Sysfs,
    /// In-memory lines, transitions logged.
    Simulated,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sysfs => write!(f, "sysfs"),
            Backend::Simulated => write!(f, "simulated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_delay_on_ms() -> u64 {
    100
}
fn default_delay_off_ms() -> u64 {
    1000
}
fn default_blink_states() -> Vec<String> {
    vec!["Paused".into(), "Printing".into(), "Operational".into()]
}
fn default_max_strobe_failures() -> u32 {
    crate::strobe::DEFAULT_MAX_FAILURES
}
fn default_stop_timeout_ms() -> u64 {
    crate::strobe::DEFAULT_STOP_TIMEOUT.as_millis() as u64
}
fn default_red() -> PinAssignment {
    PinAssignment::Line(19)
}
fn default_yellow() -> PinAssignment {
    PinAssignment::Line(16)
}
fn default_green() -> PinAssignment {
    PinAssignment::Line(20)
}
fn default_blue() -> PinAssignment {
    PinAssignment::Line(21)
}
fn default_sysfs_root() -> String {
    DEFAULT_SYSFS_ROOT.into()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: true,
            strobe: true,
            delay_on_ms: default_delay_on_ms(),
            delay_off_ms: default_delay_off_ms(),
            blink_states: default_blink_states(),
            forward_events: false,
            badge: BadgeKind::default(),
            max_strobe_failures: default_max_strobe_failures(),
            stop_timeout_ms: default_stop_timeout_ms(),
            pins: PinMap::default(),
            gpio: GpioConfig::default(),
        }
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A strobe delay is zero (`field` is `"delay_on_ms"` or `"delay_off_ms"`).
    ZeroDelay { field: &'static str },
    /// Two lamps are wired to the same line.
    DuplicateLine {
        line: u32,
        first: &'static str,
        second: &'static str,
    },
    /// A `blink_states` entry is not a known printer state.
    UnknownBlinkState(String),
    /// `max_strobe_failures` is zero.
    ZeroFailureThreshold,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroDelay { field } => write!(f, "{field} must be greater than 0"),
            ValidationError::DuplicateLine {
                line,
                first,
                second,
            } => write!(f, "Line {line} is assigned to both {first} and {second}"),
            ValidationError::UnknownBlinkState(s) => {
                write!(f, "Unknown state in blink_states: \"{s}\"")
            }
            ValidationError::ZeroFailureThreshold => {
                write!(f, "max_strobe_failures must be greater than 0")
            }
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("towerlight"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load config from disk, or return defaults if not found.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Serialized file contents, header included.
    fn to_file_contents(&self) -> std::io::Result<String> {
        let body = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        Ok(format!("{CONFIG_HEADER}{body}"))
    }

    /// Write to `path` through a sibling `.toml.tmp` file and a rename, so a
    /// reader never sees a half-written config.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let contents = self.to_file_contents()?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            log::debug!("[config] rename into {} failed ({e}), writing in place", path.display());
            let written = std::fs::write(path, &contents);
            let _ = std::fs::remove_file(&tmp);
            return written;
        }
        Ok(())
    }

    fn parse(contents: &str, path: &Path) -> std::result::Result<Self, String> {
        toml::from_str(contents).map_err(|e| format!("{}: {e}", path.display()))
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return (Self::default(), vec![]);
        };
        match Self::parse(&contents, path) {
            Ok(config) => (config, vec![]),
            Err(e) => (
                Self::default(),
                vec![format!("config parse error, using defaults: {e}")],
            ),
        }
    }

    /// Load `path` without falling back to defaults.
    ///
    /// A missing, unreadable or unparsable file is an error.
    pub fn try_load_from(path: &Path) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&contents, path).map_err(crate::TowerLightError::Config)
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Strobe duty cycle from `delay_on_ms` / `delay_off_ms`.
    pub fn timing(&self) -> StrobeTiming {
        StrobeTiming::from_millis(self.delay_on_ms, self.delay_off_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Validate the entire config, collecting all errors.
    ///
    /// Returns `Ok(())` if valid, or `Err(Vec<ValidationError>)` with all problems found.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.delay_on_ms == 0 {
            errors.push(ValidationError::ZeroDelay {
                field: "delay_on_ms",
            });
        }
        if self.delay_off_ms == 0 {
            errors.push(ValidationError::ZeroDelay {
                field: "delay_off_ms",
            });
        }

        let named = self.pins.named();
        for (i, (name, pin)) in named.iter().enumerate() {
            let Some(line) = pin.line() else { continue };
            if let Some((first, _)) = named[..i].iter().find(|(_, p)| p.line() == Some(line)) {
                errors.push(ValidationError::DuplicateLine {
                    line,
                    first: *first,
                    second: *name,
                });
            }
        }

        for s in &self.blink_states {
            if !PrinterState::from_host(s).is_known() {
                errors.push(ValidationError::UnknownBlinkState(s.clone()));
            }
        }

        if self.max_strobe_failures == 0 {
            errors.push(ValidationError::ZeroFailureThreshold);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// [`validate`](Self::validate), folded into a single crate error.
    pub fn check(&self) -> crate::error::Result<()> {
        self.validate().map_err(|errs| {
            let msgs: Vec<String> = errs.iter().map(ToString::to_string).collect();
            crate::TowerLightError::Config(msgs.join("; "))
        })
    }
}
