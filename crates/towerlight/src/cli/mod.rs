//! CLI subcommands: run the adapter, set a state, test lamps, inspect config.

mod config_cmd;
mod run;
mod set;
mod states;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Subcommand;
use serde::Serialize;

pub(super) use crate::RUNNING;
pub(super) use towerlight_lib::TowerLightError;
pub(super) use towerlight_lib::broadcast::{Broadcaster, JsonLines, LogBroadcaster};
pub(super) use towerlight_lib::config::{Backend, Config};
pub(super) use towerlight_lib::controller::TowerLight;
pub(super) use towerlight_lib::error::Result;
pub(super) use towerlight_lib::mapping::{Dispatch, PrinterState, StateMapper};
pub(super) use towerlight_lib::output::{OutputPins, SimulatedPins, SysfsGpio};

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

pub(super) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{text}");
    Ok(())
}

/// Load config from `custom_path` if given, else from the platform default.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    match custom_path {
        Some(path) => {
            let (config, warnings) = Config::load_from(path);
            for w in &warnings {
                log::warn!("{w}");
            }
            config
        }
        None => Config::load(),
    }
}

/// The config file in use: `custom_path`, else the platform default.
pub(super) fn config_file(custom_path: Option<&Path>) -> Result<PathBuf> {
    match custom_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::path()
            .ok_or_else(|| TowerLightError::Config("no config directory on this platform".into())),
    }
}

/// Re-read the config for a running session. Unlike [`load_config`] there
/// is no fallback: a missing or broken file is an error.
pub(super) fn reload_config(custom_path: Option<&Path>) -> Result<Config> {
    Config::try_load_from(&config_file(custom_path)?)
}

/// Output backend for `config`; `dry_run` forces the simulator.
pub(super) fn open_pins(config: &Config, dry_run: bool) -> Box<dyn OutputPins> {
    if dry_run || config.gpio.backend == Backend::Simulated {
        Box::new(SimulatedPins::new())
    } else {
        Box::new(SysfsGpio::new(&config.gpio.sysfs_root))
    }
}

/// Build and start a tower light for a subcommand.
pub(super) fn open_tower(
    config: Config,
    dry_run: bool,
    broadcaster: Arc<dyn Broadcaster>,
) -> Result<TowerLight<Box<dyn OutputPins>>> {
    let pins = open_pins(&config, dry_run);
    let mut tower = TowerLight::new(pins, config, broadcaster)?;
    tower.startup();
    Ok(tower)
}

/// Sleep for `dur`, returning early (with `false`) on Ctrl+C.
pub(super) fn sleep_while_running(dur: Duration) -> bool {
    let deadline = Instant::now() + dur;
    while RUNNING.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
    false
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
}

#[derive(Serialize)]
pub(super) struct BindingJson {
    pub state: String,
    pub lamp: String,
    pub line: Option<u32>,
    pub blinks: bool,
}

#[derive(Serialize)]
pub(super) struct EventJson {
    pub event: String,
    pub state: String,
}

#[derive(Serialize)]
pub(super) struct StatesOutput {
    pub strobe: bool,
    pub bindings: Vec<BindingJson>,
    pub events: Vec<EventJson>,
}

#[derive(Serialize)]
pub(super) struct SetOutput {
    pub state: String,
    pub action: String,
    pub line: Option<u32>,
    pub color: Option<String>,
}

#[derive(Serialize)]
pub(super) struct LampResultJson {
    pub lamp: String,
    pub line: Option<u32>,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub(super) struct LampTestOutput {
    pub backend: String,
    pub lamps: Vec<LampResultJson>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Read notifications from stdin and drive the tower (one per line:
    /// `<State>`, `event <Name>`, `state <Name>` or `reload`)
    Run {
        /// Treat bare words as host events instead of state names
        #[arg(long)]
        events: bool,
        /// Simulate the output lines instead of touching hardware
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply one printer state, hold it, then shut down
    Set {
        /// Printer state (e.g. Printing, Paused, Operational, Offline)
        state: String,
        /// Simulate the output lines instead of touching hardware
        #[arg(long)]
        dry_run: bool,
        /// Seconds to hold the state before shutting down
        #[arg(long, default_value_t = 5)]
        hold: u64,
    },

    /// Light each configured lamp in turn
    LampTest {
        /// Simulate the output lines instead of touching hardware
        #[arg(long)]
        dry_run: bool,
        /// Milliseconds each lamp stays lit
        #[arg(long, default_value_t = 1000)]
        delay: u64,
    },

    /// Show the state-to-lamp table, blink set and event mapping
    States,

    /// Show current configuration and file path
    Config {
        /// Write a default config file first (fails if one already exists)
        #[arg(long)]
        init: bool,
    },
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Run { events, dry_run } => {
            if json {
                warn_json_unsupported("run");
            }
            run::cmd_run(events, dry_run, config_path)
        }
        Command::Set {
            state,
            dry_run,
            hold,
        } => set::cmd_set(&state, dry_run, hold, json, config_path),
        Command::LampTest { dry_run, delay } => {
            lamp_test::cmd_lamp_test(dry_run, delay, json, config_path)
        }
        Command::States => states::cmd_states(json, config_path),
        Command::Config { init } => config_cmd::cmd_config(json, init, config_path),
    }
}

#[cfg(test)]
mod format_tests {
    use super::*;

    #[test]
    fn kv_width_top_only() {
        let w = kv_width(&["Short:", "Longer key:"], &[]);
        // "Longer key:" = 11 + PADDING = 13
        assert_eq!(w, 13);
    }

    #[test]
    fn kv_width_indent_drives_width() {
        let w = kv_width(&["A:"], &["Very long indent key:"]);
        // "Very long indent key:" = 21 + PADDING + 2 = 25
        assert_eq!(w, 25);
    }

    #[test]
    fn values_align_across_levels() {
        let w = kv_width(&["Top:"], &["Indent:"]);
        let top = format_kv("Top:", "V", w);
        let indent = format!("  {:<width$}{}", "Indent:", "V", width = w - 2);
        assert_eq!(top.find('V'), indent.find('V'));
    }

    #[test]
    fn format_kv_exact_width() {
        // Longer than width: no padding added
        assert_eq!(format_kv("ExactWidth:", "val", 10), "ExactWidth:val");
    }

    #[test]
    fn kv_width_empty_both() {
        assert_eq!(kv_width(&[], &[]), 0);
    }
}

#[cfg(test)]
mod helper_tests {
    use super::*;

    #[test]
    fn dry_run_forces_simulator() {
        let config = Config::default();
        assert_eq!(open_pins(&config, true).label(), "simulated");
        assert_eq!(open_pins(&config, false).label(), "sysfs");
    }

    #[test]
    fn simulated_backend_from_config() {
        let mut config = Config::default();
        config.gpio.backend = Backend::Simulated;
        assert_eq!(open_pins(&config, false).label(), "simulated");
    }

    #[test]
    fn load_config_from_custom_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tower.toml");
        std::fs::write(&path, "strobe = false\ndelay_on_ms = 50").unwrap();
        let config = load_config(Some(&path));
        assert!(!config.strobe);
        assert_eq!(config.delay_on_ms, 50);
    }

    #[test]
    fn load_config_missing_custom_path_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("missing.toml")));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn open_tower_dry_run_configures_lines() {
        let tower = open_tower(Config::default(), true, Arc::new(LogBroadcaster)).unwrap();
        assert_eq!(tower.driver().label(), "simulated");
        assert_eq!(tower.driver().lines(), &[19, 16, 20, 21]);
    }

    #[test]
    fn open_tower_rejects_invalid_config() {
        let config = Config {
            delay_on_ms: 0,
            ..Config::default()
        };
        assert!(open_tower(config, true, Arc::new(LogBroadcaster)).is_err());
    }

    #[test]
    fn sleep_zero_returns_immediately() {
        assert!(sleep_while_running(Duration::ZERO));
    }
}

#[cfg(test)]
mod json_output_tests {
    use super::*;

    #[test]
    fn config_output_complete() {
        let output = ConfigOutput {
            config_file: Some("/home/user/.config/towerlight/config.toml".into()),
            config_file_exists: true,
            settings: Config::default(),
        };
        let json = serde_json::to_string_pretty(&output).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert!(parsed["config_file"].is_string());
        assert_eq!(parsed["config_file_exists"], true);
        assert_eq!(parsed["settings"]["enabled"], true);
        assert_eq!(parsed["settings"]["delay_on_ms"], 100);
        assert_eq!(parsed["settings"]["pins"]["red"], 19);
        assert_eq!(parsed["settings"]["gpio"]["backend"], "sysfs");
    }

    #[test]
    fn unassigned_pin_serializes_as_sentinel() {
        let mut settings = Config::default();
        settings.pins.blue = towerlight_lib::output::PinAssignment::Unassigned;
        let output = ConfigOutput {
            config_file: None,
            config_file_exists: false,
            settings,
        };
        let parsed = serde_json::to_value(&output).unwrap();
        assert!(parsed["config_file"].is_null());
        assert_eq!(parsed["settings"]["pins"]["blue"], -1);
    }

    #[test]
    fn set_output_has_expected_fields() {
        let output = SetOutput {
            state: "Printing".into(),
            action: "strobe".into(),
            line: Some(20),
            color: Some("green".into()),
        };
        let json = serde_json::to_value(&output).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 4, "SetOutput should have 4 fields");
        assert_eq!(json["line"], 20);
    }

    #[test]
    fn lamp_test_output_failed_lamp() {
        let output = LampTestOutput {
            backend: "sysfs".into(),
            lamps: vec![LampResultJson {
                lamp: "red".into(),
                line: Some(19),
                ok: false,
                error: Some("Write to line 19 failed: EBUSY".into()),
            }],
        };
        let parsed = serde_json::to_value(&output).unwrap();
        assert_eq!(parsed["lamps"][0]["ok"], false);
        assert!(parsed["lamps"][0]["error"].is_string());
    }
}
