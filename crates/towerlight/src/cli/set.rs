//! `set` subcommand: apply one printer state, hold it, then shut down.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{
    Dispatch, LogBroadcaster, PrinterState, Result, SetOutput, kv, kv_width, load_config,
    open_tower, print_json, sleep_while_running,
};

/// Action name, line and color for a dispatch decision.
fn describe(dispatch: &Dispatch) -> (&'static str, Option<u32>, Option<&str>) {
    match dispatch {
        Dispatch::Unchanged => ("none", None, None),
        Dispatch::Off => ("off", None, None),
        Dispatch::Static { line, color } => ("steady", line.line(), Some(color.as_str())),
        Dispatch::Strobe { line, color } => ("strobe", line.line(), Some(color.as_str())),
    }
}

pub(super) fn cmd_set(
    state: &str,
    dry_run: bool,
    hold: u64,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path);
    let enabled = config.enabled;
    let mut tower = open_tower(config, dry_run, Arc::new(LogBroadcaster))?;

    let state = PrinterState::from_host(state);
    if !state.is_known() {
        log::warn!("[set] no lamp is bound to \"{state}\", all lamps off");
    }
    if !enabled {
        log::warn!("[set] tower is disabled in config, nothing will light");
    }
    let dispatch = tower.notify_state(state.clone());
    let (action, line, color) = describe(&dispatch);

    if json {
        print_json(&SetOutput {
            state: state.to_string(),
            action: action.into(),
            line,
            color: color.map(str::to_string),
        })?;
    } else {
        let w = kv_width(&["State:", "Action:", "Line:", "Color:"], &[]);
        kv("State:", &state, w);
        kv("Action:", action, w);
        if let Some(color) = color {
            match line {
                Some(line) => kv("Line:", line, w),
                None => kv("Line:", "(unassigned)", w),
            }
            kv("Color:", color, w);
        }
        if hold > 0 {
            println!();
            println!("Holding for {hold}s (Ctrl+C to stop)...");
        }
    }

    sleep_while_running(Duration::from_secs(hold));
    tower.shutdown();
    Ok(())
}
