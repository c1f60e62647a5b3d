//! `states` subcommand: show the state-to-lamp table, blink set and event mapping.

use std::path::Path;

use super::{
    BindingJson, EventJson, PrinterState, Result, StateMapper, StatesOutput, kv, kv_indent,
    kv_width, load_config, print_json,
};

pub(super) fn cmd_states(json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    config.check()?;
    let mapper = StateMapper::from_config(&config)?;

    let bindings: Vec<BindingJson> = mapper
        .bindings()
        .iter()
        .map(|(state, binding)| BindingJson {
            state: state.to_string(),
            lamp: binding.color.clone(),
            line: binding.line.line(),
            blinks: config.strobe && mapper.is_blink_eligible(state),
        })
        .collect();
    let events: Vec<EventJson> = PrinterState::EVENTS
        .iter()
        .filter_map(|&event| {
            PrinterState::from_event(event).map(|state| EventJson {
                event: event.into(),
                state: state.to_string(),
            })
        })
        .collect();

    if json {
        return print_json(&StatesOutput {
            strobe: config.strobe,
            bindings,
            events,
        });
    }

    let indent_keys: Vec<String> = bindings
        .iter()
        .map(|b| format!("{}:", b.state))
        .chain(events.iter().map(|e| format!("{}:", e.event)))
        .collect();
    let indent_refs: Vec<&str> = indent_keys.iter().map(String::as_str).collect();
    let w = kv_width(&["Strobe:"], &indent_refs);

    if config.strobe {
        kv(
            "Strobe:",
            format_args!(
                "on ({} ms on / {} ms off)",
                config.delay_on_ms, config.delay_off_ms
            ),
            w,
        );
    } else {
        kv("Strobe:", "off", w);
    }
    println!();

    println!("States:");
    for b in &bindings {
        let line = match b.line {
            Some(line) => format!("line {line}"),
            None => "unassigned".to_string(),
        };
        let mode = if b.blinks { "blink" } else { "steady" };
        kv_indent(
            &format!("{}:", b.state),
            format_args!("{} ({line}, {mode})", b.lamp),
            w,
        );
    }
    println!("  (any other state: all lamps off)");
    println!();

    println!("Events:");
    for e in &events {
        kv_indent(&format!("{}:", e.event), &e.state, w);
    }
    Ok(())
}
