//! `run` subcommand: feed stdin notifications into the tower until EOF or Ctrl+C.

use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, mpsc};
use std::time::Duration;

use super::{
    JsonLines, PrinterState, RUNNING, Result, load_config, open_tower, reload_config,
};

/// One parsed line of input.
#[derive(Debug, PartialEq)]
pub(super) enum Input {
    State(PrinterState),
    Event(String),
    Reload,
}

/// Parse a notification line. Blank lines and `#` comments yield `None`.
///
/// Bare words are state names, or event names when `events` is set;
/// `state <Name>` and `event <Name>` are always explicit.
pub(super) fn parse_line(line: &str, events: bool) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if line == "reload" {
        return Some(Input::Reload);
    }
    if let Some(name) = line.strip_prefix("event ") {
        return Some(Input::Event(name.trim().to_string()));
    }
    if let Some(name) = line.strip_prefix("state ") {
        return Some(Input::State(PrinterState::from_host(name)));
    }
    if events {
        Some(Input::Event(line.to_string()))
    } else {
        Some(Input::State(PrinterState::from_host(line)))
    }
}

/// Read stdin on its own thread so the main loop can watch for Ctrl+C.
/// The channel disconnects at end of input.
fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("[stdin] {e}");
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

pub(super) fn cmd_run(events: bool, dry_run: bool, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let broadcaster = Arc::new(JsonLines::new(std::io::stdout()));
    let mut tower = open_tower(config, dry_run, broadcaster)?;
    log::info!(
        "[run] reading {} from stdin",
        if events { "events" } else { "states" }
    );

    let rx = spawn_stdin_reader()?;
    while RUNNING.load(Ordering::SeqCst) {
        // 250ms fallback so Ctrl+C is noticed while stdin is idle
        let line = match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(line) => line,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::info!("[run] end of input");
                break;
            }
        };
        match parse_line(&line, events) {
            Some(Input::State(state)) => {
                tower.notify_state(state);
            }
            Some(Input::Event(event)) => {
                tower.notify_event(&event);
            }
            Some(Input::Reload) => match reload_config(config_path)
                .and_then(|config| tower.apply_settings(config))
            {
                Ok(()) => log::info!("[run] settings reloaded"),
                Err(e) => log::warn!("[run] reload rejected, keeping current settings: {e}"),
            },
            None => {}
        }
    }

    tower.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_word_is_state() {
        assert_eq!(
            parse_line("Printing", false),
            Some(Input::State(PrinterState::Printing))
        );
    }

    #[test]
    fn bare_word_is_event_in_event_mode() {
        assert_eq!(
            parse_line("PrintDone", true),
            Some(Input::Event("PrintDone".into()))
        );
    }

    #[test]
    fn explicit_prefixes_override_mode() {
        assert_eq!(
            parse_line("event PrintPaused", false),
            Some(Input::Event("PrintPaused".into()))
        );
        assert_eq!(
            parse_line("state Offline", true),
            Some(Input::State(PrinterState::Offline))
        );
    }

    #[test]
    fn reload_keyword() {
        assert_eq!(parse_line(" reload ", false), Some(Input::Reload));
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert_eq!(parse_line("", false), None);
        assert_eq!(parse_line("   ", true), None);
        assert_eq!(parse_line("# Printing", false), None);
    }

    #[test]
    fn unknown_state_is_kept() {
        assert_eq!(
            parse_line("Cancelling", false),
            Some(Input::State(PrinterState::Other("Cancelling".into())))
        );
    }
}
