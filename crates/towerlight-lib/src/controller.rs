//! Session controller: one tower light, its strobe slot and its UI badge.
//!
//! [`TowerLight`] holds everything a host plugin needs between callbacks:
//! the last reported state, the output driver, the strobe controller, the
//! mapper and the broadcaster. All hooks take `&mut self`, so host
//! notifications are applied one at a time.

use std::sync::Arc;

use crate::broadcast::{BadgeKind, Broadcaster, UiMessage};
use crate::config::Config;
use crate::driver::OutputDriver;
use crate::error::Result;
use crate::mapping::{Dispatch, PrinterState, StateMapper};
use crate::output::{Level, OutputPins, PinAssignment};
use crate::strobe::{StrobeController, StrobeHooks, StrobeState};

pub struct TowerLight<P: OutputPins + 'static> {
    config: Config,
    mapper: StateMapper,
    driver: OutputDriver<P>,
    strobe: StrobeController,
    broadcaster: Arc<dyn Broadcaster>,
    current: Option<PrinterState>,
}

impl<P: OutputPins + 'static> TowerLight<P> {
    /// Validate `config` and build the default four-color mapper from it.
    ///
    /// Nothing is configured until [`startup`](Self::startup).
    pub fn new(pins: P, config: Config, broadcaster: Arc<dyn Broadcaster>) -> Result<Self> {
        config.check()?;
        let mapper = StateMapper::from_config(&config)?;
        Ok(Self::with_mapper(pins, config, mapper, broadcaster))
    }

    /// Use a custom binding table and blink predicate.
    ///
    /// [`apply_settings`](Self::apply_settings) rebuilds the mapper from
    /// configuration and replaces this one.
    pub fn with_mapper(
        pins: P,
        config: Config,
        mapper: StateMapper,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let strobe = StrobeController::with_limits(config.max_strobe_failures, config.stop_timeout());
        Self {
            config,
            mapper,
            driver: OutputDriver::new(pins),
            strobe,
            broadcaster,
            current: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mapper(&self) -> &StateMapper {
        &self.mapper
    }

    pub fn driver(&self) -> &OutputDriver<P> {
        &self.driver
    }

    pub fn strobe(&self) -> &StrobeController {
        &self.strobe
    }

    pub fn strobe_state(&self) -> StrobeState {
        self.strobe.state()
    }

    /// Last state reported by the host, applied or not.
    pub fn current_state(&self) -> Option<&PrinterState> {
        self.current.as_ref()
    }

    /// Tear down, then configure every bound line LOW (or release them all
    /// when disabled). Safe to call repeatedly.
    pub fn startup(&mut self) {
        self.strobe.stop();
        self.strobe
            .set_limits(self.config.max_strobe_failures, self.config.stop_timeout());

        if !self.config.enabled {
            self.driver.release();
            log::info!("[tower] disabled, lines released");
            return;
        }

        let report = self.driver.configure(&self.mapper.lines());
        log::info!(
            "[tower] ready on {} ({} line(s), {} failed)",
            self.driver.label(),
            self.driver.lines().len(),
            report.failures.len()
        );
    }

    /// Apply a new host state. Repeats of the current state change nothing.
    ///
    /// When the tower is disabled the state is only recorded and
    /// `Dispatch::Unchanged` is returned.
    pub fn notify_state(&mut self, state: PrinterState) -> Dispatch {
        let previous = self.current.replace(state.clone());
        if !self.config.enabled {
            log::debug!("[tower] disabled, recorded {state}");
            return Dispatch::Unchanged;
        }
        self.dispatch(&state, previous.as_ref())
    }

    /// Handle a discrete host event.
    ///
    /// With `forward_events` on, the raw event goes to the UI first. Events
    /// that imply a state are then applied like [`notify_state`](Self::notify_state);
    /// others return `None`.
    pub fn notify_event(&mut self, event: &str) -> Option<Dispatch> {
        if self.config.enabled && self.config.forward_events {
            self.send(&UiMessage::Event {
                event: event.to_string(),
            });
        }
        match PrinterState::from_event(event) {
            Some(state) => Some(self.notify_state(state)),
            None => {
                log::debug!("[tower] ignoring event {event}");
                None
            }
        }
    }

    /// Replace the settings and rebuild outputs.
    ///
    /// Invalid settings are rejected and the running configuration is kept.
    /// On success the strobe is stopped, lines are reconfigured and the
    /// current state is dispatched again.
    pub fn apply_settings(&mut self, config: Config) -> Result<()> {
        config.check()?;
        let mapper = StateMapper::from_config(&config)?;

        self.strobe.stop();
        self.config = config;
        self.mapper = mapper;
        self.startup();

        if self.config.enabled
            && let Some(state) = self.current.clone()
        {
            self.dispatch(&state, None);
        }
        Ok(())
    }

    /// Stop the strobe, drive every line LOW and release them.
    pub fn shutdown(&mut self) {
        self.strobe.stop();
        let report = self.driver.shutdown();
        if report.attempted > 0 {
            log::info!(
                "[tower] shut down ({} line operation(s), {} failed)",
                report.attempted,
                report.failures.len()
            );
        }
    }

    fn dispatch(&mut self, state: &PrinterState, previous: Option<&PrinterState>) -> Dispatch {
        let decision = self.mapper.resolve(state, previous, self.config.strobe);
        if decision == Dispatch::Unchanged {
            return decision;
        }
        match previous {
            Some(prev) => log::info!("[tower] {prev} -> {state}"),
            None => log::info!("[tower] {state}"),
        }

        self.strobe.stop();
        self.driver.reset_all();

        match &decision {
            Dispatch::Unchanged => {}
            Dispatch::Off => log::debug!("[tower] no binding for {state}, all lines off"),
            Dispatch::Static { line, color } => {
                if let Err(e) = self.driver.set_level(*line, Level::High) {
                    log::warn!("[gpio] {e}");
                }
                self.send(&UiMessage::badge(self.config.badge, color.as_str()));
            }
            Dispatch::Strobe { line, color } => self.start_strobe(*line, color.clone()),
        }
        decision
    }

    fn start_strobe(&mut self, line: PinAssignment, color: String) {
        let mut writer = self.driver.line_writer(line);
        let line = writer.line();
        let hooks = badge_hooks(Arc::clone(&self.broadcaster), self.config.badge, color);
        let started = self.strobe.start(
            line,
            self.config.timing(),
            move |level: Level| writer.write(level),
            hooks,
        );
        if let Err(e) = started {
            log::error!("[strobe] could not start: {e}");
        }
    }

    fn send(&self, msg: &UiMessage) {
        if let Err(e) = self.broadcaster.send(msg) {
            log::warn!("[ui] {e}");
        }
    }
}

/// Announce `color` on each rising edge and a dark badge on each falling edge.
fn badge_hooks(broadcaster: Arc<dyn Broadcaster>, kind: BadgeKind, color: String) -> StrobeHooks {
    let rising = Arc::clone(&broadcaster);
    StrobeHooks::new()
        .on_rising(move || Ok(rising.send(&UiMessage::badge(kind, color.as_str()))?))
        .on_falling(move || Ok(broadcaster.send(&UiMessage::badge(kind, ""))?))
}

impl<P: OutputPins + 'static> Drop for TowerLight<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::mock::RecordingBroadcaster;
    use crate::mapping::{Binding, blink_set};
    use crate::output::mock::MockPins;
    use std::time::Duration;

    fn steady_config() -> Config {
        Config {
            strobe: false,
            ..Config::default()
        }
    }

    fn tower(config: Config) -> (TowerLight<MockPins>, MockPins, RecordingBroadcaster) {
        let pins = MockPins::new();
        let ui = RecordingBroadcaster::new();
        let mut t = TowerLight::new(pins.clone(), config, Arc::new(ui.clone())).unwrap();
        t.startup();
        (t, pins, ui)
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = Config {
            delay_off_ms: 0,
            ..Config::default()
        };
        let result = TowerLight::new(
            MockPins::new(),
            config,
            Arc::new(RecordingBroadcaster::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn startup_configures_bound_lines_low() {
        let (t, pins, _) = tower(steady_config());
        assert_eq!(t.driver().lines(), &[19, 16, 20, 21]);
        assert!(pins.high_lines().is_empty());
    }

    #[test]
    fn startup_twice_does_not_leak_lines() {
        let (mut t, pins, _) = tower(steady_config());
        t.startup();
        assert_eq!(t.driver().lines(), &[19, 16, 20, 21]);
        assert_eq!(pins.state().cleanup_calls, vec![19, 16, 20, 21]);
    }

    #[test]
    fn static_state_lights_one_line_and_announces_once() {
        let (mut t, pins, ui) = tower(steady_config());
        let d = t.notify_state(PrinterState::Printing);
        assert!(matches!(d, Dispatch::Static { .. }));
        assert_eq!(pins.high_lines(), vec![20]);
        assert_eq!(ui.labels(), vec!["green"]);
    }

    #[test]
    fn repeated_state_is_unchanged() {
        let (mut t, pins, ui) = tower(steady_config());
        t.notify_state(PrinterState::Paused);
        pins.clear_history();
        assert_eq!(t.notify_state(PrinterState::Paused), Dispatch::Unchanged);
        assert!(pins.history().is_empty());
        assert_eq!(ui.len(), 1);
    }

    #[test]
    fn unknown_state_turns_everything_off() {
        let (mut t, pins, ui) = tower(steady_config());
        t.notify_state(PrinterState::Offline);
        let d = t.notify_state(PrinterState::from_host("Cancelling"));
        assert_eq!(d, Dispatch::Off);
        assert!(pins.high_lines().is_empty());
        assert_eq!(ui.labels(), vec!["red"]);
    }

    #[test]
    fn disabled_records_state_without_output() {
        let config = Config {
            enabled: false,
            ..steady_config()
        };
        let (mut t, pins, ui) = tower(config);
        assert!(t.driver().lines().is_empty());
        assert_eq!(t.notify_state(PrinterState::Printing), Dispatch::Unchanged);
        assert_eq!(t.current_state(), Some(&PrinterState::Printing));
        assert!(pins.history().is_empty());
        assert!(ui.is_empty());
    }

    #[test]
    fn enabling_via_settings_applies_recorded_state() {
        let config = Config {
            enabled: false,
            ..steady_config()
        };
        let (mut t, pins, ui) = tower(config);
        t.notify_state(PrinterState::Paused);
        t.apply_settings(steady_config()).unwrap();
        assert_eq!(pins.high_lines(), vec![16]);
        assert_eq!(ui.labels(), vec!["yellow"]);
    }

    #[test]
    fn invalid_settings_keep_running_config() {
        let (mut t, pins, _) = tower(steady_config());
        t.notify_state(PrinterState::Printing);
        let mut bad = steady_config();
        bad.pins.red = PinAssignment::Line(20);
        assert!(t.apply_settings(bad).is_err());
        assert_eq!(t.config().pins.red, PinAssignment::Line(19));
        assert_eq!(pins.high_lines(), vec![20]);
    }

    #[test]
    fn events_map_to_states() {
        let (mut t, pins, ui) = tower(steady_config());
        assert!(matches!(
            t.notify_event("PrintStarted"),
            Some(Dispatch::Static { .. })
        ));
        assert_eq!(pins.high_lines(), vec![20]);
        assert_eq!(t.notify_event("ZChange"), None);
        assert_eq!(ui.labels(), vec!["green"]);
    }

    #[test]
    fn forwarded_events_reach_ui_first() {
        let config = Config {
            forward_events: true,
            ..steady_config()
        };
        let (mut t, _, ui) = tower(config);
        t.notify_event("PrintPaused");
        t.notify_event("ZChange");
        assert_eq!(
            ui.messages(),
            vec![
                UiMessage::Event {
                    event: "PrintPaused".into()
                },
                UiMessage::badge(BadgeKind::MachineState, "yellow"),
                UiMessage::Event {
                    event: "ZChange".into()
                },
            ]
        );
    }

    #[test]
    fn navbar_badge_shape() {
        let config = Config {
            badge: BadgeKind::NavbarStatus,
            ..steady_config()
        };
        let (mut t, _, ui) = tower(config);
        t.notify_state(PrinterState::Offline);
        assert_eq!(
            ui.messages(),
            vec![UiMessage::NavbarStatus {
                color: "red".into()
            }]
        );
    }

    #[test]
    fn unassigned_binding_still_announces() {
        let mut config = steady_config();
        config.pins.blue = PinAssignment::Unassigned;
        let (mut t, pins, ui) = tower(config);
        t.notify_state(PrinterState::Operational);
        assert!(pins.high_lines().is_empty());
        assert_eq!(ui.labels(), vec!["blue"]);
    }

    #[test]
    fn broadcast_failure_does_not_block_output() {
        let (mut t, pins, ui) = tower(steady_config());
        ui.set_failing(true);
        t.notify_state(PrinterState::Printing);
        assert_eq!(pins.high_lines(), vec![20]);
    }

    #[test]
    fn strobe_starts_for_blink_state_and_stops_on_change() {
        let config = Config {
            delay_on_ms: 20,
            delay_off_ms: 20,
            ..Config::default()
        };
        let (mut t, pins, ui) = tower(config);
        let d = t.notify_state(PrinterState::Printing);
        assert!(matches!(d, Dispatch::Strobe { .. }));
        assert_eq!(t.strobe_state(), StrobeState::Running);
        assert_eq!(t.strobe().active_line(), Some(20));
        std::thread::sleep(Duration::from_millis(100));

        t.notify_state(PrinterState::Offline);
        assert_eq!(t.strobe_state(), StrobeState::Stopped);
        assert_eq!(pins.high_lines(), vec![19]);
        let labels = ui.labels();
        assert!(labels.iter().any(|l| l == "green"));
        assert_eq!(labels.last().map(String::as_str), Some("red"));
    }

    #[test]
    fn shutdown_leaves_everything_low_and_released() {
        let (mut t, pins, _) = tower(Config::default());
        t.notify_state(PrinterState::Paused);
        t.shutdown();
        assert_eq!(t.strobe_state(), StrobeState::Stopped);
        assert!(t.driver().lines().is_empty());
        assert!(pins.state().configured.is_empty());
        // Second shutdown is a no-op.
        t.shutdown();
    }

    #[test]
    fn drop_shuts_down() {
        let (t, pins, _) = tower(Config::default());
        drop(t);
        assert!(pins.state().configured.is_empty());
    }

    #[test]
    fn custom_mapper_is_used() {
        let pins = MockPins::new();
        let ui = RecordingBroadcaster::new();
        let mapper = StateMapper::new(
            vec![(
                PrinterState::from_host("Error"),
                Binding::new(PinAssignment::Line(4), "red"),
            )],
            blink_set([]),
        )
        .unwrap();
        let mut t = TowerLight::with_mapper(
            pins.clone(),
            Config::default(),
            mapper,
            Arc::new(ui.clone()),
        );
        t.startup();
        t.notify_state(PrinterState::from_host("Error"));
        assert_eq!(pins.high_lines(), vec![4]);
        assert_eq!(ui.labels(), vec!["red"]);
    }
}
