//! Output driver: configure, set, reset and release the tower light lines.
//!
//! Every line is written independently: one broken lamp never prevents the
//! others from being set. Failures come back as a [`WriteReport`] so callers
//! decide how loudly to complain.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::output::{self, Level, OutputError, OutputPins, PinAssignment};

/// Outcome of a multi-line pass (configure / reset / release).
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Number of line operations attempted.
    pub attempted: usize,
    pub failures: Vec<OutputError>,
}

impl WriteReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, result: output::Result<()>) -> bool {
        self.attempted += 1;
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[gpio] {e}");
                self.failures.push(e);
                false
            }
        }
    }

    fn merge(&mut self, other: WriteReport) {
        self.attempted += other.attempted;
        self.failures.extend(other.failures);
    }
}

/// Owns the pin bank and the set of lines currently configured as outputs.
///
/// The bank sits behind `Arc<Mutex<_>>` so a strobe thread can write its one
/// line through a [`LineWriter`] while the driver stays with the caller.
pub struct OutputDriver<P> {
    pins: Arc<Mutex<P>>,
    lines: Vec<u32>,
}

fn lock<P>(pins: &Mutex<P>) -> MutexGuard<'_, P> {
    pins.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<P: OutputPins> OutputDriver<P> {
    pub fn new(pins: P) -> Self {
        Self {
            pins: Arc::new(Mutex::new(pins)),
            lines: Vec::new(),
        }
    }

    /// Backend name (e.g. "sysfs").
    pub fn label(&self) -> String {
        lock(&self.pins).label().to_string()
    }

    /// Lines successfully configured by the last [`configure`](Self::configure).
    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    pub fn is_configured(&self, line: u32) -> bool {
        self.lines.contains(&line)
    }

    /// Release stale lines, then set up each distinct assigned line as an output at LOW.
    ///
    /// Unassigned entries are skipped. A line that fails setup is logged and
    /// left out of the configured set; the remaining lines are still set up.
    pub fn configure(&mut self, assignments: &[PinAssignment]) -> WriteReport {
        let mut report = self.release();

        let mut wanted: Vec<u32> = Vec::new();
        for line in assignments.iter().filter_map(PinAssignment::line) {
            if !wanted.contains(&line) {
                wanted.push(line);
            }
        }

        let mut bank = lock(&self.pins);
        for line in wanted {
            if report.record(bank.setup(line, Level::Low)) {
                self.lines.push(line);
            }
        }
        drop(bank);

        if !self.lines.is_empty() {
            let names: Vec<String> = self.lines.iter().map(u32::to_string).collect();
            log::info!("[gpio] configured lines {}", names.join(", "));
        }
        report
    }

    /// Set one line. Unassigned and unconfigured lines are a no-op.
    pub fn set_level(&self, line: PinAssignment, level: Level) -> output::Result<()> {
        let Some(line) = line.line() else {
            return Ok(());
        };
        if !self.is_configured(line) {
            log::debug!("[gpio] line {line} not configured, ignoring {level}");
            return Ok(());
        }
        lock(&self.pins).write(line, level)
    }

    /// Drive every configured line LOW.
    pub fn reset_all(&self) -> WriteReport {
        let mut report = WriteReport::default();
        let mut bank = lock(&self.pins);
        for &line in &self.lines {
            report.record(bank.write(line, Level::Low));
        }
        report
    }

    /// Clean up every configured line and forget it.
    pub fn release(&mut self) -> WriteReport {
        let mut report = WriteReport::default();
        let mut bank = lock(&self.pins);
        for line in self.lines.drain(..) {
            report.record(bank.cleanup(line));
        }
        report
    }

    /// A `Send` writer bound to one line, sharing this driver's pin bank.
    ///
    /// Unassigned or unconfigured lines yield a writer that does nothing.
    pub fn line_writer(&self, line: PinAssignment) -> LineWriter<P> {
        let line = line.line().filter(|l| self.is_configured(*l));
        LineWriter {
            pins: Arc::clone(&self.pins),
            line,
        }
    }

    /// Reset and release, collecting both reports.
    pub fn shutdown(&mut self) -> WriteReport {
        let mut report = self.reset_all();
        report.merge(self.release());
        report
    }
}

/// Writes a single line through a shared pin bank.
pub struct LineWriter<P> {
    pins: Arc<Mutex<P>>,
    line: Option<u32>,
}

impl<P: OutputPins> LineWriter<P> {
    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn write(&mut self, level: Level) -> output::Result<()> {
        match self.line {
            Some(line) => lock(&self.pins).write(line, level),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::mock::MockPins;

    const R: PinAssignment = PinAssignment::Line(19);
    const Y: PinAssignment = PinAssignment::Line(16);
    const G: PinAssignment = PinAssignment::Line(20);

    fn configured(pins: &MockPins) -> OutputDriver<MockPins> {
        let mut driver = OutputDriver::new(pins.clone());
        assert!(driver.configure(&[R, Y, G]).is_ok());
        driver
    }

    #[test]
    fn configure_sets_all_lines_low() {
        let pins = MockPins::new();
        let driver = configured(&pins);
        assert_eq!(driver.lines(), &[19, 16, 20]);
        for line in [19, 16, 20] {
            assert!(pins.is_configured(line));
            assert_eq!(pins.level(line), Level::Low);
        }
    }

    #[test]
    fn configure_skips_unassigned_and_duplicates() {
        let pins = MockPins::new();
        let mut driver = OutputDriver::new(pins.clone());
        let report = driver.configure(&[R, PinAssignment::Unassigned, R, G]);
        assert!(report.is_ok());
        assert_eq!(report.attempted, 2);
        assert_eq!(driver.lines(), &[19, 20]);
    }

    #[test]
    fn configure_continues_past_failing_line() {
        let pins = MockPins::new();
        pins.fail_line(16);
        let mut driver = OutputDriver::new(pins.clone());
        let report = driver.configure(&[R, Y, G]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].line(), 16);
        assert_eq!(driver.lines(), &[19, 20]);
        assert!(pins.is_configured(20));
    }

    #[test]
    fn reconfigure_cleans_up_stale_lines() {
        let pins = MockPins::new();
        let mut driver = configured(&pins);
        driver.configure(&[G]);
        assert_eq!(driver.lines(), &[20]);
        assert!(!pins.is_configured(19));
        assert!(!pins.is_configured(16));
        assert_eq!(pins.state().cleanup_calls, vec![19, 16, 20]);
    }

    #[test]
    fn set_level_writes_line() {
        let pins = MockPins::new();
        let driver = configured(&pins);
        driver.set_level(G, Level::High).unwrap();
        assert_eq!(pins.high_lines(), vec![20]);
    }

    #[test]
    fn set_level_unassigned_is_noop() {
        let pins = MockPins::new();
        let driver = configured(&pins);
        pins.clear_history();
        driver
            .set_level(PinAssignment::Unassigned, Level::High)
            .unwrap();
        driver
            .set_level(PinAssignment::Line(5), Level::High)
            .unwrap();
        assert!(pins.history().is_empty());
    }

    #[test]
    fn set_level_reports_write_failure() {
        let pins = MockPins::new();
        let driver = configured(&pins);
        pins.fail_line(19);
        let err = driver.set_level(R, Level::High).unwrap_err();
        assert!(matches!(err, OutputError::WriteFailed { line: 19, .. }));
    }

    #[test]
    fn reset_all_drives_everything_low_despite_failure() {
        let pins = MockPins::new();
        let driver = configured(&pins);
        driver.set_level(R, Level::High).unwrap();
        driver.set_level(G, Level::High).unwrap();
        pins.fail_line(19);
        let report = driver.reset_all();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(pins.level(20), Level::Low);
    }

    #[test]
    fn release_forgets_lines() {
        let pins = MockPins::new();
        let mut driver = configured(&pins);
        driver.release();
        assert!(driver.lines().is_empty());
        assert!(pins.state().configured.is_empty());
        // Releasing twice is harmless.
        assert!(driver.release().is_ok());
    }

    #[test]
    fn line_writer_shares_bank() {
        let pins = MockPins::new();
        let driver = configured(&pins);
        let mut writer = driver.line_writer(Y);
        assert_eq!(writer.line(), Some(16));
        writer.write(Level::High).unwrap();
        assert_eq!(pins.level(16), Level::High);
    }

    #[test]
    fn line_writer_for_unconfigured_line_is_noop() {
        let pins = MockPins::new();
        let driver = configured(&pins);
        let mut writer = driver.line_writer(PinAssignment::Line(4));
        assert_eq!(writer.line(), None);
        assert!(writer.write(Level::High).is_ok());
        assert_eq!(pins.level(4), Level::Low);
    }

    #[test]
    fn shutdown_resets_then_releases() {
        let pins = MockPins::new();
        let mut driver = configured(&pins);
        driver.set_level(G, Level::High).unwrap();
        let report = driver.shutdown();
        assert!(report.is_ok());
        assert_eq!(report.attempted, 6);
        assert!(driver.lines().is_empty());
    }
}
