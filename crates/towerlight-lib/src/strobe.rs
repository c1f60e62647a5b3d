//! Strobe controller: one background thread blinking one output line.
//!
//! The loop drives its line HIGH, fires `on_rising`, waits the on-phase,
//! drives it LOW, fires `on_falling`, waits the off-phase, and repeats until
//! stopped. Waits sit on a `(Mutex<bool>, Condvar)` signal, so a stop request
//! is observed within one phase.
//!
//! A controller owns at most one task. [`StrobeController::start`] stops and
//! joins the previous task before spawning the next, so two strobes never
//! drive the tower at the same time.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::output::{self, Level};

/// Default on-phase (100 ms).
pub const DEFAULT_ON: Duration = Duration::from_millis(100);
/// Default off-phase (200 ms).
pub const DEFAULT_OFF: Duration = Duration::from_millis(200);
/// Consecutive write failures after which a task gives up.
pub const DEFAULT_MAX_FAILURES: u32 = 10;
/// How long `stop` waits for the task before logging and joining anyway.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of the controller's strobe slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrobeState {
    /// No task has ever been started.
    Idle,
    Running,
    /// Stop requested, task not yet out of its loop.
    Stopping,
    Stopped,
}

impl fmt::Display for StrobeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrobeState::Idle => write!(f, "idle"),
            StrobeState::Running => write!(f, "running"),
            StrobeState::Stopping => write!(f, "stopping"),
            StrobeState::Stopped => write!(f, "stopped"),
        }
    }
}

/// On/off duty cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrobeTiming {
    pub on: Duration,
    pub off: Duration,
}

impl StrobeTiming {
    pub fn from_millis(on_ms: u64, off_ms: u64) -> Self {
        Self {
            on: Duration::from_millis(on_ms),
            off: Duration::from_millis(off_ms),
        }
    }
}

impl Default for StrobeTiming {
    fn default() -> Self {
        Self {
            on: DEFAULT_ON,
            off: DEFAULT_OFF,
        }
    }
}

/// Callback fired on a strobe edge.
pub type EdgeHook = Box<dyn FnMut() -> crate::error::Result<()> + Send>;

/// Optional edge callbacks for a strobe task.
#[derive(Default)]
pub struct StrobeHooks {
    pub on_rising: Option<EdgeHook>,
    pub on_falling: Option<EdgeHook>,
}

impl StrobeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_rising(
        mut self,
        hook: impl FnMut() -> crate::error::Result<()> + Send + 'static,
    ) -> Self {
        self.on_rising = Some(Box::new(hook));
        self
    }

    pub fn on_falling(
        mut self,
        hook: impl FnMut() -> crate::error::Result<()> + Send + 'static,
    ) -> Self {
        self.on_falling = Some(Box::new(hook));
        self
    }
}

/// Why a strobe task left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Stop was requested.
    Stopped,
    /// The line kept rejecting writes.
    Failed { consecutive: u32 },
    /// The task panicked (a hook or backend bug).
    Panicked,
}

/// Summary returned when a task is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrobeExit {
    pub line: Option<u32>,
    /// Completed HIGH→LOW cycles.
    pub cycles: u64,
    pub reason: ExitReason,
}

fn line_name(line: Option<u32>) -> String {
    match line {
        Some(l) => l.to_string(),
        None => "unassigned".to_string(),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Shared task state ──

struct Shared {
    stop: Mutex<bool>,
    wake: Condvar,
    state: Mutex<StrobeState>,
}

impl Shared {
    fn new() -> Self {
        Self {
            stop: Mutex::new(false),
            wake: Condvar::new(),
            state: Mutex::new(StrobeState::Running),
        }
    }

    fn request_stop(&self) {
        *lock(&self.stop) = true;
        self.wake.notify_all();
        let mut state = lock(&self.state);
        if *state == StrobeState::Running {
            *state = StrobeState::Stopping;
        }
    }

    fn stop_requested(&self) -> bool {
        *lock(&self.stop)
    }

    /// Sleep for `dur` unless a stop arrives first. Returns `true` on stop.
    fn wait(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        let mut stop = lock(&self.stop);
        while !*stop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stop = match self.wake.wait_timeout(stop, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }

    fn state(&self) -> StrobeState {
        *lock(&self.state)
    }

    fn set_state(&self, state: StrobeState) {
        *lock(&self.state) = state;
    }
}

/// Marks the task dead on every exit path, panics included.
struct TaskGuard {
    alive: Arc<AtomicUsize>,
    shared: Arc<Shared>,
    done: mpsc::Sender<()>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.alive.fetch_sub(1, Ordering::SeqCst);
        self.shared.set_state(StrobeState::Stopped);
        let _ = self.done.send(());
    }
}

// ── Failure accounting ──

/// Consecutive-failure counter with rate-limited logging.
struct FailureLog {
    what: &'static str,
    line: Option<u32>,
    consecutive: u32,
}

impl FailureLog {
    fn new(what: &'static str, line: Option<u32>) -> Self {
        Self {
            what,
            line,
            consecutive: 0,
        }
    }

    /// Record one outcome; returns the current run of consecutive failures.
    fn observe<E: fmt::Display>(&mut self, result: std::result::Result<(), E>) -> u32 {
        match result {
            Ok(()) => {
                if self.consecutive > 0 {
                    log::info!(
                        "[strobe] {} on line {} recovered after {} failure(s)",
                        self.what,
                        line_name(self.line),
                        self.consecutive
                    );
                }
                self.consecutive = 0;
            }
            Err(e) => {
                self.consecutive += 1;
                if self.consecutive == 1 {
                    log::warn!(
                        "[strobe] {} failed on line {}: {e}",
                        self.what,
                        line_name(self.line)
                    );
                } else {
                    log::debug!(
                        "[strobe] {} failed on line {} ({} in a row): {e}",
                        self.what,
                        line_name(self.line),
                        self.consecutive
                    );
                }
            }
        }
        self.consecutive
    }
}

fn fire(hook: &mut Option<EdgeHook>, log: &mut FailureLog) {
    if let Some(hook) = hook.as_mut() {
        log.observe(hook());
    }
}

// ── Loop ──

fn run_strobe<W>(
    line: Option<u32>,
    timing: StrobeTiming,
    mut writer: W,
    mut hooks: StrobeHooks,
    shared: &Shared,
    max_failures: u32,
) -> StrobeExit
where
    W: FnMut(Level) -> output::Result<()>,
{
    let max_failures = max_failures.max(1);
    let mut writes = FailureLog::new("write", line);
    let mut hook_log = FailureLog::new("edge hook", line);
    let mut cycles = 0u64;
    let mut lit = false;

    let cycle = std::panic::catch_unwind(AssertUnwindSafe(|| loop {
        if shared.stop_requested() {
            break ExitReason::Stopped;
        }

        let n = writes.observe(writer(Level::High));
        if n >= max_failures {
            break ExitReason::Failed { consecutive: n };
        }
        lit = true;
        fire(&mut hooks.on_rising, &mut hook_log);
        if shared.wait(timing.on) {
            break ExitReason::Stopped;
        }

        let n = writes.observe(writer(Level::Low));
        if n >= max_failures {
            break ExitReason::Failed { consecutive: n };
        }
        lit = false;
        fire(&mut hooks.on_falling, &mut hook_log);
        cycles += 1;
        if shared.wait(timing.off) {
            break ExitReason::Stopped;
        }
    }));

    let reason = match cycle {
        Ok(reason) => reason,
        Err(payload) => {
            // The line must not stay lit behind a dead task.
            if let Err(e) = writer(Level::Low) {
                log::warn!("[strobe] could not leave line {} low: {e}", line_name(line));
            }
            log::error!("[strobe] task on line {} panicked", line_name(line));
            std::panic::resume_unwind(payload);
        }
    };

    if let Err(e) = writer(Level::Low) {
        log::warn!("[strobe] could not leave line {} low: {e}", line_name(line));
    }
    if lit {
        fire(&mut hooks.on_falling, &mut hook_log);
    }
    if let ExitReason::Failed { consecutive } = reason {
        log::error!(
            "[strobe] giving up on line {}: {consecutive} consecutive write failures",
            line_name(line)
        );
    }
    StrobeExit {
        line,
        cycles,
        reason,
    }
}

// ── Controller ──

struct StrobeTask {
    line: Option<u32>,
    shared: Arc<Shared>,
    done: mpsc::Receiver<()>,
    handle: JoinHandle<StrobeExit>,
}

/// Owner of the single strobe slot.
pub struct StrobeController {
    task: Option<StrobeTask>,
    last_state: StrobeState,
    last_exit: Option<StrobeExit>,
    max_failures: u32,
    stop_timeout: Duration,
    alive: Arc<AtomicUsize>,
}

impl Default for StrobeController {
    fn default() -> Self {
        Self::new()
    }
}

impl StrobeController {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_FAILURES, DEFAULT_STOP_TIMEOUT)
    }

    pub fn with_limits(max_failures: u32, stop_timeout: Duration) -> Self {
        Self {
            task: None,
            last_state: StrobeState::Idle,
            last_exit: None,
            max_failures,
            stop_timeout,
            alive: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Update failure threshold and stop timeout for future tasks.
    pub fn set_limits(&mut self, max_failures: u32, stop_timeout: Duration) {
        self.max_failures = max_failures;
        self.stop_timeout = stop_timeout;
    }

    /// Start blinking `line`, stopping any previous task first.
    ///
    /// `line` is only used for logs and thread naming; `writer` does the
    /// actual output.
    pub fn start<W>(
        &mut self,
        line: Option<u32>,
        timing: StrobeTiming,
        writer: W,
        hooks: StrobeHooks,
    ) -> crate::error::Result<()>
    where
        W: FnMut(Level) -> output::Result<()> + Send + 'static,
    {
        self.stop();

        let shared = Arc::new(Shared::new());
        let (done_tx, done_rx) = mpsc::channel();
        let guard = TaskGuard {
            alive: Arc::clone(&self.alive),
            shared: Arc::clone(&shared),
            done: done_tx,
        };
        let task_shared = Arc::clone(&shared);
        let max_failures = self.max_failures;

        // Counted before spawn so the count never lags a running loop.
        self.alive.fetch_add(1, Ordering::SeqCst);
        let spawned = std::thread::Builder::new()
            .name(format!("strobe-{}", line_name(line)))
            .spawn(move || {
                let _guard = guard;
                run_strobe(line, timing, writer, hooks, &task_shared, max_failures)
            });

        match spawned {
            Ok(handle) => {
                log::debug!(
                    "[strobe] started on line {} ({:?} on / {:?} off)",
                    line_name(line),
                    timing.on,
                    timing.off
                );
                self.task = Some(StrobeTask {
                    line,
                    shared,
                    done: done_rx,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                // The closure (and its guard) was dropped, which already undid the count.
                self.last_state = StrobeState::Stopped;
                Err(e.into())
            }
        }
    }

    /// Stop and reap the current task. Safe to call when nothing is running.
    pub fn stop(&mut self) -> Option<StrobeExit> {
        let task = self.task.take()?;
        task.shared.request_stop();

        if task.done.recv_timeout(self.stop_timeout).is_err() {
            log::warn!(
                "[strobe] task on line {} still running after {:?}, waiting for it",
                line_name(task.line),
                self.stop_timeout
            );
        }
        let exit = match task.handle.join() {
            Ok(exit) => exit,
            Err(_) => {
                log::error!("[strobe] task on line {} panicked", line_name(task.line));
                StrobeExit {
                    line: task.line,
                    cycles: 0,
                    reason: ExitReason::Panicked,
                }
            }
        };
        log::debug!(
            "[strobe] stopped on line {} after {} cycle(s)",
            line_name(exit.line),
            exit.cycles
        );
        self.last_state = StrobeState::Stopped;
        self.last_exit = Some(exit);
        Some(exit)
    }

    pub fn state(&self) -> StrobeState {
        match &self.task {
            Some(task) => task.shared.state(),
            None => self.last_state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == StrobeState::Running
    }

    /// Line of the task currently held (running or self-terminated, not yet reaped).
    pub fn active_line(&self) -> Option<u32> {
        self.task.as_ref().and_then(|t| t.line)
    }

    pub fn last_exit(&self) -> Option<StrobeExit> {
        self.last_exit
    }

    /// Strobe threads currently alive.
    pub fn alive_tasks(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    /// Shared handle to the alive-task counter, for instrumentation.
    pub fn alive_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.alive)
    }
}

impl Drop for StrobeController {
    fn drop(&mut self) {
        self.stop();
    }
}
