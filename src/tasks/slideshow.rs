//! Automatic-advance timing.
//!
//! Two timers: the periodic advance timer and a one-shot idle timer that
//! re-arms automatic advance after manual interaction. One timer cannot
//! express both: a user actively swiping must suppress the periodic fire
//! while the idle countdown restarts on every gesture.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::events::ControllerRequest;

#[derive(Debug)]
enum TimerCommand {
    Start,
    Stop,
    Pause,
    Resume,
    ManualTrigger,
    SetInterval(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Stopped,
    Auto,
    /// Auto-advance suppressed; idle timer counting down.
    ManualOverride,
}

/// Handle to the timer task. Cheap to clone; all methods are callable from
/// sync contexts.
#[derive(Clone)]
pub struct Slideshow {
    cmd_tx: mpsc::Sender<TimerCommand>,
    running: Arc<AtomicBool>,
    interval_ms: Arc<AtomicU64>,
}

impl Slideshow {
    /// Spawns the timer task on the current runtime and returns its handle.
    pub fn spawn(
        interval: Duration,
        idle_timeout: Duration,
        requests: mpsc::Sender<ControllerRequest>,
        cancel: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let running = Arc::new(AtomicBool::new(false));
        let interval_ms = Arc::new(AtomicU64::new(interval.as_millis() as u64));
        let task = tokio::spawn(run(
            interval,
            idle_timeout,
            requests,
            cmd_rx,
            Arc::clone(&running),
            Arc::clone(&interval_ms),
            cancel,
        ));
        (
            Self {
                cmd_tx,
                running,
                interval_ms,
            },
            task,
        )
    }

    /// Begins periodic automatic advance; idempotent while running.
    pub fn start(&self) {
        self.send(TimerCommand::Start);
    }

    /// Cancels both timers. Used when a video takes over the display.
    pub fn stop(&self) {
        self.send(TimerCommand::Stop);
    }

    /// Suppresses auto-advance; the idle timer will heal it.
    pub fn pause(&self) {
        self.send(TimerCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(TimerCommand::Resume);
    }

    /// Invoked on every user swipe: suppresses auto-advance and restarts the
    /// idle countdown.
    pub fn manual_trigger(&self) -> Result<(), Error> {
        if !self.is_running() {
            return Err(Error::InvalidState("slideshow is stopped"));
        }
        self.send(TimerCommand::ManualTrigger);
        Ok(())
    }

    /// Applies a new interval; reschedules immediately when in auto mode.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
        self.send(TimerCommand::SetInterval(interval));
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    /// True from `start` until `stop`, including manual override.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn send(&self, cmd: TimerCommand) {
        if let Err(err) = self.cmd_tx.try_send(cmd) {
            warn!("slideshow command dropped: {err}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    mut interval: Duration,
    idle_timeout: Duration,
    requests: mpsc::Sender<ControllerRequest>,
    mut cmd_rx: mpsc::Receiver<TimerCommand>,
    running: Arc<AtomicBool>,
    interval_ms: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut mode = Mode::Stopped;
    let far_future = || Instant::now() + Duration::from_secs(3600 * 24);
    let mut next_fire = far_future();
    let mut idle_deadline = far_future();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    TimerCommand::Start => {
                        if mode == Mode::Stopped {
                            mode = Mode::Auto;
                            next_fire = Instant::now() + interval;
                            debug!(?interval, "slideshow started");
                        }
                    }
                    TimerCommand::Stop => {
                        mode = Mode::Stopped;
                        next_fire = far_future();
                        idle_deadline = far_future();
                        debug!("slideshow stopped");
                    }
                    TimerCommand::Pause => {
                        if mode == Mode::Auto {
                            mode = Mode::ManualOverride;
                            idle_deadline = Instant::now() + idle_timeout;
                            debug!("slideshow paused");
                        }
                    }
                    TimerCommand::Resume => {
                        if mode == Mode::ManualOverride {
                            mode = Mode::Auto;
                            next_fire = Instant::now() + interval;
                            debug!("slideshow resumed");
                        }
                    }
                    TimerCommand::ManualTrigger => {
                        if mode != Mode::Stopped {
                            mode = Mode::ManualOverride;
                            idle_deadline = Instant::now() + idle_timeout;
                            debug!("manual trigger");
                        }
                    }
                    TimerCommand::SetInterval(new_interval) => {
                        interval = new_interval;
                        interval_ms.store(interval.as_millis() as u64, Ordering::SeqCst);
                        if mode == Mode::Auto {
                            next_fire = Instant::now() + interval;
                        }
                        debug!(?interval, "slideshow interval set");
                    }
                }
            }

            _ = sleep_until(next_fire), if mode == Mode::Auto => {
                debug!("auto advance");
                if requests.try_send(ControllerRequest::Advance).is_err() {
                    debug!("controller busy, advance tick dropped");
                }
                next_fire = Instant::now() + interval;
            }

            _ = sleep_until(idle_deadline), if mode == Mode::ManualOverride => {
                debug!("idle timeout elapsed, resuming auto advance");
                mode = Mode::Auto;
                idle_deadline = far_future();
                next_fire = Instant::now() + interval;
            }
        }

        running.store(mode != Mode::Stopped, Ordering::SeqCst);
    }
    running.store(false, Ordering::SeqCst);
}
