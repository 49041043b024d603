//! Two-strike interrupt handling: the first Ctrl-C asks the pipeline to wind
//! down gracefully, a second within the grace window forces immediate exit.
//!
//! A small state machine with an injectable clock and exit function so the
//! timing is unit-testable without a real process exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Abstracts `Instant::now()` so tests can control elapsed time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    WindingDown,
}

struct Inner {
    state: State,
    first_strike_at: Option<Instant>,
}

/// The caller-facing result of [`InterruptHandler::wait_for_decision`]:
/// whether to keep going with partial work or abandon it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Abort,
}

/// Drives the two-strike interrupt protocol. The first signal flips a
/// [`CancellationToken`] so in-flight work can wind down; a second signal
/// within `grace_window` sets the `aborted` flag and calls the injected
/// `force_exit` function.
pub struct InterruptHandler {
    cancel: CancellationToken,
    grace_window: Duration,
    clock: Arc<dyn Clock>,
    force_exit: Arc<dyn Fn() + Send + Sync>,
    inner: Mutex<Inner>,
    aborted: AtomicBool,
    stopped: AtomicBool,
    stop_notify: Notify,
}

impl InterruptHandler {
    pub fn new(grace_window: Duration) -> Self {
        Self::with_clock_and_exit(grace_window, Arc::new(SystemClock), Arc::new(default_exit))
    }

    pub fn with_clock_and_exit(
        grace_window: Duration,
        clock: Arc<dyn Clock>,
        force_exit: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            cancel: CancellationToken::new(),
            grace_window,
            clock,
            force_exit,
            inner: Mutex::new(Inner { state: State::Idle, first_strike_at: None }),
            aborted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once any interrupt has been received (`idle` has been left).
    pub fn was_interrupted(&self) -> bool {
        self.inner.lock().expect("interrupt handler mutex poisoned").state != State::Idle
    }

    /// True once a second strike landed inside the grace window.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Called once per received interrupt signal.
    pub fn signal(&self) {
        let mut inner = self.inner.lock().expect("interrupt handler mutex poisoned");
        match inner.state {
            State::Idle => {
                info!("interrupt received, winding down gracefully (press again to force quit)");
                inner.state = State::WindingDown;
                inner.first_strike_at = Some(self.clock.now());
                self.cancel.cancel();
            }
            State::WindingDown => {
                let elapsed = inner
                    .first_strike_at
                    .map(|t| self.clock.now().duration_since(t))
                    .unwrap_or_default();
                if elapsed <= self.grace_window {
                    warn!(?elapsed, "second interrupt within grace window, forcing exit");
                    self.aborted.store(true, Ordering::SeqCst);
                    (self.force_exit)();
                } else {
                    info!(?elapsed, "second interrupt outside grace window, still winding down");
                    inner.first_strike_at = Some(self.clock.now());
                }
            }
        }
    }

    /// Blocks up to the remaining time in the grace window after the first
    /// strike, displaying `message` while it waits. Returns immediately:
    /// [`Decision::Abort`] if already aborted, [`Decision::Continue`] if
    /// never interrupted. Otherwise polls on a 100ms tick and returns
    /// [`Decision::Abort`] as soon as a second strike lands, or
    /// [`Decision::Continue`] once the window elapses.
    pub async fn wait_for_decision(&self, message: &str) -> Decision {
        if self.is_aborted() {
            return Decision::Abort;
        }

        let first_strike_at = {
            let inner = self.inner.lock().expect("interrupt handler mutex poisoned");
            if inner.state == State::Idle {
                return Decision::Continue;
            }
            inner.first_strike_at
        };

        let Some(first_strike_at) = first_strike_at else {
            return Decision::Continue;
        };

        info!("{}", message);
        let deadline = first_strike_at + self.grace_window;
        let poll_interval = Duration::from_millis(100);

        loop {
            if self.is_aborted() {
                return Decision::Abort;
            }
            let now = self.clock.now();
            if now >= deadline {
                return Decision::Continue;
            }
            tokio::time::sleep((deadline - now).min(poll_interval)).await;
        }
    }

    /// Spawns a task that listens for OS Ctrl-C and forwards each one to
    /// [`InterruptHandler::signal`], looping so a second Ctrl-C is observed
    /// even while the first is still winding down.
    pub fn spawn_signal_listener(self: &Arc<Self>) {
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            break;
                        }
                        handler.signal();
                    }
                    _ = handler.stop_notify.notified() => break,
                }
            }
        });
    }

    /// Detaches the signal listener spawned by [`Self::spawn_signal_listener`].
    /// Idempotent: calling it more than once after the first has no further
    /// effect.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stop_notify.notify_waiters();
        }
    }
}

fn default_exit() {
    std::process::exit(130);
}
