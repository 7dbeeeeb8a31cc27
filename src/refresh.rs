//! Refresh cooldown
//!
//! Gates how often the user may send refresh commands. `Cooldown` is a pure
//! state machine driven by `tick`; `CooldownTimer` is the scheduled callback
//! that produces those ticks on a tokio interval and is cancelled on drop.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// Length of the cooldown in ticks
pub const COOLDOWN_SECONDS: u32 = 10;

/// Interval between cooldown ticks
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Current state of the refresh gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CooldownState {
    /// Refresh allowed
    #[default]
    Idle,
    /// Refresh blocked for `remaining` more ticks
    Counting { remaining: u32 },
}

/// Countdown state machine: `Idle -> Counting(10) -> ... -> Counting(1) -> Idle`
#[derive(Debug, Clone, Default)]
pub struct Cooldown {
    state: CooldownState,
}

impl Cooldown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CooldownState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == CooldownState::Idle
    }

    /// Seconds left before refresh is allowed again; 0 when idle
    pub fn remaining_seconds(&self) -> u32 {
        match self.state {
            CooldownState::Idle => 0,
            CooldownState::Counting { remaining } => remaining,
        }
    }

    /// Starts the countdown
    ///
    /// Returns `true` when the gate was idle and the countdown started. While
    /// counting this is a no-op and returns `false`.
    pub fn trigger(&mut self) -> bool {
        match self.state {
            CooldownState::Idle => {
                self.state = CooldownState::Counting {
                    remaining: COOLDOWN_SECONDS,
                };
                true
            }
            CooldownState::Counting { .. } => false,
        }
    }

    /// Advances the countdown by one tick and returns the new state
    pub fn tick(&mut self) -> CooldownState {
        self.state = match self.state {
            CooldownState::Counting { remaining } if remaining > 1 => CooldownState::Counting {
                remaining: remaining - 1,
            },
            _ => CooldownState::Idle,
        };
        self.state
    }
}

/// Handle to a running tick task
///
/// Sends a copy of its message every period until cancelled. Cancelling is
/// idempotent, and dropping the handle cancels the task.
pub struct CooldownTimer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CooldownTimer {
    /// Spawns a task sending `message` to `sender` once per `period`
    ///
    /// The first message is sent one full period after the call.
    pub fn start<T>(period: Duration, sender: mpsc::UnboundedSender<T>, message: T) -> Self
    where
        T: Clone + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if sender.send(message.clone()).is_err() {
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    /// Stops the tick task. Safe to call repeatedly or after the task ended.
    pub fn cancel(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }

    /// Whether the tick task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CooldownTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
