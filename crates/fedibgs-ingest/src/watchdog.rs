//! Liveness watchdog for the Timeline Listener.
//!
//! The watchdog samples the listener's [`ActivitySignal`] on a fixed period.
//! Silence past the warning threshold logs a stall warning, repeated once per
//! threshold period; silence past the termination threshold ends the
//! ingestion process by returning a fatal stream error to the supervisor.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, warn};

use fedibgs_core::config::WatchdogConfig;
use fedibgs_core::error::FedibgsError;

use crate::activity::ActivitySignal;

/// What the watchdog decided for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    None,
    Warn { idle: Duration },
    Terminate { idle: Duration },
}

#[derive(Debug)]
pub struct Watchdog {
    warn_after: Duration,
    terminate_after: Duration,
    check_interval: Duration,
    /// Idle time at which the next warning fires.
    next_warn: Duration,
    terminated: bool,
}

impl Watchdog {
    pub fn new(config: &WatchdogConfig) -> Self {
        let warn_after = Duration::from_secs(config.warn_after_secs).max(Duration::from_millis(1));
        Self {
            warn_after,
            terminate_after: Duration::from_secs(config.terminate_after_secs),
            check_interval: Duration::from_millis(config.check_interval_ms.max(1)),
            next_warn: warn_after,
            terminated: false,
        }
    }

    /// Advance the state machine by one sample of the listener's idle time.
    ///
    /// Termination is reported at most once.
    pub fn observe(&mut self, idle: Duration) -> WatchdogAction {
        if self.terminated {
            return WatchdogAction::None;
        }
        if idle >= self.terminate_after {
            self.terminated = true;
            return WatchdogAction::Terminate { idle };
        }
        if idle < self.warn_after {
            self.next_warn = self.warn_after;
            return WatchdogAction::None;
        }
        if idle >= self.next_warn {
            let periods = idle.as_millis() / self.warn_after.as_millis() + 1;
            self.next_warn = Duration::from_millis((self.warn_after.as_millis() * periods) as u64);
            return WatchdogAction::Warn { idle };
        }
        WatchdogAction::None
    }

    /// Sample `activity` until the listener has been silent for the
    /// termination threshold, then return the fatal error that ends ingestion.
    pub async fn run(mut self, activity: Arc<ActivitySignal>) -> FedibgsError {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.observe(activity.idle()) {
                WatchdogAction::None => {}
                WatchdogAction::Warn { idle } => {
                    let snapshot = activity.snapshot();
                    warn!(
                        idle_secs = idle.as_secs(),
                        accepted = snapshot.accepted,
                        buffered = snapshot.buffered,
                        "No new records from timeline stream"
                    );
                }
                WatchdogAction::Terminate { idle } => {
                    error!(
                        idle_secs = idle.as_secs(),
                        "Timeline stream stalled, terminating ingestion"
                    );
                    return FedibgsError::FatalStream(format!(
                        "No activity for {}s",
                        idle.as_secs()
                    ));
                }
            }
        }
    }
}
