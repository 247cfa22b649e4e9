//! Bounded fixed-interval polling.
//!
//! The viewer offers no "page changed" notification, so every wait in the
//! crate is a poll: check a condition, sleep `interval`, repeat until the
//! condition holds or `ceiling` has elapsed. [`Poller`] owns the clock for one
//! such wait; the condition itself stays at the call site so it can borrow the
//! viewer mutably between ticks.
//!
//! ```rust
//! use scan_harvest::poll::{PollSettings, Poller};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let settings = PollSettings::new(Duration::from_millis(1), Duration::from_millis(20));
//! let mut poller = Poller::new(settings, None);
//! let mut checks = 0;
//! loop {
//!     checks += 1;
//!     if checks == 3 {
//!         break;
//!     }
//!     if !poller.tick().await {
//!         panic!("condition never held");
//!     }
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interval and ceiling for one bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Sleep between two checks. Default: 10 ms.
    pub interval: Duration,
    /// Wall-clock budget for the whole wait. Default: 5 s.
    pub ceiling: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            ceiling: Duration::from_secs(5),
        }
    }
}

impl PollSettings {
    pub fn new(interval: Duration, ceiling: Duration) -> Self {
        Self { interval, ceiling }
    }

    /// Ceiling in milliseconds, for error messages.
    pub fn ceiling_ms(&self) -> u64 {
        self.ceiling.as_millis() as u64
    }
}

/// Why a wait ended without its condition holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEnd {
    Expired,
    Cancelled,
}

/// Clock for a single bounded wait.
#[derive(Debug)]
pub struct Poller {
    settings: PollSettings,
    deadline: Instant,
    cancel: Option<CancellationToken>,
    ended: Option<PollEnd>,
}

impl Poller {
    /// Start the clock now.
    pub fn new(settings: PollSettings, cancel: Option<CancellationToken>) -> Self {
        Self {
            settings,
            deadline: Instant::now() + settings.ceiling,
            cancel,
            ended: None,
        }
    }

    /// Sleep one interval.
    ///
    /// Returns `false` once the ceiling has passed or the token was
    /// cancelled; the caller should then give up. [`Poller::ended`] tells
    /// which of the two happened.
    pub async fn tick(&mut self) -> bool {
        if self.ended.is_some() {
            return false;
        }
        if self.is_cancelled() {
            self.ended = Some(PollEnd::Cancelled);
            return false;
        }
        let now = Instant::now();
        if now >= self.deadline {
            self.ended = Some(PollEnd::Expired);
            return false;
        }
        let wake = (now + self.settings.interval).min(self.deadline);
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(wake) => {}
                    _ = token.cancelled() => {
                        self.ended = Some(PollEnd::Cancelled);
                        return false;
                    }
                }
            }
            None => tokio::time::sleep_until(wake).await,
        }
        true
    }

    /// How the wait ended, if it has.
    pub fn ended(&self) -> Option<PollEnd> {
        self.ended
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }
}
