// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Fixed one-second read budget. The budget resets in full at each window
/// boundary, so up to twice the limit can be read around a reset.
#[derive(Debug)]
pub(crate) struct RateWindow {
    max_per_window: u64,
    window_start: Instant,
    used: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Allowance {
    Bytes(u64),
    WaitFor(Duration),
}

impl RateWindow {
    /// A limit of 0 means unlimited.
    pub(crate) fn new(max_per_window: u64, now: Instant) -> Self {
        Self {
            max_per_window,
            window_start: now,
            used: 0,
        }
    }

    pub(crate) fn allowance(&mut self, now: Instant) -> Allowance {
        if self.max_per_window == 0 {
            return Allowance::Bytes(u64::MAX);
        }

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= WINDOW {
            self.window_start = now;
            self.used = 0;
        }

        if self.used >= self.max_per_window {
            return Allowance::WaitFor(WINDOW.saturating_sub(elapsed.min(WINDOW)));
        }
        Allowance::Bytes(self.max_per_window - self.used)
    }

    pub(crate) fn consume(&mut self, n: u64) {
        self.used = self.used.saturating_add(n);
    }
}
