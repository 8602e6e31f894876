//! Call allowance for the arbitration tier
//!
//! Independent of any provider rate limit: a fixed number of calls per
//! fixed window, reset when the window rolls over.

use crate::clock::Clock;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
struct Window {
    started_at: i64,
    used: u32,
}

pub struct CallBudget {
    max_calls: u32,
    window_seconds: u64,
    clock: Arc<dyn Clock>,
    window: Mutex<Window>,
}

impl CallBudget {
    pub fn new(max_calls: u32, window_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now_epoch();
        Self {
            max_calls,
            window_seconds: window_seconds.max(1),
            clock,
            window: Mutex::new(Window {
                started_at,
                used: 0,
            }),
        }
    }

    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Take one call from the allowance; false when it is spent
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now_epoch();
        let mut window = self.window.lock();
        self.roll(&mut window, now);
        if window.used >= self.max_calls {
            return false;
        }
        window.used += 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        let now = self.clock.now_epoch();
        let mut window = self.window.lock();
        self.roll(&mut window, now);
        self.max_calls.saturating_sub(window.used)
    }

    /// Seconds until the current window rolls over
    pub fn resets_in(&self) -> u64 {
        let now = self.clock.now_epoch();
        let mut window = self.window.lock();
        self.roll(&mut window, now);
        let elapsed = u64::try_from(now.saturating_sub(window.started_at)).unwrap_or(0);
        self.window_seconds.saturating_sub(elapsed).max(1)
    }

    fn roll(&self, window: &mut Window, now: i64) {
        let elapsed = u64::try_from(now.saturating_sub(window.started_at)).unwrap_or(0);
        if elapsed >= self.window_seconds {
            // Align to window boundaries so resets_in stays honest after idle periods
            let windows = elapsed / self.window_seconds;
            let advance = windows.saturating_mul(self.window_seconds);
            window.started_at = window
                .started_at
                .saturating_add(i64::try_from(advance).unwrap_or(i64::MAX));
            window.used = 0;
        }
    }
}
