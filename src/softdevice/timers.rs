//! [`Scheduler`] on top of `embassy-time`.
//!
//! Timers live in a small table; the owning task awaits
//! [`EmbassyScheduler::next_expired`] next to its event channel and feeds
//! the returned token back into the controller as a timer event.

use core::future::pending;

use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;

use crate::ble::{Scheduler, TimerToken};

/// Concurrent timers per scheduler.
pub const MAX_TIMERS: usize = 4;

struct Slot {
    token: TimerToken,
    deadline: Instant,
    period: Option<Duration>,
}

pub struct EmbassyScheduler {
    slots: Vec<Slot, MAX_TIMERS>,
    last_token: u32,
}

impl EmbassyScheduler {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            last_token: 0,
        }
    }

    fn insert(&mut self, delay: Duration, period: Option<Duration>) -> TimerToken {
        self.last_token = self.last_token.wrapping_add(1);
        let token = TimerToken(self.last_token);

        if self.slots.is_full() {
            warn!("timers: table full, dropping {}", self.slots[0].token);
            self.slots.remove(0);
        }
        let _ = self.slots.push(Slot {
            token,
            deadline: Instant::now() + delay,
            period,
        });
        token
    }

    /// Wait for the earliest timer and return its token.  Repeating timers
    /// are re-armed, one-shots removed.  Pends forever while empty.
    pub async fn next_expired(&mut self) -> TimerToken {
        let Some(idx) = (0..self.slots.len()).min_by_key(|&i| self.slots[i].deadline) else {
            return pending().await;
        };

        Timer::at(self.slots[idx].deadline).await;

        let slot = &mut self.slots[idx];
        let token = slot.token;
        match slot.period {
            Some(period) => slot.deadline += period,
            None => {
                self.slots.swap_remove(idx);
            }
        }
        token
    }
}

impl Default for EmbassyScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for EmbassyScheduler {
    fn schedule_once(&mut self, delay: Duration) -> TimerToken {
        self.insert(delay, None)
    }

    fn schedule_repeating(&mut self, interval: Duration) -> TimerToken {
        self.insert(interval, Some(interval))
    }

    fn cancel(&mut self, token: TimerToken) {
        self.slots.retain(|s| s.token != token);
    }
}
