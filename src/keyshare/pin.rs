//! PIN attempt rate limiting with exponential back-off.
//!
//! Every PIN check first reserves an attempt against the user's persisted
//! rate-limit record. The first attempts are free; past the threshold the
//! block window doubles with each further attempt. A relational store
//! must perform the reservation as one atomic conditional update so that
//! concurrent checks on the same account never lose counter increments;
//! [`PinState::reserve`] is the reference for exactly what that statement
//! computes.

use serde::{Deserialize, Serialize};

/// PIN attempts a user gets before the back-off starts doubling.
pub const MAX_PIN_TRIES: i64 = 3;

/// Base back-off delay in seconds.
pub const BACKOFF_START: i64 = 30;

/// Persisted rate-limit fields of a user record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinState {
    /// Attempt counter; non-decreasing until cleared.
    pub counter: i64,
    /// Unix timestamp before which PIN checks are refused.
    pub block_date: i64,
}

/// Outcome of reserving a PIN check attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCheck {
    /// Whether the attempt may proceed.
    pub allowed: bool,
    /// Attempts left before the account blocks.
    pub tries_remaining: i64,
    /// Seconds until the account accepts attempts again.
    pub wait_seconds: i64,
}

impl PinState {
    /// Reserves a PIN check attempt at `now` (Unix seconds).
    ///
    /// A blocked record refuses the attempt and reports the remaining
    /// wait. Otherwise the counter is incremented and the block date
    /// recomputed. The new block date is anchored one second and one base
    /// delay before the deadline, so the free attempts land just in the
    /// past; the exponent reads the counter before the increment, as the
    /// equivalent single UPDATE statement does.
    pub fn reserve(&mut self, now: i64) -> PinCheck {
        if self.block_date > now {
            return PinCheck {
                allowed: false,
                tries_remaining: 0,
                wait_seconds: self.block_date - now,
            };
        }

        let exponent = (self.counter - (MAX_PIN_TRIES - 2)).max(0);
        let factor = 1_i64 << exponent.min(30);
        self.block_date = now - 1 - BACKOFF_START + BACKOFF_START * factor;
        self.counter += 1;

        PinCheck {
            allowed: true,
            tries_remaining: (MAX_PIN_TRIES - self.counter).max(0),
            wait_seconds: self.block_date - now,
        }
    }

    /// Clears the rate limit after a successful PIN check.
    pub fn clear(&mut self) {
        self.counter = 0;
        self.block_date = 0;
    }
}
