//! Session status values and the transitions between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a protocol session.
///
/// The normal progression is `Initialized → Connected → Done`. A session
/// in any non-terminal status may move to `Cancelled` or `Timeout`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// The session exists; the client has not yet retrieved the request.
    #[default]
    Initialized,
    /// The client has retrieved the request and is working on a response.
    Connected,
    /// The requestor or client aborted the session. Terminal.
    Cancelled,
    /// The session completed. Terminal.
    Done,
    /// The session expired before completing. Terminal.
    Timeout,
}

impl Status {
    /// Whether this is a terminal status.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Cancelled | Self::Done | Self::Timeout)
    }

    /// Whether a transition from `self` to `next` is allowed. Terminal
    /// statuses are absorbing, and a session cannot complete before the
    /// client has fetched the request, so `Initialized` never moves
    /// directly to `Done`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_finished() || self == next {
            return false;
        }
        match (self, next) {
            (Self::Initialized, Self::Done) => false,
            (Self::Initialized | Self::Connected, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialized => "INITIALIZED",
            Self::Connected => "CONNECTED",
            Self::Cancelled => "CANCELLED",
            Self::Done => "DONE",
            Self::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}
