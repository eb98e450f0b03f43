//! Status change notification channels.
//!
//! Every session owns two channels, `session/<requestor token>` and
//! `session/<client token>`. Subscribers on either receive each status
//! transition once, in transition order. Channels are closed when their
//! session is physically deleted.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::session::status::Status;

const CHANNEL_CAPACITY: usize = 16;

/// A status transition observed on a session channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusEvent {
    /// The status the session left.
    pub prev: Status,
    /// The status the session entered.
    pub next: Status,
}

/// Fan-out of session status changes over named channels.
#[derive(Debug, Default)]
pub struct Notifier {
    channels: Mutex<HashMap<String, broadcast::Sender<StatusEvent>>>,
}

impl Notifier {
    /// Subscribes to `channel`, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<StatusEvent> {
        self.channels
            .lock()
            .expect("lock poisoned")
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publishes `event` on `channel`. Channels without subscribers
    /// silently drop events.
    pub fn publish(&self, channel: &str, event: StatusEvent) {
        if let Some(sender) = self.channels.lock().expect("lock poisoned").get(channel) {
            let _ = sender.send(event);
        }
    }

    /// Closes `channel`, disconnecting its subscribers.
    pub fn close(&self, channel: &str) {
        self.channels.lock().expect("lock poisoned").remove(channel);
    }

    /// Closes every channel.
    pub fn close_all(&self) {
        self.channels.lock().expect("lock poisoned").clear();
    }
}
