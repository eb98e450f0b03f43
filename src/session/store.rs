//! In-memory store of active sessions.
//!
//! Sessions are tracked under both their requestor token and their client
//! token; one reader-writer lock guards the two maps, and each session
//! carries its own lock for its mutable state. Map access always takes
//! the store lock first, then the session lock, and neither is held
//! across blocking work.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};
use tokio::sync::broadcast;
use tracing::info;

use crate::session::events::{Notifier, StatusEvent};
use crate::session::status::Status;
use crate::session::Session;

/// Sessions past their client timeout fall back to this lifetime before
/// they are cancelled, and terminal sessions linger this long before they
/// are physically deleted.
pub const MAX_SESSION_LIFETIME_SECS: i64 = 5 * 60;

#[derive(Default)]
struct TokenMaps {
    requestor: HashMap<String, Arc<Session>>,
    client: HashMap<String, Arc<Session>>,
}

/// Tracks active sessions under their requestor and client tokens.
#[derive(Default)]
pub struct SessionStore {
    maps: RwLock<TokenMaps>,
    notifier: Notifier,
}

impl SessionStore {
    /// The session with the given requestor token, if present.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<Arc<Session>> {
        self.maps.read().expect("lock poisoned").requestor.get(token).cloned()
    }

    /// The session with the given client token, if present.
    #[must_use]
    pub fn client_get(&self, token: &str) -> Option<Arc<Session>> {
        self.maps.read().expect("lock poisoned").client.get(token).cloned()
    }

    /// Registers a session under both its tokens.
    pub fn add(&self, session: Arc<Session>) {
        let mut maps = self.maps.write().expect("lock poisoned");
        maps.requestor.insert(session.token().to_string(), Arc::clone(&session));
        maps.client.insert(session.client_token().to_string(), session);
    }

    /// Publishes a pending status change of `session`, if any, on both of
    /// its channels.
    pub fn update(&self, session: &Session) {
        session.flush_status_event(&self.notifier);
    }

    /// Subscribes to a session channel, `session/<token>`.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<StatusEvent> {
        self.notifier.subscribe(channel)
    }

    /// Sweeps expired sessions.
    ///
    /// Sessions past their timeout are moved to [`Status::Timeout`];
    /// sessions already in a terminal status are physically deleted and
    /// their channels closed. Candidates are collected under the read
    /// lock; deletion re-acquires the write lock.
    pub fn delete_expired(&self) {
        let now = Utc::now();
        let mut expired = Vec::new();
        {
            let maps = self.maps.read().expect("lock poisoned");
            for (token, session) in &maps.requestor {
                let mut data = session.lock();

                // Client timeouts are capped at a day; anything longer is
                // a misconfigured requestor.
                let timeout = if data.status == Status::Initialized && data.client_timeout > 0 {
                    Duration::seconds(i64::try_from(data.client_timeout.min(86_400)).unwrap_or(86_400))
                } else {
                    Duration::seconds(MAX_SESSION_LIFETIME_SECS)
                };

                if data.last_active + timeout < now {
                    if data.status.is_finished() {
                        info!(session = token.as_str(), "deleting session");
                        expired.push(token.clone());
                    } else {
                        info!(session = token.as_str(), "session expired");
                        data.mark_alive();
                        data.transition(Status::Timeout);
                        drop(data);
                        session.flush_status_event(&self.notifier);
                    }
                }
            }
        }

        let mut maps = self.maps.write().expect("lock poisoned");
        for token in expired {
            if let Some(session) = maps.requestor.remove(&token) {
                self.notifier.close(&session.requestor_channel());
                self.notifier.close(&session.client_channel());
                maps.client.remove(session.client_token());
            }
        }
    }

    /// Closes the notification channels of every session.
    pub fn stop(&self) {
        let maps = self.maps.read().expect("lock poisoned");
        for session in maps.requestor.values() {
            self.notifier.close(&session.requestor_channel());
            self.notifier.close(&session.client_channel());
        }
    }
}
