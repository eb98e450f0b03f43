//! Keyshare server user persistence and PIN checking.
//!
//! The keyshare server holds a share of each user's secret key and
//! participates in PIN-authenticated proofs. This module defines the
//! persistence interface for its user records and the PIN check flow
//! built on the rate limiting of [`pin`]. The cryptographic packet a
//! user record carries is sealed and unsealed by the keyshare core and
//! stays opaque here.

pub mod pin;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::keyshare::pin::{PinCheck, PinState};

/// Size in bytes of a sealed keyshare packet: a 24-byte nonce, 128 bytes
/// of ciphertext and a 16-byte authentication tag.
pub const SEALED_PACKET_SIZE: usize = 168;

/// An authenticated-encrypted keyshare packet.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedPacket([u8; SEALED_PACKET_SIZE]);

impl SealedPacket {
    /// Wraps raw packet bytes, which must be exactly
    /// [`SEALED_PACKET_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data: [u8; SEALED_PACKET_SIZE] = bytes.try_into().map_err(|_| Error::InvalidRecord)?;
        Ok(Self(data))
    }

    /// The raw packet bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for SealedPacket {
    fn default() -> Self {
        Self([0; SEALED_PACKET_SIZE])
    }
}

impl fmt::Debug for SealedPacket {
    // Key material stays out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealedPacket")
    }
}

/// Events recorded in a user's activity log. The strings are stable wire
/// values consumed by existing log processors; `PIN_CHECK_SUCCES` is
/// spelled the way those consumers expect it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEvent {
    /// A PIN check was refused because the account is rate limited.
    #[serde(rename = "PIN_CHECK_REFUSED")]
    PinCheckRefused,
    /// A PIN check succeeded.
    #[serde(rename = "PIN_CHECK_SUCCES")]
    PinCheckSucces,
    /// A PIN check failed with attempts left.
    #[serde(rename = "PIN_CHECK_FAILED")]
    PinCheckFailed,
    /// A PIN check failed and the account is now blocked.
    #[serde(rename = "PIN_CHECK_BLOCKED")]
    PinCheckBlocked,
    /// The user took part in a protocol session.
    #[serde(rename = "IRMA_SESSION")]
    IrmaSession,
}

impl LogEvent {
    /// The wire form of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PinCheckRefused => "PIN_CHECK_REFUSED",
            Self::PinCheckSucces => "PIN_CHECK_SUCCES",
            Self::PinCheckFailed => "PIN_CHECK_FAILED",
            Self::PinCheckBlocked => "PIN_CHECK_BLOCKED",
            Self::IrmaSession => "IRMA_SESSION",
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keyshare user record.
#[derive(Clone, Debug, Default)]
pub struct User {
    /// Store-assigned row id.
    pub id: i64,
    /// Unique username.
    pub username: String,
    /// Preferred display language.
    pub language: String,
    /// The user's sealed keyshare packet.
    pub coredata: SealedPacket,
    /// Unix timestamp of the user's last activity.
    pub last_seen: i64,
    /// PIN rate-limit fields.
    pub pin: PinState,
}

/// Data needed to create a user.
#[derive(Clone, Debug, Default)]
pub struct UserData {
    /// Unique username.
    pub username: String,
    /// Preferred display language.
    pub language: String,
    /// The user's sealed keyshare packet.
    pub coredata: SealedPacket,
}

/// Persistence interface for keyshare users.
///
/// Two variants exist: the in-memory [`MemoryStore`] for tests and
/// development, and relational implementations for production.
/// `reserve_pin_check` must be atomic: concurrent reservations on one
/// account may not lose counter increments. A relational implementation
/// executes it as a single conditional update returning the new counter
/// and block date, computing exactly what [`PinState::reserve`] computes.
pub trait UserStore: Send + Sync {
    /// Creates a user, failing with [`Error::UserAlreadyExists`] when the
    /// username is taken.
    fn new_user(&self, data: UserData) -> impl Future<Output = Result<User>> + Send;

    /// Looks up a user by username.
    fn user(&self, username: &str) -> impl Future<Output = Result<User>> + Send;

    /// Writes back a modified user record.
    fn update_user(&self, user: &User) -> impl Future<Output = Result<()>> + Send;

    /// Counts a PIN check attempt against the user's rate limit.
    fn reserve_pin_check(&self, user: &User) -> impl Future<Output = Result<PinCheck>> + Send;

    /// Resets the user's rate limit after a successful PIN check.
    fn clear_pin_check(&self, user: &User) -> impl Future<Output = Result<()>> + Send;

    /// Stamps the user's last activity.
    fn set_seen(&self, user: &User) -> impl Future<Output = Result<()>> + Send;

    /// Appends an event to the user's activity log.
    fn add_log(
        &self, user: &User, event: LogEvent, param: Option<serde_json::Value>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Stores an email verification token for the user.
    fn add_email_verification(
        &self, user: &User, email: &str, token: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Default)]
struct MemoryInner {
    users: HashMap<String, User>,
    next_id: i64,
}

/// In-memory user store for tests and development.
///
/// PIN checks are always allowed: rate limiting belongs to the persistent
/// store's atomic update, and tests of the back-off arithmetic target
/// [`PinState`] directly rather than this store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl UserStore for MemoryStore {
    async fn new_user(&self, data: UserData) -> Result<User> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.users.contains_key(&data.username) {
            return Err(Error::UserAlreadyExists);
        }
        inner.next_id += 1;
        let user = User {
            id: inner.next_id,
            username: data.username.clone(),
            language: data.language,
            coredata: data.coredata,
            last_seen: Utc::now().timestamp(),
            pin: PinState::default(),
        };
        inner.users.insert(data.username, user.clone());
        Ok(user)
    }

    async fn user(&self, username: &str) -> Result<User> {
        let inner = self.inner.lock().expect("lock poisoned");
        inner.users.get(username).cloned().ok_or(Error::UserNotFound)
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let Some(existing) = inner.users.get_mut(&user.username) else {
            return Err(Error::UserNotFound);
        };
        *existing = user.clone();
        Ok(())
    }

    async fn reserve_pin_check(&self, _user: &User) -> Result<PinCheck> {
        Ok(PinCheck { allowed: true, tries_remaining: 1, wait_seconds: 0 })
    }

    async fn clear_pin_check(&self, user: &User) -> Result<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let Some(existing) = inner.users.get_mut(&user.username) else {
            return Err(Error::UserNotFound);
        };
        existing.pin.clear();
        Ok(())
    }

    async fn set_seen(&self, user: &User) -> Result<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let Some(existing) = inner.users.get_mut(&user.username) else {
            return Err(Error::UserNotFound);
        };
        existing.last_seen = Utc::now().timestamp();
        Ok(())
    }

    async fn add_log(
        &self, _user: &User, _event: LogEvent, _param: Option<serde_json::Value>,
    ) -> Result<()> {
        Ok(())
    }

    async fn add_email_verification(&self, _user: &User, _email: &str, _token: &str) -> Result<()> {
        Ok(())
    }
}

/// Outcome of a PIN check, in the shape the keyshare protocol reports to
/// the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PinResult {
    /// The PIN was correct.
    Success,
    /// The PIN was wrong; attempts remain.
    Failure {
        /// Attempts left before the account blocks.
        #[serde(rename = "remainingAttempts")]
        tries_remaining: i64,
    },
    /// The account is blocked.
    Blocked {
        /// Seconds until the account accepts PIN checks again.
        #[serde(rename = "blockedDuration")]
        wait_seconds: i64,
    },
}

/// Runs a PIN check for `username` against the rate limit, recording the
/// outcome in the user's activity log.
///
/// `verify` receives the user record and decides whether the offered PIN
/// matches; unsealing the packet is the keyshare core's concern. A
/// refused or exhausted attempt reports the wait as a normal
/// [`PinResult::Blocked`] value, not an error.
#[instrument(level = "debug", skip(store, verify))]
pub async fn check_pin<S, F>(store: &S, username: &str, verify: F) -> Result<PinResult>
where
    S: UserStore,
    F: FnOnce(&User) -> bool,
{
    let user = store.user(username).await?;
    let check = store.reserve_pin_check(&user).await?;
    if !check.allowed {
        store.add_log(&user, LogEvent::PinCheckRefused, None).await?;
        return Ok(PinResult::Blocked { wait_seconds: check.wait_seconds });
    }

    store.set_seen(&user).await?;
    if verify(&user) {
        store.clear_pin_check(&user).await?;
        store.add_log(&user, LogEvent::PinCheckSucces, None).await?;
        return Ok(PinResult::Success);
    }

    store
        .add_log(&user, LogEvent::PinCheckFailed, Some(serde_json::json!(check.tries_remaining)))
        .await?;
    if check.tries_remaining == 0 {
        store
            .add_log(&user, LogEvent::PinCheckBlocked, Some(serde_json::json!(check.wait_seconds)))
            .await?;
        return Ok(PinResult::Blocked { wait_seconds: check.wait_seconds });
    }
    Ok(PinResult::Failure { tries_remaining: check.tries_remaining })
}
