//! Session coordination between requestors and clients.
//!
//! A [`Coordinator`] drives multi-step issuance, disclosure and signing
//! sessions. Each session is addressed by two independent random tokens:
//! the requestor token, presented to the party that started the session,
//! and the client token, presented to the wallet. The coordinator owns a
//! [`store::SessionStore`] of live sessions and holds a shared handle to
//! the [`Configuration`] for public key lookups; the configuration never
//! references sessions back.

pub mod events;
pub mod request;
pub mod status;
pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::instrument;

use crate::configuration::Configuration;
use crate::core::gen;
use crate::descriptor::IssuerPublicKey;
use crate::error::{Error, Result};
use crate::identifier::{IssuerIdentifier, SchemeManagerIdentifier};
use crate::session::events::{Notifier, StatusEvent};
use crate::session::request::{Action, RequestorRequest, SessionRequest};
use crate::session::status::Status;
use crate::session::store::SessionStore;

/// An IRMA protocol version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    major: u8,
    minor: u8,
}

impl ProtocolVersion {
    /// Creates a protocol version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| part.parse::<u8>().ok();
        s.split_once('.')
            .and_then(|(major, minor)| Some(Self::new(parse(major)?, parse(minor)?)))
            .ok_or(Error::NoProtocolOverlap)
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Oldest protocol version this server speaks.
pub const MIN_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 4);
/// Newest protocol version this server speaks.
pub const MAX_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 7);

// First version carrying the conjunction-of-disjunctions-of-conjunctions
// attribute structure.
const CONDISCON_VERSION: ProtocolVersion = ProtocolVersion::new(2, 5);

// Intersects the client's advertised range with ours and picks the
// highest common version.
fn choose_protocol_version(min: ProtocolVersion, max: ProtocolVersion) -> Result<ProtocolVersion> {
    if min > MAX_PROTOCOL_VERSION || max < MIN_PROTOCOL_VERSION || min > max {
        return Err(Error::NoProtocolOverlap);
    }
    Ok(max.min(MAX_PROTOCOL_VERSION))
}

/// A keyshare server's contribution to a proof of knowledge. Produced and
/// consumed by the proof engine; the coordinator only collects these per
/// scheme manager and merges them into the session result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofP(pub serde_json::Value);

/// Outcome of a session, as reported to the requestor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionResult {
    /// Requestor token of the session.
    pub token: String,

    /// The action the session performed.
    #[serde(rename = "type")]
    pub action: Action,

    /// Current status of the session.
    pub status: Status,

    /// Error description, when the session failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Whether the session ran under a protocol version predating the
    /// condiscon attribute structure.
    #[serde(rename = "legacySession", default)]
    pub legacy_session: bool,

    /// Proof material submitted by the client, opaque to the coordinator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<serde_json::Value>,

    /// Keyshare server contributions merged into the proof, by scheme
    /// manager.
    #[serde(rename = "keyshareProofs", default, skip_serializing_if = "HashMap::is_empty")]
    pub keyshare_proofs: HashMap<SchemeManagerIdentifier, ProofP>,
}

/// Payload served to a client when it retrieves its session request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientSessionRequest {
    /// The protocol version negotiated for this session.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: ProtocolVersion,

    /// The session request.
    pub request: SessionRequest,
}

/// Proof material posted by a client to complete its session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientResponse {
    /// Proofs of knowledge for the session, opaque to the coordinator.
    #[serde(default)]
    pub proofs: serde_json::Value,

    /// Keyshare server contributions, one per scheme manager that
    /// requires a keyshare proof.
    #[serde(rename = "keyshareProofs", default)]
    pub keyshare_proofs: HashMap<SchemeManagerIdentifier, ProofP>,
}

// Last response served to the client, kept so network-level retries can
// be answered without repeating state transitions.
#[derive(Clone, Debug)]
struct ResponseCache {
    message: Vec<u8>,
    response: Vec<u8>,
    http_status: u16,
    session_status: Status,
}

/// Mutable state of a session, guarded by the session's own lock.
pub struct SessionData {
    /// Current status.
    pub status: Status,
    prev_status: Status,

    /// Protocol version negotiated with the client, once it connected.
    pub version: Option<ProtocolVersion>,

    /// Whether the negotiated version predates the condiscon attribute
    /// structure.
    pub legacy_compatible: bool,

    /// When the session last saw activity.
    pub last_active: DateTime<Utc>,

    /// Client timeout in seconds from the requestor request; 0 selects
    /// the server default.
    pub client_timeout: u64,

    request: RequestorRequest,
    cache: Option<ResponseCache>,
    keyshare_proofs: HashMap<SchemeManagerIdentifier, ProofP>,

    /// The in-progress session result.
    pub result: SessionResult,
}

impl SessionData {
    /// The requestor request this session was created from.
    #[must_use]
    pub fn request(&self) -> &RequestorRequest {
        &self.request
    }

    /// Stamps the session as active now.
    pub fn mark_alive(&mut self) {
        self.last_active = Utc::now();
    }

    /// Moves the session to `next` if the transition is allowed.
    /// Transitions into a terminal status are one-shot: once finished,
    /// further writes are ignored.
    pub fn transition(&mut self, next: Status) {
        if !self.status.can_transition_to(next) {
            if self.status != next {
                tracing::warn!(from = %self.status, to = %next, "ignoring status transition");
            }
            return;
        }
        tracing::debug!(from = %self.status, to = %next, "session status changed");
        self.status = next;
        self.result.status = next;
    }

    fn cached_response(&self, message: &[u8]) -> Option<(Vec<u8>, u16)> {
        let cache = self.cache.as_ref()?;
        if cache.message == message && cache.session_status == self.status {
            return Some((cache.response.clone(), cache.http_status));
        }
        None
    }

    fn cache_response(&mut self, message: &[u8], response: Vec<u8>, http_status: u16) {
        self.cache = Some(ResponseCache {
            message: message.to_vec(),
            response,
            http_status,
            session_status: self.status,
        });
    }
}

/// A single protocol session.
pub struct Session {
    token: String,
    client_token: String,
    action: Action,
    data: Mutex<SessionData>,
}

impl Session {
    /// The requestor token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The client token.
    #[must_use]
    pub fn client_token(&self) -> &str {
        &self.client_token
    }

    /// The action this session performs.
    #[must_use]
    pub fn action(&self) -> Action {
        self.action
    }

    /// Locks the session's mutable state. The store lock, when needed,
    /// is always taken before this one.
    pub fn lock(&self) -> MutexGuard<'_, SessionData> {
        self.data.lock().expect("lock poisoned")
    }

    /// Name of the requestor-facing notification channel.
    #[must_use]
    pub fn requestor_channel(&self) -> String {
        format!("session/{}", self.token)
    }

    /// Name of the client-facing notification channel.
    #[must_use]
    pub fn client_channel(&self) -> String {
        format!("session/{}", self.client_token)
    }

    pub(crate) fn flush_status_event(&self, notifier: &Notifier) {
        let mut data = self.lock();
        if data.status == data.prev_status {
            return;
        }
        let event = StatusEvent { prev: data.prev_status, next: data.status };
        data.prev_status = data.status;
        drop(data);
        notifier.publish(&self.requestor_channel(), event);
        notifier.publish(&self.client_channel(), event);
    }
}

/// Drives issuance, disclosure and signing sessions.
pub struct Coordinator {
    configuration: Arc<Configuration>,
    sessions: SessionStore,
    augment_client_return_url: bool,
}

impl Coordinator {
    /// Creates a coordinator over a parsed configuration. When
    /// `augment_client_return_url` is set, return URLs of sessions that
    /// opt in are augmented with the requestor token.
    #[must_use]
    pub fn new(configuration: Arc<Configuration>, augment_client_return_url: bool) -> Self {
        Self { configuration, sessions: SessionStore::default(), augment_client_return_url }
    }

    /// The session store.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The configuration this coordinator verifies against.
    #[must_use]
    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    /// Looks up an issuer public key for proof verification. The issuer
    /// must be loaded; only the key itself may be absent.
    pub fn public_key(
        &self, issuer: &IssuerIdentifier, counter: u32,
    ) -> Result<Option<Arc<IssuerPublicKey>>> {
        if !self.configuration.issuers.contains_key(issuer) {
            return Err(Error::UnknownIssuer(issuer.to_string()));
        }
        self.configuration.public_key(issuer, counter)
    }

    /// Starts a new session for `request` and registers it in the store.
    ///
    /// Two independent random tokens are generated, the return URL is
    /// augmented when configured and opted in, and the request base
    /// receives its nonce and context.
    #[instrument(level = "debug", skip(self, request))]
    pub fn new_session(&self, mut request: RequestorRequest) -> Result<Arc<Session>> {
        self.validate_request(&request.request)?;

        let token = gen::session_token();
        let client_token = gen::session_token();
        let action = request.request.action();

        let base = request.request.base_mut();
        if self.augment_client_return_url && base.augment_return_url {
            if let Some(url) = &mut base.client_return_url {
                let separator = if url.contains('?') { '&' } else { '?' };
                let _ = write!(url, "{separator}token={token}");
            }
        }
        base.nonce = Some(gen::nonce());
        base.context = Some(1);

        let result = SessionResult {
            token: token.clone(),
            action,
            status: Status::Initialized,
            error: None,
            legacy_session: false,
            proof: None,
            keyshare_proofs: HashMap::new(),
        };
        let session = Arc::new(Session {
            token: token.clone(),
            client_token,
            action,
            data: Mutex::new(SessionData {
                status: Status::Initialized,
                prev_status: Status::Initialized,
                version: None,
                legacy_compatible: false,
                last_active: Utc::now(),
                client_timeout: request.client_timeout,
                request,
                cache: None,
                keyshare_proofs: HashMap::new(),
                result,
            }),
        });

        tracing::debug!(session = token.as_str(), %action, "new session started");
        self.sessions.add(Arc::clone(&session));
        Ok(session)
    }

    // Every credential type a request references must be resolvable.
    fn validate_request(&self, request: &SessionRequest) -> Result<()> {
        for discon in request.disclose() {
            for con in discon {
                for attr in con {
                    if !self.configuration.contains(&attr.credential_type) {
                        return Err(Error::UnknownCredential(attr.credential_type.to_string()));
                    }
                }
            }
        }
        if let SessionRequest::Issuance(issuance) = request {
            for cred in &issuance.credentials {
                if !self.configuration.contains(&cred.credential_type) {
                    return Err(Error::UnknownCredential(cred.credential_type.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Serves the session request to the client, negotiating the protocol
    /// version and moving the session to [`Status::Connected`]. A
    /// network-level retry of the identical fetch is answered from the
    /// replay cache without repeating the transition.
    #[instrument(level = "debug", skip(self))]
    pub fn request_for_client(
        &self, client_token: &str, min: ProtocolVersion, max: ProtocolVersion,
    ) -> Result<Vec<u8>> {
        let session = self.sessions.client_get(client_token).ok_or(Error::SessionExpired)?;
        let message = format!("{min} {max}").into_bytes();

        let mut data = session.lock();
        if let Some((response, _)) = data.cached_response(&message) {
            return Ok(response);
        }
        if data.status != Status::Initialized {
            return Err(Error::InvalidSessionState(data.status));
        }

        let version = choose_protocol_version(min, max)?;
        data.version = Some(version);
        data.legacy_compatible = version < CONDISCON_VERSION;
        data.result.legacy_session = data.legacy_compatible;

        let payload = ClientSessionRequest {
            protocol_version: version,
            request: data.request.request.clone(),
        };
        let response = serde_json::to_vec(&payload)?;

        data.mark_alive();
        data.transition(Status::Connected);
        data.cache_response(&message, response.clone(), 200);
        drop(data);

        self.sessions.update(&session);
        Ok(response)
    }

    /// Accepts the client's proof material and completes the session.
    ///
    /// Keyshare contributions in the response are merged into the
    /// session's collected proofs before the result is assembled. A
    /// retried identical post is answered from the replay cache.
    #[instrument(level = "debug", skip(self, message))]
    pub fn post_response(&self, client_token: &str, message: &[u8]) -> Result<(Vec<u8>, u16)> {
        let session = self.sessions.client_get(client_token).ok_or(Error::SessionExpired)?;

        let mut data = session.lock();
        if let Some(cached) = data.cached_response(message) {
            return Ok(cached);
        }
        if data.status != Status::Connected {
            return Err(Error::InvalidSessionState(data.status));
        }

        let response: ClientResponse = serde_json::from_slice(message)?;
        for (scheme, proof) in response.keyshare_proofs {
            data.keyshare_proofs.insert(scheme, proof);
        }
        data.result.proof = Some(response.proofs);
        data.result.keyshare_proofs = data.keyshare_proofs.clone();

        data.mark_alive();
        data.transition(Status::Done);

        let body = serde_json::to_vec(&data.result)?;
        data.cache_response(message, body.clone(), 200);
        let reply = (body, 200);
        drop(data);

        self.sessions.update(&session);
        Ok(reply)
    }

    /// Records a keyshare server's contribution for `scheme` on a running
    /// session.
    pub fn add_keyshare_proof(
        &self, client_token: &str, scheme: SchemeManagerIdentifier, proof: ProofP,
    ) -> Result<()> {
        let session = self.sessions.client_get(client_token).ok_or(Error::SessionExpired)?;
        let mut data = session.lock();
        if data.status != Status::Connected {
            return Err(Error::InvalidSessionState(data.status));
        }
        data.keyshare_proofs.insert(scheme, proof);
        data.mark_alive();
        Ok(())
    }

    /// Cancels a session on behalf of the requestor. Cancelling a
    /// finished session is a no-op.
    #[instrument(level = "debug", skip(self))]
    pub fn cancel(&self, token: &str) -> Result<()> {
        let session = self.sessions.get(token).ok_or(Error::SessionExpired)?;
        let mut data = session.lock();
        if data.status.is_finished() {
            return Ok(());
        }
        data.mark_alive();
        data.transition(Status::Cancelled);
        drop(data);
        self.sessions.update(&session);
        Ok(())
    }

    /// Current status of a session, by requestor token.
    pub fn status(&self, token: &str) -> Result<Status> {
        let session = self.sessions.get(token).ok_or(Error::SessionExpired)?;
        let status = session.lock().status;
        Ok(status)
    }

    /// Current status of a session, by client token.
    pub fn client_status(&self, client_token: &str) -> Result<Status> {
        let session = self.sessions.client_get(client_token).ok_or(Error::SessionExpired)?;
        let status = session.lock().status;
        Ok(status)
    }

    /// The session result, by requestor token.
    pub fn result(&self, token: &str) -> Result<SessionResult> {
        let session = self.sessions.get(token).ok_or(Error::SessionExpired)?;
        let result = session.lock().result.clone();
        Ok(result)
    }

    /// Subscribes to status changes of a session channel.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<StatusEvent> {
        self.sessions.subscribe(channel)
    }

    /// Closes every session notification channel.
    pub fn stop(&self) {
        self.sessions.stop();
    }
}
