//! Crate-wide error types.
//!
//! Authenticity failures are never masked or retried: a hash or signature
//! mismatch always surfaces to the caller. The two render the same
//! user-facing message so that external observers cannot tell which check
//! rejected the data; the offending path or scheme is retained on the
//! variant for diagnostics.

use thiserror::Error;

use crate::session::status::Status;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the configuration store, session coordinator and
/// keyshare persistence layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Reading or writing configuration files failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A scheme manager index file could not be parsed.
    #[error("malformed scheme manager index: {0}")]
    MalformedIndex(String),

    /// A file was requested that the scheme manager index does not list.
    #[error("file {path} not present in scheme manager index")]
    NotInIndex {
        /// Scheme-relative path of the requested file.
        path: String,
    },

    /// A file's contents do not hash to the value recorded in the index.
    #[error("scheme manager data failed authentication")]
    HashMismatch {
        /// Scheme-relative path of the offending file.
        path: String,
    },

    /// The signature over a scheme manager index did not verify, or the
    /// key or signature material could not be parsed.
    #[error("scheme manager data failed authentication")]
    InvalidSignature {
        /// The scheme manager whose index was rejected.
        scheme: String,
    },

    /// An XML descriptor could not be parsed.
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// A descriptor declares a schema version older than the minimum this
    /// implementation supports.
    #[error("unsupported {kind} description version {found}")]
    UnsupportedSchemaVersion {
        /// Descriptor kind: scheme manager, issuer or credential type.
        kind: &'static str,
        /// The version the descriptor declares.
        found: u32,
    },

    /// An operation referenced a scheme manager that is not loaded.
    #[error("unknown scheme manager: {0}")]
    UnknownScheme(String),

    /// An operation referenced an issuer that is not loaded.
    #[error("unknown issuer: {0}")]
    UnknownIssuer(String),

    /// An operation referenced a credential type that is not loaded.
    #[error("unknown credential type: {0}")]
    UnknownCredential(String),

    /// An identifier string had empty segments, forbidden characters or
    /// the wrong number of segments.
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),

    /// Two credential types share a reverse hash. This is a fatal
    /// configuration error.
    #[error("duplicate reverse hash for credential type {0}")]
    DuplicateReverseHash(String),

    /// The client's advertised protocol versions do not overlap with the
    /// versions this server supports.
    #[error("no overlap in protocol version ranges")]
    NoProtocolOverlap,

    /// The session does not exist or has been swept away.
    #[error("session unknown or expired")]
    SessionExpired,

    /// The session is not in a status that permits the requested
    /// operation.
    #[error("session unexpectedly in status {0}")]
    InvalidSessionState(Status),

    /// No user with the given username exists.
    #[error("could not find specified user")]
    UserNotFound,

    /// A user with the given username already exists.
    #[error("cannot create user, username already taken")]
    UserAlreadyExists,

    /// A stored user record did not have the expected shape.
    #[error("invalid record in database")]
    InvalidRecord,

    /// PIN checking is blocked for this account. Rate-limit refusals are
    /// normally reported as a value, not an error; this kind exists for
    /// callers that cannot proceed at all while an account is blocked.
    #[error("account is blocked for {wait_seconds} more seconds")]
    PinBlocked {
        /// Seconds until the account accepts PIN checks again.
        wait_seconds: i64,
    },

    /// Fetching a remote configuration file failed.
    #[error("remote fetch failed: {0}")]
    Remote(anyhow::Error),

    /// A wire message could not be serialized or deserialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
