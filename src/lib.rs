//! Core infrastructure for the IRMA attribute-based credential protocol.
//!
//! IRMA lets users receive credentials — signed sets of attributes — from
//! issuers, and selectively disclose attributes from them to verifiers.
//! This library implements the non-cryptographic heart of that
//! infrastructure:
//!
//! * a **trust configuration store** ([`configuration`]) that mounts a
//!   directory of scheme managers, verifies an ECDSA-signed manifest per
//!   scheme, refuses any unauthenticated byte, and reconciles the local
//!   copy with remote updates;
//! * a **session coordinator** ([`session`]) that drives issuance,
//!   disclosure and signing sessions between a requestor, a client
//!   (wallet) and the server, with per-session state machines, expiry
//!   sweeps, idempotent response replay and status change notification;
//! * the **PIN rate limiting** ([`keyshare`]) a companion keyshare server
//!   enforces against its persisted user records.
//!
//! # Design
//!
//! External concerns stay external: HTTP transport and database access
//! are reached through provider traits ([`configuration::Remote`],
//! [`keyshare::UserStore`]) the embedding server implements, and the
//! zero-knowledge proof engine is consumed only through its key-loading
//! surface ([`descriptor::IssuerPublicKey`]).
//!
//! A typical server parses a configuration once, shares it, and hands it
//! to a coordinator:
//!
//! ```rust,ignore
//! let mut configuration = Configuration::new("irma_configuration")?;
//! configuration.parse_folder()?;
//!
//! let coordinator = Coordinator::new(Arc::new(configuration), false);
//! let session = coordinator.new_session(request)?;
//! ```

pub mod configuration;
mod core;
pub mod descriptor;
pub mod error;
pub mod identifier;
pub mod index;
pub mod keyshare;
pub mod session;

pub use error::{Error, Result};
