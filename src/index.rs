//! Signed scheme manager indexes and authenticated file reads.
//!
//! Authenticity of a scheme manager's files is rooted in a single signed
//! manifest, the `index`: a text file mapping every scheme-relative path
//! to the SHA-256 hash of its contents. The index itself is signed with
//! the scheme manager's ECDSA key (`pk.pem`, PKIX encoded), the signature
//! stored in DER form in `index.sig`. Individual file reads then only
//! need a hash comparison against the index.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// SHA-256 hash of a configuration file, as recorded in a scheme manager
/// index. Hex encoding is case-insensitive on read and lowercase on
/// write.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationFileHash([u8; 32]);

impl ConfigurationFileHash {
    /// Hashes `bytes`.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// The raw hash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ConfigurationFileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ConfigurationFileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigurationFileHash({self})")
    }
}

impl FromStr for ConfigurationFileHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|_| Error::MalformedIndex(format!("invalid hash {s:?}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::MalformedIndex(format!("hash {s:?} is not 32 bytes")))?;
        Ok(Self(bytes))
    }
}

/// The signed manifest of a scheme manager directory: scheme-relative
/// file paths mapped to the hash their contents must have.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemeManagerIndex(BTreeMap<String, ConfigurationFileHash>);

impl SchemeManagerIndex {
    /// The hash recorded for `path`, if any.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ConfigurationFileHash> {
        self.0.get(path)
    }

    /// Records `hash` for `path`.
    pub fn insert(&mut self, path: impl Into<String>, hash: ConfigurationFileHash) {
        self.0.insert(path.into(), hash);
    }

    /// Whether the index lists no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of files listed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for SchemeManagerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, hash) in &self.0 {
            writeln!(f, "{hash} {path}")?;
        }
        Ok(())
    }
}

impl FromStr for SchemeManagerIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut index = BTreeMap::new();
        for (number, line) in s.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let &[hash, path] = tokens.as_slice() else {
                return Err(Error::MalformedIndex(format!(
                    "line {} has {} parts instead of 2",
                    number + 1,
                    tokens.len()
                )));
            };
            index.insert(path.to_string(), hash.parse()?);
        }
        Ok(Self(index))
    }
}

/// Reads the file at scheme-relative `path` under `scheme_dir` and checks
/// its contents against the hash the index records for it.
pub fn read_authenticated(
    scheme_dir: &Path, index: &SchemeManagerIndex, path: &str,
) -> Result<Vec<u8>> {
    let Some(expected) = index.get(path) else {
        return Err(Error::NotInIndex { path: path.to_string() });
    };
    let bytes = fs::read(scheme_dir.join(path))?;
    if &ConfigurationFileHash::of(&bytes) != expected {
        return Err(Error::HashMismatch { path: path.to_string() });
    }
    Ok(bytes)
}

/// Verifies the ECDSA signature over the index of the scheme manager in
/// `scheme_dir`.
///
/// Reads `index`, `index.sig` and `pk.pem` from the directory, parses the
/// PKIX public key and the DER `SEQUENCE { r, s }` signature, and checks
/// the signature over the SHA-256 digest of the raw index bytes. Every
/// input is validated before the verifier runs, so malformed key or
/// signature material is an ordinary [`Error::InvalidSignature`].
pub fn verify_signature(scheme_dir: &Path, scheme: &str) -> Result<()> {
    let rejected = || Error::InvalidSignature { scheme: scheme.to_string() };

    for name in ["index", "index.sig", "pk.pem"] {
        if !scheme_dir.join(name).is_file() {
            tracing::debug!(scheme, file = name, "scheme manager trust material missing");
            return Err(rejected());
        }
    }

    let index = fs::read(scheme_dir.join("index"))?;
    let pem = fs::read_to_string(scheme_dir.join("pk.pem"))?;
    let der = fs::read(scheme_dir.join("index.sig"))?;

    let key = VerifyingKey::from_public_key_pem(&pem).map_err(|err| {
        tracing::debug!(scheme, "invalid scheme manager public key: {err}");
        rejected()
    })?;
    let signature = Signature::from_der(&der).map_err(|err| {
        tracing::debug!(scheme, "invalid index signature encoding: {err}");
        rejected()
    })?;

    key.verify(&index, &signature).map_err(|_| rejected())
}
