//! Identifiers of scheme managers, issuers and credential types.
//!
//! Identifiers are dotted hierarchical names: a scheme manager is
//! identified by a single segment such as `irma-demo`, an issuer by
//! `irma-demo.pbdf` and a credential type by `irma-demo.pbdf.email`. The
//! parent of an identifier drops the last segment. Identifiers are
//! immutable value types with structural equality and a hash-stable
//! string form; they serialize as plain strings.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::Error;

fn validate_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('/') && !segment.contains('.')
}

fn validate(s: &str, segments: usize) -> Result<(), Error> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != segments || !parts.iter().all(|p| validate_segment(p)) {
        return Err(Error::MalformedIdentifier(s.to_string()));
    }
    Ok(())
}

// Ordering is lexicographic over segments, not over the raw string: the
// separator must not take part in the comparison.
fn cmp_segments(a: &str, b: &str) -> Ordering {
    a.split('.').cmp(b.split('.'))
}

macro_rules! identifier_type {
    ($(#[$attr:meta])* $name:ident, $segments:expr) => {
        $(#[$attr])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            /// The last segment of the identifier.
            #[must_use]
            pub fn name(&self) -> &str {
                self.0.rsplit('.').next().unwrap_or(&self.0)
            }

            /// The identifier's dotted string form.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                validate(s, $segments)?;
                Ok(Self(s.to_string()))
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                cmp_segments(&self.0, &other.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

identifier_type!(
    /// Identifies a scheme manager: the trust anchor publishing issuers,
    /// credential types and issuer public keys.
    SchemeManagerIdentifier,
    1
);

identifier_type!(
    /// Identifies an issuer within a scheme manager.
    IssuerIdentifier,
    2
);

identifier_type!(
    /// Identifies a credential type within an issuer.
    CredentialTypeIdentifier,
    3
);

impl SchemeManagerIdentifier {
    /// The identifier of the issuer `name` under this scheme manager.
    pub fn issuer(&self, name: &str) -> Result<IssuerIdentifier, Error> {
        if !validate_segment(name) {
            return Err(Error::MalformedIdentifier(name.to_string()));
        }
        Ok(IssuerIdentifier(format!("{}.{name}", self.0)))
    }
}

impl IssuerIdentifier {
    /// The identifier of the scheme manager this issuer belongs to.
    #[must_use]
    pub fn scheme_manager(&self) -> SchemeManagerIdentifier {
        let (parent, _) = self.0.rsplit_once('.').unwrap_or((&self.0, ""));
        SchemeManagerIdentifier(parent.to_string())
    }

    /// The identifier of the credential type `name` under this issuer.
    pub fn credential_type(&self, name: &str) -> Result<CredentialTypeIdentifier, Error> {
        if !validate_segment(name) {
            return Err(Error::MalformedIdentifier(name.to_string()));
        }
        Ok(CredentialTypeIdentifier(format!("{}.{name}", self.0)))
    }
}

impl CredentialTypeIdentifier {
    /// The identifier of the issuer this credential type belongs to.
    #[must_use]
    pub fn issuer(&self) -> IssuerIdentifier {
        let (parent, _) = self.0.rsplit_once('.').unwrap_or((&self.0, ""));
        IssuerIdentifier(parent.to_string())
    }
}
