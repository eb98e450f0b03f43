//! Session request types.
//!
//! A session performs one of three actions: disclosing attributes,
//! signing a message with attributes attached, or receiving newly issued
//! credentials. Each request variant carries a shared [`BaseRequest`]
//! with the protocol nonce, context and return-URL handling.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifier::CredentialTypeIdentifier;

/// The kind of protocol session being performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Attributes are disclosed to the requestor.
    Disclosing,
    /// A message is signed, with attributes attached to the signature.
    Signing,
    /// Credentials are issued to the client.
    Issuing,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disclosing => "disclosing",
            Self::Signing => "signing",
            Self::Issuing => "issuing",
        };
        f.write_str(s)
    }
}

/// Fields shared by all session request types.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseRequest {
    /// Base64 encoded nonce binding the client's proofs to this session.
    /// Set by the coordinator at session creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Protocol context, always 1. Set by the coordinator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<u64>,

    /// URL the client is sent to after the session completes.
    #[serde(rename = "clientReturnUrl", skip_serializing_if = "Option::is_none")]
    pub client_return_url: Option<String>,

    /// Whether the return URL may be augmented with the requestor token,
    /// if the server is configured to do so.
    #[serde(rename = "augmentReturnUrl", default)]
    pub augment_return_url: bool,
}

/// A request for a single attribute, optionally pinned to a value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeRequest {
    /// The credential type the attribute is taken from.
    #[serde(rename = "type")]
    pub credential_type: CredentialTypeIdentifier,

    /// Attribute name within the credential type; absent when any
    /// attribute of the credential satisfies the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,

    /// Required attribute value, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Requested attributes as a conjunction of disjunctions of
/// conjunctions: the client must satisfy every outer entry by picking
/// one of its alternatives, each of which demands a set of attributes.
pub type AttributeConDisCon = Vec<Vec<Vec<AttributeRequest>>>;

/// Request to disclose attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DisclosureRequest {
    #[serde(flatten)]
    pub base: BaseRequest,

    /// The attributes to disclose.
    #[serde(default)]
    pub disclose: AttributeConDisCon,
}

/// Request to create an attribute-based signature over a message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureRequest {
    #[serde(flatten)]
    pub base: BaseRequest,

    /// The message to sign.
    pub message: String,

    /// The attributes to attach to the signature.
    #[serde(default)]
    pub disclose: AttributeConDisCon,
}

/// A single credential to issue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredentialRequest {
    /// The credential type being issued.
    #[serde(rename = "credential")]
    pub credential_type: CredentialTypeIdentifier,

    /// Counter of the issuer public key to issue under; the newest key
    /// when absent.
    #[serde(rename = "keyCounter", skip_serializing_if = "Option::is_none")]
    pub key_counter: Option<u32>,

    /// Unix timestamp the credential expires at; a default validity when
    /// absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<i64>,

    /// Attribute values, keyed by attribute name.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Request to issue credentials, optionally disclosing attributes in the
/// same session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IssuanceRequest {
    #[serde(flatten)]
    pub base: BaseRequest,

    /// The credentials to issue.
    #[serde(default)]
    pub credentials: Vec<CredentialRequest>,

    /// Attributes to disclose before issuance, if any.
    #[serde(default)]
    pub disclose: AttributeConDisCon,
}

/// A session request, tagged by the action it performs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionRequest {
    /// Disclose attributes.
    Disclosure(DisclosureRequest),
    /// Sign a message.
    Signature(SignatureRequest),
    /// Issue credentials.
    Issuance(IssuanceRequest),
}

impl SessionRequest {
    /// The action this request performs.
    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            Self::Disclosure(_) => Action::Disclosing,
            Self::Signature(_) => Action::Signing,
            Self::Issuance(_) => Action::Issuing,
        }
    }

    /// The shared base of the request.
    #[must_use]
    pub fn base(&self) -> &BaseRequest {
        match self {
            Self::Disclosure(request) => &request.base,
            Self::Signature(request) => &request.base,
            Self::Issuance(request) => &request.base,
        }
    }

    /// Mutable access to the shared base of the request.
    pub fn base_mut(&mut self) -> &mut BaseRequest {
        match self {
            Self::Disclosure(request) => &mut request.base,
            Self::Signature(request) => &mut request.base,
            Self::Issuance(request) => &mut request.base,
        }
    }

    /// The attribute condiscon the request discloses, which may be empty.
    #[must_use]
    pub fn disclose(&self) -> &AttributeConDisCon {
        match self {
            Self::Disclosure(request) => &request.disclose,
            Self::Signature(request) => &request.disclose,
            Self::Issuance(request) => &request.disclose,
        }
    }
}

/// A session request together with requestor-level options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestorRequest {
    /// Seconds the client may take to retrieve the request before the
    /// session times out; 0 selects the server default.
    #[serde(rename = "clientTimeout", default)]
    pub client_timeout: u64,

    /// URL the requestor wants the session result delivered to.
    #[serde(rename = "callbackUrl", skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,

    /// The session request itself.
    pub request: SessionRequest,
}

impl RequestorRequest {
    /// Wraps a bare session request with default requestor options.
    #[must_use]
    pub fn from_request(request: SessionRequest) -> Self {
        Self { client_timeout: 0, callback_url: None, request }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn disclosure_request_round_trips() {
        let value = json!({
            "type": "disclosure",
            "disclose": [[[{ "type": "irma-demo.pbdf.email", "attribute": "email" }]]]
        });

        let request: SessionRequest = serde_json::from_value(value).expect("request is valid");
        assert_eq!(request.action(), Action::Disclosing);
        assert_eq!(request.disclose()[0][0][0].credential_type.as_str(), "irma-demo.pbdf.email");

        let text = serde_json::to_string(&request).expect("serializes");
        let back: SessionRequest = serde_json::from_str(&text).expect("deserializes");
        assert_eq!(back, request);
    }

    #[test]
    fn issuance_request_round_trips() {
        let value = json!({
            "type": "issuance",
            "credentials": [{
                "credential": "irma-demo.pbdf.email",
                "attributes": { "email": "user@example.com" }
            }]
        });

        let request: SessionRequest = serde_json::from_value(value).expect("request is valid");
        assert_eq!(request.action(), Action::Issuing);

        let SessionRequest::Issuance(issuance) = &request else {
            panic!("expected issuance request");
        };
        assert_eq!(issuance.credentials[0].attributes["email"], "user@example.com");
    }

    #[test]
    fn malformed_identifier_in_request_rejected() {
        let value = json!({
            "type": "disclosure",
            "disclose": [[[{ "type": "notdotted" }]]]
        });
        assert!(serde_json::from_value::<SessionRequest>(value).is_err());
    }
}
