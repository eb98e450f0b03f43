//! Descriptions of scheme managers, issuers, credential types and issuer
//! public keys, as parsed from the XML descriptors a scheme manager
//! publishes.
//!
//! Every descriptor carries a `version` attribute; descriptions older
//! than the minimum supported version are rejected during parsing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifier::{CredentialTypeIdentifier, IssuerIdentifier, SchemeManagerIdentifier};
use crate::index::SchemeManagerIndex;

/// Minimum supported scheme manager description version.
pub const MIN_SCHEME_MANAGER_VERSION: u32 = 7;
/// Minimum supported issuer description version.
pub const MIN_ISSUER_VERSION: u32 = 4;
/// Minimum supported credential type description version.
pub const MIN_CREDENTIAL_TYPE_VERSION: u32 = 4;

/// Parses an XML descriptor.
pub(crate) fn from_xml<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::MalformedDescriptor("descriptor is not valid UTF-8".to_string()))?;
    quick_xml::de::from_str(text).map_err(|err| Error::MalformedDescriptor(err.to_string()))
}

/// A string in each of the supported display languages.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TranslatedString {
    /// English text.
    #[serde(default)]
    pub en: String,
    /// Dutch text.
    #[serde(default)]
    pub nl: String,
}

/// A scheme manager: the trust anchor publishing a signed directory of
/// issuers, credential types and issuer public keys.
///
/// The descriptor fields come from `description.xml`; the index and
/// public key PEM are populated when the scheme directory is parsed and
/// its signature has been verified.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SchemeManager {
    /// Description schema version.
    #[serde(rename = "@version")]
    pub xml_version: u32,

    /// Single-segment scheme manager name, matching its directory.
    #[serde(rename = "Id")]
    pub id: String,

    /// Base URL the scheme manager's files are served from.
    #[serde(rename = "Url", default)]
    pub url: String,

    /// Display name.
    #[serde(rename = "Name", default)]
    pub name: TranslatedString,

    /// Display description.
    #[serde(rename = "Description", default)]
    pub description: TranslatedString,

    /// Contact address of the scheme manager operator.
    #[serde(rename = "Contact", default)]
    pub contact: String,

    /// The verified file index of this scheme manager.
    #[serde(skip)]
    pub index: SchemeManagerIndex,

    /// PEM encoded ECDSA public key the index signature verifies under.
    #[serde(skip)]
    pub public_key_pem: String,
}

impl SchemeManager {
    /// The scheme manager's identifier.
    pub fn identifier(&self) -> Result<SchemeManagerIdentifier> {
        self.id.parse()
    }
}

/// An issuer within a scheme manager.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Issuer {
    /// Description schema version.
    #[serde(rename = "@version")]
    pub xml_version: u32,

    /// Single-segment issuer name, matching its directory.
    #[serde(rename = "ID")]
    pub id: String,

    /// The scheme manager this issuer belongs to.
    #[serde(rename = "SchemeManager")]
    pub scheme_manager: String,

    /// Display name.
    #[serde(rename = "Name", default)]
    pub name: TranslatedString,

    /// Abbreviated display name.
    #[serde(rename = "ShortName", default)]
    pub short_name: TranslatedString,

    #[serde(rename = "ContactEMail", default)]
    pub contact_email: String,

    #[serde(rename = "ContactAddress", default)]
    pub contact_address: String,
}

impl Issuer {
    /// The issuer's identifier.
    pub fn identifier(&self) -> Result<IssuerIdentifier> {
        format!("{}.{}", self.scheme_manager, self.id).parse()
    }
}

/// The schema of an issuable credential: an ordered set of attribute
/// types.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CredentialType {
    /// Description schema version.
    #[serde(rename = "@version")]
    pub xml_version: u32,

    /// Single-segment credential type name, matching its directory.
    #[serde(rename = "ID")]
    pub id: String,

    /// The issuer this credential type belongs to.
    #[serde(rename = "IssuerID")]
    pub issuer_id: String,

    /// The scheme manager this credential type belongs to.
    #[serde(rename = "SchemeManager")]
    pub scheme_manager: String,

    /// Display name.
    #[serde(rename = "Name", default)]
    pub name: TranslatedString,

    /// Abbreviated display name.
    #[serde(rename = "ShortName", default)]
    pub short_name: TranslatedString,

    /// Display description.
    #[serde(rename = "Description", default)]
    pub description: TranslatedString,

    /// Whether a wallet should hold at most one instance.
    #[serde(rename = "ShouldBeSingleton", default)]
    pub should_be_singleton: bool,

    #[serde(rename = "Attributes", default)]
    attributes: AttributeList,
}

impl CredentialType {
    /// The credential type's identifier.
    pub fn identifier(&self) -> Result<CredentialTypeIdentifier> {
        format!("{}.{}.{}", self.scheme_manager, self.issuer_id, self.id).parse()
    }

    /// The ordered attribute types of this credential.
    #[must_use]
    pub fn attribute_types(&self) -> &[AttributeType] {
        &self.attributes.attribute
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct AttributeList {
    #[serde(rename = "Attribute", default)]
    attribute: Vec<AttributeType>,
}

/// A single attribute within a credential type.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AttributeType {
    /// Attribute name, unique within the credential type.
    #[serde(rename = "@id")]
    pub id: String,

    /// Whether the attribute may be absent from issued credentials.
    #[serde(rename = "@optional", default)]
    pub optional: bool,

    /// Display name.
    #[serde(rename = "Name", default)]
    pub name: TranslatedString,

    /// Display description.
    #[serde(rename = "Description", default)]
    pub description: TranslatedString,
}

/// An issuer public key, loaded lazily from `PublicKeys/{counter}.xml`.
///
/// Only the loading surface of the proof engine's key format is modelled
/// here; the group elements stay opaque decimal strings for the engine to
/// interpret.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct IssuerPublicKey {
    /// Key counter; keys are rolled over by publishing a successor with a
    /// higher counter.
    #[serde(rename = "Counter")]
    pub counter: u32,

    /// Unix timestamp after which the key must not be used for issuance.
    #[serde(rename = "ExpiryDate", default)]
    pub expiry_date: i64,

    /// The group elements of the key.
    #[serde(rename = "Elements", default)]
    pub elements: KeyElements,

    /// The issuer this key belongs to, set when the key is loaded.
    #[serde(skip)]
    pub issuer: Option<IssuerIdentifier>,
}

/// Group elements of an issuer public key, as decimal strings.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct KeyElements {
    #[serde(rename = "n", default)]
    pub modulus: String,

    #[serde(rename = "Z", default)]
    pub z: String,

    #[serde(rename = "S", default)]
    pub s: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_manager_description() {
        let xml = r#"
            <SchemeManager version="7">
                <Id>irma-demo</Id>
                <Url>https://example.com/irma-demo</Url>
                <Name><en>Demo</en><nl>Demo</nl></Name>
                <Description><en>Demo scheme</en><nl>Demoschema</nl></Description>
            </SchemeManager>"#;

        let manager: SchemeManager = from_xml(xml.as_bytes()).expect("descriptor is valid");
        assert_eq!(manager.xml_version, 7);
        assert_eq!(manager.id, "irma-demo");
        assert_eq!(manager.name.en, "Demo");
        assert_eq!(manager.identifier().expect("id is valid").as_str(), "irma-demo");
    }

    #[test]
    fn parses_credential_type_with_attributes() {
        let xml = r#"
            <CredentialType version="4">
                <ID>email</ID>
                <IssuerID>pbdf</IssuerID>
                <SchemeManager>irma-demo</SchemeManager>
                <Name><en>Email address</en><nl>E-mailadres</nl></Name>
                <Attributes>
                    <Attribute id="email">
                        <Name><en>Email</en><nl>E-mail</nl></Name>
                    </Attribute>
                    <Attribute id="domain" optional="true">
                        <Name><en>Domain</en><nl>Domein</nl></Name>
                    </Attribute>
                </Attributes>
            </CredentialType>"#;

        let cred: CredentialType = from_xml(xml.as_bytes()).expect("descriptor is valid");
        assert_eq!(cred.identifier().expect("id is valid").as_str(), "irma-demo.pbdf.email");
        assert_eq!(cred.attribute_types().len(), 2);
        assert_eq!(cred.attribute_types()[0].id, "email");
        assert!(!cred.attribute_types()[0].optional);
        assert!(cred.attribute_types()[1].optional);
    }

    #[test]
    fn parses_issuer_public_key() {
        let xml = r#"
            <IssuerPublicKey>
                <Counter>2</Counter>
                <ExpiryDate>2524608000</ExpiryDate>
                <Elements>
                    <n>1234567</n>
                    <Z>89</Z>
                    <S>10</S>
                </Elements>
            </IssuerPublicKey>"#;

        let key: IssuerPublicKey = from_xml(xml.as_bytes()).expect("key is valid");
        assert_eq!(key.counter, 2);
        assert_eq!(key.elements.modulus, "1234567");
    }

    #[test]
    fn rejects_garbage() {
        assert!(from_xml::<SchemeManager>(b"not xml at all").is_err());
        assert!(from_xml::<SchemeManager>(&[0xff, 0xfe]).is_err());
    }
}
