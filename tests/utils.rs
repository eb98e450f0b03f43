#![allow(missing_docs, dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Once;

use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::{EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

pub fn init_tracer() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub const SCHEME_DESCRIPTION: &str = r#"<SchemeManager version="7">
  <Id>irma-demo</Id>
  <Url>https://example.com/irma-demo</Url>
  <Name><en>Demo</en><nl>Demo</nl></Name>
  <Description><en>Demo scheme</en><nl>Demoschema</nl></Description>
</SchemeManager>
"#;

pub const ISSUER_DESCRIPTION: &str = r#"<Issuer version="4">
  <ID>pbdf</ID>
  <SchemeManager>irma-demo</SchemeManager>
  <Name><en>Privacy by Design</en><nl>Privacy by Design</nl></Name>
  <ShortName><en>PBDF</en><nl>PBDF</nl></ShortName>
  <ContactEMail>info@example.com</ContactEMail>
</Issuer>
"#;

pub const SECOND_ISSUER_DESCRIPTION: &str = r#"<Issuer version="4">
  <ID>chipsoft</ID>
  <SchemeManager>irma-demo</SchemeManager>
  <Name><en>ChipSoft</en><nl>ChipSoft</nl></Name>
  <ShortName><en>ChipSoft</en><nl>ChipSoft</nl></ShortName>
</Issuer>
"#;

pub const EMAIL_CREDENTIAL: &str = r#"<CredentialType version="4">
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
</CredentialType>
"#;

pub const ADDRESS_CREDENTIAL: &str = r#"<CredentialType version="4">
  <ID>address</ID>
  <IssuerID>pbdf</IssuerID>
  <SchemeManager>irma-demo</SchemeManager>
  <Name><en>Address</en><nl>Adres</nl></Name>
  <Attributes>
    <Attribute id="street">
      <Name><en>Street</en><nl>Straat</nl></Name>
    </Attribute>
  </Attributes>
</CredentialType>
"#;

pub const PUBLIC_KEY_0: &str = r#"<IssuerPublicKey>
  <Counter>0</Counter>
  <ExpiryDate>2524608000</ExpiryDate>
  <Elements>
    <n>130690991458039</n>
    <Z>72568094</Z>
    <S>41925519</S>
  </Elements>
</IssuerPublicKey>
"#;

/// File set of a scheme with one issuer and nothing else.
pub fn minimal_scheme_files() -> Vec<(&'static str, &'static str)> {
    vec![("description.xml", SCHEME_DESCRIPTION), ("pbdf/description.xml", ISSUER_DESCRIPTION)]
}

/// File set of a scheme with one issuer, two credential types and one
/// issuer public key.
pub fn full_scheme_files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("description.xml", SCHEME_DESCRIPTION),
        ("pbdf/description.xml", ISSUER_DESCRIPTION),
        ("pbdf/PublicKeys/0.xml", PUBLIC_KEY_0),
        ("pbdf/Issues/email/description.xml", EMAIL_CREDENTIAL),
        ("pbdf/Issues/address/description.xml", ADDRESS_CREDENTIAL),
    ]
}

/// Writes scheme manager directories with an index signed by a held
/// ECDSA key, so tests can produce both valid and tampered trees.
pub struct SchemeWriter {
    key: SigningKey,
}

impl SchemeWriter {
    pub fn new() -> Self {
        Self { key: SigningKey::random(&mut OsRng) }
    }

    /// Renders an index over `files` as hash-path lines.
    pub fn index_for(&self, files: &[(&str, &str)]) -> String {
        files
            .iter()
            .map(|(rel, contents)| {
                format!("{} {rel}\n", hex::encode(Sha256::digest(contents.as_bytes())))
            })
            .collect()
    }

    /// Writes a complete scheme directory: `files`, plus a signed index
    /// covering them and the signing key's PEM.
    pub fn write_scheme(&self, root: &Path, scheme: &str, files: &[(&str, &str)]) {
        let dir = root.join(scheme);
        for (rel, contents) in files {
            let path = dir.join(rel);
            fs::create_dir_all(path.parent().expect("path has parent")).expect("dirs created");
            fs::write(path, contents).expect("file written");
        }

        self.write_index(root, scheme, files);
        let pem = self
            .key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("public key encodes");
        fs::write(dir.join("pk.pem"), pem).expect("pk.pem written");
    }

    /// Writes (or rewrites) the signed index of `scheme` to cover
    /// `files`.
    pub fn write_index(&self, root: &Path, scheme: &str, files: &[(&str, &str)]) {
        let dir = root.join(scheme);
        fs::create_dir_all(&dir).expect("dirs created");
        let index = self.index_for(files);
        fs::write(dir.join("index"), &index).expect("index written");
        fs::write(dir.join("index.sig"), self.sign(index.as_bytes())).expect("signature written");
    }

    /// DER signature over `bytes` with the writer's key.
    pub fn sign(&self, bytes: &[u8]) -> Vec<u8> {
        let signature: Signature = self.key.sign(bytes);
        signature.to_der().as_bytes().to_vec()
    }
}
