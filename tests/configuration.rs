//! Tests for parsing, authenticating and refreshing the trust
//! configuration.

mod utils;

use std::collections::HashMap;
use std::fs;

use irma::configuration::{Configuration, IdentifierSet, Remote};
use irma::error::Error;
use irma::identifier::{CredentialTypeIdentifier, IssuerIdentifier, SchemeManagerIdentifier};
use sha2::{Digest, Sha256};
use utils::SchemeWriter;

#[test]
fn happy_parse() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::minimal_scheme_files());

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    conf.parse_folder().expect("folder parses");

    assert!(conf.is_initialized());
    assert_eq!(conf.scheme_managers.len(), 1);
    assert_eq!(conf.issuers.len(), 1);
    assert_eq!(conf.credential_types.len(), 0);

    let scheme: SchemeManagerIdentifier = "irma-demo".parse().expect("identifier is valid");
    let manager = &conf.scheme_managers[&scheme];
    assert_eq!(manager.url, "https://example.com/irma-demo");
    assert_eq!(manager.name.en, "Demo");
    assert!(!manager.index.is_empty());
    assert!(manager.public_key_pem.contains("BEGIN PUBLIC KEY"));
}

#[test]
fn full_tree_parse_and_lookups() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::full_scheme_files());

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    conf.parse_folder().expect("folder parses");

    let email: CredentialTypeIdentifier =
        "irma-demo.pbdf.email".parse().expect("identifier is valid");
    let address: CredentialTypeIdentifier =
        "irma-demo.pbdf.address".parse().expect("identifier is valid");
    assert!(conf.contains(&email));
    assert!(conf.contains(&address));

    let cred = &conf.credential_types[&email];
    assert_eq!(cred.attribute_types().len(), 2);
    assert_eq!(cred.attribute_types()[0].id, "email");
}

#[test]
fn reverse_hashes_recover_credential_types() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::full_scheme_files());

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    conf.parse_folder().expect("folder parses");

    let hash = Sha256::digest(b"irma-demo.pbdf.email");
    let cred = conf.credential_type_for_hash(&hash[..16]).expect("credential type recovered");
    assert_eq!(cred.id, "email");

    assert!(conf.credential_type_for_hash(&[0u8; 16]).is_none());
}

#[test]
fn public_keys_load_lazily_and_skip_non_numeric_stems() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::full_scheme_files());

    // A stray file with a non-numeric stem must be ignored without being
    // authenticated; it is deliberately absent from the index.
    fs::write(root.path().join("irma-demo/pbdf/PublicKeys/backup.xml"), "junk")
        .expect("file written");

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    conf.parse_folder().expect("folder parses");

    let issuer: IssuerIdentifier = "irma-demo.pbdf".parse().expect("identifier is valid");
    let key = conf.public_key(&issuer, 0).expect("keys scan").expect("key 0 exists");
    assert_eq!(key.counter, 0);
    assert_eq!(key.issuer.as_ref().expect("issuer is set"), &issuer);

    // A counter with no matching file is absent, not an error.
    assert!(conf.public_key(&issuer, 5).expect("keys scan").is_none());
}

#[test]
fn tampered_descriptor_is_rejected() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::minimal_scheme_files());

    // Flip a byte in the issuer description without updating the index.
    let path = root.path().join("irma-demo/pbdf/description.xml");
    let mut bytes = fs::read(&path).expect("file read");
    bytes[10] ^= 0x01;
    fs::write(&path, bytes).expect("file written");

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    assert!(matches!(conf.parse_folder(), Err(Error::HashMismatch { .. })));
    assert!(!conf.is_initialized());
}

#[test]
fn forged_index_signature_is_rejected() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::minimal_scheme_files());

    fs::write(root.path().join("irma-demo/index.sig"), b"garbage, not DER")
        .expect("file written");

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    assert!(matches!(conf.parse_folder(), Err(Error::InvalidSignature { .. })));
    assert!(!conf.is_initialized());
}

#[test]
fn signature_by_wrong_key_is_rejected() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    let writer = SchemeWriter::new();
    writer.write_scheme(root.path(), "irma-demo", &utils::minimal_scheme_files());

    // A well-formed signature from a different key must not verify.
    let other = SchemeWriter::new();
    let index = fs::read(root.path().join("irma-demo/index")).expect("index read");
    fs::write(root.path().join("irma-demo/index.sig"), other.sign(&index))
        .expect("file written");

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    assert!(matches!(conf.parse_folder(), Err(Error::InvalidSignature { .. })));
}

#[test]
fn missing_index_is_rejected() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::minimal_scheme_files());
    fs::remove_file(root.path().join("irma-demo/index")).expect("index removed");

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    assert!(matches!(conf.parse_folder(), Err(Error::MalformedIndex(_))));
}

#[test]
fn outdated_scheme_description_is_rejected() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");

    let outdated = utils::SCHEME_DESCRIPTION.replace(r#"version="7""#, r#"version="6""#);
    let files =
        vec![("description.xml", outdated.as_str()), ("pbdf/description.xml", utils::ISSUER_DESCRIPTION)];
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &files);

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    assert!(matches!(
        conf.parse_folder(),
        Err(Error::UnsupportedSchemaVersion { kind: "scheme manager", found: 6 })
    ));
}

#[test]
fn git_directories_are_ignored_at_every_level() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::minimal_scheme_files());

    // Unindexed junk in .git directories would fail authentication if
    // the directories were not skipped.
    for git in ["", "irma-demo/", "irma-demo/pbdf/Issues/"] {
        let dir = root.path().join(git).join(".git");
        fs::create_dir_all(&dir).expect("dirs created");
        fs::write(dir.join("description.xml"), "junk").expect("file written");
    }

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    conf.parse_folder().expect("folder parses");
    assert_eq!(conf.scheme_managers.len(), 1);
}

#[test]
fn cascade_removal_deletes_everything_under_the_scheme() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::full_scheme_files());

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    conf.parse_folder().expect("folder parses");
    assert_eq!(conf.issuers.len(), 1);
    assert_eq!(conf.credential_types.len(), 2);

    let scheme: SchemeManagerIdentifier = "irma-demo".parse().expect("identifier is valid");
    conf.remove_scheme_manager(&scheme).expect("scheme removed");

    assert!(conf.scheme_managers.is_empty());
    assert!(conf.issuers.is_empty());
    assert!(conf.credential_types.is_empty());
    let email: CredentialTypeIdentifier =
        "irma-demo.pbdf.email".parse().expect("identifier is valid");
    assert!(!conf.contains(&email));
    assert!(!root.path().join("irma-demo").exists());
}

#[test]
fn copy_duplicates_an_asset_tree() {
    utils::init_tracer();
    let assets = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(assets.path(), "irma-demo", &utils::minimal_scheme_files());

    let store = tempfile::tempdir().expect("temp dir");
    let mut conf = Configuration::with_assets(store.path().join("store"), assets.path())
        .expect("assets copied");
    conf.parse_folder().expect("folder parses");

    assert!(conf.is_initialized());
    assert_eq!(conf.scheme_managers.len(), 1);
    assert!(store.path().join("store/irma-demo/description.xml").exists());
}

#[derive(Default)]
struct MockRemote {
    files: HashMap<String, Vec<u8>>,
}

impl MockRemote {
    fn insert(&mut self, url: &str, bytes: impl Into<Vec<u8>>) {
        self.files.insert(url.to_string(), bytes.into());
    }
}

impl Remote for MockRemote {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.files.get(url).cloned().ok_or_else(|| anyhow::anyhow!("no such file: {url}"))
    }
}

const BASE: &str = "https://example.com/irma-demo";

#[tokio::test]
async fn download_resolves_missing_issuer() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    let writer = SchemeWriter::new();
    writer.write_scheme(root.path(), "irma-demo", &utils::minimal_scheme_files());

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    conf.parse_folder().expect("folder parses");

    // The server now publishes a second issuer, under a refreshed index.
    let mut remote = MockRemote::default();
    remote.insert(
        &format!("{BASE}/chipsoft/description.xml"),
        utils::SECOND_ISSUER_DESCRIPTION,
    );
    let mut files = utils::minimal_scheme_files();
    files.push(("chipsoft/description.xml", utils::SECOND_ISSUER_DESCRIPTION));
    let index = writer.index_for(&files);
    remote.insert(&format!("{BASE}/index"), index.as_bytes());
    remote.insert(&format!("{BASE}/index.sig"), writer.sign(index.as_bytes()));

    let chipsoft: IssuerIdentifier = "irma-demo.chipsoft".parse().expect("identifier is valid");
    let mut set = IdentifierSet::default();
    set.issuers.insert(chipsoft.clone());

    let downloaded = conf.download(&set, &remote).await.expect("download succeeds");
    assert!(downloaded.issuers.contains(&chipsoft));
    assert!(conf.issuers.contains_key(&chipsoft));
    assert!(conf.is_initialized());
}

#[tokio::test]
async fn download_resolves_missing_public_key() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    let writer = SchemeWriter::new();
    writer.write_scheme(root.path(), "irma-demo", &utils::minimal_scheme_files());

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    conf.parse_folder().expect("folder parses");

    let mut remote = MockRemote::default();
    remote.insert(&format!("{BASE}/pbdf/PublicKeys/0.xml"), utils::PUBLIC_KEY_0);
    let mut files = utils::minimal_scheme_files();
    files.push(("pbdf/PublicKeys/0.xml", utils::PUBLIC_KEY_0));
    let index = writer.index_for(&files);
    remote.insert(&format!("{BASE}/index"), index.as_bytes());
    remote.insert(&format!("{BASE}/index.sig"), writer.sign(index.as_bytes()));

    let pbdf: IssuerIdentifier = "irma-demo.pbdf".parse().expect("identifier is valid");
    let mut set = IdentifierSet::default();
    set.public_keys.insert(pbdf.clone(), vec![0]);

    let downloaded = conf.download(&set, &remote).await.expect("download succeeds");
    assert_eq!(downloaded.public_keys[&pbdf], vec![0]);
    assert!(conf.public_key(&pbdf, 0).expect("keys scan").is_some());
}

#[tokio::test]
async fn download_requires_known_scheme_managers() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::minimal_scheme_files());

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    conf.parse_folder().expect("folder parses");

    let mut set = IdentifierSet::default();
    set.scheme_managers.insert("unknown".parse().expect("identifier is valid"));

    let remote = MockRemote::default();
    assert!(matches!(conf.download(&set, &remote).await, Err(Error::UnknownScheme(_))));
}

#[tokio::test]
async fn download_of_known_identifiers_fetches_nothing() {
    utils::init_tracer();
    let root = tempfile::tempdir().expect("temp dir");
    SchemeWriter::new().write_scheme(root.path(), "irma-demo", &utils::minimal_scheme_files());

    let mut conf = Configuration::new(root.path()).expect("configuration created");
    conf.parse_folder().expect("folder parses");

    let mut set = IdentifierSet::default();
    set.scheme_managers.insert("irma-demo".parse().expect("identifier is valid"));
    set.issuers.insert("irma-demo.pbdf".parse().expect("identifier is valid"));

    // An empty remote: any fetch attempt would fail the download.
    let remote = MockRemote::default();
    let downloaded = conf.download(&set, &remote).await.expect("nothing to download");
    assert!(downloaded.is_empty());
}
