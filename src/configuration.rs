//! The trust configuration registry.
//!
//! A [`Configuration`] mounts a directory tree of scheme managers and
//! keeps track of their issuers, credential types and issuer public keys.
//! Every file is read through the scheme manager's signed index (see
//! [`crate::index`]); nothing is consumed before the index signature has
//! been verified.
//!
//! The expected layout:
//!
//! ```text
//! <root>/<scheme>/description.xml
//! <root>/<scheme>/pk.pem
//! <root>/<scheme>/index
//! <root>/<scheme>/index.sig
//! <root>/<scheme>/<issuer>/description.xml
//! <root>/<scheme>/<issuer>/PublicKeys/<n>.xml
//! <root>/<scheme>/<issuer>/Issues/<credential>/description.xml
//! ```

mod download;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64ct::{Base64, Encoding};
use sha2::{Digest, Sha256};
use tracing::instrument;

pub use self::download::{download_scheme_manager, IdentifierSet, Remote};
use crate::descriptor::{
    self, CredentialType, Issuer, IssuerPublicKey, SchemeManager, MIN_CREDENTIAL_TYPE_VERSION,
    MIN_ISSUER_VERSION, MIN_SCHEME_MANAGER_VERSION,
};
use crate::error::{Error, Result};
use crate::identifier::{CredentialTypeIdentifier, IssuerIdentifier, SchemeManagerIdentifier};
use crate::index::{read_authenticated, verify_signature, SchemeManagerIndex};

/// Registry of scheme managers, issuers, credential types and issuer
/// public keys, deserialized from a configuration directory and refreshed
/// on demand from the scheme managers' servers.
///
/// Lookups take `&self`; [`Configuration::parse_folder`] and the refresh
/// operations require exclusive access and must be serialized by the
/// caller. After a successful parse the registry can be shared behind an
/// [`Arc`].
pub struct Configuration {
    /// Loaded scheme managers by identifier.
    pub scheme_managers: HashMap<SchemeManagerIdentifier, SchemeManager>,
    /// Loaded issuers by identifier.
    pub issuers: HashMap<IssuerIdentifier, Issuer>,
    /// Loaded credential types by identifier.
    pub credential_types: HashMap<CredentialTypeIdentifier, CredentialType>,

    public_keys: Mutex<HashMap<IssuerIdentifier, HashMap<u32, Arc<IssuerPublicKey>>>>,
    reverse_hashes: HashMap<String, CredentialTypeIdentifier>,
    path: PathBuf,
    initialized: bool,
}

impl Configuration {
    /// Creates a registry rooted at `path`, creating the directory if
    /// needed. Call [`Configuration::parse_folder`] afterwards.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        Ok(Self {
            scheme_managers: HashMap::new(),
            issuers: HashMap::new(),
            credential_types: HashMap::new(),
            public_keys: Mutex::new(HashMap::new()),
            reverse_hashes: HashMap::new(),
            path,
            initialized: false,
        })
    }

    /// Creates a registry rooted at `path`, seeding it with a copy of the
    /// asset tree at `assets`.
    pub fn with_assets(path: impl Into<PathBuf>, assets: &Path) -> Result<Self> {
        let mut conf = Self::new(path)?;
        conf.copy(assets, false)?;
        Ok(conf)
    }

    /// The directory this registry is rooted at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the registry has been populated by a successful parse.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn scheme_dir(&self, scheme: &SchemeManagerIdentifier) -> PathBuf {
        self.path.join(scheme.as_str())
    }

    /// Populates the registry by parsing the configuration directory.
    ///
    /// Each immediate subdirectory is treated as a scheme manager: its
    /// index is parsed and its signature verified before any descriptor
    /// is read. On error the registry is left partially populated and
    /// must be discarded.
    #[instrument(level = "debug", skip(self))]
    pub fn parse_folder(&mut self) -> Result<()> {
        self.scheme_managers = HashMap::new();
        self.issuers = HashMap::new();
        self.credential_types = HashMap::new();
        self.public_keys = Mutex::new(HashMap::new());
        self.reverse_hashes = HashMap::new();
        self.initialized = false;

        for dir in subdirectories(&self.path)? {
            self.parse_scheme_folder(&dir)?;
        }

        self.initialized = true;
        tracing::debug!(
            schemes = self.scheme_managers.len(),
            issuers = self.issuers.len(),
            credential_types = self.credential_types.len(),
            "configuration parsed"
        );
        Ok(())
    }

    fn parse_scheme_folder(&mut self, dir: &Path) -> Result<()> {
        let scheme_name = directory_name(dir)?;

        let index = parse_index(dir, &scheme_name)?;
        verify_signature(dir, &scheme_name)?;

        if !dir.join("description.xml").is_file() {
            return Ok(());
        }
        let bytes = read_authenticated(dir, &index, "description.xml")?;
        let mut manager: SchemeManager = descriptor::from_xml(&bytes)?;
        if manager.xml_version < MIN_SCHEME_MANAGER_VERSION {
            return Err(Error::UnsupportedSchemaVersion {
                kind: "scheme manager",
                found: manager.xml_version,
            });
        }
        if manager.id != scheme_name {
            return Err(Error::MalformedDescriptor(format!(
                "scheme manager id {} does not match its directory {scheme_name}",
                manager.id
            )));
        }
        let scheme_id = manager.identifier()?;

        manager.index = index.clone();
        manager.public_key_pem = fs::read_to_string(dir.join("pk.pem"))?;
        self.scheme_managers.insert(scheme_id.clone(), manager);

        for issuer_dir in subdirectories(dir)? {
            self.parse_issuer_folder(&scheme_id, &index, dir, &issuer_dir)?;
        }
        Ok(())
    }

    fn parse_issuer_folder(
        &mut self, scheme_id: &SchemeManagerIdentifier, index: &SchemeManagerIndex,
        scheme_dir: &Path, issuer_dir: &Path,
    ) -> Result<()> {
        if !issuer_dir.join("description.xml").is_file() {
            return Ok(());
        }
        let issuer_name = directory_name(issuer_dir)?;

        let bytes =
            read_authenticated(scheme_dir, index, &format!("{issuer_name}/description.xml"))?;
        let issuer: Issuer = descriptor::from_xml(&bytes)?;
        if issuer.xml_version < MIN_ISSUER_VERSION {
            return Err(Error::UnsupportedSchemaVersion {
                kind: "issuer",
                found: issuer.xml_version,
            });
        }
        if issuer.id != issuer_name || issuer.scheme_manager != scheme_id.as_str() {
            return Err(Error::MalformedDescriptor(format!(
                "issuer {}.{} does not match its location {scheme_id}/{issuer_name}",
                issuer.scheme_manager, issuer.id
            )));
        }
        let issuer_id = issuer.identifier()?;
        self.issuers.insert(issuer_id.clone(), issuer);

        for cred_dir in subdirectories(&issuer_dir.join("Issues"))? {
            self.parse_credential_folder(&issuer_id, index, scheme_dir, &cred_dir)?;
        }
        Ok(())
    }

    fn parse_credential_folder(
        &mut self, issuer_id: &IssuerIdentifier, index: &SchemeManagerIndex, scheme_dir: &Path,
        cred_dir: &Path,
    ) -> Result<()> {
        if !cred_dir.join("description.xml").is_file() {
            return Ok(());
        }
        let cred_name = directory_name(cred_dir)?;

        let rel = format!("{}/Issues/{cred_name}/description.xml", issuer_id.name());
        let bytes = read_authenticated(scheme_dir, index, &rel)?;
        let cred: CredentialType = descriptor::from_xml(&bytes)?;
        if cred.xml_version < MIN_CREDENTIAL_TYPE_VERSION {
            return Err(Error::UnsupportedSchemaVersion {
                kind: "credential type",
                found: cred.xml_version,
            });
        }
        if cred.id != cred_name
            || cred.issuer_id != issuer_id.name()
            || cred.scheme_manager != issuer_id.scheme_manager().as_str()
        {
            return Err(Error::MalformedDescriptor(format!(
                "credential type {}.{}.{} does not match its location {issuer_id}/Issues/{cred_name}",
                cred.scheme_manager, cred.issuer_id, cred.id
            )));
        }
        let cred_id = cred.identifier()?;
        self.credential_types.insert(cred_id.clone(), cred);
        self.add_reverse_hash(&cred_id)
    }

    fn add_reverse_hash(&mut self, cred_id: &CredentialTypeIdentifier) -> Result<()> {
        let hash = Sha256::digest(cred_id.as_str().as_bytes());
        let key = Base64::encode_string(&hash[..16]);
        if let Some(existing) = self.reverse_hashes.get(&key) {
            if existing != cred_id {
                return Err(Error::DuplicateReverseHash(cred_id.to_string()));
            }
        }
        self.reverse_hashes.insert(key, cred_id.clone());
        Ok(())
    }

    /// The credential type whose identifier hashes to the given 16-byte
    /// SHA-256 prefix, if any. The protocol uses this to recover a
    /// credential type from a commitment opening.
    #[must_use]
    pub fn credential_type_for_hash(&self, hash: &[u8]) -> Option<&CredentialType> {
        let key = Base64::encode_string(hash);
        let cred_id = self.reverse_hashes.get(&key)?;
        self.credential_types.get(cred_id)
    }

    /// Whether the credential type, its issuer and its scheme manager are
    /// all loaded.
    #[must_use]
    pub fn contains(&self, cred: &CredentialTypeIdentifier) -> bool {
        let issuer = cred.issuer();
        self.scheme_managers.contains_key(&issuer.scheme_manager())
            && self.issuers.contains_key(&issuer)
            && self.credential_types.contains_key(cred)
    }

    /// The public key of `issuer` with the given counter, or `None` when
    /// the issuer publishes no such key.
    ///
    /// Keys are loaded lazily: the first lookup for an issuer scans its
    /// `PublicKeys` directory, authenticating every file against the
    /// scheme manager index. Files whose stem is not a decimal integer
    /// are skipped.
    pub fn public_key(
        &self, issuer: &IssuerIdentifier, counter: u32,
    ) -> Result<Option<Arc<IssuerPublicKey>>> {
        let mut cache = self.public_keys.lock().expect("lock poisoned");
        if !cache.contains_key(issuer) {
            let keys = self.parse_keys_folder(issuer)?;
            cache.insert(issuer.clone(), keys);
        }
        Ok(cache.get(issuer).and_then(|keys| keys.get(&counter)).cloned())
    }

    fn parse_keys_folder(
        &self, issuer: &IssuerIdentifier,
    ) -> Result<HashMap<u32, Arc<IssuerPublicKey>>> {
        let scheme = issuer.scheme_manager();
        let Some(manager) = self.scheme_managers.get(&scheme) else {
            return Err(Error::UnknownScheme(scheme.to_string()));
        };

        let mut keys = HashMap::new();
        let scheme_dir = self.scheme_dir(&scheme);
        let keys_dir = scheme_dir.join(issuer.name()).join("PublicKeys");
        if !keys_dir.is_dir() {
            return Ok(keys);
        }

        for entry in fs::read_dir(&keys_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != "xml") {
                continue;
            }
            let Some(counter) =
                path.file_stem().and_then(|stem| stem.to_str()).and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };

            let file_name = entry.file_name();
            let rel = format!("{}/PublicKeys/{}", issuer.name(), file_name.to_string_lossy());
            let bytes = read_authenticated(&scheme_dir, &manager.index, &rel)?;
            let mut key: IssuerPublicKey = descriptor::from_xml(&bytes)?;
            key.issuer = Some(issuer.clone());
            keys.insert(counter, Arc::new(key));
        }
        Ok(keys)
    }

    /// Removes a scheme manager and everything under its responsibility:
    /// its issuers, credential types, cached public keys, and its
    /// directory on disk.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_scheme_manager(&mut self, id: &SchemeManagerIdentifier) -> Result<()> {
        self.credential_types.retain(|cred, _| &cred.issuer().scheme_manager() != id);
        self.reverse_hashes.retain(|_, cred| &cred.issuer().scheme_manager() != id);
        self.issuers.retain(|issuer, _| &issuer.scheme_manager() != id);
        self.public_keys
            .lock()
            .expect("lock poisoned")
            .retain(|issuer, _| &issuer.scheme_manager() != id);
        self.scheme_managers.remove(id);

        match fs::remove_dir_all(self.scheme_dir(id)) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Duplicates the asset tree at `source` into the registry root,
    /// optionally re-parsing afterwards.
    pub fn copy(&mut self, source: &Path, parse: bool) -> Result<()> {
        fs::create_dir_all(&self.path)?;
        copy_tree(source, &self.path)?;
        if parse {
            return self.parse_folder();
        }
        Ok(())
    }
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&target)?;
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn parse_index(dir: &Path, scheme: &str) -> Result<SchemeManagerIndex> {
    let path = dir.join("index");
    if !path.is_file() {
        return Err(Error::MalformedIndex(format!("scheme manager {scheme} has no index file")));
    }
    let text = fs::read_to_string(path)?;
    text.parse()
}

// Subdirectories of `path` in name order, skipping `.git` checkouts. A
// missing directory yields no entries.
fn subdirectories(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    if !path.is_dir() {
        return Ok(dirs);
    }
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() || entry.file_name() == ".git" {
            continue;
        }
        dirs.push(entry.path());
    }
    dirs.sort();
    Ok(dirs)
}

fn directory_name(dir: &Path) -> Result<String> {
    dir.file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| Error::MalformedIdentifier(dir.display().to_string()))
}
