//! Incremental refresh of the configuration from scheme manager servers.
//!
//! Transport is supplied by the caller through the [`Remote`] trait; the
//! registry decides which files are missing, writes the fetched bytes
//! into the configuration directory, refreshes the signed index of every
//! scheme that received new files, and re-parses. Authenticity of the
//! downloaded files is established by the re-parse: every file is checked
//! against the freshly fetched, signed index.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::future::Future;
use std::path::Path;

use tracing::instrument;

use crate::configuration::Configuration;
use crate::descriptor::{self, SchemeManager};
use crate::error::{Error, Result};
use crate::identifier::{CredentialTypeIdentifier, IssuerIdentifier, SchemeManagerIdentifier};

/// Fetches configuration files from scheme manager servers. Implemented
/// by the caller over its HTTP client of choice.
pub trait Remote: Send + Sync {
    /// Fetches the resource at `url`, returning its raw bytes.
    fn fetch(&self, url: &str) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

/// A set of identifiers to make resolvable locally, and the subset a
/// refresh actually downloaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentifierSet {
    /// Scheme managers that must already be known.
    pub scheme_managers: BTreeSet<SchemeManagerIdentifier>,
    /// Issuers to resolve.
    pub issuers: BTreeSet<IssuerIdentifier>,
    /// Credential types to resolve.
    pub credential_types: BTreeSet<CredentialTypeIdentifier>,
    /// Issuer public keys to resolve, by counter.
    pub public_keys: BTreeMap<IssuerIdentifier, Vec<u32>>,
}

impl IdentifierSet {
    /// Whether the set names nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scheme_managers.is_empty()
            && self.issuers.is_empty()
            && self.credential_types.is_empty()
            && self.public_keys.is_empty()
    }
}

impl Configuration {
    /// Performs the minimum set of fetches to make every identifier in
    /// `set` resolvable locally, then re-parses if anything was
    /// downloaded. Returns the subset actually downloaded.
    ///
    /// Every scheme manager named in the set must already be known;
    /// unknown ones fail with [`Error::UnknownScheme`]. Logos are
    /// best-effort: a failed logo fetch is logged and ignored.
    #[instrument(level = "debug", skip(self, remote))]
    pub async fn download(
        &mut self, set: &IdentifierSet, remote: &impl Remote,
    ) -> Result<IdentifierSet> {
        for scheme in &set.scheme_managers {
            if !self.scheme_managers.contains_key(scheme) {
                return Err(Error::UnknownScheme(scheme.to_string()));
            }
        }

        let mut downloaded = IdentifierSet::default();
        let mut updated: BTreeSet<SchemeManagerIdentifier> = BTreeSet::new();

        for issuer in &set.issuers {
            if self.issuers.contains_key(issuer) {
                continue;
            }
            let (scheme, base) = self.scheme_url(&issuer.scheme_manager())?;
            let url = format!("{base}/{}", issuer.name());
            let dir = self.scheme_dir(&scheme).join(issuer.name());

            fetch_to(remote, &format!("{url}/description.xml"), &dir.join("description.xml"))
                .await?;
            fetch_logo(remote, &format!("{url}/logo.png"), &dir.join("logo.png")).await;

            updated.insert(scheme);
            downloaded.issuers.insert(issuer.clone());
        }

        for (issuer, counters) in &set.public_keys {
            for &counter in counters {
                if self.public_key(issuer, counter)?.is_some() {
                    continue;
                }
                let (scheme, base) = self.scheme_url(&issuer.scheme_manager())?;
                let suffix = format!("{}/PublicKeys/{counter}.xml", issuer.name());

                fetch_to(remote, &format!("{base}/{suffix}"), &self.scheme_dir(&scheme).join(&suffix))
                    .await?;

                updated.insert(scheme);
                downloaded.public_keys.entry(issuer.clone()).or_default().push(counter);
            }
        }

        for cred in &set.credential_types {
            if self.credential_types.contains_key(cred) {
                continue;
            }
            let issuer = cred.issuer();
            let (scheme, base) = self.scheme_url(&issuer.scheme_manager())?;
            let url = format!("{base}/{}/Issues/{}", issuer.name(), cred.name());
            let dir =
                self.scheme_dir(&scheme).join(issuer.name()).join("Issues").join(cred.name());

            fetch_to(remote, &format!("{url}/description.xml"), &dir.join("description.xml"))
                .await?;
            fetch_logo(remote, &format!("{url}/logo.png"), &dir.join("logo.png")).await;

            updated.insert(scheme);
            downloaded.credential_types.insert(cred.clone());
        }

        // The new files are only trusted once they appear in a signed
        // index, so the index of every touched scheme is refreshed and
        // the tree re-parsed.
        for scheme in &updated {
            let (scheme, base) = self.scheme_url(scheme)?;
            let dir = self.scheme_dir(&scheme);
            fetch_to(remote, &format!("{base}/index"), &dir.join("index")).await?;
            fetch_to(remote, &format!("{base}/index.sig"), &dir.join("index.sig")).await?;
        }
        if !downloaded.is_empty() {
            self.parse_folder()?;
        }
        Ok(downloaded)
    }

    fn scheme_url(&self, scheme: &SchemeManagerIdentifier) -> Result<(SchemeManagerIdentifier, String)> {
        let Some(manager) = self.scheme_managers.get(scheme) else {
            return Err(Error::UnknownScheme(scheme.to_string()));
        };
        Ok((scheme.clone(), manager.url.trim_end_matches('/').to_string()))
    }

    /// Adds a scheme manager to the registry, fetching its description,
    /// public key and signed index into the configuration directory.
    #[instrument(level = "debug", skip(self, remote, manager), fields(scheme = %manager.id))]
    pub async fn add_scheme_manager(
        &mut self, remote: &impl Remote, manager: SchemeManager,
    ) -> Result<()> {
        let id: SchemeManagerIdentifier = manager.id.parse()?;
        let base = manager.url.trim_end_matches('/').to_string();
        let dir = self.scheme_dir(&id);
        fs::create_dir_all(&dir)?;

        for name in ["description.xml", "pk.pem", "index", "index.sig"] {
            fetch_to(remote, &format!("{base}/{name}"), &dir.join(name)).await?;
        }

        self.scheme_managers.insert(id, manager);
        Ok(())
    }
}

/// Downloads and parses a scheme manager description from `url`.
///
/// The URL is normalized: a missing scheme defaults to `https`, and a
/// trailing slash or `/description.xml` suffix is stripped.
pub async fn download_scheme_manager(remote: &impl Remote, url: &str) -> Result<SchemeManager> {
    let mut url = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    url = url.trim_end_matches('/').to_string();
    if let Some(stripped) = url.strip_suffix("/description.xml") {
        url = stripped.to_string();
    }

    let bytes = remote.fetch(&format!("{url}/description.xml")).await.map_err(Error::Remote)?;
    let mut manager: SchemeManager = descriptor::from_xml(&bytes)?;
    manager.url = url;
    Ok(manager)
}

async fn fetch_to(remote: &impl Remote, url: &str, dest: &Path) -> Result<()> {
    let bytes = remote.fetch(url).await.map_err(Error::Remote)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, bytes)?;
    Ok(())
}

async fn fetch_logo(remote: &impl Remote, url: &str, dest: &Path) {
    if let Err(err) = fetch_to(remote, url, dest).await {
        tracing::debug!(url, "logo unavailable: {err}");
    }
}
