//! The set of root certificates trusted by default.
//!
//! A [`TrustStore`] is loaded once, normally at process start, and never
//! changes afterwards. Cloning one is cheap and every clone refers to the
//! same immutable certificate slice, so any number of concurrent
//! handshakes can consult it without synchronisation.
//!
//! The default bundle is compiled into the binary. A bundle on disk can
//! replace it or be layered on top of it; see [`TrustSource`].
//!
//! # Command line flags
//!
//! With the **args** feature, [`TrustStoreArgs`] can be flattened into a
//! binary's [`clap`] parser:
//!
//! | Flag                   | Default | Meaning                 |
//! |------------------------|---------|-------------------------|
//! | `--cacert`             | None    | Name of file containing PEM or DER X.509 trust anchor certificate(s) added to the built-in set |
//! | `--no-default-cacerts` | false   | Trust only the certificates from `--cacert` |

use rustls_pki_types::CertificateDer;
use std::collections::HashSet;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use time::OffsetDateTime;

use crate::certificate::Certificate;

static EMBEDDED_BUNDLE: &[u8] = include_bytes!("../certs/default_ca.pem");

static PROCESS_DEFAULT: OnceLock<TrustStore> = OnceLock::new();

/// Error type returned when a CA bundle cannot be turned into a
/// [`TrustStore`]. All of these are fatal: no partial store is ever
/// produced.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The bundle contained no certificates at all.
    #[error("CA bundle contains no certificates")]
    EmptyBundle,
    /// An entry of the bundle could not be decoded.
    #[error("CA bundle entry {index} is malformed: {reason}")]
    MalformedBundle {
        /// Zero-based position of the offending entry.
        index: usize,
        /// Decoder diagnostic.
        reason: String,
    },
    /// Wrapper for std::io::Error
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Where the trust anchors come from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TrustSource {
    /// The bundle compiled into this crate.
    #[default]
    Embedded,
    /// Only the bundle in this file.
    File(PathBuf),
    /// The compiled-in bundle followed by the bundle in this file.
    EmbeddedAnd(PathBuf),
}

/// Command line arguments selecting a [`TrustSource`].
#[cfg(feature = "args")]
#[derive(clap::Args, Debug, Default)]
#[group(id = "pal_tls_trust_store_args")]
pub struct TrustStoreArgs {
    #[arg(
        long,
        help = "Path to additional TLS root certificates for verifying peers, in PEM or DER format."
    )]
    cacert: Option<PathBuf>,

    #[arg(
        long,
        requires = "cacert",
        help = "Do not trust the built-in root certificates, only those given with --cacert."
    )]
    no_default_cacerts: bool,
}

#[cfg(feature = "args")]
impl TrustStoreArgs {
    /// The [`TrustSource`] these flags describe.
    pub fn source(&self) -> TrustSource {
        match (&self.cacert, self.no_default_cacerts) {
            (None, _) => TrustSource::Embedded,
            (Some(path), true) => TrustSource::File(path.clone()),
            (Some(path), false) => TrustSource::EmbeddedAnd(path.clone()),
        }
    }
}

/// Iterator over a concatenation of DER-encoded certificates.
struct DerCertificates<'a>(&'a [u8]);

impl Iterator for DerCertificates<'_> {
    type Item = Result<CertificateDer<'static>, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.is_empty() {
            return None;
        }
        Some(match x509_parser::parse_x509_certificate(self.0) {
            Ok((rest, _)) => {
                let der_len = self.0.len() - rest.len();
                let cert = self.0[..der_len].to_vec().into();
                self.0 = rest;
                Ok(cert)
            }
            Err(e) => {
                self.0 = b"";
                Err(e.to_string())
            }
        })
    }
}

fn looks_like_pem(data: &[u8]) -> bool {
    data.windows(10).any(|w| w == b"-----BEGIN")
}

fn parse_entries<I>(entries: I) -> Result<Vec<Certificate>, LoadError>
where
    I: Iterator<Item = Result<CertificateDer<'static>, String>>,
{
    entries
        .enumerate()
        .map(|(index, entry)| {
            entry
                .and_then(|der| Certificate::from_der(der).map_err(|e| e.to_string()))
                .map_err(|reason| LoadError::MalformedBundle { index, reason })
        })
        .collect()
}

/// An immutable, ordered set of trusted root certificates, unique by
/// subject and public key.
#[derive(Clone)]
pub struct TrustStore(Arc<[Certificate]>);

impl TrustStore {
    /// Load the bundle compiled into this crate.
    pub fn load_default() -> Result<Self, LoadError> {
        Self::from_pem(EMBEDDED_BUNDLE)
    }

    /// Load trust anchors from `source`.
    pub fn load(source: &TrustSource) -> Result<Self, LoadError> {
        match source {
            TrustSource::Embedded => Self::load_default(),
            TrustSource::File(path) => Self::from_path(path),
            TrustSource::EmbeddedAnd(path) => {
                Ok(Self::load_default()?.with_additional(&Self::from_path(path)?))
            }
        }
    }

    /// Load a bundle from disk, PEM or DER.
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let data = std::fs::read(path)?;
        let store = Self::from_bundle(&data).map_err(|e| {
            log::warn!("Could not load root certificates from {}: {}", path.display(), e);
            e
        })?;
        log::info!(
            "Loaded {} root certificates from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    /// Parse a bundle, guessing PEM or DER from its contents.
    pub fn from_bundle(data: &[u8]) -> Result<Self, LoadError> {
        if looks_like_pem(data) {
            Self::from_pem(data)
        } else {
            Self::from_der(data)
        }
    }

    /// Parse a sequence of PEM `CERTIFICATE` sections. Text outside the
    /// sections is ignored.
    pub fn from_pem(data: &[u8]) -> Result<Self, LoadError> {
        let mut reader = Cursor::new(data);
        let entries = rustls_pemfile::certs(&mut reader).map(|r| r.map_err(|e| e.to_string()));
        Self::from_certificates(parse_entries(entries)?)
    }

    /// Parse a concatenation of DER certificates.
    pub fn from_der(data: &[u8]) -> Result<Self, LoadError> {
        Self::from_certificates(parse_entries(DerCertificates(data))?)
    }

    /// Build a store from already parsed certificates. Later duplicates of
    /// a subject and public key are dropped.
    pub fn from_certificates<I>(certs: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = Certificate>,
    {
        let now = OffsetDateTime::now_utc();
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for cert in certs {
            let (subject, spki) = cert.identity();
            if !seen.insert((subject.to_vec(), spki.to_vec())) {
                log::debug!("Ignoring duplicate root certificate {}", cert.subject());
                continue;
            }
            if cert.not_after() < now {
                log::warn!(
                    "Root certificate {} expired at {}",
                    cert.subject(),
                    cert.not_after()
                );
            }
            unique.push(cert);
        }
        if unique.is_empty() {
            return Err(LoadError::EmptyBundle);
        }
        Ok(Self(unique.into()))
    }

    /// A new store holding the certificates of `self` followed by those of
    /// `other` not already present.
    pub fn with_additional(&self, other: &TrustStore) -> TrustStore {
        let mut certs = self.0.to_vec();
        certs.extend(other.iter().filter(|c| !self.contains(c)).cloned());
        Self(certs.into())
    }

    /// Walk the certificates in bundle order. Each call starts over.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Certificate> + Clone + '_ {
        self.0.iter()
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a successfully loaded store.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a certificate with the same subject and public key is
    /// present.
    pub fn contains(&self, cert: &Certificate) -> bool {
        self.0.iter().any(|c| c.same_identity(cert))
    }

    /// Roots whose subject is the issuer named by `cert`.
    pub fn find_issuers<'a>(&'a self, cert: &'a Certificate) -> impl Iterator<Item = &'a Certificate> {
        self.0
            .iter()
            .filter(move |root| root.subject_raw() == cert.issuer_raw())
    }

    pub(crate) fn as_slice(&self) -> &[Certificate] {
        &self.0
    }

    /// Whether two handles share the same underlying certificates.
    pub fn ptr_eq(&self, other: &TrustStore) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Load the process-wide store from `source` on first call; later
    /// calls return the already loaded store and ignore `source`.
    pub fn init_process_default(source: &TrustSource) -> Result<&'static TrustStore, LoadError> {
        if let Some(store) = PROCESS_DEFAULT.get() {
            return Ok(store);
        }
        let store = Self::load(source)?;
        log::info!("Trusting {} root certificates", store.len());
        Ok(PROCESS_DEFAULT.get_or_init(|| store))
    }

    /// The process-wide store, if [`TrustStore::init_process_default`]
    /// has succeeded.
    pub fn process_default() -> Option<&'static TrustStore> {
        PROCESS_DEFAULT.get()
    }
}

impl<'a> IntoIterator for &'a TrustStore {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(Certificate::subject))
            .finish()
    }
}
