//! Rules deciding whether a peer's certificate chain is accepted.
//!
//! A [`VerificationPolicy`] is immutable and usually shared behind an
//! [`Arc`] by every configuration built from it. Verifying a chain walks
//! a fixed sequence of [`VerificationStage`]s and stops at the first
//! failing check:
//!
//! 1. a path is built from the leaf through the supplied intermediates to
//!    a root in the [`TrustStore`],
//! 2. every certificate on the path must be within its validity window,
//! 3. no certificate on the path may be revoked,
//! 4. the leaf must be valid for the requested hostname,
//! 5. the optional [`ChainAcceptor`] gets the last word.
//!
//! Verification has no side effects and keeps no state between calls.

use rustls_pki_types::CertificateDer;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

use crate::certificate::{Certificate, normalize_serial};
use crate::hostname;
use crate::path::PathSearch;
use crate::trust_store::TrustStore;

const DEFAULT_MAX_CHAIN_DEPTH: usize = 8;

/// TLS protocol versions a policy can name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Conventional name, e.g. `TLSv1.2`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tls10 => "TLSv1.0",
            Self::Tls11 => "TLSv1.1",
            Self::Tls12 => "TLSv1.2",
            Self::Tls13 => "TLSv1.3",
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown TLS version name.
#[derive(Debug, Error)]
#[error("unknown TLS version {0:?}")]
pub struct UnknownTlsVersion(String);

impl FromStr for TlsVersion {
    type Err = UnknownTlsVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let number = lower
            .strip_prefix("tlsv")
            .or_else(|| lower.strip_prefix("tls"))
            .unwrap_or(&lower);
        match number {
            "1.0" | "1" => Ok(Self::Tls10),
            "1.1" => Ok(Self::Tls11),
            "1.2" => Ok(Self::Tls12),
            "1.3" => Ok(Self::Tls13),
            _ => Err(UnknownTlsVersion(s.to_owned())),
        }
    }
}

/// Application-supplied final check on a chain that passed every
/// built-in check. Returning `Err(reason)` rejects the chain with
/// [`Rejection::Custom`].
///
/// Any `Fn(&[Certificate], Option<&str>) -> Result<(), String>` closure
/// that is `Send + Sync` implements this trait.
pub trait ChainAcceptor: Send + Sync {
    /// Inspect the verified path, leaf first and trust anchor last.
    fn accept(&self, path: &[Certificate], hostname: Option<&str>) -> Result<(), String>;
}

impl<F> ChainAcceptor for F
where
    F: Fn(&[Certificate], Option<&str>) -> Result<(), String> + Send + Sync,
{
    fn accept(&self, path: &[Certificate], hostname: Option<&str>) -> Result<(), String> {
        self(path, hostname)
    }
}

/// Certificates that must not be accepted even though they chain to a
/// trusted root, identified by issuer name and serial number.
#[derive(Clone, Debug, Default)]
pub struct RevocationList(HashSet<(Vec<u8>, Vec<u8>)>);

impl RevocationList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke the certificate with this DER-encoded issuer name and
    /// big-endian serial number.
    pub fn revoke(&mut self, issuer: &[u8], serial: &[u8]) {
        self.0
            .insert((issuer.to_vec(), normalize_serial(serial).to_vec()));
    }

    /// Revoke `cert`.
    pub fn revoke_certificate(&mut self, cert: &Certificate) {
        self.revoke(cert.issuer_raw(), cert.serial());
    }

    /// Whether `cert` has been revoked.
    pub fn is_revoked(&self, cert: &Certificate) -> bool {
        self.0
            .contains(&(cert.issuer_raw().to_vec(), cert.serial().to_vec()))
    }

    /// Number of revoked certificates.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is revoked.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Progress of a single verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationStage {
    /// Nothing checked yet.
    Start,
    /// A path to a trusted root exists.
    ChainBuilt,
    /// Every certificate on the path is within its validity window.
    TimeChecked,
    /// No certificate on the path is revoked.
    RevocationChecked,
    /// The leaf is valid for the requested hostname.
    HostnameChecked,
    /// The chain is accepted.
    Accepted,
}

impl fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::ChainBuilt => "chain built",
            Self::TimeChecked => "time checked",
            Self::RevocationChecked => "revocation checked",
            Self::HostnameChecked => "hostname checked",
            Self::Accepted => "accepted",
        })
    }
}

/// Why a chain was rejected.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    /// No path from the leaf to a root in the trust store.
    #[error("certificate chain does not lead to a trusted root")]
    UntrustedRoot,
    /// A certificate on the path is past its notAfter time.
    #[error("certificate has expired")]
    Expired,
    /// A certificate on the path is before its notBefore time.
    #[error("certificate is not yet valid")]
    NotYetValid,
    /// A certificate on the path is on the revocation list.
    #[error("certificate has been revoked")]
    Revoked,
    /// The leaf is not valid for the requested hostname, or no hostname
    /// was given.
    #[error("certificate is not valid for the requested hostname")]
    HostnameMismatch,
    /// The chain is empty or a certificate cannot be decoded.
    #[error("certificate chain is empty or cannot be decoded")]
    BadEncoding,
    /// Rejected by the [`ChainAcceptor`].
    #[error("certificate chain rejected: {0}")]
    Custom(String),
}

impl Rejection {
    /// The last stage passed before this rejection.
    pub fn stage(&self) -> VerificationStage {
        match self {
            Self::UntrustedRoot | Self::BadEncoding => VerificationStage::Start,
            Self::Expired | Self::NotYetValid => VerificationStage::ChainBuilt,
            Self::Revoked => VerificationStage::TimeChecked,
            Self::HostnameMismatch => VerificationStage::RevocationChecked,
            Self::Custom(_) => VerificationStage::HostnameChecked,
        }
    }
}

/// A chain that passed verification: leaf first, trust anchor last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedChain(Vec<Certificate>);

impl VerifiedChain {
    /// The peer's own certificate.
    pub fn leaf(&self) -> &Certificate {
        &self.0[0]
    }

    /// The trust anchor the path ends at.
    pub fn root(&self) -> &Certificate {
        &self.0[self.0.len() - 1]
    }

    /// The whole path.
    pub fn certificates(&self) -> &[Certificate] {
        &self.0
    }

    /// Path length, leaf and trust anchor included.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Per-connection certificate acceptance rules. See the
/// [module documentation](self).
#[derive(Clone)]
pub struct VerificationPolicy {
    min_version: TlsVersion,
    max_version: Option<TlsVersion>,
    verify_hostname: bool,
    reject_expired: bool,
    revocations: RevocationList,
    acceptor: Option<Arc<dyn ChainAcceptor>>,
    max_chain_depth: usize,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            min_version: TlsVersion::Tls12,
            max_version: None,
            verify_hostname: true,
            reject_expired: true,
            revocations: RevocationList::default(),
            acceptor: None,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }
}

impl fmt::Debug for VerificationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationPolicy")
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("verify_hostname", &self.verify_hostname)
            .field("reject_expired", &self.reject_expired)
            .field("revocations", &self.revocations.len())
            .field("acceptor", &self.acceptor.is_some())
            .field("max_chain_depth", &self.max_chain_depth)
            .finish()
    }
}

/// Builder for [`VerificationPolicy`], starting from the defaults.
#[derive(Default)]
pub struct VerificationPolicyBuilder(VerificationPolicy);

impl VerificationPolicyBuilder {
    /// Lowest acceptable protocol version. Defaults to TLS 1.2.
    pub fn min_version(mut self, v: TlsVersion) -> Self {
        self.0.min_version = v;
        self
    }

    /// Highest acceptable protocol version. Unlimited by default.
    pub fn max_version(mut self, v: TlsVersion) -> Self {
        self.0.max_version = Some(v);
        self
    }

    /// Whether the leaf must match the requested hostname. Defaults to
    /// true.
    pub fn verify_hostname(mut self, verify: bool) -> Self {
        self.0.verify_hostname = verify;
        self
    }

    /// Whether certificates outside their validity window are rejected.
    /// Defaults to true.
    pub fn reject_expired(mut self, reject: bool) -> Self {
        self.0.reject_expired = reject;
        self
    }

    /// Certificates to reject regardless of their chain.
    pub fn revocations(mut self, revocations: RevocationList) -> Self {
        self.0.revocations = revocations;
        self
    }

    /// Final application check, see [`ChainAcceptor`].
    pub fn acceptor(mut self, acceptor: impl ChainAcceptor + 'static) -> Self {
        self.0.acceptor = Some(Arc::new(acceptor));
        self
    }

    /// Longest path considered, leaf and trust anchor included.
    pub fn max_chain_depth(mut self, depth: usize) -> Self {
        self.0.max_chain_depth = depth;
        self
    }

    /// Finish building.
    pub fn build(self) -> VerificationPolicy {
        self.0
    }
}

impl VerificationPolicy {
    /// Start from the defaults: TLS 1.2 or later, hostname and validity
    /// checked, nothing revoked, paths of at most 8 certificates.
    pub fn builder() -> VerificationPolicyBuilder {
        VerificationPolicyBuilder::default()
    }

    /// Lowest acceptable protocol version.
    pub fn min_version(&self) -> TlsVersion {
        self.min_version
    }

    /// Highest acceptable protocol version, if limited.
    pub fn max_version(&self) -> Option<TlsVersion> {
        self.max_version
    }

    /// Whether the leaf must match the requested hostname.
    pub fn verify_hostname(&self) -> bool {
        self.verify_hostname
    }

    /// Whether the validity window is enforced.
    pub fn reject_expired(&self) -> bool {
        self.reject_expired
    }

    /// Revoked certificates.
    pub fn revocations(&self) -> &RevocationList {
        &self.revocations
    }

    /// Longest path considered.
    pub fn max_chain_depth(&self) -> usize {
        self.max_chain_depth
    }

    /// Verify a chain of DER certificates as presented by a peer, leaf
    /// first, against `roots` at time `now`.
    pub fn verify(
        &self,
        roots: &TrustStore,
        chain: &[CertificateDer<'_>],
        hostname: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<VerifiedChain, Rejection> {
        let parsed = chain
            .iter()
            .map(|der| Certificate::from_der(der.clone().into_owned()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                log::debug!("Peer certificate cannot be decoded: {}", e);
                Rejection::BadEncoding
            })?;
        self.verify_parsed(roots, &parsed, hostname, now)
    }

    /// Like [`VerificationPolicy::verify`] for already parsed
    /// certificates.
    pub fn verify_parsed(
        &self,
        roots: &TrustStore,
        chain: &[Certificate],
        hostname: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<VerifiedChain, Rejection> {
        let result = self.evaluate(roots, chain, hostname, now);
        if let Err(ref rejection) = result {
            log::debug!(
                "Rejected certificate chain for {:?} after {}: {}",
                hostname,
                rejection.stage(),
                rejection
            );
        }
        result
    }

    fn evaluate(
        &self,
        roots: &TrustStore,
        chain: &[Certificate],
        hostname: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<VerifiedChain, Rejection> {
        let Some((leaf, intermediates)) = chain.split_first() else {
            return Err(Rejection::BadEncoding);
        };
        let path = PathSearch::new(roots, leaf, intermediates, self.max_chain_depth)
            .find()
            .ok_or(Rejection::UntrustedRoot)?;
        log::debug!(
            "{}: {} via {} certificates",
            VerificationStage::ChainBuilt,
            leaf.subject(),
            path.len()
        );

        if self.reject_expired {
            for cert in &path {
                if now < cert.not_before() {
                    return Err(Rejection::NotYetValid);
                }
                if now > cert.not_after() {
                    return Err(Rejection::Expired);
                }
            }
        }
        log::debug!("{}: {}", VerificationStage::TimeChecked, leaf.subject());

        if let Some(cert) = path.iter().find(|c| self.revocations.is_revoked(c)) {
            log::debug!("{} is revoked", cert.subject());
            return Err(Rejection::Revoked);
        }
        log::debug!("{}: {}", VerificationStage::RevocationChecked, leaf.subject());

        if self.verify_hostname {
            match hostname {
                Some(name) if hostname::matches(leaf, name) => (),
                _ => return Err(Rejection::HostnameMismatch),
            }
            log::debug!("{}: {:?}", VerificationStage::HostnameChecked, hostname);
        }

        let path = path.into_iter().cloned().collect::<Vec<_>>();
        if let Some(ref acceptor) = self.acceptor {
            acceptor.accept(&path, hostname).map_err(Rejection::Custom)?;
        }
        log::debug!("{}: {}", VerificationStage::Accepted, leaf.subject());
        Ok(VerifiedChain(path))
    }
}
