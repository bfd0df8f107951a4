//! [`BackendAdapter`] for [`rustls`].
//!
//! The trust store is installed as the [`RootCertStore`] of the native
//! object. Certificate verification during the handshake is done by a
//! [`ServerCertVerifier`] that runs the [`VerificationPolicy`] engine,
//! so the same rules apply here as with any other backend. Handshake
//! signatures are checked with the algorithms of the configured
//! [`CryptoProvider`].
//!
//! rustls implements TLS 1.2 and TLS 1.3 only. A policy or connection
//! asking for an older version fails with
//! [`ConfigError::UnsupportedOption`].

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{
    CryptoProvider, WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, ProtocolVersion, RootCertStore,
    SignatureScheme, SupportedProtocolVersion,
};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::adapter::{BackendAdapter, ConfigError, ConnectionParams};
use crate::crypto_provider::RustlsCryptoProvider;
use crate::policy::{Rejection, TlsVersion, VerificationPolicy};
use crate::trust_store::TrustStore;

const BACKEND_NAME: &str = "rustls";

impl From<rustls::Error> for ConfigError {
    fn from(e: rustls::Error) -> Self {
        ConfigError::BackendRejected(e.to_string())
    }
}

/// Builds [`RustlsClientConfig`]s.
#[derive(Clone, Debug)]
pub struct RustlsAdapter {
    provider: Arc<CryptoProvider>,
}

impl RustlsAdapter {
    /// Use the given provider for handshakes and signature checks.
    pub fn new(provider: &RustlsCryptoProvider) -> Self {
        Self {
            provider: provider.crypto_provider(),
        }
    }
}

impl Default for RustlsAdapter {
    fn default() -> Self {
        Self::new(&RustlsCryptoProvider::default())
    }
}

/// The rustls configuration under construction.
#[derive(Debug)]
pub struct RustlsNativeConfig {
    roots: RootCertStore,
    store: Option<TrustStore>,
    policy: Option<Arc<VerificationPolicy>>,
    versions: Vec<&'static SupportedProtocolVersion>,
    alpn: Vec<Vec<u8>>,
    server_name: Option<ServerName<'static>>,
    hostname: Option<String>,
}

impl RustlsNativeConfig {
    /// Trust anchors installed so far.
    ///
    /// This list is for inspection. The finished configuration verifies
    /// peers against the [`TrustStore`] through the verification policy,
    /// so rustls never consults it.
    pub fn trust_anchors(&self) -> &RootCertStore {
        &self.roots
    }

    /// Protocol versions that will be offered.
    pub fn protocol_versions(&self) -> Vec<ProtocolVersion> {
        self.versions.iter().map(|v| v.version).collect()
    }

    /// ALPN protocols that will be offered.
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn
    }

    /// Name to present in SNI and to verify, if one was given.
    pub fn server_name(&self) -> Option<&ServerName<'static>> {
        self.server_name.as_ref()
    }
}

/// A finished rustls client configuration.
#[derive(Clone, Debug)]
pub struct RustlsClientConfig {
    config: Arc<ClientConfig>,
    roots: Arc<RootCertStore>,
    server_name: Option<ServerName<'static>>,
}

impl RustlsClientConfig {
    /// Configuration for `rustls::ClientConnection` or `tokio_rustls`.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    /// Server name to connect with, if one was given.
    pub fn server_name(&self) -> Option<&ServerName<'static>> {
        self.server_name.as_ref()
    }

    /// Trust anchors the configuration was built with. Not consulted by
    /// rustls, see [`RustlsNativeConfig::trust_anchors`].
    pub fn trust_anchors(&self) -> &RootCertStore {
        &self.roots
    }
}

fn supported_version(
    v: TlsVersion,
) -> Result<&'static SupportedProtocolVersion, ConfigError> {
    match v {
        TlsVersion::Tls12 => Ok(&rustls::version::TLS12),
        TlsVersion::Tls13 => Ok(&rustls::version::TLS13),
        TlsVersion::Tls10 | TlsVersion::Tls11 => Err(ConfigError::UnsupportedOption {
            backend: BACKEND_NAME,
            option: v.to_string(),
        }),
    }
}

impl BackendAdapter for RustlsAdapter {
    type Native = RustlsNativeConfig;
    type Config = RustlsClientConfig;

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn new_native(&self) -> Result<RustlsNativeConfig, ConfigError> {
        Ok(RustlsNativeConfig {
            roots: RootCertStore::empty(),
            store: None,
            policy: None,
            versions: Vec::new(),
            alpn: Vec::new(),
            server_name: None,
            hostname: None,
        })
    }

    fn apply_trust_store(
        &self,
        native: &mut RustlsNativeConfig,
        store: &TrustStore,
    ) -> Result<(), ConfigError> {
        let roots = store
            .iter()
            .map(|cert| {
                webpki::anchor_from_trusted_cert(cert.der())
                    .map(|anchor| anchor.to_owned())
                    .map_err(|e| {
                        ConfigError::BackendRejected(format!(
                            "trust anchor {}: {}",
                            cert.subject(),
                            e
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        native.roots = RootCertStore { roots };
        native.store = Some(store.clone());
        Ok(())
    }

    fn apply_policy(
        &self,
        native: &mut RustlsNativeConfig,
        policy: &Arc<VerificationPolicy>,
        params: &ConnectionParams,
    ) -> Result<(), ConfigError> {
        let (floor, ceiling) = params.effective_versions(policy)?;
        supported_version(floor)?;
        if let Some(ceiling) = ceiling {
            supported_version(ceiling)?;
        }
        let versions = [TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|v| *v >= floor && ceiling.is_none_or(|c| *v <= c))
            .map(supported_version)
            .collect::<Result<Vec<_>, _>>()?;

        let server_name = params
            .hostname()
            .map(|h| {
                let bare = h
                    .strip_prefix('[')
                    .and_then(|h| h.strip_suffix(']'))
                    .unwrap_or(h);
                ServerName::try_from(bare.to_owned()).map_err(|e| {
                    ConfigError::InvalidParams(format!("hostname {:?}: {}", h, e))
                })
            })
            .transpose()?;

        native.versions = versions;
        native.alpn = params.alpn().to_vec();
        native.server_name = server_name;
        native.hostname = params.hostname().map(str::to_owned);
        native.policy = Some(Arc::clone(policy));
        Ok(())
    }

    fn finalize(&self, native: RustlsNativeConfig) -> Result<RustlsClientConfig, ConfigError> {
        let Some(store) = native.store else {
            return Err(ConfigError::BackendRejected(
                "no trust store was applied".into(),
            ));
        };
        let Some(policy) = native.policy else {
            return Err(ConfigError::BackendRejected("no policy was applied".into()));
        };
        let verifier = Arc::new(PolicyVerifier {
            store,
            policy,
            hostname: native.hostname,
            supported_algs: self.provider.signature_verification_algorithms,
        });
        let mut config = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_protocol_versions(&native.versions)?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        config.alpn_protocols = native.alpn;
        Ok(RustlsClientConfig {
            config: Arc::new(config),
            roots: Arc::new(native.roots),
            server_name: native.server_name,
        })
    }
}

fn certificate_error(rejection: Rejection) -> CertificateError {
    match rejection {
        Rejection::UntrustedRoot => CertificateError::UnknownIssuer,
        Rejection::Expired => CertificateError::Expired,
        Rejection::NotYetValid => CertificateError::NotValidYet,
        Rejection::Revoked => CertificateError::Revoked,
        Rejection::HostnameMismatch => CertificateError::NotValidForName,
        Rejection::BadEncoding => CertificateError::BadEncoding,
        custom @ Rejection::Custom(_) => {
            CertificateError::Other(rustls::OtherError(Arc::new(custom)))
        }
    }
}

fn reference_name(server_name: &ServerName<'_>) -> Option<String> {
    match server_name {
        ServerName::DnsName(name) => Some(name.as_ref().to_owned()),
        ServerName::IpAddress(ip) => Some(std::net::IpAddr::from(*ip).to_string()),
        _ => None,
    }
}

#[derive(Debug)]
struct PolicyVerifier {
    store: TrustStore,
    policy: Arc<VerificationPolicy>,
    hostname: Option<String>,
    supported_algs: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let now = i64::try_from(now.as_secs())
            .ok()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
            .ok_or(rustls::Error::FailedToGetCurrentTime)?;
        let hostname = match self.hostname {
            Some(ref h) => Some(h.clone()),
            None => reference_name(server_name),
        };
        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());
        self.policy
            .verify(&self.store, &chain, hostname.as_deref(), now)
            .map(|_| ServerCertVerified::assertion())
            .map_err(|rejection| rustls::Error::InvalidCertificate(certificate_error(rejection)))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}
