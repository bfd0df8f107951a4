//! The contract every TLS library backend implements.
//!
//! A backend starts from an empty native configuration object, has the
//! trust store and then the policy injected into it, and finally turns
//! it into a configuration ready for handshakes. Callers go through
//! [`TlsConfigBuilder`](crate::TlsConfigBuilder) and never see which
//! backend is in use.

use std::sync::Arc;
use thiserror::Error;

use crate::policy::{TlsVersion, VerificationPolicy};
use crate::trust_store::TrustStore;

/// Error type returned while building a backend configuration. Each
/// build attempt stands alone; nothing is left half-applied for the next.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The backend refused the configuration or a required step was
    /// skipped.
    #[error("TLS backend rejected the configuration: {0}")]
    BackendRejected(String),
    /// The backend cannot honour a requested option.
    #[error("TLS backend {backend} does not support {option}")]
    UnsupportedOption {
        /// [`BackendAdapter::name`]
        backend: &'static str,
        /// What was asked for.
        option: String,
    },
    /// The request contradicts itself or the policy.
    #[error("invalid TLS parameters: {0}")]
    InvalidParams(String),
}

/// Per-connection parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    hostname: Option<String>,
    alpn: Vec<Vec<u8>>,
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
}

impl ConnectionParams {
    /// Parameters for a connection to `hostname`, a DNS name or an IP
    /// address.
    pub fn for_host(hostname: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
            ..Self::default()
        }
    }

    /// Offer `protocol` in ALPN, after any already added.
    pub fn with_alpn(mut self, protocol: impl Into<Vec<u8>>) -> Self {
        self.alpn.push(protocol.into());
        self
    }

    /// Raise the policy's version floor for this connection.
    pub fn with_min_version(mut self, v: TlsVersion) -> Self {
        self.min_version = Some(v);
        self
    }

    /// Lower the policy's version ceiling for this connection.
    pub fn with_max_version(mut self, v: TlsVersion) -> Self {
        self.max_version = Some(v);
        self
    }

    /// Host the peer is expected to be.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// ALPN protocols in preference order.
    pub fn alpn(&self) -> &[Vec<u8>] {
        &self.alpn
    }

    /// Version floor and optional ceiling after narrowing `policy` with
    /// these parameters. Parameters can only narrow the policy, never
    /// widen it.
    pub fn effective_versions(
        &self,
        policy: &VerificationPolicy,
    ) -> Result<(TlsVersion, Option<TlsVersion>), ConfigError> {
        let floor = self
            .min_version
            .map_or(policy.min_version(), |v| v.max(policy.min_version()));
        let ceiling = match (policy.max_version(), self.max_version) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match ceiling {
            Some(ceiling) if ceiling < floor => Err(ConfigError::InvalidParams(format!(
                "maximum version {} is below minimum version {}",
                ceiling, floor
            ))),
            _ => Ok((floor, ceiling)),
        }
    }
}

/// A concrete TLS library.
///
/// Adapters translate; they make no trust decisions of their own. Every
/// method except [`BackendAdapter::finalize`] mutates a native object
/// that is exclusively borrowed for the duration of the call.
pub trait BackendAdapter {
    /// Mutable configuration object of the library.
    type Native;
    /// Finished configuration handed to the handshake routine.
    type Config;

    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// A fresh native object with no trust anchors and no policy.
    fn new_native(&self) -> Result<Self::Native, ConfigError>;

    /// Make exactly the certificates of `store` the trust anchors of
    /// `native`. Applying the same store again changes nothing.
    fn apply_trust_store(
        &self,
        native: &mut Self::Native,
        store: &TrustStore,
    ) -> Result<(), ConfigError>;

    /// Translate `policy` and `params` into native settings. Options the
    /// library cannot honour fail with [`ConfigError::UnsupportedOption`]
    /// rather than being dropped.
    fn apply_policy(
        &self,
        native: &mut Self::Native,
        policy: &Arc<VerificationPolicy>,
        params: &ConnectionParams,
    ) -> Result<(), ConfigError>;

    /// Produce the finished configuration. Fails if either the trust
    /// store or the policy was never applied.
    fn finalize(&self, native: Self::Native) -> Result<Self::Config, ConfigError>;
}
