//! Assembling backend configurations from a trust store, a policy and
//! connection parameters.

use std::fmt;
use std::sync::Arc;

use crate::adapter::{BackendAdapter, ConfigError, ConnectionParams};
use crate::policy::VerificationPolicy;
use crate::trust_store::TrustStore;

/// A finished configuration, ready for the handshake routine.
///
/// What it holds depends on the backend; for rustls it is a
/// [`RustlsClientConfig`](crate::rustls_backend::RustlsClientConfig).
pub struct TlsConfig<C> {
    config: C,
    hostname: Option<String>,
    backend: &'static str,
}

impl<C> TlsConfig<C> {
    /// The backend's configuration.
    pub fn native(&self) -> &C {
        &self.config
    }

    /// Take the backend's configuration.
    pub fn into_native(self) -> C {
        self.config
    }

    /// Host the peer is expected to be, if one was given.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// [`BackendAdapter::name`] of the backend that built this.
    pub fn backend(&self) -> &'static str {
        self.backend
    }
}

impl<C> fmt::Debug for TlsConfig<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("backend", &self.backend)
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

/// Produces [`TlsConfig`]s through one [`BackendAdapter`].
#[derive(Clone, Debug, Default)]
pub struct TlsConfigBuilder<A> {
    adapter: A,
}

impl<A: BackendAdapter> TlsConfigBuilder<A> {
    /// Build through `adapter`.
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    /// The adapter in use.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Build a configuration trusting `store` and enforcing `policy` for
    /// a connection described by `params`.
    ///
    /// The store and the policy are shared with the returned
    /// configuration, not copied.
    pub fn build_config(
        &self,
        store: &TrustStore,
        policy: &Arc<VerificationPolicy>,
        params: &ConnectionParams,
    ) -> Result<TlsConfig<A::Config>, ConfigError> {
        if policy.verify_hostname() && params.hostname().is_none() {
            return Err(ConfigError::InvalidParams(
                "hostname verification is required but no hostname was given".into(),
            ));
        }
        let mut native = self.adapter.new_native()?;
        self.adapter.apply_trust_store(&mut native, store)?;
        self.adapter.apply_policy(&mut native, policy, params)?;
        let config = self.adapter.finalize(native)?;
        log::debug!(
            "Built {} TLS configuration for {:?} trusting {} roots",
            self.adapter.name(),
            params.hostname(),
            store.len()
        );
        Ok(TlsConfig {
            config,
            hostname: params.hostname().map(str::to_owned),
            backend: self.adapter.name(),
        })
    }

    /// Like [`TlsConfigBuilder::build_config`] with the process-wide
    /// trust store. Fails if [`TrustStore::init_process_default`] has not
    /// succeeded yet.
    pub fn build_default_config(
        &self,
        policy: &Arc<VerificationPolicy>,
        params: &ConnectionParams,
    ) -> Result<TlsConfig<A::Config>, ConfigError> {
        let store = TrustStore::process_default().ok_or_else(|| {
            ConfigError::BackendRejected("the default trust store is not initialised".into())
        })?;
        self.build_config(store, policy, params)
    }
}
