//! Provide access to the process-global default [`CryptoProvider`] if there
//! is one, otherwise the crate-wide default one.

use rustls::crypto::CryptoProvider;
use std::sync::Arc;

/// The [`CryptoProvider`] used by
/// [`RustlsAdapter`](crate::rustls_backend::RustlsAdapter) for
/// handshakes and signature checks.
#[derive(Clone, Debug)]
pub struct RustlsCryptoProvider(Arc<CryptoProvider>);

impl RustlsCryptoProvider {
    /// Use a specific provider instead of the default.
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self(provider)
    }

    /// The selected provider.
    pub fn crypto_provider(&self) -> Arc<CryptoProvider> {
        Arc::clone(&self.0)
    }
}

impl Default for RustlsCryptoProvider {
    /// The process-global default [`CryptoProvider`] if one is installed,
    /// otherwise aws-lc-rs.
    fn default() -> Self {
        Self(
            CryptoProvider::get_default()
                .cloned()
                .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider())),
        )
    }
}
