//! Backend-agnostic TLS client configuration for accessory bridges
//!
//! A bridge daemon talks TLS to many peers but should not care which TLS
//! library performs the handshake. This crate separates what is trusted
//! and accepted from how a particular library is configured:
//!
//! * [`TrustStore`] is the immutable set of trusted root certificates,
//!   loaded once at startup from the bundle compiled into the crate
//!   and/or a file, then shared by every connection.
//! * [`VerificationPolicy`] decides whether a peer's certificate chain is
//!   accepted: path building to a trusted root, validity window,
//!   revocation, hostname, and an optional application check.
//! * [`BackendAdapter`] injects both into a TLS library's native
//!   configuration object. [`RustlsAdapter`] does this for [`rustls`].
//! * [`TlsConfigBuilder`] drives an adapter and hands out opaque
//!   [`TlsConfig`]s.
//!
//! ```no_run
//! use pal_tls::{ConnectionParams, RustlsAdapter, TlsConfigBuilder, TrustSource, TrustStore,
//!     VerificationPolicy};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = TrustStore::init_process_default(&TrustSource::Embedded)?;
//! let policy = Arc::new(VerificationPolicy::default());
//! let config = TlsConfigBuilder::new(RustlsAdapter::default())
//!     .build_config(store, &policy, &ConnectionParams::for_host("hub.example.com"))?;
//! let client_config = config.native().client_config();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod adapter;
pub mod builder;
pub mod certificate;
pub mod crypto_provider;
mod hostname;
mod path;
pub mod policy;
pub mod rustls_backend;
pub mod trust_store;

pub use adapter::{BackendAdapter, ConfigError, ConnectionParams};
pub use builder::{TlsConfig, TlsConfigBuilder};
pub use certificate::Certificate;
pub use crypto_provider::RustlsCryptoProvider;
pub use policy::{
    ChainAcceptor, Rejection, RevocationList, TlsVersion, VerificationPolicy, VerifiedChain,
};
pub use rustls_backend::{RustlsAdapter, RustlsClientConfig};
#[cfg(feature = "args")]
pub use trust_store::TrustStoreArgs;
pub use trust_store::{LoadError, TrustSource, TrustStore};
