//! Elastauth: a stateless authentication gateway for Elasticsearch and
//! Kibana.
//!
//! The gateway translates an externally established identity into a
//! per-user local Elasticsearch account with an ephemeral password, then
//! either answers with an HTTP Basic `Authorization` header for a reverse
//! proxy to inject (forward-auth mode) or transparently proxies the
//! request to Elasticsearch itself (direct-auth mode, with a full OIDC
//! browser login).
//!
//! # Module layout
//!
//! - [`config`] - layered configuration with a single validation pass
//! - [`identity`] - the provider abstraction and its two implementations
//! - [`session`] - the encrypted cookie session for the OIDC flow
//! - [`credentials`] - ephemeral password lifecycle and role mapping
//! - [`cache`] - the keyed ciphertext cache and its backends
//! - [`es`] - the multi-host Elasticsearch admin client
//! - [`server`] - router, handlers, and the transparent proxy engine
//! - [`metrics`] - counters, histograms, and the exposition endpoint

pub mod cache;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod errors;
pub mod es;
pub mod identity;
pub mod metrics;
pub mod server;
pub mod session;
pub mod state;
