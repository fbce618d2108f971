/// The application state is responsible for:
///
/// - Tracking the server lifecycle for the health probes
/// - Holding the wired singletons every handler needs: configuration,
///   identity provider, credential manager, Elasticsearch client, cache,
///   session store and proxy engine
///
/// Everything here is constructed once, after configuration validation,
/// and shared immutably for the life of the process.
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, Ordering},
};

use tracing::debug;

use crate::cache::CredentialCache;
use crate::config::{ElastauthConfig, OperationMode};
use crate::credentials::CredentialManager;
use crate::crypto::SecretKey;
use crate::errors::StartupError;
use crate::es::EsClient;
use crate::identity::{IdentityProvider, headers::HeaderIdentity, oidc::OidcIdentity};
use crate::server::proxy::ProxyEngine;
use crate::session::SessionStore;

/** Application lifecycle states. */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApplicationState {
    /// Unknown state, typically the initial state.
    Unknown = 0,
    /// The application is initializing.
    Initializing = 1,
    /// Starting network services.
    StartingNetwork = 2,
    /// The application is ready to serve requests.
    Ready = 3,
    /// The application is terminating.
    Terminating = 4,
}

// Shared application state.
pub struct GatewayState {
    /// Validated, immutable configuration.
    pub config: ElastauthConfig,
    /// Current application lifecycle state.
    pub state: AtomicU8,
    /// Whether OIDC discovery completed (always true after a direct-auth
    /// startup; present for the readiness report).
    pub discovery_ok: AtomicBool,
    /// The identity provider selected by the operation mode.
    pub provider: Arc<dyn IdentityProvider>,
    /// The OIDC provider's flow surface (login/callback), direct-auth only.
    pub oidc: Option<Arc<OidcIdentity>>,
    /// Session cookie codec, direct-auth only.
    pub sessions: Option<SessionStore>,
    /// Credential lifecycle manager.
    pub credentials: Arc<CredentialManager>,
    /// Elasticsearch admin client.
    pub es: Arc<EsClient>,
    /// Credential cache backend.
    pub cache: Arc<dyn CredentialCache>,
    /// Transparent proxy engine, direct-auth only.
    pub proxy: Option<ProxyEngine>,
}

impl GatewayState {
    /// Wire up all singletons from a validated configuration.
    ///
    /// In direct-auth mode this also runs OIDC discovery; a discovery
    /// failure is returned (and fatal at the call site).
    pub async fn build(config: ElastauthConfig) -> Result<Arc<Self>, StartupError> {
        let key = SecretKey::from_hex(&config.secret_key)
            .map_err(|e| StartupError::ConfigError(e.to_string()))?;

        let cache = crate::cache::build(&config.cache).await?;
        let es = Arc::new(EsClient::new(&config.elasticsearch)?);
        let credentials = Arc::new(CredentialManager::new(
            cache.clone(),
            es.clone(),
            key.clone(),
            config.roles.clone(),
            &config.cache,
            config.dry_run,
        ));

        let discovery_ok = AtomicBool::new(false);
        let (provider, oidc, sessions, proxy): (
            Arc<dyn IdentityProvider>,
            Option<Arc<OidcIdentity>>,
            Option<SessionStore>,
            Option<ProxyEngine>,
        ) = match config.mode() {
            OperationMode::ForwardAuth => {
                let provider: Arc<dyn IdentityProvider> =
                    Arc::new(HeaderIdentity::new(config.authelia.clone()));
                (provider, None, None, None)
            }
            OperationMode::DirectAuth => {
                let oidc_config = config
                    .oidc
                    .clone()
                    .ok_or_else(|| StartupError::ConfigError("oidc block missing".into()))?;
                let proxy_config = config
                    .proxy
                    .clone()
                    .ok_or_else(|| StartupError::ConfigError("proxy block missing".into()))?;

                let sessions = SessionStore::new(key.clone(), &config.session);
                let oidc = Arc::new(OidcIdentity::new(oidc_config, sessions.clone())?);
                oidc.discover().await?;
                discovery_ok.store(true, Ordering::Relaxed);

                let proxy = ProxyEngine::new(&proxy_config)?;
                let provider: Arc<dyn IdentityProvider> = oidc.clone();
                (provider, Some(oidc), Some(sessions), Some(proxy))
            }
        };

        Ok(Arc::new(Self {
            config,
            state: AtomicU8::new(ApplicationState::Initializing as u8),
            discovery_ok,
            provider,
            oidc,
            sessions,
            credentials,
            es,
            cache,
            proxy,
        }))
    }

    /// Set application lifecycle state.
    pub fn set_state(&self, value: ApplicationState) {
        let v = value as u8;
        debug!("Application state changed to {:?}", v);
        self.state.store(v, Ordering::Relaxed);
    }

    /// Returns true if the application is running (liveness check).
    pub fn is_alive(&self) -> bool {
        let state = self.state.load(Ordering::SeqCst);
        state >= ApplicationState::Initializing as u8
            && state < ApplicationState::Terminating as u8
    }

    /// Returns true if the application completed startup.
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::SeqCst) >= ApplicationState::Ready as u8
    }

    /// The active operation mode.
    pub fn mode(&self) -> OperationMode {
        self.config.mode()
    }
}
