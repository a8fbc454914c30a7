//! Composition boundary.
//!
//! Wires the four containers to concrete collaborators (file storage, HTTP
//! auth client, wall clock). Core modules never reach for `AppStores::global()`;
//! it exists for the application shell that wants one process-wide bundle.

use std::sync::{Arc, OnceLock};

use crate::auth_api::{AuthApiError, AuthClient, AuthResponse, Credentials, HttpAuthClient};
use crate::clock::{system_clock, SharedClock};
use crate::config::StoreConfig;
use crate::data::DataStore;
use crate::error::StoreError;
use crate::insights::InsightsStore;
use crate::persistence::{FileStorage, MemoryStorage, SharedStorage};
use crate::session::SessionStore;
use crate::ui::UiStore;

/// The four independent containers.
pub struct AppStores {
    pub session: SessionStore,
    pub ui: UiStore,
    pub data: DataStore,
    pub insights: InsightsStore,
}

impl AppStores {
    /// Assemble from explicit collaborators.
    pub fn with_parts(
        config: &StoreConfig,
        storage: SharedStorage,
        auth: Arc<dyn AuthClient>,
        clock: SharedClock,
    ) -> Self {
        let session = SessionStore::new(storage.clone(), auth, clock.clone());
        session.set_session_timeout(config.session_timeout());

        Self {
            session,
            ui: UiStore::new(storage, clock.clone()),
            data: DataStore::new(clock.clone()).with_default_ttl(config.default_cache_ttl()),
            insights: InsightsStore::new(clock),
        }
    }

    /// File-backed storage under the configured state dir and the HTTP auth client.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let state_dir = config.resolved_state_dir()?;
        let storage = FileStorage::open(&state_dir)?;
        let auth = HttpAuthClient::from_config(&config.auth)
            .map_err(|e| StoreError::Config(format!("Invalid auth settings: {}", e)))?;
        log::info!(
            "State layer ready (state dir {}, auth {})",
            state_dir.display(),
            config.auth.base_url
        );
        Ok(Self::with_parts(
            config,
            Arc::new(storage),
            Arc::new(auth),
            system_clock(),
        ))
    }

    /// Process-wide bundle, built on first access.
    ///
    /// Falls back to memory-only storage when the configured state dir can't
    /// be used, so the UI still runs (without persistence) rather than aborting.
    pub fn global() -> &'static AppStores {
        static STORES: OnceLock<AppStores> = OnceLock::new();
        STORES.get_or_init(|| {
            let config = StoreConfig::load().unwrap_or_else(|e| {
                log::warn!("Failed to load config: {}. Using defaults.", e);
                StoreConfig::default()
            });
            match Self::from_config(&config) {
                Ok(stores) => stores,
                Err(e) => {
                    log::warn!(
                        "Persistent state unavailable: {}. {}",
                        e,
                        e.recovery_suggestion()
                    );
                    Self::memory_only(&config)
                }
            }
        })
    }

    fn memory_only(config: &StoreConfig) -> Self {
        let auth: Arc<dyn AuthClient> = match HttpAuthClient::from_config(&config.auth) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                log::warn!("Auth client unavailable: {}. Login is disabled.", e);
                Arc::new(OfflineAuth)
            }
        };
        Self::with_parts(config, Arc::new(MemoryStorage::new()), auth, system_clock())
    }
}

/// Auth client that rejects every request; used only when no HTTP client can be built.
struct OfflineAuth;

#[async_trait::async_trait]
impl AuthClient for OfflineAuth {
    async fn login(
        &self,
        _credentials: &Credentials,
    ) -> Result<AuthResponse, AuthApiError> {
        Ok(AuthResponse::rejected(
            "Authentication service is not configured",
        ))
    }

    async fn refresh(
        &self,
        _refresh_token: &str,
    ) -> Result<AuthResponse, AuthApiError> {
        Ok(AuthResponse::rejected(
            "Authentication service is not configured",
        ))
    }
}

/// Initialize `env_logger` with an `info` default, overridable via `RUST_LOG`.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
