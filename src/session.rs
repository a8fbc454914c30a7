//! Session container: identity, tokens, permissions and roles.
//!
//! Every operation is an action folded by `reduce`. The store applies it as a
//! single snapshot swap, then writes the persisted subset (`auth-storage`)
//! when that subset changed. Writes reach storage in the order of the swaps.
//!
//! Overlapping `login`/`refresh_session` calls are not serialized: each applies
//! its outcome when its request settles, so the last one to settle wins.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::auth_api::{AuthClient, AuthResponse, Credentials};
use crate::clock::SharedClock;
use crate::persistence::{Persist, PersistedContainer, SharedStorage};

/// Permission string that satisfies every permission check.
pub const WILDCARD_PERMISSION: &str = "*";

const DEFAULT_SESSION_TIMEOUT_MINS: i64 = 30;

/// Opaque user record as returned by the auth service.
pub type User = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    pub permissions: BTreeSet<String>,
    pub roles: BTreeSet<String>,
    pub last_activity: Option<DateTime<Utc>>,
    /// Idle threshold consulted by `is_idle`; nothing here enforces it.
    pub session_timeout: Duration,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            user: None,
            token: None,
            refresh_token: None,
            is_authenticated: false,
            permissions: BTreeSet::new(),
            roles: BTreeSet::new(),
            last_activity: None,
            session_timeout: Duration::minutes(DEFAULT_SESSION_TIMEOUT_MINS),
            is_loading: false,
            error: None,
        }
    }
}

impl SessionState {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(WILDCARD_PERMISSION) || self.permissions.contains(permission)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// True when there has been no recorded activity within the timeout.
    /// A session with no activity stamp is not considered idle.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        match self.last_activity {
            Some(at) => now - at > self.session_timeout,
            None => false,
        }
    }
}

/// Everything a successful login stores.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionGrant {
    pub user: Option<User>,
    pub token: String,
    pub refresh_token: Option<String>,
    pub permissions: Vec<String>,
    pub roles: Vec<String>,
}

impl SessionGrant {
    /// Accept a response only when it succeeded and carries an access token.
    pub fn from_response(resp: AuthResponse) -> Result<Self, String> {
        if !resp.success {
            return Err(resp.message.unwrap_or_else(|| "Login failed".to_string()));
        }
        let token = resp
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "Login response did not include an access token".to_string())?;
        Ok(Self {
            user: resp.user,
            token,
            refresh_token: resp.refresh_token,
            permissions: resp.permissions,
            roles: resp.roles,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    LoginStarted,
    LoginSucceeded { grant: SessionGrant, at: DateTime<Utc> },
    LoginFailed { message: String },
    Logout,
    UpdateUser(User),
    TokensRefreshed {
        token: String,
        refresh_token: Option<String>,
        at: DateTime<Utc>,
    },
    Touch { at: DateTime<Utc> },
    ClearError,
    SetSessionTimeout(Duration),
}

pub fn reduce(state: &SessionState, action: SessionAction) -> SessionState {
    let mut next = state.clone();
    match action {
        SessionAction::LoginStarted => {
            next.is_loading = true;
            next.error = None;
        }
        SessionAction::LoginSucceeded { grant, at } => {
            next.user = grant.user;
            next.token = Some(grant.token);
            next.refresh_token = grant.refresh_token;
            next.permissions = grant.permissions.into_iter().collect();
            next.roles = grant.roles.into_iter().collect();
            next.is_authenticated = true;
            next.last_activity = Some(at);
            next.is_loading = false;
            next.error = None;
        }
        SessionAction::LoginFailed { message } => {
            next.is_loading = false;
            next.error = Some(message);
        }
        SessionAction::Logout => {
            next = SessionState {
                session_timeout: state.session_timeout,
                ..SessionState::default()
            };
        }
        SessionAction::UpdateUser(partial) => {
            if let Some(user) = next.user.as_mut() {
                for (key, value) in partial {
                    user.insert(key, value);
                }
            }
        }
        SessionAction::TokensRefreshed {
            token,
            refresh_token,
            at,
        } => {
            next.token = Some(token);
            if refresh_token.is_some() {
                next.refresh_token = refresh_token;
            }
            next.is_authenticated = true;
            next.last_activity = Some(at);
        }
        SessionAction::Touch { at } => {
            next.last_activity = Some(at);
        }
        SessionAction::ClearError => {
            next.error = None;
        }
        SessionAction::SetSessionTimeout(timeout) => {
            next.session_timeout = timeout;
        }
    }
    next
}

// ============================================================================
// Persisted subset
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Persist for SessionState {
    const STORE_NAME: &'static str = "auth-storage";
    type Persisted = PersistedSession;

    fn persisted(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            token: self.token.clone(),
            refresh_token: self.refresh_token.clone(),
            is_authenticated: self.is_authenticated,
            permissions: self.permissions.clone(),
            roles: self.roles.clone(),
        }
    }

    fn rehydrate(p: PersistedSession) -> Self {
        // a stored flag without a token would break the authentication invariant
        let is_authenticated = p.is_authenticated && p.token.is_some();
        SessionState {
            user: p.user,
            token: p.token,
            refresh_token: p.refresh_token,
            is_authenticated,
            permissions: p.permissions,
            roles: p.roles,
            ..SessionState::default()
        }
    }
}

// ============================================================================
// Store
// ============================================================================

pub struct SessionStore {
    state: PersistedContainer<SessionState>,
    client: Arc<dyn AuthClient>,
    clock: SharedClock,
}

impl SessionStore {
    /// Build the container, rehydrating the persisted subset from `storage`.
    pub fn new(storage: SharedStorage, client: Arc<dyn AuthClient>, clock: SharedClock) -> Self {
        let state = PersistedContainer::<SessionState>::open(storage);
        if state.snapshot().is_authenticated {
            log::info!("Restored authenticated session from storage");
        }
        Self {
            state,
            client,
            clock,
        }
    }

    pub fn snapshot(&self) -> Arc<SessionState> {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionState>> {
        self.state.subscribe()
    }

    pub fn dispatch(&self, action: SessionAction) -> Arc<SessionState> {
        self.state.transition(|s| reduce(s, action))
    }

    /// Authenticate. Returns whether the session is now authenticated by this call.
    pub async fn login(&self, credentials: &Credentials) -> bool {
        self.dispatch(SessionAction::LoginStarted);

        let outcome = match self.client.login(credentials).await {
            Ok(resp) => SessionGrant::from_response(resp),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(grant) => {
                log::info!("Login succeeded for {}", credentials.email);
                let at = self.clock.now();
                self.dispatch(SessionAction::LoginSucceeded { grant, at });
                true
            }
            Err(message) => {
                log::warn!("Login failed for {}: {}", credentials.email, message);
                self.dispatch(SessionAction::LoginFailed { message });
                false
            }
        }
    }

    pub fn logout(&self) {
        log::info!("Logging out");
        self.dispatch(SessionAction::Logout);
    }

    /// Shallow-merge into the current user. No-op when nobody is signed in.
    pub fn update_user(&self, partial: User) {
        self.dispatch(SessionAction::UpdateUser(partial));
    }

    /// Exchange the refresh token for new tokens.
    ///
    /// Returns `false` without touching the network when no refresh token is
    /// held. On failure the existing tokens are kept.
    pub async fn refresh_session(&self) -> bool {
        let Some(refresh_token) = self.state.snapshot().refresh_token.clone() else {
            log::debug!("No refresh token held, skipping session refresh");
            return false;
        };

        let resp = match self.client.refresh(&refresh_token).await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("Session refresh failed: {}", e);
                return false;
            }
        };

        let token = match resp.token.filter(|t| !t.is_empty()) {
            Some(token) if resp.success => token,
            _ => {
                log::warn!(
                    "Session refresh rejected: {}",
                    resp.message.as_deref().unwrap_or("no token in response")
                );
                return false;
            }
        };

        let at = self.clock.now();
        self.dispatch(SessionAction::TokensRefreshed {
            token,
            refresh_token: resp.refresh_token,
            at,
        });
        true
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.state.snapshot().has_permission(permission)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.state.snapshot().has_role(role)
    }

    pub fn update_activity(&self) {
        let at = self.clock.now();
        self.dispatch(SessionAction::Touch { at });
    }

    pub fn is_idle(&self) -> bool {
        self.state.snapshot().is_idle(self.clock.now())
    }

    pub fn set_session_timeout(&self, timeout: Duration) {
        self.dispatch(SessionAction::SetSessionTimeout(timeout));
    }

    pub fn clear_error(&self) {
        self.dispatch(SessionAction::ClearError);
    }
}
