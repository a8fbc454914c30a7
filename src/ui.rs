//! Interface-state container.
//!
//! Transient UI bookkeeping: theme, sidebar, language, active tab, toast
//! notifications, modal visibility, and per-key loading/error flags that let
//! unrelated async flows report status without colliding. Only
//! `{sidebarCollapsed, theme, language, activeTab}` survive a reload
//! (`ui-storage`).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::clock::SharedClock;
use crate::persistence::{Persist, PersistedContainer, SharedStorage};

const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_TAB: &str = "dashboard";
const NOTIFICATION_RESERVED_KEYS: [&str; 2] = ["id", "createdAt"];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

/// Ephemeral toast. Caller fields (`type`, `title`, `message`, ...) are opaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UiNotification {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModalState {
    pub is_open: bool,
    pub props: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Breadcrumb {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Breadcrumb {
    pub fn new(label: impl Into<String>, path: Option<&str>) -> Self {
        Self {
            label: label.into(),
            path: path.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    pub sidebar_collapsed: bool,
    pub theme: Theme,
    pub language: String,
    pub notifications: Vec<UiNotification>,
    pub modals: BTreeMap<String, ModalState>,
    pub loading: BTreeMap<String, bool>,
    pub errors: BTreeMap<String, Value>,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub active_tab: String,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            sidebar_collapsed: false,
            theme: Theme::default(),
            language: DEFAULT_LANGUAGE.to_string(),
            notifications: Vec::new(),
            modals: BTreeMap::new(),
            loading: BTreeMap::new(),
            errors: BTreeMap::new(),
            breadcrumbs: Vec::new(),
            active_tab: DEFAULT_TAB.to_string(),
        }
    }
}

impl UiState {
    pub fn is_modal_open(&self, id: &str) -> bool {
        self.modals.get(id).map(|m| m.is_open).unwrap_or(false)
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.loading.get(key).copied().unwrap_or(false)
    }

    /// True if any key reports loading.
    pub fn any_loading(&self) -> bool {
        self.loading.values().any(|v| *v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    ToggleSidebar,
    SetSidebarCollapsed(bool),
    SetTheme(Theme),
    ToggleTheme,
    SetLanguage(String),
    AddNotification(UiNotification),
    RemoveNotification(String),
    ClearNotifications,
    OpenModal { id: String, props: Value },
    CloseModal(String),
    SetLoading { key: String, loading: bool },
    SetError { key: String, error: Value },
    ClearError(String),
    SetBreadcrumbs(Vec<Breadcrumb>),
    SetActiveTab(String),
}

pub fn reduce(state: &UiState, action: UiAction) -> UiState {
    let mut next = state.clone();
    match action {
        UiAction::ToggleSidebar => next.sidebar_collapsed = !next.sidebar_collapsed,
        UiAction::SetSidebarCollapsed(collapsed) => next.sidebar_collapsed = collapsed,
        UiAction::SetTheme(theme) => next.theme = theme,
        UiAction::ToggleTheme => next.theme = next.theme.toggled(),
        UiAction::SetLanguage(language) => next.language = language,
        UiAction::AddNotification(notification) => next.notifications.push(notification),
        UiAction::RemoveNotification(id) => next.notifications.retain(|n| n.id != id),
        UiAction::ClearNotifications => next.notifications.clear(),
        UiAction::OpenModal { id, props } => {
            next.modals.insert(
                id,
                ModalState {
                    is_open: true,
                    props,
                },
            );
        }
        UiAction::CloseModal(id) => {
            // props are retained; unknown ids are ignored
            if let Some(modal) = next.modals.get_mut(&id) {
                modal.is_open = false;
            }
        }
        UiAction::SetLoading { key, loading } => {
            next.loading.insert(key, loading);
        }
        UiAction::SetError { key, error } => {
            next.errors.insert(key, error);
        }
        UiAction::ClearError(key) => {
            next.errors.remove(&key);
        }
        UiAction::SetBreadcrumbs(breadcrumbs) => next.breadcrumbs = breadcrumbs,
        UiAction::SetActiveTab(tab) => next.active_tab = tab,
    }
    next
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedUi {
    #[serde(default)]
    pub sidebar_collapsed: bool,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_tab")]
    pub active_tab: String,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_tab() -> String {
    DEFAULT_TAB.to_string()
}

impl Persist for UiState {
    const STORE_NAME: &'static str = "ui-storage";
    type Persisted = PersistedUi;

    fn persisted(&self) -> PersistedUi {
        PersistedUi {
            sidebar_collapsed: self.sidebar_collapsed,
            theme: self.theme,
            language: self.language.clone(),
            active_tab: self.active_tab.clone(),
        }
    }

    fn rehydrate(p: PersistedUi) -> Self {
        UiState {
            sidebar_collapsed: p.sidebar_collapsed,
            theme: p.theme,
            language: p.language,
            active_tab: p.active_tab,
            ..UiState::default()
        }
    }
}

pub struct UiStore {
    state: PersistedContainer<UiState>,
    clock: SharedClock,
}

impl UiStore {
    pub fn new(storage: SharedStorage, clock: SharedClock) -> Self {
        Self {
            state: PersistedContainer::open(storage),
            clock,
        }
    }

    pub fn snapshot(&self) -> Arc<UiState> {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<UiState>> {
        self.state.subscribe()
    }

    pub fn dispatch(&self, action: UiAction) -> Arc<UiState> {
        self.state.transition(|s| reduce(s, action))
    }

    pub fn toggle_sidebar(&self) {
        self.dispatch(UiAction::ToggleSidebar);
    }

    pub fn set_sidebar_collapsed(&self, collapsed: bool) {
        self.dispatch(UiAction::SetSidebarCollapsed(collapsed));
    }

    pub fn set_theme(&self, theme: Theme) {
        self.dispatch(UiAction::SetTheme(theme));
    }

    pub fn toggle_theme(&self) {
        self.dispatch(UiAction::ToggleTheme);
    }

    pub fn set_language(&self, language: impl Into<String>) {
        self.dispatch(UiAction::SetLanguage(language.into()));
    }

    /// Append a toast and return its generated id. Caller-supplied `id` and
    /// `createdAt` keys are dropped.
    pub fn add_notification(&self, mut fields: Map<String, Value>) -> String {
        for reserved in NOTIFICATION_RESERVED_KEYS {
            fields.remove(reserved);
        }
        let id = uuid::Uuid::new_v4().to_string();
        let notification = UiNotification {
            id: id.clone(),
            created_at: self.clock.now(),
            fields,
        };
        self.dispatch(UiAction::AddNotification(notification));
        id
    }

    pub fn remove_notification(&self, id: &str) {
        self.dispatch(UiAction::RemoveNotification(id.to_string()));
    }

    pub fn clear_notifications(&self) {
        self.dispatch(UiAction::ClearNotifications);
    }

    pub fn open_modal(&self, id: impl Into<String>, props: Value) {
        self.dispatch(UiAction::OpenModal {
            id: id.into(),
            props,
        });
    }

    pub fn close_modal(&self, id: &str) {
        self.dispatch(UiAction::CloseModal(id.to_string()));
    }

    pub fn is_modal_open(&self, id: &str) -> bool {
        self.state.snapshot().is_modal_open(id)
    }

    pub fn modal_props(&self, id: &str) -> Option<Value> {
        self.state.snapshot().modals.get(id).map(|m| m.props.clone())
    }

    pub fn set_loading(&self, key: impl Into<String>, loading: bool) {
        self.dispatch(UiAction::SetLoading {
            key: key.into(),
            loading,
        });
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.state.snapshot().is_loading(key)
    }

    pub fn set_error(&self, key: impl Into<String>, error: Value) {
        self.dispatch(UiAction::SetError {
            key: key.into(),
            error,
        });
    }

    pub fn clear_error(&self, key: &str) {
        self.dispatch(UiAction::ClearError(key.to_string()));
    }

    pub fn error(&self, key: &str) -> Option<Value> {
        self.state.snapshot().errors.get(key).cloned()
    }

    pub fn set_breadcrumbs(&self, breadcrumbs: Vec<Breadcrumb>) {
        self.dispatch(UiAction::SetBreadcrumbs(breadcrumbs));
    }

    pub fn set_active_tab(&self, tab: impl Into<String>) {
        self.dispatch(UiAction::SetActiveTab(tab.into()));
    }
}
