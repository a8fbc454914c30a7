//! Client-side state layer for the operations dashboard.
//!
//! Four independent containers, each a pure reducer behind a watch channel:
//! - `session`: authentication, tokens, permissions, idle tracking (persisted)
//! - `ui`: theme, sidebar, modals, notifications, loading/error flags (partly persisted)
//! - `data`: server collections, reports, TTL cache, fetch staleness (memory only)
//! - `insights`: opaque analytic artifacts and analysis status (memory only)
//!
//! `app::AppStores` wires them to file storage, the HTTP auth client and the
//! system clock.

pub mod app;
pub mod auth_api;
pub mod clock;
pub mod config;
pub mod container;
pub mod data;
pub mod error;
pub mod insights;
pub mod persistence;
pub mod session;
pub mod ui;

pub use app::{init_logging, AppStores};
pub use auth_api::{AuthApiError, AuthClient, AuthResponse, Credentials, HttpAuthClient};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{AuthConfig, StoreConfig};
pub use data::collection::{Collection, CollectionKind, Record, RecordId};
pub use data::DataStore;
pub use error::StoreError;
pub use insights::{AnalysisStatus, InsightsStore};
pub use persistence::{FileStorage, MemoryStorage, StateStorage};
pub use session::{SessionStore, User};
pub use ui::{Theme, UiStore};
