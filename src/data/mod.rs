//! Domain-cache container.
//!
//! Holds the last-known-good snapshot of server collections, a reports map, a
//! generic TTL cache and per-collection fetch stamps. Memory only: after a full
//! reload everything must be refetched.
//!
//! Modules:
//! - collection: id-keyed records and the six collection kinds
//! - cache: TTL validity and staleness rules

pub mod cache;
pub mod collection;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::clock::SharedClock;
use crate::container::Container;

pub use cache::{default_cache_ttl, is_stale, CacheEntry};
pub use collection::{Collection, CollectionKind, Record, RecordId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataState {
    pub users: Collection,
    pub departments: Collection,
    pub attendance: Collection,
    pub tasks: Collection,
    pub projects: Collection,
    pub notifications: Collection,
    pub reports: BTreeMap<String, Value>,
    pub cache: BTreeMap<String, CacheEntry>,
    pub last_fetch: BTreeMap<String, DateTime<Utc>>,
}

impl DataState {
    pub fn collection(&self, kind: CollectionKind) -> &Collection {
        match kind {
            CollectionKind::Users => &self.users,
            CollectionKind::Departments => &self.departments,
            CollectionKind::Attendance => &self.attendance,
            CollectionKind::Tasks => &self.tasks,
            CollectionKind::Projects => &self.projects,
            CollectionKind::Notifications => &self.notifications,
        }
    }

    fn collection_mut(&mut self, kind: CollectionKind) -> &mut Collection {
        match kind {
            CollectionKind::Users => &mut self.users,
            CollectionKind::Departments => &mut self.departments,
            CollectionKind::Attendance => &mut self.attendance,
            CollectionKind::Tasks => &mut self.tasks,
            CollectionKind::Projects => &mut self.projects,
            CollectionKind::Notifications => &mut self.notifications,
        }
    }

    pub fn unread_notifications(&self) -> usize {
        self.notifications
            .iter()
            .filter(|n| n.get("read").and_then(Value::as_bool) != Some(true))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataAction {
    SetCollection {
        kind: CollectionKind,
        items: Vec<Record>,
        at: DateTime<Utc>,
    },
    Add { kind: CollectionKind, record: Record },
    Update {
        kind: CollectionKind,
        id: String,
        updates: Map<String, Value>,
    },
    Replace { kind: CollectionKind, record: Record },
    Remove { kind: CollectionKind, id: String },
    MarkNotificationRead { id: String, at: DateTime<Utc> },
    SetReport { key: String, payload: Value },
    MarkFetched { key: String, at: DateTime<Utc> },
    SetCache { key: String, entry: CacheEntry },
    ClearCache(Option<String>),
    Reset,
}

pub fn reduce(state: &DataState, action: DataAction) -> DataState {
    let mut next = state.clone();
    match action {
        DataAction::SetCollection { kind, items, at } => {
            *next.collection_mut(kind) = Collection::from_vec(items);
            next.last_fetch.insert(kind.as_str().to_string(), at);
        }
        DataAction::Add { kind, record } => {
            let collection = next.collection_mut(kind);
            if kind.inserts_at_front() {
                collection.push_front(record);
            } else {
                collection.push_back(record);
            }
        }
        DataAction::Update { kind, id, updates } => {
            next.collection_mut(kind).update(&id, updates);
        }
        DataAction::Replace { kind, record } => {
            next.collection_mut(kind).replace(record);
        }
        DataAction::Remove { kind, id } => {
            next.collection_mut(kind).remove(&id);
        }
        DataAction::MarkNotificationRead { id, at } => {
            next.notifications.update_with(&id, |n| {
                n.fields.insert("read".into(), Value::Bool(true));
                n.fields.insert("readAt".into(), Value::String(at.to_rfc3339()));
            });
        }
        DataAction::SetReport { key, payload } => {
            next.reports.insert(key, payload);
        }
        DataAction::MarkFetched { key, at } => {
            next.last_fetch.insert(key, at);
        }
        DataAction::SetCache { key, entry } => {
            next.cache.insert(key, entry);
        }
        DataAction::ClearCache(Some(key)) => {
            next.cache.remove(&key);
        }
        DataAction::ClearCache(None) => next.cache.clear(),
        DataAction::Reset => next = DataState::default(),
    }
    next
}

pub struct DataStore {
    state: Container<DataState>,
    clock: SharedClock,
    default_ttl: Duration,
}

impl DataStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: Container::default(),
            clock,
            default_ttl: default_cache_ttl(),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn snapshot(&self) -> Arc<DataState> {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DataState>> {
        self.state.subscribe()
    }

    pub fn dispatch(&self, action: DataAction) -> Arc<DataState> {
        self.state.transition(|s| reduce(s, action)).1
    }

    // ------------------------------------------------------------------
    // Generic collection operations
    // ------------------------------------------------------------------

    /// Replace a whole collection and stamp its fetch time.
    pub fn set_collection(&self, kind: CollectionKind, items: Vec<Record>) {
        log::debug!("Replacing {} with {} records", kind.as_str(), items.len());
        let at = self.clock.now();
        self.dispatch(DataAction::SetCollection { kind, items, at });
    }

    pub fn add(&self, kind: CollectionKind, record: Record) {
        self.dispatch(DataAction::Add { kind, record });
    }

    /// Shallow-merge `updates` into the record with `id`; silently ignored
    /// when no such record exists.
    pub fn update(&self, kind: CollectionKind, id: &str, updates: Map<String, Value>) {
        self.dispatch(DataAction::Update {
            kind,
            id: id.to_string(),
            updates,
        });
    }

    pub fn remove(&self, kind: CollectionKind, id: &str) {
        self.dispatch(DataAction::Remove {
            kind,
            id: id.to_string(),
        });
    }

    pub fn get(&self, kind: CollectionKind, id: &str) -> Option<Record> {
        self.state.snapshot().collection(kind).get(id).cloned()
    }

    /// Apply an update immediately, then restore the previous record if
    /// `commit` fails. The commit result is returned unchanged.
    pub async fn optimistic_update<F, T, E>(
        &self,
        kind: CollectionKind,
        id: &str,
        updates: Map<String, Value>,
        commit: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let previous = self.get(kind, id);
        self.update(kind, id, updates);

        match commit.await {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Some(record) = previous {
                    log::warn!(
                        "Rolling back optimistic update of {} '{}': {}",
                        kind.as_str(),
                        id,
                        e
                    );
                    self.dispatch(DataAction::Replace { kind, record });
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Named collection helpers
    // ------------------------------------------------------------------

    pub fn set_users(&self, items: Vec<Record>) {
        self.set_collection(CollectionKind::Users, items);
    }

    pub fn add_user(&self, record: Record) {
        self.add(CollectionKind::Users, record);
    }

    pub fn update_user(&self, id: &str, updates: Map<String, Value>) {
        self.update(CollectionKind::Users, id, updates);
    }

    pub fn remove_user(&self, id: &str) {
        self.remove(CollectionKind::Users, id);
    }

    pub fn set_departments(&self, items: Vec<Record>) {
        self.set_collection(CollectionKind::Departments, items);
    }

    pub fn add_department(&self, record: Record) {
        self.add(CollectionKind::Departments, record);
    }

    pub fn update_department(&self, id: &str, updates: Map<String, Value>) {
        self.update(CollectionKind::Departments, id, updates);
    }

    pub fn remove_department(&self, id: &str) {
        self.remove(CollectionKind::Departments, id);
    }

    pub fn set_attendance(&self, items: Vec<Record>) {
        self.set_collection(CollectionKind::Attendance, items);
    }

    /// Prepends: attendance is most-recent-first.
    pub fn add_attendance(&self, record: Record) {
        self.add(CollectionKind::Attendance, record);
    }

    pub fn update_attendance(&self, id: &str, updates: Map<String, Value>) {
        self.update(CollectionKind::Attendance, id, updates);
    }

    pub fn remove_attendance(&self, id: &str) {
        self.remove(CollectionKind::Attendance, id);
    }

    pub fn set_tasks(&self, items: Vec<Record>) {
        self.set_collection(CollectionKind::Tasks, items);
    }

    pub fn add_task(&self, record: Record) {
        self.add(CollectionKind::Tasks, record);
    }

    pub fn update_task(&self, id: &str, updates: Map<String, Value>) {
        self.update(CollectionKind::Tasks, id, updates);
    }

    pub fn remove_task(&self, id: &str) {
        self.remove(CollectionKind::Tasks, id);
    }

    pub fn set_projects(&self, items: Vec<Record>) {
        self.set_collection(CollectionKind::Projects, items);
    }

    pub fn add_project(&self, record: Record) {
        self.add(CollectionKind::Projects, record);
    }

    pub fn update_project(&self, id: &str, updates: Map<String, Value>) {
        self.update(CollectionKind::Projects, id, updates);
    }

    pub fn remove_project(&self, id: &str) {
        self.remove(CollectionKind::Projects, id);
    }

    pub fn set_notifications(&self, items: Vec<Record>) {
        self.set_collection(CollectionKind::Notifications, items);
    }

    /// Prepends: notifications are most-recent-first.
    pub fn add_notification(&self, record: Record) {
        self.add(CollectionKind::Notifications, record);
    }

    pub fn update_notification(&self, id: &str, updates: Map<String, Value>) {
        self.update(CollectionKind::Notifications, id, updates);
    }

    pub fn mark_notification_read(&self, id: &str) {
        let at = self.clock.now();
        self.dispatch(DataAction::MarkNotificationRead {
            id: id.to_string(),
            at,
        });
    }

    pub fn remove_notification(&self, id: &str) {
        self.remove(CollectionKind::Notifications, id);
    }

    // ------------------------------------------------------------------
    // Reports, cache and staleness
    // ------------------------------------------------------------------

    pub fn set_report(&self, key: impl Into<String>, payload: Value) {
        self.dispatch(DataAction::SetReport {
            key: key.into(),
            payload,
        });
    }

    pub fn report(&self, key: &str) -> Option<Value> {
        self.state.snapshot().reports.get(key).cloned()
    }

    pub fn set_cache(&self, key: impl Into<String>, data: Value, ttl: Duration) {
        let entry = CacheEntry::new(data, self.clock.now(), ttl);
        self.dispatch(DataAction::SetCache {
            key: key.into(),
            entry,
        });
    }

    pub fn set_cache_default(&self, key: impl Into<String>, data: Value) {
        self.set_cache(key, data, self.default_ttl);
    }

    /// Cached value if still within its TTL. Expired entries read as `None`
    /// and are left in place.
    pub fn get_cache(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        self.state
            .snapshot()
            .cache
            .get(key)
            .and_then(|entry| entry.value_at(now))
            .cloned()
    }

    /// Clear one entry, or the whole cache when `key` is `None`.
    pub fn clear_cache(&self, key: Option<&str>) {
        self.dispatch(DataAction::ClearCache(key.map(str::to_string)));
    }

    pub fn is_data_stale(&self, key: &str, max_age: Duration) -> bool {
        let last = self.state.snapshot().last_fetch.get(key).copied();
        is_stale(last, self.clock.now(), max_age)
    }

    /// Stamp a fetch for a key that is not one of the six collections.
    pub fn mark_fetched(&self, key: impl Into<String>) {
        let at = self.clock.now();
        self.dispatch(DataAction::MarkFetched {
            key: key.into(),
            at,
        });
    }

    pub fn reset(&self) {
        self.dispatch(DataAction::Reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use serde_json::json;

    fn store() -> (DataStore, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        (DataStore::new(Arc::new(clock.clone())), clock)
    }

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn updates(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_cache_ttl_boundary() {
        let (store, clock) = store();
        store.set_cache("k", json!({ "v": 1 }), Duration::milliseconds(1000));
        assert_eq!(store.get_cache("k"), Some(json!({ "v": 1 })));

        clock.advance(Duration::milliseconds(1000));
        assert_eq!(store.get_cache("k"), None);
        // expired entry is still held
        assert!(store.snapshot().cache.contains_key("k"));

        store.set_cache("k", json!({ "v": 2 }), Duration::milliseconds(1000));
        assert_eq!(store.get_cache("k"), Some(json!({ "v": 2 })));

        store.clear_cache(Some("k"));
        assert!(!store.snapshot().cache.contains_key("k"));
        store.clear_cache(Some("k"));
    }

    #[test]
    fn test_clear_whole_cache_and_default_ttl() {
        let (store, clock) = store();
        store.set_cache_default("a", json!(1));
        store.set_cache_default("b", json!(2));

        clock.advance(Duration::minutes(4));
        assert_eq!(store.get_cache("a"), Some(json!(1)));
        clock.advance(Duration::minutes(1));
        assert_eq!(store.get_cache("a"), None);

        store.clear_cache(None);
        assert!(store.snapshot().cache.is_empty());
        assert_eq!(store.get_cache("missing"), None);
    }

    #[test]
    fn test_staleness_without_fetch_and_after_set() {
        let (store, clock) = store();
        assert!(store.is_data_stale("projects", Duration::days(365)));

        store.set_projects(vec![record(json!({ "id": "p-1", "name": "Atlas" }))]);
        assert!(!store.is_data_stale("projects", Duration::minutes(5)));

        clock.advance(Duration::minutes(6));
        assert!(store.is_data_stale("projects", Duration::minutes(5)));
        assert!(store.is_data_stale("tasks", Duration::minutes(5)));

        store.mark_fetched("reports:revenue");
        assert!(!store.is_data_stale("reports:revenue", Duration::minutes(5)));
    }

    #[test]
    fn test_update_missing_id_is_noop() {
        let (store, _) = store();
        store.set_tasks(vec![
            record(json!({ "id": "t-1", "status": "open" })),
            record(json!({ "id": "t-2", "status": "review" })),
        ]);
        let before = serde_json::to_vec(&store.snapshot().tasks).unwrap();

        store.update_task("nonexistent-id", updates(json!({ "status": "done" })));
        store.update_user("nobody", updates(json!({ "name": "x" })));

        let after = serde_json::to_vec(&store.snapshot().tasks).unwrap();
        assert_eq!(before, after);
        assert!(store.snapshot().users.is_empty());
    }

    #[test]
    fn test_update_merges_shallowly() {
        let (store, _) = store();
        store.add_task(record(json!({ "id": "t-1", "status": "open", "owner": "ada" })));
        store.update_task("t-1", updates(json!({ "status": "done" })));

        let task = store.get(CollectionKind::Tasks, "t-1").unwrap();
        assert_eq!(task.get("status"), Some(&json!("done")));
        assert_eq!(task.get("owner"), Some(&json!("ada")));
    }

    #[test]
    fn test_notification_and_attendance_prepend_others_append() {
        let (store, _) = store();
        store.add_notification(record(json!({ "id": "n1" })));
        store.add_notification(record(json!({ "id": "n2" })));
        assert_eq!(store.snapshot().notifications.ids(), vec!["n2", "n1"]);

        store.add_attendance(record(json!({ "id": "a1" })));
        store.add_attendance(record(json!({ "id": "a2" })));
        assert_eq!(store.snapshot().attendance.ids(), vec!["a2", "a1"]);

        store.add_project(record(json!({ "id": "p1" })));
        store.add_project(record(json!({ "id": "p2" })));
        assert_eq!(store.snapshot().projects.ids(), vec!["p1", "p2"]);
    }

    #[test]
    fn test_mark_notification_read() {
        let (store, clock) = store();
        store.set_notifications(vec![
            record(json!({ "id": "n1", "read": false })),
            record(json!({ "id": "n2", "read": false })),
        ]);
        assert_eq!(store.snapshot().unread_notifications(), 2);

        store.mark_notification_read("n1");
        store.mark_notification_read("missing");

        let s = store.snapshot();
        let n1 = s.notifications.get("n1").unwrap();
        assert_eq!(n1.get("read"), Some(&json!(true)));
        assert_eq!(n1.get("readAt"), Some(&json!(clock.now().to_rfc3339())));
        assert_eq!(s.unread_notifications(), 1);
        assert_eq!(s.notifications.len(), 2);
    }

    #[test]
    fn test_remove_filters_by_id() {
        let (store, _) = store();
        store.set_departments(vec![
            record(json!({ "id": "d1" })),
            record(json!({ "id": "d2" })),
        ]);
        store.remove_department("d1");
        store.remove_department("d9");
        assert_eq!(store.snapshot().departments.ids(), vec!["d2"]);
    }

    #[test]
    fn test_attendance_and_notification_helpers() {
        let (store, _) = store();
        store.set_attendance(vec![
            record(json!({ "id": 7, "status": "present" })),
            record(json!({ "id": 8, "status": "late" })),
        ]);
        store.remove_attendance("7");
        assert_eq!(store.snapshot().attendance.ids(), vec!["8"]);

        store.add_notification(record(json!({ "id": "n1", "title": "Deploy" })));
        store.update_notification("n1", updates(json!({ "title": "Deployed" })));
        let n1 = store.get(CollectionKind::Notifications, "n1").unwrap();
        assert_eq!(n1.get("title"), Some(&json!("Deployed")));
    }

    #[test]
    fn test_reports_and_reset() {
        let (store, _) = store();
        store.set_report("revenue", json!({ "total": 1200 }));
        store.set_users(vec![record(json!({ "id": "u1" }))]);
        assert_eq!(store.report("revenue"), Some(json!({ "total": 1200 })));

        store.reset();
        assert_eq!(*store.snapshot(), DataState::default());
    }

    #[tokio::test]
    async fn test_optimistic_update_commits() {
        let (store, _) = store();
        store.add_task(record(json!({ "id": "t-1", "status": "open" })));

        let result: Result<u32, String> = store
            .optimistic_update(
                CollectionKind::Tasks,
                "t-1",
                updates(json!({ "status": "done" })),
                async { Ok(7) },
            )
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(
            store.get(CollectionKind::Tasks, "t-1").unwrap().get("status"),
            Some(&json!("done"))
        );
    }

    #[tokio::test]
    async fn test_optimistic_update_rolls_back_on_error() {
        let (store, _) = store();
        store.add_task(record(json!({ "id": "t-1", "status": "open" })));
        let rx = store.subscribe();

        let seen_during_commit = async {
            // the optimistic value is visible before the commit settles
            let status = store
                .get(CollectionKind::Tasks, "t-1")
                .and_then(|t| t.get("status").cloned());
            assert_eq!(status, Some(json!("done")));
            Err::<(), String>("server said no".to_string())
        };

        let result = store
            .optimistic_update(
                CollectionKind::Tasks,
                "t-1",
                updates(json!({ "status": "done" })),
                seen_during_commit,
            )
            .await;

        assert_eq!(result, Err("server said no".to_string()));
        assert_eq!(
            store.get(CollectionKind::Tasks, "t-1").unwrap().get("status"),
            Some(&json!("open"))
        );
        assert!(rx.has_changed().unwrap());
    }
}
