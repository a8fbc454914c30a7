//! Id-keyed entity collections.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// The six server-originated collections held by the domain cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionKind {
    Users,
    Departments,
    Attendance,
    Tasks,
    Projects,
    Notifications,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 6] = [
        CollectionKind::Users,
        CollectionKind::Departments,
        CollectionKind::Attendance,
        CollectionKind::Tasks,
        CollectionKind::Projects,
        CollectionKind::Notifications,
    ];

    /// Name used as the `last_fetch` key.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Users => "users",
            CollectionKind::Departments => "departments",
            CollectionKind::Attendance => "attendance",
            CollectionKind::Tasks => "tasks",
            CollectionKind::Projects => "projects",
            CollectionKind::Notifications => "notifications",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Attendance and notifications are kept most-recent-first; new records go
    /// to the front. Everything else appends.
    pub fn inserts_at_front(&self) -> bool {
        matches!(
            self,
            CollectionKind::Attendance | CollectionKind::Notifications
        )
    }
}

/// Entity id as sent by the server: a string or a number.
///
/// Serializes back in its original form. Lookups compare the string form, so
/// `1` and `"1"` address the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Text(String),
    Number(Number),
}

impl RecordId {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            RecordId::Text(s) => s == key,
            RecordId::Number(n) => n.to_string() == key,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Text(s) => f.write_str(s),
            RecordId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl PartialEq<str> for RecordId {
    fn eq(&self, other: &str) -> bool {
        self.matches(other)
    }
}

impl PartialEq<&str> for RecordId {
    fn eq(&self, other: &&str) -> bool {
        self.matches(other)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Text(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        RecordId::Text(id)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        RecordId::Number(id.into())
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Number(id.into())
    }
}

/// A single entity. Everything except `id` is opaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Shallow merge. The id is fixed; an `id` key in `updates` is ignored.
    pub fn merge(&mut self, updates: Map<String, Value>) {
        for (key, value) in updates {
            if key == "id" {
                continue;
            }
            self.fields.insert(key, value);
        }
    }
}

/// Ordered list of records looked up by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collection {
    items: Vec<Record>,
}

impl Collection {
    pub fn from_vec(items: Vec<Record>) -> Self {
        Self { items }
    }

    pub fn as_slice(&self) -> &[Record] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.items.iter().find(|r| r.id.matches(id))
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|r| r.id.to_string()).collect()
    }

    pub fn push_back(&mut self, record: Record) {
        self.items.push(record);
    }

    pub fn push_front(&mut self, record: Record) {
        self.items.insert(0, record);
    }

    /// Apply `f` to the first record with `id`. Returns false when absent.
    pub fn update_with(&mut self, id: &str, f: impl FnOnce(&mut Record)) -> bool {
        match self.items.iter_mut().find(|r| r.id.matches(id)) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub fn update(&mut self, id: &str, updates: Map<String, Value>) -> bool {
        self.update_with(id, |r| r.merge(updates))
    }

    /// Swap in `record` at the position of the record with the same id.
    pub fn replace(&mut self, record: Record) -> bool {
        let key = record.id.to_string();
        match self.items.iter_mut().find(|r| r.id.matches(&key)) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        }
    }

    /// Drop every record with `id`. Returns true if any was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|r| !r.id.matches(id));
        self.items.len() != before
    }
}

impl FromIterator<Record> for Collection {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}
