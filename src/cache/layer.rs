//! Typed cache layer over a key-value storage backend.
//!
//! Entries are stored as `{timestamp, data}` under versioned, namespaced
//! keys. Every operation is best-effort: storage or serialization failures
//! are logged and degrade to a cache miss, they never reach the caller.

use chrono::{Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::KvStorage;

/// Namespace prefix for every storage key the application owns.
pub const CACHE_PREFIX: &str = "tabdeck_";
/// Schema version token. Bump to orphan entries written by older builds.
pub const CACHE_VERSION: &str = "v1_";

/// Logical cache entries the application recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey {
  User,
  Links,
  Settings,
  SearchEngine,
  AuthToken,
}

impl CacheKey {
  /// Every key the application recognizes, for `clear_all`.
  pub const ALL: [CacheKey; 5] = [
    CacheKey::User,
    CacheKey::Links,
    CacheKey::Settings,
    CacheKey::SearchEngine,
    CacheKey::AuthToken,
  ];

  fn name(self) -> &'static str {
    match self {
      CacheKey::User => "user",
      CacheKey::Links => "links",
      CacheKey::Settings => "settings",
      CacheKey::SearchEngine => "search_engine",
      CacheKey::AuthToken => "token",
    }
  }

  /// The namespaced, versioned string this key occupies in storage.
  pub fn storage_key(self) -> String {
    format!("{}{}{}", CACHE_PREFIX, CACHE_VERSION, self.name())
  }
}

/// On-disk shape of a cache entry.
#[derive(Serialize, Deserialize)]
struct Entry<T> {
  /// Epoch millis at write time. Write-only metadata unless the cache was
  /// built with an explicit `max_age`.
  timestamp: i64,
  data: T,
}

/// Persistent cache for application state.
#[derive(Clone)]
pub struct Cache {
  storage: Arc<dyn KvStorage>,
  max_age: Option<Duration>,
}

impl Cache {
  pub fn new(storage: impl KvStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
      max_age: None,
    }
  }

  /// Expire entries older than `max_age` on read. Without this, entries
  /// never expire and the recorded timestamp stays write-only metadata.
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = Some(max_age);
    self
  }

  /// Store a value under a key. Failures are logged and swallowed.
  pub fn set<T: Serialize>(&self, key: CacheKey, data: &T) {
    let entry = Entry {
      timestamp: Utc::now().timestamp_millis(),
      data,
    };

    let serialized = match serde_json::to_string(&entry) {
      Ok(s) => s,
      Err(e) => {
        warn!("Cache write failed for {}: {}", key.storage_key(), e);
        return;
      }
    };

    if let Err(e) = self.storage.put(&key.storage_key(), &serialized) {
      warn!("Cache write failed for {}: {}", key.storage_key(), e);
    }
  }

  /// Get the value stored under a key, or `None` on miss, expiry, or any
  /// storage/deserialization failure.
  pub fn get<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
    let raw = match self.storage.get(&key.storage_key()) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!("Cache read failed for {}: {}", key.storage_key(), e);
        return None;
      }
    };

    let entry: Entry<T> = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!("Cache entry malformed for {}: {}", key.storage_key(), e);
        return None;
      }
    };

    if let Some(max_age) = self.max_age {
      let age = Utc::now().timestamp_millis() - entry.timestamp;
      if age > max_age.num_milliseconds() {
        debug!("Cache entry expired for {}", key.storage_key());
        self.clear(key);
        return None;
      }
    }

    Some(entry.data)
  }

  /// Remove a single entry. Failures are logged and swallowed.
  pub fn clear(&self, key: CacheKey) {
    if let Err(e) = self.storage.remove(&key.storage_key()) {
      warn!("Cache clear failed for {}: {}", key.storage_key(), e);
    }
  }

  /// Remove every entry the application recognizes.
  pub fn clear_all(&self) {
    for key in CacheKey::ALL {
      self.clear(key);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use color_eyre::eyre::eyre;
  use color_eyre::Result;
  use serde_json::json;

  /// Storage whose every operation fails, for degradation tests.
  struct FailingStorage;

  impl KvStorage for FailingStorage {
    fn put(&self, _key: &str, _value: &str) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn get(&self, _key: &str) -> Result<Option<String>> {
      Err(eyre!("storage unavailable"))
    }

    fn remove(&self, _key: &str) -> Result<()> {
      Err(eyre!("storage unavailable"))
    }
  }

  #[test]
  fn set_then_get_returns_deep_equal_value() {
    let cache = Cache::new(MemoryStorage::new());
    let value = json!({
      "links": [{"id": "1", "title": "A", "nested": {"n": 42}}],
      "flag": true,
    });

    cache.set(CacheKey::Links, &value);
    let got: serde_json::Value = cache.get(CacheKey::Links).unwrap();
    assert_eq!(got, value);
  }

  #[test]
  fn miss_returns_none() {
    let cache = Cache::new(MemoryStorage::new());
    assert_eq!(cache.get::<serde_json::Value>(CacheKey::User), None);
  }

  #[test]
  fn failing_storage_degrades_to_miss_without_panicking() {
    let cache = Cache::new(FailingStorage);
    cache.set(CacheKey::User, &json!({"id": "u1"}));
    assert_eq!(cache.get::<serde_json::Value>(CacheKey::User), None);
    cache.clear_all();
  }

  #[test]
  fn clear_all_empties_every_known_key() {
    let cache = Cache::new(MemoryStorage::new());
    for key in CacheKey::ALL {
      cache.set(key, &json!("value"));
    }

    cache.clear_all();
    for key in CacheKey::ALL {
      assert_eq!(cache.get::<serde_json::Value>(key), None);
    }
  }

  #[test]
  fn malformed_entry_is_a_miss() {
    let storage = MemoryStorage::new();
    storage
      .put(&CacheKey::Settings.storage_key(), "not json")
      .unwrap();

    let cache = Cache::new(storage);
    assert_eq!(cache.get::<serde_json::Value>(CacheKey::Settings), None);
  }

  #[test]
  fn entries_expire_only_with_explicit_max_age() {
    let storage = MemoryStorage::new();
    let stale = serde_json::to_string(&Entry {
      timestamp: Utc::now().timestamp_millis() - 60_000,
      data: json!("old"),
    })
    .unwrap();
    storage.put(&CacheKey::User.storage_key(), &stale).unwrap();
    storage
      .put(&CacheKey::Links.storage_key(), &stale)
      .unwrap();

    // Default: timestamp is write-only metadata, entry still served
    let unlimited = Cache::new(storage);
    assert_eq!(
      unlimited.get::<serde_json::Value>(CacheKey::User),
      Some(json!("old"))
    );

    let bounded = unlimited.clone().with_max_age(Duration::seconds(30));
    assert_eq!(bounded.get::<serde_json::Value>(CacheKey::Links), None);
  }
}
