//! Store for the user's preferred search engine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cache::{Cache, CacheKey};

/// A selectable search engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEngine {
  pub name: &'static str,
  pub url: &'static str,
}

/// Built-in engines, in display order. The first is the default.
pub const SEARCH_ENGINES: [SearchEngine; 4] = [
  SearchEngine {
    name: "Brave",
    url: "https://search.brave.com/search?q=",
  },
  SearchEngine {
    name: "Perplexity",
    url: "https://www.perplexity.ai/search?q=",
  },
  SearchEngine {
    name: "Google",
    url: "https://www.google.com/search?q=",
  },
  SearchEngine {
    name: "Bing",
    url: "https://www.bing.com/search?q=",
  },
];

/// Store holding the selected search engine, persisted through the cache.
#[derive(Clone)]
pub struct SearchEngineStore {
  cache: Cache,
  selected: Arc<Mutex<String>>,
}

impl SearchEngineStore {
  pub fn new(cache: Cache) -> Self {
    let selected = cache
      .get::<String>(CacheKey::SearchEngine)
      .unwrap_or_else(|| SEARCH_ENGINES[0].url.to_string());

    Self {
      cache,
      selected: Arc::new(Mutex::new(selected)),
    }
  }

  fn lock(&self) -> MutexGuard<'_, String> {
    self.selected.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn engines(&self) -> &'static [SearchEngine] {
    &SEARCH_ENGINES
  }

  pub fn selected(&self) -> String {
    self.lock().clone()
  }

  /// Select an engine by base URL and persist the choice.
  pub fn set_engine(&self, url: &str) {
    *self.lock() = url.to_string();
    self.cache.set(CacheKey::SearchEngine, &url);
  }

  /// Full search URL for a query against the selected engine.
  pub fn search_url(&self, query: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    format!("{}{}", self.lock(), encoded)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;

  #[test]
  fn defaults_to_the_first_engine() {
    let store = SearchEngineStore::new(Cache::new(MemoryStorage::new()));
    assert_eq!(store.selected(), SEARCH_ENGINES[0].url);
  }

  #[test]
  fn selection_survives_a_new_store_over_the_same_cache() {
    let cache = Cache::new(MemoryStorage::new());
    let store = SearchEngineStore::new(cache.clone());
    store.set_engine("https://www.google.com/search?q=");

    let reopened = SearchEngineStore::new(cache);
    assert_eq!(reopened.selected(), "https://www.google.com/search?q=");
  }

  #[test]
  fn search_url_encodes_the_query() {
    let store = SearchEngineStore::new(Cache::new(MemoryStorage::new()));
    assert_eq!(
      store.search_url("rust mutex poisoning"),
      "https://search.brave.com/search?q=rust+mutex+poisoning"
    );
  }
}
