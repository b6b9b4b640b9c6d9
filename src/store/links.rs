//! Store for the user's dashboard links.

use color_eyre::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::api::{ApiClient, CreateLinkRequest, EntityKind, Link, LinkOrder, UpdateLinkRequest};
use crate::cache::{Cache, CacheKey};

use super::settings::SettingsStore;

/// Keyboard shortcut labels assigned to columns in display order.
pub const COLUMN_SHORTCUTS: [&str; 3] = ["Ctrl", "Ctrl+Shift", "Ctrl+Alt"];

/// In-memory link collection state.
#[derive(Debug, Clone, Default)]
pub struct LinksState {
  pub links: Vec<Link>,
  pub is_loading: bool,
  pub error: Option<String>,
}

/// Store owning the user's link collection.
///
/// Reads follow the read-through-cache, fetch-once discipline; mutations are
/// optimistic with full rollback. Every mutation snapshots the collection,
/// applies the change in memory, and calls the backend: success mirrors the
/// new collection into the cache, failure restores the snapshot and records
/// the error. The cache therefore always holds the last-known-good state.
#[derive(Clone)]
pub struct LinksStore {
  api: ApiClient,
  cache: Cache,
  settings: SettingsStore,
  state: Arc<Mutex<LinksState>>,
  fetch_gen: Arc<AtomicU64>,
}

impl LinksStore {
  pub fn new(api: ApiClient, cache: Cache, settings: SettingsStore) -> Self {
    Self {
      api,
      cache,
      settings,
      state: Arc::new(Mutex::new(LinksState::default())),
      fetch_gen: Arc::new(AtomicU64::new(0)),
    }
  }

  // State is plain data; a poisoned lock still holds a usable value.
  fn lock(&self) -> MutexGuard<'_, LinksState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn state(&self) -> LinksState {
    self.lock().clone()
  }

  pub fn links(&self) -> Vec<Link> {
    self.lock().links.clone()
  }

  /// Links in one column, in stored order.
  pub fn links_in_column(&self, column_type: &str) -> Vec<Link> {
    self
      .lock()
      .links
      .iter()
      .filter(|link| link.column_type == column_type)
      .cloned()
      .collect()
  }

  /// Distinct column types in first-seen order.
  pub fn column_types(&self) -> Vec<String> {
    let state = self.lock();
    let mut seen = Vec::new();
    for link in &state.links {
      if !seen.contains(&link.column_type) {
        seen.push(link.column_type.clone());
      }
    }
    seen
  }

  /// Shortcut label for a column, by its position among the column types.
  pub fn column_shortcut(&self, column_type: &str) -> Option<&'static str> {
    let index = self
      .column_types()
      .iter()
      .position(|c| c == column_type)?;
    COLUMN_SHORTCUTS.get(index).copied()
  }

  fn begin_fetch(&self) -> u64 {
    self.fetch_gen.fetch_add(1, Ordering::SeqCst) + 1
  }

  fn is_current(&self, generation: u64) -> bool {
    generation == self.fetch_gen.load(Ordering::SeqCst)
  }

  /// Adopt links without touching the cache (cache hydration path).
  pub(crate) fn hydrate(&self, links: Vec<Link>) {
    let mut state = self.lock();
    state.links = links;
    state.is_loading = false;
  }

  /// Adopt authoritative links from the backend and mirror the cache.
  /// Supersedes any in-flight fetch.
  pub(crate) fn apply_fresh(&self, links: Vec<Link>) {
    self.begin_fetch();
    {
      let mut state = self.lock();
      state.links = links.clone();
      state.is_loading = false;
    }
    self.cache.set(CacheKey::Links, &links);
  }

  pub(crate) fn reset(&self) {
    self.begin_fetch();
    *self.lock() = LinksState::default();
  }

  /// Fetch the link collection.
  ///
  /// A non-empty in-memory collection short-circuits (fetch-once guard). A
  /// cache hit hydrates immediately, possibly stale, and a background
  /// refresh reconciles with the backend without blocking the caller. With
  /// no cache entry the network fetch is awaited and authoritative.
  pub async fn fetch_links(&self) -> Result<()> {
    if !self.lock().links.is_empty() {
      debug!("Links already loaded, skipping fetch");
      return Ok(());
    }

    if let Some(cached) = self.cache.get::<Vec<Link>>(CacheKey::Links) {
      self.hydrate(cached);
      self.spawn_refresh();
      return Ok(());
    }

    let generation = self.begin_fetch();
    {
      let mut state = self.lock();
      state.is_loading = true;
      state.error = None;
    }

    match self.api.get_links().await {
      Ok(links) => {
        let mut state = self.lock();
        state.is_loading = false;
        if self.is_current(generation) {
          state.links = links.clone();
          drop(state);
          self.cache.set(CacheKey::Links, &links);
        }
        Ok(())
      }
      Err(e) => {
        let mut state = self.lock();
        state.is_loading = false;
        state.error = Some(e.to_string());
        Err(e)
      }
    }
  }

  fn spawn_refresh(&self) {
    let store = self.clone();
    let generation = self.begin_fetch();
    tokio::spawn(async move {
      match store.api.get_links().await {
        Ok(links) if store.is_current(generation) => store.apply_fresh(links),
        Ok(_) => debug!("Link refresh superseded, discarding"),
        // Stale hydrated state stays on screen; background failures only log
        Err(e) => warn!("Background link refresh failed: {}", e),
      }
    });
  }

  /// Create a link. A provisional entry appears immediately; the backend
  /// record (with its assigned id and order index) replaces it on success.
  pub async fn create_link(&self, request: CreateLinkRequest) -> Result<Link> {
    let fetch_metadata = self.settings.settings().metadata;
    let owner_id = self.api.session().user_id().unwrap_or_default();

    let (snapshot, provisional_index) = {
      let mut state = self.lock();
      let snapshot = state.links.clone();
      state.is_loading = true;
      state.error = None;

      let order_index = state
        .links
        .iter()
        .filter(|l| l.column_type == request.column_type)
        .map(|l| l.order_index)
        .max()
        .map_or(0, |i| i + 1);

      state.links.push(Link {
        id: String::new(),
        owner_id,
        owner_type: EntityKind::User,
        title: request.title.clone(),
        url: request.url.clone(),
        icon: request.icon.clone(),
        description: request.description.clone(),
        column_type: request.column_type.clone(),
        order_index,
        created_at: None,
      });
      (snapshot, state.links.len() - 1)
    };

    match self.api.create_link(&request, fetch_metadata).await {
      Ok(created) => {
        let links = {
          let mut state = self.lock();
          state.is_loading = false;
          match state.links.get_mut(provisional_index) {
            Some(slot) if slot.id.is_empty() => *slot = created.clone(),
            _ => state.links.push(created.clone()),
          }
          state.links.clone()
        };
        self.cache.set(CacheKey::Links, &links);
        Ok(created)
      }
      Err(e) => {
        let mut state = self.lock();
        state.links = snapshot;
        state.is_loading = false;
        state.error = Some(e.to_string());
        Err(e)
      }
    }
  }

  /// Replace a link in place by id.
  pub async fn update_link(&self, link: Link) -> Result<()> {
    let snapshot = {
      let mut state = self.lock();
      let snapshot = state.links.clone();
      state.is_loading = true;
      state.error = None;
      for existing in &mut state.links {
        if existing.id == link.id {
          *existing = link.clone();
        }
      }
      snapshot
    };

    match self.api.update_link(&UpdateLinkRequest::from(&link)).await {
      Ok(()) => {
        let links = {
          let mut state = self.lock();
          state.is_loading = false;
          state.links.clone()
        };
        self.cache.set(CacheKey::Links, &links);
        Ok(())
      }
      Err(e) => {
        let mut state = self.lock();
        state.links = snapshot;
        state.is_loading = false;
        state.error = Some(e.to_string());
        Err(e)
      }
    }
  }

  /// Delete a link by id.
  pub async fn remove_link(&self, link_id: &str) -> Result<()> {
    let snapshot = {
      let mut state = self.lock();
      let snapshot = state.links.clone();
      state.is_loading = true;
      state.error = None;
      state.links.retain(|link| link.id != link_id);
      snapshot
    };

    match self.api.delete_link(link_id).await {
      Ok(()) => {
        let links = {
          let mut state = self.lock();
          state.is_loading = false;
          state.links.clone()
        };
        self.cache.set(CacheKey::Links, &links);
        Ok(())
      }
      Err(e) => {
        let mut state = self.lock();
        state.links = snapshot;
        state.is_loading = false;
        state.error = Some(e.to_string());
        Err(e)
      }
    }
  }

  /// Reassign order indexes within a column to follow `ordered_ids`, then
  /// upsert the full collection. Last writer wins; indexes are dense within
  /// the column but not required contiguous across the collection.
  pub async fn reorder_column(&self, column_type: &str, ordered_ids: &[String]) -> Result<()> {
    let (snapshot, payload) = {
      let mut state = self.lock();
      let snapshot = state.links.clone();
      state.is_loading = true;
      state.error = None;

      for (index, id) in ordered_ids.iter().enumerate() {
        for link in &mut state.links {
          if &link.id == id && link.column_type == column_type {
            link.order_index = index as i64;
          }
        }
      }
      state.links.sort_by_key(|link| link.order_index);

      let payload: Vec<LinkOrder> = state.links.iter().map(LinkOrder::from).collect();
      (snapshot, payload)
    };

    match self.api.reorder_links(&payload).await {
      Ok(()) => {
        let links = {
          let mut state = self.lock();
          state.is_loading = false;
          state.links.clone()
        };
        self.cache.set(CacheKey::Links, &links);
        Ok(())
      }
      Err(e) => {
        let mut state = self.lock();
        state.links = snapshot;
        state.is_loading = false;
        state.error = Some(e.to_string());
        Err(e)
      }
    }
  }
}
