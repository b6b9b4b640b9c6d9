//! Store for per-user feature toggles.

use color_eyre::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::api::{ApiClient, SettingKey, UserSettings};
use crate::cache::{Cache, CacheKey};

/// In-memory settings state.
#[derive(Debug, Clone, Default)]
pub struct SettingsState {
  pub settings: UserSettings,
  /// Whether the toggles came from cache or network rather than defaults.
  /// Guards redundant fetches; all-false is a valid saved state.
  pub hydrated: bool,
  pub is_loading: bool,
  pub error: Option<String>,
}

/// Store owning the user's settings record.
///
/// Mutations are optimistic with full rollback: the toggle flips in memory
/// first, the full settings object is PUT to the backend, and on failure the
/// pre-mutation state is restored and the error recorded. The cache always
/// mirrors the last state the backend confirmed.
#[derive(Clone)]
pub struct SettingsStore {
  api: ApiClient,
  cache: Cache,
  state: Arc<Mutex<SettingsState>>,
  fetch_gen: Arc<AtomicU64>,
}

impl SettingsStore {
  pub fn new(api: ApiClient, cache: Cache) -> Self {
    Self {
      api,
      cache,
      state: Arc::new(Mutex::new(SettingsState::default())),
      fetch_gen: Arc::new(AtomicU64::new(0)),
    }
  }

  // State is plain data; a poisoned lock still holds a usable value.
  fn lock(&self) -> MutexGuard<'_, SettingsState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn state(&self) -> SettingsState {
    self.lock().clone()
  }

  pub fn settings(&self) -> UserSettings {
    self.lock().settings
  }

  fn begin_fetch(&self) -> u64 {
    self.fetch_gen.fetch_add(1, Ordering::SeqCst) + 1
  }

  fn is_current(&self, generation: u64) -> bool {
    generation == self.fetch_gen.load(Ordering::SeqCst)
  }

  /// Adopt settings without touching the cache (cache hydration path).
  pub(crate) fn hydrate(&self, settings: UserSettings) {
    let mut state = self.lock();
    state.settings = settings;
    state.hydrated = true;
  }

  /// Adopt authoritative settings from the backend and mirror the cache.
  /// Supersedes any in-flight fetch.
  pub(crate) fn apply_fresh(&self, settings: UserSettings) {
    self.begin_fetch();
    {
      let mut state = self.lock();
      state.settings = settings;
      state.hydrated = true;
      state.is_loading = false;
    }
    self.cache.set(CacheKey::Settings, &settings);
  }

  pub(crate) fn reset(&self) {
    self.begin_fetch();
    *self.lock() = SettingsState::default();
  }

  /// Fetch settings with the read-through-cache, fetch-once discipline.
  ///
  /// Already-hydrated state short-circuits. A cache hit hydrates
  /// immediately and refreshes in the background; otherwise the network
  /// fetch is awaited and authoritative. An absent backend record means
  /// default-all-false, not an error.
  pub async fn fetch_settings(&self) -> Result<()> {
    if self.lock().hydrated {
      debug!("Settings already loaded, skipping fetch");
      return Ok(());
    }

    if let Some(cached) = self.cache.get::<UserSettings>(CacheKey::Settings) {
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

    match self.api.get_settings().await {
      Ok(record) => {
        let mut state = self.lock();
        state.is_loading = false;
        if self.is_current(generation) {
          state.hydrated = true;
          if let Some(record) = record {
            state.settings = record.settings_blob;
            drop(state);
            // Absence is not cached: only a real record is authoritative
            self.cache.set(CacheKey::Settings, &record.settings_blob);
          }
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
      match store.api.get_settings().await {
        Ok(Some(record)) if store.is_current(generation) => {
          store.apply_fresh(record.settings_blob);
        }
        Ok(Some(_)) => debug!("Settings refresh superseded, discarding"),
        Ok(None) => debug!("No settings record on backend, keeping cached state"),
        Err(e) => warn!("Background settings refresh failed: {}", e),
      }
    });
  }

  /// Flip one toggle optimistically, then persist the full settings object.
  pub async fn update_setting(&self, key: SettingKey, value: bool) -> Result<()> {
    let (snapshot, updated) = {
      let mut state = self.lock();
      let snapshot = state.settings;
      state.settings.set(key, value);
      state.is_loading = true;
      state.error = None;
      (snapshot, state.settings)
    };

    match self.api.update_settings(&updated).await {
      Ok(()) => {
        self.lock().is_loading = false;
        // The cache mirrors the full confirmed object, not just the key
        self.cache.set(CacheKey::Settings, &updated);
        Ok(())
      }
      Err(e) => {
        let mut state = self.lock();
        state.settings = snapshot;
        state.is_loading = false;
        state.error = Some(e.to_string());
        Err(e)
      }
    }
  }

  /// Create the backend settings record from the current in-memory state.
  pub async fn create_settings(&self) -> Result<()> {
    let settings = self.settings();
    self.api.create_settings(&settings).await?;
    self.cache.set(CacheKey::Settings, &settings);
    Ok(())
  }
}
