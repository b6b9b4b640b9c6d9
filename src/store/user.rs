//! Store for the authenticated user's identity and resolved plan.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::api::{ApiClient, AuthUser, Link, Plan, UserSettings};
use crate::cache::{Cache, CacheKey};

use super::links::LinksStore;
use super::settings::SettingsStore;

/// Durable part of the user state. This is what the cache stores; loading
/// and error flags are transient and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
  pub user_id: Option<String>,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub email: Option<String>,
  pub plan: Option<Plan>,
}

#[derive(Debug, Clone, Default)]
pub struct UserState {
  pub profile: UserProfile,
  pub is_loading: bool,
  pub error: Option<String>,
}

/// Store owning the user identity and orchestrating the aggregated
/// user-data fetch (user, plan, settings, links in one call).
///
/// A cache hit hydrates this store and patches the links and settings
/// stores synchronously, then refreshes from the backend without blocking
/// the caller; a fetch generation counter keeps a superseded refresh from
/// overwriting newer state. With no cache entry the server fetch is awaited
/// and authoritative.
#[derive(Clone)]
pub struct UserStore {
  api: ApiClient,
  cache: Cache,
  links: LinksStore,
  settings: SettingsStore,
  state: Arc<Mutex<UserState>>,
  fetch_gen: Arc<AtomicU64>,
}

impl UserStore {
  pub fn new(api: ApiClient, cache: Cache, links: LinksStore, settings: SettingsStore) -> Self {
    Self {
      api,
      cache,
      links,
      settings,
      state: Arc::new(Mutex::new(UserState::default())),
      fetch_gen: Arc::new(AtomicU64::new(0)),
    }
  }

  // State is plain data; a poisoned lock still holds a usable value.
  fn lock(&self) -> MutexGuard<'_, UserState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn state(&self) -> UserState {
    self.lock().clone()
  }

  pub fn profile(&self) -> UserProfile {
    self.lock().profile.clone()
  }

  pub fn plan(&self) -> Option<Plan> {
    self.lock().profile.plan.clone()
  }

  fn begin_fetch(&self) -> u64 {
    self.fetch_gen.fetch_add(1, Ordering::SeqCst) + 1
  }

  fn is_current(&self, generation: u64) -> bool {
    generation == self.fetch_gen.load(Ordering::SeqCst)
  }

  /// Load user data, cache-first.
  ///
  /// The identity from `auth` is adopted immediately so request headers are
  /// correct before any fetch completes. Returns once state is usable:
  /// either hydrated from cache (with a background refresh in flight) or
  /// confirmed by the backend.
  pub async fn fetch_user_data(&self, auth: &AuthUser) -> Result<()> {
    self.api.session().set_identity(&auth.id, &auth.email);
    {
      let mut state = self.lock();
      state.profile.user_id = Some(auth.id.clone());
      state.profile.email = Some(auth.email.clone());
    }

    if !self.hydrate_from_cache() {
      // No cache entry: the network result is authoritative and awaited
      return self.refresh_from_server(self.begin_fetch()).await;
    }

    let store = self.clone();
    let generation = self.begin_fetch();
    tokio::spawn(async move {
      if let Err(e) = store.refresh_from_server(generation).await {
        // The user keeps the (possibly stale) cached state
        warn!("Background user data refresh failed: {}", e);
      }
    });

    Ok(())
  }

  /// Hydrate this store and its dependents from the cache. Returns whether
  /// a cached user profile existed.
  fn hydrate_from_cache(&self) -> bool {
    let Some(profile) = self.cache.get::<UserProfile>(CacheKey::User) else {
      return false;
    };
    self.lock().profile = profile;

    if let Some(links) = self.cache.get::<Vec<Link>>(CacheKey::Links) {
      self.links.hydrate(links);
    }
    if let Some(settings) = self.cache.get::<UserSettings>(CacheKey::Settings) {
      self.settings.hydrate(settings);
    }

    true
  }

  /// Fetch the aggregated payload and reconcile every store and cache.
  async fn refresh_from_server(&self, generation: u64) -> Result<()> {
    {
      let mut state = self.lock();
      state.is_loading = true;
      state.error = None;
    }

    match self.api.get_user_data().await {
      Ok(data) => {
        if !self.is_current(generation) {
          debug!("User data fetch superseded, discarding");
          self.lock().is_loading = false;
          return Ok(());
        }

        if let Some(token) = &data.user.auth_token {
          self.api.session().set_token(token);
        }

        let profile = {
          let mut state = self.lock();
          state.profile.user_id = Some(data.user.id.clone());
          state.profile.email = Some(data.user.email.clone());
          state.profile.first_name = data.user.first_name.clone();
          state.profile.last_name = data.user.last_name.clone();
          if let Some(plan) = data.plan {
            state.profile.plan = Some(plan);
          }
          state.is_loading = false;
          state.profile.clone()
        };

        if let Some(links) = data.links {
          self.links.apply_fresh(links);
        }
        if let Some(settings) = data.settings {
          self.settings.apply_fresh(settings.settings_blob);
        }

        self.cache.set(CacheKey::User, &profile);
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

  /// Clear all user state on logout: this store, the dependent stores, the
  /// session, and every cache entry.
  pub fn clear(&self) {
    self.begin_fetch();
    *self.lock() = UserState::default();
    self.links.reset();
    self.settings.reset();
    self.api.session().clear();
    self.cache.clear_all();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Session;
  use crate::cache::MemoryStorage;
  use crate::config::{ApiConfig, Config};
  use std::time::Duration;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  struct Fixture {
    user: UserStore,
    links: LinksStore,
    settings: SettingsStore,
    cache: Cache,
  }

  fn fixture_for(server: &MockServer) -> Fixture {
    let cache = Cache::new(MemoryStorage::new());
    let session = Session::new(cache.clone());
    session.set_token("tok");

    let config = Config {
      api: ApiConfig {
        base_url: server.uri(),
        timeout_secs: 10,
      },
      ..Default::default()
    };
    let api = ApiClient::new(&config, session).unwrap();
    let settings = SettingsStore::new(api.clone(), cache.clone());
    let links = LinksStore::new(api.clone(), cache.clone(), settings.clone());
    let user = UserStore::new(api, cache.clone(), links.clone(), settings.clone());
    Fixture {
      user,
      links,
      settings,
      cache,
    }
  }

  fn auth() -> AuthUser {
    AuthUser {
      id: "u1".to_string(),
      email: "u1@example.com".to_string(),
    }
  }

  fn user_data_json(plan_name: &str, link_titles: &[&str]) -> serde_json::Value {
    let links: Vec<serde_json::Value> = link_titles
      .iter()
      .enumerate()
      .map(|(i, title)| {
        serde_json::json!({
          "id": format!("l{}", i),
          "owner_id": "u1",
          "owner_type": "user",
          "title": title,
          "url": format!("http://{}.com", title.to_lowercase()),
          "column_type": "tools",
          "order_index": i,
        })
      })
      .collect();

    serde_json::json!({
      "user": { "id": "u1", "email": "u1@example.com", "first_name": "Ada" },
      "plan": {
        "id": "p1",
        "name": plan_name,
        "max_pins": 10,
        "features": { "custom_domains": false, "analytics": false, "team_features": false },
      },
      "settings": { "settings_blob": { "autosuggest": true } },
      "links": links,
    })
  }

  #[tokio::test]
  async fn cold_start_awaits_the_server_and_fills_every_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/user_data"))
      .respond_with(ResponseTemplate::new(200).set_body_json(user_data_json("plus", &["A"])))
      .mount(&server)
      .await;

    let f = fixture_for(&server);
    f.user.fetch_user_data(&auth()).await.unwrap();

    let profile = f.user.profile();
    assert_eq!(profile.user_id.as_deref(), Some("u1"));
    assert_eq!(profile.first_name.as_deref(), Some("Ada"));
    assert_eq!(profile.plan.as_ref().map(|p| p.name.as_str()), Some("plus"));
    assert_eq!(f.links.links().len(), 1);
    assert!(f.settings.settings().autosuggest);

    // Every cache entry mirrors the confirmed state
    assert!(f.cache.get::<UserProfile>(CacheKey::User).is_some());
    assert!(f.cache.get::<Vec<Link>>(CacheKey::Links).is_some());
    assert!(f.cache.get::<UserSettings>(CacheKey::Settings).is_some());
  }

  #[tokio::test]
  async fn cache_hit_returns_stale_state_then_reconciles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/user_data"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(user_data_json("plus", &["A", "B"])),
      )
      .mount(&server)
      .await;

    let f = fixture_for(&server);
    f.cache.set(
      CacheKey::User,
      &UserProfile {
        user_id: Some("u1".to_string()),
        email: Some("u1@example.com".to_string()),
        ..Default::default()
      },
    );

    f.user.fetch_user_data(&auth()).await.unwrap();
    // Cached profile is visible before any network round-trip completes
    assert_eq!(f.user.profile().user_id.as_deref(), Some("u1"));

    for _ in 0..100 {
      if f.links.links().len() == 2 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(f.links.links().len(), 2);
    assert_eq!(f.user.profile().first_name.as_deref(), Some("Ada"));
  }

  #[tokio::test]
  async fn clear_supersedes_an_in_flight_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/user_data"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(user_data_json("plus", &["A", "B"]))
          .set_delay(Duration::from_millis(150)),
      )
      .mount(&server)
      .await;

    let f = fixture_for(&server);
    f.cache.set(
      CacheKey::User,
      &UserProfile {
        user_id: Some("u1".to_string()),
        email: Some("u1@example.com".to_string()),
        ..Default::default()
      },
    );

    f.user.fetch_user_data(&auth()).await.unwrap();
    // Logout lands while the background refresh is still in flight
    f.user.clear();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(f.user.profile(), UserProfile::default());
    assert!(f.links.links().is_empty());
    assert_eq!(f.settings.settings(), UserSettings::default());
    assert_eq!(f.cache.get::<UserProfile>(CacheKey::User), None);
  }

  #[tokio::test]
  async fn cold_start_failure_records_the_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/user_data"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let f = fixture_for(&server);
    let result = f.user.fetch_user_data(&auth()).await;

    assert!(result.is_err());
    let state = f.user.state();
    assert!(!state.is_loading);
    assert!(state.error.is_some());
    // Identity adopted even though the fetch failed
    assert_eq!(state.profile.user_id.as_deref(), Some("u1"));
  }

  #[tokio::test]
  async fn clear_resets_stores_session_and_caches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/user_data"))
      .respond_with(ResponseTemplate::new(200).set_body_json(user_data_json("plus", &["A"])))
      .mount(&server)
      .await;

    let f = fixture_for(&server);
    f.user.fetch_user_data(&auth()).await.unwrap();
    f.user.clear();

    assert_eq!(f.user.profile(), UserProfile::default());
    assert!(f.links.links().is_empty());
    assert_eq!(f.settings.settings(), UserSettings::default());
    for key in CacheKey::ALL {
      assert_eq!(f.cache.get::<serde_json::Value>(key), None);
    }
  }
}
