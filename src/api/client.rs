//! Authenticated HTTP client for the dashboard backend.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{Cache, CacheKey};
use crate::config::Config;

use super::types::{
  AuthResponse, CreateLinkRequest, EntityKind, Link, LinkOrder, Member, Membership, Organization,
  Plan, SettingsRecord, Subscription, Team, UpdateLinkRequest, User, UserDataResponse,
  UserSettings,
};

/// Response header carrying a rotated auth token.
const NEW_TOKEN_HEADER: &str = "x-new-auth-token";

#[derive(Default)]
struct SessionInner {
  token: Option<String>,
  user_id: Option<String>,
  email: Option<String>,
}

/// Authenticated session state shared by every request.
///
/// The token is persisted through the cache so it survives restarts; a
/// rotated token silently replaces it. Expiry (a 401 from the backend) is
/// terminal: the token and caches are cleared and every subscriber of
/// [`Session::expired`] is notified. The session is never retried.
#[derive(Clone)]
pub struct Session {
  inner: Arc<Mutex<SessionInner>>,
  expired_tx: Arc<watch::Sender<bool>>,
  cache: Cache,
}

impl Session {
  /// Create a session, restoring a persisted token if one exists.
  ///
  /// The `TABDECK_TOKEN` environment variable overrides the persisted token.
  pub fn new(cache: Cache) -> Self {
    let token = std::env::var("TABDECK_TOKEN")
      .ok()
      .or_else(|| cache.get::<String>(CacheKey::AuthToken));

    let (expired_tx, _) = watch::channel(false);
    Self {
      inner: Arc::new(Mutex::new(SessionInner {
        token,
        ..Default::default()
      })),
      expired_tx: Arc::new(expired_tx),
      cache,
    }
  }

  pub fn token(&self) -> Option<String> {
    self.inner.lock().ok().and_then(|s| s.token.clone())
  }

  /// Replace the stored token and persist it for subsequent runs.
  pub fn set_token(&self, token: &str) {
    if let Ok(mut inner) = self.inner.lock() {
      inner.token = Some(token.to_string());
    }
    self.cache.set(CacheKey::AuthToken, &token);
  }

  /// Record who is logged in; sent as identity headers on every request.
  pub fn set_identity(&self, user_id: &str, email: &str) {
    if let Ok(mut inner) = self.inner.lock() {
      inner.user_id = Some(user_id.to_string());
      inner.email = Some(email.to_string());
    }
  }

  pub fn user_id(&self) -> Option<String> {
    self.inner.lock().ok().and_then(|s| s.user_id.clone())
  }

  pub fn email(&self) -> Option<String> {
    self.inner.lock().ok().and_then(|s| s.email.clone())
  }

  /// Watch for session expiry. The value flips to `true` at most once.
  pub fn expired(&self) -> watch::Receiver<bool> {
    self.expired_tx.subscribe()
  }

  pub fn is_expired(&self) -> bool {
    *self.expired_tx.borrow()
  }

  /// Forget the token and identity without marking the session expired.
  /// Used on explicit logout.
  pub fn clear(&self) {
    if let Ok(mut inner) = self.inner.lock() {
      *inner = SessionInner::default();
    }
    self.cache.clear(CacheKey::AuthToken);
  }

  /// Terminal session shutdown after a 401: clear the token, drop every
  /// cached record, and notify subscribers so the view layer can return to
  /// its login state.
  fn invalidate(&self) {
    warn!("Session rejected by backend, clearing local state");
    if let Ok(mut inner) = self.inner.lock() {
      *inner = SessionInner::default();
    }
    self.cache.clear_all();
    let _ = self.expired_tx.send(true);
  }
}

/// HTTP client facade for the backend REST surface.
///
/// Adds the auth header contract (`Authorization: Bearer`, `X-User-Id`,
/// `X-User-Email`, JSON content type) to every request, transparently
/// persists rotated tokens, and escalates 401 to session invalidation.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  session: Session,
}

impl ApiClient {
  pub fn new(config: &Config, session: Session) -> Result<Self> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let mut base = config.api.base_url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API base URL {}: {}", base, e))?;

    Ok(Self {
      http,
      base_url,
      session,
    })
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(&format!("api/{}", path))
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))
  }

  /// Send a request with the auth header contract applied, then inspect the
  /// response for a rotated token and a stale session.
  async fn send(&self, mut req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    if let Some(token) = self.session.token() {
      req = req.bearer_auth(token);
    }
    if let Some(user_id) = self.session.user_id() {
      req = req.header("X-User-Id", user_id);
    }
    if let Some(email) = self.session.email() {
      req = req.header("X-User-Email", email);
    }

    let resp = req.send().await.map_err(|e| eyre!("Request failed: {}", e))?;

    if let Some(token) = resp
      .headers()
      .get(NEW_TOKEN_HEADER)
      .and_then(|v| v.to_str().ok())
    {
      if !token.is_empty() {
        debug!("Rotating auth token from response header");
        self.session.set_token(token);
      }
    }

    if resp.status() == StatusCode::UNAUTHORIZED {
      self.session.invalidate();
      return Err(eyre!("Session expired"));
    }

    Ok(resp)
  }

  async fn parse<T: DeserializeOwned>(resp: reqwest::Response, context: &str) -> Result<T> {
    resp
      .json::<T>()
      .await
      .map_err(|e| eyre!("Unexpected {} payload: {}", context, e))
  }

  fn check_status(resp: &reqwest::Response, context: &str) -> Result<()> {
    let status = resp.status();
    if !status.is_success() {
      return Err(eyre!("Failed to {}, status: {}", context, status));
    }
    Ok(())
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str, context: &str) -> Result<T> {
    let resp = self.send(self.http.get(self.endpoint(path)?)).await?;
    Self::check_status(&resp, context)?;
    Self::parse(resp, context).await
  }

  // --- auth ---

  /// Log in and adopt the returned token and identity for this session.
  pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
    let body = serde_json::json!({ "email": email, "password": password });
    let resp = self
      .send(self.http.post(self.endpoint("login")?).json(&body))
      .await?;
    Self::check_status(&resp, "log in")?;
    let auth: AuthResponse = Self::parse(resp, "login").await?;

    self.session.set_token(&auth.token);
    self.session.set_identity(&auth.user.id, &auth.user.email);
    Ok(auth)
  }

  /// Register a new account and adopt the returned session.
  pub async fn register(&self, email: &str, password: &str) -> Result<AuthResponse> {
    let body = serde_json::json!({ "email": email, "password": password });
    let resp = self
      .send(self.http.post(self.endpoint("register")?).json(&body))
      .await?;
    Self::check_status(&resp, "register")?;
    let auth: AuthResponse = Self::parse(resp, "register").await?;

    self.session.set_token(&auth.token);
    self.session.set_identity(&auth.user.id, &auth.user.email);
    Ok(auth)
  }

  // --- user ---

  /// Fetch the aggregated user payload: user, plan, settings, and links.
  pub async fn get_user_data(&self) -> Result<UserDataResponse> {
    self.get_json("user_data", "user data").await
  }

  pub async fn get_user_by_email(&self, email: &str) -> Result<User> {
    self.get_json(&format!("user/by_email/{}", email), "user").await
  }

  // --- links ---

  pub async fn get_links(&self) -> Result<Vec<Link>> {
    self.get_json("user/links", "links").await
  }

  /// Create a link. `fetch_metadata` asks the backend to scrape title/icon
  /// metadata for the URL (gated by the user's `metadata` setting).
  pub async fn create_link(&self, link: &CreateLinkRequest, fetch_metadata: bool) -> Result<Link> {
    let resp = self
      .send(
        self
          .http
          .post(self.endpoint("link")?)
          .header("X-Fetch-Metadata", fetch_metadata.to_string())
          .json(link),
      )
      .await?;

    if resp.status() != StatusCode::CREATED {
      return Err(eyre!("Failed to create link, status: {}", resp.status()));
    }
    Self::parse(resp, "link").await
  }

  pub async fn update_link(&self, link: &UpdateLinkRequest) -> Result<()> {
    let resp = self
      .send(self.http.put(self.endpoint("link")?).json(link))
      .await?;
    Self::check_status(&resp, "update link")
  }

  pub async fn delete_link(&self, link_id: &str) -> Result<()> {
    let resp = self
      .send(self.http.delete(self.endpoint(&format!("link/{}", link_id))?))
      .await?;
    Self::check_status(&resp, "delete link")
  }

  /// Bulk order-index upsert for the full link collection.
  pub async fn reorder_links(&self, links: &[LinkOrder]) -> Result<()> {
    let resp = self
      .send(self.http.put(self.endpoint("links/reorder")?).json(&links))
      .await?;
    Self::check_status(&resp, "reorder links")
  }

  // --- settings ---

  /// Fetch the settings record. Absence (404) is not an error: it means the
  /// user has never saved settings and defaults apply.
  pub async fn get_settings(&self) -> Result<Option<SettingsRecord>> {
    let resp = self.send(self.http.get(self.endpoint("settings")?)).await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    Self::check_status(&resp, "fetch settings")?;
    Ok(Some(Self::parse(resp, "settings").await?))
  }

  pub async fn create_settings(&self, settings: &UserSettings) -> Result<()> {
    let body = SettingsRecord {
      settings_blob: *settings,
    };
    let resp = self
      .send(self.http.post(self.endpoint("settings")?).json(&body))
      .await?;
    Self::check_status(&resp, "create settings")
  }

  pub async fn update_settings(&self, settings: &UserSettings) -> Result<()> {
    let body = SettingsRecord {
      settings_blob: *settings,
    };
    let resp = self
      .send(self.http.put(self.endpoint("settings")?).json(&body))
      .await?;
    Self::check_status(&resp, "update settings")
  }

  // --- plans and subscriptions ---

  pub async fn get_plan_by_name(&self, name: &str) -> Result<Plan> {
    self.get_json(&format!("plan/by_name/{}", name), "plan").await
  }

  /// Fetch the subscription held by an entity, if any (404 means none).
  pub async fn get_subscription(
    &self,
    kind: EntityKind,
    entity_id: &str,
  ) -> Result<Option<Subscription>> {
    let resp = self
      .send(
        self
          .http
          .get(self.endpoint(&format!("subscription/{}/{}", kind, entity_id))?),
      )
      .await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    Self::check_status(&resp, "fetch subscription")?;
    Ok(Some(Self::parse(resp, "subscription").await?))
  }

  pub async fn confirm_subscription(&self, email: &str, user_id: &str) -> Result<()> {
    let resp = self
      .send(
        self
          .http
          .post(self.endpoint(&format!("confirm/{}/{}", email, user_id))?),
      )
      .await?;
    Self::check_status(&resp, "confirm subscription")
  }

  pub async fn cancel_subscription(&self, email: &str, user_id: &str) -> Result<()> {
    let resp = self
      .send(
        self
          .http
          .post(self.endpoint(&format!("cancel/{}/{}", email, user_id))?),
      )
      .await?;
    Self::check_status(&resp, "cancel subscription")
  }

  // --- memberships, teams, organizations ---

  /// Memberships of the current user across teams and organizations.
  pub async fn get_memberships(&self) -> Result<Vec<Membership>> {
    self.get_json("user/memberships", "memberships").await
  }

  pub async fn add_membership(&self, membership: &Membership) -> Result<()> {
    let resp = self
      .send(self.http.post(self.endpoint("membership")?).json(membership))
      .await?;
    Self::check_status(&resp, "add membership")
  }

  pub async fn remove_membership(&self, user_id: &str, entity_id: &str) -> Result<()> {
    let resp = self
      .send(
        self
          .http
          .delete(self.endpoint(&format!("membership/{}/{}", user_id, entity_id))?),
      )
      .await?;
    Self::check_status(&resp, "remove membership")
  }

  pub async fn update_membership_role(
    &self,
    user_id: &str,
    entity_id: &str,
    role: &str,
  ) -> Result<()> {
    let body = serde_json::json!({
      "user_id": user_id,
      "entity_id": entity_id,
      "role": role,
    });
    let resp = self
      .send(self.http.put(self.endpoint("membership")?).json(&body))
      .await?;
    Self::check_status(&resp, "update membership role")
  }

  pub async fn create_team(&self, name: &str) -> Result<Team> {
    let body = serde_json::json!({ "name": name });
    let resp = self
      .send(self.http.post(self.endpoint("team")?).json(&body))
      .await?;
    Self::check_status(&resp, "create team")?;
    Self::parse(resp, "team").await
  }

  pub async fn create_organization(&self, name: &str) -> Result<Organization> {
    let body = serde_json::json!({ "name": name });
    let resp = self
      .send(self.http.post(self.endpoint("organization")?).json(&body))
      .await?;
    Self::check_status(&resp, "create organization")?;
    Self::parse(resp, "organization").await
  }

  pub async fn get_user_teams(&self) -> Result<Vec<Team>> {
    self.get_json("user/teams", "teams").await
  }

  pub async fn get_team_members(&self, team_id: &str) -> Result<Vec<Member>> {
    self
      .get_json(&format!("team/{}/members", team_id), "team members")
      .await
  }
}
