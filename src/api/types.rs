//! Wire types for the dashboard backend API.
//!
//! Deserialization through these types is the shape validation at the
//! network boundary: a payload that doesn't match produces a descriptive
//! error instead of leaking malformed records into store state.

use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discriminator for polymorphic (entity id, entity kind) relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
  User,
  Team,
  Organization,
}

impl EntityKind {
  pub fn as_str(self) -> &'static str {
    match self {
      EntityKind::User => "user",
      EntityKind::Team => "team",
      EntityKind::Organization => "organization",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// User record as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub email: String,
  #[serde(default)]
  pub first_name: Option<String>,
  #[serde(default)]
  pub last_name: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub auth_token: Option<String>,
}

/// Identity of an authenticated user, known before any data fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
  pub id: String,
  pub email: String,
}

/// Response from the login/register endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
  pub token: String,
  pub user: User,
}

/// A bookmark-style link pinned to a dashboard column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
  pub id: String,
  pub owner_id: String,
  pub owner_type: EntityKind,
  pub title: String,
  pub url: String,
  #[serde(default)]
  pub icon: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
  pub column_type: String,
  /// Unique within (owner, column). Dense-enough, not required contiguous.
  pub order_index: i64,
  #[serde(default)]
  pub created_at: Option<String>,
}

/// Payload for creating a link. The backend assigns id and order index.
#[derive(Debug, Clone, Serialize)]
pub struct CreateLinkRequest {
  pub title: String,
  pub url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub column_type: String,
}

/// Payload for updating a link in place.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateLinkRequest {
  pub id: String,
  pub title: String,
  pub url: String,
  pub icon: Option<String>,
  pub description: Option<String>,
  pub column_type: String,
}

impl From<&Link> for UpdateLinkRequest {
  fn from(link: &Link) -> Self {
    Self {
      id: link.id.clone(),
      title: link.title.clone(),
      url: link.url.clone(),
      icon: link.icon.clone(),
      description: link.description.clone(),
      column_type: link.column_type.clone(),
    }
  }
}

/// One row of a bulk reorder upsert. Last writer wins.
#[derive(Debug, Clone, Serialize)]
pub struct LinkOrder {
  pub id: String,
  pub order_index: i64,
  pub owner_id: String,
  pub owner_type: EntityKind,
  pub title: String,
  pub url: String,
}

impl From<&Link> for LinkOrder {
  fn from(link: &Link) -> Self {
    Self {
      id: link.id.clone(),
      order_index: link.order_index,
      owner_id: link.owner_id.clone(),
      owner_type: link.owner_type,
      title: link.title.clone(),
      url: link.url.clone(),
    }
  }
}

/// Per-user feature toggles. Exactly one record per user; absence means
/// default-all-false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
  pub search_history: bool,
  pub autosuggest: bool,
  pub jira_api: bool,
  pub confluence_api: bool,
  pub linear_api: bool,
  pub new_tabs: bool,
  pub metadata: bool,
}

impl UserSettings {
  pub fn get(&self, key: SettingKey) -> bool {
    match key {
      SettingKey::SearchHistory => self.search_history,
      SettingKey::Autosuggest => self.autosuggest,
      SettingKey::JiraApi => self.jira_api,
      SettingKey::ConfluenceApi => self.confluence_api,
      SettingKey::LinearApi => self.linear_api,
      SettingKey::NewTabs => self.new_tabs,
      SettingKey::Metadata => self.metadata,
    }
  }

  pub fn set(&mut self, key: SettingKey, value: bool) {
    match key {
      SettingKey::SearchHistory => self.search_history = value,
      SettingKey::Autosuggest => self.autosuggest = value,
      SettingKey::JiraApi => self.jira_api = value,
      SettingKey::ConfluenceApi => self.confluence_api = value,
      SettingKey::LinearApi => self.linear_api = value,
      SettingKey::NewTabs => self.new_tabs = value,
      SettingKey::Metadata => self.metadata = value,
    }
  }
}

/// Names of the settings toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
  SearchHistory,
  Autosuggest,
  JiraApi,
  ConfluenceApi,
  LinearApi,
  NewTabs,
  Metadata,
}

impl SettingKey {
  pub const ALL: [SettingKey; 7] = [
    SettingKey::SearchHistory,
    SettingKey::Autosuggest,
    SettingKey::JiraApi,
    SettingKey::ConfluenceApi,
    SettingKey::LinearApi,
    SettingKey::NewTabs,
    SettingKey::Metadata,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      SettingKey::SearchHistory => "search_history",
      SettingKey::Autosuggest => "autosuggest",
      SettingKey::JiraApi => "jira_api",
      SettingKey::ConfluenceApi => "confluence_api",
      SettingKey::LinearApi => "linear_api",
      SettingKey::NewTabs => "new_tabs",
      SettingKey::Metadata => "metadata",
    }
  }
}

impl fmt::Display for SettingKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SettingKey {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    SettingKey::ALL
      .into_iter()
      .find(|key| key.as_str() == s)
      .ok_or_else(|| eyre!("Unknown setting: {}", s))
  }
}

/// Settings record as stored by the backend (toggles nested in a blob).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsRecord {
  pub settings_blob: UserSettings,
}

/// A named bundle of entitlements gating feature access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  pub id: String,
  pub name: String,
  pub max_pins: i64,
  pub features: PlanFeatures,
  #[serde(default)]
  pub created_at: Option<String>,
}

/// Boolean entitlements carried by a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanFeatures {
  pub custom_domains: bool,
  pub analytics: bool,
  pub team_features: bool,
}

/// Subscription binding a plan to a user, team, or organization.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
  pub id: String,
  pub entity_id: String,
  pub entity_type: EntityKind,
  pub status: String,
  pub plan: Plan,
}

impl Subscription {
  pub fn is_active(&self) -> bool {
    self.status == "active"
  }
}

/// Membership binding a user to a team or organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
  pub user_id: String,
  pub entity_id: String,
  pub entity_type: EntityKind,
  /// Free-form; "owner" is the privileged default assigned at creation.
  pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub organization_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
  pub id: String,
  pub name: String,
}

/// A member of a team or organization, as listed for admins.
#[derive(Debug, Clone, Deserialize)]
pub struct Member {
  pub user_id: String,
  pub email: String,
  pub role: String,
}

/// Aggregated payload from the user-data endpoint: user, resolved plan,
/// settings, and links in one call.
#[derive(Debug, Clone, Deserialize)]
pub struct UserDataResponse {
  pub user: User,
  #[serde(default)]
  pub plan: Option<Plan>,
  #[serde(default)]
  pub settings: Option<SettingsRecord>,
  #[serde(default)]
  pub links: Option<Vec<Link>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn settings_default_is_all_false() {
    let settings = UserSettings::default();
    for key in SettingKey::ALL {
      assert!(!settings.get(key));
    }
  }

  #[test]
  fn setting_key_round_trips_through_str() {
    for key in SettingKey::ALL {
      assert_eq!(key.as_str().parse::<SettingKey>().unwrap(), key);
    }
    assert!("bogus".parse::<SettingKey>().is_err());
  }

  #[test]
  fn link_deserializes_with_absent_optional_fields() {
    let link: Link = serde_json::from_value(serde_json::json!({
      "id": "l1",
      "owner_id": "u1",
      "owner_type": "user",
      "title": "A",
      "url": "http://a.com",
      "column_type": "tools",
      "order_index": 0,
    }))
    .unwrap();

    assert_eq!(link.icon, None);
    assert_eq!(link.description, None);
    assert_eq!(link.owner_type, EntityKind::User);
  }

  #[test]
  fn malformed_link_payload_is_rejected() {
    // order_index must be an integer
    let result = serde_json::from_value::<Link>(serde_json::json!({
      "id": "l1",
      "owner_id": "u1",
      "owner_type": "user",
      "title": "A",
      "url": "http://a.com",
      "column_type": "tools",
      "order_index": "zero",
    }));
    assert!(result.is_err());
  }

  #[test]
  fn settings_blob_tolerates_unknown_and_missing_toggles() {
    let record: SettingsRecord = serde_json::from_value(serde_json::json!({
      "settings_blob": {"autosuggest": true, "retired_toggle": true},
    }))
    .unwrap();

    assert!(record.settings_blob.autosuggest);
    assert!(!record.settings_blob.search_history);
  }
}
