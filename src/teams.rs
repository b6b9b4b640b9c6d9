//! Team, organization, and membership operations.

use color_eyre::{eyre::eyre, Result};

use crate::api::{ApiClient, EntityKind, Member, Membership, Organization, Team};

/// Privileged role granted to the creator of a team or organization.
pub const OWNER_ROLE: &str = "owner";

/// Service for team and organization management.
#[derive(Clone)]
pub struct TeamsService {
  api: ApiClient,
}

impl TeamsService {
  pub fn new(api: ApiClient) -> Self {
    Self { api }
  }

  fn current_user_id(&self) -> Result<String> {
    self
      .api
      .session()
      .user_id()
      .ok_or_else(|| eyre!("Not logged in"))
  }

  /// Create a team; the creator receives an owner membership.
  pub async fn create_team(&self, name: &str) -> Result<Team> {
    let user_id = self.current_user_id()?;
    let team = self.api.create_team(name).await?;

    self
      .api
      .add_membership(&Membership {
        user_id,
        entity_id: team.id.clone(),
        entity_type: EntityKind::Team,
        role: OWNER_ROLE.to_string(),
      })
      .await?;

    Ok(team)
  }

  /// Create an organization; the creator receives an owner membership.
  pub async fn create_organization(&self, name: &str) -> Result<Organization> {
    let user_id = self.current_user_id()?;
    let org = self.api.create_organization(name).await?;

    self
      .api
      .add_membership(&Membership {
        user_id,
        entity_id: org.id.clone(),
        entity_type: EntityKind::Organization,
        role: OWNER_ROLE.to_string(),
      })
      .await?;

    Ok(org)
  }

  /// Add a member by email with the given role.
  pub async fn add_member(
    &self,
    email: &str,
    entity_id: &str,
    entity_type: EntityKind,
    role: &str,
  ) -> Result<()> {
    let user = self.api.get_user_by_email(email).await?;

    self
      .api
      .add_membership(&Membership {
        user_id: user.id,
        entity_id: entity_id.to_string(),
        entity_type,
        role: role.to_string(),
      })
      .await
  }

  pub async fn remove_member(&self, user_id: &str, entity_id: &str) -> Result<()> {
    self.api.remove_membership(user_id, entity_id).await
  }

  pub async fn update_member_role(
    &self,
    user_id: &str,
    entity_id: &str,
    role: &str,
  ) -> Result<()> {
    self.api.update_membership_role(user_id, entity_id, role).await
  }

  pub async fn user_teams(&self) -> Result<Vec<Team>> {
    self.api.get_user_teams().await
  }

  pub async fn team_members(&self, team_id: &str) -> Result<Vec<Member>> {
    self.api.get_team_members(team_id).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Session;
  use crate::cache::{Cache, MemoryStorage};
  use crate::config::{ApiConfig, Config};
  use wiremock::matchers::{body_partial_json, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn service_for(server: &MockServer) -> TeamsService {
    let cache = Cache::new(MemoryStorage::new());
    let session = Session::new(cache);
    session.set_token("tok");
    session.set_identity("u1", "u1@example.com");

    let config = Config {
      api: ApiConfig {
        base_url: server.uri(),
        timeout_secs: 10,
      },
      ..Default::default()
    };
    TeamsService::new(ApiClient::new(&config, session).unwrap())
  }

  #[tokio::test]
  async fn team_creation_grants_the_creator_an_owner_membership() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/team"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(serde_json::json!({ "id": "t1", "name": "Platform" })),
      )
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/membership"))
      .and(body_partial_json(serde_json::json!({
        "user_id": "u1",
        "entity_id": "t1",
        "entity_type": "team",
        "role": "owner",
      })))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let team = service_for(&server).create_team("Platform").await.unwrap();
    assert_eq!(team.id, "t1");
  }

  #[tokio::test]
  async fn adding_a_member_resolves_the_user_by_email() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/user/by_email/new@example.com"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(serde_json::json!({ "id": "u2", "email": "new@example.com" })),
      )
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/membership"))
      .and(body_partial_json(serde_json::json!({
        "user_id": "u2",
        "entity_id": "t1",
        "role": "member",
      })))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    service_for(&server)
      .add_member("new@example.com", "t1", EntityKind::Team, "member")
      .await
      .unwrap();
  }
}
