//! Plan resolution and feature gating.

use color_eyre::{eyre::eyre, Report, Result};
use futures::future;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::api::{ApiClient, EntityKind, Plan};

/// Name of the fallback plan every deployment must provide.
pub const FREE_PLAN: &str = "free";

/// Feature-gated actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
  /// Pin another link (limited by the plan's pin count)
  Pin,
  /// Use a custom domain
  Domain,
  /// Access analytics
  Analytics,
  /// Use team features
  Team,
}

impl GateAction {
  pub fn as_str(self) -> &'static str {
    match self {
      GateAction::Pin => "pin",
      GateAction::Domain => "domain",
      GateAction::Analytics => "analytics",
      GateAction::Team => "team",
    }
  }
}

impl fmt::Display for GateAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for GateAction {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pin" => Ok(GateAction::Pin),
      "domain" => Ok(GateAction::Domain),
      "analytics" => Ok(GateAction::Analytics),
      "team" => Ok(GateAction::Team),
      other => Err(eyre!("Unknown gate action: {}", other)),
    }
  }
}

/// Resolves which plan applies to a user and answers feature-gate checks.
#[derive(Clone)]
pub struct PlanResolver {
  api: ApiClient,
}

impl PlanResolver {
  pub fn new(api: ApiClient) -> Self {
    Self { api }
  }

  /// Resolve the plan governing a user.
  ///
  /// A direct active user subscription always wins. Otherwise every active
  /// membership-derived subscription is considered and the plan with the
  /// highest pin limit is chosen (ties broken by first-seen order). A user
  /// with no subscription anywhere gets the canonical free plan.
  pub async fn resolve(&self, user_id: &str) -> Result<Plan> {
    if let Some(sub) = self.api.get_subscription(EntityKind::User, user_id).await? {
      if sub.is_active() {
        return Ok(sub.plan);
      }
    }

    let memberships = self.api.get_memberships().await?;
    let subscriptions = future::try_join_all(
      memberships
        .iter()
        .map(|m| self.api.get_subscription(m.entity_type, &m.entity_id)),
    )
    .await?;

    let mut best: Option<Plan> = None;
    for sub in subscriptions.into_iter().flatten() {
      if !sub.is_active() {
        continue;
      }
      // Strict comparison keeps the first-seen plan on ties
      let better = best
        .as_ref()
        .map_or(true, |current| sub.plan.max_pins > current.max_pins);
      if better {
        best = Some(sub.plan);
      }
    }

    match best {
      Some(plan) => Ok(plan),
      None => {
        debug!("No subscription found for user {}, falling back to free", user_id);
        self.api.get_plan_by_name(FREE_PLAN).await
      }
    }
  }

  /// Whether the user's resolved plan allows an action. `Pin` compares the
  /// current link count against the plan's pin limit; the rest consult the
  /// plan's feature bundle.
  pub async fn allows(&self, user_id: &str, action: GateAction) -> Result<bool> {
    let plan = self.resolve(user_id).await?;

    match action {
      GateAction::Pin => {
        let count = self.api.get_links().await?.len() as i64;
        Ok(count < plan.max_pins)
      }
      GateAction::Domain => Ok(plan.features.custom_domains),
      GateAction::Analytics => Ok(plan.features.analytics),
      GateAction::Team => Ok(plan.features.team_features),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Session;
  use crate::cache::{Cache, MemoryStorage};
  use crate::config::{ApiConfig, Config};
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn resolver_for(server: &MockServer) -> PlanResolver {
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
    PlanResolver::new(ApiClient::new(&config, session).unwrap())
  }

  fn plan_json(id: &str, name: &str, max_pins: i64) -> serde_json::Value {
    serde_json::json!({
      "id": id,
      "name": name,
      "max_pins": max_pins,
      "features": { "custom_domains": true, "analytics": false, "team_features": true },
    })
  }

  fn subscription_json(entity_id: &str, kind: &str, plan: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
      "id": format!("sub-{}", entity_id),
      "entity_id": entity_id,
      "entity_type": kind,
      "status": "active",
      "plan": plan,
    })
  }

  async fn mock_membership_plans(server: &MockServer, pins: &[(&str, i64)]) {
    let memberships: Vec<serde_json::Value> = pins
      .iter()
      .map(|(team, _)| {
        serde_json::json!({
          "user_id": "u1",
          "entity_id": team,
          "entity_type": "team",
          "role": "member",
        })
      })
      .collect();

    Mock::given(method("GET"))
      .and(path("/api/user/memberships"))
      .respond_with(ResponseTemplate::new(200).set_body_json(memberships))
      .mount(server)
      .await;

    for (team, max_pins) in pins {
      Mock::given(method("GET"))
        .and(path(format!("/api/subscription/team/{}", team)))
        .respond_with(ResponseTemplate::new(200).set_body_json(subscription_json(
          team,
          "team",
          plan_json(&format!("p-{}", team), "team-plan", *max_pins),
        )))
        .mount(server)
        .await;
    }
  }

  #[tokio::test]
  async fn direct_subscription_beats_membership_plans() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/subscription/user/u1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(subscription_json(
        "u1",
        "user",
        plan_json("p-direct", "pro", 50),
      )))
      .mount(&server)
      .await;
    mock_membership_plans(&server, &[("t1", 500)]).await;

    let plan = resolver_for(&server).resolve("u1").await.unwrap();
    assert_eq!(plan.name, "pro");
    assert_eq!(plan.max_pins, 50);
  }

  #[tokio::test]
  async fn highest_pin_limit_wins_among_memberships() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/subscription/user/u1"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;
    mock_membership_plans(&server, &[("t1", 100), ("t2", 250)]).await;

    let plan = resolver_for(&server).resolve("u1").await.unwrap();
    assert_eq!(plan.max_pins, 250);
  }

  #[tokio::test]
  async fn no_subscription_anywhere_falls_back_to_free() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/subscription/user/u1"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/user/memberships"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/plan/by_name/free"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "id": "p-free",
        "name": "free",
        "max_pins": 10,
        "features": {},
      })))
      .mount(&server)
      .await;

    let plan = resolver_for(&server).resolve("u1").await.unwrap();
    assert_eq!(plan.name, "free");
  }

  #[tokio::test]
  async fn inactive_direct_subscription_is_ignored() {
    let server = MockServer::start().await;
    let mut cancelled = subscription_json("u1", "user", plan_json("p-direct", "pro", 50));
    cancelled["status"] = serde_json::json!("cancelled");
    Mock::given(method("GET"))
      .and(path("/api/subscription/user/u1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(cancelled))
      .mount(&server)
      .await;
    mock_membership_plans(&server, &[("t1", 100)]).await;

    let plan = resolver_for(&server).resolve("u1").await.unwrap();
    assert_eq!(plan.max_pins, 100);
  }

  #[tokio::test]
  async fn pin_gate_compares_link_count_against_the_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/subscription/user/u1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(subscription_json(
        "u1",
        "user",
        plan_json("p-direct", "pro", 2),
      )))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/user/links"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
        {
          "id": "l1", "owner_id": "u1", "owner_type": "user", "title": "A",
          "url": "http://a.com", "column_type": "tools", "order_index": 0,
        },
        {
          "id": "l2", "owner_id": "u1", "owner_type": "user", "title": "B",
          "url": "http://b.com", "column_type": "tools", "order_index": 1,
        },
      ])))
      .mount(&server)
      .await;

    let resolver = resolver_for(&server);
    assert!(!resolver.allows("u1", GateAction::Pin).await.unwrap());
    assert!(resolver.allows("u1", GateAction::Domain).await.unwrap());
    assert!(!resolver.allows("u1", GateAction::Analytics).await.unwrap());
  }
}
