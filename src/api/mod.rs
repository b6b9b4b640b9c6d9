//! Backend API surface: wire types and the authenticated client facade.

mod client;
mod types;

pub use client::{ApiClient, Session};
pub use types::{
  AuthResponse, AuthUser, CreateLinkRequest, EntityKind, Link, LinkOrder, Member, Membership,
  Organization, Plan, PlanFeatures, SettingKey, SettingsRecord, Subscription, Team,
  UpdateLinkRequest, User, UserDataResponse, UserSettings,
};
