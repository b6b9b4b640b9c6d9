//! Client-side data layer for a personal new-tab dashboard.
//!
//! The layer is built from three pieces:
//!
//! - a persistent key-value [`cache`](crate::cache) holding timestamped
//!   snapshots of fetched state,
//! - an authenticated HTTP [`api`](crate::api) client facade over the
//!   dashboard backend, and
//! - domain [`store`](crate::store)s (user, links, settings, search engine)
//!   that read through the cache and apply optimistic mutations with full
//!   rollback on failure.
//!
//! Plan resolution and feature gating live in [`plan`](crate::plan);
//! team/organization membership operations in [`teams`](crate::teams).

pub mod api;
pub mod cache;
pub mod config;
pub mod plan;
pub mod store;
pub mod teams;
