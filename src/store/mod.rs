//! Domain stores: explicitly constructed service objects owning one entity
//! collection each, wired together by reference.
//!
//! Construction order follows the dependency chain: settings, then links
//! (reads the metadata toggle), then user (patches both on aggregated
//! fetches). All stores are cheap cloneable handles over shared state.

mod links;
mod search_engine;
mod settings;
mod user;

pub use links::{LinksState, LinksStore, COLUMN_SHORTCUTS};
pub use search_engine::{SearchEngine, SearchEngineStore, SEARCH_ENGINES};
pub use settings::{SettingsState, SettingsStore};
pub use user::{UserProfile, UserState, UserStore};
