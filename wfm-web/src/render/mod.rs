//! Configuration-driven page and table rendering
//!
//! The engine interprets a declarative schema parsed from CIF configuration
//! files: page templates and their parameter bindings, table definitions
//! with bound SQL, and the field derivation rules the dashboards depend on.

pub mod cif;
pub mod content;
pub mod dashboard;
pub mod loader;
pub mod page;
pub mod schema;
pub mod search;
pub mod summary;
pub mod workflow;

pub use content::{TableContentBuilder, TableContentMap, TABLE_CONTENT_MAP_KEY};
pub use dashboard::{DashboardBuilder, DASHBOARD_HELPER};
pub use loader::ConfigLoader;
pub use page::PageRenderer;
pub use schema::ConfigSchema;
pub use search::SearchQuery;
