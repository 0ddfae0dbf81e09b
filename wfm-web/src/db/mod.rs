//! Database access objects
//!
//! Two logical databases: the status database (users, depositions, workflow
//! instances, communication) and the content database (authorship, audit
//! history, ligand/validation content).

pub mod content;
pub mod row;
pub mod stats;
pub mod status;

pub use content::ContentDb;
pub use stats::StatsReporter;
pub use status::StatusDb;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use wfm_common::Result;

/// Open a connection pool on a SQLite database file
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}
