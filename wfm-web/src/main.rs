//! wfm-web - Deposition Workflow Manager web application
//!
//! Serves the annotator dashboards over the status and content databases.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use wfm_common::SiteConfig;
use wfm_web::db::{connect, ContentDb, StatusDb};
use wfm_web::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "wfm-web", about = "Deposition workflow manager web application")]
struct Args {
    /// Site configuration file (falls back to $WFM_CONFIG, then the
    /// compiled default path)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Log build identification immediately after tracing init
    info!(
        "Starting WFM web application (wfm-web) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let site = SiteConfig::resolve(args.config.as_deref())?;
    info!("Site: {} ({})", site.site_id, site.listen);

    std::fs::create_dir_all(&site.session_path)?;

    let status_pool = match connect(&site.status_db_path).await {
        Ok(pool) => {
            info!("✓ Connected to status database");
            pool
        }
        Err(e) => {
            error!("Failed to connect to status database: {}", e);
            return Err(e.into());
        }
    };
    let content_pool = match connect(&site.content_db_path).await {
        Ok(pool) => {
            info!("✓ Connected to content database");
            pool
        }
        Err(e) => {
            error!("Failed to connect to content database: {}", e);
            return Err(e.into());
        }
    };

    let listen = site.listen.clone();
    let state = AppState::new(
        Arc::new(site),
        StatusDb::new(status_pool),
        ContentDb::new(content_pool),
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!("wfm-web listening on http://{}", listen);
    info!("Health check: http://{}/health", listen);

    axum::serve(listener, app).await?;

    Ok(())
}
