//! wfm-web library - Deposition Workflow Manager web application
//!
//! Serves the annotator dashboards, dispatches workflow-engine commands,
//! updates status records, and runs auxiliary file tasks through external
//! command-line tools.

use axum::Router;
use std::sync::Arc;
use wfm_common::SiteConfig;

pub mod api;
pub mod db;
pub mod render;
pub mod tasks;
pub mod workflow;

use db::{ContentDb, StatusDb};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub site: Arc<SiteConfig>,
    pub status_db: StatusDb,
    pub content_db: ContentDb,
}

impl AppState {
    pub fn new(site: Arc<SiteConfig>, status_db: StatusDb, content_db: ContentDb) -> Self {
        Self {
            site,
            status_db,
            content_db,
        }
    }
}

/// Build the application router
///
/// Every operation path is fixed; handlers read their inputs from merged
/// query/form values. Any uncaught handler fault is converted into the
/// generic `Operation failure` response by the shared error type.
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let service = Router::new()
        .route("/login", get(api::pages::login).post(api::pages::login))
        .route("/logout", get(api::pages::logout).post(api::pages::logout))
        .route("/summary", get(api::pages::summary).post(api::pages::summary))
        .route(
            "/replacementhist",
            get(api::pages::replacement_history).post(api::pages::replacement_history),
        )
        .route(
            "/filereports",
            get(api::pages::file_reports).post(api::pages::file_reports),
        )
        .route("/level2", get(api::pages::level2).post(api::pages::level2))
        .route("/level3", get(api::pages::level3).post(api::pages::level3))
        .route(
            "/edituserdata",
            get(api::pages::edit_user).post(api::pages::edit_user),
        )
        .route(
            "/gettabledata",
            get(api::tables::get_table_data).post(api::tables::get_table_data),
        )
        .route("/refresh", get(api::tables::refresh).post(api::tables::refresh))
        .route("/search", get(api::tables::search).post(api::tables::search))
        .route(
            "/edit_my_list",
            get(api::tables::edit_my_list).post(api::tables::edit_my_list),
        )
        .route(
            "/getpassword",
            get(api::admin::get_password).post(api::admin::get_password),
        )
        .route(
            "/saveuserdata",
            get(api::admin::save_user).post(api::admin::save_user),
        )
        .route(
            "/changeprivilege",
            get(api::admin::change_privilege).post(api::admin::change_privilege),
        )
        .route(
            "/changeactiveuser",
            get(api::admin::change_active_user).post(api::admin::change_active_user),
        )
        .route("/assign", get(api::admin::assign).post(api::admin::assign))
        .route(
            "/runengine",
            get(api::tasks::run_engine).post(api::tasks::run_engine),
        )
        .route(
            "/rerunworkflow",
            get(api::tasks::rerun_workflow).post(api::tasks::rerun_workflow),
        )
        .route(
            "/killworkflow",
            get(api::tasks::kill_workflow).post(api::tasks::kill_workflow),
        )
        .route(
            "/milestonearchive",
            get(api::tasks::milestone_archive).post(api::tasks::milestone_archive),
        )
        .route(
            "/milestonereset",
            get(api::tasks::milestone_reset).post(api::tasks::milestone_reset),
        )
        .route(
            "/allowupload",
            get(api::tasks::allow_upload).post(api::tasks::allow_upload),
        )
        .route(
            "/preventupload",
            get(api::tasks::prevent_upload).post(api::tasks::prevent_upload),
        )
        .route(
            "/allowsubmit",
            get(api::tasks::allow_submit).post(api::tasks::allow_submit),
        )
        .route(
            "/preventsubmit",
            get(api::tasks::prevent_submit).post(api::tasks::prevent_submit),
        )
        .route(
            "/enableftpupload",
            get(api::tasks::enable_ftp_upload).post(api::tasks::enable_ftp_upload),
        )
        .route(
            "/run_tasks",
            get(api::tasks::run_tasks).post(api::tasks::run_tasks),
        )
        .route(
            "/get_ligand_list",
            get(api::tasks::get_ligand_list).post(api::tasks::get_ligand_list),
        )
        .route(
            "/ciffile",
            get(api::downloads::cif_file).post(api::downloads::cif_file),
        )
        .route(
            "/logfile",
            get(api::downloads::log_file).post(api::downloads::log_file),
        );

    Router::new()
        .nest("/service/workmanager", service)
        .route("/health", get(api::health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
