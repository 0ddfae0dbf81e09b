//! Integration tests for the wfm-web HTTP surface
//!
//! Drives the router with `tower::ServiceExt::oneshot` over in-memory
//! SQLite fixtures and a temporary session root, covering the health
//! endpoint, the JSON envelopes, and the dispatcher's failure policy.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower::util::ServiceExt;
use wfm_common::SiteConfig;
use wfm_web::db::{ContentDb, StatusDb};
use wfm_web::{build_router, AppState};

async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Should open in-memory database")
}

async fn setup_app(dir: &tempfile::TempDir) -> (axum::Router, SqlitePool) {
    let status_pool = memory_pool().await;
    sqlx::query(
        "create table da_users (user_name text, password text, da_group_id text, email text,
         initials text, first_name text, last_name text, active integer)",
    )
    .execute(&status_pool)
    .await
    .unwrap();
    sqlx::query(
        "create table da_group (da_group_id text, code text, group_name text, site text)",
    )
    .execute(&status_pool)
    .await
    .unwrap();
    sqlx::query(
        "create table deposition (dep_set_id text, depPW text, pdb_id text, bmrb_id text,
         emdb_id text, title text, annotator_initials text, status_code text)",
    )
    .execute(&status_pool)
    .await
    .unwrap();

    std::fs::write(
        dir.path().join("login_tmplt.html"),
        "<html><body>%(message)s session=%(sessionid)s</body></html>",
    )
    .unwrap();

    let site = Arc::new(SiteConfig {
        site_id: "RCSB".to_string(),
        listen: String::new(),
        template_path: dir.path().to_path_buf(),
        session_path: dir.path().join("sessions"),
        status_db_path: Default::default(),
        content_db_path: Default::default(),
        archive_path: dir.path().join("archive"),
        deposit_path: dir.path().join("deposit"),
        workflow_xml_path: dir.path().to_path_buf(),
        urls: Default::default(),
        tools: Default::default(),
        ftp: Default::default(),
    });
    std::fs::create_dir_all(&site.session_path).unwrap();

    let state = AppState::new(
        site,
        StatusDb::new(status_pool.clone()),
        ContentDb::new(memory_pool().await),
    );
    (build_router(state), status_pool)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

async fn text_body(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    String::from_utf8(bytes.to_vec()).expect("Should be UTF-8")
}

#[tokio::test]
async fn health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _status_pool) = setup_app(&dir).await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "wfm-web");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn invalid_login_renders_login_template() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _status_pool) = setup_app(&dir).await;

    let request = Request::builder()
        .method("POST")
        .uri("/service/workmanager/login")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("username=nobody&password=wrong"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = text_body(response.into_body()).await;
    assert!(body.contains("Invalid Login"));
    assert!(body.contains("session="));
}

#[tokio::test]
async fn get_password_unknown_entry_fails_with_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _status_pool) = setup_app(&dir).await;

    let response = app
        .oneshot(get("/service/workmanager/getpassword?identifier=D_404"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response.into_body()).await;
    assert_eq!(body["statuscode"], "failed");
    assert!(body["statustext"]
        .as_str()
        .unwrap()
        .contains("Can't find password"));
}

#[tokio::test]
async fn get_password_returns_stored_password() {
    let dir = tempfile::tempdir().unwrap();
    let (app, status_pool) = setup_app(&dir).await;

    sqlx::query(
        "insert into deposition (dep_set_id, depPW) values ('D_1000001', 'secret-pw')",
    )
    .execute(&status_pool)
    .await
    .unwrap();

    let response = app
        .oneshot(get("/service/workmanager/getpassword?identifier=D_1000001"))
        .await
        .unwrap();
    let body = json_body(response.into_body()).await;
    assert_eq!(body["statuscode"], "ok");
    assert_eq!(body["statustext"], "secret-pw");
}

#[tokio::test]
async fn get_table_data_without_cache_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _status_pool) = setup_app(&dir).await;

    let response = app
        .oneshot(get(
            "/service/workmanager/gettabledata?cachekey=table_content_1",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response.into_body()).await;
    assert_eq!(body["table_rows"], serde_json::json!([]));
}

#[tokio::test]
async fn get_table_data_serves_cached_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _status_pool) = setup_app(&dir).await;

    let store =
        wfm_common::SessionStore::join(&dir.path().join("sessions"), "abc123").unwrap();
    let mut row = std::collections::HashMap::new();
    row.insert("dep_set_id".to_string(), "D_1000001".to_string());
    store.save("table_content_1", &vec![row]).unwrap();

    let response = app
        .oneshot(get(
            "/service/workmanager/gettabledata?sessionid=abc123&cachekey=table_content_1",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response.into_body()).await;
    assert_eq!(body["table_rows"][0]["dep_set_id"], "D_1000001");
}

#[tokio::test]
async fn refresh_without_table_map_returns_empty_counts() {
    let dir = tempfile::tempdir().unwrap();
    // The refresh handler loads the level1 configuration; provide a minimal
    // one in the template dir
    std::fs::create_dir_all(dir.path()).unwrap();
    std::fs::write(
        dir.path().join("level1_config.cif"),
        "data_level1\nloop_\n_page_template.id\n_page_template.type\n_page_template.page\nempty_tmplt inline ' '\n",
    )
    .unwrap();
    let (app, _status_pool) = setup_app(&dir).await;

    let response = app
        .oneshot(get("/service/workmanager/refresh?index=all"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["map"], serde_json::json!({}));
}

#[tokio::test]
async fn handler_faults_become_operation_failure() {
    let dir = tempfile::tempdir().unwrap();
    // No level1_config.cif: the refresh handler's config load fails and the
    // dispatcher converts the fault into the opaque failure envelope
    let (app, _status_pool) = setup_app(&dir).await;

    let response = app
        .oneshot(get("/service/workmanager/refresh?index=all"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response.into_body()).await;
    assert_eq!(body["statuscode"], "failed");
    assert_eq!(body["statustext"], "Operation failure");
}

#[tokio::test]
async fn unknown_operation_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _status_pool) = setup_app(&dir).await;

    let response = app
        .oneshot(get("/service/workmanager/nosuchop"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
