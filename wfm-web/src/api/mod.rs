//! HTTP request handling
//!
//! Handlers read their inputs from merged query/form values, compose the
//! render/db/task components, and answer with HTML (page or fragment) or a
//! JSON envelope. Two envelope shapes are used: `{statuscode, statustext}`
//! for two-valued operations and `{status, map}` for count/table payloads.
//!
//! No handler error escapes: every fallible path funnels through
//! [`OpError`], which logs the cause and answers with the opaque
//! `Operation failure` message.

pub mod admin;
pub mod downloads;
pub mod pages;
pub mod tables;
pub mod tasks;

use axum::extract::{FromRequest, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::Form;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;
use wfm_common::{RequestValues, SessionStore, SiteConfig};

use crate::render::{ConfigLoader, PageRenderer};
use crate::AppState;

/// Handler fault wrapper: logs the cause, answers `Operation failure`
///
/// The specific cause is never surfaced to the UI.
pub struct OpError(wfm_common::Error);

impl From<wfm_common::Error> for OpError {
    fn from(e: wfm_common::Error) -> Self {
        Self(e)
    }
}

impl From<std::io::Error> for OpError {
    fn from(e: std::io::Error) -> Self {
        Self(e.into())
    }
}

impl From<sqlx::Error> for OpError {
    fn from(e: sqlx::Error) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for OpError {
    fn into_response(self) -> Response {
        error!("Operation failure: {}", self.0);
        (
            StatusCode::OK,
            Json(json!({
                "statuscode": "failed",
                "statustext": "Operation failure",
            })),
        )
            .into_response()
    }
}

/// Merged query/form values for one request
pub struct Params(pub RequestValues);

#[axum::async_trait]
impl FromRequest<AppState> for Params {
    type Rejection = OpError;

    async fn from_request(
        req: axum::extract::Request,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let mut values: HashMap<String, String> = Query::try_from_uri(req.uri())
            .map(|Query(query)| query)
            .unwrap_or_default();
        if let Ok(Form(form)) = Form::<HashMap<String, String>>::from_request(req, state).await {
            values.extend(form);
        }
        Ok(Self(RequestValues::from_map(values)))
    }
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "module": "wfm-web",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Two-valued JSON envelope: empty error is success
pub fn json_status(text: &str, error: &str) -> Json<Value> {
    if error.is_empty() {
        Json(json!({"statuscode": "ok", "statustext": text}))
    } else {
        Json(json!({"statuscode": "failed", "statustext": error}))
    }
}

/// Count/table JSON envelope
pub fn json_map(map: Value) -> Json<Value> {
    Json(json!({"status": "ok", "map": map}))
}

/// Join the request's session, creating one when no id is supplied
pub fn session(site: &SiteConfig, request: &RequestValues) -> Result<SessionStore, OpError> {
    let session_id = request.get("sessionid");
    let store = if session_id.is_empty() {
        SessionStore::create(&site.session_path)?
    } else {
        SessionStore::join(&site.session_path, session_id)?
    };
    Ok(store)
}

/// Page renderer over a page group's configuration
pub fn renderer(
    state: &AppState,
    store: &SessionStore,
    request: RequestValues,
    config_file: &str,
) -> Result<PageRenderer, OpError> {
    let loader = ConfigLoader::new(state.site.template_path.clone(), store.clone());
    let schema = loader.load(config_file)?;
    Ok(PageRenderer::new(
        schema,
        Arc::clone(&state.site),
        request,
        state.status_db.clone(),
        state.content_db.clone(),
    ))
}

/// Read an HTML template file and substitute `%(name)s` placeholders
pub fn process_template_file(
    site: &SiteConfig,
    file: &str,
    params: &HashMap<String, String>,
) -> String {
    let path = site.template_path.join(file);
    let body = std::fs::read_to_string(&path).unwrap_or_default();
    crate::render::page::substitute(&body, params)
}

/// Shorthand for HTML responses
pub fn html(text: String) -> Html<String> {
    Html(text)
}

/// Entry list from the `entry_ids` request value
pub fn entry_list(request: &RequestValues) -> Vec<String> {
    request
        .get("entry_ids")
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// State alias used by the handler modules
pub type App = State<AppState>;
