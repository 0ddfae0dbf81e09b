//! File download handlers

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::{session, App, OpError, Params};
use crate::tasks::{TaskContext, Version};

/// GET|POST /service/workmanager/ciffile
///
/// Serves an entry's model CIF file as an attachment. `version` selects the
/// archive version (`latest` by default); `instance` selects a workflow
/// instance copy instead of the archive file.
pub async fn cif_file(State(state): App, Params(request): Params) -> Result<Response, OpError> {
    let store = session(&state.site, &request)?;
    let context = TaskContext::new(Arc::clone(&state.site), store);
    let dep_id = request.get("identifier");
    let instance = request.get("instance");

    let path = if instance.is_empty() {
        let version = match request.get("version").parse::<u32>() {
            Ok(n) => Version::Number(n),
            Err(_) => Version::Latest,
        };
        context.archive_file(dep_id, "model", "cif", version)
    } else {
        Some(
            state
                .site
                .archive_path
                .join(dep_id)
                .join("wf-instance")
                .join(instance)
                .join(format!("{}_model_P1.cif", dep_id)),
        )
    };

    serve_attachment(path).await
}

/// GET|POST /service/workmanager/logfile
///
/// Serves a workflow instance's log file as an attachment.
pub async fn log_file(State(state): App, Params(request): Params) -> Result<Response, OpError> {
    let dep_id = request.get("identifier");
    let instance = request.get("instance");
    let class_id = request.get("classID");
    let task_id = request.get("taskID");

    let dir = state
        .site
        .archive_path
        .join(dep_id)
        .join("wf-instance")
        .join(instance);
    let name = if task_id.is_empty() {
        format!("{}.log", class_id)
    } else {
        format!("{}_{}.log", class_id, task_id)
    };
    serve_attachment(Some(dir.join(name))).await
}

async fn serve_attachment(path: Option<PathBuf>) -> Result<Response, OpError> {
    let Some(path) = path.filter(|p| p.exists()) else {
        return Ok((StatusCode::NOT_FOUND, "File not found").into_response());
    };
    let data = tokio::fs::read(&path).await?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        data,
    )
        .into_response())
}
