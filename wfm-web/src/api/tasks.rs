//! Workflow command and task runner handlers (JSON responses)

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::{entry_list, json_status, session, App, OpError, Params};
use crate::tasks::{
    milestone, CifChecker, LigandFinder, MetaDataMerger, PdbFileGenerator, SequenceMerger,
    StatusUpdater, TaskContext,
};

/// GET|POST /service/workmanager/runengine
///
/// Queues a workflow engine command for the entry's current instance.
pub async fn run_engine(State(state): App, Params(request): Params) -> Result<Json<Value>, OpError> {
    let error = state
        .status_db
        .push_wf_command(
            request.get("identifier"),
            request.get("classID"),
            request.get("instance"),
            request.get("command"),
        )
        .await;
    Ok(json_status("Workflow command queued.", &error))
}

/// GET|POST /service/workmanager/rerunworkflow
pub async fn rerun_workflow(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let error = state
        .status_db
        .push_wf_command(
            request.get("identifier"),
            request.get("classID"),
            request.get("instance"),
            "runWF",
        )
        .await;
    Ok(json_status("You have restart the Workflow !", &error))
}

/// GET|POST /service/workmanager/killworkflow
pub async fn kill_workflow(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let error = state.status_db.kill_workflow(request.get("identifier")).await;
    Ok(json_status("OK", &error))
}

/// GET|POST /service/workmanager/milestonearchive
pub async fn milestone_archive(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let store = session(&state.site, &request)?;
    let context = TaskContext::new(Arc::clone(&state.site), store);
    let error = milestone::archive_milestone(&context, request.get("identifier"));
    Ok(json_status("Successfully wrote milestone file", &error))
}

/// GET|POST /service/workmanager/milestonereset
pub async fn milestone_reset(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let store = session(&state.site, &request)?;
    let context = TaskContext::new(Arc::clone(&state.site), store);
    let error = milestone::reset_milestone(&context, request.get("identifier"));
    Ok(json_status("OK", &error))
}

/// GET|POST /service/workmanager/allowupload
pub async fn allow_upload(State(state): App, Params(request): Params) -> Result<Json<Value>, OpError> {
    set_deposit_marker(
        &state,
        request.get("identifier"),
        "uploadOK",
        true,
        "You have set this deposition to allow bad uploads !",
        "Failed to allow incomplete upload !",
    )
}

/// GET|POST /service/workmanager/preventupload
pub async fn prevent_upload(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    set_deposit_marker(
        &state,
        request.get("identifier"),
        "uploadOK",
        false,
        "You have prevented bad uploads !",
        "Failed to block incomplete upload !",
    )
}

/// GET|POST /service/workmanager/allowsubmit
pub async fn allow_submit(State(state): App, Params(request): Params) -> Result<Json<Value>, OpError> {
    set_deposit_marker(
        &state,
        request.get("identifier"),
        "submitOK",
        true,
        "You have set this deposition to allow incomplete Deposition !",
        "Failed to allow incomplete submission !",
    )
}

/// GET|POST /service/workmanager/preventsubmit
pub async fn prevent_submit(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    set_deposit_marker(
        &state,
        request.get("identifier"),
        "submitOK",
        false,
        "You have prevented incomplete Deposition !",
        "Failed to block incomplete submission !",
    )
}

/// GET|POST /service/workmanager/enableftpupload
///
/// Creates the entry's FTP drop directory and the marker recording that
/// upload was switched to FTP by an annotator.
pub async fn enable_ftp_upload(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let dep_id = request.get("identifier");
    if dep_id.is_empty() {
        return Ok(json_status("", "No deposition ID defined."));
    }
    let ftp_dir = state.site.ftp.storage_path.join(dep_id);
    if let Err(e) = std::fs::create_dir_all(&ftp_dir) {
        tracing::warn!("FTP folder creation failed: {}", e);
        return Ok(json_status("", "Failed to create FTP user folder"));
    }

    let marker_dir = state.site.deposit_path.join(dep_id);
    let _ = std::fs::create_dir_all(&marker_dir);
    let marker = marker_dir.join("externalUpload.json");
    if std::fs::write(
        &marker,
        json!("File upload in depUI failed; FTP upload enabled by Annotator from WFM").to_string(),
    )
    .is_err()
    {
        return Ok(json_status("", "Failed in enable file import to depUI"));
    }
    Ok(json_status("FTP upload enabled", ""))
}

/// GET|POST /service/workmanager/run_tasks
///
/// Dispatches the named task runner over the posted entry list.
pub async fn run_tasks(State(state): App, Params(request): Params) -> Result<Json<Value>, OpError> {
    let store = session(&state.site, &request)?;
    let context = TaskContext::new(Arc::clone(&state.site), store);
    let entries = entry_list(&request);
    if entries.is_empty() {
        return Ok(json_status("", "No entry selected."));
    }

    let message = match request.get("task") {
        "cifcheck" => CifChecker::new(context, entries).run().await,
        "statusupdate" => {
            StatusUpdater::new(context, &request, entries)
                .run(&state.status_db, &state.content_db)
                .await
        }
        "pdbfile" => PdbFileGenerator::new(context, entries).run().await,
        "metadatamerge" => {
            let template = uploaded_file(&request);
            let recover = request.get("recover") == "yes";
            MetaDataMerger::new(context, entries, template, recover)
                .run()
                .await
        }
        "seqmerge" => {
            let assignment = uploaded_file(&request);
            SequenceMerger::new(context, entries, assignment).run().await
        }
        other => return Ok(json_status("", &format!("Unknown task '{}'.", other))),
    };
    Ok(json_status(&message, ""))
}

/// GET|POST /service/workmanager/get_ligand_list
pub async fn get_ligand_list(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let entries = entry_list(&request);
    let (map, error) = LigandFinder::new(entries).run(&state.content_db).await;
    if !error.is_empty() {
        return Ok(json_status("", &error));
    }
    Ok(Json(json!({"status": "ok", "map": map})))
}

/// Uploaded file path previously staged by the upload handler
fn uploaded_file(request: &wfm_common::RequestValues) -> Option<PathBuf> {
    let path = request.get("uploadfile");
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// Write or remove a deposit-storage marker blob
fn set_deposit_marker(
    state: &crate::AppState,
    dep_id: &str,
    marker: &str,
    allow: bool,
    ok_text: &str,
    fail_text: &str,
) -> Result<Json<Value>, OpError> {
    if dep_id.is_empty() {
        return Ok(json_status("", "No deposition ID defined."));
    }
    let dir = state.site.deposit_path.join(dep_id);
    let path = dir.join(format!("{}.json", marker));
    let ok = if allow {
        std::fs::create_dir_all(&dir).is_ok()
            && std::fs::write(&path, json!("enabled by annotator").to_string()).is_ok()
    } else {
        !path.exists() || std::fs::remove_file(&path).is_ok()
    };
    if ok {
        Ok(json_status(ok_text, ""))
    } else {
        Ok(json_status("", fail_text))
    }
}
