//! User administration and assignment handlers (JSON responses)

use axum::extract::State;
use axum::response::Json;
use serde_json::Value;

use crate::api::{entry_list, json_status, App, OpError, Params};
use crate::db::row::field;

/// GET|POST /service/workmanager/getpassword
pub async fn get_password(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let dep_id = request.get("identifier");
    let info = state.status_db.get_dep_info(dep_id).await?;
    let password = info
        .as_ref()
        .map(|row| field(row, "deppw").to_string())
        .unwrap_or_default();
    if password.is_empty() {
        return Ok(json_status(
            "",
            &format!("Can't find password for entry {}", dep_id),
        ));
    }
    Ok(json_status(&password, ""))
}

/// GET|POST /service/workmanager/saveuserdata
pub async fn save_user(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let error = state
        .status_db
        .update_user(
            request.get("password"),
            request.get("email"),
            request.get("first_name"),
            request.get("last_name"),
            request.get("user_name"),
        )
        .await;
    Ok(json_status("User Information Updated.", &error))
}

/// GET|POST /service/workmanager/changeprivilege
///
/// Toggles a user between annotator and lead-annotator groups.
pub async fn change_privilege(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let user = state
        .status_db
        .get_user_by_initials(request.get("annotator"))
        .await?
        .unwrap_or_default();
    let error = state
        .status_db
        .update_user_privilege(
            request.get("user_name"),
            request.get("value"),
            field(&user, "site"),
        )
        .await;
    Ok(json_status("Privilege changed.", &error))
}

/// GET|POST /service/workmanager/changeactiveuser
pub async fn change_active_user(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let error = state
        .status_db
        .update_user_active(request.get("user_name"), request.get("value"))
        .await;
    Ok(json_status("Active user changed.", &error))
}

/// GET|POST /service/workmanager/assign
///
/// Records an annotator assignment for each posted entry.
pub async fn assign(State(state): App, Params(request): Params) -> Result<Json<Value>, OpError> {
    let annotator = request.get("annotator").to_string();
    let mut entries = entry_list(&request);
    if entries.is_empty() && request.has("identifier") {
        entries.push(request.get("identifier").to_string());
    }
    if entries.is_empty() {
        return Ok(json_status("", "No deposition ID defined."));
    }

    let mut errors = String::new();
    for entry_id in &entries {
        let error = state.status_db.assign_annotator(entry_id, &annotator).await;
        if !error.is_empty() {
            if !errors.is_empty() {
                errors.push('\n');
            }
            errors.push_str(&error);
        }
    }
    Ok(json_status("Annotator assigned.", &errors))
}
