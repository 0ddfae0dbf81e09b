//! Page handlers (HTML responses)

use axum::extract::State;
use axum::response::Html;
use std::collections::HashMap;

use crate::api::{html, process_template_file, renderer, session, App, OpError, Params};
use crate::db::row::{field, DataRow};
use crate::render::dashboard::{DashboardBuilder, DASHBOARD_HELPER};
use crate::render::summary;
use crate::AppState;

/// GET|POST /service/workmanager/login
///
/// Authenticates and renders the level-1 dashboard; a failed login renders
/// the login template with an error message.
pub async fn login(
    State(state): App,
    Params(request): Params,
) -> Result<Html<String>, OpError> {
    let store = session(&state.site, &request)?;

    let username = request.get("username").to_string();
    let password = request.get("password").to_string();
    let user_info = state.status_db.authenticate(&username, &password).await?;

    match user_info {
        Some(user) => {
            let mut request = request;
            request.set("sessionid", store.id());
            let page = level1_page(&state, &store, request, &user).await?;
            Ok(html(page))
        }
        None => {
            let mut params = HashMap::new();
            params.insert("sessionid".to_string(), store.id().to_string());
            params.insert("message".to_string(), "Invalid Login".to_string());
            Ok(html(process_template_file(
                &state.site,
                "login_tmplt.html",
                &params,
            )))
        }
    }
}

/// GET|POST /service/workmanager/logout
pub async fn logout(State(state): App, Params(_request): Params) -> Html<String> {
    let mut params = HashMap::new();
    params.insert("sessionid".to_string(), String::new());
    params.insert("message".to_string(), String::new());
    html(process_template_file(
        &state.site,
        "login_tmplt.html",
        &params,
    ))
}

/// Assemble and render the level-1 dashboard page
async fn level1_page(
    state: &AppState,
    store: &wfm_common::SessionStore,
    request: wfm_common::RequestValues,
    user: &DataRow,
) -> Result<String, OpError> {
    let inner = renderer(state, store, request.clone(), "level1_config.cif")?;
    let results = DashboardBuilder::new(inner, store.clone()).run().await;

    let mut outer = renderer(state, store, request, "level1_config.cif")?;
    outer.set_helper_results(DASHBOARD_HELPER, results);

    let mut data = DataRow::new();
    data.insert(
        "breadcrumbs".to_string(),
        "[1]Deposition Summary".to_string(),
    );
    data.insert(
        "pageTitle".to_string(),
        "Deposition Summary : Level 1 :".to_string(),
    );
    data.insert("comment_start".to_string(), " ".to_string());
    data.insert("comment_end".to_string(), " ".to_string());
    match field(user, "code") {
        "DEP" => {
            data.insert(
                "breadcrumbs".to_string(),
                "[1]Summary of entries being deposited".to_string(),
            );
            data.insert("comment_start".to_string(), "<!--".to_string());
            data.insert("comment_end".to_string(), "-->".to_string());
        }
        "LANN" => {
            data.insert(
                "pageTitle".to_string(),
                "[Level 1] Lead Annotator Screen".to_string(),
            );
            data.insert("comment_start".to_string(), "<!--".to_string());
            data.insert("comment_end".to_string(), "-->".to_string());
        }
        _ => {}
    }
    outer.set_row("level1_tmplt", data);

    Ok(outer.render_page("level1_tmplt", None).await)
}

/// GET|POST /service/workmanager/summary
pub async fn summary(
    State(state): App,
    Params(request): Params,
) -> Result<Html<String>, OpError> {
    let store = session(&state.site, &request)?;
    let mut page = renderer(&state, &store, request, "summary_config.cif")?;
    summary::summary_page(&mut page).await;
    Ok(html(page.render_page("summary_tmplt", None).await))
}

/// GET|POST /service/workmanager/replacementhist
pub async fn replacement_history(
    State(state): App,
    Params(request): Params,
) -> Result<Html<String>, OpError> {
    let store = session(&state.site, &request)?;
    let mut page = renderer(&state, &store, request, "replacement_config.cif")?;
    summary::replacement_page(&mut page).await;
    Ok(html(page.render_page("replacement_tmplt", None).await))
}

/// GET|POST /service/workmanager/filereports
pub async fn file_reports(
    State(state): App,
    Params(request): Params,
) -> Result<Html<String>, OpError> {
    let store = session(&state.site, &request)?;
    let mut page = renderer(&state, &store, request, "allfile_config.cif")?;
    summary::all_file_page(&mut page).await;
    Ok(html(page.render_page("allfile_tmplt", None).await))
}

/// GET|POST /service/workmanager/level2
///
/// Entry page with the annotation workflow module grid.
pub async fn level2(
    State(state): App,
    Params(request): Params,
) -> Result<Html<String>, OpError> {
    let store = session(&state.site, &request)?;
    let mut page = renderer(&state, &store, request, "level2_config.cif")?;
    summary::level_page_setting(&mut page, "level2_tmplt").await;
    let workflow_fragment = summary::level2_workflow(&mut page).await;
    page.set_text("workflow_module", workflow_fragment);
    Ok(html(page.render_page("level2_tmplt", None).await))
}

/// GET|POST /service/workmanager/level3
///
/// Per-instance task detail page.
pub async fn level3(
    State(state): App,
    Params(request): Params,
) -> Result<Html<String>, OpError> {
    let store = session(&state.site, &request)?;
    let mut page = renderer(&state, &store, request, "level3_config.cif")?;
    summary::level_page_setting(&mut page, "level3_tmplt").await;
    Ok(html(page.render_page("level3_tmplt", None).await))
}

/// GET|POST /service/workmanager/edituserdata
///
/// User administration page (privilege and active-account toggles).
pub async fn edit_user(
    State(state): App,
    Params(request): Params,
) -> Result<Html<String>, OpError> {
    let store = session(&state.site, &request)?;
    let mut page = renderer(&state, &store, request, "user_config.cif")?;
    Ok(html(page.render_page("edituser_tmplt", None).await))
}
