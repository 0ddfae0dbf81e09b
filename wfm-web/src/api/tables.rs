//! Table data handlers (JSON responses)

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::api::{json_map, renderer, session, App, OpError, Params};
use crate::db::row::DataRow;
use crate::render::{SearchQuery, TableContentBuilder};

/// GET|POST /service/workmanager/gettabledata
///
/// Serves a previously materialized table row set from the session store.
pub async fn get_table_data(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let store = session(&state.site, &request)?;
    let cache_key = request.get("cachekey");
    let rows: Vec<DataRow> = store.load(cache_key)?.unwrap_or_default();
    Ok(Json(json!({ "table_rows": rows })))
}

/// GET|POST /service/workmanager/refresh
///
/// Re-materializes one table (`index`) or all tables (`index=all`) and
/// returns the refreshed entry-count map.
pub async fn refresh(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let store = session(&state.site, &request)?;
    let index = request.get("index").to_string();
    let index = if index.is_empty() {
        "all".to_string()
    } else {
        index
    };
    let page = renderer(&state, &store, request, "level1_config.cif")?;
    let mut builder = TableContentBuilder::new(page, store);
    let counts = builder.build(&index).await;
    Ok(json_map(json!(counts)))
}

/// GET|POST /service/workmanager/search
///
/// Binds the search condition into the indexed table's SQL, then
/// re-materializes that table.
pub async fn search(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let store = session(&state.site, &request)?;
    let index = request.get("index").to_string();
    let search_type = request.get("search_type").to_string();
    let value = request.get("value").to_string();

    let page = renderer(&state, &store, request, "level1_config.cif")?;
    SearchQuery::new(page.config(), &store, &state.status_db, &state.content_db)
        .update_sql(&index, &search_type, &value)
        .await;

    let mut builder = TableContentBuilder::new(page, store);
    let counts = builder.build(&index).await;
    Ok(json_map(json!(counts)))
}

/// GET|POST /service/workmanager/edit_my_list
///
/// Adds an entry to (or removes it from) the annotator's personal list,
/// then re-materializes every table.
pub async fn edit_my_list(
    State(state): App,
    Params(request): Params,
) -> Result<Json<Value>, OpError> {
    let store = session(&state.site, &request)?;
    let dep_id = request.get("identifier").to_string();
    let annotator = request.get("annotator").to_string();
    if request.get("type") == "add" {
        state.status_db.add_to_my_list(&dep_id, &annotator).await?;
    } else {
        state.status_db.remove_from_my_list(&dep_id).await?;
    }

    let page = renderer(&state, &store, request, "level1_config.cif")?;
    let mut builder = TableContentBuilder::new(page, store);
    let counts = builder.build("all").await;
    Ok(json_map(json!(counts)))
}
