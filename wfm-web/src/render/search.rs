//! Search condition binding
//!
//! Rewrites one cached table's SQL from the UI's search inputs: the search
//! type selects a configured where-condition, optionally expanded through a
//! dependence sub-query, and the composed SQL replaces the table's previous
//! statement in the session store. The next refresh materializes the result.

use std::collections::HashMap;
use tracing::warn;
use wfm_common::SessionStore;

use crate::db::row::{field, has_field};
use crate::db::{ContentDb, StatusDb};
use crate::render::content::{TableContentMap, TABLE_CONTENT_MAP_KEY};
use crate::render::page::substitute;
use crate::render::schema::ConfigSchema;

/// Applies search conditions to cached table definitions
pub struct SearchQuery<'a> {
    config: &'a ConfigSchema,
    store: &'a SessionStore,
    status_db: &'a StatusDb,
    content_db: &'a ContentDb,
}

impl<'a> SearchQuery<'a> {
    pub fn new(
        config: &'a ConfigSchema,
        store: &'a SessionStore,
        status_db: &'a StatusDb,
        content_db: &'a ContentDb,
    ) -> Self {
        Self {
            config,
            store,
            status_db,
            content_db,
        }
    }

    /// Bind the search value into the indexed table's SQL
    pub async fn update_sql(&self, index: &str, search_type: &str, value: &str) {
        if index.is_empty() || search_type.is_empty() {
            return;
        }
        let mut table_map: TableContentMap = match self.store.load(TABLE_CONTENT_MAP_KEY) {
            Ok(Some(map)) => map,
            _ => return,
        };
        let Some(table) = table_map.get_mut(index) else {
            return;
        };
        let Some(binding) = self
            .config
            .ui_input_where_condition_binding
            .get(search_type)
        else {
            return;
        };

        let bound_value = if has_field(binding, "dependence_id") {
            self.dependence_value(field(binding, "dependence_id"), value)
                .await
        } else if search_type == "entry_by_ids" {
            let (error, ids) = self.status_db.entry_id_list_from_input(value);
            if !error.is_empty() {
                warn!("Search id parse failed: {}", error);
            }
            ids.join("', '")
        } else if matches!(search_type, "user_by_ids" | "dep_by_ids" | "group_by_ids") {
            value
                .split(',')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("', '")
        } else {
            value.to_string()
        };

        let mut params = HashMap::new();
        params.insert("value".to_string(), bound_value);
        let where_condition = substitute(field(binding, "where_condition"), &params);
        let selection = table.sql_selection.clone().unwrap_or_default();
        table.sql = Some(format!("{} {}", selection, where_condition));

        if let Err(e) = self.store.save(TABLE_CONTENT_MAP_KEY, &table_map) {
            warn!("Failed to save table content map: {}", e);
        }
    }

    /// Expand a dependence sub-query into a quoted id list
    async fn dependence_value(&self, dependence_id: &str, value: &str) -> String {
        let Some(dependence) = self.config.ui_input_dependence.get(dependence_id) else {
            return value.to_string();
        };
        let mut sql = field(dependence, "sql").to_string();
        if !value.is_empty() {
            let mut params = HashMap::new();
            params.insert("value".to_string(), value.to_string());
            sql = substitute(&sql, &params);
        }
        let rows = if field(dependence, "db") == "contentDB" {
            self.content_db.run_select(&sql).await
        } else {
            self.status_db.run_select(&sql).await
        };
        let rows = rows.unwrap_or_else(|e| {
            warn!("Dependence query failed: {}", e);
            Vec::new()
        });
        rows.iter()
            .map(|row| field(row, "id"))
            .filter(|id| !id.is_empty())
            .collect::<Vec<_>>()
            .join("', '")
    }
}
