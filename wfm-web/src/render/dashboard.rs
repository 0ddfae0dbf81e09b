//! Level-1 dashboard assembly
//!
//! Resolves the user's tab template, numbers the tabs, builds table header
//! cells, composes each table's runtime SQL, records the table content map
//! in the session store, renders the tab section templates, and finally
//! materializes every table to collect the entry-count map. The collected
//! result map feeds the outer page render through function-call bindings.

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::warn;
use wfm_common::SessionStore;

use crate::db::row::{field, has_field, DataRow};
use crate::render::content::{
    call_bound_table, RuntimeTable, TableContentBuilder, TableContentMap, TABLE_CONTENT_MAP_KEY,
};
use crate::render::page::{substitute, PageRenderer};
use crate::render::schema::TableSpec;

/// Helper name the dashboard's results are registered under
pub const DASHBOARD_HELPER: &str = "dashboard";

/// Builds the per-session dashboard state and result map
pub struct DashboardBuilder {
    renderer: PageRenderer,
    store: SessionStore,
    user_id: String,
    tab_def_id: String,
    tab_count_id: String,
    results: HashMap<String, Value>,
    table_content_map: TableContentMap,
    /// tab count id -> count type -> counted items
    count_map: HashMap<String, HashMap<String, Vec<String>>>,
}

impl DashboardBuilder {
    pub fn new(renderer: PageRenderer, store: SessionStore) -> Self {
        let user_id = renderer.request().get("username").to_uppercase();
        Self {
            renderer,
            store,
            user_id,
            tab_def_id: String::new(),
            tab_count_id: String::new(),
            results: HashMap::new(),
            table_content_map: TableContentMap::new(),
            count_map: HashMap::new(),
        }
    }

    /// Assemble the dashboard and return its result map
    pub async fn run(mut self) -> HashMap<String, Value> {
        let tabs = self.tab_list().await;
        if tabs.is_empty() {
            return self.results;
        }

        self.renderer.user_info().await;
        let ann_selection = self.renderer.annotator_selection().await;
        self.renderer.set_text("ann_selection", ann_selection);

        let mut all_tab_ids = Vec::new();
        for (count, tab) in tabs.iter().enumerate() {
            self.tab_def_id = tab.clone();
            self.tab_count_id = format!("id_{}", count + 1);
            all_tab_ids.push(self.tab_count_id.clone());
            self.results
                .entry("firstTab".to_string())
                .or_insert_with(|| json!(self.tab_count_id));
            self.renderer.set_text("tab_id", self.tab_count_id.clone());
            self.process_table_definition().await;
            self.process_tab_definition().await;
        }
        self.results
            .insert("all_tab_ids".to_string(), json!(all_tab_ids.join(",")));

        for table in self.table_content_map.values_mut() {
            if let Some(counts) = self.count_map.get(&table.tab_count_id) {
                table.entry_count = counts.clone();
            }
        }

        if let Err(e) = self.store.save(TABLE_CONTENT_MAP_KEY, &self.table_content_map) {
            warn!("Failed to save table content map: {}", e);
        }

        let DashboardBuilder {
            renderer,
            store,
            mut results,
            ..
        } = self;
        let mut builder = TableContentBuilder::new(renderer, store);
        let counts = builder.build("all").await;
        results.insert("entry_count_map".to_string(), json!(counts));
        results
    }

    /// Tabs of the user's template, filtered by status-db table availability
    async fn tab_list(&mut self) -> Vec<String> {
        let template_id = self
            .renderer
            .config()
            .user_template_mapping
            .get(&self.user_id)
            .cloned()
            .unwrap_or_else(|| "default_template".to_string());

        let Some(rows) = self
            .renderer
            .config()
            .level1_template_definition
            .get(&template_id)
            .cloned()
        else {
            return Vec::new();
        };

        let mut tabs = Vec::new();
        for row in rows {
            if !has_field(&row, "condition_type") || !has_field(&row, "condition_value") {
                tabs.push(field(&row, "tab_id").to_string());
            } else if field(&row, "condition_type") == "statusDB"
                && self
                    .renderer
                    .status_db()
                    .is_table_valid(field(&row, "condition_value"))
                    .await
            {
                tabs.push(field(&row, "tab_id").to_string());
            }
        }
        tabs
    }

    async fn process_table_definition(&mut self) {
        let Some(tables) = self
            .renderer
            .config()
            .table_definition
            .get(&self.tab_def_id)
            .cloned()
        else {
            return;
        };

        let mut data_rows = Vec::new();
        let mut table_load = Vec::new();
        for spec in tables.values() {
            let cache_key = format!("table_content_{}", self.table_content_map.len() + 1);
            table_load.push(json!([spec.load, spec.table_id, cache_key]));

            let mut data_row = DataRow::new();
            data_row.insert("tab_id".to_string(), self.tab_count_id.clone());
            data_row.insert("table_id".to_string(), spec.table_id.clone());
            data_row.insert("display".to_string(), spec.display.clone());
            if let Some(title) = &spec.title {
                data_row.insert("table_title".to_string(), title.clone());
            }
            data_row.insert("table_option".to_string(), spec.option.clone());

            if !spec.columns.is_empty() {
                let (labels, data_fields) =
                    self.column_list_and_fields(&spec.table_id, &spec.columns);
                data_row.insert("column_labels".to_string(), labels.join("\n"));
                let runtime = self.table_runtime(spec, data_fields, cache_key).await;
                self.table_content_map
                    .insert(format!("{}_{}", self.tab_count_id, spec.table_id), runtime);
            } else if let Some(function) = &spec.binding_function {
                let runtime = RuntimeTable {
                    tab_count_id: self.tab_count_id.clone(),
                    cache_key: cache_key.clone(),
                    binding_function: Some(function.clone()),
                    binding_class: spec.binding_class.clone(),
                    ..RuntimeTable::default()
                };
                let (columns, _rows) = call_bound_table(
                    self.renderer.status_db(),
                    self.renderer.content_db(),
                    spec.binding_class.as_deref(),
                    function,
                )
                .await;
                self.table_content_map
                    .insert(format!("{}_{}", self.tab_count_id, spec.table_id), runtime);
                let (labels, _fields) = self.column_list_and_fields(&spec.table_id, &columns);
                data_row.insert("column_labels".to_string(), labels.join("\n"));
            }

            data_rows.push(data_row);
        }

        if !data_rows.is_empty() {
            self.renderer.set_rows("data_table_tmplt", data_rows);
        }
        if !table_load.is_empty() {
            let map = self
                .results
                .entry("table_id_map".to_string())
                .or_insert_with(|| json!({}));
            if let Some(object) = map.as_object_mut() {
                object.insert(self.tab_count_id.clone(), Value::Array(table_load));
            }
        }
    }

    /// Header `<th>` cells and data-field list for one table
    ///
    /// `data-visible` honors per-user and site-wide column configuration
    /// overrides before the column definition's own default.
    fn column_list_and_fields(
        &self,
        table_id: &str,
        columns: &[DataRow],
    ) -> (Vec<String>, Vec<String>) {
        let mut labels = Vec::new();
        let mut data_fields = Vec::new();
        for column in columns {
            let data_field = field(column, "data-field");
            data_fields.push(data_field.to_string());
            let mut cell = "<th".to_string();
            for item in [
                "data-field",
                "data-sortable",
                "data-visible",
                "data-sorter",
                "data-sort-name",
                "data-cell-style",
            ] {
                if item == "data-visible" {
                    let user_key = format!(
                        "{}-{}-{}-{}",
                        self.user_id, self.tab_def_id, table_id, data_field
                    );
                    let all_key =
                        format!("all-{}-{}-{}", self.tab_def_id, table_id, data_field);
                    let config = &self.renderer.config().user_tab_table_column_config;
                    if let Some(visible) = config.get(&user_key) {
                        if visible == "false" {
                            cell.push_str(" data-visible=\"false\"");
                        }
                    } else if let Some(visible) = config.get(&all_key) {
                        if visible == "false" {
                            cell.push_str(" data-visible=\"false\"");
                        }
                    } else if has_field(column, item) {
                        cell.push_str(&format!(" {}=\"{}\"", item, field(column, item)));
                    }
                } else if has_field(column, item) {
                    cell.push_str(&format!(" {}=\"{}\"", item, field(column, item)));
                }
            }
            cell.push_str(&format!(">{}</th>", field(column, "label")));
            labels.push(cell);
        }
        (labels, data_fields)
    }

    /// Compose the runtime SQL for a column-bound table
    async fn table_runtime(
        &mut self,
        spec: &TableSpec,
        data_fields: Vec<String>,
        cache_key: String,
    ) -> RuntimeTable {
        let mut runtime = RuntimeTable {
            tab_count_id: self.tab_count_id.clone(),
            cache_key,
            data_fields,
            order_condition: spec.order_condition.clone(),
            sort_function: spec.sort_function.clone(),
            ..RuntimeTable::default()
        };

        let selection = spec.sql_selection.clone().unwrap_or_default();
        match &spec.sql_where_condition {
            Some(where_condition) => {
                let composed = match spec.sql_variable.as_deref() {
                    Some("retired_annotator") => {
                        let initials = self
                            .renderer
                            .status_db()
                            .get_retired_annotator_initials()
                            .await
                            .unwrap_or_default();
                        let joined = if initials.is_empty() {
                            "Not_Found".to_string()
                        } else {
                            initials.join("', '")
                        };
                        let mut params = HashMap::new();
                        params.insert("retired_annotator".to_string(), joined);
                        substitute(where_condition, &params)
                    }
                    Some(_) => {
                        // The remaining variables name user-info fields
                        // (initials, site)
                        let info = self.renderer.user_info().await.clone();
                        substitute(where_condition, &info)
                    }
                    None => where_condition.clone(),
                };
                runtime.sql = Some(format!("{} {}", selection, composed));
            }
            None => {
                runtime.sql_selection = Some(selection);
            }
        }
        runtime
    }

    async fn process_tab_definition(&mut self) {
        let Some(sections) = self
            .renderer
            .config()
            .tab_definition_template
            .get(&self.tab_def_id)
            .cloned()
        else {
            return;
        };

        for section in sections {
            if field(&section, "template_type") != "html" {
                continue;
            }
            let params = self.preprocess_parameters(&section);
            let page = self
                .renderer
                .render_page(field(&section, "template_id"), Some(params))
                .await;
            if page.is_empty() {
                continue;
            }
            let section_id = field(&section, "section_id").to_string();
            let list = self
                .results
                .entry(section_id)
                .or_insert_with(|| json!([]));
            if let Some(array) = list.as_array_mut() {
                array.push(json!(page));
            }
        }
    }

    /// Pre-substitution parameters for a tab section, including rendered
    /// count placeholders when the section declares them
    fn preprocess_parameters(&mut self, section: &DataRow) -> HashMap<String, String> {
        let mut params = HashMap::new();
        let key = format!("{},{}", self.tab_def_id, field(section, "template_id"));
        let Some(mappings) = self
            .renderer
            .config()
            .tab_preprocess_mapping
            .get(&key)
            .cloned()
        else {
            return params;
        };

        let mut counts = HashMap::new();
        if has_field(section, "count_type")
            && has_field(section, "count_variables")
            && has_field(section, "count_template")
        {
            let items: Vec<String> = field(section, "count_variables")
                .split(',')
                .map(str::to_string)
                .collect();
            self.count_map
                .entry(self.tab_count_id.clone())
                .or_default()
                .insert(field(section, "count_type").to_string(), items.clone());

            let template = self.renderer.page_template(field(section, "count_template"));
            let rendered: Vec<String> = items
                .iter()
                .map(|item| {
                    let mut map = HashMap::new();
                    map.insert("type".to_string(), field(section, "count_type").to_string());
                    map.insert("variable".to_string(), item.clone());
                    map.insert("tab_id".to_string(), self.tab_count_id.clone());
                    substitute(&template, &map)
                })
                .collect();
            counts.insert("counts".to_string(), rendered.join(", "));
        }

        for mapping in &mappings {
            let value = if counts.is_empty() {
                field(mapping, "value").to_string()
            } else {
                substitute(field(mapping, "value"), &counts)
            };
            params.insert(field(mapping, "variable").to_string(), value);
        }
        params
    }
}
