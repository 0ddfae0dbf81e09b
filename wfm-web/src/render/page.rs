//! Template binding engine
//!
//! Resolves a page id to a template body and substitutes its configured
//! parameter bindings: constants, request values, user-info fields, nested
//! pages (recursive render), capability-table function calls, and bound
//! data-row fields. `repeat`-flagged pages render once per pending data row.
//!
//! The rendering contract is total: unresolved page ids, bindings, and
//! fields substitute the empty string and never fail. A dashboard with one
//! broken field must still render the rest.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;
use wfm_common::{RequestValues, SiteConfig};

use crate::db::row::{field, DataRow};
use crate::db::{ContentDb, StatusDb};
use crate::render::schema::{BindingKind, ConfigSchema, FunctionArg};

/// Key of the shared fallback row consulted when a page has no data of its own
pub const DATA_FOR_ALL: &str = "data_for_all";

/// A named data entry available to bindings and function calls
#[derive(Debug, Clone)]
pub enum DataEntry {
    /// Pre-rendered text
    Text(String),
    /// Row queue, consumed front-first by repeat pages
    Rows(VecDeque<DataRow>),
}

/// Configuration-driven page renderer
pub struct PageRenderer {
    config: ConfigSchema,
    site: Arc<SiteConfig>,
    request: RequestValues,
    status_db: StatusDb,
    content_db: ContentDb,
    user_info: DataRow,
    user_info_fetched: bool,
    data: HashMap<String, DataEntry>,
    helper_results: HashMap<String, HashMap<String, Value>>,
}

impl PageRenderer {
    pub fn new(
        config: ConfigSchema,
        site: Arc<SiteConfig>,
        request: RequestValues,
        status_db: StatusDb,
        content_db: ContentDb,
    ) -> Self {
        Self {
            config,
            site,
            request,
            status_db,
            content_db,
            user_info: DataRow::new(),
            user_info_fetched: false,
            data: HashMap::new(),
            helper_results: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ConfigSchema {
        &self.config
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    pub fn request(&self) -> &RequestValues {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut RequestValues {
        &mut self.request
    }

    pub fn status_db(&self) -> &StatusDb {
        &self.status_db
    }

    pub fn content_db(&self) -> &ContentDb {
        &self.content_db
    }

    // ---------------------------------------------------------------
    // Data entries
    // ---------------------------------------------------------------

    /// Bind a row sequence to a page id; repeat pages consume it front-first
    pub fn set_rows(&mut self, key: &str, rows: Vec<DataRow>) {
        self.data
            .insert(key.to_string(), DataEntry::Rows(rows.into()));
    }

    /// Bind a single row to a page id
    pub fn set_row(&mut self, key: &str, row: DataRow) {
        self.set_rows(key, vec![row]);
    }

    /// Bind pre-rendered text to a result name
    pub fn set_text(&mut self, key: &str, text: impl Into<String>) {
        self.data.insert(key.to_string(), DataEntry::Text(text.into()));
    }

    /// Front row of a key's queue
    pub fn front_row(&self, key: &str) -> Option<&DataRow> {
        match self.data.get(key) {
            Some(DataEntry::Rows(rows)) => rows.front(),
            _ => None,
        }
    }

    /// Register a helper's named results for function-call bindings
    pub fn set_helper_results(&mut self, helper: &str, results: HashMap<String, Value>) {
        self.helper_results.insert(helper.to_string(), results);
    }

    // ---------------------------------------------------------------
    // User info
    // ---------------------------------------------------------------

    /// Authenticated (or looked-up) user record, fetched at most once
    pub async fn user_info(&mut self) -> &DataRow {
        if !self.user_info_fetched {
            self.user_info_fetched = true;
            let username = self.request.get("username").to_string();
            let password = self.request.get("password").to_string();
            if !username.is_empty() && !password.is_empty() {
                if let Ok(Some(row)) = self.status_db.authenticate(&username, &password).await {
                    self.user_info = row;
                }
            }
            for key in ["annotator", "initials"] {
                if !self.user_info.is_empty() {
                    break;
                }
                let initials = self.request.get(key).to_string();
                if initials.is_empty() {
                    continue;
                }
                if let Ok(Some(row)) = self.status_db.get_user_by_initials(&initials).await {
                    self.user_info = row;
                }
            }
        }
        &self.user_info
    }

    pub async fn user_info_field(&mut self, name: &str) -> String {
        let info = self.user_info().await;
        field(info, name).to_string()
    }

    // ---------------------------------------------------------------
    // Rendering
    // ---------------------------------------------------------------

    /// Render a page template, empty string when the page cannot be resolved
    pub fn render_page<'a>(
        &'a mut self,
        page_id: &str,
        extra: Option<HashMap<String, String>>,
    ) -> BoxFuture<'a, String> {
        let page_id = page_id.to_string();
        Box::pin(async move { self.render_page_inner(&page_id, extra).await })
    }

    async fn render_page_inner(
        &mut self,
        page_id: &str,
        extra: Option<HashMap<String, String>>,
    ) -> String {
        let (mut template, alias_id) = self.page_template_and_alias(page_id);
        if template.is_empty() {
            return String::new();
        }

        if let Some(extra) = extra {
            template = substitute(&template, &extra);
        }

        let (preprocess, render) = match self.config.page_template_parameter.get(&alias_id) {
            Some((pre, rnd)) => (pre.clone(), rnd.clone()),
            None => (Vec::new(), Vec::new()),
        };

        let pre_map = self.build_params(page_id, &alias_id, &preprocess).await;
        if !pre_map.is_empty() {
            template = substitute(&template, &pre_map);
        }

        let repeat = self
            .config
            .page_template
            .get(&alias_id)
            .map(|p| p.repeat)
            .unwrap_or(false);

        if repeat && self.front_row(page_id).is_some() {
            let mut fragments = Vec::new();
            while self.front_row(page_id).is_some() {
                let map = self.build_params(page_id, &alias_id, &render).await;
                fragments.push(if map.is_empty() {
                    template.clone()
                } else {
                    substitute(&template, &map)
                });
                if let Some(DataEntry::Rows(rows)) = self.data.get_mut(page_id) {
                    rows.pop_front();
                }
            }
            fragments.join("\n")
        } else {
            let map = self.build_params(page_id, &alias_id, &render).await;
            if map.is_empty() {
                template
            } else {
                substitute(&template, &map)
            }
        }
    }

    /// Template body for a page id, without alias fallback
    pub fn page_template(&self, page_id: &str) -> String {
        let Some(page) = self.config.page_template.get(page_id) else {
            return String::new();
        };
        if page.kind == "file" {
            let path = self.site.template_path.join(&page.page);
            match std::fs::read_to_string(&path) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Cannot read template {}: {}", path.display(), e);
                    String::new()
                }
            }
        } else {
            page.page.clone()
        }
    }

    fn page_template_and_alias(&self, page_id: &str) -> (String, String) {
        let template = self.page_template(page_id);
        if !template.is_empty() {
            return (template, page_id.to_string());
        }
        if let Some(alias) = self.config.page_template_alias.get(page_id) {
            let template = self.page_template(alias);
            if !template.is_empty() {
                return (template, alias.clone());
            }
        }
        (String::new(), page_id.to_string())
    }

    async fn build_params(
        &mut self,
        page_id: &str,
        alias_id: &str,
        bindings: &[crate::render::schema::ParameterBinding],
    ) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for binding in bindings {
            let value = match binding.kind {
                BindingKind::Constant => binding.value.clone(),
                BindingKind::RequestValue => self.request.get(&binding.value).to_string(),
                BindingKind::UserInfo => self.user_info_field(&binding.value).await,
                BindingKind::NestedPage => self.render_page(&binding.value, None).await,
                BindingKind::Function => {
                    self.call_function(alias_id, &binding.variable, &binding.value)
                        .await
                }
                BindingKind::DataField => self.data_field(page_id, &binding.value),
            };
            map.insert(binding.variable.clone(), value);
        }
        map
    }

    fn data_field(&self, page_id: &str, name: &str) -> String {
        if let Some(row) = self.front_row(page_id) {
            if let Some(value) = row.get(name) {
                return value.clone();
            }
        } else if let Some(row) = self.front_row(DATA_FOR_ALL) {
            if let Some(value) = row.get(name) {
                return value.clone();
            }
        }
        String::new()
    }

    // ---------------------------------------------------------------
    // Function-call dispatch
    // ---------------------------------------------------------------

    /// Dispatch a configured function call through the capability table
    ///
    /// The call signature is `target,function`; keyword arguments come from
    /// `function_parameter` entries tried under `(page_id, variable)`,
    /// `(page_id, call)`, then `(variable, call)`. Unknown signatures render
    /// the empty string.
    async fn call_function(&mut self, page_id: &str, variable: &str, func_def: &str) -> String {
        let call: String = func_def.chars().filter(|c| !c.is_whitespace()).collect();
        let args = self.function_args(page_id, variable, &call);

        let mut parts = call.splitn(2, ',');
        let target = parts.next().unwrap_or("");
        let function = parts.next().unwrap_or("");

        if target == "self" {
            return self.call_self_function(function, &args).await;
        }
        if let Some(results) = self.helper_results.get(target) {
            if function == "result" {
                let input_type = arg(&args, "input_type");
                let value = results.get(input_type).cloned().unwrap_or(Value::Null);
                return format_result(
                    &value,
                    arg_or(&args, "return_type", "string"),
                    arg_or(&args, "delimiter", ","),
                );
            }
        }
        String::new()
    }

    async fn call_self_function(&mut self, function: &str, args: &HashMap<String, String>) -> String {
        match function {
            "annotator_selection" => self.annotator_selection().await,
            "group_selection" => self.group_selection().await,
            "privilege_table_rows" => {
                self.privilege_table_rows().await;
                String::new()
            }
            "active_user_table_rows" => {
                self.active_user_table_rows().await;
                String::new()
            }
            "data_result" => self.data_result(
                arg(args, "input_type"),
                arg_or(args, "return_type", "string"),
                arg_or(args, "delimiter", ","),
            ),
            "base_url" => self.site.module_url(arg(args, "class_id")).to_string(),
            "enum_list" => self.enum_list(arg(args, "input_type")).await,
            _ => String::new(),
        }
    }

    fn function_args(&self, page_id: &str, variable: &str, call: &str) -> HashMap<String, String> {
        for key in [
            format!("{},{}", page_id, variable),
            format!("{},{}", page_id, call),
            format!("{},{}", variable, call),
        ] {
            if let Some(entries) = self.config.function_parameter.get(&key) {
                return entries
                    .iter()
                    .map(|FunctionArg { name, value }| (name.clone(), value.clone()))
                    .collect();
            }
        }
        HashMap::new()
    }

    /// Format a named data entry for JSON or inline consumption
    pub fn data_result(&self, input_type: &str, return_type: &str, delimiter: &str) -> String {
        match self.data.get(input_type) {
            Some(DataEntry::Text(text)) => text.clone(),
            Some(DataEntry::Rows(rows)) => {
                let value = Value::Array(rows.iter().map(row_to_value).collect());
                format_result(&value, return_type, delimiter)
            }
            None => match return_type {
                "dict" => "{}".to_string(),
                "list" => "[]".to_string(),
                _ => String::new(),
            },
        }
    }

    // ---------------------------------------------------------------
    // Built-in render helpers
    // ---------------------------------------------------------------

    /// Annotator `<option>` list for the user's site, sorted by name
    pub async fn annotator_selection(&mut self) -> String {
        let site = self.user_info_field("site").await;
        let rows = self
            .status_db
            .get_site_annotators("ANN", &site)
            .await
            .unwrap_or_default();
        let mut pairs: Vec<(String, String)> = rows
            .iter()
            .map(|row| {
                (
                    field(row, "initials").to_string(),
                    format!("{} {}", field(row, "first_name"), field(row, "last_name")),
                )
            })
            .collect();
        pairs.sort_by(|a, b| a.1.cmp(&b.1));
        pairs.insert(0, (String::new(), String::new()));
        selection_options(&pairs)
    }

    /// Site group `<option>` list
    pub async fn group_selection(&mut self) -> String {
        let site = self.user_info_field("site").await;
        let rows = self.status_db.get_site_groups(&site).await.unwrap_or_default();
        let mut pairs = vec![(String::new(), String::new())];
        for row in &rows {
            pairs.push((
                field(row, "group_id").to_string(),
                field(row, "group_name").to_string(),
            ));
        }
        selection_options(&pairs)
    }

    /// Populate privilege-toggle row queues for the user admin page
    async fn privilege_table_rows(&mut self) {
        let rows = self.site_user_rows().await;
        let user_name = field(&self.user_info, "user_name").to_string();
        let mut annotators = Vec::new();
        let mut leaders = Vec::new();
        for mut row in rows {
            if field(&row, "active") != "0" {
                continue;
            }
            row.insert("checked".to_string(), String::new());
            let disabled = if field(&row, "user_name") == user_name {
                "disabled=\"true\""
            } else {
                ""
            };
            row.insert("disabled".to_string(), disabled.to_string());
            match field(&row, "code").to_uppercase().as_str() {
                "ANN" => {
                    row.insert("value".to_string(), "LANN".to_string());
                    annotators.push(row);
                }
                "LANN" => {
                    row.insert("value".to_string(), "ANN".to_string());
                    leaders.push(row);
                }
                _ => {}
            }
        }
        self.set_rows("privilege_ann_table_row_tmplt", annotators);
        self.set_rows("privilege_lead_table_row_tmplt", leaders);
    }

    /// Populate the active-user toggle row queue for the user admin page
    async fn active_user_table_rows(&mut self) {
        let rows = self.site_user_rows().await;
        let user_name = field(&self.user_info, "user_name").to_string();
        let mut out = Vec::new();
        for mut row in rows {
            let active = field(&row, "active").to_string();
            row.insert("value".to_string(), active.clone());
            let checked = if active == "0" { "checked" } else { "" };
            row.insert("checked".to_string(), checked.to_string());
            let disabled = if field(&row, "user_name") == user_name {
                "disabled=\"true\""
            } else {
                ""
            };
            row.insert("disabled".to_string(), disabled.to_string());
            out.push(row);
        }
        self.set_rows("atvice_user_table_row_tmplt", out);
    }

    async fn site_user_rows(&mut self) -> Vec<DataRow> {
        let site = self.user_info_field("site").await;
        if site.is_empty() {
            return Vec::new();
        }
        self.status_db.get_site_users(&site).await.unwrap_or_default()
    }

    async fn enum_list(&mut self, input_type: &str) -> String {
        let pairs = match input_type {
            "entry_by_initial" => {
                let site = self.user_info_field("site").await;
                let rows = self
                    .status_db
                    .get_site_annotators("ANN", &site)
                    .await
                    .unwrap_or_default();
                let mut pairs: Vec<(String, String)> = rows
                    .iter()
                    .map(|row| {
                        (
                            field(row, "initials").to_string(),
                            format!("{} {}", field(row, "first_name"), field(row, "last_name")),
                        )
                    })
                    .collect();
                pairs.sort_by(|a, b| a.1.cmp(&b.1));
                pairs.insert(0, (String::new(), String::new()));
                pairs
            }
            _ => return "[]".to_string(),
        };
        let value = Value::Array(
            pairs
                .into_iter()
                .map(|(a, b)| Value::Array(vec![Value::String(a), Value::String(b)]))
                .collect(),
        );
        value.to_string()
    }

    /// External PDB accession map for the rows' internal PDB ids
    pub async fn pdb_ext_id_map(&self, rows: &[DataRow]) -> HashMap<String, String> {
        let ids: Vec<String> = rows
            .iter()
            .map(|row| field(row, "pdb_id").to_string())
            .filter(|id| !id.is_empty())
            .collect();
        self.content_db.pdb_ext_id_map(&ids).await.unwrap_or_default()
    }
}

/// Replace `%(name)s` placeholders with map values; unknown names are kept
pub fn substitute(template: &str, params: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in params {
        out = out.replace(&format!("%({})s", key), value);
    }
    out
}

/// Normalize public-id fields and attach the external PDB accession
///
/// Empty and `?` ids become the `-` placeholder the templates display.
pub fn process_public_ids(row: &mut DataRow, pdb_ext_id_map: &HashMap<String, String>) {
    if row.is_empty() {
        for item in ["ext_pdb_id", "pdb_id", "bmrb_id", "emdb_id"] {
            row.insert(item.to_string(), "-".to_string());
        }
    }
    for item in ["pdb_id", "bmrb_id", "emdb_id"] {
        let value = field(row, item);
        if value.is_empty() || value == "?" {
            row.insert(item.to_string(), "-".to_string());
        }
        if item == "pdb_id" {
            let pdb_id = field(row, "pdb_id").to_string();
            let ext = pdb_ext_id_map
                .get(&pdb_id)
                .cloned()
                .filter(|v| !v.is_empty())
                .unwrap_or(pdb_id);
            row.insert("ext_pdb_id".to_string(), ext);
        }
    }
}

fn selection_options(pairs: &[(String, String)]) -> String {
    let mut html = String::new();
    for (value, label) in pairs {
        html.push_str(&format!("<option value=\"{}\"", value));
        if value.is_empty() {
            html.push_str(" selected");
        }
        html.push_str(&format!(">{}</option>", label));
    }
    html
}

fn arg<'a>(args: &'a HashMap<String, String>, name: &str) -> &'a str {
    args.get(name).map(String::as_str).unwrap_or("")
}

fn arg_or<'a>(args: &'a HashMap<String, String>, name: &str, default: &'a str) -> &'a str {
    match args.get(name) {
        Some(value) if !value.is_empty() => value,
        _ => default,
    }
}

fn resolve_delimiter(delimiter: &str) -> &str {
    match delimiter {
        "newline" => "\n",
        "empty" => "",
        other => other,
    }
}

fn row_to_value(row: &DataRow) -> Value {
    Value::Object(
        row.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Render a JSON value as `string`, `list`, or `dict` output
pub fn format_result(value: &Value, return_type: &str, delimiter: &str) -> String {
    let delimiter = resolve_delimiter(delimiter);
    match return_type {
        "string" => flatten_value(value, delimiter),
        _ => match value {
            Value::Null => {
                if return_type == "dict" {
                    "{}".to_string()
                } else {
                    "[]".to_string()
                }
            }
            other => other.to_string(),
        },
    }
}

fn flatten_value(value: &Value, delimiter: &str) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| flatten_value(v, delimiter))
            .collect::<Vec<_>>()
            .join(delimiter),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}:{}", k, flatten_value(v, delimiter)))
            .collect::<Vec<_>>()
            .join(delimiter),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_known_and_unknown() {
        let mut params = HashMap::new();
        params.insert("user_name".to_string(), "annotator1".to_string());
        let out = substitute("Hello %(user_name)s %(missing)s", &params);
        assert_eq!(out, "Hello annotator1 %(missing)s");
    }

    #[test]
    fn public_id_normalization() {
        let mut row = DataRow::new();
        row.insert("pdb_id".to_string(), "?".to_string());
        row.insert("emdb_id".to_string(), "EMD-1234".to_string());
        process_public_ids(&mut row, &HashMap::new());
        assert_eq!(field(&row, "pdb_id"), "-");
        assert_eq!(field(&row, "bmrb_id"), "-");
        assert_eq!(field(&row, "emdb_id"), "EMD-1234");
        assert_eq!(field(&row, "ext_pdb_id"), "-");
    }

    #[test]
    fn public_id_uses_extended_accession() {
        let mut row = DataRow::new();
        row.insert("pdb_id".to_string(), "1ABC".to_string());
        let mut ext = HashMap::new();
        ext.insert("1ABC".to_string(), "pdb_00001abc".to_string());
        process_public_ids(&mut row, &ext);
        assert_eq!(field(&row, "ext_pdb_id"), "pdb_00001abc");
    }

    #[test]
    fn format_result_modes() {
        let value = serde_json::json!([{"a": "1"}, {"a": "2"}]);
        assert_eq!(format_result(&value, "list", ","), r#"[{"a":"1"},{"a":"2"}]"#);
        assert_eq!(format_result(&value, "string", ","), "a:1,a:2");
        assert_eq!(format_result(&Value::Null, "dict", ","), "{}");
        assert_eq!(format_result(&Value::Null, "list", ","), "[]");
    }

    #[test]
    fn delimiter_aliases() {
        assert_eq!(resolve_delimiter("newline"), "\n");
        assert_eq!(resolve_delimiter("empty"), "");
        assert_eq!(resolve_delimiter(";"), ";");
    }
}
