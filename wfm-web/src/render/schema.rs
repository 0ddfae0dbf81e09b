//! Parsed page-group configuration schema
//!
//! A page-group configuration file describes page templates, their parameter
//! bindings, table/column definitions, SQL fragments, and UI field bindings
//! as CIF category records. This module builds the typed in-memory form the
//! rendering engine interprets.
//!
//! Cross-references between pages, tables, and functions are resolved lazily
//! at render time and degrade to empty output. The exception is the
//! `table_definition` join below, which is validated eagerly: a dangling
//! reference in the table wiring is a configuration defect, not a render-time
//! condition, and is reported with the offending id.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use wfm_common::{Error, Result};

use crate::db::row::{field, has_field, DataRow};
use crate::render::cif::CifData;

/// How a template parameter obtains its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingKind {
    /// Literal value from the configuration
    Constant,
    /// Value from the current request's value store
    RequestValue,
    /// Field of the authenticated user's record
    UserInfo,
    /// Recursive render of another page template
    NestedPage,
    /// Capability-table function call
    Function,
    /// Field of the page's current data row
    DataField,
}

impl BindingKind {
    fn from_config(value: &str) -> Option<Self> {
        match value {
            "constant" => Some(Self::Constant),
            "sessionInfo" => Some(Self::RequestValue),
            "userInfo" => Some(Self::UserInfo),
            "page_template" => Some(Self::NestedPage),
            "function" => Some(Self::Function),
            "dataInfo" => Some(Self::DataField),
            _ => None,
        }
    }
}

/// One template parameter binding rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterBinding {
    pub variable: String,
    pub kind: BindingKind,
    pub value: String,
}

/// A page template body, inline or referencing a file in the template dir
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageTemplate {
    pub page: String,
    /// `inline` or `file`
    pub kind: String,
    /// Rendered once per pending data row when set
    pub repeat: bool,
}

/// One keyword argument of a configured function call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionArg {
    pub name: String,
    pub value: String,
}

/// Data source and kind for one table cell field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldBinding {
    pub value: String,
    pub kind: String,
}

/// A fully joined table definition
///
/// Exactly one of {`columns` + `sql_selection`, `binding_function`} is
/// populated; the loader rejects definitions satisfying neither.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSpec {
    pub table_id: String,
    pub display: String,
    pub load: String,
    pub title: Option<String>,
    pub option: String,
    pub columns: Vec<DataRow>,
    pub sql_selection: Option<String>,
    pub sql_where_condition: Option<String>,
    pub sql_variable: Option<String>,
    pub order_condition: Option<String>,
    pub sort_function: Option<String>,
    pub binding_function: Option<String>,
    pub binding_class: Option<String>,
}

/// The parsed configuration for one page group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub page_template: HashMap<String, PageTemplate>,
    pub page_template_alias: HashMap<String, String>,
    /// page id -> (preprocess bindings, render bindings)
    pub page_template_parameter: HashMap<String, (Vec<ParameterBinding>, Vec<ParameterBinding>)>,
    /// "page_id,target,function" -> keyword arguments
    pub function_parameter: HashMap<String, Vec<FunctionArg>>,
    pub level1_template_definition: HashMap<String, Vec<DataRow>>,
    pub tab_definition_template: HashMap<String, Vec<DataRow>>,
    /// "tab_def_id,template_id" -> variable/value rows
    pub tab_preprocess_mapping: HashMap<String, Vec<DataRow>>,
    pub table_data_field_binding: HashMap<String, FieldBinding>,
    pub ui_input_where_condition_binding: HashMap<String, DataRow>,
    pub ui_input_dependence: HashMap<String, DataRow>,
    pub user_template_mapping: HashMap<String, String>,
    /// "user-tab-table-field" -> visibility flag
    pub user_tab_table_column_config: HashMap<String, String>,
    /// tab definition id -> table id -> spec
    pub table_definition: HashMap<String, BTreeMap<String, TableSpec>>,
}

impl ConfigSchema {
    /// Build the schema from parsed CIF categories
    pub fn from_cif(data: &CifData) -> Result<Self> {
        let mut schema = ConfigSchema {
            page_template: read_keyed(data, "page_template")
                .into_iter()
                .map(|(id, row)| {
                    (
                        id,
                        PageTemplate {
                            page: field(&row, "page").to_string(),
                            kind: field(&row, "type").to_string(),
                            repeat: field(&row, "repeat") == "yes",
                        },
                    )
                })
                .collect(),
            page_template_alias: read_map(data, "page_template_alias", "id", "page_id"),
            page_template_parameter: read_page_parameters(data),
            function_parameter: read_grouped(data, "function_parameter")
                .into_iter()
                .map(|(id, rows)| {
                    let args = rows
                        .iter()
                        .map(|row| FunctionArg {
                            name: field(row, "name").to_string(),
                            value: field(row, "value").to_string(),
                        })
                        .collect();
                    (id, args)
                })
                .collect(),
            level1_template_definition: read_grouped(data, "level1_template_definition"),
            tab_definition_template: read_grouped(data, "tab_definition_template"),
            tab_preprocess_mapping: read_grouped(data, "tab_preprocess_mapping"),
            table_data_field_binding: read_keyed(data, "table_data_field_binding")
                .into_iter()
                .map(|(id, row)| {
                    (
                        id,
                        FieldBinding {
                            value: field(&row, "value").to_string(),
                            kind: field(&row, "type").to_string(),
                        },
                    )
                })
                .collect(),
            ui_input_where_condition_binding: read_keyed(data, "ui_input_where_condition_binding"),
            ui_input_dependence: read_keyed(data, "ui_input_dependence"),
            user_template_mapping: read_map(data, "user_template_mapping", "user_id", "template_id"),
            user_tab_table_column_config: read_column_config(data),
            table_definition: HashMap::new(),
        };

        schema.table_definition = build_table_definition(data)?;
        Ok(schema)
    }
}

/// `id -> row` reader for categories keyed by a unique id
fn read_keyed(data: &CifData, category: &str) -> HashMap<String, DataRow> {
    data.category(category)
        .iter()
        .map(|row| (field(row, "id").to_string(), row.clone()))
        .collect()
}

/// `key -> value` reader projecting two items of each row
fn read_map(data: &CifData, category: &str, key_item: &str, value_item: &str) -> HashMap<String, String> {
    data.category(category)
        .iter()
        .map(|row| {
            (
                field(row, key_item).to_string(),
                field(row, value_item).to_string(),
            )
        })
        .collect()
}

/// Generic `id -> list of rows` reader
fn read_grouped(data: &CifData, category: &str) -> HashMap<String, Vec<DataRow>> {
    let mut map: HashMap<String, Vec<DataRow>> = HashMap::new();
    for row in data.category(category) {
        map.entry(field(row, "id").to_string())
            .or_default()
            .push(row.clone());
    }
    map
}

fn read_page_parameters(
    data: &CifData,
) -> HashMap<String, (Vec<ParameterBinding>, Vec<ParameterBinding>)> {
    let mut map: HashMap<String, (Vec<ParameterBinding>, Vec<ParameterBinding>)> = HashMap::new();
    for row in data.category("page_template_parameter") {
        let Some(kind) = BindingKind::from_config(field(row, "type")) else {
            continue;
        };
        let binding = ParameterBinding {
            variable: field(row, "variable").to_string(),
            kind,
            value: field(row, "value").to_string(),
        };
        let entry = map.entry(field(row, "page_id").to_string()).or_default();
        if field(row, "preprocess").eq_ignore_ascii_case("y") {
            entry.0.push(binding);
        } else {
            entry.1.push(binding);
        }
    }
    map
}

fn read_column_config(data: &CifData) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for row in data.category("user_tab_table_column_config") {
        let key = [
            field(row, "user_id"),
            field(row, "tab_id"),
            field(row, "table_id"),
            field(row, "data-field"),
        ]
        .join("-");
        map.insert(key, field(row, "data-visible").to_string());
    }
    map
}

/// Materialize `table_definition` from its foreign-keyed source categories
///
/// The source categories are only consulted when `tab_definition_table` is
/// present; a page group without tables legitimately omits the whole family.
/// Once tables are declared, every reference must resolve.
fn build_table_definition(data: &CifData) -> Result<HashMap<String, BTreeMap<String, TableSpec>>> {
    let mut out: HashMap<String, BTreeMap<String, TableSpec>> = HashMap::new();
    let tabs = read_grouped(data, "tab_definition_table");
    if tabs.is_empty() {
        return Ok(out);
    }

    let options = read_map(data, "table_option_definition", "id", "option");
    let bindings = read_keyed(data, "table_binding_definition");
    let column_groups = read_grouped(data, "table_definition");
    let column_defs = read_keyed(data, "table_column_definition");
    let sql_bindings: HashMap<String, DataRow> = data
        .category("tab_table_sql_binding")
        .iter()
        .map(|row| {
            (
                format!("{}_{}", field(row, "tab_id"), field(row, "table_id")),
                row.clone(),
            )
        })
        .collect();
    let selections = read_map(data, "sql_selection_definition", "id", "sql");

    let mut errors: Vec<String> = Vec::new();

    for (tab_id, rows) in &tabs {
        let mut tables = BTreeMap::new();
        for row in rows {
            let table_id = field(row, "table_id").to_string();
            let context = format!("{}/{}", tab_id, table_id);

            let option_id = field(row, "table_option_id");
            let Some(option) = options.get(option_id) else {
                errors.push(format!(
                    "{}: unknown table_option_id '{}'",
                    context, option_id
                ));
                continue;
            };

            let mut spec = TableSpec {
                table_id: table_id.clone(),
                display: field(row, "default_display").to_string(),
                load: field(row, "default_load").to_string(),
                title: row.get("table_title").cloned(),
                option: option.clone(),
                ..TableSpec::default()
            };

            let def_id = field(row, "table_definition_id");
            if let Some(binding) = bindings.get(def_id) {
                spec.binding_function = Some(field(binding, "binding_function").to_string());
                if has_field(binding, "binding_class") {
                    spec.binding_class = Some(field(binding, "binding_class").to_string());
                }
            } else if let Some(column_refs) = column_groups.get(def_id) {
                for column_ref in column_refs {
                    let column_id = field(column_ref, "column_definition");
                    match column_defs.get(column_id) {
                        Some(def) => spec.columns.push(def.clone()),
                        None => errors.push(format!(
                            "{}: unknown column_definition '{}'",
                            context, column_id
                        )),
                    }
                }
                read_sql_binding(
                    &sql_bindings,
                    &selections,
                    tab_id,
                    &table_id,
                    &mut spec,
                    &mut errors,
                );
                if spec.sql_selection.is_none() {
                    errors.push(format!("{}: no SQL selection bound", context));
                    continue;
                }
            } else {
                errors.push(format!(
                    "{}: table_definition_id '{}' has neither columns nor a binding function",
                    context, def_id
                ));
                continue;
            }

            tables.insert(table_id, spec);
        }
        if !tables.is_empty() {
            out.insert(tab_id.clone(), tables);
        }
    }

    if !errors.is_empty() {
        errors.sort();
        return Err(Error::Config(format!(
            "table_definition: {}",
            errors.join("; ")
        )));
    }
    Ok(out)
}

fn read_sql_binding(
    sql_bindings: &HashMap<String, DataRow>,
    selections: &HashMap<String, String>,
    tab_id: &str,
    table_id: &str,
    spec: &mut TableSpec,
    errors: &mut Vec<String>,
) {
    let key = format!("{}_{}", tab_id, table_id);
    let Some(binding) = sql_bindings.get(&key) else {
        return;
    };
    let select_id = field(binding, "select_definition_id");
    if select_id.is_empty() {
        return;
    }
    match selections.get(select_id) {
        Some(sql) if !sql.is_empty() => spec.sql_selection = Some(sql.clone()),
        _ => {
            errors.push(format!(
                "{}/{}: unknown select_definition_id '{}'",
                tab_id, table_id, select_id
            ));
            return;
        }
    }
    for (target, item) in [
        ("sql_where_condition", "where_condition"),
        ("order_condition", "additional_order_condition"),
        ("sql_variable", "variable"),
        ("sort_function", "additional_sort_function"),
    ] {
        if has_field(binding, item) {
            let value = Some(field(binding, item).to_string());
            match target {
                "sql_where_condition" => spec.sql_where_condition = value,
                "order_condition" => spec.order_condition = value,
                "sql_variable" => spec.sql_variable = value,
                _ => spec.sort_function = value,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::cif;

    const TABLE_CONFIG: &str = r#"data_test
loop_
_tab_definition_table.id
_tab_definition_table.table_id
_tab_definition_table.table_definition_id
_tab_definition_table.table_option_id
_tab_definition_table.default_display
_tab_definition_table.default_load
main_tab proc_table proc_def std_option block true
loop_
_table_option_definition.id
_table_option_definition.option
std_option 'data-pagination="true"'
loop_
_table_definition.id
_table_definition.column_definition
proc_def col_dep_id
proc_def col_method
loop_
_table_column_definition.id
_table_column_definition.data-field
_table_column_definition.label
col_dep_id dep_set_id 'ID'
col_method abbrv_method 'Method'
loop_
_tab_table_sql_binding.tab_id
_tab_table_sql_binding.table_id
_tab_table_sql_binding.select_definition_id
_tab_table_sql_binding.where_condition
main_tab proc_table sel_proc "where annotator_initials = '%(initials)s'"
loop_
_sql_selection_definition.id
_sql_selection_definition.sql
sel_proc 'select dep_set_id, method from dep_last_instance'
"#;

    #[test]
    fn join_builds_table_spec() {
        let data = cif::parse(TABLE_CONFIG).unwrap();
        let schema = ConfigSchema::from_cif(&data).unwrap();

        let tables = schema.table_definition.get("main_tab").unwrap();
        let spec = tables.get("proc_table").unwrap();
        assert_eq!(spec.display, "block");
        assert_eq!(spec.option, "data-pagination=\"true\"");
        assert_eq!(spec.columns.len(), 2);
        assert_eq!(
            spec.sql_selection.as_deref(),
            Some("select dep_set_id, method from dep_last_instance")
        );
        assert!(spec.sql_where_condition.is_some());
        assert!(spec.binding_function.is_none());
    }

    #[test]
    fn join_fails_fast_on_dangling_column() {
        let broken = TABLE_CONFIG.replace("col_method abbrv_method 'Method'\n", "");
        let data = cif::parse(&broken).unwrap();
        let err = ConfigSchema::from_cif(&data).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("col_method"), "got: {}", message);
    }

    #[test]
    fn join_fails_fast_on_dangling_selection() {
        let broken = TABLE_CONFIG.replace("sel_proc 'select", "sel_other 'select");
        let data = cif::parse(&broken).unwrap();
        let err = ConfigSchema::from_cif(&data).unwrap_err();
        assert!(err.to_string().contains("sel_proc"));
    }

    #[test]
    fn page_group_without_tables_is_valid() {
        let data = cif::parse(
            "data_x\nloop_\n_page_template.id\n_page_template.type\n_page_template.page\np inline 'Hello'\n",
        )
        .unwrap();
        let schema = ConfigSchema::from_cif(&data).unwrap();
        assert!(schema.table_definition.is_empty());
        assert_eq!(schema.page_template.get("p").unwrap().page, "Hello");
    }

    #[test]
    fn parameter_bindings_split_by_preprocess() {
        let data = cif::parse(
            r#"data_x
loop_
_page_template_parameter.page_id
_page_template_parameter.variable
_page_template_parameter.type
_page_template_parameter.value
_page_template_parameter.preprocess
p header page_template header_tmplt Y
p sessionid sessionInfo sessionid N
p user_name userInfo user_name N
"#,
        )
        .unwrap();
        let schema = ConfigSchema::from_cif(&data).unwrap();
        let (pre, render) = schema.page_template_parameter.get("p").unwrap();
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].kind, BindingKind::NestedPage);
        assert_eq!(render.len(), 2);
        assert_eq!(render[0].kind, BindingKind::RequestValue);
        assert_eq!(render[1].kind, BindingKind::UserInfo);
    }
}
