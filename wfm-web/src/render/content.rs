//! Table content materialization
//!
//! Executes each configured table's bound SQL (or binding function), applies
//! field-level derivation rules, and serializes the finished row set to the
//! session store for the UI's asynchronous table loads. Auxiliary data needed
//! by multiple rows (group ids, release dates, PI contacts, my-list
//! membership, reminder tracking, external PDB accessions) is resolved in one
//! round trip per source, never per row, to keep page latency bounded as
//! entry counts grow.
//!
//! Field derivation follows the engine-wide best-effort contract: a missing
//! field reads as empty and never fails the table.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;
use wfm_common::SessionStore;

use crate::db::row::{field, has_field, DataRow};
use crate::db::stats::{BoundTable, StatsReporter};
use crate::render::page::{process_public_ids, substitute, PageRenderer, DATA_FOR_ALL};

/// Session-store key of the table content map
pub const TABLE_CONTENT_MAP_KEY: &str = "table_content_map";

/// Runtime definition of one materializable table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeTable {
    pub tab_count_id: String,
    /// Session-store key the finished row set is saved under
    pub cache_key: String,
    pub data_fields: Vec<String>,
    /// Fully composed SQL; absent while a search has not bound a condition
    pub sql: Option<String>,
    /// Bare selection kept for later search-condition composition
    pub sql_selection: Option<String>,
    pub order_condition: Option<String>,
    pub sort_function: Option<String>,
    pub binding_function: Option<String>,
    pub binding_class: Option<String>,
    /// count type -> counted items (e.g. status codes, `num_entries`)
    pub entry_count: HashMap<String, Vec<String>>,
}

/// tab-count-id + table-id -> runtime table definition
pub type TableContentMap = HashMap<String, RuntimeTable>;

/// Materializes configured tables into session-store row sets
pub struct TableContentBuilder {
    renderer: PageRenderer,
    store: SessionStore,
    commun_tmplt: String,
    commun_image_tmplt: String,
    assign_annotator_tmplt: String,
    annotator_selection: String,
}

impl TableContentBuilder {
    pub fn new(renderer: PageRenderer, store: SessionStore) -> Self {
        let commun_tmplt = renderer.page_template("commun_tmplt");
        let commun_image_tmplt = renderer.page_template("commun_image_tmplt");
        Self {
            renderer,
            store,
            commun_tmplt,
            commun_image_tmplt,
            assign_annotator_tmplt: String::new(),
            annotator_selection: String::new(),
        }
    }

    pub fn into_renderer(self) -> PageRenderer {
        self.renderer
    }

    /// Materialize one table (`index`) or every table (`"all"`)
    ///
    /// Returns the per-tab/per-status entry-count map for the count badges.
    pub async fn build(&mut self, index: &str) -> HashMap<String, i64> {
        let mut counts = HashMap::new();
        let table_map: TableContentMap = match self.store.load(TABLE_CONTENT_MAP_KEY) {
            Ok(Some(map)) => map,
            _ => return counts,
        };

        if index == "all" {
            let mut keys: Vec<&String> = table_map.keys().collect();
            keys.sort();
            for key in keys {
                self.build_table(&table_map[key], &mut counts).await;
            }
        } else if let Some(table) = table_map.get(index) {
            self.build_table(table, &mut counts).await;
        }
        counts
    }

    async fn build_table(&mut self, table: &RuntimeTable, counts: &mut HashMap<String, i64>) {
        if table.cache_key.is_empty() {
            return;
        }

        if let Some(function) = &table.binding_function {
            let (_columns, rows) = self
                .bound_table(table.binding_class.as_deref(), function)
                .await;
            if let Err(e) = self.store.save(&table.cache_key, &rows) {
                warn!("Failed to save table {}: {}", table.cache_key, e);
            }
            return;
        }

        let Some(sql) = &table.sql else {
            return;
        };
        if table.data_fields.is_empty() {
            return;
        }

        let mut count_map = initialize_status_count(table);
        let mut rows = self
            .renderer
            .status_db()
            .run_select(sql)
            .await
            .unwrap_or_else(|e| {
                warn!("Table query failed: {}", e);
                Vec::new()
            });

        if let Some(sort_function) = &table.sort_function {
            rows = self.sort_rows(sort_function, rows).await;
        }

        let num_rows = rows.len();
        let aux = self.resolve_auxiliary_data(table, &rows).await;
        self.prepare_assignment(table).await;

        let mut results: Vec<DataRow> = Vec::new();
        for (order, mut row) in rows.into_iter().enumerate() {
            self.derive_row_fields(table, &mut row, order, num_rows, &aux, &mut count_map);
            let result = self.project_row(table, row).await;
            results.push(result);
        }

        if let Err(e) = self.store.save(&table.cache_key, &results) {
            warn!("Failed to save table {}: {}", table.cache_key, e);
        }

        for (count_type, items) in &table.entry_count {
            for item in items {
                let count = if item == "num_entries" {
                    num_rows as i64
                } else {
                    count_map.get(item).copied().unwrap_or(0)
                };
                counts.insert(
                    format!("{}_{}_{}", count_type, item, table.tab_count_id),
                    count,
                );
            }
        }
    }

    /// Tables bound to a helper function instead of raw SQL
    pub async fn bound_table(&mut self, class: Option<&str>, function: &str) -> BoundTable {
        call_bound_table(
            self.renderer.status_db(),
            self.renderer.content_db(),
            class,
            function,
        )
        .await
    }

    // ---------------------------------------------------------------
    // Batched auxiliary lookups
    // ---------------------------------------------------------------

    async fn resolve_auxiliary_data(&mut self, table: &RuntimeTable, rows: &[DataRow]) -> AuxData {
        let mut aux = AuxData::default();
        let wants = |name: &str| table.data_fields.iter().any(|f| f == name);

        if wants("pdb_ids") || wants("user_pdb_id") {
            aux.pdb_ext_ids = self.renderer.pdb_ext_id_map(rows).await;
            aux.process_public_ids = true;
            aux.compose_status = wants("coor_status") || wants("author_status");
        }

        let id_list = entry_id_list(rows, "D_");
        if !id_list.is_empty() {
            let group_rows = self
                .renderer
                .status_db()
                .get_group_ids(&id_list)
                .await
                .unwrap_or_default();
            for row in &group_rows {
                if has_field(row, "group_id") && has_field(row, "dep_set_id") {
                    aux.group_ids.insert(
                        field(row, "dep_set_id").to_string(),
                        field(row, "group_id").to_string(),
                    );
                }
            }

            let wants_release_dates = table.data_fields.iter().any(|f| {
                self.renderer
                    .config()
                    .table_data_field_binding
                    .get(f)
                    .map(|b| b.value == "deposition_release_dates")
                    .unwrap_or(false)
            });
            if wants_release_dates {
                let mut unique: Vec<String> = id_list
                    .iter()
                    .cloned()
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();
                unique.sort();
                aux.release_dates = self
                    .renderer
                    .content_db()
                    .release_date_map(&unique)
                    .await
                    .unwrap_or_default();
                aux.wants_release_dates = true;
            }

            if wants("add_list") {
                let selection = self
                    .renderer
                    .status_db()
                    .get_anno_selection(&id_list)
                    .await
                    .unwrap_or_default();
                aux.my_list = rows_by_dep_id(selection);
            }

            if wants("major_issue") || wants("received_date") {
                let track = self
                    .renderer
                    .status_db()
                    .get_remind_message_track(&id_list)
                    .await
                    .unwrap_or_default();
                aux.message_track = rows_by_dep_id(track);
            }

            if wants("pi_name") || wants("country") || wants("pi_name_only") || wants("pi_country_only") {
                aux.pi_info = self.pi_info(&id_list).await;
            }
        }
        aux
    }

    /// PI contacts: content db first, status db for the remainder, then a
    /// single-author lookup per still-unresolved id
    async fn pi_info(&mut self, id_list: &[String]) -> HashMap<String, DataRow> {
        let content_rows = self
            .renderer
            .content_db()
            .contact_author_pi(id_list)
            .await
            .unwrap_or_default();
        let mut map = process_pi_rows(&content_rows, &["name_first", "name_mi", "name_last"]);
        if id_list.iter().all(|id| map.contains_key(id)) {
            return map;
        }

        let status_rows = self
            .renderer
            .status_db()
            .contact_author_pi(id_list)
            .await
            .unwrap_or_default();
        let fallback = process_pi_rows(&status_rows, &["last_name"]);

        for dep_id in id_list {
            if map.contains_key(dep_id) {
                continue;
            }
            if let Some(info) = fallback.get(dep_id) {
                map.insert(dep_id.clone(), info.clone());
                continue;
            }
            if let Ok(Some(author)) = self.renderer.status_db().valid_contact_author(dep_id).await {
                let mut info = DataRow::new();
                if has_field(&author, "last_name") {
                    info.insert("pi_name".to_string(), field(&author, "last_name").to_string());
                }
                if has_field(&author, "country") {
                    info.insert("country".to_string(), field(&author, "country").to_string());
                }
                if !info.is_empty() {
                    map.insert(dep_id.clone(), info);
                }
            }
        }
        map
    }

    async fn prepare_assignment(&mut self, table: &RuntimeTable) {
        if table.data_fields.iter().any(|f| f == "assign_annotator")
            && self.assign_annotator_tmplt.is_empty()
        {
            self.assign_annotator_tmplt = self.renderer.page_template("assign_annotator_tmplt");
            self.annotator_selection = self.renderer.annotator_selection().await;
        }
    }

    // ---------------------------------------------------------------
    // Per-row derivation
    // ---------------------------------------------------------------

    fn derive_row_fields(
        &self,
        table: &RuntimeTable,
        row: &mut DataRow,
        order: usize,
        num_rows: usize,
        aux: &AuxData,
        count_map: &mut HashMap<String, i64>,
    ) {
        let dep_id = field(row, "dep_set_id").to_string();
        row.insert("display_ids".to_string(), dep_id.clone());
        row.insert("group_info".to_string(), String::new());
        if let Some(group_id) = aux.group_ids.get(&dep_id).filter(|g| !g.is_empty()) {
            row.insert(
                "display_ids".to_string(),
                format!("{}/{}", dep_id, group_id),
            );
            row.insert("group_info".to_string(), format!("&group_id={}", group_id));
        }

        if table.data_fields.iter().any(|f| f == "default_order") {
            let condition = table.order_condition.as_deref().unwrap_or("");
            row.insert(
                "default_order".to_string(),
                ranked_order(order, num_rows, condition, row),
            );
        }

        if !count_map.is_empty() || !table.entry_count.is_empty() {
            let status = field(row, "dep_status_code").to_string();
            if !status.is_empty() {
                *count_map.entry(status).or_insert(0) += 1;
            }
        }

        row.insert("locklabel".to_string(), lock_label(row));

        if let Some(track) = aux.message_track.get(&dep_id) {
            for (key, value) in track {
                row.insert(key.clone(), value.clone());
            }
        }
        if let Some(pi) = aux.pi_info.get(&dep_id) {
            for (key, value) in pi {
                row.insert(key.clone(), value.clone());
            }
        }

        if table.data_fields.iter().any(|f| f == "add_list") {
            let initials = aux
                .my_list
                .get(&dep_id)
                .map(|r| field(r, "annotator_initials").to_string())
                .filter(|s| !s.is_empty());
            row.insert(
                "add_list".to_string(),
                initials.unwrap_or_else(|| "Add".to_string()),
            );
        }

        if aux.wants_release_dates {
            row.insert("deposition_release_dates".to_string(), String::new());
            if !dep_id.is_empty() {
                let release = aux.release_dates.get(&dep_id).cloned().unwrap_or_default();
                let deposited = field(row, "dep_initial_deposition_date").to_string();
                let combined = if !deposited.is_empty() {
                    let release = if release.is_empty() {
                        "n.a.".to_string()
                    } else {
                        release
                    };
                    format!("{} /<br /> {}", deposited, release)
                } else if !release.is_empty() {
                    format!("n.a. /<br /> {}", release)
                } else {
                    String::new()
                };
                row.insert("deposition_release_dates".to_string(), combined);
            }
        }

        let base_url = if has_field(row, "class_id") {
            self.renderer.site().module_url(field(row, "class_id"))
        } else {
            ""
        };
        row.insert("base_url".to_string(), base_url.to_string());

        let method = field(row, "method").to_string();
        row.insert("urlmethod".to_string(), url_encode(&method));
        row.insert("abbrv_method".to_string(), abbreviated_method(&method));

        if aux.process_public_ids {
            process_public_ids(row, &aux.pdb_ext_ids);
            if aux.compose_status {
                let codes = compose_status_codes(row);
                row.insert("comb_status_code".to_string(), codes.status);
                row.insert(
                    "comb_author_release_status_code".to_string(),
                    codes.author_release,
                );
                if !codes.title_em.is_empty() {
                    row.insert("dep_title".to_string(), codes.title_em);
                }
                if !codes.author_list_em.is_empty() {
                    row.insert("dep_author_list".to_string(), codes.author_list_em);
                }
            }
        }
    }

    /// Project a derived row onto its configured data fields
    async fn project_row(&mut self, table: &RuntimeTable, row: DataRow) -> DataRow {
        self.renderer.set_row(DATA_FOR_ALL, row.clone());
        let mut result = DataRow::new();
        for field_name in &table.data_fields {
            let Some(binding) = self
                .renderer
                .config()
                .table_data_field_binding
                .get(field_name)
                .cloned()
            else {
                result.insert(field_name.clone(), String::new());
                continue;
            };
            let value = match binding.kind.as_str() {
                "page_template" => self.renderer.render_page(&binding.value, None).await,
                "dataInfo" => field(&row, &binding.value).to_string(),
                "function" => self.cell_function(&binding.value, &row).await,
                _ => String::new(),
            };
            result.insert(field_name.clone(), value);
        }
        result
    }

    /// Per-cell derivation functions addressed from `table_data_field_binding`
    async fn cell_function(&mut self, function: &str, row: &DataRow) -> String {
        match function {
            "workflow_status" => {
                let page = match field(row, "inst_status") {
                    "waiting" => "workflow_waiting_status_tmplt",
                    "closed(0)" => "workflow_close_status_tmplt",
                    _ => "workflow_other_status_tmplt",
                };
                self.renderer.render_page(page, None).await
            }
            "workflow_action" => {
                let locked = field(row, "dep_locking").to_uppercase() == "WFM"
                    || field(row, "dep_status_code").to_uppercase() == "DEP";
                let page = if locked {
                    "workflow_lock_action_tmplt"
                } else if field(row, "inst_status").to_lowercase() == "init" {
                    "workflow_init_action_tmplt"
                } else {
                    "workflow_other_action_tmplt"
                };
                self.renderer.render_page(page, None).await
            }
            "assign_selection" => {
                let mut params = HashMap::new();
                params.insert(
                    "dep_set_id".to_string(),
                    field(row, "dep_set_id").to_string(),
                );
                params.insert(
                    "annotator_selection".to_string(),
                    self.annotator_selection.clone(),
                );
                substitute(&self.assign_annotator_tmplt, &params)
            }
            "add_list" => {
                if field(row, "add_list") == "Add" {
                    self.renderer.render_page("add_list_tmplt", None).await
                } else {
                    field(row, "add_list").to_string()
                }
            }
            "communication" => self.communication_cell(row).await,
            "auxiliary" => auxiliary_class(row),
            _ => String::new(),
        }
    }

    /// Communication cell: notification icon sequence in fixed order
    async fn communication_cell(&mut self, row: &DataRow) -> String {
        let initials = self.renderer.user_info_field("initials").await;
        let notify = field(row, "dep_notify");

        let (image, alt) = if notify.contains('N') {
            ("wfm_new.png", "New Communication")
        } else if notify.contains('T') {
            ("wfm_todo.png", "Communication to act on")
        } else {
            ("wfm_comm.png", "Communication")
        };
        let mut text = self.image_tag(image, alt);
        if notify.contains('*') {
            text.push(' ');
            text.push_str(&self.image_tag("wfm_note.png", "Note"));
        }
        if notify.contains('B') {
            text.push(' ');
            text.push_str(&self.image_tag("wfm_bmrb.png", "BMRB Message"));
        }
        if notify.contains('A') {
            text.push(' ');
            text.push_str(&self.image_tag("wfm_approve.png", "Approve Message"));
        }

        let mut params = HashMap::new();
        params.insert("sessionid".to_string(), self.store.id().to_string());
        params.insert("initials".to_string(), initials);
        params.insert(
            "dep_set_id".to_string(),
            field(row, "dep_set_id").to_string(),
        );
        params.insert("urlmethod".to_string(), field(row, "urlmethod").to_string());
        params.insert("locklabel".to_string(), field(row, "locklabel").to_string());
        params.insert("commun_image".to_string(), text);
        substitute(&self.commun_tmplt, &params)
    }

    fn image_tag(&self, image: &str, alt: &str) -> String {
        let mut params = HashMap::new();
        params.insert("image".to_string(), image.to_string());
        params.insert("alt".to_string(), alt.to_string());
        substitute(&self.commun_image_tmplt, &params)
    }

    // ---------------------------------------------------------------
    // Named sort functions
    // ---------------------------------------------------------------

    async fn sort_rows(&mut self, sort_function: &str, rows: Vec<DataRow>) -> Vec<DataRow> {
        match sort_function {
            "submit_group" => self.submit_group_filter(rows, true).await,
            "submit_group_search" => self.submit_group_filter(rows, false).await,
            "unsubmit_group" => unsubmit_group_order(rows),
            other => {
                warn!("Unknown sort function: {}", other);
                rows
            }
        }
    }

    /// Enrich submitted group rows with first-entry deposition date and the
    /// majority status code of the group's entries
    async fn submit_group_filter(
        &mut self,
        rows: Vec<DataRow>,
        filter_by_annotator: bool,
    ) -> Vec<DataRow> {
        let group_ids = entry_id_list(&rows, "G_");
        let members = self
            .renderer
            .status_db()
            .get_entries_for_groups(&group_ids)
            .await
            .unwrap_or_default();

        let mut group_entries: HashMap<String, Vec<String>> = HashMap::new();
        let mut first_entries: Vec<String> = Vec::new();
        for row in &members {
            let group_id = field(row, "group_id");
            let dep_id = field(row, "dep_set_id");
            if group_id.is_empty() || dep_id.is_empty() {
                continue;
            }
            let entry = group_entries.entry(group_id.to_string()).or_default();
            if entry.is_empty() {
                first_entries.push(dep_id.to_string());
            }
            entry.push(dep_id.to_string());
        }
        if first_entries.is_empty() {
            return Vec::new();
        }

        let info_rows = self
            .renderer
            .status_db()
            .get_simple_entry_info(&first_entries)
            .await
            .unwrap_or_default();
        let info_map = rows_by_dep_id(info_rows);
        let user_initials = self.renderer.user_info_field("initials").await;

        let mut group_info: HashMap<String, DataRow> = HashMap::new();
        for (group_id, entries) in &group_entries {
            let Some(first) = info_map.get(&entries[0]) else {
                continue;
            };
            if filter_by_annotator && field(first, "annotator_initials") != user_initials {
                continue;
            }
            let mut info = DataRow::new();
            info.insert(
                "initial_deposition_date".to_string(),
                field(first, "initial_deposition_date").to_string(),
            );
            info.insert(
                "status_code".to_string(),
                self.group_status_code(entries).await,
            );
            group_info.insert(group_id.clone(), info);
        }

        rows.into_iter()
            .filter_map(|mut row| {
                let info = group_info.get(field(&row, "dep_set_id"))?;
                for item in ["initial_deposition_date", "status_code"] {
                    row.insert(item.to_string(), field(info, item).to_string());
                }
                Some(row)
            })
            .collect()
    }

    /// Majority status code across a group's entries
    async fn group_status_code(&self, entries: &[String]) -> String {
        let info_rows = self
            .renderer
            .status_db()
            .get_simple_entry_info(entries)
            .await
            .unwrap_or_default();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for row in &info_rows {
            let code = field(row, "status_code").trim().to_uppercase();
            if !code.is_empty() {
                *counts.entry(code).or_insert(0) += 1;
            }
        }
        let mut best = ("unknown".to_string(), 0);
        for (code, count) in counts {
            if count > best.1 {
                best = (code, count);
            }
        }
        best.0
    }
}

/// Dispatch a configured table binding function to its helper
///
/// The closed set of `binding_class,binding_function` pairs the
/// configuration may name; unknown signatures produce an empty table.
pub async fn call_bound_table(
    status_db: &crate::db::StatusDb,
    content_db: &crate::db::ContentDb,
    class: Option<&str>,
    function: &str,
) -> BoundTable {
    match (class.unwrap_or("self"), function) {
        ("stats", "weekly_status") | ("stats", "monthly_stats") | ("stats", "process_stats") => {
            let reporter = match StatsReporter::new(status_db, content_db.clone()).await {
                Ok(reporter) => reporter,
                Err(e) => {
                    warn!("Stats reporter unavailable: {}", e);
                    return (Vec::new(), Vec::new());
                }
            };
            let result = match function {
                "weekly_status" => reporter.weekly_status().await,
                "monthly_stats" => reporter.monthly_stats().await,
                _ => reporter.process_stats().await,
            };
            result.unwrap_or_else(|e| {
                warn!("Stats query failed: {}", e);
                (Vec::new(), Vec::new())
            })
        }
        _ => {
            warn!("Unknown table binding function: {}", function);
            (Vec::new(), Vec::new())
        }
    }
}

/// Batched per-table auxiliary data
#[derive(Debug, Default)]
struct AuxData {
    pdb_ext_ids: HashMap<String, String>,
    group_ids: HashMap<String, String>,
    release_dates: HashMap<String, String>,
    my_list: HashMap<String, DataRow>,
    message_track: HashMap<String, DataRow>,
    pi_info: HashMap<String, DataRow>,
    process_public_ids: bool,
    compose_status: bool,
    wants_release_dates: bool,
}

/// Combined status/author-release codes with EM promotion
#[derive(Debug, Default, PartialEq)]
pub struct ComposedStatus {
    pub status: String,
    pub author_release: String,
    pub title_em: String,
    pub author_list_em: String,
}

/// EM-aware status code merge
///
/// Both ids present -> `base/emdb`; EMDB only -> the EM codes, promoting the
/// EM title and author list; no EMDB id -> the base codes. A post-release
/// status wraps the base code as `post(base)`.
pub fn compose_status_codes(row: &DataRow) -> ComposedStatus {
    let mut composed = ComposedStatus::default();

    let mut base = field(row, "dep_status_code").to_string();
    if !base.is_empty() && has_field(row, "dep_post_rel_status") {
        base = format!("{}({})", field(row, "dep_post_rel_status"), base);
    }

    if field(row, "emdb_id") != "-" {
        if field(row, "pdb_id") != "-" {
            if has_field(row, "dep_status_code") && has_field(row, "dep_status_code_emdb") {
                composed.status = format!("{}/{}", base, field(row, "dep_status_code_emdb"));
            } else {
                composed.status = base;
            }
            let author = field(row, "dep_author_release_status_code");
            let author_em = field(row, "dep_author_release_status_code_emdb");
            if !author.is_empty() && !author_em.is_empty() {
                composed.author_release = format!("{}/{}", author, author_em);
            } else if !author.is_empty() {
                composed.author_release = author.to_string();
            }
        } else {
            // Map only
            composed.status = field(row, "dep_status_code_emdb").to_string();
            composed.author_release = field(row, "dep_author_release_status_code_emdb").to_string();
            composed.title_em = field(row, "title_emdb").to_string();
            composed.author_list_em = field(row, "author_list_emdb").to_string();
        }
    } else {
        composed.status = base;
        composed.author_release = field(row, "dep_author_release_status_code").to_string();
    }
    composed
}

/// Unlock-from-communication eligibility marker
///
/// Empty unless the entry is unlocked, not in DEP/OBS/WDRN, and not a
/// released map-only entry (REL without a real PDB id).
pub fn lock_label(row: &DataRow) -> String {
    if !row.contains_key("dep_status_code") || !row.contains_key("dep_locking") {
        return String::new();
    }
    let status = field(row, "dep_status_code").to_uppercase();
    if field(row, "dep_locking").to_uppercase() == "WFM"
        || matches!(status.as_str(), "DEP" | "OBS" | "WDRN")
    {
        return String::new();
    }
    if status == "REL" && field(row, "pdb_id").len() < 2 {
        return String::new();
    }
    "&allowunlock=yes".to_string()
}

/// Fixed experimental-method abbreviation table, pass-through by default
pub fn abbreviated_method(method: &str) -> String {
    if method.is_empty() {
        return String::new();
    }
    match method.to_uppercase().as_str() {
        "X-RAY DIFFRACTION" => "X-RAY".to_string(),
        "NEUTRON DIFFRACTION" => "NEUTRON".to_string(),
        "FIBER DIFFRACTION" | "FIBRE DIFFRACTION" => "FIBER".to_string(),
        "CRYO-ELECTRON MICROSCOPY" | "ELECTRON MICROSCOPY" | "ELECTRON TOMOGRAPHY" => {
            "EM".to_string()
        }
        "ELECTRON CRYSTALLOGRAPHY" => "EL. CRYS.".to_string(),
        "SOLUTION NMR" => "NMR".to_string(),
        "SOLID-STATE NMR" | "SOLID STATE NMR" => "SS NMR".to_string(),
        _ => method.to_string(),
    }
}

/// Row highlight class from notification flags and lock state
pub fn auxiliary_class(row: &DataRow) -> String {
    let notify = field(row, "dep_notify");
    let locked = field(row, "dep_locking") == "WFM";
    if notify.contains('R') && locked {
        "background-red".to_string()
    } else if notify.contains('R') {
        "background-lightblue".to_string()
    } else if locked {
        "background-medpink".to_string()
    } else {
        String::new()
    }
}

/// Order rank from an `field:value1,value2,...` condition
///
/// Rows matching an earlier value sort into an earlier band; non-matching
/// rows fall into the band after the last value.
fn ranked_order(order: usize, num_rows: usize, condition: &str, row: &DataRow) -> String {
    if condition.is_empty() {
        return order.to_string();
    }
    let Some((name, values)) = condition.split_once(':') else {
        return order.to_string();
    };
    let value_list: Vec<&str> = values.split(',').collect();
    let mut band = value_list.len() + 1;
    let actual = field(row, name);
    if !actual.is_empty() {
        for (i, value) in value_list.iter().enumerate() {
            let matched = if name == "dep_notify" {
                actual.contains(value)
            } else {
                actual == *value
            };
            if matched {
                band = i + 1;
                break;
            }
        }
    }
    (band * num_rows + order).to_string()
}

/// Order un-submitted group rows: new, todo, other communications, rest
fn unsubmit_group_order(rows: Vec<DataRow>) -> Vec<DataRow> {
    let mut new_rows = Vec::new();
    let mut todo_rows = Vec::new();
    let mut comm_rows = Vec::new();
    let mut rest = Vec::new();
    for row in rows {
        let notify = field(&row, "dep_notify");
        if notify.is_empty() {
            rest.push(row);
        } else if notify.contains('N') {
            new_rows.push(row);
        } else if notify.contains('T') {
            todo_rows.push(row);
        } else {
            comm_rows.push(row);
        }
    }
    new_rows.extend(todo_rows);
    new_rows.extend(comm_rows);
    new_rows.extend(rest);
    new_rows
}

fn initialize_status_count(table: &RuntimeTable) -> HashMap<String, i64> {
    let mut map = HashMap::new();
    for items in table.entry_count.values() {
        for item in items {
            if item != "num_entries" {
                map.insert(item.clone(), 0);
            }
        }
    }
    map
}

fn entry_id_list(rows: &[DataRow], prefix: &str) -> Vec<String> {
    rows.iter()
        .map(|row| field(row, "dep_set_id"))
        .filter(|id| id.starts_with(prefix))
        .map(str::to_string)
        .collect()
}

fn rows_by_dep_id(rows: Vec<DataRow>) -> HashMap<String, DataRow> {
    rows.into_iter()
        .map(|row| (field(&row, "dep_set_id").to_string(), row))
        .collect()
}

/// PI contact rows -> per-entry pi_name/country fields, joined across
/// multiple PIs with `, <br/>`
fn process_pi_rows(rows: &[DataRow], name_items: &[&str]) -> HashMap<String, DataRow> {
    let mut map: HashMap<String, DataRow> = HashMap::new();
    for row in rows {
        let dep_id = field(row, "id");
        if dep_id.is_empty() {
            continue;
        }
        let country = field(row, "country");
        if country.is_empty() {
            continue;
        }
        let name = name_items
            .iter()
            .map(|item| field(row, item))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            continue;
        }
        match map.get_mut(dep_id) {
            Some(info) => {
                for (key, add) in [
                    ("pi_name", &name),
                    ("country", &country.to_string()),
                    ("pi_name_only", &name),
                    ("pi_country_only", &country.to_string()),
                ] {
                    let joined = format!("{}, <br/>{}", field(info, key), add);
                    info.insert(key.to_string(), joined);
                }
            }
            None => {
                let mut info = DataRow::new();
                info.insert("pi_name".to_string(), name.clone());
                info.insert("country".to_string(), country.to_string());
                info.insert("pi_name_only".to_string(), name.clone());
                info.insert("pi_country_only".to_string(), country.to_string());
                map.insert(dep_id.to_string(), info);
            }
        }
    }
    map
}

/// Percent-encode a query value (method names carry spaces and dashes)
pub fn url_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> DataRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn method_abbreviations() {
        assert_eq!(abbreviated_method("X-RAY DIFFRACTION"), "X-RAY");
        assert_eq!(abbreviated_method("Cryo-Electron Microscopy"), "EM");
        assert_eq!(abbreviated_method("ELECTRON TOMOGRAPHY"), "EM");
        assert_eq!(abbreviated_method("SOLUTION NMR"), "NMR");
        assert_eq!(abbreviated_method("SOLID STATE NMR"), "SS NMR");
        assert_eq!(abbreviated_method("POWDER DIFFRACTION"), "POWDER DIFFRACTION");
        assert_eq!(abbreviated_method(""), "");
    }

    #[test]
    fn status_composition_with_both_ids() {
        let data = row(&[
            ("pdb_id", "1ABC"),
            ("emdb_id", "EMD-1"),
            ("dep_status_code", "HPUB"),
            ("dep_status_code_emdb", "REL"),
            ("dep_author_release_status_code", "HOLD"),
            ("dep_author_release_status_code_emdb", "REL"),
        ]);
        let composed = compose_status_codes(&data);
        assert_eq!(composed.status, "HPUB/REL");
        assert_eq!(composed.author_release, "HOLD/REL");
        assert!(composed.title_em.is_empty());
    }

    #[test]
    fn status_composition_map_only_promotes_em_fields() {
        let data = row(&[
            ("pdb_id", "-"),
            ("emdb_id", "EMD-1"),
            ("dep_status_code", "PROC"),
            ("dep_status_code_emdb", "HOLD"),
            ("dep_author_release_status_code_emdb", "REL"),
            ("title_emdb", "EM structure"),
            ("author_list_emdb", "Smith, J."),
        ]);
        let composed = compose_status_codes(&data);
        assert_eq!(composed.status, "HOLD");
        assert_eq!(composed.author_release, "REL");
        assert_eq!(composed.title_em, "EM structure");
        assert_eq!(composed.author_list_em, "Smith, J.");
    }

    #[test]
    fn status_composition_without_emdb() {
        let data = row(&[
            ("pdb_id", "1ABC"),
            ("emdb_id", "-"),
            ("dep_status_code", "REL"),
            ("dep_post_rel_status", "AUCO"),
            ("dep_author_release_status_code", "REL"),
        ]);
        let composed = compose_status_codes(&data);
        assert_eq!(composed.status, "AUCO(REL)");
        assert_eq!(composed.author_release, "REL");
    }

    #[test]
    fn lock_label_boundaries() {
        // DEP status never allows unlock, locked or not
        let dep = row(&[("dep_status_code", "DEP"), ("dep_locking", "")]);
        assert_eq!(lock_label(&dep), "");
        let dep_locked = row(&[("dep_status_code", "DEP"), ("dep_locking", "WFM")]);
        assert_eq!(lock_label(&dep_locked), "");

        // Released map-only entries are excluded
        let map_only = row(&[("dep_status_code", "REL"), ("dep_locking", "DEP")]);
        assert_eq!(lock_label(&map_only), "");
        let short_id = row(&[
            ("dep_status_code", "REL"),
            ("dep_locking", ""),
            ("pdb_id", "1"),
        ]);
        assert_eq!(lock_label(&short_id), "");

        // Unlocked HPUB entry carries the marker
        let ok = row(&[("dep_status_code", "HPUB"), ("dep_locking", "")]);
        assert_eq!(lock_label(&ok), "&allowunlock=yes");

        // WFM lock always wins
        let locked = row(&[("dep_status_code", "HPUB"), ("dep_locking", "WFM")]);
        assert_eq!(lock_label(&locked), "");

        // Released with a real PDB id allows unlock
        let released = row(&[
            ("dep_status_code", "REL"),
            ("dep_locking", ""),
            ("pdb_id", "1ABC"),
        ]);
        assert_eq!(lock_label(&released), "&allowunlock=yes");
    }

    #[test]
    fn auxiliary_highlight_classes() {
        assert_eq!(
            auxiliary_class(&row(&[("dep_notify", "R"), ("dep_locking", "WFM")])),
            "background-red"
        );
        assert_eq!(
            auxiliary_class(&row(&[("dep_notify", "RN"), ("dep_locking", "")])),
            "background-lightblue"
        );
        assert_eq!(
            auxiliary_class(&row(&[("dep_notify", ""), ("dep_locking", "WFM")])),
            "background-medpink"
        );
        assert_eq!(auxiliary_class(&row(&[])), "");
    }

    #[test]
    fn ranked_order_bands() {
        let data = row(&[("dep_notify", "TN")]);
        // Matches the first listed flag: band 1
        assert_eq!(ranked_order(3, 10, "dep_notify:N,T", &data), "13");
        // No condition: raw order
        assert_eq!(ranked_order(3, 10, "", &data), "3");
        // No match: band after the last value
        let other = row(&[("dep_notify", "B")]);
        assert_eq!(ranked_order(0, 10, "dep_notify:N,T", &other), "30");
        // Exact-match fields compare whole values
        let status = row(&[("status_code", "REL")]);
        assert_eq!(ranked_order(2, 5, "status_code:HOLD,REL", &status), "12");
    }

    #[test]
    fn unsubmit_group_ordering() {
        let rows = vec![
            row(&[("dep_set_id", "G_1"), ("dep_notify", "")]),
            row(&[("dep_set_id", "G_2"), ("dep_notify", "T")]),
            row(&[("dep_set_id", "G_3"), ("dep_notify", "N")]),
            row(&[("dep_set_id", "G_4"), ("dep_notify", "B")]),
        ];
        let ordered = unsubmit_group_order(rows);
        let ids: Vec<&str> = ordered.iter().map(|r| field(r, "dep_set_id")).collect();
        assert_eq!(ids, vec!["G_3", "G_2", "G_4", "G_1"]);
    }

    #[test]
    fn pi_rows_joined_across_multiple_pis() {
        let rows = vec![
            row(&[
                ("id", "D_1"),
                ("name_first", "Jane"),
                ("name_last", "Doe"),
                ("country", "UK"),
            ]),
            row(&[
                ("id", "D_1"),
                ("name_first", "John"),
                ("name_last", "Roe"),
                ("country", "US"),
            ]),
            // Missing country: skipped
            row(&[("id", "D_2"), ("name_last", "Poe"), ("country", "")]),
        ];
        let map = process_pi_rows(&rows, &["name_first", "name_mi", "name_last"]);
        let info = map.get("D_1").unwrap();
        assert_eq!(field(info, "pi_name"), "Jane Doe, <br/>John Roe");
        assert_eq!(field(info, "country"), "UK, <br/>US");
        assert!(!map.contains_key("D_2"));
    }

    #[test]
    fn url_encoding() {
        assert_eq!(url_encode("X-RAY DIFFRACTION"), "X-RAY%20DIFFRACTION");
        assert_eq!(url_encode("plain"), "plain");
    }
}
