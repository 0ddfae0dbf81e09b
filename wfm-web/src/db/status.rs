//! Status database access
//!
//! Parameterized query wrappers over the status schema (users, groups,
//! depositions, workflow instances, communication, reminder tracking).
//! Mutations follow the two-valued result convention: an empty message is
//! success, a non-empty message is a user-facing failure description.

use sqlx::SqlitePool;
use std::time::Duration;
use tracing::warn;
use wfm_common::Result;

use crate::db::row::{decode_row, field, DataRow};

const USER_SELECT: &str = "select u.user_name, u.password, u.da_group_id group_id, u.email, \
     u.initials, u.first_name, u.last_name, g.code, g.group_name, g.site \
     from da_users as u, da_group as g where u.da_group_id = g.da_group_id";

const SELECT_LAST_INSTANCE: &str = "select class_id as wf_class_id, inst_id as wf_inst_id, inst_status, dep_set_id, \
     dep_exp_method, pdb_id, dep_bmrb_id as bmrb_id, dep_emdb_id as emdb_id, dep_status_code, \
     dep_status_code_emdb, dep_author_release_status_code, dep_author_release_status_code_emdb, \
     dep_initial_deposition_date, annotator_initials, dep_notify, dep_locking, dep_title, \
     dep_author_list, dep_post_rel_status from dep_last_instance where dep_set_id = ?";

const SELECT_WF_LAST_INSTANCE: &str = "select ordinal, wf_inst_id, wf_class_id, dep_set_id, owner, inst_status, \
     status_timestamp from wf_instance where dep_set_id = ? and wf_class_id = ? \
     order by status_timestamp desc limit 1";

const SELECT_WF_ALL_INSTANCE: &str = "select wf_inst_id, wf_class_id, dep_set_id, inst_status, status_timestamp \
     from wf_instance where dep_set_id = ? and wf_class_id not in ('Annotate', 'depUpload') \
     order by wf_inst_id";

const SELECT_WF_TASKS: &str = "select wf_task_id, task_status, status_timestamp, task_type from wf_task \
     where dep_set_id = ? and wf_inst_id = ? and wf_class_id = ? order by status_timestamp asc";

/// Fixed retry budget for transient database failures
const RETRY_COUNT: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 200;

/// Status database API
#[derive(Debug, Clone)]
pub struct StatusDb {
    pool: SqlitePool,
}

impl StatusDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run a SELECT built by the configuration layer, decoding rows dynamically
    pub async fn run_select(&self, sql: &str) -> Result<Vec<DataRow>> {
        let rows = self.fetch_all_retry(sql, &[]).await?;
        Ok(rows)
    }

    // ---------------------------------------------------------------
    // Users and groups
    // ---------------------------------------------------------------

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Option<DataRow>> {
        if username.is_empty() || password.is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "{} and u.user_name = ? and u.password = ? and u.active = 0",
            USER_SELECT
        );
        self.fetch_first(&sql, &[username, password]).await
    }

    pub async fn get_user_by_name(&self, username: &str) -> Result<Option<DataRow>> {
        if username.is_empty() {
            return Ok(None);
        }
        let sql = format!("{} and u.user_name = ?", USER_SELECT);
        self.fetch_first(&sql, &[username]).await
    }

    pub async fn get_user_by_initials(&self, initials: &str) -> Result<Option<DataRow>> {
        if initials.is_empty() {
            return Ok(None);
        }
        let sql = format!("{} and u.initials = ?", USER_SELECT);
        self.fetch_first(&sql, &[initials]).await
    }

    /// Active annotators across the processing sites
    pub async fn get_active_annotators(&self) -> Result<Vec<DataRow>> {
        let sql = "select user_name, first_name, last_name, initials from da_users as dau, \
             da_group as dag where dau.da_group_id = dag.da_group_id and code = 'ANN' \
             and site in ('PDBj', 'RCSB', 'PDBC') and active = 0";
        self.fetch_all_retry(sql, &[]).await
    }

    /// Annotator (or leader) accounts for one site
    pub async fn get_site_annotators(&self, code: &str, site: &str) -> Result<Vec<DataRow>> {
        let sql = format!(
            "{} and u.active = 0 and g.code = ? and g.site = ?",
            USER_SELECT
        );
        self.fetch_all_retry(&sql, &[code, site]).await
    }

    pub async fn get_site_users(&self, site: &str) -> Result<Vec<DataRow>> {
        let sql = "select u.user_name, u.password, u.da_group_id group_id, u.email, u.initials, \
             u.first_name, u.last_name, u.active, g.code, g.group_name, g.site \
             from da_users as u, da_group as g where u.da_group_id = g.da_group_id \
             and g.site = ? order by u.active, g.code, u.initials";
        self.fetch_all_retry(sql, &[site]).await
    }

    pub async fn get_site_groups(&self, site: &str) -> Result<Vec<DataRow>> {
        let sql = "select code, group_name, site, da_group_id group_id from da_group where site = ?";
        self.fetch_all_retry(sql, &[site]).await
    }

    /// Initials of annotators no longer in the active user table
    pub async fn get_retired_annotator_initials(&self) -> Result<Vec<String>> {
        let sql = "select distinct annotator_initials from deposition where annotator_initials != '' \
             and annotator_initials not in (select initials from da_users where active = 0)";
        let rows = self.fetch_all_retry(sql, &[]).await?;
        Ok(rows
            .iter()
            .map(|r| field(r, "annotator_initials").to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    pub async fn update_user(
        &self,
        password: &str,
        email: &str,
        first_name: &str,
        last_name: &str,
        user_name: &str,
    ) -> String {
        if password.is_empty()
            || email.is_empty()
            || first_name.is_empty()
            || last_name.is_empty()
            || user_name.is_empty()
        {
            return "Update user information failed.".to_string();
        }
        let result = sqlx::query(
            "update da_users set password = ?, email = ?, first_name = ?, last_name = ? \
             where user_name = ?",
        )
        .bind(password)
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(user_name)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => String::new(),
            Err(e) => {
                warn!("update_user failed: {}", e);
                "Update user information failed.".to_string()
            }
        }
    }

    /// Move a user into the site group carrying `code` (privilege toggle)
    pub async fn update_user_privilege(&self, user_name: &str, code: &str, site: &str) -> String {
        if user_name.is_empty() || code.is_empty() {
            return "Change privilege failed.".to_string();
        }
        let result = sqlx::query(
            "update da_users set da_group_id = \
             (select da_group_id from da_group where code = ? and site = ?) where user_name = ?",
        )
        .bind(code)
        .bind(site)
        .bind(user_name)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => String::new(),
            Err(e) => {
                warn!("update_user_privilege failed: {}", e);
                "Change privilege failed.".to_string()
            }
        }
    }

    pub async fn update_user_active(&self, user_name: &str, active: &str) -> String {
        if user_name.is_empty() {
            return "Change active user failed.".to_string();
        }
        let result = sqlx::query("update da_users set active = ? where user_name = ?")
            .bind(active)
            .bind(user_name)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => String::new(),
            Err(e) => {
                warn!("update_user_active failed: {}", e);
                "Change active user failed.".to_string()
            }
        }
    }

    // ---------------------------------------------------------------
    // Depositions and workflow instances
    // ---------------------------------------------------------------

    pub async fn get_dep_info(&self, dep_id: &str) -> Result<Option<DataRow>> {
        if dep_id.is_empty() {
            return Ok(None);
        }
        let sql = "select depPW as deppw, pdb_id, bmrb_id, emdb_id, title from deposition \
             where dep_set_id = ?";
        self.fetch_first(sql, &[dep_id]).await
    }

    pub async fn get_timestamp_info(&self, dep_id: &str) -> Result<Vec<DataRow>> {
        let sql = "select ordinal, mtime, event, info1, info2 from timestamp \
             where dep_set_id = ? order by ordinal";
        self.fetch_all_retry(sql, &[dep_id]).await
    }

    pub async fn get_last_instance(&self, dep_id: &str) -> Result<Option<DataRow>> {
        if dep_id.is_empty() {
            return Ok(None);
        }
        self.fetch_first(SELECT_LAST_INSTANCE, &[dep_id]).await
    }

    pub async fn get_last_wf_instance(
        &self,
        dep_id: &str,
        class_id: &str,
    ) -> Result<Option<DataRow>> {
        self.fetch_first(SELECT_WF_LAST_INSTANCE, &[dep_id, class_id])
            .await
    }

    pub async fn get_all_wf_instances(&self, dep_id: &str) -> Result<Vec<DataRow>> {
        self.fetch_all_retry(SELECT_WF_ALL_INSTANCE, &[dep_id]).await
    }

    pub async fn get_wf_tasks(
        &self,
        dep_id: &str,
        inst_id: &str,
        class_id: &str,
    ) -> Result<Vec<DataRow>> {
        self.fetch_all_retry(SELECT_WF_TASKS, &[dep_id, inst_id, class_id])
            .await
    }

    pub async fn get_wf_class(&self, class_id: &str) -> Result<Option<DataRow>> {
        if class_id.is_empty() {
            return Ok(None);
        }
        let sql = "select wf_class_id, wf_class_name, title, author, version, class_file \
             from wf_class_dict where wf_class_id = ?";
        self.fetch_first(sql, &[class_id]).await
    }

    /// True when `table` exists in the status schema
    pub async fn is_table_valid(&self, table: &str) -> bool {
        let count: std::result::Result<i64, sqlx::Error> = sqlx::query_scalar(
            "select count(*) from sqlite_master where type = 'table' and name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await;
        matches!(count, Ok(n) if n > 0)
    }

    // ---------------------------------------------------------------
    // Group depositions
    // ---------------------------------------------------------------

    pub async fn get_group_ids(&self, dep_ids: &[String]) -> Result<Vec<DataRow>> {
        if dep_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select dep_set_id, group_id from group_deposition_information where dep_set_id in ({})",
            placeholders(dep_ids.len())
        );
        self.fetch_all_list(&sql, dep_ids).await
    }

    pub async fn get_entries_for_groups(&self, group_ids: &[String]) -> Result<Vec<DataRow>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select group_id, dep_set_id from group_deposition_information where group_id in ({}) \
             order by dep_set_id",
            placeholders(group_ids.len())
        );
        self.fetch_all_list(&sql, group_ids).await
    }

    pub async fn get_simple_entry_info(&self, dep_ids: &[String]) -> Result<Vec<DataRow>> {
        if dep_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select dep_set_id, initial_deposition_date, annotator_initials, status_code \
             from deposition where dep_set_id in ({}) order by dep_set_id",
            placeholders(dep_ids.len())
        );
        self.fetch_all_list(&sql, dep_ids).await
    }

    /// Parse a free-form id input string into deposition ids
    pub fn entry_id_list_from_input(&self, input: &str) -> (String, Vec<String>) {
        parse_entry_id_input(input)
    }

    // ---------------------------------------------------------------
    // My list, reminder tracking
    // ---------------------------------------------------------------

    pub async fn get_anno_selection(&self, dep_ids: &[String]) -> Result<Vec<DataRow>> {
        if dep_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select dep_set_id, annotator_initials from anno_selection where dep_set_id in ({})",
            placeholders(dep_ids.len())
        );
        self.fetch_all_list(&sql, dep_ids).await
    }

    pub async fn add_to_my_list(&self, dep_id: &str, initials: &str) -> Result<()> {
        if dep_id.is_empty() || initials.is_empty() {
            return Ok(());
        }
        let existing = self
            .get_anno_selection(&[dep_id.to_string()])
            .await
            .unwrap_or_default();
        if !existing.is_empty() {
            return Ok(());
        }
        sqlx::query("insert into anno_selection (dep_set_id, annotator_initials) values (?, ?)")
            .bind(dep_id)
            .bind(initials)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_from_my_list(&self, dep_id: &str) -> Result<()> {
        if dep_id.is_empty() {
            return Ok(());
        }
        sqlx::query("delete from anno_selection where dep_set_id = ?")
            .bind(dep_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_remind_message_track(&self, dep_ids: &[String]) -> Result<Vec<DataRow>> {
        if dep_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select dep_set_id, major_issue, last_reminder_sent_date, last_validation_sent_date, \
             last_message_sent_date, last_message_received_date from remind_message_track \
             where dep_set_id in ({})",
            placeholders(dep_ids.len())
        );
        self.fetch_all_list(&sql, dep_ids).await
    }

    // ---------------------------------------------------------------
    // Contact authors (status-side fallback)
    // ---------------------------------------------------------------

    pub async fn contact_author_pi(&self, dep_ids: &[String]) -> Result<Vec<DataRow>> {
        if dep_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select dep_set_id as id, email, last_name, role, country from user_data \
             where dep_set_id in ({}) and role = 'principal investigator/group leader'",
            placeholders(dep_ids.len())
        );
        self.fetch_all_list(&sql, dep_ids).await
    }

    pub async fn valid_contact_author(&self, dep_id: &str) -> Result<Option<DataRow>> {
        let sql = "select dep_set_id as id, email, last_name, role, country from user_data \
             where dep_set_id = ? and last_name != '' limit 1";
        self.fetch_first(sql, &[dep_id]).await
    }

    // ---------------------------------------------------------------
    // Workflow engine communication
    // ---------------------------------------------------------------

    /// Mark a deposition's workflow for process kill
    pub async fn kill_workflow(&self, dep_id: &str) -> String {
        if dep_id.is_empty() {
            return "No deposition ID defined.".to_string();
        }
        let result = sqlx::query(
            "update communication set command = 'killWF', actual_timestamp = ?, \
             receiver = 'WFE', status = 'PENDING' where dep_set_id = ?",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(dep_id)
        .execute(&self.pool)
        .await;
        match result {
            Ok(r) if r.rows_affected() > 0 => String::new(),
            Ok(_) => format!("Failed to mark {} for process kill", dep_id),
            Err(e) => {
                warn!("kill_workflow failed: {}", e);
                format!("Failed to mark {} for process kill", dep_id)
            }
        }
    }

    /// Queue a workflow engine command for a deposition
    pub async fn push_wf_command(
        &self,
        dep_id: &str,
        class_id: &str,
        inst_id: &str,
        command: &str,
    ) -> String {
        if dep_id.is_empty() || command.is_empty() {
            return "No workflow command defined.".to_string();
        }
        let result = sqlx::query(
            "update communication set command = ?, wf_class_id = ?, wf_inst_id = ?, \
             actual_timestamp = ?, receiver = 'WFE', status = 'PENDING' where dep_set_id = ?",
        )
        .bind(command)
        .bind(class_id)
        .bind(inst_id)
        .bind(chrono::Utc::now().timestamp())
        .bind(dep_id)
        .execute(&self.pool)
        .await;
        match result {
            Ok(r) if r.rows_affected() > 0 => String::new(),
            Ok(_) => format!("Failed to send '{}' command for {}", command, dep_id),
            Err(e) => {
                warn!("push_wf_command failed: {}", e);
                format!("Failed to send '{}' command for {}", command, dep_id)
            }
        }
    }

    /// Record an annotator assignment on the deposition and its last instance
    pub async fn assign_annotator(&self, dep_id: &str, initials: &str) -> String {
        if dep_id.is_empty() {
            return "No deposition ID defined.".to_string();
        }
        for sql in [
            "update deposition set annotator_initials = ? where dep_set_id = ?",
            "update dep_last_instance set annotator_initials = ? where dep_set_id = ?",
        ] {
            if let Err(e) = sqlx::query(sql)
                .bind(initials)
                .bind(dep_id)
                .execute(&self.pool)
                .await
            {
                warn!("assign_annotator failed: {}", e);
                return format!("Assign annotator failed for {}.", dep_id);
            }
        }
        String::new()
    }

    /// Update named columns of the deposition row for one entry
    pub async fn update_deposition(&self, dep_id: &str, data: &[(&str, &str)]) -> String {
        if dep_id.is_empty() || data.is_empty() {
            return String::new();
        }
        for (column, _) in data {
            if !is_identifier(column) {
                return format!("Invalid column name '{}'.", column);
            }
        }
        let assignments = data
            .iter()
            .map(|(column, _)| format!("{} = ?", column))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "update deposition set {} where dep_set_id = ?",
            assignments
        );
        let mut query = sqlx::query(&sql);
        for (_, value) in data {
            query = query.bind(*value);
        }
        query = query.bind(dep_id);
        match query.execute(&self.pool).await {
            Ok(_) => String::new(),
            Err(e) => {
                warn!("update_deposition failed: {}", e);
                format!("Status update failed for {}.", dep_id)
            }
        }
    }

    // ---------------------------------------------------------------
    // Internal helpers
    // ---------------------------------------------------------------

    async fn fetch_first(&self, sql: &str, params: &[&str]) -> Result<Option<DataRow>> {
        let rows = self.fetch_all_retry(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_all_list(&self, sql: &str, params: &[String]) -> Result<Vec<DataRow>> {
        let refs: Vec<&str> = params.iter().map(String::as_str).collect();
        self.fetch_all_retry(sql, &refs).await
    }

    async fn fetch_all_retry(&self, sql: &str, params: &[&str]) -> Result<Vec<DataRow>> {
        let mut attempt = 0;
        loop {
            let mut query = sqlx::query(sql);
            for param in params {
                query = query.bind(*param);
            }
            match query.fetch_all(&self.pool).await {
                Ok(rows) => return Ok(rows.iter().map(decode_row).collect()),
                Err(e) => {
                    attempt += 1;
                    if attempt > RETRY_COUNT {
                        return Err(e.into());
                    }
                    warn!("query failed (attempt {}): {}", attempt, e);
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64))
                        .await;
                }
            }
        }
    }
}

/// `?, ?, ...` placeholder list for an IN clause
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split a comma/whitespace separated id string; each id must look like a
/// deposition (`D_`) or group (`G_`) identifier.
fn parse_entry_id_input(input: &str) -> (String, Vec<String>) {
    let mut ids = Vec::new();
    for token in input.split([',', ' ', '\t', '\n']) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if !token.starts_with("D_") && !token.starts_with("G_") {
            return (format!("Invalid ID '{}'.", token), Vec::new());
        }
        ids.push(token.to_string());
    }
    (String::new(), ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_list() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn entry_id_parsing() {
        let (msg, ids) = parse_entry_id_input("D_1000001, D_1000002\nG_100");
        assert!(msg.is_empty());
        assert_eq!(ids, vec!["D_1000001", "D_1000002", "G_100"]);

        let (msg, ids) = parse_entry_id_input("D_1000001, X_9");
        assert!(msg.contains("Invalid ID"));
        assert!(ids.is_empty());
    }

    #[test]
    fn identifier_validation() {
        assert!(is_identifier("status_code"));
        assert!(!is_identifier("status_code; drop"));
        assert!(!is_identifier(""));
    }
}
