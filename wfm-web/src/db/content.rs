//! Content database access
//!
//! Parameterized query wrappers over the content schema (authorship, audit
//! history, release status, ligands). Read-mostly; the one update path is
//! used by the status updater task.

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;
use wfm_common::Result;

use crate::db::row::{decode_row, field, has_field, DataRow};
use crate::db::status::placeholders;

const PI_ROLE: &str = "principal investigator/group leader";

const RETRY_COUNT: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 200;

/// Content database API
#[derive(Debug, Clone)]
pub struct ContentDb {
    pool: SqlitePool,
}

impl ContentDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_select(&self, sql: &str) -> Result<Vec<DataRow>> {
        self.fetch_all_retry(sql, &[]).await
    }

    /// Revision history joined with coordinate-replacement details
    pub async fn audit_history(&self, dep_id: &str) -> Result<Vec<DataRow>> {
        let sql = "select h.structure_id, h.ordinal, h.major_revision, h.minor_revision, \
             h.revision_date, h.internal_version, d.description \
             from pdbx_audit_revision_history as h \
             left join pdbx_audit_revision_details d on h.structure_id = d.structure_id \
             and h.ordinal = d.revision_ordinal and d.type = 'Coordinate replacement' \
             where h.structure_id = ? order by ordinal";
        self.fetch_all_retry(sql, &[dep_id]).await
    }

    pub async fn contact_authors(&self, dep_id: &str) -> Result<Vec<DataRow>> {
        let sql = "select structure_id as id, email, name_first, name_mi, name_last, role, country \
             from pdbx_contact_author where structure_id = ?";
        self.fetch_all_retry(sql, &[dep_id]).await
    }

    pub async fn contact_author_pi(&self, dep_ids: &[String]) -> Result<Vec<DataRow>> {
        if dep_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select structure_id as id, email, name_first, name_mi, name_last, role, country \
             from pdbx_contact_author where structure_id in ({}) and role = '{}'",
            placeholders(dep_ids.len()),
            PI_ROLE
        );
        self.fetch_all_list(&sql, dep_ids).await
    }

    /// Annotator initials with entries begun on one day
    pub async fn daily_stats_list(&self, date: &str) -> Result<Vec<String>> {
        let sql = "select rcsb_annotator from rcsb_status where status_code not in \
             ('PROC','WAIT','POLC','AUCO') and date_begin_processing = ?";
        let rows = self.fetch_all_retry(sql, &[date]).await?;
        Ok(annotator_list(&rows))
    }

    /// Annotator initials with entries begun inside a date range
    pub async fn range_stats_list(&self, start: &str, end: &str) -> Result<Vec<String>> {
        let sql = "select rcsb_annotator from rcsb_status where status_code not in \
             ('PROC','WAIT','POLC','AUCO') and date_begin_processing >= ? \
             and date_begin_processing <= ?";
        let rows = self.fetch_all_retry(sql, &[start, end]).await?;
        Ok(annotator_list(&rows))
    }

    pub async fn in_process_stats_list(&self) -> Result<Vec<DataRow>> {
        let sql = "select rcsb_annotator, status_code from rcsb_status where status_code in \
             ('WAIT','PROC','AUTH','POLC','REPL')";
        self.fetch_all_retry(sql, &[]).await
    }

    /// Release dates per entry; map-only entries fall back to the EM release
    pub async fn release_date_map(&self, dep_ids: &[String]) -> Result<HashMap<String, String>> {
        if dep_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let em_sql = format!(
            "select structure_id, current_status, map_release_date date_of_em_release \
             from em_admin where structure_id in ({}) order by structure_id",
            placeholders(dep_ids.len())
        );
        let mut em_map = HashMap::new();
        for row in self.fetch_all_list(&em_sql, dep_ids).await? {
            if has_field(&row, "structure_id") && has_field(&row, "date_of_em_release") {
                em_map.insert(
                    field(&row, "structure_id").to_string(),
                    field(&row, "date_of_em_release")
                        .replace(" 00:00:00", "")
                        .to_string(),
                );
            }
        }

        let sql = format!(
            "select structure_id, pdb_id, date_of_rcsb_release from rcsb_status \
             where structure_id in ({}) order by structure_id",
            placeholders(dep_ids.len())
        );
        let mut map = HashMap::new();
        for row in self.fetch_all_list(&sql, dep_ids).await? {
            let id = field(&row, "structure_id");
            if id.is_empty() {
                continue;
            }
            if has_field(&row, "pdb_id") {
                if has_field(&row, "date_of_rcsb_release") {
                    map.insert(id.to_string(), field(&row, "date_of_rcsb_release").to_string());
                }
            } else if let Some(em_date) = em_map.get(id) {
                map.insert(id.to_string(), em_date.clone());
            }
        }
        Ok(map)
    }

    /// Coordinate-replacement counts per PI over the last year
    pub async fn replace_counts(&self) -> Result<Vec<DataRow>> {
        let sql = "select s2.name, s2.identifier_orcid, sum(s2.count) as numreplace from \
             (select c.identifier_orcid, c.name_last || ', ' || c.name_first as name, s1.count \
              from pdbx_contact_author as c, \
              (select d.structure_id, count(d.structure_id) as count \
               from pdbx_audit_revision_details as d, pdbx_audit_revision_history as h \
               where h.structure_id = d.structure_id and h.ordinal = d.revision_ordinal \
               and d.type = 'Coordinate replacement' \
               and julianday('now') - julianday(h.revision_date) <= 365 \
               group by d.structure_id) s1 \
              where s1.structure_id = c.structure_id \
              and c.role = 'principal investigator/group leader' \
              order by c.identifier_orcid) s2 \
             group by identifier_orcid, name order by name";
        self.fetch_all_retry(sql, &[]).await
    }

    pub async fn ligand_id_list(&self, dep_ids: &[String]) -> Result<Vec<DataRow>> {
        if dep_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select structure_id, comp_id from pdbx_entity_nonpoly where structure_id in ({})",
            placeholders(dep_ids.len())
        );
        self.fetch_all_list(&sql, dep_ids).await
    }

    /// Public PDB accession per internal PDB id
    pub async fn pdb_ext_id_map(&self, pdb_ids: &[String]) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        if pdb_ids.is_empty() {
            return Ok(map);
        }
        let sql = format!(
            "select distinct database_code, pdbx_database_accession from database_2 \
             where database_id = 'PDB' and pdbx_database_accession is not null \
             and pdbx_database_accession != '' and database_code in ({})",
            placeholders(pdb_ids.len())
        );
        for row in self.fetch_all_list(&sql, pdb_ids).await? {
            if has_field(&row, "database_code") && has_field(&row, "pdbx_database_accession") {
                map.insert(
                    field(&row, "database_code").to_string(),
                    field(&row, "pdbx_database_accession").to_string(),
                );
            }
        }
        Ok(map)
    }

    /// Update named columns of the rcsb_status row for one entry
    pub async fn update_rcsb_status(&self, dep_id: &str, data: &[(&str, &str)]) -> String {
        if dep_id.is_empty() || data.is_empty() {
            return String::new();
        }
        for (column, _) in data {
            if column.is_empty()
                || !column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return format!("Invalid column name '{}'.", column);
            }
        }
        let assignments = data
            .iter()
            .map(|(column, _)| format!("{} = ?", column))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "update rcsb_status set {} where structure_id = ?",
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
                warn!("update_rcsb_status failed: {}", e);
                format!("Status update failed for {}.", dep_id)
            }
        }
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

fn annotator_list(rows: &[DataRow]) -> Vec<String> {
    rows.iter()
        .map(|r| field(r, "rcsb_annotator").to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
