//! Ligand id lookup across entries
//!
//! Unlike the tool-backed tasks, this runs a single batched content-db
//! query and formats a per-entry ligand summary.

use std::collections::BTreeMap;

use crate::db::row::field;
use crate::db::ContentDb;

/// Collects ligand component ids per entry
pub struct LigandFinder {
    entry_list: Vec<String>,
}

impl LigandFinder {
    pub fn new(entry_list: Vec<String>) -> Self {
        Self { entry_list }
    }

    /// Returns (per-entry ligand id map, user-facing message)
    pub async fn run(&self, content_db: &ContentDb) -> (BTreeMap<String, Vec<String>>, String) {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let rows = match content_db.ligand_id_list(&self.entry_list).await {
            Ok(rows) => rows,
            Err(e) => return (map, format!("Ligand search failed: {}", e)),
        };
        for row in &rows {
            let entry_id = field(row, "structure_id");
            let comp_id = field(row, "comp_id");
            if entry_id.is_empty() || comp_id.is_empty() {
                continue;
            }
            map.entry(entry_id.to_string())
                .or_default()
                .push(comp_id.to_string());
        }

        if map.is_empty() {
            return (map, "No ligand found.".to_string());
        }
        (map, String::new())
    }
}
