//! Entry status update across model files and both databases
//!
//! Writes the selected status tokens to a CIF data file, runs the category
//! update tool over each entry's latest model, promotes the updated model
//! into the archive, and finally updates the deposition and rcsb_status
//! records for the entries that succeeded.

use wfm_common::RequestValues;

use crate::db::{ContentDb, StatusDb};
use crate::tasks::{run_entries, TaskContext, Version};

const STATUS_DATA_FILE: &str = "statusInfo_StatusUpdater.cif";

/// Status tokens accepted from the update form
const STATUS_TOKENS: [&str; 6] = [
    "status_code",
    "author_approval_type",
    "author_release_status_code",
    "date_hold_coordinates",
    "pdbx_annotator",
    "process_site",
];

/// Applies a status update to a list of entries
pub struct StatusUpdater {
    context: TaskContext,
    entry_list: Vec<String>,
    status_info: Vec<(String, String)>,
}

impl StatusUpdater {
    pub fn new(context: TaskContext, request: &RequestValues, entry_list: Vec<String>) -> Self {
        let status_info: Vec<(String, String)> = STATUS_TOKENS
            .iter()
            .filter_map(|token| {
                let value = request.get(token);
                if value.is_empty() {
                    None
                } else {
                    Some((token.to_string(), value.to_string()))
                }
            })
            .collect();
        Self {
            context,
            entry_list,
            status_info,
        }
    }

    pub async fn run(&self, status_db: &StatusDb, content_db: &ContentDb) -> String {
        if self.status_info.is_empty() {
            return "No status info. selected.".to_string();
        }
        self.write_status_data_file();

        let context = self.context.clone();
        let results = run_entries(&self.entry_list, move |entry_id| {
            let context = context.clone();
            async move { update_entry(&context, &entry_id).await }
        })
        .await;

        let mut message = String::new();
        let mut updated: Vec<String> = Vec::new();
        for (entry_id, error) in results {
            if error.is_empty() {
                message.push_str(&format!("Status update for {} successfully.\n", entry_id));
                updated.push(entry_id);
            } else {
                message.push_str(&format!(
                    "Status update for {} failed:\n\t{}\n",
                    entry_id, error
                ));
            }
        }

        for entry_id in &updated {
            let deposition: Vec<(&str, &str)> = self
                .status_info
                .iter()
                .filter_map(|(token, value)| {
                    deposition_column(token).map(|column| (column, value.as_str()))
                })
                .collect();
            if !deposition.is_empty() {
                let error = status_db.update_deposition(entry_id, &deposition).await;
                if !error.is_empty() {
                    message.push_str(&format!("{}\n", error));
                }
            }

            let rcsb: Vec<(&str, &str)> = self
                .status_info
                .iter()
                .filter_map(|(token, value)| {
                    rcsb_status_column(token).map(|column| (column, value.as_str()))
                })
                .collect();
            if !rcsb.is_empty() {
                let error = content_db.update_rcsb_status(entry_id, &rcsb).await;
                if !error.is_empty() {
                    message.push_str(&format!("{}\n", error));
                }
            }
        }
        message
    }

    /// Write the selected tokens as a single-row status category
    fn write_status_data_file(&self) {
        let path = self.context.session_path(STATUS_DATA_FILE);
        self.context.remove_file(&path);
        let mut content = String::from("data_STATUS\n");
        for (token, value) in &self.status_info {
            content.push_str(&format!("_pdbx_database_status.{} '{}'\n", token, value));
        }
        let _ = std::fs::write(&path, content);
    }
}

async fn update_entry(context: &TaskContext, entry_id: &str) -> String {
    let model_file = match context.existing_archive_file(entry_id, "model", "cif") {
        Ok(path) => path,
        Err(message) => return message,
    };

    let updated_model = format!("{}_StatusUpdater.cif", entry_id);
    let updated_path = context.session_path(&updated_model);
    context.remove_file(&updated_path);

    let tool = context.site().tools.annot_bin_path.join("UpdateCifCategory");
    let input = model_file.display().to_string();
    let log = format!("StatusUpdater_update_cif_{}.log", entry_id);
    let clog = format!("StatusUpdater_update_cif_command_{}.log", entry_id);
    context
        .run_tool(
            &tool,
            &[
                "-input",
                &input,
                "-output",
                &updated_model,
                "-data",
                STATUS_DATA_FILE,
                "-log",
                &log,
            ],
            &clog,
        )
        .await;
    if !updated_path.exists() {
        return "Status update failed.".to_string();
    }

    match context.archive_file(entry_id, "model", "cif", Version::Next) {
        Some(target) => context.copy_file(&updated_path, &target),
        None => "Status update failed.".to_string(),
    }
}

fn deposition_column(token: &str) -> Option<&'static str> {
    match token {
        "status_code" => Some("status_code"),
        "author_release_status_code" => Some("author_release_status_code"),
        "pdbx_annotator" => Some("annotator_initials"),
        "process_site" => Some("process_site"),
        _ => None,
    }
}

fn rcsb_status_column(token: &str) -> Option<&'static str> {
    match token {
        "status_code" => Some("status_code"),
        "author_approval_type" => Some("author_approval_type"),
        "author_release_status_code" => Some("author_release_status_code"),
        "date_hold_coordinates" => Some("date_hold_coordinates"),
        "pdbx_annotator" => Some("rcsb_annotator"),
        "process_site" => Some("process_site"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_column_mapping() {
        assert_eq!(deposition_column("pdbx_annotator"), Some("annotator_initials"));
        assert_eq!(deposition_column("author_approval_type"), None);
        assert_eq!(rcsb_status_column("pdbx_annotator"), Some("rcsb_annotator"));
        assert_eq!(rcsb_status_column("date_hold_coordinates"), Some("date_hold_coordinates"));
    }
}
