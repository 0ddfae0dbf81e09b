//! Dictionary check of entry model files

use crate::tasks::{run_entries, TaskContext};

/// Runs the dictionary checker over each entry's latest model file
pub struct CifChecker {
    context: TaskContext,
    entry_list: Vec<String>,
}

impl CifChecker {
    pub fn new(context: TaskContext, entry_list: Vec<String>) -> Self {
        Self {
            context,
            entry_list,
        }
    }

    /// Check every entry, returning the combined per-entry report
    pub async fn run(&self) -> String {
        let context = self.context.clone();
        let results = run_entries(&self.entry_list, move |entry_id| {
            let context = context.clone();
            async move { check_entry(&context, &entry_id).await }
        })
        .await;

        let mut message = String::new();
        for (entry_id, error) in results {
            let diag = self
                .context
                .log_message(&format!("{}_CifChecker.cif-diag.log", entry_id));
            let mut combined = error;
            if !diag.is_empty() {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(&diag);
            }
            if combined.is_empty() {
                message.push_str(&format!("Cif check for {} OK.\n", entry_id));
            } else {
                message.push_str(&format!("Cif check for {}:\n{}\n", entry_id, combined));
            }
        }
        message
    }
}

async fn check_entry(context: &TaskContext, entry_id: &str) -> String {
    let model_file = match context.existing_archive_file(entry_id, "model", "cif") {
        Ok(path) => path,
        Err(message) => return message,
    };

    let local_model = format!("{}_CifChecker.cif", entry_id);
    let local_path = context.session_path(&local_model);
    context.remove_file(&local_path);
    let message = context.copy_file(&model_file, &local_path);
    if !message.is_empty() {
        return message;
    }
    context.remove_file(&context.session_path(&format!("{}-diag.log", local_model)));

    let tool = context.site().tools.dict_bin_path.join("CifCheck");
    let sdb = context.site().tools.dict_sdb_path.display().to_string();
    let clog = format!("CifChecker_check_cif_command_{}.log", entry_id);
    let message = context
        .run_tool(&tool, &["-dictSdb", &sdb, "-f", &local_model], &clog)
        .await;

    context.remove_file(&local_path);
    context.remove_file(&context.session_path(&clog));
    message
}
