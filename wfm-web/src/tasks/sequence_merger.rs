//! Sequence assignment merging into entry model files

use std::path::PathBuf;

use crate::tasks::{run_entries, TaskContext, Version};

/// Merges sequence assignments from an uploaded file into each entry's model
pub struct SequenceMerger {
    context: TaskContext,
    entry_list: Vec<String>,
    assignment_file: Option<PathBuf>,
}

impl SequenceMerger {
    pub fn new(
        context: TaskContext,
        entry_list: Vec<String>,
        assignment_file: Option<PathBuf>,
    ) -> Self {
        Self {
            context,
            entry_list,
            assignment_file,
        }
    }

    pub async fn run(&self) -> String {
        let Some(assignment) = self
            .assignment_file
            .clone()
            .filter(|path| path.exists())
        else {
            return "No sequence assignment file uploaded.".to_string();
        };

        let context = self.context.clone();
        let results = run_entries(&self.entry_list, move |entry_id| {
            let context = context.clone();
            let assignment = assignment.clone();
            async move { merge_entry(&context, &entry_id, &assignment).await }
        })
        .await;

        let mut message = String::new();
        for (entry_id, error) in results {
            if error.is_empty() {
                message.push_str(&format!(
                    "Merge sequence for {} successfully.\n",
                    entry_id
                ));
            } else {
                message.push_str(&format!(
                    "Merge sequence for {} failed:\n\t{}\n",
                    entry_id, error
                ));
            }
        }
        message
    }
}

async fn merge_entry(context: &TaskContext, entry_id: &str, assignment: &PathBuf) -> String {
    let model_file = match context.existing_archive_file(entry_id, "model", "cif") {
        Ok(path) => path,
        Err(message) => return message,
    };

    let merged_model = format!("{}_SequenceMerger.cif", entry_id);
    let merged_path = context.session_path(&merged_model);
    context.remove_file(&merged_path);

    let tool = context.site().tools.annot_bin_path.join("MergeSeqModuleData");
    let input = model_file.display().to_string();
    let assign_arg = assignment.display().to_string();
    let log = format!("SequenceMerger_merge_seq_{}.log", entry_id);
    let clog = format!("SequenceMerger_merge_seq_command_{}.log", entry_id);
    context
        .run_tool(
            &tool,
            &[
                "-input",
                &input,
                "-output",
                &merged_model,
                "-assign",
                &assign_arg,
                "-log",
                &log,
            ],
            &clog,
        )
        .await;
    if !merged_path.exists() {
        let log_message = context.log_message(&log);
        if log_message.is_empty() {
            return "Merge sequence failed.".to_string();
        }
        return log_message;
    }

    match context.archive_file(entry_id, "model", "cif", Version::Next) {
        Some(target) => context.copy_file(&merged_path, &target),
        None => "Merge sequence failed.".to_string(),
    }
}
