//! Metadata merging into entry model files
//!
//! Merges metadata categories from an uploaded template file (or, in
//! recovery mode, from an earlier archive version) into each entry's latest
//! model, then promotes the merged model into the archive.

use std::path::PathBuf;

use crate::tasks::{run_entries, TaskContext, Version};

/// Merges metadata categories into a list of entries
pub struct MetaDataMerger {
    context: TaskContext,
    entry_list: Vec<String>,
    template_file: Option<PathBuf>,
    recover: bool,
}

impl MetaDataMerger {
    pub fn new(
        context: TaskContext,
        entry_list: Vec<String>,
        template_file: Option<PathBuf>,
        recover: bool,
    ) -> Self {
        Self {
            context,
            entry_list,
            template_file,
            recover,
        }
    }

    pub async fn run(&self) -> String {
        let context = self.context.clone();
        let template = self.template_file.clone();
        let recover = self.recover;
        let results = run_entries(&self.entry_list, move |entry_id| {
            let context = context.clone();
            let template = template.clone();
            async move { merge_entry(&context, &entry_id, template, recover).await }
        })
        .await;

        let mut message = String::new();
        for (entry_id, error) in results {
            if error.is_empty() {
                message.push_str(&format!(
                    "Merge metadata for {} successfully.\n",
                    entry_id
                ));
            } else {
                message.push_str(&format!(
                    "Merge metadata for {} failed:\n\t{}\n",
                    entry_id, error
                ));
            }
        }
        message
    }
}

async fn merge_entry(
    context: &TaskContext,
    entry_id: &str,
    template_file: Option<PathBuf>,
    recover: bool,
) -> String {
    let model_file = match context.existing_archive_file(entry_id, "model", "cif") {
        Ok(path) => path,
        Err(message) => return message,
    };

    // Recovery mode reads the template from the entry's first archived model
    let template = if recover {
        match context.archive_file(entry_id, "model", "cif", Version::Number(1)) {
            Some(path) if path.exists() => path,
            _ => return format!("Can not find V1 model file for {}.", entry_id),
        }
    } else {
        match template_file {
            Some(path) if path.exists() => path,
            _ => return "No metadata template file uploaded.".to_string(),
        }
    };

    let merged_model = format!("{}_MetaDataMerger.cif", entry_id);
    let merged_path = context.session_path(&merged_model);
    context.remove_file(&merged_path);

    let tool = context.site().tools.annot_bin_path.join("MergeCifCategory");
    let input = model_file.display().to_string();
    let template_arg = template.display().to_string();
    let log = format!("MetaDataMerger_update_cif_{}.log", entry_id);
    let clog = format!("MetaDataMerger_update_cif_command_{}.log", entry_id);
    context
        .run_tool(
            &tool,
            &[
                "-input",
                &input,
                "-output",
                &merged_model,
                "-template",
                &template_arg,
                "-log",
                &log,
            ],
            &clog,
        )
        .await;
    if !merged_path.exists() {
        let log_message = context.log_message(&log);
        if log_message.is_empty() {
            return "Merge metadata failed.".to_string();
        }
        return log_message;
    }

    match context.archive_file(entry_id, "model", "cif", Version::Next) {
        Some(target) => context.copy_file(&merged_path, &target),
        None => "Merge metadata failed.".to_string(),
    }
}
