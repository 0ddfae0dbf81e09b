//! PDB format generation from entry model files

use crate::tasks::{run_entries, TaskContext, Version};

/// Converts each entry's latest model to PDB format and archives the result
pub struct PdbFileGenerator {
    context: TaskContext,
    entry_list: Vec<String>,
}

impl PdbFileGenerator {
    pub fn new(context: TaskContext, entry_list: Vec<String>) -> Self {
        Self {
            context,
            entry_list,
        }
    }

    pub async fn run(&self) -> String {
        let context = self.context.clone();
        let results = run_entries(&self.entry_list, move |entry_id| {
            let context = context.clone();
            async move { generate_entry(&context, &entry_id).await }
        })
        .await;

        let mut message = String::new();
        for (entry_id, error) in results {
            if error.is_empty() {
                message.push_str(&format!(
                    "Generate PDB file for {} successfully.\n",
                    entry_id
                ));
            } else {
                message.push_str(&format!(
                    "Generate PDB file for {} failed:\n\t{}\n",
                    entry_id, error
                ));
            }
        }
        message
    }
}

async fn generate_entry(context: &TaskContext, entry_id: &str) -> String {
    let model_file = match context.existing_archive_file(entry_id, "model", "cif") {
        Ok(path) => path,
        Err(message) => return message,
    };

    let pdb_file = format!("{}_PdbFileGenerator.pdb", entry_id);
    let pdb_path = context.session_path(&pdb_file);
    context.remove_file(&pdb_path);

    let tool = context.site().tools.annot_bin_path.join("maxit");
    let input = model_file.display().to_string();
    let clog = format!("PdbFileGenerator_generate_pdb_command_{}.log", entry_id);
    context
        .run_tool(
            &tool,
            &["-input", &input, "-output", &pdb_file, "-o", "2"],
            &clog,
        )
        .await;
    if !pdb_path.exists() {
        return "Convert PDB file failed.".to_string();
    }

    match context.archive_file(entry_id, "model", "pdb", Version::Next) {
        Some(target) => context.copy_file(&pdb_path, &target),
        None => "Convert PDB file failed.".to_string(),
    }
}
