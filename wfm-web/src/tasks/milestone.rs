//! Milestone file operations
//!
//! A milestone is a named snapshot of an entry's primary model file at a
//! workflow checkpoint: the archive milestone copies the latest model to a
//! `model-annotate` snapshot; the reset copies it back to the deposit area.

use crate::tasks::{TaskContext, Version};

/// Copy the latest model to the next `model-annotate` milestone version
pub fn archive_milestone(context: &TaskContext, entry_id: &str) -> String {
    if entry_id.is_empty() {
        return "No deposition ID defined.".to_string();
    }
    let source = match context.existing_archive_file(entry_id, "model", "cif") {
        Ok(path) => path,
        Err(_) => {
            return format!(
                "Can't find model file for entry {} in archive directory.",
                entry_id
            )
        }
    };
    let target = match context.archive_file(entry_id, "model-annotate", "cif", Version::Next) {
        Some(path) => path,
        None => return format!("Copy model-annotate file failed for entry {}.", entry_id),
    };
    let message = context.copy_file(&source, &target);
    if message.is_empty() {
        String::new()
    } else {
        format!("Copy model-annotate file failed for entry {}.", entry_id)
    }
}

/// Copy the latest archive model back into the entry's deposit directory
pub fn reset_milestone(context: &TaskContext, entry_id: &str) -> String {
    if entry_id.is_empty() {
        return "No deposition ID defined.".to_string();
    }
    let source = match context.existing_archive_file(entry_id, "model", "cif") {
        Ok(path) => path,
        Err(_) => {
            return format!(
                "Can't find model file for entry {} in archive directory.",
                entry_id
            )
        }
    };

    let deposit_dir = context.site().deposit_path.join(entry_id);
    let prefix = format!("{}_model_P1.cif.V", entry_id);
    let mut highest = 0u32;
    if let Ok(entries) = std::fs::read_dir(&deposit_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(suffix) = name.strip_prefix(&prefix) {
                if let Ok(n) = suffix.parse::<u32>() {
                    highest = highest.max(n);
                }
            }
        }
    }
    let target = deposit_dir.join(format!("{}{}", prefix, highest + 1));
    let message = context.copy_file(&source, &target);
    if message.is_empty() {
        String::new()
    } else {
        format!("Copy model file to deposit failed for entry {}.", entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use wfm_common::{SessionStore, SiteConfig};

    fn context(
        archive: &tempfile::TempDir,
        deposit: &tempfile::TempDir,
        sessions: &tempfile::TempDir,
    ) -> TaskContext {
        let site = SiteConfig {
            site_id: "RCSB".to_string(),
            listen: String::new(),
            template_path: PathBuf::new(),
            session_path: sessions.path().to_path_buf(),
            status_db_path: PathBuf::new(),
            content_db_path: PathBuf::new(),
            archive_path: archive.path().to_path_buf(),
            deposit_path: deposit.path().to_path_buf(),
            workflow_xml_path: PathBuf::new(),
            urls: Default::default(),
            tools: Default::default(),
            ftp: Default::default(),
        };
        let session = SessionStore::create(sessions.path()).unwrap();
        TaskContext::new(Arc::new(site), session)
    }

    #[test]
    fn milestone_archive_copy() {
        let archive = tempfile::tempdir().unwrap();
        let deposit = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let ctx = context(&archive, &deposit, &sessions);

        let dir = archive.path().join("D_1000001");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("D_1000001_model_P1.cif.V2"), "model").unwrap();

        assert_eq!(archive_milestone(&ctx, "D_1000001"), "");
        assert!(dir.join("D_1000001_model-annotate_P1.cif.V1").exists());

        // A second milestone gets the next version
        assert_eq!(archive_milestone(&ctx, "D_1000001"), "");
        assert!(dir.join("D_1000001_model-annotate_P1.cif.V2").exists());
    }

    #[test]
    fn milestone_reset_copies_to_deposit() {
        let archive = tempfile::tempdir().unwrap();
        let deposit = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let ctx = context(&archive, &deposit, &sessions);

        let dir = archive.path().join("D_1000001");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("D_1000001_model_P1.cif.V1"), "model").unwrap();

        assert_eq!(reset_milestone(&ctx, "D_1000001"), "");
        assert!(deposit
            .path()
            .join("D_1000001")
            .join("D_1000001_model_P1.cif.V1")
            .exists());
    }

    #[test]
    fn missing_entry_yields_message() {
        let archive = tempfile::tempdir().unwrap();
        let deposit = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let ctx = context(&archive, &deposit, &sessions);
        let message = archive_milestone(&ctx, "D_404");
        assert!(message.contains("Can't find model file"));
        assert_eq!(archive_milestone(&ctx, ""), "No deposition ID defined.");
    }
}
