//! Workflow manager task runners
//!
//! Each task validates its input file, shells out to an external
//! command-line tool, captures the tool's log output, and reports a
//! per-entry message. An empty message is success; a non-empty message is a
//! user-facing failure description. Multi-entry tasks fan out over a worker
//! pool sized to half the available CPU cores.

pub mod cif_checker;
pub mod ligand_finder;
pub mod metadata_merger;
pub mod milestone;
pub mod pdb_generator;
pub mod sequence_merger;
pub mod status_updater;

pub use cif_checker::CifChecker;
pub use ligand_finder::LigandFinder;
pub use metadata_merger::MetaDataMerger;
pub use pdb_generator::PdbFileGenerator;
pub use sequence_merger::SequenceMerger;
pub use status_updater::StatusUpdater;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use wfm_common::{SessionStore, SiteConfig};

/// Archive file version selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// Highest existing version
    Latest,
    /// One past the highest existing version
    Next,
    /// A specific version number
    Number(u32),
}

/// Shared context for task runners: session paths, site configuration, and
/// archive file resolution
#[derive(Clone)]
pub struct TaskContext {
    site: Arc<SiteConfig>,
    session: SessionStore,
}

impl TaskContext {
    pub fn new(site: Arc<SiteConfig>, session: SessionStore) -> Self {
        Self { site, session }
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn session_path(&self, file: &str) -> PathBuf {
        self.session.dir().join(file)
    }

    /// Archive file path for an entry: `<archive>/<entry>/<entry>_<type>_P1.<ext>.V<n>`
    ///
    /// `Latest` resolves to the highest version on disk (`None` when the
    /// entry has no such file); `Next` always yields a path one past it.
    pub fn archive_file(
        &self,
        entry_id: &str,
        content_type: &str,
        format_ext: &str,
        version: Version,
    ) -> Option<PathBuf> {
        let dir = self.site.archive_path.join(entry_id);
        let prefix = format!("{}_{}_P1.{}.V", entry_id, content_type, format_ext);

        match version {
            Version::Number(n) => Some(dir.join(format!("{}{}", prefix, n))),
            Version::Latest | Version::Next => {
                let mut highest = 0u32;
                if let Ok(entries) = std::fs::read_dir(&dir) {
                    for entry in entries.flatten() {
                        let name = entry.file_name().to_string_lossy().into_owned();
                        if let Some(suffix) = name.strip_prefix(&prefix) {
                            if let Ok(n) = suffix.parse::<u32>() {
                                highest = highest.max(n);
                            }
                        }
                    }
                }
                match version {
                    Version::Latest if highest == 0 => None,
                    Version::Latest => Some(dir.join(format!("{}{}", prefix, highest))),
                    _ => Some(dir.join(format!("{}{}", prefix, highest + 1))),
                }
            }
        }
    }

    /// Latest archive file, with the two-valued message convention
    pub fn existing_archive_file(
        &self,
        entry_id: &str,
        content_type: &str,
        format_ext: &str,
    ) -> std::result::Result<PathBuf, String> {
        match self.archive_file(entry_id, content_type, format_ext, Version::Latest) {
            Some(path) if path.exists() => Ok(path),
            Some(path) => Err(format!("File {} does not exist.", path.display())),
            None => Err(format!(
                "Can not find latest {} {} file.",
                content_type, format_ext
            )),
        }
    }

    /// Copy a file and verify the target, empty message on success
    pub fn copy_file(&self, source: &Path, target: &Path) -> String {
        if source.as_os_str().is_empty() {
            return "Copying file: No source file defined.".to_string();
        }
        if target.as_os_str().is_empty() {
            return "Copying file: No target file defined.".to_string();
        }
        if !source.exists() {
            return format!("File '{}' not found.", source.display());
        }
        if let Some(parent) = target.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::copy(source, target) {
            Ok(_) if target.exists() => String::new(),
            _ => format!(
                "copying '{}' to '{}' failed.",
                source.display(),
                target.display()
            ),
        }
    }

    pub fn remove_file(&self, path: &Path) {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Run an external tool in the session directory, command output to
    /// `clog_file`; a missing tool or failed spawn is a failure message
    pub async fn run_tool(&self, program: &Path, args: &[&str], clog_file: &str) -> String {
        if !program.exists() {
            return format!("Tool {} not found.", program.display());
        }
        let clog = std::fs::File::create(self.session_path(clog_file));
        let (stdout, stderr) = match clog {
            Ok(file) => {
                let err = file.try_clone().map(Stdio::from).unwrap_or_else(|_| Stdio::null());
                (Stdio::from(file), err)
            }
            Err(_) => (Stdio::null(), Stdio::null()),
        };

        debug!(program = %program.display(), ?args, "running task tool");
        let status = Command::new(program)
            .args(args)
            .current_dir(self.session.dir())
            .env("RCSBROOT", &self.site.tools.annot_bin_path)
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .await;
        match status {
            Ok(_) => String::new(),
            Err(e) => {
                warn!("Tool {} failed to run: {}", program.display(), e);
                format!("Running {} failed.", program.display())
            }
        }
    }

    /// Log file content with blank lines and the completion sentinel removed
    pub fn log_message(&self, log_file: &str) -> String {
        let path = self.session_path(log_file);
        let Ok(data) = std::fs::read_to_string(&path) else {
            return String::new();
        };
        data.lines()
            .filter(|line| !line.is_empty() && *line != "Finished!")
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Fan a per-entry worker out over half the CPU cores
///
/// Results are returned in the original entry order as
/// `(entry_id, message)` pairs, empty message meaning success.
pub async fn run_entries<F, Fut>(entries: &[String], worker: F) -> Vec<(String, String)>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = String> + Send + 'static,
{
    let workers = std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1);
    let semaphore = Arc::new(Semaphore::new(workers));

    let mut join_set = JoinSet::new();
    for (index, entry_id) in entries.iter().enumerate() {
        let permit_source = semaphore.clone();
        let entry = entry_id.clone();
        let future = worker(entry.clone());
        join_set.spawn(async move {
            let _permit = permit_source.acquire_owned().await;
            (index, entry, future.await)
        });
    }

    let mut results: Vec<(usize, String, String)> = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!("Task worker panicked: {}", e),
        }
    }
    results.sort_by_key(|(index, _, _)| *index);
    results
        .into_iter()
        .map(|(_, entry, message)| (entry, message))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn context() -> (TaskContext, tempfile::TempDir, tempfile::TempDir) {
        let archive = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let site = SiteConfig {
            site_id: "RCSB".to_string(),
            listen: String::new(),
            template_path: PathBuf::new(),
            session_path: sessions.path().to_path_buf(),
            status_db_path: PathBuf::new(),
            content_db_path: PathBuf::new(),
            archive_path: archive.path().to_path_buf(),
            deposit_path: PathBuf::new(),
            workflow_xml_path: PathBuf::new(),
            urls: Default::default(),
            tools: Default::default(),
            ftp: Default::default(),
        };
        let session = SessionStore::create(sessions.path()).unwrap();
        (
            TaskContext::new(Arc::new(site), session),
            archive,
            sessions,
        )
    }

    #[test]
    fn archive_version_resolution() {
        let (ctx, archive, _sessions) = context();
        let dir = archive.path().join("D_1000001");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("D_1000001_model_P1.cif.V1"), "one").unwrap();
        std::fs::write(dir.join("D_1000001_model_P1.cif.V3"), "three").unwrap();

        let latest = ctx
            .archive_file("D_1000001", "model", "cif", Version::Latest)
            .unwrap();
        assert!(latest.ends_with("D_1000001_model_P1.cif.V3"));

        let next = ctx
            .archive_file("D_1000001", "model", "cif", Version::Next)
            .unwrap();
        assert!(next.ends_with("D_1000001_model_P1.cif.V4"));

        assert!(ctx
            .archive_file("D_9999999", "model", "cif", Version::Latest)
            .is_none());
    }

    #[test]
    fn missing_archive_file_yields_message() {
        let (ctx, _archive, _sessions) = context();
        let err = ctx
            .existing_archive_file("D_1000001", "model", "cif")
            .unwrap_err();
        assert!(err.contains("model"));
    }

    #[test]
    fn copy_file_verifies_target() {
        let (ctx, archive, _sessions) = context();
        let source = archive.path().join("a.txt");
        std::fs::write(&source, "data").unwrap();
        let target = archive.path().join("b.txt");
        assert_eq!(ctx.copy_file(&source, &target), "");
        assert!(target.exists());

        let missing = ctx.copy_file(Path::new("/nonexistent/file"), &target);
        assert!(missing.contains("not found"));
    }

    #[test]
    fn log_message_filters_sentinel() {
        let (ctx, _archive, _sessions) = context();
        std::fs::write(
            ctx.session_path("check.log"),
            "line one\n\nFinished!\nline two\n",
        )
        .unwrap();
        assert_eq!(ctx.log_message("check.log"), "line one\nline two");
        assert_eq!(ctx.log_message("absent.log"), "");
    }

    #[tokio::test]
    async fn fan_out_preserves_entry_order() {
        let entries = vec![
            "D_1".to_string(),
            "D_2".to_string(),
            "D_3".to_string(),
        ];
        let results = run_entries(&entries, |entry| async move {
            if entry == "D_2" {
                "failed".to_string()
            } else {
                String::new()
            }
        })
        .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], ("D_1".to_string(), String::new()));
        assert_eq!(results[1], ("D_2".to_string(), "failed".to_string()));
        assert_eq!(results[2], ("D_3".to_string(), String::new()));
    }
}
