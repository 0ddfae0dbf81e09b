//! Site configuration loading
//!
//! The site configuration is a TOML file resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `WFM_CONFIG` environment variable
//! 3. Compiled default path (`/etc/wfm/config.toml`)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default configuration file location when neither a CLI argument nor the
/// environment variable is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wfm/config.toml";

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "WFM_CONFIG";

/// Module base URLs for launching the interactive task editors
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleUrls {
    #[serde(default)]
    pub annotation_tasks: String,
    #[serde(default)]
    pub ligand_editor: String,
    #[serde(default)]
    pub sequence_editor: String,
    #[serde(default)]
    pub transformer_editor: String,
    #[serde(default)]
    pub validation_tasks: String,
}

/// External tool locations used by the task runners
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolPaths {
    /// Annotation tool suite bin directory (model update, format conversion)
    #[serde(default)]
    pub annot_bin_path: PathBuf,
    /// Dictionary tool bin directory (CifCheck)
    #[serde(default)]
    pub dict_bin_path: PathBuf,
    /// Dictionary sdb file path
    #[serde(default)]
    pub dict_sdb_path: PathBuf,
}

/// FTP upload enablement parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FtpSettings {
    #[serde(default)]
    pub storage_path: PathBuf,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub port_number: u16,
}

/// Site configuration for the workflow manager
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Site identifier (e.g. "RCSB", "PDBe", "PDBj")
    pub site_id: String,
    /// Listen address for the HTTP server
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Directory holding page-group configuration files and HTML templates
    pub template_path: PathBuf,
    /// Root directory for per-session cache stores
    pub session_path: PathBuf,
    /// SQLite database file for the status database
    pub status_db_path: PathBuf,
    /// SQLite database file for the content database
    pub content_db_path: PathBuf,
    /// Archive storage root (per-entry milestone and model files)
    pub archive_path: PathBuf,
    /// Deposit storage root (per-entry upload/submit marker files)
    #[serde(default)]
    pub deposit_path: PathBuf,
    /// Workflow definition XML directory
    pub workflow_xml_path: PathBuf,
    #[serde(default)]
    pub urls: ModuleUrls,
    #[serde(default)]
    pub tools: ToolPaths,
    #[serde(default)]
    pub ftp: FtpSettings,
}

fn default_listen() -> String {
    "127.0.0.1:5780".to_string()
}

impl SiteConfig {
    /// Load configuration, resolving the file path in priority order
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        let path = if let Some(path) = cli_arg {
            path.to_path_buf()
        } else if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            PathBuf::from(path)
        } else {
            PathBuf::from(DEFAULT_CONFIG_PATH)
        };

        Self::load(&path)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }

    /// Base URL for a workflow module class id, empty when unknown
    pub fn module_url(&self, class_id: &str) -> &str {
        match class_id {
            "AnnMod" | "AnnModUI" => &self.urls.annotation_tasks,
            "LigMod" | "LigModUI" => &self.urls.ligand_editor,
            "SeqMod" | "SeqModUI" => &self.urls.sequence_editor,
            "TransMod" | "TransModUI" => &self.urls.transformer_editor,
            "ValMod" | "ValModUI" => &self.urls.validation_tasks,
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
site_id = "RCSB"
template_path = "/data/wfm/templates"
session_path = "/data/wfm/sessions"
status_db_path = "/data/wfm/status.db"
content_db_path = "/data/wfm/content.db"
archive_path = "/data/archive"
workflow_xml_path = "/data/wfm/wf-defs"

[urls]
annotation_tasks = "http://localhost:8100/ann"
"#,
        )
        .unwrap();

        let config = SiteConfig::load(&path).unwrap();
        assert_eq!(config.site_id, "RCSB");
        assert_eq!(config.listen, "127.0.0.1:5780");
        assert_eq!(config.module_url("AnnModUI"), "http://localhost:8100/ann");
        assert_eq!(config.module_url("NoSuchMod"), "");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = SiteConfig::load(Path::new("/nonexistent/wfm.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
