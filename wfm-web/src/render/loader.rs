//! Page-group configuration loading with session-scoped caching
//!
//! A configuration file is parsed at most once per session: when the session
//! store already holds the parsed schema the cached copy is returned without
//! consulting the source file. Presence is the only freshness signal; editing
//! a configuration file therefore requires a new session.

use std::path::PathBuf;
use wfm_common::{Error, Result, SessionStore};

use crate::render::cif;
use crate::render::schema::ConfigSchema;

/// Loads and caches page-group configuration schemas
pub struct ConfigLoader {
    template_path: PathBuf,
    store: SessionStore,
}

impl ConfigLoader {
    pub fn new(template_path: PathBuf, store: SessionStore) -> Self {
        Self {
            template_path,
            store,
        }
    }

    /// Load the schema for a configuration file (e.g. `level1_config.cif`)
    pub fn load(&self, config_file: &str) -> Result<ConfigSchema> {
        let cache_key = cache_key(config_file);
        if let Some(schema) = self.store.load::<ConfigSchema>(&cache_key)? {
            return Ok(schema);
        }

        let path = self.template_path.join(config_file);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let data = cif::parse(&text)?;
        let schema = ConfigSchema::from_cif(&data)?;

        self.store.save(&cache_key, &schema)?;
        Ok(schema)
    }
}

fn cache_key(config_file: &str) -> String {
    let stem = config_file
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(config_file);
    format!("config_{}", stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "data_x\nloop_\n_page_template.id\n_page_template.type\n_page_template.page\ngreeting_tmplt inline 'Hello %(user_name)s'\n";

    #[test]
    fn parse_once_then_serve_from_cache() {
        let template_dir = tempfile::tempdir().unwrap();
        let session_root = tempfile::tempdir().unwrap();
        let config_path = template_dir.path().join("level1_config.cif");
        std::fs::write(&config_path, CONFIG).unwrap();

        let store = SessionStore::create(session_root.path()).unwrap();
        let loader = ConfigLoader::new(template_dir.path().to_path_buf(), store);

        let schema = loader.load("level1_config.cif").unwrap();
        assert!(schema.page_template.contains_key("greeting_tmplt"));

        // Source edits are invisible within the session: the cached parse wins
        std::fs::write(&config_path, "data_x\n").unwrap();
        let cached = loader.load("level1_config.cif").unwrap();
        assert!(cached.page_template.contains_key("greeting_tmplt"));
    }

    #[test]
    fn malformed_source_is_fatal() {
        let template_dir = tempfile::tempdir().unwrap();
        let session_root = tempfile::tempdir().unwrap();
        std::fs::write(
            template_dir.path().join("bad_config.cif"),
            "loop_\n_t.a\nx y\n",
        )
        .unwrap();

        let store = SessionStore::create(session_root.path()).unwrap();
        let loader = ConfigLoader::new(template_dir.path().to_path_buf(), store);
        assert!(loader.load("bad_config.cif").is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let template_dir = tempfile::tempdir().unwrap();
        let session_root = tempfile::tempdir().unwrap();
        let store = SessionStore::create(session_root.path()).unwrap();
        let loader = ConfigLoader::new(template_dir.path().to_path_buf(), store);
        assert!(matches!(
            loader.load("absent_config.cif"),
            Err(Error::Config(_))
        ));
    }
}
