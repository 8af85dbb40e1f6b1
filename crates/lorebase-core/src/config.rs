//! Configuration loading.
//!
//! A single YAML file names the knowledge bases and the engine settings.
//! Every field has a default so an empty file (or no file) is valid.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::model::KbType;
use crate::search::SearchMode;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// One knowledge base: a named filesystem tree of Markdown files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kb_type: KbType,
    #[serde(default)]
    pub read_only: bool,
}

/// Engine settings consumed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where the SQLite index lives
    pub index_path: PathBuf,
    /// Embedding model identifier (default `all-MiniLM-L6-v2`)
    pub embedding_model: String,
    /// Mode used when the caller does not name one
    pub search_mode: SearchMode,
    /// Query-expansion provider: `anthropic`, `openai`, or `stub`/`none`
    pub ai_provider: String,
    pub ai_model: String,
    pub ai_api_key: String,
    pub ai_api_base: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            embedding_model: crate::DEFAULT_EMBEDDING_MODEL.to_string(),
            search_mode: SearchMode::Keyword,
            ai_provider: "stub".to_string(),
            ai_model: String::new(),
            ai_api_key: String::new(),
            ai_api_base: String::new(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub knowledge_bases: Vec<KbConfig>,
    pub settings: Settings,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Look up a KB by name.
    pub fn get_kb(&self, name: &str) -> Option<&KbConfig> {
        self.knowledge_bases.iter().find(|kb| kb.name == name)
    }
}

/// Platform data directory fallback for the index file.
fn default_index_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("io", "lorebase", "lorebase") {
        return dirs.data_dir().join("index.db");
    }
    PathBuf::from("lorebase.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.embedding_model, "all-MiniLM-L6-v2");
        assert_eq!(settings.ai_provider, "stub");
        assert_eq!(settings.search_mode, SearchMode::Keyword);
    }

    #[test]
    fn parses_minimal_yaml() {
        let cfg: Config = serde_yaml::from_str(
            "knowledge_bases:\n  - name: research\n    path: /tmp/research\n    type: research\n",
        )
        .unwrap();
        assert_eq!(cfg.knowledge_bases.len(), 1);
        assert_eq!(cfg.knowledge_bases[0].kb_type, KbType::Research);
        assert!(!cfg.knowledge_bases[0].read_only);
        assert!(cfg.get_kb("research").is_some());
        assert!(cfg.get_kb("missing").is_none());
    }

    #[test]
    fn empty_yaml_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert!(cfg.knowledge_bases.is_empty());
        assert_eq!(cfg.settings.search_mode, SearchMode::Keyword);
    }

    #[test]
    fn read_only_flag_parses() {
        let cfg: Config = serde_yaml::from_str(
            "knowledge_bases:\n  - name: ro\n    path: /tmp/ro\n    type: events\n    read_only: true\n",
        )
        .unwrap();
        assert!(cfg.knowledge_bases[0].read_only);
    }
}
