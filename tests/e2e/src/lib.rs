//! Shared fixtures for the end-to-end tests.

use std::path::Path;

use lorebase_core::{Config, KbConfig, KbType, Settings, Store};

/// Write a Markdown file under the KB root, creating parents.
pub fn write_md(kb_root: &Path, rel: &str, content: &str) {
    let path = kb_root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(path, content).expect("write markdown fixture");
}

/// A config with one research KB rooted in `dir/research` and the index at
/// `dir/index.db`.
pub fn research_config(dir: &Path) -> Config {
    let kb_path = dir.join("research");
    std::fs::create_dir_all(&kb_path).expect("create kb root");
    Config {
        knowledge_bases: vec![KbConfig {
            name: "research".to_string(),
            path: kb_path,
            kb_type: KbType::Research,
            read_only: false,
        }],
        settings: Settings {
            index_path: dir.join("index.db"),
            ..Settings::default()
        },
    }
}

/// Open the store for a config.
pub fn open_store(config: &Config) -> Store {
    Store::open(&config.settings.index_path).expect("open store")
}

/// A 384-dim unit vector with a single hot component. Cosine distance
/// between different hot components is exactly 1.0.
pub fn unit_vector(hot: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; lorebase_core::EMBEDDING_DIMENSIONS];
    v[hot % lorebase_core::EMBEDDING_DIMENSIONS] = 1.0;
    v
}
