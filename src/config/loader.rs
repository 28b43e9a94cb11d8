//! Configuration loader
//!
//! Loads `keywords.yaml` and the grammar files under `grammars/`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::KeywordConfig;

/// A grammar file found in the grammar directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarSource {
    /// DSL name, taken from the file stem
    pub dsl_name: String,
    pub path: PathBuf,
    pub source: String,
}

pub struct ConfigLoader {
    config_dir: String,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Create loader from KEYWORD_DSL_CONFIG_DIR env var or default to "config"
    pub fn from_env() -> Self {
        match std::env::var("KEYWORD_DSL_CONFIG_DIR") {
            Ok(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::new("config"),
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(&self.config_dir)
    }

    /// Load `keywords.yaml`, falling back to defaults when the file is absent
    pub fn load_config(&self) -> Result<KeywordConfig> {
        let path = Path::new(&self.config_dir).join("keywords.yaml");
        if !path.exists() {
            debug!("No {} found, using default configuration", path.display());
            return Ok(KeywordConfig::default());
        }

        info!("Loading keyword configuration from {}", path.display());
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        if content.trim().is_empty() {
            return Ok(KeywordConfig::default());
        }

        let config: KeywordConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        anyhow::ensure!(
            !config.dispatcher.command.trim().is_empty(),
            "{}: dispatcher.command must not be empty",
            path.display()
        );
        anyhow::ensure!(
            !config.grammar.path_separator.is_empty(),
            "{}: grammar.path_separator must not be empty",
            path.display()
        );

        Ok(config)
    }

    /// Load every grammar file in `grammars/`, sorted by file name
    pub fn load_grammars(&self, config: &KeywordConfig) -> Result<Vec<GrammarSource>> {
        let dir = Path::new(&self.config_dir).join("grammars");
        if !dir.is_dir() {
            debug!("No grammar directory at {}", dir.display());
            return Ok(Vec::new());
        }

        let extension = config.grammar.file_extension.trim_start_matches('.');
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?
        {
            let path = entry
                .with_context(|| format!("Failed to read entry in {}", dir.display()))?
                .path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension));
            if path.is_file() && matches {
                paths.push(path);
            }
        }
        paths.sort();

        let mut grammars = Vec::with_capacity(paths.len());
        for path in paths {
            grammars.push(Self::load_grammar_file(&path)?);
        }

        info!(
            "Loaded {} grammar file(s) from {}",
            grammars.len(),
            dir.display()
        );
        Ok(grammars)
    }

    /// Load a single grammar file; the DSL name is the file stem
    pub fn load_grammar_file(path: &Path) -> Result<GrammarSource> {
        let dsl_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .with_context(|| format!("Cannot derive a DSL name from {}", path.display()))?
            .to_string();

        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Ok(GrammarSource {
            dsl_name,
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path().to_string_lossy());
        assert_eq!(loader.load_config().unwrap(), KeywordConfig::default());
        assert!(loader
            .load_grammars(&KeywordConfig::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("keywords.yaml"),
            "dispatcher:\n  command: Use-Keyword\n",
        )
        .unwrap();

        let config = ConfigLoader::new(dir.path().to_string_lossy())
            .load_config()
            .unwrap();
        assert_eq!(config.dispatcher.command, "Use-Keyword");
        assert_eq!(config.output.produced_by_field, "ProducedByKeyword");
    }

    #[test]
    fn test_rejects_empty_dispatcher_command() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("keywords.yaml"),
            "dispatcher:\n  command: ''\n",
        )
        .unwrap();

        let err = ConfigLoader::new(dir.path().to_string_lossy())
            .load_config()
            .unwrap_err();
        assert!(err.to_string().contains("dispatcher.command"));
    }

    #[test]
    fn test_load_grammars_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let grammars = dir.path().join("grammars");
        fs::create_dir(&grammars).unwrap();
        fs::write(grammars.join("Pipeline.kwdsl"), "Stage { Int Retries }").unwrap();
        fs::write(grammars.join("Flow.kwdsl"), "Step { Item { String Text } }").unwrap();
        fs::write(grammars.join("notes.txt"), "ignored").unwrap();

        let loaded = ConfigLoader::new(dir.path().to_string_lossy())
            .load_grammars(&KeywordConfig::default())
            .unwrap();

        let names: Vec<_> = loaded.iter().map(|g| g.dsl_name.as_str()).collect();
        assert_eq!(names, vec!["Flow", "Pipeline"]);
        assert_eq!(loaded[1].source, "Stage { Int Retries }");
    }
}
