use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration, resolved once per invocation and threaded
/// through the indexer and searcher. Provider selection is the only place
/// that still inspects the environment (for `OPENAI_API_KEY`).
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub memory: MemoryConfig,
    pub db: DbConfig,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
}

/// Location of the markdown memory corpus.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub root: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./memory"),
        }
    }
}

impl MemoryConfig {
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.root.join("plans")
    }
}

/// Relational SQLite database location.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./db/memstack.sqlite"),
        }
    }
}

/// Vector store backend settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VectorConfig {
    /// `sqlite` (embedded) or `qdrant` (client/server).
    pub backend: String,
    /// Directory holding the embedded store and `metadata.json`.
    pub path: PathBuf,
    /// Qdrant base URL (client/server backend only).
    pub url: String,
    pub collection: String,
    /// Distance metric recorded at index build time: `cosine` or `l2`.
    pub metric: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: PathBuf::from("./memory/vectors"),
            url: "http://localhost:6333".to_string(),
            collection: "memstack_sessions".to_string(),
            metric: "cosine".to_string(),
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `auto` tries OpenAI then local; `openai`, `local`, or `mock` pin the
    /// chain to a single candidate.
    pub provider: String,
    /// OpenAI model name.
    pub model: String,
    /// Local fastembed model name.
    pub local_model: String,
    /// Texts per embedding call.
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "auto".to_string(),
            model: "text-embedding-3-small".to_string(),
            local_model: "all-minilm-l6-v2".to_string(),
            batch_size: 50,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

/// Load configuration from a TOML file. A missing file is not an error:
/// the defaults describe the conventional `./memory` + `./db` layout.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.vector.backend.as_str() {
        "sqlite" | "qdrant" => {}
        other => anyhow::bail!(
            "Unknown vector backend: '{}'. Must be sqlite or qdrant.",
            other
        ),
    }

    match config.vector.metric.as_str() {
        "cosine" | "l2" => {}
        other => anyhow::bail!("Unknown metric: '{}'. Must be cosine or l2.", other),
    }

    match config.embedding.provider.as_str() {
        "auto" | "openai" | "local" | "mock" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be auto, openai, local, or mock.",
            other
        ),
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/memstack.toml")).unwrap();
        assert_eq!(config.vector.backend, "sqlite");
        assert_eq!(config.embedding.provider, "auto");
        assert_eq!(config.embedding.batch_size, 50);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("memstack.toml");
        std::fs::write(&path, "[embedding]\nprovider = \"mock\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.embedding.provider, "mock");
        assert_eq!(config.vector.collection, "memstack_sessions");
        assert_eq!(
            config.memory.sessions_dir(),
            PathBuf::from("./memory/sessions")
        );
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("memstack.toml");
        std::fs::write(&path, "[vector]\nbackend = \"lancedb\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_unknown_metric() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("memstack.toml");
        std::fs::write(&path, "[vector]\nmetric = \"dot\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
