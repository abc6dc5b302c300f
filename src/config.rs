use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StrataConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    pub session: SessionConfig,
    pub short_term: ShortTermConfig,
    pub long_term: LongTermConfig,
    pub lifecycle: LifecycleConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub global_root: String,
    /// Directory created inside a detected project root to hold project memories.
    pub project_dir: String,
    /// File or directory names that mark a project root.
    pub project_markers: Vec<String>,
    pub max_title_len: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub keyword_top_k: usize,
    pub vector_top_k: usize,
    pub min_similarity: f64,
    pub half_life_days: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    pub total_tokens: usize,
    pub core_ratio: f64,
    pub session_ratio: f64,
    pub short_term_ratio: f64,
    pub long_term_ratio: f64,
    pub reserved_ratio: f64,
    pub core_limit_tokens: usize,
    pub session_warn_ratio: f64,
    pub session_critical_ratio: f64,
    /// Long-term memories at or above this importance seed a new session.
    pub high_importance: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub max_tokens: usize,
    pub high_water_ratio: f64,
    pub protected_turns: usize,
    pub summary_ttl_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ShortTermConfig {
    pub task_ttl_hours: i64,
    pub note_ttl_hours: i64,
    pub context_ttl_hours: i64,
    pub promotion_threshold: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LongTermConfig {
    pub inactive_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LifecycleConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassifierConfig {
    pub min_length: usize,
    pub max_title_len: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let global_root = default_strata_dir().to_string_lossy().into_owned();
        Self {
            global_root,
            project_dir: ".strata".into(),
            project_markers: [
                ".git",
                ".hg",
                ".svn",
                "Cargo.toml",
                "package.json",
                "go.mod",
                "pyproject.toml",
                "pom.xml",
                "build.gradle",
                "Makefile",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            max_title_len: 40,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dimension: 384,
            batch_size: 16,
            max_attempts: 3,
            retry_base_ms: 200,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            keyword_top_k: 20,
            vector_top_k: 20,
            min_similarity: 0.3,
            half_life_days: 30.0,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            total_tokens: 8000,
            core_ratio: 0.15,
            session_ratio: 0.35,
            short_term_ratio: 0.15,
            long_term_ratio: 0.25,
            reserved_ratio: 0.10,
            core_limit_tokens: 1500,
            session_warn_ratio: 0.70,
            session_critical_ratio: 0.85,
            high_importance: 4,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_tokens: 32000,
            high_water_ratio: 0.85,
            protected_turns: 6,
            summary_ttl_hours: 24,
        }
    }
}

impl Default for ShortTermConfig {
    fn default() -> Self {
        Self {
            task_ttl_hours: 168,
            note_ttl_hours: 72,
            context_ttl_hours: 24,
            promotion_threshold: 5,
        }
    }
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self { inactive_days: 90 }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_length: 6,
            max_title_len: 50,
        }
    }
}

/// Returns `~/.strata/`, or `./.strata` when no home directory is known.
pub fn default_strata_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".strata")
}

/// Returns the default config file path: `~/.strata/config.toml`
pub fn default_config_path() -> PathBuf {
    default_strata_dir().join("config.toml")
}

impl StrataConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            StrataConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (STRATA_HOME, STRATA_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("STRATA_HOME") {
            self.storage.global_root = val;
        }
        if let Ok(val) = std::env::var("STRATA_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Resolve the global memory root, expanding `~` if needed.
    pub fn resolved_global_root(&self) -> PathBuf {
        expand_tilde(&self.storage.global_root)
    }

    /// Config for a throwaway root, used by tests and embedders.
    pub fn with_global_root(root: impl AsRef<Path>) -> Self {
        let mut config = Self::default();
        config.storage.global_root = root.as_ref().to_string_lossy().into_owned();
        config
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
