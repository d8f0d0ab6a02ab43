//! Layered configuration: built-in defaults → global `config.toml` →
//! project `.openclaw_memory.toml` → `OPENCLAW_<SECTION>_<FIELD>` env vars.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant ambient paths (not serialized).
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub privacy: PrivacyConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "local" (fastembed, default), "openai", or "ollama".
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Cache directory for local embedding models.
    #[serde(default = "default_embedding_cache_dir")]
    pub cache_dir: String,

    /// Per-call deadline in seconds before EmbeddingUnavailable is returned.
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Replaces the built-in default pattern list when non-empty.
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: usize,

    #[serde(default = "default_half_life")]
    pub recency_half_life_days: f64,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_file")]
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_true() -> bool {
    true
}
fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_embedding_dimension() -> usize {
    384
}
fn default_embedding_cache_dir() -> String {
    "~/.cache/openclaw-memory/embeddings".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_max_tokens() -> usize {
    1500
}
fn default_half_life() -> f64 {
    30.0
}
fn default_top_k() -> usize {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_file() -> String {
    "~/.local/state/openclaw-memory/logs/service.log".to_string()
}
fn default_port() -> u16 {
    31427
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            api_key: None,
            base_url: None,
            cache_dir: default_embedding_cache_dir(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            patterns: Vec::new(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: default_max_tokens(),
            recency_half_life_days: default_half_life(),
            default_top_k: default_top_k(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            port: default_port(),
            bind: default_bind(),
        }
    }
}

impl Config {
    /// Load merging built-in defaults, the global config file, an optional
    /// project-local override, and `OPENCLAW_*` environment variables.
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;

        let mut config = Self::load_global(&paths)?;

        if let Some(dir) = project_dir {
            let project_toml = dir.join(".openclaw_memory.toml");
            if project_toml.exists() {
                let content = fs::read_to_string(&project_toml)?;
                let overlay: Config = toml::from_str(&content)?;
                config.merge(overlay);
            }
        }

        config.apply_env_overrides();
        config.expand_env_vars();
        Ok(config)
    }

    fn load_global(paths: &Paths) -> Result<Self> {
        let path = paths.config_file();

        if !path.exists() {
            let config = Config {
                paths: paths.clone(),
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.paths = paths.clone();
        Ok(config)
    }

    /// Overlay non-default fields of `other` onto `self`. Since every field
    /// here has a meaningful default, the overlay replaces section-by-section
    /// rather than attempting field-level diffing.
    fn merge(&mut self, other: Config) {
        self.embedding = other.embedding;
        self.privacy = other.privacy;
        self.search = other.search;
        self.project = other.project;
        self.logging = other.logging;
        self.server = other.server;
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OPENCLAW_EMBEDDING_PROVIDER") {
            self.embedding.provider = v;
        }
        if let Ok(v) = std::env::var("OPENCLAW_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("OPENCLAW_EMBEDDING_DIMENSION")
            && let Ok(n) = v.parse()
        {
            self.embedding.dimension = n;
        }
        if let Ok(v) = std::env::var("OPENCLAW_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENCLAW_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("OPENCLAW_PRIVACY_ENABLED")
            && let Ok(b) = v.parse()
        {
            self.privacy.enabled = b;
        }
        if let Ok(v) = std::env::var("OPENCLAW_SEARCH_DEFAULT_MAX_TOKENS")
            && let Ok(n) = v.parse()
        {
            self.search.default_max_tokens = n;
        }
        if let Ok(v) = std::env::var("OPENCLAW_SEARCH_RECENCY_HALF_LIFE_DAYS")
            && let Ok(n) = v.parse()
        {
            self.search.recency_half_life_days = n;
        }
        if let Ok(v) = std::env::var("OPENCLAW_SEARCH_DEFAULT_TOP_K")
            && let Ok(n) = v.parse()
        {
            self.search.default_top_k = n;
        }
        if let Ok(v) = std::env::var("OPENCLAW_PROJECT_NAME") {
            self.project.name = Some(v);
        }
        if let Ok(v) = std::env::var("OPENCLAW_LOGGING_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("OPENCLAW_SERVER_PORT")
            && let Ok(n) = v.parse()
        {
            self.server.port = n;
        }
    }

    fn expand_env_vars(&mut self) {
        if let Some(ref key) = self.embedding.api_key {
            self.embedding.api_key = Some(expand_env(key));
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = self.paths.config_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn save_with_template(&self) -> Result<()> {
        let path = self.paths.config_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["embedding", "provider"] => Ok(self.embedding.provider.clone()),
            ["embedding", "model"] => Ok(self.embedding.model.clone()),
            ["embedding", "dimension"] => Ok(self.embedding.dimension.to_string()),
            ["privacy", "enabled"] => Ok(self.privacy.enabled.to_string()),
            ["search", "default_max_tokens"] => Ok(self.search.default_max_tokens.to_string()),
            ["search", "recency_half_life_days"] => {
                Ok(self.search.recency_half_life_days.to_string())
            }
            ["search", "default_top_k"] => Ok(self.search.default_top_k.to_string()),
            ["project", "name"] => Ok(self.project.name.clone().unwrap_or_default()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["server", "port"] => Ok(self.server.port.to_string()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["embedding", "provider"] => self.embedding.provider = value.to_string(),
            ["embedding", "model"] => self.embedding.model = value.to_string(),
            ["embedding", "dimension"] => self.embedding.dimension = value.parse()?,
            ["privacy", "enabled"] => self.privacy.enabled = value.parse()?,
            ["search", "default_max_tokens"] => self.search.default_max_tokens = value.parse()?,
            ["search", "recency_half_life_days"] => {
                self.search.recency_half_life_days = value.parse()?
            }
            ["search", "default_top_k"] => self.search.default_top_k = value.parse()?,
            ["project", "name"] => self.project.name = Some(value.to_string()),
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["server", "port"] => self.server.port = value.parse()?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }
}

fn expand_env(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else if let Some(var_name) = s.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# OpenClaw Memory configuration
# Auto-created on first run. Edit as needed.

[embedding]
# provider: "local" (fastembed, default, no network), "openai", "ollama"
provider = "local"
model = "all-MiniLM-L6-v2"
dimension = 384
# api_key = "${OPENAI_API_KEY}"
# base_url = "https://api.openai.com/v1"

[privacy]
enabled = true
# patterns = ["sk-[A-Za-z0-9]{20,}"]   # replaces the built-in defaults when set

[search]
default_max_tokens = 1500
recency_half_life_days = 30
default_top_k = 10

[project]
# name = "my-project"
# description = "..."

[server]
enabled = true
port = 31427
bind = "127.0.0.1"

[logging]
level = "info"
"#;
