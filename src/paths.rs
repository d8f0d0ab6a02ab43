//! XDG Base Directory Specification compliant path resolution.
//!
//! Every ambient directory (config/state/cache) is resolved through a
//! three-level fallback:
//! 1. OpenClaw-specific env var (OPENCLAW_CONFIG_DIR, etc.)
//! 2. XDG env var (XDG_CONFIG_HOME, etc.) via `etcetera`
//! 3. Platform default (~/.config, etc.)
//!
//! The two memory scope roots (global, project) are resolved separately:
//! global defaults to `~/.openclaw_memory`, project defaults to
//! `<project>/.openclaw_memory` relative to a caller-supplied project dir.

use anyhow::{Context, Result};
#[cfg(unix)]
use libc::getuid;
use std::path::{Path, PathBuf};

/// Resolved directory paths for the ambient (non-memory) application state.
///
/// Created once at startup, threaded through `Config`. All paths are absolute.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Config directory: config.toml lives here.
    pub config_dir: PathBuf,

    /// Data directory root.
    pub data_dir: PathBuf,

    /// State directory: logs, audit trail.
    pub state_dir: PathBuf,

    /// Cache directory: embedding model cache.
    pub cache_dir: PathBuf,

    /// Runtime directory: PID file, sockets. None if unavailable.
    pub runtime_dir: Option<PathBuf>,

    /// Global memory scope root. Independently overridable via
    /// OPENCLAW_GLOBAL_MEMORY_DIR.
    pub global_memory_root: PathBuf,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = env_or(&env_fn, "OPENCLAW_CONFIG_DIR", || {
            strategy.config_dir().join("openclaw-memory")
        });

        let data_dir = env_or(&env_fn, "OPENCLAW_DATA_DIR", || {
            strategy.data_dir().join("openclaw-memory")
        });

        let state_dir = env_or(&env_fn, "OPENCLAW_STATE_DIR", || {
            let base_state = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
            base_state.join("openclaw-memory")
        });

        let cache_dir = env_or(&env_fn, "OPENCLAW_CACHE_DIR", || {
            strategy.cache_dir().join("openclaw-memory")
        });

        let global_memory_root = resolve_global_memory_root(&env_fn);
        let runtime_dir = resolve_runtime_dir(&env_fn);

        Ok(Self {
            config_dir,
            data_dir,
            state_dir,
            cache_dir,
            runtime_dir,
            global_memory_root,
        })
    }

    /// Config file: config_dir/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Logs directory: state_dir/logs
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Embedding model cache directory: cache_dir/embeddings
    pub fn embedding_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("embeddings")
    }

    /// Project scope root for a given project directory:
    /// `<project_dir>/.openclaw_memory`, unless overridden via
    /// OPENCLAW_PROJECT_MEMORY_DIR.
    pub fn project_memory_root(&self, project_dir: &Path) -> PathBuf {
        if let Ok(dir) = std::env::var("OPENCLAW_PROJECT_MEMORY_DIR") {
            let trimmed = dir.trim();
            if !trimmed.is_empty() {
                let expanded = shellexpand::tilde(trimmed);
                let path = PathBuf::from(expanded.to_string());
                if path.is_absolute() {
                    return path;
                }
            }
        }
        project_dir.join(".openclaw_memory")
    }

    /// Create all ambient directories with appropriate permissions.
    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [&self.config_dir, &self.data_dir, &self.state_dir, &self.cache_dir];

        for dir in &dirs {
            create_dir_with_mode(dir)?;
        }

        if let Some(ref runtime) = self.runtime_dir {
            create_dir_with_mode(runtime)?;
        }

        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| {
            let home = etcetera::home_dir().unwrap_or_else(|_| PathBuf::from("."));
            Self {
                config_dir: home.join(".config").join("openclaw-memory"),
                data_dir: home.join(".local").join("share").join("openclaw-memory"),
                state_dir: home.join(".local").join("state").join("openclaw-memory"),
                cache_dir: home.join(".cache").join("openclaw-memory"),
                runtime_dir: None,
                global_memory_root: home.join(".openclaw_memory"),
            }
        })
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths per XDG spec.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(default)
}

/// Resolve the global memory scope root: OPENCLAW_GLOBAL_MEMORY_DIR, else
/// `~/.openclaw_memory`.
fn resolve_global_memory_root<F>(env_fn: &F) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    if let Ok(dir) = env_fn("OPENCLAW_GLOBAL_MEMORY_DIR") {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            let expanded = shellexpand::tilde(trimmed);
            let path = PathBuf::from(expanded.to_string());
            if path.is_absolute() {
                return path;
            }
        }
    }

    let home = etcetera::home_dir().unwrap_or_else(|_| PathBuf::from("."));
    home.join(".openclaw_memory")
}

/// Resolve runtime directory.
fn resolve_runtime_dir<F>(env_fn: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    if let Ok(dir) = env_fn("XDG_RUNTIME_DIR")
        && !dir.is_empty()
    {
        let path = PathBuf::from(&dir);
        if path.is_absolute() {
            return Some(path.join("openclaw-memory"));
        }
    }

    #[cfg(unix)]
    {
        let uid = unsafe { getuid() };
        let tmpdir = env_fn("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
        Some(PathBuf::from(tmpdir).join(format!("openclaw-memory-{}", uid)))
    }

    #[cfg(not(unix))]
    {
        env_fn("TEMP").ok().map(|t| {
            let user = env_fn("USERNAME").unwrap_or_else(|_| "user".into());
            PathBuf::from(t).join(format!("openclaw-memory-{}", user))
        })
    }
}

/// Create a directory with mode 0700 per XDG spec.
fn create_dir_with_mode(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_env(
        map: HashMap<&str, &str>,
    ) -> impl Fn(&str) -> std::result::Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn default_paths_are_xdg_compliant() {
        let env: HashMap<&str, &str> = HashMap::new();
        let paths = Paths::resolve_with_env(make_env(env)).unwrap();

        assert!(paths.config_dir.ends_with("openclaw-memory"));
        assert!(paths.data_dir.ends_with("openclaw-memory"));
        assert!(paths.state_dir.ends_with("openclaw-memory"));
        assert!(paths.cache_dir.ends_with("openclaw-memory"));
        assert!(paths.global_memory_root.ends_with(".openclaw_memory"));
    }

    #[test]
    fn env_vars_override_xdg() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("OPENCLAW_CONFIG_DIR", "/custom/config");
        env.insert("OPENCLAW_DATA_DIR", "/custom/data");
        env.insert("OPENCLAW_STATE_DIR", "/custom/state");
        env.insert("OPENCLAW_CACHE_DIR", "/custom/cache");
        env.insert("OPENCLAW_GLOBAL_MEMORY_DIR", "/custom/mem");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/custom/config"));
        assert_eq!(paths.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(paths.state_dir, PathBuf::from("/custom/state"));
        assert_eq!(paths.cache_dir, PathBuf::from("/custom/cache"));
        assert_eq!(paths.global_memory_root, PathBuf::from("/custom/mem"));
    }

    #[test]
    fn relative_paths_are_ignored() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("OPENCLAW_CONFIG_DIR", "relative/path");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert!(paths.config_dir.is_absolute());
        assert_ne!(paths.config_dir, PathBuf::from("relative/path"));
    }

    #[test]
    fn project_memory_root_is_relative_to_project_dir() {
        let env: HashMap<&str, &str> = HashMap::new();
        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        let project = Path::new("/home/user/repo");
        assert_eq!(
            paths.project_memory_root(project),
            PathBuf::from("/home/user/repo/.openclaw_memory")
        );
    }

    #[test]
    fn empty_env_vars_ignored() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("OPENCLAW_CONFIG_DIR", "");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert!(paths.config_dir.is_absolute());
        assert!(paths.config_dir.ends_with("openclaw-memory"));
    }
}
