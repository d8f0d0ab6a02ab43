//! The two memory scopes: global (cross-project user memory) and project
//! (per-repository working memory). Each owns an independent root directory
//! and, in turn, an independent [`crate::memory::store::Store`].

use std::fmt;
use std::path::{Path, PathBuf};

use crate::paths::Paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Project,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Project => write!(f, "project"),
        }
    }
}

impl Scope {
    /// Root directory for this scope.
    pub fn root(&self, paths: &Paths, project_dir: &Path) -> PathBuf {
        match self {
            Scope::Global => paths.global_memory_root.clone(),
            Scope::Project => paths.project_memory_root(project_dir),
        }
    }

    /// The top-level parent directories this scope is expected to hold.
    /// Used by the Indexer to decide where to create new files and by the
    /// Retriever's `parent_dir` filters.
    pub fn top_level_dirs(&self) -> &'static [&'static str] {
        match self {
            Scope::Global => &["user"],
            Scope::Project => &["journal", "agent"],
        }
    }

    /// Which scope owns a chunk whose `parent_dir` is `parent_dir`. Used to
    /// route per-chunk operations (access-count bumps) back to the right
    /// Store without threading scope tags through the ranking pipeline.
    pub fn owning(parent_dir: &str) -> Scope {
        if parent_dir == "user" {
            Scope::Global
        } else {
            Scope::Project
        }
    }
}

/// A `scope_filter` as accepted by the Retriever's `search` entry point.
/// `journal`/`agent`/`user` map to a `parent_dir` restriction within the
/// scope(s) that carry that directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    Global,
    Project,
    ParentDir(&'static str),
    None,
}

impl ScopeFilter {
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(str::trim).map(str::to_lowercase).as_deref() {
            Some("global") => ScopeFilter::Global,
            Some("project") => ScopeFilter::Project,
            Some("journal") => ScopeFilter::ParentDir("journal"),
            Some("agent") => ScopeFilter::ParentDir("agent"),
            Some("user") => ScopeFilter::ParentDir("user"),
            _ => ScopeFilter::None,
        }
    }

    /// Which scopes this filter admits.
    pub fn scopes(&self) -> Vec<Scope> {
        match self {
            ScopeFilter::Global => vec![Scope::Global],
            ScopeFilter::Project => vec![Scope::Project],
            ScopeFilter::ParentDir("user") => vec![Scope::Global],
            ScopeFilter::ParentDir(_) => vec![Scope::Project],
            ScopeFilter::None => vec![Scope::Global, Scope::Project],
        }
    }

    /// `parent_dir` restriction to push down to the Store, if any.
    pub fn parent_dir(&self) -> Option<&'static str> {
        match self {
            ScopeFilter::ParentDir(d) => Some(d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_filter_parses_known_values() {
        assert_eq!(ScopeFilter::parse(Some("journal")).parent_dir(), Some("journal"));
        assert_eq!(ScopeFilter::parse(Some("global")).scopes(), vec![Scope::Global]);
        assert_eq!(ScopeFilter::parse(None).scopes(), vec![Scope::Global, Scope::Project]);
    }

    #[test]
    fn scope_roots_differ() {
        let paths = Paths::default();
        let project_dir = Path::new("/tmp/some-project");
        assert_ne!(
            Scope::Global.root(&paths, project_dir),
            Scope::Project.root(&paths, project_dir)
        );
    }
}
