//! `MemoryEngine`: the facade tying both scopes' Stores, the Writer, the
//! Retriever, the Indexer, and the embedding provider together behind the
//! six external verbs (`primer`, `search`, `log`, `session_end`,
//! `update_tasks`, `read`). Cloning an engine is cheap — every field is an
//! `Arc` or plain data — so a handle can be shared with the watcher task
//! and the stdio server loop alike.

pub mod chunk;
pub mod embeddings;
pub mod error;
pub mod indexer;
pub mod markdown;
pub mod retriever;
pub mod scope;
pub mod store;
pub mod watcher;
pub mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use crate::concurrency::ScopeLock;
use crate::config::Config;
use crate::primer;
use crate::session::{self, SessionEndRequest};
use crate::tasks::{self, TaskUpdate};

pub use error::MemoryError;

use chunk::Chunk;
use embeddings::EmbeddingProvider;
use indexer::Indexer;
use retriever::{Retriever, SearchResponse};
use scope::{Scope, ScopeFilter};
use store::Store;
use watcher::{WatchEvent, Watcher};
use writer::{CONFLICT_THRESHOLD, REINFORCE_THRESHOLD, Route, WriteOutcome};

/// A ready-to-run engine instance, constructed once per process (or once
/// per `(global_root, project_root)` pair in tests).
#[derive(Clone)]
pub struct MemoryEngine {
    config: Config,
    global_root: PathBuf,
    project_root: PathBuf,
    global_store: ScopeLock,
    project_store: ScopeLock,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    indexer: Option<Arc<Indexer>>,
    writer: Arc<writer::Writer>,
    retriever: Arc<Retriever>,
}

impl MemoryEngine {
    /// Open (creating if needed) both scopes' Stores under `config.paths`
    /// and `project_dir`, and build the embedding provider. A provider that
    /// fails to construct degrades the engine to FTS-only search and an
    /// embedding-unavailable `log`, rather than failing startup outright.
    pub fn open(config: Config, project_dir: &Path) -> anyhow::Result<Self> {
        let global_root = Scope::Global.root(&config.paths, project_dir);
        let project_root = Scope::Project.root(&config.paths, project_dir);
        for dir in Scope::Global.top_level_dirs() {
            std::fs::create_dir_all(global_root.join(dir))?;
        }
        for dir in Scope::Project.top_level_dirs() {
            std::fs::create_dir_all(project_root.join(dir))?;
        }

        let dimension = config.embedding.dimension;
        let global_store = ScopeLock::new(Store::open(&global_root.join("index.db"), dimension)?);
        let project_store = ScopeLock::new(Store::open(&project_root.join("index.db"), dimension)?);

        let embedder = match embeddings::build_provider(&config.embedding) {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!(error = %e, "embedding provider unavailable; running degraded (FTS-only search, writes rejected)");
                None
            }
        };
        let indexer = embedder.clone().map(|e| Arc::new(Indexer::new(e)));

        let writer = Arc::new(writer::Writer::new(&config.privacy));
        let retriever = Arc::new(Retriever::new(
            config.search.default_top_k,
            config.search.default_max_tokens,
            config.search.recency_half_life_days,
        ));

        Ok(Self {
            config,
            global_root,
            project_root,
            global_store,
            project_store,
            embedder,
            indexer,
            writer,
            retriever,
        })
    }

    fn store_for(&self, scope: Scope) -> &ScopeLock {
        match scope {
            Scope::Global => &self.global_store,
            Scope::Project => &self.project_store,
        }
    }

    fn root_for(&self, scope: Scope) -> &Path {
        match scope {
            Scope::Global => &self.global_root,
            Scope::Project => &self.project_root,
        }
    }

    /// Reindex the full on-disk tree for both scopes. Used at startup and by
    /// the `memory reindex` CLI subcommand.
    pub async fn reindex_all(&self) -> Result<(indexer::IndexAllStats, indexer::IndexAllStats), MemoryError> {
        let Some(indexer) = &self.indexer else {
            return Err(MemoryError::EmbeddingUnavailable(
                "no embedding provider configured".to_string(),
            ));
        };

        let mut global = self.global_store.lock().await;
        let global_stats = indexer.index_all(&mut global, &self.global_root).await?;
        drop(global);

        let mut project = self.project_store.lock().await;
        let project_stats = indexer.index_all(&mut project, &self.project_root).await?;
        drop(project);

        Ok((global_stats, project_stats))
    }

    /// Start a debounced filesystem watcher for each scope root. Returns the
    /// `Watcher` handles; dropping them stops watching. Events are dispatched
    /// to a spawned task holding a clone of this engine, so the caller only
    /// needs to keep the returned handles alive for the watchers to keep
    /// running.
    pub fn start_watchers(&self) -> anyhow::Result<Vec<Watcher>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Scope, WatchEvent)>();

        let global_tx = tx.clone();
        let (gtx, mut grx) = mpsc::unbounded_channel();
        let global_watcher = Watcher::spawn(&self.global_root, gtx)?;
        tokio::spawn(async move {
            while let Some(event) = grx.recv().await {
                let _ = global_tx.send((Scope::Global, event));
            }
        });

        let (ptx, mut prx) = mpsc::unbounded_channel();
        let project_watcher = Watcher::spawn(&self.project_root, ptx)?;
        tokio::spawn(async move {
            while let Some(event) = prx.recv().await {
                let _ = tx.send((Scope::Project, event));
            }
        });

        let engine = self.clone();
        tokio::spawn(async move {
            while let Some((scope, event)) = rx.recv().await {
                engine.handle_watch_event(scope, event).await;
            }
        });

        Ok(vec![global_watcher, project_watcher])
    }

    async fn handle_watch_event(&self, scope: Scope, event: WatchEvent) {
        let Some(indexer) = &self.indexer else {
            return;
        };
        let relative = match &event {
            WatchEvent::Changed(p) | WatchEvent::Removed(p) => p.clone(),
        };
        let root = self.root_for(scope).to_path_buf();
        let mut store = self.store_for(scope).lock().await;
        if let Err(e) = indexer.index_file(&mut store, &root, &relative).await {
            warn!(error = %e, uri = %relative, "watcher-triggered reindex failed; will retry on next event");
        }
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let Some(embedder) = &self.embedder else {
            return Err(MemoryError::EmbeddingUnavailable(
                "no embedding provider configured".to_string(),
            ));
        };
        let deadline = Duration::from_secs(self.config.embedding.timeout_secs);
        match tokio::time::timeout(deadline, embedder.embed(text)).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(MemoryError::EmbeddingUnavailable(e.to_string())),
            Err(_) => Err(MemoryError::EmbeddingUnavailable("embedding call timed out".to_string())),
        }
    }

    /// The `log` verb: quality gate, privacy gate, route, embed, then branch
    /// on the best existing candidate's similarity (reinforce / conflict
    /// replace / append), reindexing the touched file before returning.
    pub async fn log(&self, content: &str, type_hint: Option<&str>) -> Result<WriteOutcome, MemoryError> {
        if let Err(reason) = self.writer.quality_gate(content) {
            return Ok(WriteOutcome::Rejected { reason });
        }
        if let Err(reason) = self.writer.privacy_gate(content) {
            return Ok(WriteOutcome::Rejected { reason });
        }

        let route = self.writer.route(content, type_hint);
        let embedding = self.embed_single(content).await?;

        let Some(indexer) = self.indexer.clone() else {
            return Err(MemoryError::EmbeddingUnavailable(
                "no embedding provider configured".to_string(),
            ));
        };

        let lock = self.store_for(route.scope).clone();
        let root = self.root_for(route.scope).to_path_buf();
        let full_path = root.join(&route.target_file);
        let parent_dir = route.target_file.split('/').next().unwrap_or("");

        let mut store = lock.lock().await;
        let candidates = store.find_similar(&embedding, CONFLICT_THRESHOLD, Some(parent_dir))?;

        // Reinforce/conflict act on the matched candidate's own source file
        // (`best.uri`), which routinely differs from the route target — a
        // parent_dir like `user/` or `journal/` holds several files.
        let (outcome, touched_file) = if let Some((best, score)) = candidates.into_iter().next() {
            let candidate_path = root.join(&best.uri);
            if score >= REINFORCE_THRESHOLD {
                markdown::reinforce_file(&candidate_path)?;
                store.increment_reinforcement(&best.id)?;
                (
                    WriteOutcome::Reinforced {
                        path: best.uri.clone(),
                        score,
                    },
                    best.uri,
                )
            } else {
                self.apply_conflict_or_append(&candidate_path, &best, content)?;
                (
                    WriteOutcome::ConflictUpdated {
                        path: best.uri.clone(),
                        score,
                    },
                    best.uri,
                )
            }
        } else {
            self.append_new(&full_path, &route, content)?;
            (
                WriteOutcome::Appended {
                    path: route.target_file.clone(),
                    memory_type: route.memory_type.clone(),
                },
                route.target_file.clone(),
            )
        };

        indexer.index_file(&mut store, &root, &touched_file).await?;
        Ok(outcome)
    }

    fn apply_conflict_or_append(
        &self,
        path: &Path,
        candidate: &Chunk,
        new_content: &str,
    ) -> anyhow::Result<()> {
        if !markdown::replace_best_matching_bullet(path, &candidate.content, new_content)? {
            markdown::append_bullet(path, &candidate.section, new_content)?;
        }
        Ok(())
    }

    fn append_new(&self, path: &Path, route: &Route, content: &str) -> anyhow::Result<()> {
        markdown::ensure_file(
            path,
            markdown::Frontmatter::new(&route.memory_type, route.importance),
            &route.section,
        )?;
        markdown::append_bullet(path, &route.section, content)
    }

    /// The `search` verb: fast-path file shortcuts, then the journal
    /// timeline path, then hybrid (vector + FTS) search with RRF merge,
    /// salience ranking, and budget truncation.
    pub async fn search(
        &self,
        query: &str,
        scope_filter: Option<&str>,
        max_tokens: Option<usize>,
    ) -> Result<SearchResponse, MemoryError> {
        let filter = ScopeFilter::parse(scope_filter);
        let max_tokens = max_tokens.unwrap_or(self.retriever.default_max_tokens);

        if let Some((scope, path)) = self.retriever.fast_path_target(query)
            && filter.scopes().contains(&scope)
        {
            if let Some(result) = self.read_whole_file(scope, path).await {
                let token_count = result.token_count;
                return Ok(SearchResponse {
                    results: vec![result],
                    total_tokens: token_count,
                    budget_remaining: max_tokens as i64 - token_count as i64,
                    partial: false,
                });
            }
        }

        if self.retriever.is_timeline_query(query, filter) {
            return Ok(self.search_timeline(max_tokens).await);
        }

        self.search_hybrid(query, filter, max_tokens).await
    }

    async fn read_whole_file(&self, scope: Scope, relative: &str) -> Option<retriever::SearchResult> {
        let full_path = self.root_for(scope).join(relative);
        let content = tokio::fs::read_to_string(&full_path).await.ok()?;
        let token_count = chunk::token_count(&content);
        Some(retriever::SearchResult {
            id: relative.to_string(),
            uri: relative.to_string(),
            content,
            salience: 1.0,
            memory_type: "file".to_string(),
            section: "Whole file".to_string(),
            reinforcement: 0,
            token_count,
        })
    }

    async fn search_timeline(&self, max_tokens: usize) -> SearchResponse {
        let journal_dir = self.project_root.join("journal");
        let mut names: Vec<String> = match tokio::fs::read_dir(&journal_dir).await {
            Ok(mut entries) => {
                let mut out = Vec::new();
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if let Ok(name) = entry.file_name().into_string()
                        && name.ends_with(".md")
                    {
                        out.push(name);
                    }
                }
                out
            }
            Err(_) => Vec::new(),
        };
        retriever::sort_journal_filenames_desc(&mut names);

        let mut total = 0usize;
        let mut results = Vec::new();
        let mut partial = false;
        for name in names {
            let Ok(content) = tokio::fs::read_to_string(journal_dir.join(&name)).await else {
                continue;
            };
            let token_count = chunk::token_count(&content);
            if total + token_count > max_tokens {
                partial = true;
                break;
            }
            total += token_count;
            let uri = format!("journal/{name}");
            results.push(retriever::SearchResult {
                id: uri.clone(),
                uri,
                content,
                salience: 1.0,
                memory_type: "journal".to_string(),
                section: "Journal".to_string(),
                reinforcement: 0,
                token_count,
            });
        }

        SearchResponse {
            total_tokens: total,
            budget_remaining: max_tokens as i64 - total as i64,
            partial,
            results,
        }
    }

    async fn search_hybrid(
        &self,
        query: &str,
        filter: ScopeFilter,
        max_tokens: usize,
    ) -> Result<SearchResponse, MemoryError> {
        let top_k = self.retriever.default_top_k;
        let parent_dir = filter.parent_dir();

        let embedding = match self.embed_single(query).await {
            Ok(v) => Some(v),
            Err(_) => None,
        };
        let partial = embedding.is_none();

        let mut vector_hits = Vec::new();
        let mut fts_hits = Vec::new();
        for scope in filter.scopes() {
            let store = self.store_for(scope).lock().await;
            if let Some(vec) = &embedding {
                vector_hits.extend(store.vector_search(vec, top_k * 2, parent_dir)?);
            }
            fts_hits.extend(store.fts_search(query, top_k * 2, parent_dir)?);
        }
        vector_hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        vector_hits.truncate(top_k * 2);
        fts_hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        fts_hits.truncate(top_k * 2);

        let ranked = Retriever::rrf_merge(&vector_hits, &fts_hits);
        let scored = self.retriever.compute_salience(&ranked);
        let (results, total_tokens) = self.retriever.apply_budget(scored, max_tokens);

        let mut by_scope: std::collections::HashMap<Scope, Vec<String>> = std::collections::HashMap::new();
        for r in &results {
            let owning = Scope::owning(r.uri.split('/').next().unwrap_or(""));
            by_scope.entry(owning).or_default().push(r.id.clone());
        }
        for (scope, ids) in by_scope {
            let mut store = self.store_for(scope).lock().await;
            if let Err(e) = store.increment_access_counts(&ids) {
                warn!(error = %e, "failed to bump access counts");
            }
        }

        Ok(SearchResponse {
            total_tokens,
            budget_remaining: max_tokens as i64 - total_tokens as i64,
            partial,
            results,
        })
    }

    /// The `primer` verb: assemble and return `PRIMER.md`'s content (it is
    /// also written to disk so a plain file read stays in sync).
    pub async fn primer(&self) -> Result<String, MemoryError> {
        let global_root = self.global_root.clone();
        let project_root = self.project_root.clone();
        let project_config = self.config.project.clone();
        tokio::task::spawn_blocking(move || primer::write(&global_root, &project_root, &project_config))
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))??;
        self.primer_render().await
    }

    async fn primer_render(&self) -> Result<String, MemoryError> {
        let global_root = self.global_root.clone();
        let project_root = self.project_root.clone();
        let project_config = self.config.project.clone();
        tokio::task::spawn_blocking(move || primer::render(&global_root, &project_root, &project_config))
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?
            .map_err(MemoryError::from)
    }

    /// The `session_end` verb: append to today's journal, reindex it, and
    /// refresh `PRIMER.md`.
    pub async fn session_end(&self, req: SessionEndRequest) -> Result<String, MemoryError> {
        let project_root = self.project_root.clone();
        let filename = tokio::task::spawn_blocking(move || session::append_session(&project_root, &req))
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))??;

        if let Some(indexer) = &self.indexer {
            let mut store = self.project_store.lock().await;
            indexer
                .index_file(&mut store, &self.project_root, &format!("journal/{filename}"))
                .await?;
        }

        self.primer().await?;
        Ok(format!(
            "Session summary written to {filename}. PRIMER.md and TASKS.md updated."
        ))
    }

    /// The `update_tasks` verb: overwrite `TASKS.md` and refresh `PRIMER.md`.
    pub async fn update_tasks(&self, updates: Vec<TaskUpdate>) -> Result<String, MemoryError> {
        let project_root = self.project_root.clone();
        let updates_clone = updates.clone();
        tokio::task::spawn_blocking(move || tasks::write_tasks(&project_root, &updates_clone))
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))??;

        self.primer().await?;
        Ok(format!(
            "TASKS.md updated with {} tasks. PRIMER.md refreshed.",
            updates.len()
        ))
    }

    /// Stats for both scopes, in `(global, project)` order.
    pub async fn stats(&self) -> Result<(store::StoreStats, store::StoreStats), MemoryError> {
        let global = self.global_store.lock().await.get_stats()?;
        let project = self.project_store.lock().await.get_stats()?;
        Ok((global, project))
    }

    /// The `read` verb: return a scope-relative file's content verbatim.
    pub async fn read(&self, relative_path: &str) -> Result<String, MemoryError> {
        let full_path = if relative_path == "PRIMER.md" || relative_path == "TASKS.md" {
            self.project_root.join(relative_path)
        } else {
            let top = relative_path.split('/').next().unwrap_or("");
            self.root_for(Scope::owning(top)).join(relative_path)
        };

        tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|_| MemoryError::NotFound(relative_path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    fn test_config(paths: crate::paths::Paths) -> Config {
        let mut config = Config::default();
        config.paths = paths;
        config.embedding.provider = "local".to_string();
        config.embedding.dimension = 3;
        config
    }

    /// The embedding provider always fails to build in this sandbox (no
    /// model weights on disk), so the engine should still open in degraded
    /// mode rather than erroring out.
    #[tokio::test]
    async fn open_degrades_gracefully_without_embedder() {
        let global = tempdir().unwrap();
        let project_dir = tempdir().unwrap();
        let paths = crate::paths::Paths {
            config_dir: global.path().join("config"),
            data_dir: global.path().join("data"),
            state_dir: global.path().join("state"),
            cache_dir: global.path().join("cache"),
            runtime_dir: Some(global.path().join("runtime")),
            global_memory_root: global.path().join("global"),
        };
        let config = test_config(paths);

        let engine = MemoryEngine::open(config, project_dir.path()).unwrap();
        let outcome = engine.log("this content is long enough to pass quality", None).await;
        assert!(matches!(outcome, Err(MemoryError::EmbeddingUnavailable(_))));
    }

    fn dummy_chunk(uri: &str, content: &str, section: &str) -> Chunk {
        let now = chrono::Utc::now();
        Chunk {
            id: "chunk-1".to_string(),
            uri: uri.to_string(),
            content: content.to_string(),
            content_hash: "hash".to_string(),
            parent_dir: "user".to_string(),
            memory_type: "preference".to_string(),
            section: section.to_string(),
            importance: 5,
            reinforcement: 0,
            access_count: 0,
            token_count: 4,
            created_at: now,
            updated_at: now,
            start_line: 1,
            end_line: 1,
        }
    }

    /// Regression test for the Reinforce/Conflict file-resolution fix: a
    /// matched candidate's bullet must be replaced in *its own* file, never
    /// in an unrelated file that happens to share the same parent_dir.
    #[tokio::test]
    async fn apply_conflict_or_append_only_touches_the_given_path() {
        let global = tempdir().unwrap();
        let project_dir = tempdir().unwrap();
        let paths = crate::paths::Paths {
            config_dir: global.path().join("config"),
            data_dir: global.path().join("data"),
            state_dir: global.path().join("state"),
            cache_dir: global.path().join("cache"),
            runtime_dir: Some(global.path().join("runtime")),
            global_memory_root: global.path().join("global"),
        };
        let config = test_config(paths);
        let engine = MemoryEngine::open(config, project_dir.path()).unwrap();

        let user_dir = project_dir.path().join("user");
        std::fs::create_dir_all(&user_dir).unwrap();
        let other_path = user_dir.join("preferences.md");
        let candidate_path = user_dir.join("instructions.md");
        std::fs::write(&other_path, "# Preferences\n\n- unrelated bullet\n").unwrap();
        std::fs::write(
            &candidate_path,
            "# Instructions\n\n- always use tabs\n",
        )
        .unwrap();

        let candidate = dummy_chunk("user/instructions.md", "always use tabs", "Instructions");
        engine
            .apply_conflict_or_append(&candidate_path, &candidate, "always use spaces")
            .unwrap();

        let other_after = std::fs::read_to_string(&other_path).unwrap();
        let candidate_after = std::fs::read_to_string(&candidate_path).unwrap();
        assert_eq!(other_after, "# Preferences\n\n- unrelated bullet\n");
        assert!(candidate_after.contains("always use spaces"));
        assert!(!candidate_after.contains("always use tabs"));
    }

    #[tokio::test]
    async fn read_missing_file_returns_not_found() {
        let global = tempdir().unwrap();
        let project_dir = tempdir().unwrap();
        let paths = crate::paths::Paths {
            config_dir: global.path().join("config"),
            data_dir: global.path().join("data"),
            state_dir: global.path().join("state"),
            cache_dir: global.path().join("cache"),
            runtime_dir: Some(global.path().join("runtime")),
            global_memory_root: global.path().join("global"),
        };
        let config = test_config(paths);
        let engine = MemoryEngine::open(config, project_dir.path()).unwrap();

        let result = engine.read("user/nope.md").await;
        assert!(matches!(result, Err(MemoryError::NotFound(_))));
    }
}
