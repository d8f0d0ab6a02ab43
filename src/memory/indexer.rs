//! Translates file events and full-corpus scans into Store mutations,
//! guaranteeing the Store reflects the current on-disk Markdown.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::memory::chunk::chunk;
use crate::memory::embeddings::{self, EmbeddingProvider};
use crate::memory::store::Store;

/// Files that are derived output, never indexed as source memory.
const EXCLUDED_FILES: &[&str] = &["PRIMER.md", "TASKS.md"];

#[derive(Debug, Clone, Default)]
pub struct IndexAllStats {
    pub files_scanned: usize,
    pub chunks_indexed: usize,
}

pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    pub fn is_excluded(relative_path: &str) -> bool {
        let name = Path::new(relative_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");
        EXCLUDED_FILES.contains(&name)
    }

    /// Read `root/relative_path`; if missing, equivalent to
    /// `delete_by_uri`. Otherwise chunk it, embed the new chunks in one
    /// batch, delete stale chunks for this uri, and upsert the new set.
    pub async fn index_file(&self, store: &mut Store, root: &Path, relative_path: &str) -> Result<usize> {
        if Self::is_excluded(relative_path) {
            return Ok(0);
        }

        let full_path = root.join(relative_path);
        if !full_path.exists() {
            store.delete_by_uri(relative_path)?;
            tracing::debug!(uri = relative_path, "file removed, chunks deleted");
            return Ok(0);
        }

        let text = fs::read_to_string(&full_path)
            .with_context(|| format!("failed to read {}", full_path.display()))?;
        let chunks = chunk(relative_path, &text);

        // Content-hash-keyed cache: identical chunk text, whether from an
        // earlier index of this file or from a different file entirely,
        // reuses its embedding instead of paying the provider again.
        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        let mut pending_idx = Vec::new();
        let mut pending_text = Vec::new();
        for (i, c) in chunks.iter().enumerate() {
            let key = embeddings::hash_text(&c.content);
            match store.cached_embedding(&key)? {
                Some(cached) => embeddings.push(cached),
                None => {
                    embeddings.push(Vec::new());
                    pending_idx.push(i);
                    pending_text.push(c.content.clone());
                }
            }
        }

        if !pending_text.is_empty() {
            let fresh = self
                .embedder
                .embed_batch(&pending_text)
                .await
                .context("embedding batch failed during index_file")?;
            for (idx, vector) in pending_idx.into_iter().zip(fresh) {
                store.cache_embedding(&embeddings::hash_text(&chunks[idx].content), &vector)?;
                embeddings[idx] = vector;
            }
        }

        let keep_hashes: HashSet<String> = chunks.iter().map(|c| c.content_hash.clone()).collect();
        if tracing::enabled!(tracing::Level::DEBUG) {
            for stale in store.chunks_for_uri(relative_path)? {
                if !keep_hashes.contains(&stale.content_hash) {
                    tracing::debug!(uri = relative_path, section = %stale.section, "chunk no longer present, pruning");
                }
            }
        }
        let removed = store.delete_chunks_not_in(relative_path, &keep_hashes)?;
        if removed > 0 {
            tracing::debug!(uri = relative_path, removed, "pruned stale chunks");
        }

        for (c, embedding) in chunks.iter().zip(embeddings.iter()) {
            store.upsert(c, embedding)?;
        }

        tracing::debug!(uri = relative_path, chunks = chunks.len(), "indexed file");
        Ok(chunks.len())
    }

    /// Walk all tracked Markdown under `root`, skipping excluded files.
    pub async fn index_all(&self, store: &mut Store, root: &Path) -> Result<IndexAllStats> {
        let mut stats = IndexAllStats::default();
        if !root.exists() {
            return Ok(stats);
        }

        let pattern = format!("{}/**/*.md", root.display());
        let paths = glob::glob(&pattern).context("invalid glob pattern for index_all")?;

        let mut relative_paths = Vec::new();
        for entry in paths {
            let path = entry?;
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let relative_str = relative.to_string_lossy().replace('\\', "/");
            if Self::is_excluded(&relative_str) {
                continue;
            }
            relative_paths.push(relative_str);
        }

        for relative in &relative_paths {
            let count = self.index_file(store, root, relative).await?;
            stats.files_scanned += 1;
            stats.chunks_indexed += count;
        }

        // Converge: any uri in the Store no longer present on disk gets
        // its chunks removed, so Store URIs == on-disk files (mod the
        // excluded set).
        let tracked: HashSet<String> = relative_paths.into_iter().collect();
        for existing_uri in store.uris()? {
            if !tracked.contains(&existing_uri) {
                store.delete_by_uri(&existing_uri)?;
            }
        }

        tracing::info!(
            files = stats.files_scanned,
            chunks = stats.chunks_indexed,
            root = %root.display(),
            "reindex complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embeddings::EmbeddingProvider;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        fn id(&self) -> &str {
            "stub"
        }
        fn model(&self) -> &str {
            "stub"
        }
        fn dimensions(&self) -> usize {
            3
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn index_file_populates_store() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("user")).unwrap();
        fs::write(
            dir.path().join("user/preferences.md"),
            "# Prefs\n\n- likes rust\n",
        )
        .unwrap();

        let mut store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let indexer = Indexer::new(Arc::new(StubEmbedder));
        let n = indexer
            .index_file(&mut store, dir.path(), "user/preferences.md")
            .await
            .unwrap();

        assert_eq!(n, 1);
        assert_eq!(store.get_stats().unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn index_file_on_missing_path_deletes() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("user")).unwrap();
        let path = dir.path().join("user/preferences.md");
        fs::write(&path, "# Prefs\n\n- likes rust\n").unwrap();

        let mut store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let indexer = Indexer::new(Arc::new(StubEmbedder));
        indexer
            .index_file(&mut store, dir.path(), "user/preferences.md")
            .await
            .unwrap();

        fs::remove_file(&path).unwrap();
        indexer
            .index_file(&mut store, dir.path(), "user/preferences.md")
            .await
            .unwrap();

        assert_eq!(store.get_stats().unwrap().total_chunks, 0);
    }

    #[tokio::test]
    async fn excluded_files_are_never_indexed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("PRIMER.md"), "# Primer\n\n- whatever\n").unwrap();

        let mut store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let indexer = Indexer::new(Arc::new(StubEmbedder));
        let n = indexer
            .index_file(&mut store, dir.path(), "PRIMER.md")
            .await
            .unwrap();

        assert_eq!(n, 0);
        assert_eq!(store.get_stats().unwrap().total_chunks, 0);
    }

    struct CountingEmbedder {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn id(&self) -> &str {
            "counting"
        }
        fn model(&self) -> &str {
            "counting"
        }
        fn dimensions(&self) -> usize {
            3
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(texts.len(), std::sync::atomic::Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn identical_chunk_content_reuses_cached_embedding() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("user")).unwrap();
        let body = "# Prefs\n\n- likes rust\n";
        fs::write(dir.path().join("user/preferences.md"), body).unwrap();
        fs::write(dir.path().join("user/other.md"), body).unwrap();

        let mut store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let embedder = Arc::new(CountingEmbedder {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let indexer = Indexer::new(embedder.clone());

        indexer
            .index_file(&mut store, dir.path(), "user/preferences.md")
            .await
            .unwrap();
        assert_eq!(embedder.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Same chunk content, different file: embedding comes from the cache,
        // so the provider sees zero additional calls.
        indexer
            .index_file(&mut store, dir.path(), "user/other.md")
            .await
            .unwrap();
        assert_eq!(embedder.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.get_stats().unwrap().total_chunks, 2);
    }

    #[tokio::test]
    async fn index_all_walks_tree_and_skips_excluded() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("journal")).unwrap();
        fs::write(dir.path().join("journal/2026-01-01.md"), "# Day\n\n- did a thing\n").unwrap();
        fs::write(dir.path().join("TASKS.md"), "# Tasks\n\n- nope\n").unwrap();

        let mut store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let indexer = Indexer::new(Arc::new(StubEmbedder));
        let stats = indexer.index_all(&mut store, dir.path()).await.unwrap();

        assert_eq!(stats.files_scanned, 1);
        assert_eq!(store.get_stats().unwrap().total_chunks, 1);
    }
}
