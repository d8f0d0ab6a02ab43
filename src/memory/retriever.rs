//! The read pipeline: fast-path file shortcuts, the journal timeline path,
//! and hybrid (vector + full-text) search with RRF merge and salience
//! ranking. Store access is the caller's job (`MemoryEngine::search`); this
//! module holds the pure ranking math plus the two pre-index shortcuts so
//! it stays testable without a live database.

use std::collections::HashMap;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::memory::chunk::Chunk;
use crate::memory::scope::{Scope, ScopeFilter};

const RRF_K: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub uri: String,
    pub content: String,
    pub salience: f32,
    pub memory_type: String,
    pub section: String,
    pub reinforcement: u32,
    pub token_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_tokens: usize,
    pub budget_remaining: i64,
    pub partial: bool,
}

static FAST_PATH_TABLE: Lazy<Vec<(Regex, Scope, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)偏好|preference").unwrap(),
            Scope::Global,
            "user/preferences.md",
        ),
        (
            Regex::new(r"(?i)指令|instruction|规则|rule").unwrap(),
            Scope::Global,
            "user/instructions.md",
        ),
        (
            Regex::new(r"(?i)实体|entity|人物|people").unwrap(),
            Scope::Global,
            "user/entities.md",
        ),
        (
            Regex::new(r"(?i)决策|decision").unwrap(),
            Scope::Project,
            "agent/decisions.md",
        ),
        (
            Regex::new(r"(?i)模式|pattern").unwrap(),
            Scope::Project,
            "agent/patterns.md",
        ),
        (
            Regex::new(r"(?i)任务|task").unwrap(),
            Scope::Project,
            "TASKS.md",
        ),
    ]
});

static TIMELINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)最近|recent|today|昨天|yesterday|past \d+ days|这几天").unwrap()
});

pub struct Retriever {
    pub default_top_k: usize,
    pub default_max_tokens: usize,
    pub half_life_days: f64,
}

impl Retriever {
    pub fn new(default_top_k: usize, default_max_tokens: usize, half_life_days: f64) -> Self {
        Self {
            default_top_k,
            default_max_tokens,
            half_life_days,
        }
    }

    /// Stage 1: does this query name a whole file directly? First matching
    /// table row wins.
    pub fn fast_path_target(&self, query: &str) -> Option<(Scope, &'static str)> {
        FAST_PATH_TABLE
            .iter()
            .find(|(re, _, _)| re.is_match(query))
            .map(|(_, scope, path)| (*scope, *path))
    }

    /// Stage 2: should this query be answered from the journal timeline
    /// instead of hybrid search?
    pub fn is_timeline_query(&self, query: &str, scope_filter: ScopeFilter) -> bool {
        scope_filter.parent_dir() == Some("journal") || TIMELINE_RE.is_match(query)
    }

    /// Reciprocal rank fusion across a vector-search list and an FTS list,
    /// both already ordered best-first. Returns `(chunk, rrf_score, sem)`
    /// where `sem` is the chunk's vector similarity (0.0 if it only
    /// appeared in the FTS list).
    pub fn rrf_merge(
        vector_hits: &[(Chunk, f32)],
        fts_hits: &[(Chunk, f32)],
    ) -> Vec<(Chunk, f64, f32)> {
        let mut merged: HashMap<String, (Chunk, f64, f32)> = HashMap::new();

        for (rank, (chunk, sim)) in vector_hits.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f64 + 1.0);
            let entry = merged
                .entry(chunk.id.clone())
                .or_insert_with(|| (chunk.clone(), 0.0, *sim));
            entry.1 += contribution;
            entry.2 = *sim;
        }

        for (rank, (chunk, _rank_score)) in fts_hits.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f64 + 1.0);
            let entry = merged
                .entry(chunk.id.clone())
                .or_insert_with(|| (chunk.clone(), 0.0, 0.0));
            entry.1 += contribution;
        }

        let mut out: Vec<(Chunk, f64, f32)> = merged.into_values().collect();
        out.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        out
    }

    /// Stage 3.4: compute the composite salience score for each RRF
    /// survivor and sort descending, ties broken by `id` ascending
    /// (invariant 5).
    pub fn compute_salience(&self, ranked: &[(Chunk, f64, f32)]) -> Vec<(Chunk, f32)> {
        let r_max = ranked.iter().map(|(c, _, _)| c.reinforcement).max().unwrap_or(0);
        let a_max = ranked.iter().map(|(c, _, _)| c.access_count).max().unwrap_or(0);
        let lambda = std::f64::consts::LN_2 / self.half_life_days.max(f64::EPSILON);
        let now = Utc::now();

        let mut scored: Vec<(Chunk, f32)> = ranked
            .iter()
            .map(|(chunk, _rrf, sem)| {
                let reinforcement_score =
                    ((chunk.reinforcement as f64 + 1.0).ln()) / ((r_max as f64 + 2.0).ln());
                let access_score =
                    ((chunk.access_count as f64 + 1.0).ln()) / ((a_max as f64 + 2.0).ln());
                let days_since_updated =
                    (now - chunk.updated_at).num_seconds().max(0) as f64 / 86400.0;
                let recency_decay = (-lambda * days_since_updated).exp();

                let salience = 0.50 * *sem as f64
                    + 0.20 * reinforcement_score
                    + 0.20 * recency_decay
                    + 0.10 * access_score;

                (chunk.clone(), salience as f32)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored
    }

    /// Stage 5: accept chunks in rank order while the running total stays
    /// within budget; stop (don't skip ahead) at the first chunk that would
    /// overflow.
    pub fn apply_budget(
        &self,
        ranked: Vec<(Chunk, f32)>,
        max_tokens: usize,
    ) -> (Vec<SearchResult>, usize) {
        let mut total = 0usize;
        let mut accepted = Vec::new();

        for (chunk, salience) in ranked {
            if total + chunk.token_count > max_tokens {
                break;
            }
            total += chunk.token_count;
            accepted.push(SearchResult {
                id: chunk.id,
                uri: chunk.uri,
                content: chunk.content,
                salience,
                memory_type: chunk.memory_type,
                section: chunk.section,
                reinforcement: chunk.reinforcement,
                token_count: chunk.token_count,
            });
        }

        (accepted, total)
    }
}

/// Sort journal file names (`YYYY-MM-DD.md`) descending, most recent first.
pub fn sort_journal_filenames_desc(names: &mut [String]) {
    names.sort_by(|a, b| b.cmp(a));
}

/// Render a [`SearchResponse`] as the plain-text format described in the
/// external interface: one `[salience: X | reinforcement: R | <uri>]`
/// header per result, blocks separated by a blank line, with a trailing
/// token-budget summary.
pub fn format_search_response(response: &SearchResponse) -> String {
    if response.results.is_empty() {
        return "(no results)".to_string();
    }

    let mut out = String::new();
    for result in &response.results {
        out.push_str(&format!(
            "[salience: {:.2} | reinforcement: {} | {}]\n{}\n\n",
            result.salience, result.reinforcement, result.uri, result.content.trim()
        ));
    }
    out.push_str(&format!(
        "[total tokens: {} | budget remaining: {}]",
        response.total_tokens, response.budget_remaining
    ));
    if response.partial {
        out.push_str(" (partial: embeddings unavailable, FTS-only)");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn chunk(id: &str, uri: &str, reinforcement: u32, access_count: u32, tokens: usize) -> Chunk {
        Chunk {
            id: id.to_string(),
            uri: uri.to_string(),
            content: format!("content for {id}"),
            content_hash: format!("hash-{id}"),
            parent_dir: "user".to_string(),
            memory_type: "preference".to_string(),
            section: "Preferences".to_string(),
            importance: 3,
            reinforcement,
            access_count,
            token_count: tokens,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            start_line: 1,
            end_line: 2,
        }
    }

    #[test]
    fn fast_path_matches_preference_query() {
        let retriever = Retriever::new(10, 1500, 30.0);
        let (scope, path) = retriever.fast_path_target("我的偏好是什么").unwrap();
        assert_eq!(scope, Scope::Global);
        assert_eq!(path, "user/preferences.md");
    }

    #[test]
    fn timeline_query_detected_by_keyword_or_filter() {
        let retriever = Retriever::new(10, 1500, 30.0);
        assert!(retriever.is_timeline_query("what did we do recently", ScopeFilter::None));
        assert!(retriever.is_timeline_query("anything", ScopeFilter::ParentDir("journal")));
        assert!(!retriever.is_timeline_query("what's my preference", ScopeFilter::None));
    }

    #[test]
    fn rrf_merge_favors_items_ranked_high_in_both_lists() {
        let a = chunk("a", "x.md", 0, 0, 10);
        let b = chunk("b", "y.md", 0, 0, 10);

        let vector_hits = vec![(a.clone(), 0.9), (b.clone(), 0.8)];
        let fts_hits = vec![(b.clone(), 1.0), (a.clone(), 0.5)];

        let merged = Retriever::rrf_merge(&vector_hits, &fts_hits);
        // both appear in both lists at ranks 0 and 1, so scores are close;
        // chunk "a" is rank 0 in vector and rank 1 in fts, "b" is rank 1 in
        // vector and rank 0 in fts -> identical totals, tie broken by id.
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].0.id, "a");
    }

    #[test]
    fn compute_salience_orders_by_score_with_id_tiebreak() {
        let retriever = Retriever::new(10, 1500, 30.0);
        let high = chunk("z", "x.md", 5, 5, 10);
        let low = chunk("a", "y.md", 0, 0, 10);
        let ranked = vec![(high.clone(), 0.1, 0.9), (low.clone(), 0.1, 0.1)];

        let scored = retriever.compute_salience(&ranked);
        assert_eq!(scored[0].0.id, "z");
    }

    #[test]
    fn compute_salience_tie_breaks_by_id_ascending() {
        let retriever = Retriever::new(10, 1500, 30.0);
        let mut c1 = chunk("b", "x.md", 0, 0, 10);
        let mut c2 = chunk("a", "y.md", 0, 0, 10);
        c1.updated_at = Utc::now() - Duration::days(5);
        c2.updated_at = Utc::now() - Duration::days(5);
        let ranked = vec![(c1, 0.0, 0.0), (c2, 0.0, 0.0)];

        let scored = retriever.compute_salience(&ranked);
        assert_eq!(scored[0].0.id, "a");
        assert_eq!(scored[1].0.id, "b");
    }

    #[test]
    fn budget_truncation_matches_scenario_s6() {
        let retriever = Retriever::new(10, 1500, 30.0);
        let ranked: Vec<(Chunk, f32)> = (0..10)
            .map(|i| (chunk(&format!("c{i}"), "journal/x.md", 0, 0, 400), 1.0 - i as f32 * 0.01))
            .collect();

        let (accepted, total) = retriever.apply_budget(ranked, 1500);
        assert_eq!(accepted.len(), 3);
        assert_eq!(total, 1200);
    }
}
