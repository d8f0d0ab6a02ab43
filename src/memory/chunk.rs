//! The Markdown chunker: a pure function `chunk(uri, text) -> Vec<Chunk>`.
//!
//! Splits on ATX headings of level <= 3, joins nested section titles with
//! " > ", strips an optional YAML-like frontmatter block (propagating its
//! `type`/`importance`/timestamps onto every emitted chunk), and skips
//! sections that are empty, pure whitespace, or pure code.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use tiktoken_rs::CoreBPE;

static ENCODER: Lazy<CoreBPE> =
    Lazy::new(|| tiktoken_rs::cl100k_base().expect("cl100k_base encoder must build"));

/// One indexing/retrieval unit produced by the chunker and persisted by the Store.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub uri: String,
    pub content: String,
    pub content_hash: String,
    pub parent_dir: String,
    pub memory_type: String,
    pub section: String,
    pub importance: u8,
    pub reinforcement: u32,
    pub access_count: u32,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub start_line: usize,
    pub end_line: usize,
}

/// Frontmatter fields propagated from a file onto every chunk it produces.
#[derive(Debug, Clone, Default)]
struct Frontmatter {
    memory_type: Option<String>,
    importance: Option<u8>,
    created: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    reinforcement: Option<u32>,
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn chunk_id(uri: &str, start_line: usize, end_line: usize, content_hash: &str) -> String {
    let key = format!("{}:{}:{}:{}", uri, start_line, end_line, content_hash);
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

pub fn token_count(text: &str) -> usize {
    ENCODER.encode_with_special_tokens(text).len()
}

fn parent_dir_of(uri: &str) -> String {
    uri.split(['/', '\\'])
        .next()
        .unwrap_or("")
        .to_string()
}

/// Split `text` on a leading `---\n ... \n---` block. Returns the parsed
/// frontmatter (best-effort; malformed blocks are ignored) and the
/// remaining body along with the 1-based line number the body starts at.
fn split_frontmatter(text: &str) -> (Frontmatter, String, usize) {
    let mut lines = text.lines();
    let Some(first) = lines.next() else {
        return (Frontmatter::default(), String::new(), 1);
    };
    if first.trim() != "---" {
        return (Frontmatter::default(), text.to_string(), 1);
    }

    let mut fm_lines = Vec::new();
    let mut consumed = 1;
    let mut closed = false;
    for line in lines {
        consumed += 1;
        if line.trim() == "---" {
            closed = true;
            break;
        }
        fm_lines.push(line);
    }

    if !closed {
        return (Frontmatter::default(), text.to_string(), 1);
    }

    let fm_text = fm_lines.join("\n");
    let frontmatter = parse_frontmatter(&fm_text);

    let body: String = text
        .lines()
        .skip(consumed)
        .collect::<Vec<_>>()
        .join("\n");

    (frontmatter, body, consumed + 1)
}

fn parse_frontmatter(fm_text: &str) -> Frontmatter {
    let mut fm = Frontmatter::default();
    for line in fm_text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key {
            "type" => fm.memory_type = Some(value.to_string()),
            "importance" => fm.importance = value.parse().ok(),
            "reinforcement" => fm.reinforcement = value.parse().ok(),
            "created" => fm.created = parse_timestamp(value),
            "updated" => fm.updated = parse_timestamp(value),
            _ => {}
        }
    }
    fm
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Strips fenced code blocks (``` or ~~~) from `body`, used to detect
/// sections whose only content is code.
fn strip_code_fences(body: &str) -> String {
    let mut out = String::new();
    let mut in_fence = false;
    for line in body.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

struct Section {
    heading: Option<String>,
    path: Vec<String>,
    body_lines: Vec<String>,
    start_line: usize,
    end_line: usize,
}

/// Split a Markdown document into an ordered sequence of chunks.
///
/// `uri` is the source path relative to the scope root, used for `id`
/// derivation and the `parent_dir` attribute.
pub fn chunk(uri: &str, text: &str) -> Vec<Chunk> {
    let (frontmatter, body, body_start_line) = split_frontmatter(text);
    let now = Utc::now();

    let lines: Vec<&str> = body.lines().collect();
    let heading_re_levels = |line: &str| -> Option<(usize, String)> {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if hashes == 0 || hashes > 6 {
            return None;
        }
        let rest = trimmed[hashes..].trim();
        // Require a space (or end of content) after the hashes to be a heading.
        let after = &trimmed[hashes..];
        if !after.is_empty() && !after.starts_with(' ') {
            return None;
        }
        Some((hashes, rest.to_string()))
    };

    let mut sections: Vec<Section> = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<Section> = None;
    let mut in_fence = false;

    let mut flush = |current: Option<Section>, sections: &mut Vec<Section>| {
        if let Some(sec) = current {
            sections.push(sec);
        }
    };

    for (idx, line) in lines.iter().enumerate() {
        let line_no = body_start_line + idx;
        let fence_marker = line.trim_start();
        let is_fence_toggle = fence_marker.starts_with("```") || fence_marker.starts_with("~~~");

        if !in_fence {
            if let Some((level, title)) = heading_re_levels(line) {
                if level <= 3 {
                    flush(current.take(), &mut sections);
                    stack.truncate(level - 1);
                    stack.push(title.clone());
                    current = Some(Section {
                        heading: Some(title),
                        path: stack.clone(),
                        body_lines: Vec::new(),
                        start_line: line_no,
                        end_line: line_no,
                    });
                    if is_fence_toggle {
                        in_fence = !in_fence;
                    }
                    continue;
                }
            }
        }

        if is_fence_toggle {
            in_fence = !in_fence;
        }

        match current.as_mut() {
            Some(sec) => {
                sec.body_lines.push((*line).to_string());
                sec.end_line = line_no;
            }
            None => {
                current = Some(Section {
                    heading: None,
                    path: Vec::new(),
                    body_lines: vec![(*line).to_string()],
                    start_line: line_no,
                    end_line: line_no,
                });
            }
        }
    }
    flush(current.take(), &mut sections);

    let parent_dir = parent_dir_of(uri);
    let memory_type = frontmatter.memory_type.clone().unwrap_or_default();
    let importance = frontmatter.importance.unwrap_or(1);
    let created_at = frontmatter.created.unwrap_or(now);
    let updated_at = frontmatter.updated.unwrap_or(now);
    let reinforcement = frontmatter.reinforcement.unwrap_or(0);

    let mut out = Vec::new();
    for sec in sections {
        let body_text = sec.body_lines.join("\n");
        if strip_code_fences(&body_text).trim().is_empty() {
            continue;
        }

        let content = match &sec.heading {
            Some(_) => {
                let heading_line = "#".repeat(sec.path.len().max(1)) + " " + &sec.path.join(" > ");
                format!("{}\n\n{}", heading_line, body_text.trim())
            }
            None => body_text.trim().to_string(),
        };

        if content.trim().is_empty() {
            continue;
        }

        let section_label = sec.path.join(" > ");
        let hash = content_hash(&content);
        let id = chunk_id(uri, sec.start_line, sec.end_line, &hash);
        let tokens = token_count(&content);

        out.push(Chunk {
            id,
            uri: uri.to_string(),
            content,
            content_hash: hash,
            parent_dir: parent_dir.clone(),
            memory_type: memory_type.clone(),
            section: section_label,
            importance,
            reinforcement,
            access_count: 0,
            token_count: tokens,
            created_at,
            updated_at,
            start_line: sec.start_line,
            end_line: sec.end_line,
        });
    }

    out
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let bytes = bytes.as_ref();
        let mut s = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_headings_and_joins_sections() {
        let text = "# Top\n\nintro text\n\n## Sub\n\n- a bullet\n";
        let chunks = chunk("user/preferences.md", text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section, "Top");
        assert_eq!(chunks[1].section, "Top > Sub");
        assert_eq!(chunks[1].parent_dir, "user");
    }

    #[test]
    fn frontmatter_is_excluded_but_propagated() {
        let text = "---\ntype: preference\nimportance: 4\nupdated: 2026-01-01T00:00:00Z\n---\n# Prefs\n\n- likes rust\n";
        let chunks = chunk("user/preferences.md", text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].memory_type, "preference");
        assert_eq!(chunks[0].importance, 4);
        assert!(!chunks[0].content.contains("type: preference"));
    }

    #[test]
    fn code_only_sections_produce_no_chunks() {
        let text = "# Snippet\n\n```rust\nfn main() {}\n```\n";
        let chunks = chunk("agent/patterns.md", text);
        assert!(chunks.is_empty());
    }

    #[test]
    fn whitespace_only_sections_produce_no_chunks() {
        let text = "# Empty\n\n   \n\n";
        let chunks = chunk("agent/patterns.md", text);
        assert!(chunks.is_empty());
    }

    #[test]
    fn token_count_is_self_consistent() {
        let a = token_count("hello world, this is a memory chunk");
        let b = token_count("hello world, this is a memory chunk");
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        let h1 = content_hash("same text");
        let h2 = content_hash("same text");
        let h3 = content_hash("different text");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn headings_inside_code_fences_do_not_split() {
        let text = "# Real\n\n```\n# not a heading\n```\nprose\n";
        let chunks = chunk("agent/patterns.md", text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section, "Real");
    }
}
