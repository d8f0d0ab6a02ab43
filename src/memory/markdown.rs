//! Frontmatter read/write and bullet-list manipulation over the Markdown
//! files that are authoritative for memory content. Writes are atomic
//! (write-then-rename) so a cancelled operation never leaves a torn file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Frontmatter {
    pub memory_type: String,
    pub importance: u8,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub reinforcement: u32,
    pub status: String,
}

impl Frontmatter {
    pub fn new(memory_type: &str, importance: u8) -> Self {
        let now = Utc::now();
        Self {
            memory_type: memory_type.to_string(),
            importance,
            created: now,
            updated: now,
            reinforcement: 0,
            status: "active".to_string(),
        }
    }

    fn render(&self) -> String {
        format!(
            "---\ntype: {}\nimportance: {}\ncreated: {}\nupdated: {}\nreinforcement: {}\nstatus: {}\n---\n",
            self.memory_type,
            self.importance,
            self.created.to_rfc3339(),
            self.updated.to_rfc3339(),
            self.reinforcement,
            self.status,
        )
    }

    fn parse(text: &str) -> Option<(Self, usize)> {
        let mut lines = text.lines();
        if lines.next()?.trim() != "---" {
            return None;
        }

        let mut memory_type = String::new();
        let mut importance = 1u8;
        let mut created = Utc::now();
        let mut updated = Utc::now();
        let mut reinforcement = 0u32;
        let mut status = "active".to_string();
        let mut consumed = 1;

        for line in lines {
            consumed += 1;
            if line.trim() == "---" {
                return Some((
                    Self {
                        memory_type,
                        importance,
                        created,
                        updated,
                        reinforcement,
                        status,
                    },
                    consumed,
                ));
            }
            if let Some((key, value)) = line.split_once(':') {
                let value = value.trim().trim_matches('"');
                match key.trim() {
                    "type" => memory_type = value.to_string(),
                    "importance" => importance = value.parse().unwrap_or(1),
                    "created" => {
                        created = DateTime::parse_from_rfc3339(value)
                            .map(|d| d.with_timezone(&Utc))
                            .unwrap_or(created)
                    }
                    "updated" => {
                        updated = DateTime::parse_from_rfc3339(value)
                            .map(|d| d.with_timezone(&Utc))
                            .unwrap_or(updated)
                    }
                    "reinforcement" => reinforcement = value.parse().unwrap_or(0),
                    "status" => status = value.to_string(),
                    _ => {}
                }
            }
        }
        None
    }
}

struct ParsedFile {
    frontmatter: Option<Frontmatter>,
    body: String,
}

fn parse_file(text: &str) -> ParsedFile {
    match Frontmatter::parse(text) {
        Some((fm, consumed)) => {
            let body = text.lines().skip(consumed).collect::<Vec<_>>().join("\n");
            ParsedFile {
                frontmatter: Some(fm),
                body,
            }
        }
        None => ParsedFile {
            frontmatter: None,
            body: text.to_string(),
        },
    }
}

fn render_file(frontmatter: &Frontmatter, body: &str) -> String {
    format!("{}\n{}", frontmatter.render(), body.trim_end())
        .trim_end()
        .to_string()
        + "\n"
}

/// Write `content` to `path` atomically: write to a sibling temp file, then
/// rename over the target. Cancellation at any point before the rename
/// leaves the original file (or no file) intact.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("md")
    ));
    fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename into place: {}", path.display()))?;
    Ok(())
}

/// Ensure `path` exists with the given frontmatter and an empty body under
/// `section`, if it doesn't already exist.
pub fn ensure_file(path: &Path, frontmatter: Frontmatter, section: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let body = format!("## {}\n", section);
    write_atomic(path, &render_file(&frontmatter, &body))
}

/// Append `- <content>` under `section`'s ATX-level-2 heading, creating the
/// section at the end of the file if it doesn't exist yet.
pub fn append_bullet(path: &Path, section: &str, content: &str) -> Result<()> {
    let existing = fs::read_to_string(path).unwrap_or_default();
    let parsed = parse_file(&existing);
    let mut frontmatter = parsed.frontmatter.unwrap_or_else(|| Frontmatter::new("", 1));
    frontmatter.updated = Utc::now();

    let heading = format!("## {}", section);
    let mut lines: Vec<String> = parsed.body.lines().map(str::to_string).collect();

    let heading_idx = lines.iter().position(|l| l.trim() == heading);
    match heading_idx {
        Some(idx) => {
            // Insert after the section's existing bullets, before the next heading.
            let mut insert_at = lines.len();
            for (i, line) in lines.iter().enumerate().skip(idx + 1) {
                if line.trim_start().starts_with('#') {
                    insert_at = i;
                    break;
                }
            }
            lines.insert(insert_at, format!("- {}", content));
        }
        None => {
            if !lines.is_empty() && !lines.last().unwrap().trim().is_empty() {
                lines.push(String::new());
            }
            lines.push(heading);
            lines.push(format!("- {}", content));
        }
    }

    let body = lines.join("\n");
    write_atomic(path, &render_file(&frontmatter, &body))
}

/// Bump `reinforcement` in `path`'s frontmatter and set `updated` to now.
pub fn reinforce_file(path: &Path) -> Result<u32> {
    let existing = fs::read_to_string(path)
        .with_context(|| format!("cannot reinforce missing file {}", path.display()))?;
    let parsed = parse_file(&existing);
    let mut frontmatter = parsed.frontmatter.unwrap_or_else(|| Frontmatter::new("", 1));
    frontmatter.reinforcement += 1;
    frontmatter.updated = Utc::now();
    let new_value = frontmatter.reinforcement;
    write_atomic(path, &render_file(&frontmatter, &parsed.body))?;
    Ok(new_value)
}

/// Replace the bullet item whose text best matches `old_content` (by
/// longest common subsequence) with `new_content`. Updates `updated` in
/// frontmatter. Returns `true` if a bullet was found and replaced.
pub fn replace_best_matching_bullet(path: &Path, old_content: &str, new_content: &str) -> Result<bool> {
    let existing = fs::read_to_string(path)
        .with_context(|| format!("cannot update missing file {}", path.display()))?;
    let parsed = parse_file(&existing);
    let mut frontmatter = parsed.frontmatter.unwrap_or_else(|| Frontmatter::new("", 1));

    let mut lines: Vec<String> = parsed.body.lines().map(str::to_string).collect();
    let mut best_idx = None;
    let mut best_score = -1i64;

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if let Some(text) = trimmed.strip_prefix("- ") {
            let score = lcs_len(text, old_content) as i64;
            if score > best_score {
                best_score = score;
                best_idx = Some(i);
            }
        }
    }

    let Some(idx) = best_idx else {
        return Ok(false);
    };

    let indent = &lines[idx][..lines[idx].len() - lines[idx].trim_start().len()];
    lines[idx] = format!("{}- {}", indent, new_content);
    frontmatter.updated = Utc::now();

    let body = lines.join("\n");
    write_atomic(path, &render_file(&frontmatter, &body))?;
    Ok(true)
}

/// Longest common subsequence length, used to locate the bullet item most
/// similar to a conflicting memory's original text.
fn lcs_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                curr[j] = prev[j - 1] + 1;
            } else {
                curr[j] = prev[j].max(curr[j - 1]);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_bullet_creates_file_with_frontmatter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.md");
        append_bullet(&path, "Preferences", "likes rust").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("---\n"));
        assert!(content.contains("## Preferences"));
        assert!(content.contains("- likes rust"));
    }

    #[test]
    fn append_bullet_reuses_existing_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.md");
        append_bullet(&path, "Preferences", "likes rust").unwrap();
        append_bullet(&path, "Preferences", "likes fastapi").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("## Preferences").count(), 1);
        assert!(content.contains("likes rust"));
        assert!(content.contains("likes fastapi"));
    }

    #[test]
    fn reinforce_file_increments_counter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.md");
        append_bullet(&path, "Preferences", "likes rust").unwrap();

        let n = reinforce_file(&path).unwrap();
        assert_eq!(n, 1);
        let n2 = reinforce_file(&path).unwrap();
        assert_eq!(n2, 2);
    }

    #[test]
    fn replace_best_matching_bullet_swaps_closest_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decisions.md");
        append_bullet(&path, "Decisions", "决定使用 PostgreSQL 作为数据库，SQLAlchemy 2.0 作为 ORM").unwrap();

        let replaced = replace_best_matching_bullet(
            &path,
            "决定使用 PostgreSQL 作为数据库，SQLAlchemy 2.0 作为 ORM",
            "决定将 ORM 从 SQLAlchemy 2.0 更换为 Tortoise ORM",
        )
        .unwrap();

        assert!(replaced);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("Tortoise ORM"));
        assert!(!content.contains("SQLAlchemy 2.0 作为 ORM"));
        assert_eq!(content.matches("- ").count(), 1);
    }

    #[test]
    fn write_atomic_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.md");
        write_atomic(&path, "hello\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        let tmp = path.with_extension("md.tmp");
        assert!(!tmp.exists());
    }
}
