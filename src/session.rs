//! Session-journal rendering for the `session_end` verb. Appends a dated
//! entry to `journal/<YYYY-MM-DD>.md`; the primer's "Recent Context"
//! section later reads that file's "Completed" bullets back out.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::memory::markdown::{self, Frontmatter};

/// `session_end` fields accept either a single string or a list of
/// strings; normalized to a flat list of lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn into_lines(self) -> Vec<String> {
        match self {
            StringOrList::One(s) if s.trim().is_empty() => Vec::new(),
            StringOrList::One(s) => vec![s],
            StringOrList::Many(v) => v.into_iter().filter(|s| !s.trim().is_empty()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionEndRequest {
    #[serde(default)]
    pub request: Option<StringOrList>,
    #[serde(default)]
    pub learned: Option<StringOrList>,
    #[serde(default)]
    pub completed: Option<StringOrList>,
    #[serde(default)]
    pub next_steps: Option<StringOrList>,
}

fn render_bullets(lines: Vec<String>) -> String {
    if lines.is_empty() {
        "(none)\n".to_string()
    } else {
        lines.into_iter().map(|l| format!("- {}\n", l)).collect()
    }
}

fn render_session_section(req: &SessionEndRequest) -> String {
    let mut out = String::new();

    out.push_str("\n## Request\n");
    out.push_str(&render_bullets(
        req.request.clone().map(StringOrList::into_lines).unwrap_or_default(),
    ));

    out.push_str("\n## Learned\n");
    out.push_str(&render_bullets(
        req.learned.clone().map(StringOrList::into_lines).unwrap_or_default(),
    ));

    out.push_str("\n## Completed\n");
    out.push_str(&render_bullets(
        req.completed.clone().map(StringOrList::into_lines).unwrap_or_default(),
    ));

    out.push_str("\n## Next Steps\n");
    out.push_str(&render_bullets(
        req.next_steps.clone().map(StringOrList::into_lines).unwrap_or_default(),
    ));

    out
}

/// Append a session summary to today's journal file under
/// `<project_root>/journal/`, creating the file (with frontmatter) if it
/// doesn't exist yet. Returns the file's name (`YYYY-MM-DD.md`).
pub fn append_session(project_root: &Path, req: &SessionEndRequest) -> Result<String> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let filename = format!("{}.md", today);
    let path = project_root.join("journal").join(&filename);

    if !path.exists() {
        markdown::ensure_file(&path, Frontmatter::new("journal", 1), "Session")?;
    }

    let existing = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let section = render_session_section(req);
    let updated = format!("{}\n{}", existing.trim_end(), section);
    markdown::write_atomic(&path, &updated)?;

    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_session_writes_all_sections() {
        let dir = tempdir().unwrap();
        let req = SessionEndRequest {
            request: Some(StringOrList::One("add retriever".to_string())),
            learned: Some(StringOrList::Many(vec!["RRF needs k=60".to_string()])),
            completed: Some(StringOrList::Many(vec!["wrote retriever.rs".to_string()])),
            next_steps: Some(StringOrList::One("write watcher".to_string())),
        };

        let filename = append_session(dir.path(), &req).unwrap();
        let content = std::fs::read_to_string(dir.path().join("journal").join(&filename)).unwrap();

        assert!(content.contains("## Request"));
        assert!(content.contains("add retriever"));
        assert!(content.contains("## Completed"));
        assert!(content.contains("wrote retriever.rs"));
    }

    #[test]
    fn string_or_list_normalizes_single_string() {
        let lines = StringOrList::One("hello".to_string()).into_lines();
        assert_eq!(lines, vec!["hello".to_string()]);
    }
}
