//! `TASKS.md` rendering for the `update_tasks` verb. A thin template
//! renderer over the Markdown primitives in `memory::markdown` — the
//! Writer/Retriever never see this file since it's excluded from
//! indexing (see `memory::indexer::EXCLUDED_FILES`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Done,
    Pending,
    InProgress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub next_step: Option<String>,
    #[serde(default)]
    pub related_files: Option<Vec<String>>,
}

fn render_task_line(task: &TaskUpdate) -> String {
    let mut line = format!("- **{}**", task.title);
    if let Some(progress) = &task.progress {
        line.push_str(&format!(" — {}", progress));
    }
    if let Some(next_step) = &task.next_step {
        line.push_str(&format!("; next: {}", next_step));
    }
    if let Some(files) = &task.related_files
        && !files.is_empty()
    {
        line.push_str(&format!(" (files: {})", files.join(", ")));
    }
    line
}

/// Render a full `TASKS.md` body from the current set of tasks, grouped
/// by status.
pub fn render_tasks(tasks: &[TaskUpdate]) -> String {
    let in_progress: Vec<_> = tasks.iter().filter(|t| t.status == TaskStatus::InProgress).collect();
    let pending: Vec<_> = tasks.iter().filter(|t| t.status == TaskStatus::Pending).collect();
    let done: Vec<_> = tasks.iter().filter(|t| t.status == TaskStatus::Done).collect();

    let mut out = format!(
        "---\nupdated: {}\n---\n# Tasks\n",
        Utc::now().to_rfc3339()
    );

    out.push_str("\n## In Progress\n");
    if in_progress.is_empty() {
        out.push_str("(none)\n");
    } else {
        for t in &in_progress {
            out.push_str(&render_task_line(t));
            out.push('\n');
        }
    }

    out.push_str("\n## Pending\n");
    if pending.is_empty() {
        out.push_str("(none)\n");
    } else {
        for t in &pending {
            out.push_str(&render_task_line(t));
            out.push('\n');
        }
    }

    out.push_str("\n## Done\n");
    if done.is_empty() {
        out.push_str("(none)\n");
    } else {
        for t in &done {
            out.push_str(&render_task_line(t));
            out.push('\n');
        }
    }

    out
}

/// Overwrite `<project_root>/TASKS.md` with the rendered task list.
pub fn write_tasks(project_root: &Path, tasks: &[TaskUpdate]) -> Result<()> {
    let path = project_root.join("TASKS.md");
    let content = render_tasks(tasks);
    crate::memory::markdown::write_atomic(&path, &content)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Lines under "In Progress" or "Pending" — the set the primer's "Active
/// Tasks" section surfaces.
pub fn active_task_lines(project_root: &Path) -> Result<Vec<String>> {
    let path = project_root.join("TASKS.md");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path)?;
    let mut lines = Vec::new();
    let mut in_active_section = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed == "## In Progress" || trimmed == "## Pending" {
            in_active_section = true;
            continue;
        }
        if trimmed.starts_with("## ") {
            in_active_section = false;
            continue;
        }
        if in_active_section && trimmed.starts_with("- ") {
            lines.push(trimmed.to_string());
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn task(title: &str, status: TaskStatus) -> TaskUpdate {
        TaskUpdate {
            title: title.to_string(),
            status,
            progress: None,
            next_step: None,
            related_files: None,
        }
    }

    #[test]
    fn render_groups_by_status() {
        let tasks = vec![
            task("write retriever", TaskStatus::Done),
            task("write watcher", TaskStatus::InProgress),
            task("write cli", TaskStatus::Pending),
        ];
        let rendered = render_tasks(&tasks);
        assert!(rendered.contains("## In Progress"));
        assert!(rendered.contains("write watcher"));
        assert!(rendered.contains("## Done"));
        assert!(rendered.contains("write retriever"));
    }

    #[test]
    fn active_task_lines_excludes_done() {
        let dir = tempdir().unwrap();
        let tasks = vec![
            task("a", TaskStatus::InProgress),
            task("b", TaskStatus::Done),
        ];
        write_tasks(dir.path(), &tasks).unwrap();

        let active = active_task_lines(dir.path()).unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].contains('a'));
    }
}
