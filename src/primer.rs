//! `PRIMER.md` assembly for the `primer` verb: a compact cold-start
//! context built from five Markdown primitives across both scopes. A thin
//! renderer, not a search — it reads whole files, it doesn't query the
//! Store.

use std::fs;
use std::path::Path;

use anyhow::Result;

use crate::config::ProjectConfig;
use crate::memory::markdown;
use crate::memory::retriever::sort_journal_filenames_desc;
use crate::tasks;

const RECENT_JOURNAL_DAYS: usize = 3;

fn read_optional(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().filter(|s| !s.trim().is_empty())
}

/// Bullets under an ATX-2 `heading` in `content` (used to pull "Completed"
/// entries back out of a journal file written by `session::append_session`).
fn section_bullets(content: &str, heading: &str) -> Vec<String> {
    let target = format!("## {}", heading);
    let mut out = Vec::new();
    let mut in_section = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed == target {
            in_section = true;
            continue;
        }
        if trimmed.starts_with("## ") {
            in_section = false;
            continue;
        }
        if in_section && trimmed.starts_with("- ") && trimmed != "- (none)" {
            out.push(trimmed.trim_start_matches("- ").to_string());
        }
    }
    out
}

fn recent_completed(project_root: &Path) -> Vec<String> {
    let journal_dir = project_root.join("journal");
    let Ok(entries) = fs::read_dir(&journal_dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.ends_with(".md"))
        .collect();
    sort_journal_filenames_desc(&mut names);

    let mut bullets = Vec::new();
    for name in names.into_iter().take(RECENT_JOURNAL_DAYS) {
        let Some(content) = read_optional(&journal_dir.join(&name)) else {
            continue;
        };
        bullets.extend(section_bullets(&content, "Completed"));
    }
    bullets
}

fn render_section(title: &str, body: Option<&str>) -> String {
    match body {
        Some(b) if !b.trim().is_empty() => format!("\n## {}\n\n{}\n", title, b.trim()),
        _ => format!("\n## {}\n\n(none)\n", title),
    }
}

fn render_bullet_section(title: &str, bullets: &[String]) -> String {
    if bullets.is_empty() {
        format!("\n## {}\n\n(none)\n", title)
    } else {
        let body: String = bullets.iter().map(|b| format!("- {}\n", b)).collect();
        format!("\n## {}\n\n{}", title, body)
    }
}

/// Assemble PRIMER.md's body from the global scope's `user/` files, the
/// project's config, the last three days of journal "Completed" bullets,
/// and the non-done entries in TASKS.md.
pub fn render(
    global_root: &Path,
    project_root: &Path,
    project_config: &ProjectConfig,
) -> Result<String> {
    let instructions = read_optional(&global_root.join("user/instructions.md"));
    let entities = read_optional(&global_root.join("user/entities.md"));
    let preferences = read_optional(&global_root.join("user/preferences.md"));

    let project_body = match (&project_config.name, &project_config.description) {
        (Some(name), Some(desc)) => Some(format!("{}\n\n{}", name, desc)),
        (Some(name), None) => Some(name.clone()),
        (None, Some(desc)) => Some(desc.clone()),
        (None, None) => None,
    };

    let recent = recent_completed(project_root);
    let active_tasks = tasks::active_task_lines(project_root).unwrap_or_default();

    let mut out = String::from("# Primer\n");
    out.push_str(&render_section("Instructions", instructions.as_deref()));
    out.push_str(&render_section("User Identity", entities.as_deref()));
    out.push_str(&render_section("Project", project_body.as_deref()));
    out.push_str(&render_section("Preferences", preferences.as_deref()));
    out.push_str(&render_bullet_section("Recent Context", &recent));
    out.push_str(&render_bullet_section("Active Tasks", &active_tasks));

    Ok(out)
}

/// Render and write `<project_root>/PRIMER.md`.
pub fn write(global_root: &Path, project_root: &Path, project_config: &ProjectConfig) -> Result<()> {
    let content = render(global_root, project_root, project_config)?;
    markdown::write_atomic(&project_root.join("PRIMER.md"), &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn render_includes_all_sections_even_when_empty() {
        let global = tempdir().unwrap();
        let project = tempdir().unwrap();
        let content = render(global.path(), project.path(), &ProjectConfig::default()).unwrap();

        assert!(content.contains("## Instructions"));
        assert!(content.contains("## User Identity"));
        assert!(content.contains("## Project"));
        assert!(content.contains("## Preferences"));
        assert!(content.contains("## Recent Context"));
        assert!(content.contains("## Active Tasks"));
    }

    #[test]
    fn render_pulls_preferences_and_recent_completed() {
        let global = tempdir().unwrap();
        let project = tempdir().unwrap();
        fs::create_dir_all(global.path().join("user")).unwrap();
        fs::write(
            global.path().join("user/preferences.md"),
            "---\ntype: preference\n---\n## Preferences\n\n- likes rust\n",
        )
        .unwrap();

        fs::create_dir_all(project.path().join("journal")).unwrap();
        fs::write(
            project.path().join("journal/2026-07-29.md"),
            "---\ntype: journal\n---\n## Completed\n\n- wrote retriever.rs\n",
        )
        .unwrap();

        let content = render(global.path(), project.path(), &ProjectConfig::default()).unwrap();
        assert!(content.contains("likes rust"));
        assert!(content.contains("wrote retriever.rs"));
    }
}
