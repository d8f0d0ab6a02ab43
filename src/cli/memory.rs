//! `openclaw-memory memory <subcommand>`: direct, synchronous access to the
//! six verbs without going through the stdio server.

use std::io::Read as _;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::memory::MemoryEngine;
use crate::session::SessionEndRequest;
use crate::tasks::TaskUpdate;

#[derive(Args)]
pub struct MemoryArgs {
    #[command(subcommand)]
    pub command: MemoryCommands,
}

#[derive(Subcommand)]
pub enum MemoryCommands {
    /// Print the assembled PRIMER.md
    Primer,

    /// Search memory
    Search {
        /// Search query
        query: String,

        /// Scope filter: global, project, journal, agent, or user
        #[arg(short, long)]
        scope: Option<String>,

        /// Token budget for the result set
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Save a memory
    Log {
        /// The content to remember
        content: String,

        /// Type hint: instruction, decision, pattern, preference, entity, journal
        #[arg(long = "type")]
        type_hint: Option<String>,
    },

    /// Read a scope-relative Markdown file verbatim
    Read {
        /// Path relative to its scope root, e.g. user/preferences.md
        path: String,
    },

    /// Append a session summary to today's journal
    SessionEnd {
        #[arg(long)]
        request: Vec<String>,
        #[arg(long)]
        learned: Vec<String>,
        #[arg(long)]
        completed: Vec<String>,
        #[arg(long = "next-step")]
        next_steps: Vec<String>,
    },

    /// Replace TASKS.md from a JSON array of task updates
    /// (read from --json-file, or stdin with `-`)
    UpdateTasks {
        #[arg(long = "json-file")]
        json_file: Option<String>,
    },

    /// Reindex all memory files for both scopes
    Reindex,

    /// Show memory statistics for both scopes
    Stats,
}

pub async fn run(args: MemoryArgs, config: Config, project_dir: &Path) -> Result<()> {
    let engine = MemoryEngine::open(config, project_dir)?;

    match args.command {
        MemoryCommands::Primer => {
            println!("{}", engine.primer().await?);
        }
        MemoryCommands::Search { query, scope, max_tokens } => {
            let response = engine.search(&query, scope.as_deref(), max_tokens).await?;
            println!("{}", crate::memory::retriever::format_search_response(&response));
        }
        MemoryCommands::Log { content, type_hint } => {
            let outcome = engine.log(&content, type_hint.as_deref()).await?;
            println!("{}", outcome.render());
        }
        MemoryCommands::Read { path } => {
            println!("{}", engine.read(&path).await?);
        }
        MemoryCommands::SessionEnd {
            request,
            learned,
            completed,
            next_steps,
        } => {
            let req = SessionEndRequest {
                request: to_string_or_list(request),
                learned: to_string_or_list(learned),
                completed: to_string_or_list(completed),
                next_steps: to_string_or_list(next_steps),
            };
            println!("{}", engine.session_end(req).await?);
        }
        MemoryCommands::UpdateTasks { json_file } => {
            let body = match json_file.as_deref() {
                Some("-") | None => {
                    let mut s = String::new();
                    std::io::stdin().read_to_string(&mut s)?;
                    s
                }
                Some(path) => {
                    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?
                }
            };
            let updates: Vec<TaskUpdate> =
                serde_json::from_str(&body).context("expected a JSON array of task updates")?;
            println!("{}", engine.update_tasks(updates).await?);
        }
        MemoryCommands::Reindex => {
            let (global, project) = engine.reindex_all().await?;
            println!("global: {} files, {} chunks", global.files_scanned, global.chunks_indexed);
            println!("project: {} files, {} chunks", project.files_scanned, project.chunks_indexed);
        }
        MemoryCommands::Stats => {
            let (global, project) = engine.stats().await?;
            println!("global:  {} chunks, {} tokens", global.total_chunks, global.total_tokens);
            println!("project: {} chunks, {} tokens", project.total_chunks, project.total_tokens);
        }
    }

    Ok(())
}

fn to_string_or_list(values: Vec<String>) -> Option<crate::session::StringOrList> {
    if values.is_empty() {
        None
    } else {
        Some(crate::session::StringOrList::Many(values))
    }
}
