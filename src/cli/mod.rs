//! CLI surface: a `clap` parser dispatching to the memory verbs, the stdio
//! JSON-RPC server, and the ambient config/paths subcommands.

pub mod config;
pub mod memory;
pub mod paths;
pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "openclaw-memory")]
#[command(author, version, about = "Local memory service for AI coding agents")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory; defaults to the current working directory
    #[arg(short, long, global = true, env = "OPENCLAW_PROJECT_DIR")]
    pub project: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Memory operations: primer, search, log, read, session-end,
    /// update-tasks, reindex, stats
    Memory(memory::MemoryArgs),

    /// Run the stdio JSON-RPC server exposing the six memory verbs
    Serve,

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG and memory-scope paths
    Paths,
}
