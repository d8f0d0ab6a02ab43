//! OpenClaw Memory - a local, per-user/per-project memory service for AI
//! coding agents.
//!
//! This crate provides:
//! - The memory engine: dual-scope Markdown-backed storage, a write
//!   pipeline (quality/privacy gates, routing, similarity branching), and a
//!   read pipeline (fast-path shortcuts, journal timeline, hybrid search).
//! - A filesystem watcher keeping the SQLite index in sync with on-disk
//!   Markdown.
//! - A CLI exposing the six verbs directly and over a stdio JSON-RPC loop.

pub mod cli;
pub mod concurrency;
pub mod config;
pub mod memory;
pub mod paths;
pub mod primer;
pub mod session;
pub mod tasks;

pub use config::Config;
pub use memory::MemoryEngine;
