//! `openclaw-memory paths`: prints all resolved XDG-compliant ambient paths
//! plus both memory scopes' roots, for debugging and scripting.

use std::path::Path;

use anyhow::Result;

use crate::memory::scope::Scope;
use crate::paths::Paths;

pub fn run(project_dir: &Path) -> Result<()> {
    let paths = Paths::resolve()?;

    println!("OpenClaw Memory Paths (XDG Base Directory)");
    println!("===========================================");
    println!();
    println!("Config:  {}", paths.config_dir.display());
    println!("  config.toml: {}", paths.config_file().display());
    println!();
    println!("Data:    {}", paths.data_dir.display());
    println!();
    println!("State:   {}", paths.state_dir.display());
    println!("  logs:        {}", paths.logs_dir().display());
    println!();
    println!("Cache:   {}", paths.cache_dir.display());
    println!("  embeddings:  {}", paths.embedding_cache_dir().display());
    println!();
    match &paths.runtime_dir {
        Some(dir) => println!("Runtime: {}", dir.display()),
        None => println!("Runtime: (not available)"),
    }
    println!();
    println!("Memory scopes:");
    println!("  global:  {}", Scope::Global.root(&paths, project_dir).display());
    println!("  project: {}", Scope::Project.root(&paths, project_dir).display());

    Ok(())
}
