//! `openclaw-memory serve`: a stdio JSON-RPC loop (MCP `tools/list` +
//! `tools/call` shape) exposing the six memory verbs to an agent host.

use std::path::Path;

use anyhow::Result;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::Config;
use crate::memory::MemoryEngine;
use crate::session::{SessionEndRequest, StringOrList};
use crate::tasks::TaskUpdate;

fn tool_list(id: serde_json::Value) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "tools": [
                {
                    "name": "primer",
                    "description": "Return the assembled cold-start context (PRIMER.md)",
                    "inputSchema": { "type": "object", "properties": {} }
                },
                {
                    "name": "search",
                    "description": "Search memory: fast-path file shortcuts, journal timeline, or hybrid ranked search",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "query": { "type": "string" },
                            "scope": { "type": "string" },
                            "max_tokens": { "type": "integer", "exclusiveMinimum": 0 }
                        },
                        "required": ["query"]
                    }
                },
                {
                    "name": "log",
                    "description": "Save a memory, routing it through the quality/privacy gates and similarity branch",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string" },
                            "type_hint": { "type": "string" }
                        },
                        "required": ["content"]
                    }
                },
                {
                    "name": "session_end",
                    "description": "Append a session summary to today's journal and refresh PRIMER.md",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "request": {},
                            "learned": {},
                            "completed": {},
                            "next_steps": {}
                        }
                    }
                },
                {
                    "name": "update_tasks",
                    "description": "Replace TASKS.md with the given task list and refresh PRIMER.md",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "tasks": { "type": "array" }
                        },
                        "required": ["tasks"]
                    }
                },
                {
                    "name": "read",
                    "description": "Read a scope-relative Markdown file verbatim",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "path": { "type": "string" } },
                        "required": ["path"]
                    }
                }
            ]
        }
    })
}

fn ok(id: serde_json::Value, text: String) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "content": [{ "type": "text", "text": text }], "isError": false }
    })
}

fn err(id: serde_json::Value, text: String) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "content": [{ "type": "text", "text": text }], "isError": true }
    })
}

fn string_or_list_from(value: Option<&serde_json::Value>) -> Option<StringOrList> {
    match value {
        Some(serde_json::Value::String(s)) => Some(StringOrList::One(s.clone())),
        Some(serde_json::Value::Array(items)) => Some(StringOrList::Many(
            items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        )),
        _ => None,
    }
}

async fn call_tool(engine: &MemoryEngine, id: serde_json::Value, params: &serde_json::Value) -> serde_json::Value {
    let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    match name {
        "primer" => match engine.primer().await {
            Ok(text) => ok(id, text),
            Err(e) => err(id, e.to_string()),
        },
        "search" => {
            let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
                return err(id, "missing query".to_string());
            };
            let scope = args.get("scope").and_then(|v| v.as_str());
            let max_tokens = args.get("max_tokens").and_then(|v| v.as_u64()).map(|n| n as usize);
            match engine.search(query, scope, max_tokens).await {
                Ok(response) => ok(id, crate::memory::retriever::format_search_response(&response)),
                Err(e) => err(id, e.to_string()),
            }
        }
        "log" => {
            let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
                return err(id, "missing content".to_string());
            };
            let type_hint = args.get("type_hint").and_then(|v| v.as_str());
            match engine.log(content, type_hint).await {
                Ok(outcome) => ok(id, outcome.render()),
                Err(e) => err(id, e.to_string()),
            }
        }
        "session_end" => {
            let req = SessionEndRequest {
                request: string_or_list_from(args.get("request")),
                learned: string_or_list_from(args.get("learned")),
                completed: string_or_list_from(args.get("completed")),
                next_steps: string_or_list_from(args.get("next_steps")),
            };
            match engine.session_end(req).await {
                Ok(text) => ok(id, text),
                Err(e) => err(id, e.to_string()),
            }
        }
        "update_tasks" => {
            let Some(raw_tasks) = args.get("tasks") else {
                return err(id, "missing tasks".to_string());
            };
            match serde_json::from_value::<Vec<TaskUpdate>>(raw_tasks.clone()) {
                Ok(updates) => match engine.update_tasks(updates).await {
                    Ok(text) => ok(id, text),
                    Err(e) => err(id, e.to_string()),
                },
                Err(e) => err(id, format!("invalid tasks: {e}")),
            }
        }
        "read" => {
            let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
                return err(id, "missing path".to_string());
            };
            match engine.read(path).await {
                Ok(content) => ok(id, content),
                Err(e) => err(id, e.to_string()),
            }
        }
        _ => err(id, format!("tool not found: {name}")),
    }
}

/// Run the stdio JSON-RPC loop until stdin closes.
pub async fn run(config: Config, project_dir: &Path) -> Result<()> {
    let engine = MemoryEngine::open(config, project_dir)?;
    let _watchers = engine.start_watchers()?;

    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let id = msg.get("id").cloned().unwrap_or(json!(null));
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let reply = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!("2024-11-05")),
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": "openclaw-memory", "version": env!("CARGO_PKG_VERSION") }
                }
            }),
            "tools/list" => tool_list(id),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                call_tool(&engine, id, &params).await
            }
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "Method not found" }
            }),
        };

        let rendered = serde_json::to_string(&reply)?;
        stdout.write_all(rendered.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}
