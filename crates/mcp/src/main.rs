//! MCP stdio transport exposing Nexus filesystem operations as tools.
//!
//! Mirrors the teacher's JSON-RPC dispatch shape (`initialize` ->
//! `tools/list` -> `tools/call`, line-delimited over stdin/stdout) but
//! demonstrates the contract rather than reimplementing the full MCP
//! surface: tool glue, sessions and prompts/resources are out of scope
//! here, the façade call is the point.

use std::io::{self, BufRead, Write as IoWrite};
use std::sync::Arc;

use nexus_core::{NexusBuilder, NexusConfig, NexusError, OperationContext};
use nexus_core::permissions::CheckContext;

const PROTOCOL_VERSION: &str = "2025-06-18";

fn tool_definitions() -> serde_json::Value {
    let ro = serde_json::json!({ "readOnlyHint": true, "destructiveHint": false, "idempotentHint": true });
    let mutating = serde_json::json!({ "readOnlyHint": false, "destructiveHint": false, "idempotentHint": true });

    serde_json::json!([
        {
            "name": "nexus_read",
            "annotations": ro,
            "description": "Read the full contents of a file at a virtual path.",
            "inputSchema": { "type": "object", "properties": { "path": { "type": "string" } }, "required": ["path"] }
        },
        {
            "name": "nexus_write",
            "annotations": mutating,
            "description": "Write bytes to a virtual path, creating the file if it does not exist.",
            "inputSchema": { "type": "object", "properties": { "path": { "type": "string" }, "content": { "type": "string" } }, "required": ["path", "content"] }
        },
        {
            "name": "nexus_stat",
            "annotations": ro,
            "description": "Return size, modification time and content hash for a path.",
            "inputSchema": { "type": "object", "properties": { "path": { "type": "string" } }, "required": ["path"] }
        },
        {
            "name": "nexus_list",
            "annotations": ro,
            "description": "List directory entries under a path.",
            "inputSchema": { "type": "object", "properties": { "path": { "type": "string" }, "recursive": { "type": "boolean" } }, "required": ["path"] }
        },
        {
            "name": "nexus_glob",
            "annotations": ro,
            "description": "Find paths under a base directory matching a glob pattern (`*`, `**`, `?`).",
            "inputSchema": { "type": "object", "properties": { "pattern": { "type": "string" }, "base": { "type": "string" } }, "required": ["pattern", "base"] }
        },
        {
            "name": "nexus_grep",
            "annotations": ro,
            "description": "Search file contents under a base directory for lines matching a regex.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "base": { "type": "string" },
                    "ignore_case": { "type": "boolean" },
                    "file_pattern": { "type": "string" },
                    "max_results": { "type": "integer" }
                },
                "required": ["pattern", "base"]
            }
        },
        {
            "name": "nexus_mkdir",
            "annotations": mutating,
            "description": "Create a directory, optionally creating parent directories.",
            "inputSchema": { "type": "object", "properties": { "path": { "type": "string" }, "parents": { "type": "boolean" } }, "required": ["path"] }
        },
        {
            "name": "nexus_delete",
            "annotations": mutating,
            "description": "Delete a file.",
            "inputSchema": { "type": "object", "properties": { "path": { "type": "string" } }, "required": ["path"] }
        },
        {
            "name": "nexus_rename",
            "annotations": mutating,
            "description": "Move/rename a path, possibly across mounted backends.",
            "inputSchema": { "type": "object", "properties": { "from": { "type": "string" }, "to": { "type": "string" } }, "required": ["from", "to"] }
        }
    ])
}

fn caller_context() -> CheckContext {
    match std::env::var("NEXUS_SUBJECT") {
        Ok(subject) => CheckContext::user(subject),
        Err(_) => {
            let mut ctx = CheckContext::user("mcp-agent");
            ctx.is_system = true;
            ctx
        }
    }
}

fn handle_tool_call(nexus: &nexus_core::Nexus, name: &str, args: &serde_json::Value) -> (String, bool) {
    let mut ctx = OperationContext::new(caller_context());
    let result: Result<serde_json::Value, NexusError> = (|| {
        match name {
            "nexus_read" => {
                let path = args["path"].as_str().ok_or_else(|| NexusError::Validation("missing path".into()))?;
                let bytes = nexus.read(path, &mut ctx)?;
                Ok(serde_json::json!({ "content": String::from_utf8_lossy(&bytes) }))
            }
            "nexus_write" => {
                let path = args["path"].as_str().ok_or_else(|| NexusError::Validation("missing path".into()))?;
                let content = args["content"].as_str().unwrap_or("");
                let version = nexus.write(path, content.as_bytes(), &ctx)?;
                Ok(serde_json::json!({ "version": version }))
            }
            "nexus_stat" => {
                let path = args["path"].as_str().ok_or_else(|| NexusError::Validation("missing path".into()))?;
                let info = nexus.stat(path, &mut ctx)?;
                Ok(serde_json::json!({
                    "size": info.size,
                    "modified_at": info.modified_at,
                    "backend_version": info.backend_version,
                    "content_hash": info.content_hash,
                }))
            }
            "nexus_list" => {
                let path = args["path"].as_str().ok_or_else(|| NexusError::Validation("missing path".into()))?;
                let recursive = args["recursive"].as_bool().unwrap_or(false);
                let entries = nexus.list(path, recursive, &mut ctx)?;
                Ok(serde_json::json!(entries
                    .into_iter()
                    .map(|e| serde_json::json!({ "name": e.name, "is_directory": e.is_directory }))
                    .collect::<Vec<_>>()))
            }
            "nexus_glob" => {
                let pattern = args["pattern"].as_str().ok_or_else(|| NexusError::Validation("missing pattern".into()))?;
                let base = args["base"].as_str().unwrap_or("/");
                Ok(serde_json::json!(nexus.glob(pattern, base, &mut ctx)?))
            }
            "nexus_grep" => {
                let pattern = args["pattern"].as_str().ok_or_else(|| NexusError::Validation("missing pattern".into()))?;
                let base = args["base"].as_str().unwrap_or("/");
                let ignore_case = args["ignore_case"].as_bool().unwrap_or(false);
                let file_pattern = args["file_pattern"].as_str();
                let max_results = args["max_results"].as_u64().unwrap_or(100) as usize;
                let matches = nexus.grep(pattern, base, ignore_case, file_pattern, max_results, &mut ctx)?;
                Ok(serde_json::json!(matches
                    .into_iter()
                    .map(|m| serde_json::json!({ "path": m.path, "line_number": m.line_number, "line": m.line }))
                    .collect::<Vec<_>>()))
            }
            "nexus_mkdir" => {
                let path = args["path"].as_str().ok_or_else(|| NexusError::Validation("missing path".into()))?;
                let parents = args["parents"].as_bool().unwrap_or(false);
                nexus.mkdir(path, parents, true, &ctx)?;
                Ok(serde_json::json!({ "ok": true }))
            }
            "nexus_delete" => {
                let path = args["path"].as_str().ok_or_else(|| NexusError::Validation("missing path".into()))?;
                nexus.delete(path, &ctx)?;
                Ok(serde_json::json!({ "ok": true }))
            }
            "nexus_rename" => {
                let from = args["from"].as_str().ok_or_else(|| NexusError::Validation("missing from".into()))?;
                let to = args["to"].as_str().ok_or_else(|| NexusError::Validation("missing to".into()))?;
                nexus.rename(from, to, &ctx)?;
                Ok(serde_json::json!({ "ok": true }))
            }
            other => Err(NexusError::Validation(format!("unknown tool {other}"))),
        }
    })();

    match result {
        Ok(value) => (value.to_string(), false),
        Err(e) => (e.to_string(), true),
    }
}

fn dispatch_jsonrpc(nexus: &nexus_core::Nexus, msg: &serde_json::Value) -> Option<serde_json::Value> {
    let method = msg["method"].as_str().unwrap_or("");
    let id = msg.get("id").cloned();
    if id.is_none() || method.starts_with("notifications/") {
        return None;
    }

    let response = match method {
        "initialize" => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": "nexus", "version": env!("CARGO_PKG_VERSION") },
                "instructions": "Nexus exposes a virtual filesystem over read/write/stat/list/glob/grep tools."
            }
        }),
        "tools/list" => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "tools": tool_definitions() }
        }),
        "tools/call" => {
            let tool_name = msg["params"]["name"].as_str().unwrap_or("");
            let arguments = msg["params"].get("arguments").cloned().unwrap_or(serde_json::json!({}));
            let (text, is_error) = handle_tool_call(nexus, tool_name, &arguments);
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{ "type": "text", "text": text }], "isError": is_error }
            })
        }
        "ping" => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        _ => serde_json::json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32601, "message": "Method not found" } }),
    };
    Some(response)
}

fn run_mcp(nexus: Arc<nexus_core::Nexus>) {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let reader = stdin.lock();
    let mut initialized = false;

    tracing::info!("nexus-mcp ready");

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                let err = serde_json::json!({ "jsonrpc": "2.0", "id": null, "error": { "code": -32700, "message": "Parse error" } });
                let mut out = stdout.lock();
                let _ = writeln!(out, "{err}");
                let _ = out.flush();
                continue;
            }
        };

        let method = msg["method"].as_str().unwrap_or("");
        if method == "notifications/initialized" {
            continue;
        }
        if !initialized && method != "initialize" && method != "ping" {
            if let Some(id) = msg.get("id").cloned() {
                let err = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32002, "message": "Server not initialized. Send 'initialize' first." }
                });
                let mut out = stdout.lock();
                let _ = writeln!(out, "{}", serde_json::to_string(&err).unwrap());
                let _ = out.flush();
            }
            continue;
        }

        if let Some(response) = dispatch_jsonrpc(&nexus, &msg) {
            if method == "initialize" {
                initialized = true;
            }
            let mut out = stdout.lock();
            let _ = writeln!(out, "{}", serde_json::to_string(&response).unwrap());
            let _ = out.flush();
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config_path = std::env::var("NEXUS_CONFIG").unwrap_or_else(|_| "nexus.toml".to_string());
    let config = NexusConfig::load(&config_path).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to load config, using defaults");
        NexusConfig::default()
    });

    let nexus = match NexusBuilder::new(config).build() {
        Ok(n) => Arc::new(n),
        Err(e) => {
            eprintln!("failed to initialize nexus: {e}");
            std::process::exit(1);
        }
    };

    run_mcp(nexus);
}
