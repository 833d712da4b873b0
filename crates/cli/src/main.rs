//! Nexus CLI — a thin shell over `nexus_core::Nexus`: builds an
//! instance from config/flags and dispatches straight to façade
//! operations. No server overhead, no argument-parsing UX beyond what
//! proves the façade is usable from a terminal.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nexus_core::permissions::CheckContext;
use nexus_core::{NexusBuilder, NexusConfig, NexusError, OperationContext};

/// Nexus CLI — read, write and search the virtual filesystem.
#[derive(Parser)]
#[command(name = "nexus", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to ./nexus.toml, falling back to built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Acting subject (defaults to a system-bypass identity for local use)
    #[arg(long, global = true)]
    subject: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a file's contents
    Read { path: String },
    /// Write content to a path, creating it if needed
    Write { path: String, content: String },
    /// Show size, modification time and content hash for a path
    Stat { path: String },
    /// List directory entries
    List {
        path: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Find paths matching a glob pattern
    Glob {
        pattern: String,
        #[arg(long, default_value = "/")]
        base: String,
    },
    /// Search file contents for a regex pattern
    Grep {
        pattern: String,
        #[arg(long, default_value = "/")]
        base: String,
        #[arg(long)]
        ignore_case: bool,
        #[arg(long)]
        file_pattern: Option<String>,
        #[arg(long, default_value = "100")]
        max_results: usize,
    },
    /// Create a directory
    Mkdir {
        path: String,
        #[arg(long)]
        parents: bool,
    },
    /// Delete a file
    Delete { path: String },
    /// Move/rename a path
    Rename { from: String, to: String },
}

fn die(err: NexusError) -> ! {
    eprintln!("nexus: {err}");
    std::process::exit(1);
}

fn caller_context(subject: Option<String>) -> CheckContext {
    match subject {
        Some(s) => CheckContext::user(s),
        None => {
            let mut ctx = CheckContext::user("cli");
            ctx.is_system = true;
            ctx
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("nexus=warn".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from("nexus.toml"));
    let config = NexusConfig::load(&config_path).unwrap_or_else(|e| die(e));

    let nexus = NexusBuilder::new(config).build().unwrap_or_else(|e| die(e));
    let mut op = OperationContext::new(caller_context(cli.subject));

    match cli.command {
        Commands::Read { path } => {
            let bytes = nexus.read(&path, &mut op).unwrap_or_else(|e| die(e));
            let text = String::from_utf8_lossy(&bytes);
            if cli.json {
                println!("{}", serde_json::json!({ "path": path, "content": text }));
            } else {
                print!("{text}");
            }
        }
        Commands::Write { path, content } => {
            let version = nexus.write(&path, content.as_bytes(), &op).unwrap_or_else(|e| die(e));
            if cli.json {
                println!("{}", serde_json::json!({ "path": path, "version": version }));
            } else {
                println!("wrote {path} (version {version})");
            }
        }
        Commands::Stat { path } => {
            let info = nexus.stat(&path, &mut op).unwrap_or_else(|e| die(e));
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "path": path,
                        "size": info.size,
                        "modified_at": info.modified_at,
                        "backend_version": info.backend_version,
                        "content_hash": info.content_hash,
                    })
                );
            } else {
                println!("path:            {path}");
                println!("size:            {}", info.size);
                println!("modified_at:     {:?}", info.modified_at);
                println!("backend_version: {:?}", info.backend_version);
                println!("content_hash:    {:?}", info.content_hash);
            }
        }
        Commands::List { path, recursive } => {
            let entries = nexus.list(&path, recursive, &mut op).unwrap_or_else(|e| die(e));
            if cli.json {
                let items: Vec<_> = entries
                    .iter()
                    .map(|e| serde_json::json!({ "name": e.name, "is_directory": e.is_directory }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items).unwrap());
            } else {
                for entry in &entries {
                    let marker = if entry.is_directory { "/" } else { "" };
                    println!("{}{}", entry.name, marker);
                }
            }
        }
        Commands::Glob { pattern, base } => {
            let matches = nexus.glob(&pattern, &base, &mut op).unwrap_or_else(|e| die(e));
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&matches).unwrap());
            } else {
                for m in &matches {
                    println!("{m}");
                }
            }
        }
        Commands::Grep { pattern, base, ignore_case, file_pattern, max_results } => {
            let matches = nexus
                .grep(&pattern, &base, ignore_case, file_pattern.as_deref(), max_results, &mut op)
                .unwrap_or_else(|e| die(e));
            if cli.json {
                let items: Vec<_> = matches
                    .iter()
                    .map(|m| serde_json::json!({ "path": m.path, "line": m.line_number, "text": m.line }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items).unwrap());
            } else {
                if matches.is_empty() {
                    eprintln!("No matches for '{pattern}'");
                    std::process::exit(1);
                }
                for m in &matches {
                    println!("{}:{}: {}", m.path, m.line_number, m.line);
                }
                eprintln!("\n{} matches", matches.len());
            }
        }
        Commands::Mkdir { path, parents } => {
            nexus.mkdir(&path, parents, true, &op).unwrap_or_else(|e| die(e));
            if cli.json {
                println!("{}", serde_json::json!({ "path": path, "ok": true }));
            } else {
                println!("created {path}");
            }
        }
        Commands::Delete { path } => {
            nexus.delete(&path, &op).unwrap_or_else(|e| die(e));
            if cli.json {
                println!("{}", serde_json::json!({ "path": path, "ok": true }));
            } else {
                println!("deleted {path}");
            }
        }
        Commands::Rename { from, to } => {
            nexus.rename(&from, &to, &op).unwrap_or_else(|e| die(e));
            if cli.json {
                println!("{}", serde_json::json!({ "from": from, "to": to, "ok": true }));
            } else {
                println!("renamed {from} -> {to}");
            }
        }
    }
}
