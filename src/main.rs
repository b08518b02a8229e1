use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use memstack::config::{load_config, Config};
use memstack::memory::{ContextPatch, InsightEntry, PlanTaskEntry, SessionEntry, TaskUpdate};
use memstack::models::SearchResult;
use memstack::{db, export, import_md, indexer, memory, migrate, searcher};

#[derive(Parser)]
#[command(name = "memstack")]
#[command(about = "Local-first memory store for development sessions")]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true, default_value = "./memstack.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply the schema
    Init,
    /// Build or update the semantic index over memory files
    Index {
        /// Drop the existing index and rebuild from scratch
        #[arg(long)]
        force: bool,
    },
    /// Semantic search over indexed memory
    Search {
        query: String,
        /// Number of results to return
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Print raw JSON results
        #[arg(long)]
        json: bool,
    },
    /// Session records
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Insight records
    Insight {
        #[command(subcommand)]
        command: InsightCommands,
    },
    /// Per-project context
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },
    /// Plan tasks
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Keyword search across sessions and insights
    Find {
        query: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Export a project's memory as markdown
    Export { project: String },
    /// Database statistics
    Stats,
    /// Import markdown session files into the database
    Migrate,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Add a session from a JSON payload
    Add { json: String },
    /// List recent sessions
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum InsightCommands {
    /// Add an insight from a JSON payload
    Add { json: String },
    /// List insights
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum ContextCommands {
    /// Show a project's context
    Get { project: String },
    /// Merge a JSON patch into a project's context
    Set { json: String },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Add or replace a plan task from a JSON payload
    Add { json: String },
    /// Show a project's plan
    Show { project: String },
    /// Patch one task from a JSON payload
    Update {
        project: String,
        task_number: i64,
        json: String,
    },
}

fn parse_json_arg<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("Invalid JSON input: {}", e))
}

fn print_payload(payload: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(payload).unwrap_or_default());
}

fn format_results(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!(
            "**[{}] {}** {} ({})\n",
            i + 1,
            result.project,
            result.date,
            result.kind
        ));
        out.push_str(&format!("  Section: {}\n", result.section_title));
        out.push_str(&format!("  Score: {}\n", result.score));

        let content = if result.content.chars().count() > 300 {
            let cut: String = result.content.chars().take(300).collect();
            format!("{}...", cut)
        } else {
            result.content.clone()
        };
        out.push_str(&format!("  {}\n", content.replace('\n', "\n  ")));
        out.push_str(&format!("  Source: {}\n", result.source));
        out.push_str("  ---\n");
    }
    out
}

async fn run(cli: Cli) -> Result<()> {
    let config: Config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::apply_schema(&pool).await?;
            print_payload(&json!({
                "ok": true,
                "db_path": config.db.path.display().to_string(),
            }));
        }
        Commands::Index { force } => {
            let report = indexer::run_index(&config, force).await?;
            let mut payload = serde_json::to_value(&report)?;
            payload["ok"] = json!(true);
            print_payload(&payload);
        }
        Commands::Search { query, top_k, json } => {
            let results = searcher::run_search(&config, &query, top_k).await?;
            if json {
                print_payload(&serde_json::to_value(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                print!("{}", format_results(&results));
            }
        }
        Commands::Session { command } => {
            let pool = db::connect(&config).await?;
            match command {
                SessionCommands::Add { json: raw } => {
                    let entry: SessionEntry = parse_json_arg(&raw)?;
                    if entry.project.is_empty() {
                        bail!("Session requires a project");
                    }
                    let id = memory::add_session(&pool, &entry).await?;
                    print_payload(&json!({"ok": true, "id": id}));
                }
                SessionCommands::List { project, limit } => {
                    let sessions = memory::get_sessions(&pool, project.as_deref(), limit).await?;
                    print_payload(&json!({
                        "count": sessions.len(),
                        "sessions": sessions,
                    }));
                }
            }
        }
        Commands::Insight { command } => {
            let pool = db::connect(&config).await?;
            match command {
                InsightCommands::Add { json: raw } => {
                    let entry: InsightEntry = parse_json_arg(&raw)?;
                    if entry.content.is_empty() {
                        bail!("Insight requires content");
                    }
                    let id = memory::add_insight(&pool, &entry).await?;
                    print_payload(&json!({"ok": true, "id": id}));
                }
                InsightCommands::List { project, limit } => {
                    let insights = memory::get_insights(&pool, project.as_deref(), limit).await?;
                    print_payload(&json!({
                        "count": insights.len(),
                        "insights": insights,
                    }));
                }
            }
        }
        Commands::Context { command } => {
            let pool = db::connect(&config).await?;
            match command {
                ContextCommands::Get { project } => match memory::get_context(&pool, &project)
                    .await?
                {
                    Some(context) => print_payload(&context),
                    None => print_payload(&json!({
                        "project": project,
                        "status": "no context saved",
                    })),
                },
                ContextCommands::Set { json: raw } => {
                    let patch: ContextPatch = parse_json_arg(&raw)?;
                    if patch.project.is_empty() {
                        bail!("Context requires a project");
                    }
                    memory::set_context(&pool, &patch).await?;
                    print_payload(&json!({"ok": true, "project": patch.project}));
                }
            }
        }
        Commands::Plan { command } => {
            let pool = db::connect(&config).await?;
            match command {
                PlanCommands::Add { json: raw } => {
                    let entry: PlanTaskEntry = parse_json_arg(&raw)?;
                    if entry.project.is_empty() || entry.description.is_empty() {
                        bail!("Plan task requires a project and description");
                    }
                    memory::add_plan_task(&pool, &entry).await?;
                    print_payload(&json!({
                        "ok": true,
                        "project": entry.project,
                        "task_number": entry.task_number,
                    }));
                }
                PlanCommands::Show { project } => {
                    let (tasks, done, total) = memory::get_plan(&pool, &project).await?;
                    print_payload(&json!({
                        "project": project,
                        "tasks": tasks,
                        "done": done,
                        "total": total,
                    }));
                }
                PlanCommands::Update {
                    project,
                    task_number,
                    json: raw,
                } => {
                    let update: TaskUpdate = parse_json_arg(&raw)?;
                    let updated = memory::update_task(&pool, &project, task_number, &update).await?;
                    if !updated {
                        bail!("Task not found: {} #{}", project, task_number);
                    }
                    print_payload(&json!({
                        "ok": true,
                        "project": project,
                        "task_number": task_number,
                    }));
                }
            }
        }
        Commands::Find {
            query,
            project,
            limit,
        } => {
            let pool = db::connect(&config).await?;
            let results = memory::find(&pool, &query, project.as_deref(), limit).await?;
            print_payload(&json!({
                "count": results.len(),
                "results": results,
            }));
        }
        Commands::Export { project } => {
            let pool = db::connect(&config).await?;
            let markdown = export::export_markdown(&pool, &project).await?;
            print!("{}", markdown);
        }
        Commands::Stats => {
            let pool = db::connect(&config).await?;
            let stats = memory::stats(&pool, &config.db.path).await?;
            print_payload(&stats);
        }
        Commands::Migrate => {
            let payload = import_md::run_import(&config).await?;
            print_payload(&payload);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        let payload = json!({"ok": false, "error": e.to_string()});
        eprintln!("{}", payload);
        std::process::exit(1);
    }
}
