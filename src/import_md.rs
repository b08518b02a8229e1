//! One-shot migration of markdown session files into the relational
//! store.
//!
//! Session files are named `YYYY-MM-DD-<project>.md`; anything else is
//! skipped, as are the format-template files. A file already imported for
//! the same (project, date) pair is skipped, so re-running the migration
//! is safe. Decision bullets become insight rows along the way.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::chunker::file_meta;
use crate::config::Config;
use crate::db;
use crate::memory::{self, InsightEntry, SessionEntry};

const SKIP_FILES: &[&str] = &["session-format.md", "main-memory-format.md"];

const MIN_INSIGHT_CHARS: usize = 10;

fn heading(line: &str) -> Option<(usize, &str)> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        return None;
    }
    Some((hashes, title))
}

/// Body of the `header` section at the given heading level. Deeper
/// headings stay inside the section; a heading at the same or shallower
/// level ends it.
pub fn parse_section(text: &str, header: &str, level: usize) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_section = false;

    for line in text.lines() {
        if !in_section {
            if let Some((l, title)) = heading(line) {
                if l == level && title == header {
                    in_section = true;
                }
            }
            continue;
        }
        if let Some((l, _)) = heading(line) {
            if l <= level {
                break;
            }
        }
        out.push(line);
    }

    out.join("\n").trim().to_string()
}

/// `## Session N: ...` sub-headers inside a multi-session file.
fn is_session_header(line: &str) -> bool {
    match heading(line) {
        Some((2, title)) => title
            .strip_prefix("Session ")
            .map(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            .unwrap_or(false),
        _ => false,
    }
}

fn append_block(target: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push_str("\n\n");
    }
    target.push_str(block);
}

/// Split a file into the text before the first `## Session N:` header and
/// one block per sub-session. A file without such headers is all preamble.
fn split_sessions(text: &str) -> (String, Vec<String>) {
    let mut preamble = String::new();
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if is_session_header(line) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(String::new());
            continue;
        }
        let target = current.as_mut().unwrap_or(&mut preamble);
        target.push_str(line);
        target.push('\n');
    }
    if let Some(block) = current {
        blocks.push(block);
    }

    (preamble, blocks)
}

/// Parse one session file into a row. Returns `None` when the filename
/// does not carry a date. Multi-session files fold each sub-session's
/// `## Accomplished` / `## Files Changed` sections into the one row.
pub fn parse_session_file(text: &str, path: &Path) -> Option<SessionEntry> {
    let meta = file_meta(path);
    if meta.date.is_empty() {
        return None;
    }

    let (preamble, blocks) = split_sessions(text);

    let mut entry = SessionEntry {
        project: meta.project,
        date: meta.date,
        accomplished: parse_section(&preamble, "Accomplished", 2),
        files_changed: parse_section(&preamble, "Files Changed", 2),
        commits: parse_section(&preamble, "Commits", 2),
        decisions: parse_section(&preamble, "Decisions", 2),
        problems: parse_section(&preamble, "Problems and Solutions", 2),
        next_steps: parse_section(&preamble, "Next Steps", 2),
        duration: parse_section(&preamble, "Duration", 2),
        raw_markdown: text.to_string(),
    };

    for block in &blocks {
        append_block(
            &mut entry.accomplished,
            &parse_section(block, "Accomplished", 2),
        );
        append_block(
            &mut entry.files_changed,
            &parse_section(block, "Files Changed", 2),
        );
    }

    Some(entry)
}

/// Decision bullets worth keeping as standalone insight rows.
pub fn extract_insights(entry: &SessionEntry) -> Vec<InsightEntry> {
    entry
        .decisions
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', '*', ' ']).trim())
        .filter(|line| line.chars().count() > MIN_INSIGHT_CHARS)
        .map(|line| InsightEntry {
            project: Some(entry.project.clone()),
            kind: "decision".to_string(),
            content: line.to_string(),
            context: format!("Session {}", entry.date),
            tags: entry.project.clone(),
        })
        .collect()
}

fn session_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_file()
            && name.ends_with(".md")
            && !SKIP_FILES.contains(&name.as_str())
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn session_exists(pool: &SqlitePool, project: &str, date: &str) -> Result<bool> {
    let exists: i64 =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sessions WHERE project = ? AND date = ?)")
            .bind(project)
            .bind(date)
            .fetch_one(pool)
            .await?;
    Ok(exists != 0)
}

/// Import session markdown under the memory root into the relational
/// store. The database must already be initialized.
pub async fn run_import(config: &Config) -> Result<Value> {
    if !config.db.path.exists() {
        bail!("Database not found. Run: memstack init");
    }
    let pool = db::connect(config).await?;

    let sessions_dir = config.memory.sessions_dir();
    let mut files = session_files(&sessions_dir)?;
    files.extend(session_files(&sessions_dir.join("archive"))?);

    let mut imported = 0usize;
    let mut insights = 0usize;
    let mut skipped = 0usize;

    for file in &files {
        let text = std::fs::read_to_string(file)?;
        let Some(entry) = parse_session_file(&text, file) else {
            tracing::debug!(file = %file.display(), "skipping non-session file");
            skipped += 1;
            continue;
        };

        if session_exists(&pool, &entry.project, &entry.date).await? {
            skipped += 1;
            continue;
        }

        memory::add_session(&pool, &entry).await?;
        imported += 1;

        for insight in extract_insights(&entry) {
            memory::add_insight(&pool, &insight).await?;
            insights += 1;
        }
    }

    tracing::info!(imported, insights, skipped, "migration complete");
    Ok(json!({
        "ok": true,
        "sessions_imported": imported,
        "insights_extracted": insights,
        "skipped": skipped,
    }))
}
