//! Relational memory operations: sessions, insights, project context,
//! and plan tasks.
//!
//! Rows travel as `serde_json::Value` payloads shaped for the CLI's JSON
//! output. Context writes are merge-patches: absent fields keep their
//! stored value, so successive `context set` calls accumulate instead of
//! overwrite.

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};

/// Fields of a `session add` payload. Everything defaults to empty so
/// partial records are accepted.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SessionEntry {
    pub project: String,
    pub date: String,
    pub accomplished: String,
    pub files_changed: String,
    pub commits: String,
    pub decisions: String,
    pub problems: String,
    pub next_steps: String,
    pub duration: String,
    pub raw_markdown: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct InsightEntry {
    pub project: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub context: String,
    pub tags: String,
}

/// Merge-patch for a project's context row. `None` means "leave the
/// stored value alone".
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ContextPatch {
    pub project: String,
    pub status: Option<String>,
    pub current_branch: Option<String>,
    pub last_session_date: Option<String>,
    pub architecture_decisions: Option<String>,
    pub known_issues: Option<String>,
    pub backlog: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct PlanTaskEntry {
    pub project: String,
    pub task_number: i64,
    pub description: String,
    pub status: String,
    pub blocked_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TaskUpdate {
    pub status: Option<String>,
    pub description: Option<String>,
    pub blocked_reason: Option<String>,
}

const EXCERPT_CHARS: usize = 200;

/// Truncate on a char boundary, appending an ellipsis when cut.
fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut)
}

pub async fn add_session(pool: &SqlitePool, entry: &SessionEntry) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO sessions (project, date, accomplished, files_changed, commits, decisions, problems, next_steps, duration, raw_markdown)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.project)
    .bind(&entry.date)
    .bind(&entry.accomplished)
    .bind(&entry.files_changed)
    .bind(&entry.commits)
    .bind(&entry.decisions)
    .bind(&entry.problems)
    .bind(&entry.next_steps)
    .bind(&entry.duration)
    .bind(&entry.raw_markdown)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_sessions(
    pool: &SqlitePool,
    project: Option<&str>,
    limit: i64,
) -> Result<Vec<Value>> {
    let rows = match project {
        Some(p) => {
            sqlx::query(
                "SELECT id, project, date, accomplished, next_steps, duration FROM sessions WHERE project = ? ORDER BY date DESC LIMIT ?",
            )
            .bind(p)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, project, date, accomplished, next_steps, duration FROM sessions ORDER BY date DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows
        .iter()
        .map(|row| {
            json!({
                "id": row.get::<i64, _>("id"),
                "project": row.get::<String, _>("project"),
                "date": row.get::<Option<String>, _>("date"),
                "accomplished": row.get::<Option<String>, _>("accomplished"),
                "next_steps": row.get::<Option<String>, _>("next_steps"),
                "duration": row.get::<Option<String>, _>("duration"),
            })
        })
        .collect())
}

pub async fn add_insight(pool: &SqlitePool, entry: &InsightEntry) -> Result<i64> {
    let kind = if entry.kind.is_empty() {
        "decision"
    } else {
        entry.kind.as_str()
    };
    let result = sqlx::query(
        "INSERT INTO insights (project, type, content, context, tags) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&entry.project)
    .bind(kind)
    .bind(&entry.content)
    .bind(&entry.context)
    .bind(&entry.tags)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Insights for a project, plus the global ones with no project set.
pub async fn get_insights(
    pool: &SqlitePool,
    project: Option<&str>,
    limit: i64,
) -> Result<Vec<Value>> {
    let rows = match project {
        Some(p) => {
            sqlx::query(
                "SELECT id, project, type, content, context, tags FROM insights WHERE project = ? OR project IS NULL ORDER BY id DESC LIMIT ?",
            )
            .bind(p)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, project, type, content, context, tags FROM insights ORDER BY id DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows
        .iter()
        .map(|row| {
            json!({
                "id": row.get::<i64, _>("id"),
                "project": row.get::<Option<String>, _>("project"),
                "type": row.get::<Option<String>, _>("type"),
                "content": row.get::<String, _>("content"),
                "context": row.get::<Option<String>, _>("context"),
                "tags": row.get::<Option<String>, _>("tags"),
            })
        })
        .collect())
}

/// Keyword search across session fields and insight content. Each match
/// reports which field hit and a 200-char excerpt.
pub async fn find(
    pool: &SqlitePool,
    query: &str,
    project: Option<&str>,
    limit: usize,
) -> Result<Vec<Value>> {
    let pattern = format!("%{}%", query);
    let needle = query.to_lowercase();
    let mut results = Vec::new();

    let session_rows = match project {
        Some(p) => {
            sqlx::query(
                r#"
                SELECT project, date, accomplished, files_changed, decisions, problems, next_steps
                FROM sessions
                WHERE project = ? AND (accomplished LIKE ? OR files_changed LIKE ? OR decisions LIKE ? OR problems LIKE ? OR next_steps LIKE ?)
                ORDER BY date DESC
                "#,
            )
            .bind(p)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT project, date, accomplished, files_changed, decisions, problems, next_steps
                FROM sessions
                WHERE accomplished LIKE ? OR files_changed LIKE ? OR decisions LIKE ? OR problems LIKE ? OR next_steps LIKE ?
                ORDER BY date DESC
                "#,
            )
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .fetch_all(pool)
            .await?
        }
    };

    let fields = [
        "accomplished",
        "files_changed",
        "decisions",
        "problems",
        "next_steps",
    ];
    'sessions: for row in &session_rows {
        for field in fields {
            let text: Option<String> = row.get(field);
            let Some(text) = text else { continue };
            if text.to_lowercase().contains(&needle) {
                results.push(json!({
                    "type": "session",
                    "project": row.get::<String, _>("project"),
                    "date": row.get::<Option<String>, _>("date"),
                    "field": field,
                    "excerpt": excerpt(&text),
                }));
                if results.len() >= limit {
                    break 'sessions;
                }
            }
        }
    }

    if results.len() < limit {
        let insight_rows = match project {
            Some(p) => {
                sqlx::query(
                    "SELECT project, type, content, context FROM insights WHERE (project = ? OR project IS NULL) AND content LIKE ? ORDER BY id DESC",
                )
                .bind(p)
                .bind(&pattern)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT project, type, content, context FROM insights WHERE content LIKE ? ORDER BY id DESC",
                )
                .bind(&pattern)
                .fetch_all(pool)
                .await?
            }
        };

        for row in &insight_rows {
            results.push(json!({
                "type": "insight",
                "project": row.get::<Option<String>, _>("project"),
                "insight_type": row.get::<Option<String>, _>("type"),
                "excerpt": excerpt(&row.get::<String, _>("content")),
                "context": row.get::<Option<String>, _>("context"),
            }));
            if results.len() >= limit {
                break;
            }
        }
    }

    Ok(results)
}

pub async fn get_context(pool: &SqlitePool, project: &str) -> Result<Option<Value>> {
    let row = sqlx::query(
        "SELECT project, status, current_branch, last_session_date, architecture_decisions, known_issues, backlog, updated_at FROM project_context WHERE project = ?",
    )
    .bind(project)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        json!({
            "project": row.get::<String, _>("project"),
            "status": row.get::<Option<String>, _>("status"),
            "current_branch": row.get::<Option<String>, _>("current_branch"),
            "last_session_date": row.get::<Option<String>, _>("last_session_date"),
            "architecture_decisions": row.get::<Option<String>, _>("architecture_decisions"),
            "known_issues": row.get::<Option<String>, _>("known_issues"),
            "backlog": row.get::<Option<String>, _>("backlog"),
            "updated_at": row.get::<Option<String>, _>("updated_at"),
        })
    }))
}

/// Merge-patch upsert: each absent field keeps the stored value.
pub async fn set_context(pool: &SqlitePool, patch: &ContextPatch) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO project_context (project, status, current_branch, last_session_date, architecture_decisions, known_issues, backlog, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))
        ON CONFLICT(project) DO UPDATE SET
            status = COALESCE(excluded.status, project_context.status),
            current_branch = COALESCE(excluded.current_branch, project_context.current_branch),
            last_session_date = COALESCE(excluded.last_session_date, project_context.last_session_date),
            architecture_decisions = COALESCE(excluded.architecture_decisions, project_context.architecture_decisions),
            known_issues = COALESCE(excluded.known_issues, project_context.known_issues),
            backlog = COALESCE(excluded.backlog, project_context.backlog),
            updated_at = datetime('now')
        "#,
    )
    .bind(&patch.project)
    .bind(&patch.status)
    .bind(&patch.current_branch)
    .bind(&patch.last_session_date)
    .bind(&patch.architecture_decisions)
    .bind(&patch.known_issues)
    .bind(&patch.backlog)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upsert a plan task keyed on (project, task_number).
pub async fn add_plan_task(pool: &SqlitePool, entry: &PlanTaskEntry) -> Result<()> {
    let status = if entry.status.is_empty() {
        "pending"
    } else {
        entry.status.as_str()
    };
    sqlx::query(
        r#"
        INSERT INTO plans (project, task_number, description, status, blocked_reason, updated_at)
        VALUES (?, ?, ?, ?, ?, datetime('now'))
        ON CONFLICT(project, task_number) DO UPDATE SET
            description = excluded.description,
            status = excluded.status,
            blocked_reason = excluded.blocked_reason,
            updated_at = datetime('now')
        "#,
    )
    .bind(&entry.project)
    .bind(entry.task_number)
    .bind(&entry.description)
    .bind(status)
    .bind(&entry.blocked_reason)
    .execute(pool)
    .await?;
    Ok(())
}

/// A project's plan: task list plus (done, total) counts.
pub async fn get_plan(pool: &SqlitePool, project: &str) -> Result<(Vec<Value>, i64, i64)> {
    let rows = sqlx::query(
        "SELECT task_number, description, status, blocked_reason FROM plans WHERE project = ? ORDER BY task_number",
    )
    .bind(project)
    .fetch_all(pool)
    .await?;

    let mut tasks = Vec::with_capacity(rows.len());
    let mut done = 0i64;
    for row in &rows {
        let status: Option<String> = row.get("status");
        let status = status.unwrap_or_else(|| "pending".to_string());
        if status == "done" {
            done += 1;
        }
        tasks.push(json!({
            "task_number": row.get::<i64, _>("task_number"),
            "description": row.get::<String, _>("description"),
            "status": status,
            "blocked_reason": row.get::<Option<String>, _>("blocked_reason"),
        }));
    }

    let total = rows.len() as i64;
    Ok((tasks, done, total))
}

/// Patch an existing task. Returns false when no task matched.
pub async fn update_task(
    pool: &SqlitePool,
    project: &str,
    task_number: i64,
    update: &TaskUpdate,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE plans SET
            status = COALESCE(?, status),
            description = COALESCE(?, description),
            blocked_reason = COALESCE(?, blocked_reason),
            updated_at = datetime('now')
        WHERE project = ? AND task_number = ?
        "#,
    )
    .bind(&update.status)
    .bind(&update.description)
    .bind(&update.blocked_reason)
    .bind(project)
    .bind(task_number)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Row counts per table, session counts per project, and the database
/// file's size on disk.
pub async fn stats(pool: &SqlitePool, db_path: &Path) -> Result<Value> {
    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
        .fetch_one(pool)
        .await?;
    let insights: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM insights")
        .fetch_one(pool)
        .await?;
    let plans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM plans")
        .fetch_one(pool)
        .await?;
    let contexts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_context")
        .fetch_one(pool)
        .await?;

    let by_project_rows =
        sqlx::query("SELECT project, COUNT(*) as n FROM sessions GROUP BY project ORDER BY n DESC")
            .fetch_all(pool)
            .await?;
    let mut by_project = serde_json::Map::new();
    for row in &by_project_rows {
        by_project.insert(
            row.get::<String, _>("project"),
            json!(row.get::<i64, _>("n")),
        );
    }

    let size_kb = std::fs::metadata(db_path)
        .map(|m| m.len() / 1024)
        .unwrap_or(0);

    Ok(json!({
        "sessions": sessions,
        "insights": insights,
        "plans": plans,
        "project_contexts": contexts,
        "sessions_by_project": by_project,
        "db_path": db_path.display().to_string(),
        "db_size_kb": size_kb,
        "generated_at": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    }))
}
