//! Render a project's stored memory back to a single markdown document.

use anyhow::Result;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::memory;

fn value_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn push_labeled(out: &mut String, label: &str, text: &str) {
    if !text.is_empty() {
        out.push_str(&format!("**{}:** {}\n\n", label, text));
    }
}

/// Export sessions, insights, and context for one project as markdown.
pub async fn export_markdown(pool: &SqlitePool, project: &str) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("# Memory Export: {}\n\n", project));

    let sessions = memory::get_sessions(pool, Some(project), 1000).await?;
    if !sessions.is_empty() {
        out.push_str("## Sessions\n\n");
        for session in &sessions {
            let date = value_str(session, "date");
            out.push_str(&format!("### {}\n\n", date));
            push_labeled(&mut out, "Accomplished", value_str(session, "accomplished"));
            push_labeled(&mut out, "Next Steps", value_str(session, "next_steps"));
            push_labeled(&mut out, "Duration", value_str(session, "duration"));
        }
    }

    let insights = memory::get_insights(pool, Some(project), 1000).await?;
    if !insights.is_empty() {
        out.push_str("## Insights\n\n");
        for insight in &insights {
            let kind = value_str(insight, "type");
            out.push_str(&format!(
                "- **[{}]** {}\n",
                kind,
                value_str(insight, "content")
            ));
        }
        out.push('\n');
    }

    if let Some(context) = memory::get_context(pool, project).await? {
        out.push_str("## Project Context\n\n");
        push_labeled(&mut out, "Status", value_str(&context, "status"));
        push_labeled(&mut out, "Branch", value_str(&context, "current_branch"));
        push_labeled(
            &mut out,
            "Architecture Decisions",
            value_str(&context, "architecture_decisions"),
        );
        push_labeled(&mut out, "Known Issues", value_str(&context, "known_issues"));
        push_labeled(&mut out, "Backlog", value_str(&context, "backlog"));
    }

    Ok(out)
}
