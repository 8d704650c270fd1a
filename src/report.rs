//! Markdown session reports.
//!
//! Renders a persisted session into a human-readable Markdown document,
//! consumed by `hone report <id>` and `hone run --report`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::session::Verdict;
use crate::storage::PersistedSession;

/// Diagnostics lines shown per iteration before truncation.
const MAX_DIAGNOSTIC_LINES: usize = 20;

/// Render a persisted session as a Markdown document.
pub fn render_report(session: &PersistedSession) -> String {
    let mut output = String::new();
    let header = &session.header;

    output.push_str(&format!("# Session {}\n\n", header.session_id));
    output.push_str(&format!("**Goal:** {}\n\n", header.goal));
    output.push_str(&format!(
        "**Acceptance:** `{}`\n\n",
        header.acceptance_command
    ));
    output.push_str(&format!(
        "**Workspace:** {}\n\n",
        header.workspace_path.display()
    ));
    output.push_str(&format!("**Status:** {}\n\n", session.status()));
    output.push_str(&format!(
        "**Iterations:** {} of {}\n",
        session.iterations_used(),
        header.max_iterations
    ));

    if session.records.is_empty() {
        output.push_str("\nNo iterations were recorded.\n");
    }

    for record in &session.records {
        output.push_str(&format!("\n## Iteration {}\n\n", record.iteration));
        output.push_str(&format!("{}\n\n", record.description));

        if record.degraded {
            output.push_str("*(degraded: no action was applied this iteration)*\n\n");
        }
        if record.incomplete {
            output.push_str("*(interrupted: left unreviewed)*\n\n");
        }

        if !record.diff_stat.is_empty() {
            output.push_str(&format!(
                "**Change:** {} file(s), +{} / -{}\n\n",
                record.diff_stat.files_changed, record.diff_stat.added, record.diff_stat.removed
            ));
        }
        if !record.commands.is_empty() {
            output.push_str("**Commands:**\n");
            for command in &record.commands {
                output.push_str(&format!("- `{}`\n", command));
            }
            output.push('\n');
        }

        match &record.eval {
            Some(eval) if eval.passed => {
                output.push_str("**Check:** passed\n");
            }
            Some(eval) => {
                match eval.exit_code {
                    Some(code) => {
                        output.push_str(&format!("**Check:** failed (exit {})\n", code))
                    }
                    None => output.push_str("**Check:** failed\n"),
                }
                push_fenced(&mut output, &eval.diagnostics);
            }
            None => {
                output.push_str("**Check:** not run\n");
            }
        }

        output.push_str(&format!("\n**Verdict:** {}\n", record.verdict.label()));
        if let Verdict::RetryWithFeedback(feedback) = &record.verdict {
            output.push_str(&format!("\n> {}\n", feedback));
        }
    }

    if let Some(outcome) = &session.outcome {
        output.push_str("\n## Outcome\n\n");
        output.push_str(&format!(
            "Finished **{}** after {} iteration(s).\n",
            outcome.status, outcome.iterations_used
        ));
        if !outcome.final_diagnostics.is_empty() {
            push_fenced(&mut output, &outcome.final_diagnostics);
        }
    }

    output
}

/// Render and write the report to `<data_dir>/reports/<id>.md`.
pub fn write_report(data_dir: &Path, session: &PersistedSession) -> crate::Result<PathBuf> {
    let reports_dir = data_dir.join("reports");
    fs::create_dir_all(&reports_dir)?;
    let path = reports_dir.join(format!("{}.md", session.header.session_id));
    fs::write(&path, render_report(session))?;
    Ok(path)
}

fn push_fenced(output: &mut String, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    output.push_str("\n```\n");
    let lines: Vec<&str> = text.lines().take(MAX_DIAGNOSTIC_LINES).collect();
    output.push_str(&lines.join("\n"));
    if text.lines().count() > MAX_DIAGNOSTIC_LINES {
        output.push_str("\n... (truncated)");
    }
    output.push_str("\n```\n");
}
