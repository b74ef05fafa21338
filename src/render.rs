use crate::error::{ConfigError, Result};
use crate::model::{CommitRecord, DiffFile, Report, RunStatus};
use console::style;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Txt,
    Json,
}

impl FromStr for Format {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(Format::Txt),
            "json" => Ok(Format::Json),
            _ => Err(ConfigError::UnsupportedFormat(s.to_string())),
        }
    }
}

pub fn render(report: &Report, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => {
            let mut bytes = serde_json::to_vec_pretty(report)?;
            bytes.push(b'\n');
            Ok(bytes)
        }
        Format::Txt => Ok(render_text(report)?.into_bytes()),
    }
}

/// A JSON report written to a non-`.json` path gets its extension swapped.
pub fn output_path(requested: &Path, format: Format) -> PathBuf {
    match format {
        Format::Json if requested.extension().and_then(|e| e.to_str()) != Some("json") => {
            requested.with_extension("json")
        }
        _ => requested.to_path_buf(),
    }
}

fn render_text(report: &Report) -> std::result::Result<String, fmt::Error> {
    let meta = &report.metadata;
    let mut out = String::new();

    writeln!(out, "=== GITLAB COMMITS REPORT ===")?;
    writeln!(out, "Generated: {}", meta.date.to_rfc3339())?;
    writeln!(out, "GitLab URL: {}", meta.gitlab_url)?;
    writeln!(out, "Days included: {}", meta.days_included)?;
    writeln!(
        out,
        "Window: {} .. {}",
        meta.since.to_rfc3339(),
        meta.until.to_rfc3339()
    )?;
    writeln!(out, "Projects scanned: {}", meta.projects_scanned)?;
    writeln!(out, "Projects count: {}", meta.projects_count)?;
    writeln!(out, "Users count: {}", meta.users_count)?;
    writeln!(out, "Commits count: {}", meta.commits_count)?;
    writeln!(out, "Status: {}", status_label(meta.status))?;
    writeln!(out, "=== COMMITS ===")?;

    if report.commits.is_empty() {
        writeln!(out, "No commits found in the specified time range.")?;
    } else {
        let mut ordered: Vec<&CommitRecord> = report.commits.iter().collect();
        ordered.sort_by(|a, b| {
            (a.project_id, a.authored_at, &a.sha).cmp(&(b.project_id, b.authored_at, &b.sha))
        });

        let mut current_project = None;
        for (index, commit) in ordered.into_iter().enumerate() {
            if current_project != Some(commit.project_id) {
                current_project = Some(commit.project_id);
                writeln!(
                    out,
                    "\n## Project: {} (id {})\n",
                    commit.project_path, commit.project_id
                )?;
            }
            write_commit(&mut out, index + 1, commit)?;
        }
    }

    if !meta.failed_projects.is_empty() {
        writeln!(out, "=== FAILED PROJECTS ===")?;
        for failure in &meta.failed_projects {
            writeln!(
                out,
                "{} (id {}): {}",
                failure.project_path, failure.project_id, failure.reason
            )?;
        }
    }
    if !meta.skipped_commits.is_empty() {
        writeln!(out, "=== SKIPPED COMMITS ===")?;
        for skipped in &meta.skipped_commits {
            writeln!(
                out,
                "project {} commit {}: {}",
                skipped.project_id, skipped.sha, skipped.reason
            )?;
        }
    }
    Ok(out)
}

fn write_commit(out: &mut String, number: usize, commit: &CommitRecord) -> fmt::Result {
    writeln!(out, "Commit #{number}")?;
    writeln!(out, "SHA: {}", commit.sha)?;
    writeln!(out, "Project: {}", commit.project_path)?;
    writeln!(out, "Title: {}", commit.title)?;
    writeln!(out, "Author: {} <{}>", commit.author_name, commit.author_email)?;
    writeln!(out, "Date: {}", commit.authored_at.to_rfc3339())?;
    writeln!(
        out,
        "Stats: +{} -{} in {} file(s)",
        commit.stats.additions, commit.stats.deletions, commit.stats.files_changed
    )?;
    writeln!(out, "Message:")?;
    for line in commit.message.trim_end().lines() {
        writeln!(out, "  {line}")?;
    }

    if commit.diff.is_empty() {
        writeln!(out, "No diff information available.")?;
    } else {
        writeln!(out, "Changes:")?;
        for file in &commit.diff {
            write_change(out, file)?;
        }
    }
    writeln!(out, "\n---\n")
}

fn write_change(out: &mut String, file: &DiffFile) -> fmt::Result {
    let (added, deleted) = file.line_counts();
    if file.new_file {
        writeln!(out, "  New file: {} (+{added})", file.new_path)?;
    } else if file.deleted_file {
        writeln!(out, "  Deleted: {} (-{deleted})", file.old_path)?;
    } else {
        writeln!(out, "  Modified: {} (+{added} -{deleted})", file.new_path)?;
        if file.renamed_file || (!file.old_path.is_empty() && file.old_path != file.new_path) {
            writeln!(out, "    (renamed from: {})", file.old_path)?;
        }
    }
    Ok(())
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Complete => "complete",
        RunStatus::Partial => "partial",
    }
}

/// Short run summary for the terminal.
pub fn print_summary(report: &Report, written_to: &Path) {
    let meta = &report.metadata;
    eprintln!("{}", style("GitLab Commits Summary").bold());
    eprintln!("{}", "─".repeat(50));
    eprintln!("Projects scanned: {}", style(meta.projects_scanned).cyan());
    eprintln!("Projects with commits: {}", style(meta.projects_count).cyan());
    eprintln!("Commits: {}", style(meta.commits_count).green());
    eprintln!("Authors: {}", style(meta.users_count).yellow());
    eprintln!(
        "Window: {} to {}",
        style(meta.since.format("%Y-%m-%d %H:%M")).dim(),
        style(meta.until.format("%Y-%m-%d %H:%M")).dim()
    );
    match meta.status {
        RunStatus::Complete => eprintln!("Status: {}", style("complete").green()),
        RunStatus::Partial => eprintln!(
            "Status: {} ({} project(s) failed)",
            style("partial").red(),
            meta.failed_projects.len()
        ),
    }
    if !meta.skipped_commits.is_empty() {
        eprintln!(
            "Skipped commits: {}",
            style(meta.skipped_commits.len()).red()
        );
    }
    eprintln!("Report written to {}", style(written_to.display()).bold());
}
