use crate::config::LabelGroup;
use crate::github::Issue;
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use textwrap::{Options, WrapAlgorithm};

pub const CHANGELOG_FILE: &str = "CHANGELOG.md";
pub const BACKUP_EXTENSION: &str = "bak";
pub const MARKER: &str = "<!-- do not remove -->";
pub const DEFAULT_HEADER: &str = "# Release notes\n\n<!-- do not remove -->\n";

const WRAP_WIDTH: usize = 70;
const BODY_FIRST_INDENT: &str = "  - ";
const BODY_INDENT: &str = "    ";

pub fn render_issue(issue: &Issue) -> String {
    let mut rendered = format!(
        "- {} ([#{}]({}))\n",
        issue.title.trim(),
        issue.number,
        issue.url
    );

    // Blank and missing bodies are treated the same.
    if let Some(body) = issue.body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        rendered.push_str(&wrap_body(body));
        rendered.push('\n');
    }
    rendered
}

pub fn render_group(issues: &[Issue], heading: &str) -> String {
    if issues.is_empty() {
        return String::new();
    }

    let rendered = issues.iter().map(render_issue).collect::<Vec<_>>();
    format!("### {heading}\n\n{}", rendered.join("\n"))
}

/// Builds the section for `version`, skipping groups without issues.
pub fn render_section<'a>(
    version: &str,
    groups: impl IntoIterator<Item = (&'a LabelGroup, &'a [Issue])>,
) -> String {
    let blocks = groups
        .into_iter()
        .map(|(group, issues)| render_group(issues, &group.heading))
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>();

    format!("\n## {version}\n{}\n", blocks.join("\n"))
}

/// Inserts `section` directly after the marker line, leaving everything else as is.
///
/// Only a line consisting of exactly the marker counts; the marker text inside
/// other lines is ordinary content.
pub fn insert_section(document: &str, section: &str) -> Result<String> {
    let mut marker_ends = Vec::new();
    let mut offset = 0;
    for line in document.split_inclusive('\n') {
        offset += line.len();
        if is_marker_line(line) {
            marker_ends.push(offset);
        }
    }

    let marker_end = match marker_ends.as_slice() {
        [] => bail!("Changelog is missing the marker line `{MARKER}`."),
        [end] => *end,
        _ => bail!("Changelog contains the marker line `{MARKER}` more than once."),
    };

    let (head, tail) = document.split_at(marker_end);
    let mut updated = String::with_capacity(document.len() + section.len() + 1);
    updated.push_str(head);
    if !head.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(section);
    updated.push_str(tail);
    Ok(updated)
}

fn is_marker_line(line: &str) -> bool {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line) == MARKER
}

pub fn changelog_path(root: &Path) -> PathBuf {
    root.join(CHANGELOG_FILE)
}

pub fn backup_path(changelog: &Path) -> PathBuf {
    changelog.with_extension(BACKUP_EXTENSION)
}

pub fn read_or_default(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(DEFAULT_HEADER.to_string());
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read `{}`.", path.display()))
}

/// Creates the changelog if needed, backs it up, then overwrites it.
pub fn persist(path: &Path, contents: &str) -> Result<()> {
    if !path.exists() {
        fs::write(path, DEFAULT_HEADER)
            .with_context(|| format!("Failed to create `{}`.", path.display()))?;
        tracing::info!(path = %path.display(), "created changelog");
    }

    let backup = backup_path(path);
    fs::copy(path, &backup).with_context(|| {
        format!(
            "Failed to back up `{}` to `{}`.",
            path.display(),
            backup.display()
        )
    })?;
    fs::write(path, contents).with_context(|| format!("Failed to write `{}`.", path.display()))
}

/// Greedy fill: line breaks become spaces, runs of spaces inside a line are
/// kept, long words split on hyphens or, failing that, anywhere.
fn wrap_body(body: &str) -> String {
    let body = body.replace(['\r', '\n', '\t'], " ");
    let options = Options::new(WRAP_WIDTH)
        .initial_indent(BODY_FIRST_INDENT)
        .subsequent_indent(BODY_INDENT)
        .wrap_algorithm(WrapAlgorithm::FirstFit);
    textwrap::fill(&body, options)
}
