use crate::changelog;
use crate::cli::{ChangelogArgs, ReleaseArgs};
use crate::config::{self, LabelGroup, Settings};
use crate::github::{ApiError, CreateRelease, GitHubClient, Issue, Release, ReleaseApi};
use crate::process::{CommandRunner, ProcessRunner, run_checked};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rayon::prelude::*;
use similar::TextDiff;
use std::path::{Path, PathBuf};

/// 2000-01-01T00:00:00Z; used as the lower bound when nothing has been released yet.
const FALLBACK_SINCE_SECS: i64 = 946_684_800;

#[derive(Debug, Clone, Copy)]
pub struct ChangelogOptions {
    pub dry_run: bool,
    pub parallel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangelogOutcome {
    Written { path: PathBuf },
    Proposed { current: String, proposed: String },
}

pub fn run_changelog(args: ChangelogArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to determine current directory.")?;
    let (settings, api) = connect(&cwd)?;
    let options = ChangelogOptions {
        dry_run: args.dry_run,
        parallel: true,
    };

    match generate_changelog(&settings, &api, &options)? {
        ChangelogOutcome::Written { path } => println!("Updated `{}`", path.display()),
        ChangelogOutcome::Proposed { current, proposed } => {
            println!("Dry run: would update `{}`", changelog::CHANGELOG_FILE);
            print_diff(&current, &proposed);
        }
    }
    Ok(())
}

pub fn run_release(_args: ReleaseArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to determine current directory.")?;
    let (settings, api) = connect(&cwd)?;
    let mut runner = ProcessRunner;

    let release = publish_release(&settings, &mut runner, &api)?;
    match release.html_url {
        Some(url) => println!("Created release {} ({url}).", release.tag_name),
        None => println!("Created release {}.", release.tag_name),
    }
    Ok(())
}

fn connect(cwd: &Path) -> Result<(Settings, GitHubClient)> {
    let settings = config::load(cwd)?;
    tracing::info!(
        root = %settings.root.display(),
        repo = %format!("{}/{}", settings.owner, settings.repo),
        version = %settings.version,
        label_groups = settings.label_groups.len(),
        "loaded settings"
    );

    let token = config::read_token(&settings.root)?;
    let api = GitHubClient::new(&settings.api_url, &settings.owner, &settings.repo, &token)
        .context("Failed to set up the GitHub client.")?;
    Ok((settings, api))
}

pub(crate) fn generate_changelog(
    settings: &Settings,
    api: &dyn ReleaseApi,
    options: &ChangelogOptions,
) -> Result<ChangelogOutcome> {
    let path = changelog::changelog_path(&settings.root);
    let current = changelog::read_or_default(&path)?;

    let since = resolve_since(api)?;
    let groups = settings.label_groups.iter().collect::<Vec<_>>();
    let issues = fetch_issue_groups(api, &groups, since, options.parallel)?;

    let section = changelog::render_section(
        &settings.version,
        groups
            .iter()
            .copied()
            .zip(issues.iter().map(Vec::as_slice)),
    );
    let proposed = changelog::insert_section(&current, &section)
        .with_context(|| format!("Cannot update `{}`.", path.display()))?;

    if options.dry_run {
        return Ok(ChangelogOutcome::Proposed { current, proposed });
    }

    changelog::persist(&path, &proposed)?;
    tracing::info!(path = %path.display(), "wrote changelog");
    Ok(ChangelogOutcome::Written { path })
}

/// Commit date of the latest release's tag, or the fallback date when no release exists.
pub(crate) fn resolve_since(api: &dyn ReleaseApi) -> Result<DateTime<Utc>> {
    let tag = match api.latest_release_tag() {
        Ok(tag) => tag,
        Err(ApiError::NotFound(_)) => {
            let since = fallback_since()?;
            tracing::info!(
                since = %since.to_rfc3339_opts(SecondsFormat::Secs, true),
                "no releases yet, including all closed issues"
            );
            return Ok(since);
        }
        Err(err) => return Err(err).context("Failed to look up the latest release."),
    };

    let since = api
        .tag_commit_date(&tag)
        .with_context(|| format!("Failed to find tag {tag}."))?;
    tracing::info!(
        tag = %tag,
        since = %since.to_rfc3339_opts(SecondsFormat::Secs, true),
        "collecting issues closed since latest release"
    );
    Ok(since)
}

fn fallback_since() -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(FALLBACK_SINCE_SECS, 0).context("Fallback date is out of range.")
}

/// Queries each label independently; results line up with `groups`.
pub(crate) fn fetch_issue_groups(
    api: &dyn ReleaseApi,
    groups: &[&LabelGroup],
    since: DateTime<Utc>,
    parallel: bool,
) -> Result<Vec<Vec<Issue>>> {
    let fetch = |group: &&LabelGroup| -> Result<Vec<Issue>> {
        let issues = api
            .closed_issues_since(&group.label, since)
            .with_context(|| format!("Failed to list closed issues labeled `{}`.", group.label))?;
        tracing::debug!(label = %group.label, count = issues.len(), "fetched issues");
        Ok(issues)
    };

    if parallel {
        groups.par_iter().map(fetch).collect()
    } else {
        groups.iter().map(fetch).collect()
    }
}

/// Tags the configured version, syncs tags with the remote, then creates the release.
pub(crate) fn publish_release(
    settings: &Settings,
    runner: &mut dyn CommandRunner,
    api: &dyn ReleaseApi,
) -> Result<Release> {
    let version = settings.version.as_str();
    let root = settings.root.as_path();

    tracing::info!(tag = version, "creating tag");
    run_checked(
        runner,
        root,
        "git",
        &["tag", version],
        "Failed to create release tag.",
    )?;
    run_checked(
        runner,
        root,
        "git",
        &["push", "--tags"],
        "Failed to push tags.",
    )?;
    run_checked(
        runner,
        root,
        "git",
        &["pull", "--tags"],
        "Failed to pull tags.",
    )?;

    let request = CreateRelease {
        tag_name: version.to_string(),
        name: version.to_string(),
        body: version.to_string(),
    };
    let release = api
        .create_release(&request)
        .with_context(|| format!("Failed to create GitHub release {version}."))?;
    tracing::info!(tag = %release.tag_name, "created release");
    Ok(release)
}

fn print_diff(before: &str, after: &str) {
    let diff = TextDiff::from_lines(before, after);
    let unified = diff
        .unified_diff()
        .context_radius(3)
        .header("current", "proposed")
        .to_string();

    if unified.trim().is_empty() {
        println!("No textual diff.");
    } else {
        println!("{unified}");
    }
}
