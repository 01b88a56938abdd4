use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "issuelog",
    version,
    about = "Changelog and release tool driven by labeled GitHub issues"
)]
pub struct Cli {
    /// Log debug output (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Prepend a section for the current version to CHANGELOG.md from closed, labeled issues.
    Changelog(ChangelogArgs),
    /// Tag the current version, sync tags, and create a GitHub release.
    Release(ReleaseArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ChangelogArgs {
    /// Show the proposed changelog as a diff without writing files.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ReleaseArgs {}
