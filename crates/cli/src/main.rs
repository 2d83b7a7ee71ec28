//! mergeflow command-line tool.
//!
//! Starts a merge, lists the resulting conflicts, applies ours/theirs
//! decisions, commits the resolution, or abandons the merge with a hard
//! reset. Each invocation picks up the merge already in progress in the
//! working copy.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dialoguer::Confirm;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use mergeflow_core::conflict::StateReset;
use mergeflow_core::errors::SessionError;
use mergeflow_core::repo_marker;
use mergeflow_core::vcs::VersionControl;
use mergeflow_core::{
    ConflictSet, EngineConfig, GitRepository, MergeOutcome, MergeSession, MergeStart,
    SessionSettings, SessionState,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// mergeflow command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "mergeflow",
    version,
    about = "Resolve three-way merge conflicts in a Git working copy"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the working copy.
    #[arg(short, long, global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge a branch or commit into the current branch.
    Merge {
        /// Branch, tag, or commit to merge.
        source: String,
    },

    /// List the conflicts of the merge in progress.
    Conflicts {
        /// Print the conflict set as JSON.
        #[arg(long)]
        json: bool,

        /// Print every conflict block with its chunk start lines.
        #[arg(long, conflicts_with = "json")]
        summary: bool,
    },

    /// Resolve conflicting files by taking one side.
    Resolve {
        /// Paths to resolve with our version.
        #[arg(long, num_args = 1..)]
        ours: Vec<String>,

        /// Paths to resolve with their version. Wins over --ours.
        #[arg(long, num_args = 1..)]
        theirs: Vec<String>,

        /// Glob matched against conflicting paths, resolved with our version.
        #[arg(long)]
        ours_glob: Vec<String>,

        /// Glob matched against conflicting paths, resolved with their version.
        #[arg(long)]
        theirs_glob: Vec<String>,
    },

    /// Stage everything and commit the resolution.
    Commit {
        /// Commit message. Defaults to `commit.default_message`.
        #[arg(short, long)]
        message: Option<String>,

        /// Replace the current tip instead of adding a commit.
        #[arg(long)]
        amend: bool,
    },

    /// Abandon the merge with a hard reset. Discards all uncommitted changes.
    Reset {
        /// Reset to the remote tracking branch.
        #[arg(long, conflicts_with_all = ["local", "to"])]
        remote: bool,

        /// Reset to the local branch tip.
        #[arg(long, conflicts_with = "to")]
        local: bool,

        /// Reset to an explicit reference.
        #[arg(long)]
        to: Option<String>,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// List the repositories directly under a directory.
    Repos {
        /// Directory to scan.
        #[arg(default_value = ".")]
        root: PathBuf,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path. Defaults to the per-user config location.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            if e.downcast_ref::<SessionError>().is_some_and(SessionError::is_partial) {
                eprintln!(
                    "{}",
                    style::warn("Some files were already resolved. Run the command again to continue.")
                );
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: &EngineConfig) -> Result<()> {
    match cli.command {
        Commands::Merge { source } => cmd_merge(&cli.repo, config, &source),
        Commands::Conflicts { json, summary } => cmd_conflicts(&cli.repo, config, json, summary),
        Commands::Resolve {
            ours,
            theirs,
            ours_glob,
            theirs_glob,
        } => cmd_resolve(&cli.repo, config, ours, theirs, ours_glob, theirs_glob),
        Commands::Commit { message, amend } => {
            cmd_commit(&cli.repo, config, message.as_deref(), amend)
        }
        Commands::Reset {
            remote,
            local,
            to,
            yes,
        } => cmd_reset(&cli.repo, config, remote, local, to, yes),
        Commands::Repos { root } => cmd_repos(&root),
        Commands::Init { output } => cmd_init(output),
        Commands::Validate => cmd_validate(cli.config.as_deref(), config),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(EngineConfig::default_path)
}

fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = config_path(explicit) else {
        let mut config = EngineConfig::default();
        config.resolve_env_vars();
        return Ok(config);
    };
    if explicit.is_some() && !path.exists() {
        anyhow::bail!("configuration file not found: {}", path.display());
    }
    EngineConfig::load_and_resolve(&path).context("failed to load configuration file")
}

fn open_repo(path: &Path, config: &EngineConfig) -> Result<GitRepository> {
    let repo = GitRepository::open(path)
        .with_context(|| format!("failed to open repository at {}", path.display()))?;
    Ok(repo.with_identity(config.identity.identity()))
}

fn resume_session(path: &Path, config: &EngineConfig) -> Result<MergeSession<GitRepository>> {
    let repo = open_repo(path, config)?;
    let session = MergeSession::resume(repo, SessionSettings::from(config))
        .context("failed to read the merge in progress")?;
    debug!(id = %session.id(), "session resumed");
    Ok(session)
}

fn ensure_merge_in_progress(session: &MergeSession<GitRepository>) -> Result<()> {
    if session.conflicts().is_empty() && session.state() == SessionState::Pending {
        anyhow::bail!("no merge in progress");
    }
    Ok(())
}

fn conflicts_table(conflicts: &ConflictSet) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["File", "Blocks", "Ours starts", "Theirs starts"]);

    for (path, regions) in conflicts.iter() {
        let starts = |index: usize| {
            let lines: Vec<String> = regions
                .iter()
                .map(|r| {
                    r.start_for(index)
                        .map(|l| l.to_string())
                        .unwrap_or_else(|| "—".to_string())
                })
                .collect();
            lines.join(", ")
        };
        table.add_row(vec![
            Cell::new(path),
            Cell::new(regions.len()),
            Cell::new(starts(0)),
            Cell::new(starts(1)),
        ]);
    }
    table
}

fn print_conflicts(conflicts: &ConflictSet) {
    println!();
    println!(
        "{}",
        style::header(&format!("Conflicting files ({})", conflicts.len()))
    );
    println!();
    println!("{}", conflicts_table(conflicts));
    println!();
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_merge(path: &Path, config: &EngineConfig, source: &str) -> Result<()> {
    let repo = open_repo(path, config)?;
    let start = MergeSession::start(repo, source, SessionSettings::from(config))
        .with_context(|| format!("failed to merge '{}'", source))?;

    match start {
        MergeStart::Clean { head } => {
            println!(
                "{}",
                style::success(&format!(
                    "Merged '{}' without conflicts (HEAD {})",
                    source,
                    style::short_id(&head)
                ))
            );
        }
        MergeStart::Conflicted(session) => {
            println!(
                "{}",
                style::warn(&format!("Merging '{}' stopped with conflicts", source))
            );
            print_conflicts(session.conflicts());
            println!(
                "{}",
                style::dim("Resolve with `mergeflow resolve --ours <path> --theirs <path>`, then `mergeflow commit`.")
            );
            session.close();
        }
    }
    Ok(())
}

fn cmd_conflicts(path: &Path, config: &EngineConfig, json: bool, summary: bool) -> Result<()> {
    let session = resume_session(path, config)?;
    let conflicts = session.conflicts();

    if json {
        let out = serde_json::to_string_pretty(conflicts)
            .context("failed to serialize conflict set")?;
        println!("{}", out);
    } else if conflicts.is_empty() {
        println!();
        println!("{}", style::success("No active conflicts"));
        println!();
    } else if summary {
        print!("{}", conflicts.summary());
    } else {
        print_conflicts(conflicts);
    }

    session.close();
    Ok(())
}

fn cmd_resolve(
    path: &Path,
    config: &EngineConfig,
    ours: Vec<String>,
    theirs: Vec<String>,
    ours_glob: Vec<String>,
    theirs_glob: Vec<String>,
) -> Result<()> {
    let mut session = resume_session(path, config)?;
    ensure_merge_in_progress(&session)?;

    for pattern in &ours_glob {
        let conflicts = session.conflicts().clone();
        let matched = session.policy_mut().take_ours_matching(pattern, &conflicts);
        if matched == 0 {
            println!("{}", style::warn(&format!("'{}' matched no conflicting file", pattern)));
        }
    }
    for pattern in &theirs_glob {
        let conflicts = session.conflicts().clone();
        let matched = session.policy_mut().take_theirs_matching(pattern, &conflicts);
        if matched == 0 {
            println!("{}", style::warn(&format!("'{}' matched no conflicting file", pattern)));
        }
    }
    session.set_ours_and_theirs(ours, theirs);

    if !session.policy().has_pending() {
        anyhow::bail!("nothing to resolve: pass --ours, --theirs, or a glob");
    }

    let applied = session.apply().context("failed to apply resolutions")?;
    for (file, stage) in &applied.entries {
        println!("  {} {}", style::stage(*stage), file);
    }
    println!();
    println!(
        "{}",
        style::success(&format!("{} file(s) resolved", applied.len()))
    );

    let remaining = session.unresolved();
    if !remaining.is_empty() {
        println!(
            "{}",
            style::dim(&format!("Still to resolve by hand: {}", remaining.join(", ")))
        );
    }

    session.close();
    Ok(())
}

fn cmd_commit(
    path: &Path,
    config: &EngineConfig,
    message: Option<&str>,
    amend: bool,
) -> Result<()> {
    let mut session = resume_session(path, config)?;
    ensure_merge_in_progress(&session)?;

    let message = message.unwrap_or(&config.commit.default_message);
    let record = session
        .merge_and_commit(message, amend)
        .context("failed to commit the resolution")?;

    let verb = if record.amend { "Amended" } else { "Committed" };
    println!(
        "{}",
        style::success(&format!(
            "{} {} by {}",
            verb,
            style::short_id(&record.id),
            record.author
        ))
    );
    let parents: Vec<&str> = record.parents.iter().map(|p| style::short_id(p)).collect();
    println!("{}", style::dim(&format!("  parents: {}", parents.join(" "))));
    Ok(())
}

fn cmd_reset(
    path: &Path,
    config: &EngineConfig,
    remote: bool,
    local: bool,
    to: Option<String>,
    yes: bool,
) -> Result<()> {
    let repo = open_repo(path, config)?;
    let settings = SessionSettings::from(config);

    let reference = match (remote, local, to) {
        (_, _, Some(reference)) => reference,
        (true, _, _) | (_, true, _) => {
            let branch = StateReset::branch_for(&repo, settings.branch.as_deref());
            if remote {
                StateReset::remote_ref(&settings.remote, &branch)
            } else {
                StateReset::local_ref(&branch)
            }
        }
        _ => anyhow::bail!("choose a reset target: --remote, --local, or --to <ref>"),
    };

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Hard reset to {}? All uncommitted changes will be lost.",
                reference
            ))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;

        if !confirmed {
            println!("{}", style::warn("Reset cancelled. Working tree was not modified."));
            return Ok(());
        }
    }

    let target = abandon_working_copy(repo, settings, &reference)
        .with_context(|| format!("failed to reset to {}", reference))?;
    println!(
        "{}",
        style::success(&format!(
            "Reset to {} ({})",
            reference,
            style::short_id(&target)
        ))
    );
    Ok(())
}

/// Hard-reset to `reference`, abandoning the merge session if one is open.
///
/// A rebase or cherry-pick in progress has no merge session, so the reset
/// is applied to the repository directly.
fn abandon_working_copy(
    repo: GitRepository,
    settings: SessionSettings,
    reference: &str,
) -> Result<String, SessionError> {
    match repo.pending_conflicts()? {
        MergeOutcome::Failed { reason } => {
            debug!(%reason, "no merge session, resetting directly");
            StateReset::reset_to(&repo, reference)
        }
        _ => MergeSession::resume(repo, settings)?.reset_to(reference),
    }
}

fn cmd_repos(root: &Path) -> Result<()> {
    let repos = repo_marker::find_repositories(root)
        .with_context(|| format!("failed to scan {}", root.display()))?;

    if repos.is_empty() {
        println!("No repositories found under {}", root.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Repository", "Branch"]);

    for repo_path in &repos {
        let branch = GitRepository::open(repo_path)
            .ok()
            .and_then(|r| r.current_branch().ok().flatten())
            .unwrap_or_else(|| "—".to_string());
        table.add_row(vec![
            Cell::new(repo_path.display()),
            Cell::new(branch),
        ]);
    }

    println!("{}", table);
    Ok(())
}

fn cmd_init(output: Option<PathBuf>) -> Result<()> {
    let default_config = r#"# mergeflow configuration

[identity]
# Author for resolution commits. Falls back to git's user.name / user.email.
# name = "Jane Doe"
# email = "jane@example.com"

[remote]
name = "origin"
# Branch used by `reset --remote` / `reset --local`. Defaults to the checked-out branch.
# branch = "main"

[commit]
default_message = "Merge conflicts resolved"
# Refuse to commit while hand-resolved files still contain conflict markers.
validate_markers = false

[logging]
level = "warn"
"#;

    let output = match output.or_else(EngineConfig::default_path) {
        Some(path) => path,
        None => anyhow::bail!("no config directory on this platform; pass --output"),
    };

    if output.exists() {
        let overwrite = Confirm::new()
            .with_prompt(format!("{} already exists. Overwrite?", output.display()))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;

        if !overwrite {
            println!(
                "{}",
                style::warn("Init cancelled. Existing file was not modified.")
            );
            return Ok(());
        }
    }

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&output, default_config).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    Ok(())
}

fn cmd_validate(explicit: Option<&Path>, config: &EngineConfig) -> Result<()> {
    match config_path(explicit) {
        Some(path) if path.exists() => println!("Validating configuration: {}", path.display()),
        _ => println!("No configuration file, validating defaults"),
    }
    println!();
    config.validate().context("configuration validation failed")?;

    println!("  Author        : {}", match config.identity.identity() {
        Some(identity) => identity.to_string(),
        None => "from git config".to_string(),
    });
    println!("  Remote        : {}", config.remote.name);
    println!(
        "  Branch        : {}",
        config.remote.branch.as_deref().unwrap_or("current")
    );
    println!("  Commit message: {}", config.commit.default_message);
    println!(
        "  Marker check  : {}",
        if config.commit.validate_markers { "on" } else { "off" }
    );
    println!("  Log level     : {}", config.logging.level);
    println!();
    println!("{}", style::success("Configuration is valid."));
    Ok(())
}
