//! MergeWatch command-line conflict checker.
//!
//! Checks one pull request against every other open pull request, prints
//! the conflicting files and line ranges, and optionally publishes the result
//! back to the pull request. Also manages the scratch workspace and the
//! configuration file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mergewatch_core::config::AppConfig;
use mergewatch_core::conflict::{
    ConflictStrategy, MergeSimulator, OverlapPrefilter, PatchOverlapAnalyzer,
};
use mergewatch_core::format_line_ranges;
use mergewatch_core::git::{GitHubClient, GitHubRepo, GitWorkspace};
use mergewatch_core::models::{ConflictReport, DetectionStrategy};
use mergewatch_core::notify::{GitHubNotifier, Notifier};
use mergewatch_core::ConflictEngine;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// MergeWatch command-line conflict checker.
#[derive(Parser, Debug)]
#[command(
    name = "mergewatch",
    version,
    about = "Find open pull requests that conflict with a given pull request"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./mergewatch.toml")]
    config: PathBuf,

    /// Log filter, overriding the configured level (e.g. `debug`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check one pull request against all other open pull requests.
    Check {
        /// Pull request number to check.
        #[arg(long)]
        pr: u64,

        /// Detection strategy, overriding the configured one.
        #[arg(long)]
        strategy: Option<DetectionStrategy>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        /// Publish the report to the pull request.
        #[arg(long)]
        notify: bool,
    },

    /// Delete temporary refs left in the workspace by interrupted runs.
    Sweep,

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./mergewatch.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // The configured level is only known after loading, which itself logs.
    let configured = AppConfig::load_from_file(&cli.config)
        .ok()
        .map(|c| c.log_level);
    init_tracing(cli.log_level.as_deref().or(configured.as_deref()));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(level.unwrap_or("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Sweep => {
            let config = load_config(&cli.config)?;
            cmd_sweep(&config)
        }
        Commands::Check {
            pr,
            strategy,
            json,
            notify,
        } => {
            let config = load_config(&cli.config)?;
            cmd_check(&config, pr, strategy, json, notify).await
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

fn open_workspace(config: &AppConfig) -> Result<GitWorkspace> {
    GitWorkspace::open(
        &config.workspace.path,
        config.workspace.remote.clone(),
        config.github.token.clone(),
    )
    .with_context(|| {
        format!(
            "failed to open workspace at {}",
            config.workspace.path.display()
        )
    })
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_check(
    config: &AppConfig,
    pr: u64,
    strategy: Option<DetectionStrategy>,
    json: bool,
    notify: bool,
) -> Result<()> {
    let token = config
        .require_token()
        .context("a GitHub token is required for check")?;
    let client = GitHubClient::new(&config.github.api_url, token);
    let source = Arc::new(GitHubRepo::new(client.clone(), &config.github.repo));

    let strategy = strategy.unwrap_or(config.detection.strategy);
    info!(pr, %strategy, repo = %config.github.repo, "checking pull request");

    let strategy: Box<dyn ConflictStrategy> = match strategy {
        DetectionStrategy::Merge => {
            let simulator =
                MergeSimulator::new(open_workspace(config)?, config.integration_branch());
            if config.detection.sweep_stale_refs {
                simulator
                    .sweep_stale_refs()
                    .context("failed to sweep stale temporary refs")?;
            }
            Box::new(simulator)
        }
        DetectionStrategy::Patch => Box::new(PatchOverlapAnalyzer),
    };

    let engine = ConflictEngine::new(source, strategy)
        .with_prefilter(OverlapPrefilter::new(
            config.detection.ignore_patterns.clone(),
        ))
        .with_max_concurrent_fetches(config.detection.max_concurrent_fetches);

    let report = engine
        .run(pr)
        .await
        .with_context(|| format!("conflict detection for #{} failed", pr))?;

    if json {
        let out = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{}", out);
    } else {
        print_report(&report);
    }

    if notify {
        let notifier = GitHubNotifier::new(client, &config.github.repo)
            .with_comment(config.notify.post_comment)
            .with_review_requests(config.notify.request_reviewers);
        notifier
            .publish(&report)
            .await
            .with_context(|| format!("failed to publish report to #{}", pr))?;
        if !json {
            println!("Report published to #{}.", pr);
        }
    }

    Ok(())
}

fn print_report(report: &ConflictReport) {
    println!();
    if !report.has_conflicts() {
        println!(
            "#{} has no conflicts with other open pull requests ({} strategy).",
            report.focal_id, report.strategy
        );
    } else {
        println!(
            "#{} conflicts with {} pull request(s) ({} strategy):",
            report.focal_id,
            report.records.len(),
            report.strategy
        );
        println!();

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["PR", "Author", "File", "Lines"]);

        for record in &report.records {
            for (path, lines) in &record.conflicting_files {
                table.add_row(vec![
                    Cell::new(format!("#{}", record.other.id)),
                    Cell::new(&record.other.author),
                    Cell::new(path),
                    Cell::new(format_line_ranges(lines)),
                ]);
            }
        }
        println!("{}", table);

        if !report.reviewers.is_empty() {
            let reviewers: Vec<&str> = report.reviewers.iter().map(String::as_str).collect();
            println!();
            println!("Suggested reviewers: {}", reviewers.join(", "));
        }
    }

    if !report.skipped.is_empty() {
        println!();
        println!("Could not check {} pull request(s):", report.skipped.len());
        for skipped in &report.skipped {
            println!("  #{}: {}", skipped.proposal_id, skipped.reason);
        }
    }
    println!();
}

fn cmd_sweep(config: &AppConfig) -> Result<()> {
    let simulator = MergeSimulator::new(open_workspace(config)?, None);
    let removed = simulator
        .sweep_stale_refs()
        .context("failed to sweep stale temporary refs")?;
    println!("Removed {} stale temporary ref(s).", removed);
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, AppConfig::template()).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Set github.repo and workspace.path");
    println!("  2. Clone the repository into workspace.path");
    println!("  3. Export the token variable named by github.token_env");
    println!(
        "  4. Validate with: mergewatch validate --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  GitHub repo     : {}", config.github.repo);
    println!(
        "  GitHub token    : {}",
        if config.github.token.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!("  Workspace       : {}", config.workspace.path.display());
    println!("  Strategy        : {}", config.detection.strategy);
    println!(
        "  Integration     : {}",
        config.integration_branch().as_deref().unwrap_or("disabled")
    );
    println!(
        "  Ignore patterns : {}",
        config.detection.ignore_patterns.len()
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}
