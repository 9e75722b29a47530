use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gitvault::config::{LoggingConfig, Overrides};
use gitvault::{shutdown, Backup, BackupReport, Config, GitHubClient, PhaseReport, SystemGit};

#[derive(Parser)]
#[command(name = "gitvault")]
#[command(about = "Back up a GitHub account's repositories and gists")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    backup: BackupArgs,
}

#[derive(Args)]
struct BackupArgs {
    /// Back up public data without a token (requires --username)
    #[arg(long, global = true)]
    noauth: bool,

    /// Account to back up
    #[arg(short, long, global = true)]
    username: Option<String>,

    /// GitHub personal access token (or set GITHUB_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Number of repositories and gists exported at once
    #[arg(short = 't', long = "thread", global = true)]
    thread: Option<usize>,

    /// Backup root directory
    #[arg(short, long, global = true)]
    output_dir: Option<String>,

    /// API request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Skip gists
    #[arg(long, global = true)]
    no_gists: bool,

    /// Also mirror repository wikis
    #[arg(long, global = true)]
    wikis: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup pass (the default)
    Backup,

    /// Print the effective configuration with secrets redacted
    Config,
}

impl BackupArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            noauth: self.noauth,
            username: self.username.clone(),
            token: self.token.clone(),
            concurrency: self.thread,
            timeout: self.timeout,
            output_directory: self.output_dir.clone(),
            no_gists: self.no_gists,
            wikis: self.wikis,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = cli.backup.overrides();

    match cli.command {
        Some(Commands::Config) => cmd_config(cli.config, &overrides),
        None | Some(Commands::Backup) => {
            let config = Config::resolve(cli.config.as_deref(), &overrides)?;
            init_logging(&config.logging, cli.verbose)?;
            info!("Starting gitvault v{}", env!("CARGO_PKG_VERSION"));
            cmd_backup(&config).await
        }
    }
}

/// Initialize logging from the config, `--verbose` and `RUST_LOG`
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(logging.color);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if logging.format == "full" {
        registry.with(layer).try_init()
    } else {
        registry.with(layer.compact()).try_init()
    };

    result.context("Failed to initialize logging")
}

/// Print the effective configuration
fn cmd_config(config_path: Option<PathBuf>, overrides: &Overrides) -> Result<()> {
    let config = Config::layered(config_path.as_deref(), overrides)?;

    println!("⚙️  gitvault configuration");
    match &config_path {
        Some(path) => println!("   file: {}", path.display()),
        None => println!("   file: {}", Config::default_config_path()?.display()),
    }
    println!();
    println!("{}", config);

    if let Err(e) = config.validate() {
        println!("\n⚠️  {}", e);
    }

    Ok(())
}

/// Run one backup pass
async fn cmd_backup(config: &Config) -> Result<()> {
    info!("Effective configuration:\n{}", config);

    let api = GitHubClient::new(
        &config.api_url,
        config.auth(),
        Duration::from_secs(config.timeout),
    )
    .context("Failed to create GitHub client")?;

    let cancel = shutdown::install();
    let backup = Backup::new(Arc::new(api), Arc::new(SystemGit), config.backup_options())
        .with_cancel(cancel);

    println!("🔍 Backing up into {}", config.output_directory);
    let report = backup.run(&config.target()).await?;

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &BackupReport) {
    if report.cancelled {
        println!("\n🛑 Backup cancelled for {}", report.username);
    } else {
        println!("\n🎉 Backup complete for {}", report.username);
    }

    print_phase("Repositories", &report.repositories);
    match &report.gists {
        Some(gists) => print_phase("Gists", gists),
        None => println!("   📝 Gists: skipped"),
    }
    println!("   ⏱️  Duration: {:.2}s", report.duration.as_secs_f64());

    if report.total_failed() > 0 {
        println!("\n🔍 Failed items:");
        let gist_failures = report.gists.iter().flat_map(|g| g.failures.iter());
        for (item, reason) in report.repositories.failures.iter().chain(gist_failures) {
            println!("   ❌ {}: {}", item, reason);
        }
    }
}

fn print_phase(name: &str, phase: &PhaseReport) {
    println!("   📦 {}: {} listed", name, phase.listed);
    println!("      ✅ Succeeded: {}", phase.succeeded);
    println!("      ❌ Failed: {}", phase.failed());
    if phase.not_dispatched > 0 {
        println!("      ⏭️  Not started: {}", phase.not_dispatched);
    }
    if phase.listing_truncated {
        println!("      ⚠️  Listing was incomplete; some items were not seen");
    }
}
