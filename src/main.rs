use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use treeline::{create_policy, Config, Engine, HttpRemote, Journal, LocalTree, RunSummary};

#[derive(Parser)]
#[command(name = "treeline")]
#[command(about = "Two-endpoint folder synchronization client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Journal file path (overrides configuration)
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Local root prefix (overrides configuration)
    #[arg(long)]
    prefix: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and the local root
    Init {
        /// Remote store endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Acting identity on the remote store
        #[arg(long)]
        username: Option<String>,
    },

    /// Build the journal and mirror every remote folder locally
    Populate,

    /// Apply remote changes to the local tree
    Pull,

    /// Apply local changes to the remote store
    Push,

    /// List detected local changes without applying anything
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!("Starting treeline v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(cli.config)?;
    if let Some(prefix) = cli.prefix {
        config.local.prefix = shellexpand::full(&prefix)?.into_owned();
    }
    if let Some(journal) = &cli.journal {
        config.local.journal = Some(journal.to_string_lossy().into_owned());
    }

    match cli.command {
        Commands::Init { endpoint, username } => cmd_init(endpoint, username, &config),
        Commands::Populate => {
            let engine = build_engine(&config, true)?;
            let summary = engine.populate().await?;
            print_summary("Population", &summary);
            Ok(())
        }
        Commands::Pull => {
            let engine = build_engine(&config, false)?;
            let summary = engine.pull().await?;
            print_summary("Pull", &summary);
            Ok(())
        }
        Commands::Push => {
            let engine = build_engine(&config, false)?;
            let summary = engine.push().await?;
            print_summary("Push", &summary);
            Ok(())
        }
        Commands::Status => {
            let engine = build_engine(&config, false)?;
            cmd_status(&engine).await
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Wire the journal, the remote client, the local tree and the policy together
///
/// `populate` decides how the journal is opened: populate may create (or
/// recreate) the file, every other command requires an existing journal.
fn build_engine(config: &Config, populate: bool) -> Result<Engine> {
    config.validate()?;

    let journal_path = config.journal_path()?;
    let journal = if populate {
        Journal::open_at(&journal_path)?
    } else {
        Journal::open_existing(&journal_path)?
    };

    let remote: Arc<dyn treeline::RemoteStore> = Arc::new(HttpRemote::new(config));
    let local = Arc::new(LocalTree::new(
        PathBuf::from(&config.local.prefix),
        config.server.buffer_size,
    ));
    let policy = create_policy(
        config.policy_kind()?,
        Arc::clone(&remote),
        Arc::clone(&local),
        config.server.username.clone(),
    );

    Ok(Engine::new(journal, remote, local, policy))
}

/// Write the configuration and create the local root
fn cmd_init(endpoint: Option<String>, username: Option<String>, config: &Config) -> Result<()> {
    let mut new_config = config.clone();
    if let Some(endpoint) = endpoint {
        new_config.server.endpoint = endpoint;
    }
    if let Some(username) = username {
        new_config.server.username = username;
    }
    new_config.validate()?;

    std::fs::create_dir_all(&new_config.local.prefix)?;

    let config_path = Config::default_config_path()?;
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    new_config.save(&config_path)?;

    println!("✅ treeline initialized successfully!");
    println!("   Config: {:?}", config_path);
    println!("   Local root: {}", new_config.local.prefix);
    println!("   Next: run 'treeline populate' to mirror the remote folders");

    Ok(())
}

/// List detected local changes without applying anything
async fn cmd_status(engine: &Engine) -> Result<()> {
    let pending = engine.status().await?;

    if pending.is_empty() {
        println!("✅ Local tree matches the journal");
        return Ok(());
    }

    println!("Pending local changes ({}):", pending.len());
    for change in &pending {
        let icon = match change.kind {
            treeline::ChangeKind::Add => "➕",
            treeline::ChangeKind::Modify => "✏️ ",
            treeline::ChangeKind::Delete => "🗑️ ",
            treeline::ChangeKind::None => continue,
        };
        println!(
            "   {} {} {}/{}",
            icon,
            change.kind.as_str(),
            change.folder,
            change.path
        );
    }

    Ok(())
}

/// Print a reconciliation summary to stdout
fn print_summary(label: &str, summary: &RunSummary) {
    println!("\n🎉 {} complete!", label);
    println!("   ✅ Applied: {}", summary.applied);
    println!("   ⏭️  Deferred: {}", summary.deferred);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.deferred > 0 {
        println!("\n💡 Tip: deferred actions are retried on the next run");
    }
}
