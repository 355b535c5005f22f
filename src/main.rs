use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use focus_analytics::SessionAnalyzer;
use focus_core::config::AppConfig;
use focus_core::types::SessionRecord;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "focuslens",
    about = "Attention classification and study-session analytics server",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/focuslens/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Analyze a session JSON file ("-" for stdin) and print the result
    Analyze {
        file: PathBuf,
        /// Skip text generation and use the templated summary
        #[arg(long)]
        templated: bool,
    },

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    // Set up tracing.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "focuslens=info,focus_server=info,focus_analytics=info,warn".into()),
        )
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load config. The environment is consulted once, here.
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::load()?,
    };
    config.apply_env(|name| std::env::var(name).ok());

    match cli.command {
        Some(Commands::Serve { host, port }) => {
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            focus_server::serve(config).await?;
        }
        Some(Commands::Analyze { file, templated }) => {
            analyze_file(&config, &file, templated).await?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, &config)?;
        }
        None => {
            focus_server::serve(config).await?;
        }
    }

    Ok(())
}

async fn analyze_file(config: &AppConfig, file: &Path, templated: bool) -> Result<()> {
    let contents = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?
    };
    let record: SessionRecord =
        serde_json::from_str(&contents).context("invalid session JSON")?;

    let analyzer = if templated {
        SessionAnalyzer::templated()
    } else {
        SessionAnalyzer::from_config(&config.summary)?
    };
    let analysis = analyzer.analyze(&record).await?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            // Secrets resolved from the environment are not echoed.
            let mut shown = config.clone();
            if shown.summary.api_key.is_some() {
                shown.summary.api_key = Some("<set>".into());
            }
            let toml_str = toml::to_string_pretty(&shown)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                AppConfig::default().save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
