use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use wellvoice::app::{ChatOptions, run_chat, run_health, run_history, run_stats};
use wellvoice::cli::{Cli, Commands, ConfigAction};
use wellvoice::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let command = cli.command.unwrap_or(Commands::Chat {
        latched: false,
        no_greeting: false,
        text_only: false,
        silent_engine: false,
        fallback: None,
        locale: None,
        voice: None,
    });

    match command {
        Commands::Chat {
            latched,
            no_greeting,
            text_only,
            silent_engine,
            fallback,
            locale,
            voice,
        } => {
            let mut config = load_config(cli.config.as_deref(), cli.api_base, cli.timeout)?;
            if let Some(locale) = locale {
                config.speech.locale = locale;
            }
            if voice.is_some() {
                config.speech.voice = voice;
            }
            if let Some(fallback_ms) = fallback {
                config.speech.fallback_ms = fallback_ms;
                config.speech.fallback_max_ms = config.speech.fallback_max_ms.max(fallback_ms);
            }
            let options = ChatOptions {
                latched,
                greet: !no_greeting,
                text_only,
                silent_engine,
                quiet: cli.quiet,
                verbose: cli.verbose,
            };
            run_chat(config, options).await?;
        }
        Commands::History { session } => {
            let config = load_config(cli.config.as_deref(), cli.api_base, cli.timeout)?;
            run_history(config, session).await?;
        }
        Commands::Stats => {
            let config = load_config(cli.config.as_deref(), cli.api_base, cli.timeout)?;
            run_stats(config).await?;
        }
        Commands::Health => {
            let config = load_config(cli.config.as_deref(), cli.api_base, cli.timeout)?;
            if let Err(e) = run_health(config).await {
                eprintln!("{} {e}", "Backend unreachable:".red());
                std::process::exit(1);
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "wellvoice", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` wins over `-v`.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "wellvoice=info",
        (false, _) => "wellvoice=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order (highest first):
/// 1. Command-line flags (--api-base, --timeout)
/// 2. Environment variables
/// 3. Custom config path from CLI (--config), else ~/.config/wellvoice/config.toml
/// 4. Built-in defaults
fn load_config(
    custom_path: Option<&Path>,
    api_base: Option<String>,
    timeout_ms: Option<u64>,
) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    let mut config = config.with_env_overrides();
    if let Some(api_base) = api_base {
        config.backend.api_base = api_base;
    }
    if let Some(timeout_ms) = timeout_ms {
        config.backend.request_timeout_ms = timeout_ms;
    }
    config.validate()?;
    Ok(config)
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                eprintln!(
                    "{} {} already exists (use --force to overwrite)",
                    "Error:".red(),
                    config_path.display()
                );
                std::process::exit(1);
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&config_path, Config::default().to_toml()?)?;
            println!("{} {}", "Wrote".green(), config_path.display());
        }
    }
    Ok(())
}
