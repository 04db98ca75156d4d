//! Nimbus CLI

mod bootstrap;

use anyhow::{anyhow, Context, Result};
use bootstrap::ConfigBootstrapper;
use clap::{Parser, Subcommand};
use nimbus_app::{AppCommand, InstallOptions, MemoryConnector, PluginCatalog, RunOptions};
use nimbus_config::{load_config, Config, LogFormat};
use nimbus_gateway::{Gateway, SignalHandler};
use nimbus_supervisor::AppSupervisor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(about = "Nimbus application platform", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve every configured application behind the gateway
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml", env = "NIMBUS_CONFIG")]
        config: PathBuf,

        /// Log level (trace, debug, info, warn, error); overrides the config
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml", env = "NIMBUS_CONFIG")]
        config: PathBuf,
    },

    /// Install one application
    Install {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml", env = "NIMBUS_CONFIG")]
        config: PathBuf,

        /// Application name
        #[arg(short, long, default_value = "main")]
        app: String,

        /// Drop existing data first
        #[arg(long)]
        clean: bool,
    },

    /// Upgrade one application
    Upgrade {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml", env = "NIMBUS_CONFIG")]
        config: PathBuf,

        /// Application name
        #[arg(short, long, default_value = "main")]
        app: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, log_level } => {
            let config = load(&config)?;
            init_tracing(
                log_level.as_deref().unwrap_or(&config.logging.level),
                config.logging.format,
            )?;
            serve(config).await
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config, true) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!("  Listen: {}", cfg.gateway.listen);
                    tracing::info!("  Default app: {}", cfg.gateway.default_app);
                    tracing::info!("  Apps: {}", cfg.apps.len());
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Install { config, app, clean } => {
            let config = load(&config)?;
            init_tracing(&config.logging.level, config.logging.format)?;
            run_command(
                config,
                &app,
                AppCommand::Install(InstallOptions {
                    clean,
                    ..InstallOptions::default()
                }),
            )
            .await
        }

        Commands::Upgrade { config, app } => {
            let config = load(&config)?;
            init_tracing(&config.logging.level, config.logging.format)?;
            run_command(config, &app, AppCommand::Upgrade).await
        }

        Commands::Version => {
            println!("Nimbus application platform");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Platform version: {}", nimbus_app::PLATFORM_VERSION);
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<Config> {
    load_config(path, true).with_context(|| format!("failed to load {}", path.display()))
}

fn bootstrapper(config: Arc<Config>) -> ConfigBootstrapper {
    ConfigBootstrapper::new(config, PluginCatalog::new(), Arc::new(MemoryConnector::new()))
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!(
        listen = %config.gateway.listen,
        apps = config.apps.len(),
        "Starting Nimbus"
    );

    let config = Arc::new(config);
    let supervisor = AppSupervisor::new(config.supervisor.clone());
    supervisor.set_app_bootstrapper(Arc::new(bootstrapper(config.clone())));
    supervisor.init();

    let gateway = Arc::new(Gateway::new(config.gateway.clone(), supervisor.clone())?);

    let shutdown_signal = gateway.shutdown_signal();
    tokio::spawn(async move {
        if let Err(e) = SignalHandler::new(shutdown_signal).run().await {
            tracing::error!(error = %e, "Failed to install signal handlers");
        }
    });

    for app in config.apps.iter().filter(|app| app.auto_start) {
        let supervisor = supervisor.clone();
        let name = app.name.clone();
        tokio::spawn(async move {
            let state = supervisor.bootstrap_app(&name).await;
            tracing::info!(app = %name, state = %state, "Application booted");
        });
    }

    gateway.run().await?;

    tracing::info!("Nimbus stopped");
    Ok(())
}

async fn run_command(config: Config, name: &str, command: AppCommand) -> Result<()> {
    let config = Arc::new(config);
    let app = bootstrapper(config)
        .build(name)?
        .ok_or_else(|| anyhow!("application {name} is not configured"))?;

    let command_name = command.name().to_string();
    app.run_command(command, RunOptions::throwing()).await?;
    tracing::info!(app = %name, command = %command_name, "Command finished");

    app.destroy().await?;
    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let (pretty, json) = match format {
        LogFormat::Pretty => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true),
            ),
            None,
        ),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(pretty)
        .with(json)
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(filter.into())
                .add_directive("hyper=warn".parse()?),
        )
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install() {
        let cli = Cli::try_parse_from(["nimbus", "install", "--app", "crm", "--clean"]).unwrap();
        match cli.command {
            Commands::Install { app, clean, .. } => {
                assert_eq!(app, "crm");
                assert!(clean);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_example_config_is_valid() {
        let path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../config.example.yaml"));
        let config = load(path).unwrap();

        assert_eq!(config.apps.len(), 2);
        assert_eq!(config.gateway.default_app, "main");
        assert_eq!(config.gateway.host_map["crm.localhost"], "crm");
        assert!(!config.app("crm").unwrap().auto_start);
    }
}
