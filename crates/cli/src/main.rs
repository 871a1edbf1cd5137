use bridge::config::{self, ConfigError};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bridge")]
#[command(about = "Telegram to Discord bridge with approval gate and schedule queries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until SIGINT/SIGTERM (default when no subcommand is given).
    Run,

    /// Show version
    Version,

    /// Resolve the configuration from the environment (and .env) and report problems.
    CheckConfig,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match dotenvy::dotenv() {
        Ok(path) => log::debug!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("reading .env failed: {}", e),
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("bridge {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::CheckConfig) => {
            let settings = load_or_exit();
            println!(
                "configuration ok: {} route(s), {} schedule location(s), telegram {} mode",
                settings.routes.len(),
                settings.schedule.locations.len(),
                settings.telegram_mode()
            );
        }
        Some(Commands::Run) | None => {
            let settings = load_or_exit();
            if let Err(e) = run(settings).await {
                log::error!("bridge failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

fn load_or_exit() -> config::Settings {
    match config::load_settings() {
        Ok(s) => s,
        Err(ConfigError::Missing(keys)) => {
            for key in keys {
                eprintln!("missing required environment variable: {}", key);
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(settings: config::Settings) -> anyhow::Result<()> {
    log::info!(
        "starting bridge on {}:{} with {} route(s)",
        settings.server.bind,
        settings.server.port,
        settings.routes.len()
    );
    bridge::bridge::run_bridge(settings).await
}
