mod auth_commands;

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "lectern", about = "Lectern: sign in to your LMS from the terminal", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/lectern/).
    #[arg(long, global = true, env = "LECTERN_CONFIG_DIR")]
    config_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, log out and inspect stored credentials.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so `lectern auth token` output stays pipeable.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "lectern starting");

    if let Some(ref dir) = cli.config_dir {
        lectern_config::set_config_dir(dir.clone());
    }

    match cli.command {
        Commands::Auth { action } => auth_commands::handle_auth(action).await,
    }
}
