//! Murmur kernel
//!
//! HTTP server for the post API, plus seeding and token utilities.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use murmur_kernel::config::{AuthConfig, Config};
use murmur_kernel::db;
use murmur_kernel::routes;
use murmur_kernel::seed;
use murmur_kernel::services::auth::Authenticator;
use murmur_kernel::state::AppState;
use murmur_kernel::store::PgPostStore;

/// Post API server.
#[derive(Parser)]
#[command(name = "murmur", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Insert generated posts for development.
    Seed {
        /// Number of posts to create.
        #[arg(long, default_value_t = 100)]
        count: usize,
        /// Number of distinct owners to spread them across.
        #[arg(long, default_value_t = 10)]
        owners: usize,
    },
    /// Print a bearer token for a subject.
    Token {
        #[arg(long)]
        subject: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(load_config()?).await,
        Command::Seed { count, owners } => {
            let config = load_config()?;
            let pool = db::create_pool(&config).await?;
            db::run_migrations(&pool).await?;
            let written = seed::seed(&PgPostStore::new(pool), count, owners).await?;
            info!(written, "seeding complete");
            Ok(())
        }
        Command::Token { subject } => {
            // Minting a token needs no database or cache settings.
            let auth = AuthConfig::from_env().context("failed to load auth configuration")?;
            let issued = Authenticator::new(&auth).issue_token(&subject)?;
            println!("{}", issued.token);
            Ok(())
        }
    }
}

fn load_config() -> Result<Config> {
    Config::from_env().context("failed to load configuration")
}

async fn serve(config: Config) -> Result<()> {
    info!(port = config.port, env = %config.env, "starting murmur");

    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    spawn_limiter_sweeper(&state, config.rate_limit.window);

    let app = routes::app(state, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}

/// Periodically drop rate windows that have expired.
fn spawn_limiter_sweeper(state: &AppState, window: Duration) {
    let limiter = Arc::clone(state.pipeline().limiter());
    let period = window.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            limiter.sweep();
        }
    });
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
