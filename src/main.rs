use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subgate::config::Config;
use subgate::handlers;
use subgate::sessions::spawn_sweeper;
use subgate::state::AppState;
use subgate::store::{InMemoryUserStore, UserRecord};

#[derive(Parser, Debug)]
#[command(name = "subgate")]
#[command(about = "Subscription billing backend with asynchronous payment reconciliation")]
struct Cli {
    /// Seed the user store with dev accounts (dev mode only)
    #[arg(long)]
    seed: bool,
}

/// Seeds the user store with dev accounts for manual testing.
fn seed_dev_data(users: &InMemoryUserStore) {
    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    for (id, email, name) in [
        (1, "alice@subgate.local", "Alice Dev"),
        (2, "bob@subgate.local", "Bob Dev"),
    ] {
        users.insert(
            UserRecord {
                id,
                email: email.to_string(),
                name: name.to_string(),
                billing_id: None,
                active: false,
            },
            "devpassword",
        );
        tracing::info!("User {}: {} (password: devpassword)", id, email);
    }

    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let users = Arc::new(InMemoryUserStore::new());

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set SUBGATE_ENV=dev)");
        } else {
            seed_dev_data(&users);
        }
    }

    let state = AppState::new(&config, users);

    tracing::info!(
        "Subscription policy: {} (unit: {} months)",
        state.provisioner.policy().name(),
        config.unit_months
    );

    // Background expiry sweep for login sessions.
    spawn_sweeper(state.sessions.clone(), config.sweep_interval, config.session_ttl);

    let app = Router::new()
        .merge(handlers::router())
        .merge(handlers::webhooks::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Subgate server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
