//! BitPredict - guess where Bitcoin goes next
//!
//! Serves the game API, runs the delayed resolution worker and keeps the
//! reference price fresh from Binance.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bitpredict_backend::{
    api::{create_router, ApiSettings, AppState},
    auth::JwtHandler,
    config::{Config, StoreBackend},
    game::{logic::is_valid_price, Clock, GuessLifecycle, LockManager, SystemClock},
    scrapers::{spawn_price_poller, BinancePricePoller},
    store::{GuessStore, LockStore, MemoryStore, SqliteStore},
    tasks::{task_queue, RetryPolicy},
};

#[derive(Parser, Debug)]
#[command(name = "bitpredict")]
#[command(about = "Bitcoin price prediction game backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the API server, resolution worker and price poller (default)
    Serve,
    /// Print a signed player token
    Token {
        uid: String,
        #[arg(long, default_value = "24")]
        hours: i64,
    },
    /// Store a reference price by hand (sqlite backend only)
    SetPrice { price: f64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Token { uid, hours } => {
            let handler = JwtHandler::new(config.jwt_secret).with_expiration_hours(hours);
            let (token, expires_in) = handler.generate_token(&uid)?;
            info!(uid = %uid, expires_in, "🔑 Token issued");
            println!("{token}");
            Ok(())
        }
        Command::SetPrice { price } => {
            if !is_valid_price(price) {
                bail!("price must be a positive finite number, got {price}");
            }
            if config.store_backend != StoreBackend::Sqlite {
                bail!("set-price needs STORE_BACKEND=sqlite; the memory store lives only inside `serve`");
            }
            let store = SqliteStore::new(&config.database_path)?;
            store
                .record_price(price)
                .await
                .context("failed to record price")?;
            info!(price, db = %config.database_path, "💾 Reference price stored");
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("🚀 BitPredict backend starting");

    if config.uses_default_secret() {
        warn!("⚠️  JWT_SECRET not set, using the development default");
    }
    if config.task_token.is_none() {
        warn!("⚠️  TASK_TOKEN not set, resolve-guess callback is unauthenticated");
    }

    let (guess_store, lock_store) = open_stores(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let locks = LockManager::new(lock_store, clock.clone(), config.lock_ttl());

    let (queue, worker) = task_queue(RetryPolicy {
        max_attempts: config.task_max_attempts,
        base_backoff: Duration::from_millis(config.task_retry_base_ms),
    });
    let lifecycle = Arc::new(GuessLifecycle::new(
        guess_store.clone(),
        locks,
        Arc::new(queue),
        clock,
    ));

    tokio::spawn(worker.run(lifecycle.clone()));

    match lifecycle.reschedule_pending().await {
        Ok(count) => info!(count, "Pending guesses recovered"),
        Err(e) => warn!(error = %e, "failed to reschedule pending guesses"),
    }

    if config.price_feed_enabled {
        let poller = Arc::new(BinancePricePoller::new(
            config.price_api_url.clone(),
            config.price_symbol.clone(),
            guess_store,
        )?);
        tokio::spawn(spawn_price_poller(poller, config.price_poll_ms));
    } else {
        info!("Price feed disabled (PRICE_FEED_ENABLED=false)");
    }

    let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let state = AppState::new(
        lifecycle,
        ApiSettings {
            resolution_delay_secs: config.guess_resolution_delay_secs,
            leaderboard_limit: config.leaderboard_limit,
            history_page_size: config.history_page_size,
            task_token: config.task_token.clone(),
        },
    );
    let app = create_router(state, jwt_handler);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn open_stores(config: &Config) -> Result<(Arc<dyn GuessStore>, Arc<dyn LockStore>)> {
    match config.store_backend {
        StoreBackend::Sqlite => {
            let store = Arc::new(
                SqliteStore::new(&config.database_path)
                    .with_context(|| format!("failed to open {}", config.database_path))?,
            );
            info!(db = %config.database_path, "💾 SQLite store ready");
            Ok((store.clone(), store))
        }
        StoreBackend::Memory => {
            warn!("In-memory store selected, state is lost on restart");
            let store = Arc::new(MemoryStore::new());
            Ok((store.clone(), store))
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitpredict_backend=debug,bitpredict=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // cwd and parents first, then the crate directory.
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
