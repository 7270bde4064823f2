use std::{
    fs::OpenOptions,
    net::SocketAddr,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware,
};
use axum_server::Handle;
use clap::Parser;
use rusqlite::Connection;
use time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use spendwise::{
    AppState, BucketConfig, Error, RateLimiter, SqliteCounterStore, build_router,
    graceful_shutdown, logging_middleware,
};

/// The REST API server for spendwise.
///
/// Every option can also be set with the environment variable shown.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long, env = "DATABASE_URL")]
    db_path: PathBuf,

    /// File path to the SQLite database holding the rate limit bucket.
    ///
    /// Servers that share this file share one rate limit. Defaults to the
    /// application database.
    #[arg(long, env = "RATE_LIMIT_DB_PATH")]
    rate_limit_db_path: Option<PathBuf>,

    /// The port to serve the API from.
    #[arg(short, long, env = "PORT", default_value_t = 5001)]
    port: u16,

    /// The key of the rate limit bucket shared by all requests.
    #[arg(long, env = "RATE_LIMIT_KEY", default_value = "global")]
    rate_limit_key: String,

    /// The number of requests allowed in each rate limit window.
    #[arg(long, env = "RATE_LIMIT_CAPACITY", default_value_t = 100)]
    rate_limit_capacity: u32,

    /// The length of the rate limit window in seconds.
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    rate_limit_window_secs: i64,

    /// File path for the debug log.
    #[arg(long, env = "LOG_PATH", default_value = "debug.log")]
    log_path: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(error) = setup_logging(&args.log_path) {
        eprintln!("Could not set up logging: {error}");
        return ExitCode::FAILURE;
    }

    let state = match create_app_state(&args) {
        Ok(state) => state,
        Err(error) => {
            tracing::error!("Could not initialize the server: {error}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Database initialized successfully");

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(
        build_router(state).layer(middleware::from_fn(logging_middleware)),
    );

    tracing::info!("HTTP server listening on {}", addr);
    if let Err(error) = axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
    {
        tracing::error!("Server error: {error}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn create_app_state(args: &Args) -> Result<AppState, Error> {
    let bucket = BucketConfig::new(
        &args.rate_limit_key,
        args.rate_limit_capacity,
        Duration::seconds(args.rate_limit_window_secs),
    )?;

    let rate_limit_db_path = args.rate_limit_db_path.as_ref().unwrap_or(&args.db_path);
    let counter_store = SqliteCounterStore::new(
        Connection::open(rate_limit_db_path)
            .map_err(|error| Error::CounterStoreError(error.to_string()))?,
    )?;

    let db_connection = Connection::open(&args.db_path)?;

    AppState::new(db_connection, RateLimiter::new(counter_store, bucket))
}

fn setup_logging(log_path: &Path) -> Result<(), std::io::Error> {
    let stdout_log = tracing_subscriber::fmt::layer().pretty();

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let debug_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(filter::LevelFilter::INFO)
                .and_then(debug_log)
                .with_filter(filter::LevelFilter::DEBUG),
        )
        .init();

    Ok(())
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // By default, `TraceLayer` will log 5xx responses but we're doing our specific
        // logging of errors so disable that
        .on_failure(());

    router.layer(tracing_layer)
}
