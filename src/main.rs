use std::net::SocketAddr;
use std::sync::Arc;

use gridsnake_backend::api::{self, AppState};
use gridsnake_backend::config::Config;
use gridsnake_backend::db::Database;
use gridsnake_backend::engine::game::{GameManager, GameSettings};
use gridsnake_backend::engine::map::MapManager;
use gridsnake_backend::engine::players::PlayerManager;
use gridsnake_backend::metrics;
use gridsnake_backend::paste::PasteVerifier;
use gridsnake_backend::rate_limit::RateLimiter;
use gridsnake_backend::snapshots::SnapshotStore;

fn main() {
    tracing_subscriber::fmt::init();
    let config = Config::load();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");
    runtime.block_on(run(config));
}

async fn run(config: Config) {
    metrics::register_metrics();

    let db = Arc::new(
        Database::new(&config.database_url)
            .await
            .expect("Failed to initialize database"),
    );
    tracing::info!(url = %config.database_url, "database initialized");

    let verifier = PasteVerifier::new(
        config.paste_validation_text.clone(),
        config.universal_paste.clone(),
        config.paste_timeout_secs,
    );
    if config.universal_paste.is_some() {
        tracing::warn!("universal paste bypass is ENABLED");
    }

    let players = Arc::new(PlayerManager::new(db.clone(), verifier));
    let map = Arc::new(MapManager::new(config.grid_width, config.grid_height));
    let snapshots = SnapshotStore::new(db.clone(), config.snapshot_retention_hours);
    let game = Arc::new(GameManager::new(
        map.clone(),
        players.clone(),
        db.clone(),
        snapshots,
        GameSettings::from_config(&config),
    ));

    game.start();

    let rate_limiter = RateLimiter::new();
    spawn_rate_limit_sweeper(rate_limiter.clone());

    let state = AppState {
        db,
        world: game.world().clone(),
        game: game.clone(),
        players,
        map,
        rate_limiter,
        config: Arc::new(config.clone()),
    };
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind server port");

    tracing::info!(
        %addr,
        grid_width = config.grid_width,
        grid_height = config.grid_height,
        round_time_ms = config.round_time_ms,
        "gridsnake backend listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(game))
    .await
    .expect("Server error");
}

/// Periodically drop rate-limiter keys whose entries have all expired.
fn spawn_rate_limit_sweeper(limiter: RateLimiter) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.cleanup(std::time::Duration::from_secs(3600));
        }
    });
}

async fn shutdown_signal(game: Arc<GameManager>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::info!("shutdown signal received, stopping tick engine");
    game.stop();
}
