// Prometheus metrics definitions for the game server.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Snakes currently alive in the arena.
    pub static ref ACTIVE_PLAYERS: IntGauge =
        IntGauge::new("gridsnake_active_players", "Snakes currently alive").unwrap();

    /// Food cells currently on the map.
    pub static ref FOOD_ON_MAP: IntGauge =
        IntGauge::new("gridsnake_food_on_map", "Food cells currently on the map").unwrap();

    /// Current round number.
    pub static ref CURRENT_ROUND: IntGauge =
        IntGauge::new("gridsnake_current_round", "Current round number").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total ticks advanced since startup.
    pub static ref TICKS_TOTAL: IntCounter =
        IntCounter::new("gridsnake_ticks_total", "Total ticks advanced").unwrap();

    /// Total players that joined the arena.
    pub static ref PLAYERS_JOINED_TOTAL: IntCounter =
        IntCounter::new("gridsnake_players_joined_total", "Total players joined").unwrap();

    /// Total snake deaths, by cause (wall, self, other_snake, head_to_head).
    pub static ref PLAYERS_DIED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gridsnake_players_died_total", "Total snake deaths"),
        &["cause"],
    )
    .unwrap();

    /// Total food cells eaten.
    pub static ref FOOD_EATEN_TOTAL: IntCounter =
        IntCounter::new("gridsnake_food_eaten_total", "Total food eaten").unwrap();

    /// Total move intents accepted.
    pub static ref MOVES_ACCEPTED_TOTAL: IntCounter =
        IntCounter::new("gridsnake_moves_accepted_total", "Move intents accepted").unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gridsnake_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    /// Total requests rejected by the rate limiter, by endpoint.
    pub static ref RATE_LIMITED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gridsnake_rate_limited_total", "Requests rejected by the rate limiter"),
        &["endpoint"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Per-tick processing time in milliseconds.
    pub static ref TICK_DURATION_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("gridsnake_tick_duration_ms", "Per-tick processing time in ms")
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
    )
    .unwrap();

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "gridsnake_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_PLAYERS.clone()),
        Box::new(FOOD_ON_MAP.clone()),
        Box::new(CURRENT_ROUND.clone()),
        Box::new(TICKS_TOTAL.clone()),
        Box::new(PLAYERS_JOINED_TOTAL.clone()),
        Box::new(PLAYERS_DIED_TOTAL.clone()),
        Box::new(FOOD_EATEN_TOTAL.clone()),
        Box::new(MOVES_ACCEPTED_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(RATE_LIMITED_TOTAL.clone()),
        Box::new(TICK_DURATION_MS.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Normalize a URL path for metric labels: replace numeric path segments
/// with `:id` to prevent cardinality explosion.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<i64>().is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/api/game/map"), "/api/game/map");
        assert_eq!(normalize_path("/api/thing/42"), "/api/thing/:id");
    }

    #[test]
    fn test_metric_updates_do_not_panic() {
        ACTIVE_PLAYERS.set(2);
        assert_eq!(ACTIVE_PLAYERS.get(), 2);
        ACTIVE_PLAYERS.set(0);

        TICKS_TOTAL.inc();
        PLAYERS_DIED_TOTAL.with_label_values(&["wall"]).inc();
        TICK_DURATION_MS.observe(0.7);
        API_REQUESTS_TOTAL
            .with_label_values(&["POST", "/api/game/move", "0"])
            .inc();
    }

    #[test]
    fn test_gather_metrics_returns_string() {
        register_metrics();
        let output = gather_metrics();
        assert!(output.is_empty() || output.contains("gridsnake_"));
    }
}
