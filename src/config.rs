// Application configuration, loaded from environment variables and CLI flags.

/// One sliding-window limit: at most `max_requests` per `window_secs`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimit {
    fn parse(spec: &str) -> Option<RateLimit> {
        let (max, window) = spec.split_once('/')?;
        Some(RateLimit {
            max_requests: max.trim().parse().ok()?,
            window_secs: window.trim().parse().ok()?,
        })
    }
}

/// Per-endpoint rate limits.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub login: RateLimit,
    pub join: RateLimit,
    pub map: RateLimit,
    pub delta: RateLimit,
    pub game_move: RateLimit,
    pub leaderboard: RateLimit,
}

impl Default for RateLimits {
    fn default() -> Self {
        RateLimits {
            login: RateLimit { max_requests: 5, window_secs: 60 },
            join: RateLimit { max_requests: 10, window_secs: 60 },
            map: RateLimit { max_requests: 30, window_secs: 10 },
            delta: RateLimit { max_requests: 100, window_secs: 10 },
            game_move: RateLimit { max_requests: 30, window_secs: 10 },
            leaderboard: RateLimit { max_requests: 20, window_secs: 10 },
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string by default).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Tokio worker threads for the HTTP runtime.
    pub worker_threads: usize,
    /// Grid dimensions.
    pub grid_width: i32,
    pub grid_height: i32,
    /// Round period in milliseconds.
    pub round_time_ms: u64,
    /// Snake length at spawn.
    pub initial_length: u32,
    /// Invincibility rounds granted at spawn.
    pub initial_invincible_rounds: u32,
    /// Chebyshev radius that must be free of snake bodies around a spawn.
    pub safe_spawn_radius: i32,
    /// The engine replenishes food up to this count each tick.
    pub target_food_count: usize,
    /// Sentence the identity-proof paste must contain.
    pub paste_validation_text: String,
    /// Optional paste value that bypasses external verification.
    /// Unset or empty disables the bypass.
    pub universal_paste: Option<String>,
    /// Timeout for the external paste fetch, in seconds.
    pub paste_timeout_secs: u64,
    /// Persist a full snapshot every N rounds (0 disables persistence).
    pub snapshot_interval_rounds: u64,
    /// Drop persisted snapshots older than this many hours.
    pub snapshot_retention_hours: i64,
    pub rate_limits: RateLimits,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables (all optional):
    /// - `DATABASE_URL` (default `sqlite:gridsnake.db?mode=rwc`)
    /// - `PORT` (default 3000), `WORKER_THREADS` (default 4)
    /// - `GRID_WIDTH` / `GRID_HEIGHT` (default 50x50)
    /// - `ROUND_TIME_MS` (default 1000)
    /// - `INITIAL_LENGTH` (default 3), `INITIAL_INVINCIBLE_ROUNDS` (default 5)
    /// - `SAFE_SPAWN_RADIUS` (default 2), `TARGET_FOOD_COUNT` (default 30)
    /// - `PASTE_VALIDATION_TEXT`, `UNIVERSAL_PASTE`, `PASTE_TIMEOUT_SECS`
    /// - `SNAPSHOT_INTERVAL_ROUNDS` (default 60, 0 disables)
    /// - `SNAPSHOT_RETENTION_HOURS` (default 24)
    /// - `RATE_LIMIT_LOGIN` / `_JOIN` / `_MAP` / `_DELTA` / `_MOVE` /
    ///   `_LEADERBOARD` as `"max/window_secs"`, e.g. `"30/10"`
    ///
    /// CLI flags: `--port <PORT>` overrides the port.
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |name| std::env::var(name).ok())
    }

    fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        fn num<T: std::str::FromStr>(
            env: &impl Fn(&str) -> Option<String>,
            name: &str,
            default: T,
        ) -> T {
            env(name).and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        let database_url =
            env("DATABASE_URL").unwrap_or_else(|| "sqlite:gridsnake.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default.
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let mut limits = RateLimits::default();
        for (name, slot) in [
            ("RATE_LIMIT_LOGIN", &mut limits.login),
            ("RATE_LIMIT_JOIN", &mut limits.join),
            ("RATE_LIMIT_MAP", &mut limits.map),
            ("RATE_LIMIT_DELTA", &mut limits.delta),
            ("RATE_LIMIT_MOVE", &mut limits.game_move),
            ("RATE_LIMIT_LEADERBOARD", &mut limits.leaderboard),
        ] {
            if let Some(parsed) = env(name).as_deref().and_then(RateLimit::parse) {
                *slot = parsed;
            }
        }

        Config {
            database_url,
            port,
            worker_threads: num(&env, "WORKER_THREADS", 4),
            grid_width: num(&env, "GRID_WIDTH", 50),
            grid_height: num(&env, "GRID_HEIGHT", 50),
            round_time_ms: num(&env, "ROUND_TIME_MS", 1000),
            initial_length: num(&env, "INITIAL_LENGTH", 3),
            initial_invincible_rounds: num(&env, "INITIAL_INVINCIBLE_ROUNDS", 5),
            safe_spawn_radius: num(&env, "SAFE_SPAWN_RADIUS", 2),
            target_food_count: num(&env, "TARGET_FOOD_COUNT", 30),
            paste_validation_text: env("PASTE_VALIDATION_TEXT")
                .unwrap_or_else(|| "I am joining the snake arena".to_string()),
            universal_paste: env("UNIVERSAL_PASTE").filter(|v| !v.is_empty()),
            paste_timeout_secs: num(&env, "PASTE_TIMEOUT_SECS", 5),
            snapshot_interval_rounds: num(&env, "SNAPSHOT_INTERVAL_ROUNDS", 60),
            snapshot_retention_hours: num(&env, "SNAPSHOT_RETENTION_HOURS", 24),
            rate_limits: limits,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_with(vars: &[(&str, &str)], args: &[&str]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Config::from_sources(&args, move |name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = load_with(&[], &[]);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.grid_width, 50);
        assert_eq!(cfg.round_time_ms, 1000);
        assert_eq!(cfg.initial_length, 3);
        assert!(cfg.universal_paste.is_none());
    }

    #[test]
    fn test_cli_port_overrides_env() {
        let cfg = load_with(&[("PORT", "4000")], &["server", "--port", "5000"]);
        assert_eq!(cfg.port, 5000);
    }

    #[test]
    fn test_empty_universal_paste_disables_bypass() {
        let cfg = load_with(&[("UNIVERSAL_PASTE", "")], &[]);
        assert!(cfg.universal_paste.is_none());
        let cfg = load_with(&[("UNIVERSAL_PASTE", "letmein")], &[]);
        assert_eq!(cfg.universal_paste.as_deref(), Some("letmein"));
    }

    #[test]
    fn test_rate_limit_parsing() {
        let cfg = load_with(&[("RATE_LIMIT_MOVE", "60/5")], &[]);
        assert_eq!(cfg.rate_limits.game_move.max_requests, 60);
        assert_eq!(cfg.rate_limits.game_move.window_secs, 5);
        // Malformed specs fall back to the default.
        let cfg = load_with(&[("RATE_LIMIT_MOVE", "banana")], &[]);
        assert_eq!(cfg.rate_limits.game_move.max_requests, 30);
    }
}
