// Game manager: drives world advancement on a fixed cadence and holds the
// single write path to the world state.
//
// Each tick freezes the previous round's delta for readers, consumes the
// per-player intent slots, classifies every proposed move against the body
// sets as they were at tick start (so processing order cannot change
// survival outcomes), applies deaths/growth/moves in ascending player-id
// order, and replenishes food. Database writes happen after the world lock
// is released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::time::{sleep_until, Duration, Instant};

use crate::config::Config;
use crate::db::Database;
use crate::metrics;
use crate::snapshots::SnapshotStore;

use super::grid::{Direction, Point};
use super::map::{Collision, MapManager};
use super::players::{PlayerManager, Session};
use super::snake::Snake;
use super::world::{FullState, PlayerState, WorldState};

/// Engine tunables, extracted from the application config.
#[derive(Debug, Clone)]
pub struct GameSettings {
    pub round_time_ms: u64,
    pub initial_length: u32,
    pub initial_invincible_rounds: u32,
    pub safe_spawn_radius: i32,
    pub target_food_count: usize,
    /// 0 disables snapshot persistence.
    pub snapshot_interval_rounds: u64,
}

impl GameSettings {
    pub fn from_config(cfg: &Config) -> Self {
        GameSettings {
            round_time_ms: cfg.round_time_ms,
            initial_length: cfg.initial_length,
            initial_invincible_rounds: cfg.initial_invincible_rounds,
            safe_spawn_radius: cfg.safe_spawn_radius,
            target_food_count: cfg.target_food_count,
            snapshot_interval_rounds: cfg.snapshot_interval_rounds,
        }
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        GameSettings {
            round_time_ms: 1000,
            initial_length: 3,
            initial_invincible_rounds: 5,
            safe_spawn_radius: 2,
            target_food_count: 30,
            snapshot_interval_rounds: 0,
        }
    }
}

/// How one proposed move resolved within a tick.
#[derive(Clone, Copy, Debug)]
enum Resolution {
    Move(Point),
    /// Classified collision while invincible, or losing side of an
    /// invincible head-to-head: the snake stays where it was.
    Cancel,
    Die(DeathCause, Point),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeathCause {
    Wall,
    SelfBody,
    OtherSnake,
    HeadToHead,
}

impl DeathCause {
    fn label(self) -> &'static str {
        match self {
            DeathCause::Wall => "wall",
            DeathCause::SelfBody => "self",
            DeathCause::OtherSnake => "other_snake",
            DeathCause::HeadToHead => "head_to_head",
        }
    }
}

pub struct GameManager {
    world: Arc<RwLock<WorldState>>,
    map: Arc<MapManager>,
    players: Arc<PlayerManager>,
    db: Arc<Database>,
    snapshots: SnapshotStore,
    settings: GameSettings,
    /// One intent slot per player; the last direction posted before the
    /// tick wins.
    intents: Mutex<HashMap<String, Direction>>,
    running: AtomicBool,
}

impl GameManager {
    pub fn new(
        map: Arc<MapManager>,
        players: Arc<PlayerManager>,
        db: Arc<Database>,
        snapshots: SnapshotStore,
        settings: GameSettings,
    ) -> Self {
        GameManager {
            world: Arc::new(RwLock::new(WorldState::new())),
            map,
            players,
            db,
            snapshots,
            settings,
            intents: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn world(&self) -> &Arc<RwLock<WorldState>> {
        &self.world
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    /// Store a direction intent for the player. Overwrites any earlier
    /// intent from the same tick window.
    pub fn queue_move(&self, player_id: &str, dir: Direction) {
        let mut intents = self.intents.lock().unwrap();
        intents.insert(player_id.to_string(), dir);
    }

    /// Spawn a snake for a freshly joined session at a safe position and
    /// return the full snapshot taken under the same lock, so the join
    /// response is consistent with what the delta stream will build on.
    /// Returns `None` when no safe spawn cell could be found.
    pub async fn spawn_player(&self, session: &Session) -> Option<FullState> {
        let mut world = self.world.write().await;
        let occupied = world.occupied_cells();
        let pos = self
            .map
            .random_safe_position(&occupied, self.settings.safe_spawn_radius)?;

        // A snake may never share a cell with food.
        if world.has_food_at(pos) {
            world.remove_food(pos);
        }

        let mut snake = Snake::spawn(pos, self.settings.initial_length);
        snake.set_invincible_rounds(self.settings.initial_invincible_rounds);
        world.add_player(PlayerState::new(
            session.player_id.clone(),
            session.name.clone(),
            session.color.clone(),
            snake,
        ));

        metrics::PLAYERS_JOINED_TOTAL.inc();
        metrics::ACTIVE_PLAYERS.set(world.player_count() as i64);
        Some(world.full_state())
    }

    /// Start the tick loop on a dedicated task. The loop sleeps to a
    /// monotonic deadline; if a tick overruns, whole periods are skipped so
    /// the published next-round timestamp stays accurate.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            let period = Duration::from_millis(manager.settings.round_time_ms.max(1));
            let mut next_deadline = Instant::now() + period;
            tracing::info!(period_ms = period.as_millis() as u64, "tick engine started");

            loop {
                sleep_until(next_deadline).await;
                if !manager.running.load(Ordering::Relaxed) {
                    break;
                }
                manager.tick().await;

                next_deadline += period;
                let now = Instant::now();
                if next_deadline <= now {
                    let behind = now.duration_since(next_deadline);
                    let skipped = (behind.as_millis() / period.as_millis() + 1) as u32;
                    next_deadline += period * skipped;
                    tracing::warn!(skipped, "tick overran its period, realigning");
                }
            }
            tracing::info!("tick engine stopped");
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Advance the world by one round.
    pub async fn tick(&self) {
        let tick_start = std::time::Instant::now();
        let mut dead: Vec<(String, PlayerState, DeathCause)> = Vec::new();
        let mut snapshot_json: Option<String> = None;
        let round;
        let now_ms;

        {
            let mut world = self.world.write().await;

            // The previous tick's delta has been visible to readers since
            // that tick completed; clear it before this tick's mutations.
            world.clear_delta_tracking();
            world.increment_round();
            world.update_timestamp();
            round = world.round();
            now_ms = world.timestamp();
            world.set_next_round_timestamp(now_ms + self.settings.round_time_ms as i64);

            // Freeze the pre-tick view: body sets, heads, invincibility.
            let ids: Vec<String> = world.players().keys().cloned().collect();
            let mut bodies: HashMap<String, HashSet<Point>> = HashMap::with_capacity(ids.len());
            let mut heads: HashMap<String, Point> = HashMap::with_capacity(ids.len());
            let mut invs: HashMap<String, u32> = HashMap::with_capacity(ids.len());
            for (id, p) in world.players() {
                bodies.insert(id.clone(), p.snake.cells().clone());
                heads.insert(id.clone(), p.snake.head());
                invs.insert(id.clone(), p.snake.invincible_rounds());
            }

            // Consume the intent slots.
            let intents = std::mem::take(&mut *self.intents.lock().unwrap());

            // Apply intents and collect proposed moves. An intent that is
            // the opposite of the current direction is silently dropped by
            // set_direction; a snake with no direction yet does not move.
            let mut proposed: Vec<(String, Point)> = Vec::new();
            for id in &ids {
                let Some(player) = world.player_mut(id) else {
                    continue;
                };
                if let Some(dir) = intents.get(id) {
                    player.snake.set_direction(*dir);
                }
                if let Some(new_head) = player.snake.next_head() {
                    proposed.push((id.clone(), new_head));
                }
            }

            // Classify against the pre-tick body sets.
            let mut outcome: HashMap<String, Resolution> = HashMap::with_capacity(proposed.len());
            for (id, new_head) in &proposed {
                let class = self.map.check_collision(id, heads[id], *new_head, &bodies);
                let res = match class {
                    Collision::None => Resolution::Move(*new_head),
                    _ if invs[id] > 0 => Resolution::Cancel,
                    Collision::Wall => Resolution::Die(DeathCause::Wall, *new_head),
                    Collision::SelfBody => Resolution::Die(DeathCause::SelfBody, *new_head),
                    Collision::OtherSnake => Resolution::Die(DeathCause::OtherSnake, *new_head),
                };
                outcome.insert(id.clone(), res);
            }

            // Head-to-head: two or more accepted moves onto the same empty
            // cell. Mortal participants die; among invincible participants
            // the smallest id takes the cell and the rest stay put.
            let mut by_target: HashMap<Point, Vec<String>> = HashMap::new();
            for (id, res) in &outcome {
                if let Resolution::Move(target) = res {
                    by_target.entry(*target).or_default().push(id.clone());
                }
            }
            for (target, mut group) in by_target {
                if group.len() < 2 {
                    continue;
                }
                group.sort();
                let mut cell_taken = false;
                for id in &group {
                    if invs[id] == 0 {
                        outcome.insert(id.clone(), Resolution::Die(DeathCause::HeadToHead, target));
                    } else if cell_taken {
                        outcome.insert(id.clone(), Resolution::Cancel);
                    } else {
                        cell_taken = true;
                    }
                }
                // Exactly one participant eats any food on the contested
                // cell. A survivor eats when it moves in; with no survivor
                // the smallest id consumes it before both snakes die.
                if !cell_taken && world.has_food_at(target) {
                    world.remove_food(target);
                    if let Some(player) = world.player_mut(&group[0]) {
                        player.foods_eaten += 1;
                    }
                    metrics::FOOD_EATEN_TOTAL.inc();
                }
            }

            // Resolve in ascending player-id order.
            let mut kill_credits: HashMap<String, u32> = HashMap::new();
            for id in &ids {
                match outcome.get(id) {
                    None | Some(Resolution::Cancel) => {}
                    Some(Resolution::Move(new_head)) => {
                        let ate = world.has_food_at(*new_head);
                        if ate {
                            world.remove_food(*new_head);
                        }
                        let Some(player) = world.player_mut(id) else {
                            continue;
                        };
                        if ate {
                            // Grow before advancing so the tail survives
                            // the eating tick.
                            player.snake.grow();
                            player.foods_eaten += 1;
                            metrics::FOOD_EATEN_TOTAL.inc();
                        }
                        player.snake.advance();
                    }
                    Some(Resolution::Die(cause, new_head)) => {
                        if *cause == DeathCause::OtherSnake {
                            let killer = bodies
                                .iter()
                                .find(|(oid, cells)| {
                                    oid.as_str() != id.as_str() && cells.contains(new_head)
                                })
                                .map(|(oid, _)| oid.clone());
                            if let Some(killer) = killer {
                                *kill_credits.entry(killer).or_insert(0) += 1;
                            }
                        }
                        if let Some(player) = world.remove_player(id) {
                            world.record_death(id);
                            metrics::PLAYERS_DIED_TOTAL
                                .with_label_values(&[cause.label()])
                                .inc();
                            tracing::info!(
                                player_id = %id,
                                cause = cause.label(),
                                round,
                                "snake died"
                            );
                            dead.push((id.clone(), player, *cause));
                        }
                    }
                }
            }

            // Credit kills, whether the killer survived the tick or not.
            for (killer, n) in kill_credits {
                if let Some(p) = world.player_mut(&killer) {
                    p.kills += n;
                } else if let Some((_, p, _)) = dead.iter_mut().find(|(id, _, _)| *id == killer) {
                    p.kills += n;
                }
            }

            // Invincibility burns down once per processed tick.
            for player in world.players_mut() {
                player.snake.tick_invincibility();
            }

            // Food replenishment up to the configured target.
            let food_count = world.food_count();
            if food_count < self.settings.target_food_count {
                let occupied = world.occupancy_counts();
                let existing = world.food_set();
                let new_foods = self.map.generate_food(
                    self.settings.target_food_count - food_count,
                    &occupied,
                    &existing,
                );
                for f in new_foods {
                    world.add_food(f);
                }
            }

            metrics::TICKS_TOTAL.inc();
            metrics::CURRENT_ROUND.set(round as i64);
            metrics::ACTIVE_PLAYERS.set(world.player_count() as i64);
            metrics::FOOD_ON_MAP.set(world.food_count() as i64);

            if self.settings.snapshot_interval_rounds > 0
                && round % self.settings.snapshot_interval_rounds == 0
            {
                match serde_json::to_string(&world.full_state()) {
                    Ok(json) => snapshot_json = Some(json),
                    Err(e) => tracing::error!("snapshot serialization failed: {e}"),
                }
            }
        }

        // World lock released: session teardown and database writes.
        for (id, player, _cause) in &dead {
            self.players.retire(id);
            if let Some(session) = self.players.get_session(id) {
                if let Err(e) = self
                    .db
                    .record_game_result(
                        &session.uid,
                        &player.name,
                        player.snake.len() as i64,
                        player.kills as i64,
                        player.foods_eaten as i64,
                        round as i64,
                        now_ms,
                    )
                    .await
                {
                    tracing::error!(player_id = %id, "failed to record game result: {e}");
                }
            }
        }

        if let Some(json) = snapshot_json {
            self.snapshots.persist(round, now_ms, &json).await;
        }

        metrics::TICK_DURATION_MS.observe(tick_start.elapsed().as_secs_f64() * 1000.0);
    }
}
