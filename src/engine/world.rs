// Authoritative world state: live players, food, round bookkeeping and the
// per-tick delta log. Mutations happen only under the world write lock held
// by the tick engine (plus the join path, which also takes the write lock).

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::grid::{Direction, Point};
use super::snake::Snake;

/// A live participant in the arena.
#[derive(Clone, Debug)]
pub struct PlayerState {
    pub id: String,
    pub name: String,
    pub color: String,
    pub snake: Snake,
    pub kills: u32,
    pub foods_eaten: u32,
}

impl PlayerState {
    pub fn new(id: String, name: String, color: String, snake: Snake) -> Self {
        PlayerState {
            id,
            name,
            color,
            snake,
            kills: 0,
            foods_eaten: 0,
        }
    }
}

/// Public projection of a player, as sent in full snapshots and in the
/// `joined_players` section of deltas. Never carries keys or tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerPublic {
    pub id: String,
    pub name: String,
    pub color: String,
    pub head: Point,
    pub blocks: Vec<Point>,
    pub length: usize,
    pub invincible_rounds: u32,
}

/// Minimal per-player motion record carried by every delta.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerMotion {
    pub id: String,
    pub head: Point,
    pub direction: Direction,
    pub length: usize,
    pub invincible_rounds: u32,
}

/// Self-contained snapshot sufficient to initialize a client from scratch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FullState {
    pub round: u64,
    pub timestamp: i64,
    pub next_round_timestamp: i64,
    pub players: Vec<PlayerPublic>,
    pub foods: Vec<Point>,
}

/// Changes between the previous round and this one. A client holding the
/// full state for round R applies the round R+1 delta to reconstruct R+1.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeltaState {
    pub round: u64,
    pub timestamp: i64,
    pub next_round_timestamp: i64,
    pub players: Vec<PlayerMotion>,
    pub joined_players: Vec<PlayerPublic>,
    pub died_players: Vec<String>,
    pub added_foods: Vec<Point>,
    pub removed_foods: Vec<Point>,
}

#[derive(Debug, Default)]
pub struct WorldState {
    round: u64,
    timestamp_ms: i64,
    next_round_timestamp_ms: i64,
    // BTreeMap keeps player iteration in ascending id order, which is the
    // deterministic processing order the tick engine relies on.
    players: BTreeMap<String, PlayerState>,
    foods: Vec<Point>,
    food_index: HashMap<Point, usize>,
    // Delta log, cleared at the start of the next tick.
    joined: Vec<String>,
    died: Vec<String>,
    added_foods: Vec<Point>,
    removed_foods: Vec<Point>,
}

impl WorldState {
    pub fn new() -> Self {
        WorldState::default()
    }

    // ── Round bookkeeping ────────────────────────────────────────────

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn increment_round(&mut self) {
        self.round += 1;
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn update_timestamp(&mut self) {
        self.timestamp_ms = chrono::Utc::now().timestamp_millis();
    }

    pub fn next_round_timestamp(&self) -> i64 {
        self.next_round_timestamp_ms
    }

    pub fn set_next_round_timestamp(&mut self, ts: i64) {
        self.next_round_timestamp_ms = ts;
    }

    // ── Players ──────────────────────────────────────────────────────

    /// Insert a player if the id is not already present; records the join
    /// in the delta log.
    pub fn add_player(&mut self, player: PlayerState) {
        if self.players.contains_key(&player.id) {
            return;
        }
        self.joined.push(player.id.clone());
        self.players.insert(player.id.clone(), player);
    }

    /// Erase a player mapping. Does NOT record a death by itself; the tick
    /// engine records `died_players` when removal is due to a collision.
    pub fn remove_player(&mut self, id: &str) -> Option<PlayerState> {
        self.players.remove(id)
    }

    pub fn record_death(&mut self, id: &str) {
        self.died.push(id.to_string());
    }

    pub fn player(&self, id: &str) -> Option<&PlayerState> {
        self.players.get(id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut PlayerState> {
        self.players.get_mut(id)
    }

    pub fn players(&self) -> &BTreeMap<String, PlayerState> {
        &self.players
    }

    /// Mutable iteration over live players, in ascending id order.
    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut PlayerState> {
        self.players.values_mut()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Every cell occupied by a live snake.
    pub fn occupied_cells(&self) -> HashSet<Point> {
        self.players
            .values()
            .flat_map(|p| p.snake.blocks())
            .collect()
    }

    /// Cell -> body-occupation count, for the food generator fast path.
    pub fn occupancy_counts(&self) -> HashMap<Point, u32> {
        let mut counts = HashMap::new();
        for p in self.players.values() {
            for cell in p.snake.blocks() {
                *counts.entry(cell).or_insert(0) += 1;
            }
        }
        counts
    }

    // ── Food ─────────────────────────────────────────────────────────

    /// No-op if the cell already has food; records the addition otherwise.
    pub fn add_food(&mut self, pos: Point) {
        if self.food_index.contains_key(&pos) {
            return;
        }
        self.foods.push(pos);
        self.food_index.insert(pos, self.foods.len() - 1);
        self.added_foods.push(pos);
    }

    /// O(1) removal by swapping with the last element; records the removal.
    pub fn remove_food(&mut self, pos: Point) {
        let Some(index) = self.food_index.remove(&pos) else {
            return;
        };
        let last = self.foods.len() - 1;
        if index != last {
            self.foods.swap(index, last);
            self.food_index.insert(self.foods[index], index);
        }
        self.foods.pop();
        self.removed_foods.push(pos);
    }

    pub fn has_food_at(&self, pos: Point) -> bool {
        self.food_index.contains_key(&pos)
    }

    pub fn foods(&self) -> &[Point] {
        &self.foods
    }

    pub fn food_count(&self) -> usize {
        self.foods.len()
    }

    pub fn food_set(&self) -> HashSet<Point> {
        self.food_index.keys().copied().collect()
    }

    // ── Snapshots ────────────────────────────────────────────────────

    fn public_projection(p: &PlayerState) -> PlayerPublic {
        PlayerPublic {
            id: p.id.clone(),
            name: p.name.clone(),
            color: p.color.clone(),
            head: p.snake.head(),
            blocks: p.snake.blocks().collect(),
            length: p.snake.len(),
            invincible_rounds: p.snake.invincible_rounds(),
        }
    }

    pub fn full_state(&self) -> FullState {
        FullState {
            round: self.round,
            timestamp: self.timestamp_ms,
            next_round_timestamp: self.next_round_timestamp_ms,
            players: self.players.values().map(Self::public_projection).collect(),
            foods: self.foods.clone(),
        }
    }

    pub fn delta_state(&self) -> DeltaState {
        let players = self
            .players
            .values()
            .map(|p| PlayerMotion {
                id: p.id.clone(),
                head: p.snake.head(),
                direction: p.snake.direction(),
                length: p.snake.len(),
                invincible_rounds: p.snake.invincible_rounds(),
            })
            .collect();

        // Players that joined and died within the same window are absent
        // from the map by now and are simply reported in `died_players`.
        let joined_players = self
            .joined
            .iter()
            .filter_map(|id| self.players.get(id))
            .map(Self::public_projection)
            .collect();

        DeltaState {
            round: self.round,
            timestamp: self.timestamp_ms,
            next_round_timestamp: self.next_round_timestamp_ms,
            players,
            joined_players,
            died_players: self.died.clone(),
            added_foods: self.added_foods.clone(),
            removed_foods: self.removed_foods.clone(),
        }
    }

    /// Empty the four delta buffers. Called by the tick engine at the start
    /// of the next tick, once the previous delta has been visible to readers.
    pub fn clear_delta_tracking(&mut self) {
        self.joined.clear();
        self.died.clear();
        self.added_foods.clear();
        self.removed_foods.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, head: Point) -> PlayerState {
        PlayerState::new(
            id.to_string(),
            format!("name-{id}"),
            "#ff0000".to_string(),
            Snake::from_blocks(vec![head], Direction::None),
        )
    }

    #[test]
    fn test_add_player_records_join_once() {
        let mut w = WorldState::new();
        w.add_player(player("p_1_000001", Point::new(2, 2)));
        w.add_player(player("p_1_000001", Point::new(9, 9)));
        assert_eq!(w.player_count(), 1);

        let delta = w.delta_state();
        assert_eq!(delta.joined_players.len(), 1);
        // The duplicate insert must not have displaced the original.
        assert_eq!(delta.joined_players[0].head, Point::new(2, 2));
    }

    #[test]
    fn test_remove_player_does_not_record_death() {
        let mut w = WorldState::new();
        w.add_player(player("p_1_000001", Point::new(2, 2)));
        w.clear_delta_tracking();
        w.remove_player("p_1_000001");
        assert!(w.delta_state().died_players.is_empty());

        w.record_death("p_1_000001");
        assert_eq!(w.delta_state().died_players, vec!["p_1_000001"]);
    }

    #[test]
    fn test_food_swap_remove_keeps_index_consistent() {
        let mut w = WorldState::new();
        let cells = [
            Point::new(1, 1),
            Point::new(2, 2),
            Point::new(3, 3),
            Point::new(4, 4),
        ];
        for c in cells {
            w.add_food(c);
        }
        w.remove_food(Point::new(2, 2));
        assert_eq!(w.food_count(), 3);
        assert_eq!(w.foods().len(), 3);
        assert!(!w.has_food_at(Point::new(2, 2)));
        // Every remaining food must still be findable through the index.
        for c in [Point::new(1, 1), Point::new(3, 3), Point::new(4, 4)] {
            assert!(w.has_food_at(c));
            w.remove_food(c);
        }
        assert_eq!(w.food_count(), 0);
    }

    #[test]
    fn test_duplicate_food_is_ignored() {
        let mut w = WorldState::new();
        w.add_food(Point::new(5, 5));
        w.add_food(Point::new(5, 5));
        assert_eq!(w.food_count(), 1);
        assert_eq!(w.delta_state().added_foods.len(), 1);
    }

    #[test]
    fn test_clear_delta_tracking() {
        let mut w = WorldState::new();
        w.add_player(player("p_1_000001", Point::new(2, 2)));
        w.add_food(Point::new(5, 5));
        w.remove_food(Point::new(5, 5));
        w.record_death("p_9_000009");
        w.clear_delta_tracking();

        let delta = w.delta_state();
        assert!(delta.joined_players.is_empty());
        assert!(delta.died_players.is_empty());
        assert!(delta.added_foods.is_empty());
        assert!(delta.removed_foods.is_empty());
        // Live players are still reported in the motion list.
        assert_eq!(delta.players.len(), 1);
    }

    #[test]
    fn test_players_iterate_in_ascending_id_order() {
        let mut w = WorldState::new();
        w.add_player(player("p_2_b", Point::new(1, 1)));
        w.add_player(player("p_1_a", Point::new(2, 2)));
        w.add_player(player("p_3_c", Point::new(3, 3)));
        let ids: Vec<&String> = w.players().keys().collect();
        assert_eq!(ids, ["p_1_a", "p_2_b", "p_3_c"]);
    }

    #[test]
    fn test_full_state_serialization_shape() {
        let mut w = WorldState::new();
        w.add_player(player("p_1_000001", Point::new(2, 2)));
        w.add_food(Point::new(5, 5));
        w.increment_round();
        w.update_timestamp();
        w.set_next_round_timestamp(w.timestamp() + 500);

        let json = serde_json::to_value(w.full_state()).unwrap();
        assert_eq!(json["round"], 1);
        assert_eq!(json["players"][0]["head"]["x"], 2);
        assert_eq!(json["players"][0]["length"], 1);
        assert_eq!(json["foods"][0]["y"], 5);
        assert!(
            json["next_round_timestamp"].as_i64().unwrap() >= json["timestamp"].as_i64().unwrap()
        );
    }
}
