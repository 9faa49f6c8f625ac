// Map manager: grid bounds, safe-spawn sampling, food generation and the
// collision classifier the tick engine runs against pre-tick body sets.

use std::collections::{HashMap, HashSet};

use rand::Rng;

use super::grid::Point;

/// What a proposed head position would hit, in fixed priority order:
/// wall, then own body, then another snake. Invincibility never changes
/// the classification, only whether the engine kills the snake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collision {
    None,
    Wall,
    SelfBody,
    OtherSnake,
}

pub struct MapManager {
    width: i32,
    height: i32,
}

impl MapManager {
    pub fn new(width: i32, height: i32) -> Self {
        MapManager { width, height }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn is_valid_position(&self, pos: Point) -> bool {
        pos.x >= 0 && pos.x < self.width && pos.y >= 0 && pos.y < self.height
    }

    /// Classify `new_head` for the snake `id` against a set of body cells
    /// per live snake (the tick engine passes the sets frozen at tick start,
    /// which makes the outcome independent of processing order).
    ///
    /// `own_head` is excluded from the self check: a snake cannot collide
    /// with the cell its head is about to vacate.
    pub fn check_collision(
        &self,
        id: &str,
        own_head: Point,
        new_head: Point,
        bodies: &HashMap<String, HashSet<Point>>,
    ) -> Collision {
        if !self.is_valid_position(new_head) {
            return Collision::Wall;
        }

        if let Some(own) = bodies.get(id) {
            if new_head != own_head && own.contains(&new_head) {
                return Collision::SelfBody;
            }
        }

        for (other_id, cells) in bodies {
            if other_id == id {
                continue;
            }
            if cells.contains(&new_head) {
                return Collision::OtherSnake;
            }
        }

        Collision::None
    }

    /// Sample a spawn cell whose surrounding `radius`-square (Chebyshev)
    /// contains no occupied cell. Sampling is uniform over the sub-rectangle
    /// clamped by `radius` on each side; if that rectangle is empty the
    /// whole grid is used. Returns `None` when no safe cell was found
    /// within the attempt budget.
    pub fn random_safe_position(
        &self,
        occupied: &HashSet<Point>,
        radius: i32,
    ) -> Option<Point> {
        if self.width <= 0 || self.height <= 0 {
            return None;
        }
        let radius = radius.max(0);

        let total_cells = self.width as usize * self.height as usize;
        let max_attempts = total_cells.min((total_cells / 10).max(100));

        let mut min_x = radius;
        let mut max_x = self.width - 1 - radius;
        let mut min_y = radius;
        let mut max_y = self.height - 1 - radius;
        if min_x > max_x || min_y > max_y {
            min_x = 0;
            max_x = self.width - 1;
            min_y = 0;
            max_y = self.height - 1;
        }

        let mut rng = rand::thread_rng();
        for _ in 0..max_attempts {
            let candidate = Point::new(
                rng.gen_range(min_x..=max_x),
                rng.gen_range(min_y..=max_y),
            );
            if self.is_safe_area(candidate, radius, occupied) {
                return Some(candidate);
            }
        }

        tracing::warn!(
            attempts = max_attempts,
            "no safe spawn position found"
        );
        None
    }

    fn is_safe_area(&self, center: Point, radius: i32, occupied: &HashSet<Point>) -> bool {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let p = Point::new(center.x + dx, center.y + dy);
                if !self.is_valid_position(p) {
                    continue;
                }
                if occupied.contains(&p) {
                    return false;
                }
            }
        }
        true
    }

    /// Generate up to `count` food cells, none of which may land on a snake
    /// body, an existing food, or another cell chosen in this call. Each
    /// food gets up to 100 placement attempts; requests above half the grid
    /// are capped.
    pub fn generate_food(
        &self,
        count: usize,
        occupied_counts: &HashMap<Point, u32>,
        existing_foods: &HashSet<Point>,
    ) -> Vec<Point> {
        let mut foods = Vec::new();
        if count == 0 || self.width <= 0 || self.height <= 0 {
            return foods;
        }

        let total_cells = self.width as usize * self.height as usize;
        let count = if count > total_cells / 2 {
            tracing::warn!(requested = count, "food request exceeds half the grid, capping");
            (total_cells / 2).max(1)
        } else {
            count
        };

        const MAX_ATTEMPTS_PER_FOOD: usize = 100;
        let mut chosen: HashSet<Point> = HashSet::with_capacity(count * 2);
        let mut rng = rand::thread_rng();

        for _ in 0..count {
            let mut placed = false;
            for _ in 0..MAX_ATTEMPTS_PER_FOOD {
                let candidate = Point::new(
                    rng.gen_range(0..self.width),
                    rng.gen_range(0..self.height),
                );
                if existing_foods.contains(&candidate)
                    || chosen.contains(&candidate)
                    || occupied_counts.contains_key(&candidate)
                {
                    continue;
                }
                foods.push(candidate);
                chosen.insert(candidate);
                placed = true;
                break;
            }
            if !placed {
                tracing::debug!("food placement attempts exhausted");
            }
        }

        foods
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bodies_of(entries: &[(&str, &[Point])]) -> HashMap<String, HashSet<Point>> {
        entries
            .iter()
            .map(|(id, cells)| (id.to_string(), cells.iter().copied().collect()))
            .collect()
    }

    #[test]
    fn test_bounds() {
        let map = MapManager::new(10, 10);
        assert!(map.is_valid_position(Point::new(0, 0)));
        assert!(map.is_valid_position(Point::new(9, 9)));
        assert!(!map.is_valid_position(Point::new(10, 3)));
        assert!(!map.is_valid_position(Point::new(3, -1)));
    }

    #[test]
    fn test_collision_wall_beats_everything() {
        let map = MapManager::new(10, 10);
        // Even with a body on the out-of-bounds cell, wall wins.
        let bodies = bodies_of(&[("a", &[Point::new(9, 3)]), ("b", &[Point::new(10, 3)])]);
        let c = map.check_collision("a", Point::new(9, 3), Point::new(10, 3), &bodies);
        assert_eq!(c, Collision::Wall);
    }

    #[test]
    fn test_collision_self_excludes_head() {
        let map = MapManager::new(10, 10);
        let own: &[Point] = &[Point::new(3, 3), Point::new(2, 3), Point::new(1, 3)];
        let bodies = bodies_of(&[("a", own)]);
        // Reversing into own neck is a self collision.
        let c = map.check_collision("a", Point::new(3, 3), Point::new(2, 3), &bodies);
        assert_eq!(c, Collision::SelfBody);
        // The head's own cell never self-collides.
        let c = map.check_collision("a", Point::new(3, 3), Point::new(3, 3), &bodies);
        assert_eq!(c, Collision::None);
    }

    #[test]
    fn test_collision_other_snake() {
        let map = MapManager::new(10, 10);
        let bodies = bodies_of(&[
            ("a", &[Point::new(3, 3), Point::new(2, 3)]),
            ("b", &[Point::new(4, 3), Point::new(5, 3)]),
        ]);
        let c = map.check_collision("a", Point::new(3, 3), Point::new(4, 3), &bodies);
        assert_eq!(c, Collision::OtherSnake);
    }

    #[test]
    fn test_collision_self_before_other() {
        let map = MapManager::new(10, 10);
        // Both snakes occupy the target cell; SELF takes priority.
        let shared = Point::new(2, 3);
        let bodies = bodies_of(&[
            ("a", &[Point::new(3, 3), shared]),
            ("b", &[shared]),
        ]);
        let c = map.check_collision("a", Point::new(3, 3), shared, &bodies);
        assert_eq!(c, Collision::SelfBody);
    }

    #[test]
    fn test_collision_none_on_open_cell() {
        let map = MapManager::new(10, 10);
        let bodies = bodies_of(&[("a", &[Point::new(3, 3)])]);
        let c = map.check_collision("a", Point::new(3, 3), Point::new(4, 3), &bodies);
        assert_eq!(c, Collision::None);
    }

    #[test]
    fn test_safe_position_avoids_occupied_radius() {
        let map = MapManager::new(12, 12);
        let occupied: HashSet<Point> = [Point::new(5, 5)].into_iter().collect();
        for _ in 0..50 {
            let pos = map.random_safe_position(&occupied, 2).unwrap();
            assert!(map.is_valid_position(pos));
            assert!(
                (pos.x - 5).abs() > 2 || (pos.y - 5).abs() > 2,
                "spawn {pos:?} violates the safe radius"
            );
        }
    }

    #[test]
    fn test_safe_position_on_crowded_grid_fails() {
        let map = MapManager::new(4, 4);
        let occupied: HashSet<Point> = (0..4)
            .flat_map(|x| (0..4).map(move |y| Point::new(x, y)))
            .collect();
        assert_eq!(map.random_safe_position(&occupied, 0), None);
    }

    #[test]
    fn test_safe_position_radius_larger_than_grid_falls_back() {
        let map = MapManager::new(3, 3);
        let occupied = HashSet::new();
        // Radius clamps away the whole sub-rectangle; the full grid is used.
        let pos = map.random_safe_position(&occupied, 10).unwrap();
        assert!(map.is_valid_position(pos));
    }

    #[test]
    fn test_generate_food_avoids_occupied_and_existing() {
        let map = MapManager::new(6, 6);
        let occupied: HashMap<Point, u32> =
            [(Point::new(1, 1), 1), (Point::new(2, 2), 2)].into_iter().collect();
        let existing: HashSet<Point> = [Point::new(3, 3)].into_iter().collect();

        let foods = map.generate_food(10, &occupied, &existing);
        assert_eq!(foods.len(), 10);
        let unique: HashSet<Point> = foods.iter().copied().collect();
        assert_eq!(unique.len(), foods.len());
        for f in &foods {
            assert!(map.is_valid_position(*f));
            assert!(!occupied.contains_key(f));
            assert!(!existing.contains(f));
        }
    }

    #[test]
    fn test_generate_food_caps_at_half_grid() {
        let map = MapManager::new(4, 4);
        let foods = map.generate_food(100, &HashMap::new(), &HashSet::new());
        assert!(foods.len() <= 8);
    }

    #[test]
    fn test_generate_food_zero_count() {
        let map = MapManager::new(4, 4);
        assert!(map.generate_food(0, &HashMap::new(), &HashSet::new()).is_empty());
    }
}
