// Grid primitives: integer cell coordinates and movement directions.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A cell on the grid. Serialized on the wire as `{"x": .., "y": ..}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }

    /// The neighbouring cell one step in the given direction.
    /// A `None` direction leaves the point unchanged.
    pub fn step(self, dir: Direction) -> Point {
        match dir {
            Direction::Up => Point::new(self.x, self.y - 1),
            Direction::Down => Point::new(self.x, self.y + 1),
            Direction::Left => Point::new(self.x - 1, self.y),
            Direction::Right => Point::new(self.x + 1, self.y),
            Direction::None => self,
        }
    }
}

impl Hash for Point {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Pack both halves into one u64 so negative coordinates hash cleanly.
        let packed = ((self.x as u32 as u64) << 32) | (self.y as u32 as u64);
        packed.hash(state);
    }
}

/// Movement direction of a snake. `None` means the snake has not started
/// moving yet (freshly spawned).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    None,
}

impl Direction {
    /// Case-insensitive parse. Unknown strings fail.
    pub fn parse(s: &str) -> Option<Direction> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            "none" => Some(Direction::None),
            _ => None,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::None => Direction::None,
        }
    }

    /// Whether `other` is the reverse of `self`. `None` opposes nothing.
    pub fn is_opposite(self, other: Direction) -> bool {
        self != Direction::None && other == self.opposite()
    }
}
