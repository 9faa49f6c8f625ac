// Snake body: an ordered chain of cells (head first) mirrored by a hash set
// so collision queries stay O(1). The chain and the set are only ever
// mutated together through `advance`, `grow` and `kill`.

use std::collections::{HashSet, VecDeque};

use super::grid::{Direction, Point};

/// What a single `advance` did, so callers can update occupancy indexes
/// incrementally instead of re-walking the whole body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    pub new_head: Point,
    /// `None` when the move consumed a pending growth step.
    pub removed_tail: Option<Point>,
}

#[derive(Clone, Debug)]
pub struct Snake {
    blocks: VecDeque<Point>,
    block_set: HashSet<Point>,
    direction: Direction,
    invincible_rounds: u32,
    alive: bool,
    growth_pending: u32,
}

impl Snake {
    /// A freshly spawned snake occupies a single cell; the remaining
    /// `initial_length - 1` cells materialize over the first moves by
    /// suppressing tail removal.
    pub fn spawn(head: Point, initial_length: u32) -> Self {
        let mut blocks = VecDeque::new();
        blocks.push_back(head);
        let mut block_set = HashSet::new();
        block_set.insert(head);
        Snake {
            blocks,
            block_set,
            direction: Direction::None,
            invincible_rounds: 0,
            alive: true,
            growth_pending: initial_length.saturating_sub(1),
        }
    }

    /// Build a snake from an explicit chain (head first). Used by tests and
    /// snapshot restoration; the chain must be non-empty.
    pub fn from_blocks(blocks: Vec<Point>, direction: Direction) -> Self {
        let block_set = blocks.iter().copied().collect();
        Snake {
            blocks: blocks.into(),
            block_set,
            direction,
            invincible_rounds: 0,
            alive: true,
            growth_pending: 0,
        }
    }

    pub fn head(&self) -> Point {
        // An empty chain on a live snake is a broken invariant; dying snakes
        // are removed from the world before anyone can ask for their head.
        self.blocks[0]
    }

    /// Where the head would land if the snake moved now. `None` while the
    /// snake has no direction or is dead.
    pub fn next_head(&self) -> Option<Point> {
        if !self.alive || self.direction == Direction::None {
            return None;
        }
        Some(self.head().step(self.direction))
    }

    /// Move one cell in the current direction: push the new head and, unless
    /// a growth step is pending, pop the tail. Chain and set stay in sync.
    pub fn advance(&mut self) -> Option<MoveOutcome> {
        let new_head = self.next_head()?;

        let removed_tail = if self.growth_pending > 0 {
            self.growth_pending -= 1;
            None
        } else {
            let tail = self.blocks.pop_back()?;
            self.block_set.remove(&tail);
            Some(tail)
        };

        self.blocks.push_front(new_head);
        self.block_set.insert(new_head);

        Some(MoveOutcome {
            new_head,
            removed_tail,
        })
    }

    /// Queue one growth step; the next `advance` keeps its tail.
    pub fn grow(&mut self) {
        self.growth_pending += 1;
    }

    pub fn kill(&mut self) {
        self.alive = false;
        self.blocks.clear();
        self.block_set.clear();
    }

    /// Set the travel direction. A reversal of the current non-`None`
    /// direction is silently ignored, as is `None` itself.
    pub fn set_direction(&mut self, dir: Direction) {
        if dir == Direction::None || self.direction.is_opposite(dir) {
            return;
        }
        self.direction = dir;
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> impl Iterator<Item = Point> + '_ {
        self.blocks.iter().copied()
    }

    /// O(1) membership over the whole body, head included.
    pub fn occupies(&self, p: Point) -> bool {
        self.block_set.contains(&p)
    }

    /// Membership over the body excluding the current head cell. This is the
    /// self-collision query: the head cannot collide with itself.
    pub fn body_hits(&self, p: Point) -> bool {
        if self.blocks.len() <= 1 {
            return false;
        }
        p != self.head() && self.block_set.contains(&p)
    }

    pub fn cells(&self) -> &HashSet<Point> {
        &self.block_set
    }

    pub fn invincible_rounds(&self) -> u32 {
        self.invincible_rounds
    }

    pub fn set_invincible_rounds(&mut self, rounds: u32) {
        self.invincible_rounds = rounds;
    }

    pub fn tick_invincibility(&mut self) {
        self.invincible_rounds = self.invincible_rounds.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_cell_snake() -> Snake {
        Snake::from_blocks(
            vec![Point::new(3, 3), Point::new(2, 3), Point::new(1, 3)],
            Direction::Right,
        )
    }

    #[test]
    fn test_spawn_grows_to_initial_length() {
        let mut s = Snake::spawn(Point::new(5, 5), 3);
        assert_eq!(s.len(), 1);
        s.set_direction(Direction::Right);

        s.advance().unwrap();
        assert_eq!(s.len(), 2);
        s.advance().unwrap();
        assert_eq!(s.len(), 3);
        // Fully grown: further moves shed the tail.
        let outcome = s.advance().unwrap();
        assert_eq!(s.len(), 3);
        assert!(outcome.removed_tail.is_some());
    }

    #[test]
    fn test_advance_keeps_chain_and_set_in_sync() {
        let mut s = three_cell_snake();
        for _ in 0..5 {
            s.advance().unwrap();
            let chain: HashSet<Point> = s.blocks().collect();
            assert_eq!(&chain, s.cells());
            assert_eq!(s.len(), s.cells().len());
        }
        assert_eq!(s.head(), Point::new(8, 3));
    }

    #[test]
    fn test_advance_reports_removed_tail() {
        let mut s = three_cell_snake();
        let outcome = s.advance().unwrap();
        assert_eq!(outcome.new_head, Point::new(4, 3));
        assert_eq!(outcome.removed_tail, Some(Point::new(1, 3)));
    }

    #[test]
    fn test_growth_preserves_tail() {
        let mut s = three_cell_snake();
        s.grow();
        let outcome = s.advance().unwrap();
        assert_eq!(outcome.removed_tail, None);
        assert_eq!(s.len(), 4);
        assert!(s.occupies(Point::new(1, 3)));
    }

    #[test]
    fn test_reversal_is_ignored() {
        let mut s = three_cell_snake();
        s.set_direction(Direction::Left);
        assert_eq!(s.direction(), Direction::Right);
        s.set_direction(Direction::Up);
        assert_eq!(s.direction(), Direction::Up);
        s.set_direction(Direction::Down);
        assert_eq!(s.direction(), Direction::Up);
    }

    #[test]
    fn test_set_direction_none_is_ignored() {
        let mut s = three_cell_snake();
        s.set_direction(Direction::None);
        assert_eq!(s.direction(), Direction::Right);
    }

    #[test]
    fn test_no_move_without_direction() {
        let mut s = Snake::spawn(Point::new(5, 5), 3);
        assert_eq!(s.next_head(), None);
        assert_eq!(s.advance(), None);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_body_hits_excludes_head() {
        let s = three_cell_snake();
        assert!(!s.body_hits(Point::new(3, 3)));
        assert!(s.body_hits(Point::new(2, 3)));
        assert!(s.occupies(Point::new(3, 3)));
        assert!(!s.occupies(Point::new(4, 3)));
    }

    #[test]
    fn test_kill_clears_everything() {
        let mut s = three_cell_snake();
        s.kill();
        assert!(!s.is_alive());
        assert!(s.is_empty());
        assert!(s.cells().is_empty());
    }

    #[test]
    fn test_invincibility_saturates_at_zero() {
        let mut s = three_cell_snake();
        s.set_invincible_rounds(1);
        s.tick_invincibility();
        assert_eq!(s.invincible_rounds(), 0);
        s.tick_invincibility();
        assert_eq!(s.invincible_rounds(), 0);
    }
}
