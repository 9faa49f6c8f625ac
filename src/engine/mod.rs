pub mod game;
pub mod grid;
pub mod map;
pub mod players;
pub mod snake;
pub mod world;
