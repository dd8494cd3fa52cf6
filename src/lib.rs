pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod ids;
pub mod lobby;
pub mod rng;
pub mod scheduler;
pub mod spatial;
pub mod store;
pub mod systems;
pub mod web;
pub mod world;
pub mod worldgen;

pub use config::Config;
pub use engine::{Engine, EngineBuilder, TickSummary};
pub use store::Store;
