mod founding;
mod growth;
mod movement;

pub use founding::{choose_site, settlement_name, FoundingSite, FoundingSystem};
pub use growth::{annual_growth, GrowthSystem};
pub use movement::{MovementStrategy, MovementSystem, RandomWalk};
