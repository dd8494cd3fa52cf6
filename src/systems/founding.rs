//! Settler units turning into nomadic camps.

use anyhow::{bail, Result};
use rand::{Rng, RngCore};
use tracing::{info, warn};

use crate::{
    components::{Settlement, SettlementType},
    engine::{System, SystemContext},
    ids::IdKind,
    rng::SystemRng,
    spatial::{TilePos, WorldMap},
    world::GameWorld,
};

/// Where a settler ends up founding its camp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoundingSite {
    /// The unit already stands on land.
    InPlace(TilePos),
    /// The unit stood on water and moved onto the first land neighbor.
    Shore(TilePos),
    /// Water on every side; the camp goes on the water tile itself.
    Stranded(TilePos),
}

impl FoundingSite {
    pub fn position(self) -> TilePos {
        match self {
            FoundingSite::InPlace(pos) | FoundingSite::Shore(pos) | FoundingSite::Stranded(pos) => {
                pos
            }
        }
    }
}

/// Land tiles are used as-is. From water, neighbors are scanned in
/// [`crate::spatial::NEIGHBOR_OFFSETS`] order and the first land tile wins.
pub fn choose_site(map: &WorldMap, pos: TilePos) -> FoundingSite {
    if !map.is_water(pos) {
        return FoundingSite::InPlace(pos);
    }
    map.neighbors(pos)
        .find(|candidate| !map.is_water(*candidate))
        .map(FoundingSite::Shore)
        .unwrap_or(FoundingSite::Stranded(pos))
}

const NAME_ROOTS: &[&str] = &[
    "Ash", "Bel", "Cor", "Dun", "El", "Fen", "Gal", "Hal", "Ir", "Kel", "Lor", "Mar", "Nor",
    "Os", "Pel", "Ren", "Sol", "Tor", "Ul", "Var",
];

const NAME_SUFFIXES: &[&str] = &[
    "ford", "holm", "wick", "stead", "mere", "by", "ton", "dale", "gate", "haven",
];

fn pick<'a>(rng: &mut dyn RngCore, options: &'a [&'a str]) -> &'a str {
    options[rng.gen_range(0..options.len())]
}

pub fn settlement_name(rng: &mut dyn RngCore) -> String {
    let root = pick(rng, NAME_ROOTS);
    let suffix = pick(rng, NAME_SUFFIXES);
    format!("{root}{suffix}")
}

pub struct FoundingSystem;

impl FoundingSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FoundingSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for FoundingSystem {
    fn name(&self) -> &str {
        "founding"
    }

    fn run(
        &mut self,
        ctx: &SystemContext<'_>,
        world: &mut GameWorld,
        rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        let threshold = ctx.rules.founding_steps;
        let ready: Vec<_> = world
            .units()
            .filter(|unit| unit.steps_taken >= threshold)
            .cloned()
            .collect();

        for unit in ready {
            let site = choose_site(world.map(), unit.location);
            if let FoundingSite::Stranded(pos) = site {
                warn!(
                    game_id = %unit.game_id,
                    unit_id = %unit.unit_id,
                    ?pos,
                    "no land around settler; founding on water"
                );
            }

            let settlement = Settlement {
                settlement_id: ctx
                    .ids
                    .next_unused(IdKind::Settlement, |id| world.settlement(id).is_some()),
                game_id: unit.game_id.clone(),
                player_id: unit.player_id.clone(),
                location: site.position(),
                settlement_type: SettlementType::NomadicCamp,
                name: settlement_name(&mut *rng),
                population: unit.population_cost,
                founded_year: ctx.year,
            };
            info!(
                game_id = %settlement.game_id,
                player_id = %settlement.player_id,
                unit_id = %unit.unit_id,
                settlement_id = %settlement.settlement_id,
                name = %settlement.name,
                location = ?settlement.location,
                population = settlement.population,
                "settler founded a camp"
            );
            let settlement_id = settlement.settlement_id.clone();
            if world.found_settlement(&unit.unit_id, settlement).is_none() {
                bail!(
                    "unit {} could not found settlement {settlement_id}",
                    unit.unit_id
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RngManager;
    use crate::spatial::Terrain;

    fn water_map() -> WorldMap {
        WorldMap::filled(5, 5, Terrain::Ocean)
    }

    #[test]
    fn land_tile_is_kept() {
        let map = WorldMap::filled(3, 3, Terrain::Hills);
        let pos = TilePos::new(1, 1);
        assert_eq!(choose_site(&map, pos), FoundingSite::InPlace(pos));
    }

    #[test]
    fn first_land_neighbor_in_row_major_order_wins() {
        let mut map = water_map();
        map.set_terrain(TilePos::new(3, 3), Terrain::Forest);
        map.set_terrain(TilePos::new(2, 1), Terrain::Plains);
        map.set_terrain(TilePos::new(1, 2), Terrain::Desert);

        let site = choose_site(&map, TilePos::new(2, 2));
        assert_eq!(site, FoundingSite::Shore(TilePos::new(2, 1)));
    }

    #[test]
    fn shallow_water_is_not_land() {
        let mut map = water_map();
        map.set_terrain(TilePos::new(1, 1), Terrain::ShallowWater);
        map.set_terrain(TilePos::new(3, 3), Terrain::Grassland);

        let site = choose_site(&map, TilePos::new(2, 2));
        assert_eq!(site, FoundingSite::Shore(TilePos::new(3, 3)));
    }

    #[test]
    fn surrounded_by_water_settles_in_place() {
        let site = choose_site(&water_map(), TilePos::new(2, 2));
        assert_eq!(site, FoundingSite::Stranded(TilePos::new(2, 2)));
        assert_eq!(site.position(), TilePos::new(2, 2));
    }

    #[test]
    fn corner_scan_skips_off_map_neighbors() {
        let mut map = water_map();
        map.set_terrain(TilePos::new(1, 1), Terrain::Plains);
        let site = choose_site(&map, TilePos::new(0, 0));
        assert_eq!(site, FoundingSite::Shore(TilePos::new(1, 1)));
    }

    #[test]
    fn names_are_deterministic_per_stream() {
        let mut first = RngManager::new(9);
        let mut second = RngManager::new(9);
        let a = settlement_name(&mut first.stream("founding"));
        let b = settlement_name(&mut second.stream("founding"));
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
