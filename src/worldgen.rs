//! Initial world for a game that just filled its last seat.

use rand::{seq::SliceRandom, Rng, RngCore};
use tracing::debug;

use crate::{
    components::{PopulationAllocation, Unit, UnitType},
    config::SimulationRules,
    ids::{IdAllocator, IdKind},
    spatial::{Terrain, TilePos, WorldMap},
    store::WorldSeed,
};

const LAND_CHANCE: f64 = 0.48;
const SMOOTHING_PASSES: usize = 3;

const LAND_WEIGHTS: [(Terrain, u32); 6] = [
    (Terrain::Grassland, 3),
    (Terrain::Plains, 3),
    (Terrain::Forest, 2),
    (Terrain::Hills, 1),
    (Terrain::Desert, 1),
    (Terrain::Mountains, 1),
];

/// Random land mask, smoothed into blobs, with shallow water along coasts.
/// A map always has at least one land tile.
pub fn generate_map(width: u32, height: u32, rng: &mut dyn RngCore) -> WorldMap {
    let mut land: Vec<bool> = (0..width as usize * height as usize)
        .map(|_| rng.gen_bool(LAND_CHANCE))
        .collect();

    for _ in 0..SMOOTHING_PASSES {
        land = smooth(&land, width, height);
    }
    if !land.iter().any(|is_land| *is_land) && !land.is_empty() {
        let center = (height / 2) as usize * width as usize + (width / 2) as usize;
        land[center] = true;
    }

    let mut map = WorldMap::filled(width, height, Terrain::Ocean);
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            if land[y as usize * width as usize + x as usize] {
                map.set_terrain(TilePos::new(x, y), pick_land(rng));
            }
        }
    }

    let coast: Vec<TilePos> = positions(width, height)
        .filter(|pos| map.is_water(*pos))
        .filter(|pos| map.neighbors(*pos).any(|n| !map.is_water(n)))
        .collect();
    for pos in coast {
        map.set_terrain(pos, Terrain::ShallowWater);
    }
    map
}

fn positions(width: u32, height: u32) -> impl Iterator<Item = TilePos> {
    (0..height as i32).flat_map(move |y| (0..width as i32).map(move |x| TilePos::new(x, y)))
}

fn smooth(land: &[bool], width: u32, height: u32) -> Vec<bool> {
    let at = |x: i32, y: i32| -> bool {
        x >= 0
            && y >= 0
            && (x as u32) < width
            && (y as u32) < height
            && land[y as usize * width as usize + x as usize]
    };
    positions(width, height)
        .map(|pos| {
            let around = crate::spatial::NEIGHBOR_OFFSETS
                .iter()
                .filter(|(dx, dy)| at(pos.x + dx, pos.y + dy))
                .count();
            match around {
                0..=3 => false,
                4 => at(pos.x, pos.y),
                _ => true,
            }
        })
        .collect()
}

fn pick_land(rng: &mut dyn RngCore) -> Terrain {
    let total: u32 = LAND_WEIGHTS.iter().map(|(_, weight)| weight).sum();
    let mut roll = rng.gen_range(0..total);
    for (terrain, weight) in LAND_WEIGHTS {
        if roll < weight {
            return terrain;
        }
        roll -= weight;
    }
    Terrain::Plains
}

/// Map plus one settler unit per player, each on its own land tile while
/// land lasts. Players are seeded in roster order.
pub fn seed_players(
    game_id: &str,
    players: &[String],
    rules: &SimulationRules,
    ids: &IdAllocator,
    rng: &mut dyn RngCore,
) -> WorldSeed {
    let map = generate_map(rules.map_width, rules.map_height, rng);
    let mut spots = map.land_positions();
    spots.shuffle(rng);

    let mut units = Vec::with_capacity(players.len());
    let mut allocations = Vec::with_capacity(players.len());
    for (index, player_id) in players.iter().enumerate() {
        let location = spots.get(index).copied().unwrap_or_else(|| {
            map.clamp(TilePos::new(
                rng.gen_range(0..rules.map_width.max(1) as i32),
                rng.gen_range(0..rules.map_height.max(1) as i32),
            ))
        });
        let unit = Unit {
            unit_id: ids.next(IdKind::Unit),
            game_id: game_id.to_string(),
            player_id: player_id.clone(),
            unit_type: UnitType::Settlers,
            location,
            steps_taken: 0,
            population_cost: rules.settler_population,
        };
        let mut allocation = PopulationAllocation::empty(game_id, player_id.as_str());
        allocation.allocate_to_unit(unit.population_cost);
        debug!(game_id, player_id = %player_id, unit_id = %unit.unit_id, ?location, "placed settler");
        units.push(unit);
        allocations.push(allocation);
    }

    WorldSeed {
        map,
        units,
        allocations,
    }
}
