//! Spatial model - tile-based world map

use serde::{Deserialize, Serialize};

/// Tile position in the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// Neighbor offsets scanned when a settler has to leave a water tile.
/// Row-major, top-left first; the order decides which land tile wins.
pub const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    Ocean,
    ShallowWater,
    Grassland,
    Plains,
    Forest,
    Hills,
    Desert,
    Mountains,
}

impl Terrain {
    pub fn is_water(self) -> bool {
        matches!(self, Terrain::Ocean | Terrain::ShallowWater)
    }

    pub fn is_land(self) -> bool {
        !self.is_water()
    }
}

/// Terrain grid of one game, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMap {
    width: u32,
    height: u32,
    tiles: Vec<Terrain>,
}

impl WorldMap {
    pub fn filled(width: u32, height: u32, terrain: Terrain) -> Self {
        Self {
            width,
            height,
            tiles: vec![terrain; width as usize * height as usize],
        }
    }

    /// Returns `None` when the tile count does not match the dimensions.
    pub fn from_tiles(width: u32, height: u32, tiles: Vec<Terrain>) -> Option<Self> {
        if tiles.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            tiles,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tiles(&self) -> &[Terrain] {
        &self.tiles
    }

    pub fn contains(&self, pos: TilePos) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < self.width && (pos.y as u32) < self.height
    }

    fn index(&self, pos: TilePos) -> Option<usize> {
        if self.contains(pos) {
            Some(pos.y as usize * self.width as usize + pos.x as usize)
        } else {
            None
        }
    }

    pub fn terrain(&self, pos: TilePos) -> Option<Terrain> {
        self.index(pos).map(|index| self.tiles[index])
    }

    pub fn set_terrain(&mut self, pos: TilePos, terrain: Terrain) {
        if let Some(index) = self.index(pos) {
            self.tiles[index] = terrain;
        }
    }

    pub fn is_water(&self, pos: TilePos) -> bool {
        self.terrain(pos).is_some_and(Terrain::is_water)
    }

    /// Clamp a position onto the map; edges stop movement, they never wrap.
    pub fn clamp(&self, pos: TilePos) -> TilePos {
        let max_x = self.width.saturating_sub(1) as i32;
        let max_y = self.height.saturating_sub(1) as i32;
        TilePos {
            x: pos.x.clamp(0, max_x),
            y: pos.y.clamp(0, max_y),
        }
    }

    /// In-bounds neighbors (8-connectivity) in [`NEIGHBOR_OFFSETS`] order.
    pub fn neighbors(&self, pos: TilePos) -> impl Iterator<Item = TilePos> + '_ {
        NEIGHBOR_OFFSETS
            .iter()
            .map(move |&(dx, dy)| pos.offset(dx, dy))
            .filter(move |candidate| self.contains(*candidate))
    }

    pub fn land_positions(&self) -> Vec<TilePos> {
        let mut positions = Vec::new();
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let pos = TilePos::new(x, y);
                if self.terrain(pos).is_some_and(Terrain::is_land) {
                    positions.push(pos);
                }
            }
        }
        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_stops_at_edges() {
        let map = WorldMap::filled(10, 5, Terrain::Plains);

        assert_eq!(map.clamp(TilePos::new(-1, 2)), TilePos::new(0, 2));
        assert_eq!(map.clamp(TilePos::new(10, 2)), TilePos::new(9, 2));
        assert_eq!(map.clamp(TilePos::new(3, 5)), TilePos::new(3, 4));
        assert_eq!(map.clamp(TilePos::new(3, 2)), TilePos::new(3, 2));
    }

    #[test]
    fn test_neighbors() {
        let map = WorldMap::filled(10, 5, Terrain::Ocean);

        // Corner tile
        let corner: Vec<_> = map.neighbors(TilePos::new(0, 0)).collect();
        assert_eq!(
            corner,
            vec![TilePos::new(1, 0), TilePos::new(0, 1), TilePos::new(1, 1)]
        );

        // Middle tile
        let middle: Vec<_> = map.neighbors(TilePos::new(5, 2)).collect();
        assert_eq!(middle.len(), 8);
        assert_eq!(middle[0], TilePos::new(4, 1));
        assert_eq!(middle[7], TilePos::new(6, 3));
    }

    #[test]
    fn test_terrain_lookup() {
        let mut map = WorldMap::filled(4, 4, Terrain::Ocean);
        map.set_terrain(TilePos::new(2, 1), Terrain::Forest);

        assert!(map.is_water(TilePos::new(0, 0)));
        assert!(!map.is_water(TilePos::new(2, 1)));
        assert_eq!(map.terrain(TilePos::new(4, 0)), None);
        assert_eq!(map.land_positions(), vec![TilePos::new(2, 1)]);
    }

    #[test]
    fn test_from_tiles_checks_length() {
        assert!(WorldMap::from_tiles(2, 2, vec![Terrain::Plains; 3]).is_none());
        assert!(WorldMap::from_tiles(2, 2, vec![Terrain::Plains; 4]).is_some());
    }
}
