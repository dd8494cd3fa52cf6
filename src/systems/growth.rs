use anyhow::Result;
use tracing::trace;

use crate::{
    engine::{System, SystemContext},
    rng::SystemRng,
    world::GameWorld,
};

/// Yearly increase for a settlement. Any non-empty settlement grows by at
/// least one person.
pub fn annual_growth(population: u64, rate: f64) -> u64 {
    if population == 0 {
        return 0;
    }
    let raw = (population as f64 * rate).round();
    if raw.is_finite() && raw >= 1.0 {
        raw as u64
    } else {
        1
    }
}

pub struct GrowthSystem;

impl GrowthSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GrowthSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for GrowthSystem {
    fn name(&self) -> &str {
        "growth"
    }

    fn run(
        &mut self,
        ctx: &SystemContext<'_>,
        world: &mut GameWorld,
        _rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        for settlement_id in world.settlement_ids() {
            // Camps founded this tick start growing next year.
            if world.founded_this_tick(&settlement_id) {
                continue;
            }
            let Some(settlement) = world.settlement(&settlement_id) else {
                continue;
            };
            let growth = annual_growth(settlement.population, ctx.rules.annual_growth_rate);
            if growth == 0 {
                continue;
            }
            trace!(
                settlement_id = %settlement_id,
                population = settlement.population,
                growth,
                "settlement grew"
            );
            world.grow_settlement(&settlement_id, growth);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_rounds_and_has_a_floor() {
        assert_eq!(annual_growth(1_000, 0.01), 10);
        assert_eq!(annual_growth(150, 0.01), 2);
        assert_eq!(annual_growth(100, 0.01), 1);
        assert_eq!(annual_growth(10, 0.01), 1);
        assert_eq!(annual_growth(1, 0.01), 1);
        assert_eq!(annual_growth(0, 0.01), 0);
    }

    #[test]
    fn zero_rate_still_grows_by_one() {
        assert_eq!(annual_growth(500, 0.0), 1);
    }
}
