//! Deterministic random streams.
//!
//! Every tick of every game gets its own master generator derived from the
//! configured seed, the game id and the year being simulated. Systems draw
//! from named sub-streams so adding draws to one system never shifts the
//! numbers another system sees.

use std::collections::HashMap;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub struct RngManager {
    master: ChaCha8Rng,
    streams: HashMap<String, ChaCha8Rng>,
}

impl RngManager {
    pub fn new(seed: u64) -> Self {
        Self {
            master: ChaCha8Rng::seed_from_u64(seed),
            streams: HashMap::new(),
        }
    }

    pub fn for_tick(seed: u64, game_id: &str, year: i64) -> Self {
        Self::new(mix_seed(seed, fnv1a(game_id.as_bytes()), year as u64))
    }

    pub fn stream(&mut self, name: &str) -> SystemRng<'_> {
        let master = &mut self.master;
        let entry = self.streams.entry(name.to_string()).or_insert_with(|| {
            let derived = master.next_u64() ^ fnv1a(name.as_bytes());
            ChaCha8Rng::seed_from_u64(derived)
        });
        SystemRng { inner: entry }
    }
}

pub struct SystemRng<'a> {
    inner: &'a mut ChaCha8Rng,
}

impl<'a> RngCore for SystemRng<'a> {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn mix_seed(seed: u64, entity: u64, tick: u64) -> u64 {
    let mut mixed = seed;
    mixed = mixed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    mixed ^= entity;
    mixed = mixed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    mixed ^= tick.wrapping_mul(69069);
    mixed
}
