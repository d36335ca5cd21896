use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks fan-out targets. Seeded selectors make random injection reproducible.
#[derive(Debug)]
pub struct TargetSelector {
    rng: Mutex<StdRng>,
}

impl TargetSelector {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// All targets, or one chosen uniformly at random
    pub fn select<T>(&self, mut targets: Vec<T>, random: bool) -> Vec<T> {
        if !random || targets.len() <= 1 {
            return targets;
        }
        let index = self.rng.lock().gen_range(0..targets.len());
        vec![targets.swap_remove(index)]
    }
}

impl Default for TargetSelector {
    fn default() -> Self {
        Self::from_entropy()
    }
}
