use std::time::Duration;

use rand_core::{OsRng, RngCore, SeedableRng, impls};

/// Fault source for PING. Anything implementing `RngCore` works, which lets
/// tests script the exact sequence of draws.
pub type FaultSource = Box<dyn RngCore + Send>;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// SplitMix64. Small, fast, and fully determined by its seed.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        // zero seed maps to the gamma constant
        let state = if seed == 0 { GOLDEN_GAMMA } else { seed };
        Self { state }
    }

    #[must_use]
    pub fn from_entropy() -> Self {
        Self::new(OsRng.next_u64())
    }
}

impl RngCore for SplitMix64 {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for SplitMix64 {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u64::from_le_bytes(seed))
    }

    fn seed_from_u64(state: u64) -> Self {
        Self::new(state)
    }
}

/// Derives an independent source for a spawned engine from the parent's.
pub fn fork(parent: &mut FaultSource) -> FaultSource {
    Box::new(SplitMix64::new(parent.next_u64()))
}

/// Uniform draw in `[0, 1)` from the top 53 bits.
pub fn uniform(rng: &mut dyn RngCore) -> f64 {
    (rng.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingPolicy {
    pub probability: f64,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl PingPolicy {
    /// Whether this PING signals a transient fault. A probability of 0 never
    /// signals and 1 always does, whatever the source yields.
    pub fn signals(&self, rng: &mut dyn RngCore) -> bool {
        if self.probability <= 0.0 {
            return false;
        }
        if self.probability >= 1.0 {
            return true;
        }
        uniform(rng) < self.probability
    }
}

impl Default for PingPolicy {
    fn default() -> Self {
        Self {
            probability: 0.05,
            max_retries: 3,
            backoff: Duration::from_millis(1),
        }
    }
}
