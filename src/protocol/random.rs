//! Randomness for initial sequence numbers and ephemeral ports.

/// Source of pseudo-random values, typically provided by the boot platform.
pub trait RandomSource {
    /// Returns 32 random bits.
    fn random32(&mut self) -> u32;

    /// Returns 14 random bits (`0..=0x3FFF`).
    fn random14(&mut self) -> u16;
}

/// Small xorshift generator implementing [RandomSource], for hosts without a
/// platform source and for deterministic tests.
#[derive(Debug, Clone)]
pub struct XorShiftSource {
    state: u32,
}

impl XorShiftSource {
    /// Creates a generator from `seed`. A zero seed is replaced with a fixed
    /// non-zero value since xorshift never leaves the zero state.
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0x2545_F491 } else { seed },
        }
    }
}

impl RandomSource for XorShiftSource {
    fn random32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    fn random14(&mut self) -> u16 {
        (self.random32() >> 18) as u16
    }
}

/// Generator for initial sequence numbers: a 32-bit Galois LFSR seeded once
/// from a [RandomSource] on first use.
#[derive(Debug, Clone, Default)]
pub struct SequenceGenerator {
    state: Option<u32>,
}

impl SequenceGenerator {
    /// Feedback taps for x^32 + x^22 + x^2 + x + 1 (maximal length).
    const TAPS: u32 = 0x8020_0003;

    /// Substitute seed for a source that yields zero, the LFSR's fixed point.
    const FALLBACK_SEED: u32 = 0xACE1_ACE1;

    /// Creates an unseeded generator.
    pub fn new() -> Self {
        Self { state: None }
    }

    /// Creates a generator already seeded with `seed`.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            state: Some(Self::sanitize(seed)),
        }
    }

    /// Returns the next initial sequence number, seeding from `source` if this
    /// is the first call.
    pub fn generate(&mut self, source: &mut dyn RandomSource) -> u32 {
        let state = self
            .state
            .get_or_insert_with(|| Self::sanitize(source.random32()));

        let lsb = *state & 1;
        *state >>= 1;
        if lsb == 1 {
            *state ^= Self::TAPS;
        }

        *state
    }

    fn sanitize(seed: u32) -> u32 {
        if seed == 0 { Self::FALLBACK_SEED } else { seed }
    }
}
