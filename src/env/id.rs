use core::fmt;

pub const ENV_INDEX_BITS: u32 = 10;
const ENV_INDEX_MASK: u32 = (1 << ENV_INDEX_BITS) - 1;
const MAX_GENERATION: u32 = u32::MAX >> ENV_INDEX_BITS;

// Slot index in the low bits, slot generation above. Freeing a slot bumps
// its generation, so an id held across the reuse of its slot stops resolving.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct EnvId(u32);

impl EnvId {
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        debug_assert!(index as u32 <= ENV_INDEX_MASK);
        debug_assert!(generation != 0 && generation <= MAX_GENERATION);
        Self((generation << ENV_INDEX_BITS) | index as u32)
    }

    pub fn index(&self) -> usize {
        (self.0 & ENV_INDEX_MASK) as usize
    }

    pub fn generation(&self) -> u32 {
        self.0 >> ENV_INDEX_BITS
    }

    pub fn to_inner(self) -> u32 {
        self.0
    }
}

pub(super) fn next_generation(generation: u32) -> u32 {
    if generation >= MAX_GENERATION {
        1
    } else {
        generation + 1
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:08x})", self.0)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
