//! Session identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier of a session.
///
/// The high 64 bits are the random origin of the [`SessionIdGenerator`]
/// that issued it, the low 64 bits that generator's sequence number. IDs
/// from one generator are strictly increasing; IDs from different
/// generators do not collide (short of a 64-bit origin collision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u128);

impl SessionId {
    /// Builds an ID from its parts.
    pub fn new(origin: u64, sequence: u64) -> Self {
        Self((u128::from(origin) << 64) | u128::from(sequence))
    }

    /// The origin of the generator that issued this ID.
    pub fn origin(self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// The position of this ID in its generator's sequence (starts at 1).
    pub fn sequence(self) -> u64 {
        self.0 as u64
    }

    /// Returns the underlying `u128` value.
    pub fn into_inner(self) -> u128 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{}", self.origin(), self.sequence())
    }
}

/// Issues [`SessionId`]s.
///
/// Each listener owns one, so independent listeners in a process share no
/// counter.
#[derive(Debug)]
pub struct SessionIdGenerator {
    origin: u64,
    next: AtomicU64,
}

impl SessionIdGenerator {
    /// Creates a generator with a random origin.
    pub fn new() -> Self {
        Self::with_origin(rand::random())
    }

    /// Creates a generator with a fixed origin.
    pub fn with_origin(origin: u64) -> Self {
        Self {
            origin,
            next: AtomicU64::new(1),
        }
    }

    /// This generator's origin.
    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Returns the next ID in sequence.
    pub fn next_id(&self) -> SessionId {
        SessionId::new(self.origin, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
