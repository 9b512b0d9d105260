//! Process identity.
//!
//! A [`Pid`] is opaque, totally ordered, cheaply `Copy`, and sized to make
//! accidental collisions implausible over a long-running Kernel: a random
//! 64-bit origin chosen once at Kernel boot, paired with a 64-bit sequence
//! number that increases monotonically per spawn. This condenses the
//! historical five-field scheme (base/big/small/n/m) into the two fields
//! that actually matter for collision-avoidance and ordering.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;

/// Process-unique identity. Total-ordered and printable to a stable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pid {
    origin: u64,
    sequence: u64,
}

impl Pid {
    /// Construct a PID from its raw fields. Exposed for snapshot/replay
    /// tooling; runtime code should obtain PIDs from a [`PidEmitter`].
    pub const fn from_parts(origin: u64, sequence: u64) -> Self {
        Self { origin, sequence }
    }

    /// The origin value shared by every PID emitted by one Kernel instance.
    pub const fn origin(&self) -> u64 {
        self.origin
    }

    /// The sequence number, unique within this Kernel's origin.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}.{:x}", self.origin, self.sequence)
    }
}

/// Emits process-unique [`Pid`] values for one Kernel's lifetime.
///
/// The origin is chosen once, randomly, at construction; every subsequent
/// call to [`PidEmitter::emit`] hands out the next sequence number. This is
/// the runtime analogue of the original `Pid_emitter`, simplified because
/// Rust gives us a real atomic counter instead of manually tracked
/// per-field rollover offsets.
#[derive(Debug)]
pub struct PidEmitter {
    origin: u64,
    next_sequence: AtomicU64,
}

impl PidEmitter {
    /// Create a new emitter with a freshly randomized origin.
    pub fn new() -> Self {
        Self {
            origin: rand::thread_rng().next_u64(),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Emit the next PID. Safe to call concurrently from multiple
    /// scheduler workers.
    pub fn emit(&self) -> Pid {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        Pid::from_parts(self.origin, sequence)
    }
}

impl Default for PidEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_unique_increasing_sequence_numbers() {
        let emitter = PidEmitter::new();
        let a = emitter.emit();
        let b = emitter.emit();
        assert_eq!(a.origin(), b.origin());
        assert!(a.sequence() < b.sequence());
        assert!(a < b);
    }

    #[test]
    fn display_is_stable() {
        let pid = Pid::from_parts(0x1, 0x2);
        assert_eq!(pid.to_string(), "0000000000000001.2");
    }
}
