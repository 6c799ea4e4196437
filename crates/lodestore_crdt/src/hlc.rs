//! Hybrid logical clocks.
//!
//! An HLC stamp combines wall-clock milliseconds with a causal counter
//! and the stamping node's id. Stamps are totally ordered (wall time,
//! then counter, then node id), which is what makes changeset merge
//! monotonic.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// One hybrid-logical-clock stamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Hlc {
    /// Wall-clock milliseconds since the Unix epoch.
    pub wall_ms: u64,
    /// Causal counter for stamps within the same millisecond.
    pub counter: u32,
    /// The stamping node.
    pub node: Uuid,
}

impl Hlc {
    /// The zero stamp, ordered before every real stamp.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            wall_ms: 0,
            counter: 0,
            node: Uuid::nil(),
        }
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:013}-{:05}-{}", self.wall_ms, self.counter, self.node)
    }
}

/// A node-local clock producing monotonically increasing stamps.
pub struct HlcClock {
    node: Uuid,
    last: Mutex<Hlc>,
}

impl HlcClock {
    /// Creates a clock for the given node.
    #[must_use]
    pub fn new(node: Uuid) -> Self {
        Self {
            node,
            last: Mutex::new(Hlc::zero()),
        }
    }

    /// Creates a clock with a fresh random node id.
    #[must_use]
    pub fn with_random_node() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// This clock's node id.
    pub fn node_id(&self) -> Uuid {
        self.node
    }

    /// Produces the next stamp, strictly greater than every stamp this
    /// clock has produced or observed.
    pub fn now(&self) -> Hlc {
        let wall = epoch_ms();
        let mut last = self.last.lock();
        if wall > last.wall_ms {
            *last = Hlc {
                wall_ms: wall,
                counter: 0,
                node: self.node,
            };
        } else {
            last.counter += 1;
            last.node = self.node;
        }
        *last
    }

    /// Folds a remote stamp into the clock so future local stamps sort
    /// after it.
    pub fn observe(&self, remote: Hlc) {
        let mut last = self.last.lock();
        if (remote.wall_ms, remote.counter) >= (last.wall_ms, last.counter) {
            *last = Hlc {
                wall_ms: remote.wall_ms,
                counter: remote.counter + 1,
                node: self.node,
            };
        }
    }
}

/// Current wall time in epoch milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_strictly_increasing() {
        let clock = HlcClock::with_random_node();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn ordering_precedence() {
        let node = Uuid::nil();
        let a = Hlc { wall_ms: 1, counter: 9, node };
        let b = Hlc { wall_ms: 2, counter: 0, node };
        assert!(b > a);

        let c = Hlc { wall_ms: 2, counter: 1, node };
        assert!(c > b);
    }

    #[test]
    fn observe_advances_past_remote() {
        let clock = HlcClock::with_random_node();
        let remote = Hlc {
            wall_ms: epoch_ms() + 60_000,
            counter: 3,
            node: Uuid::new_v4(),
        };

        clock.observe(remote);
        let next = clock.now();
        assert!(next > remote);
        assert_eq!(next.node, clock.node_id());
    }

    #[test]
    fn observe_ignores_older_stamps() {
        let clock = HlcClock::with_random_node();
        let current = clock.now();

        clock.observe(Hlc::zero());
        assert!(clock.now() > current);
    }

    #[test]
    fn zero_sorts_first() {
        let stamp = HlcClock::with_random_node().now();
        assert!(Hlc::zero() < stamp);
    }

    #[test]
    fn display_is_sortable() {
        let node = Uuid::nil();
        let a = Hlc { wall_ms: 5, counter: 2, node };
        let b = Hlc { wall_ms: 10, counter: 0, node };
        assert!(a.to_string() < b.to_string());
    }
}
