//! Strongly-typed identifiers for trellis entities.
//!
//! Graph entities (blocks, properties, binding chains) live in generational
//! arenas, so their ids carry an index plus a generation counter. A stale id
//! (one whose slot has since been freed or reused) simply fails to resolve
//! instead of reaching unrelated data.

use std::fmt;

/// Trait implemented by arena-backed id types.
///
/// Kept crate-private: hosts treat ids as opaque handles.
pub(crate) trait ArenaId: Copy + Eq {
    fn compose(index: u32, generation: u32) -> Self;
    fn index(self) -> u32;
    fn generation(self) -> u32;
}

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl ArenaId for $name {
            fn compose(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            fn index(self) -> u32 {
                self.index
            }

            fn generation(self) -> u32 {
                self.generation
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.index)
            }
        }
    };
}

arena_id!(
    /// Handle to a block in the graph.
    ///
    /// Blocks are owned by the property that holds them; a `BlockId` held by
    /// a host is a weak reference that goes stale when the block is
    /// destroyed.
    BlockId,
    "block"
);

arena_id!(
    /// Handle to a property of a block.
    PropId,
    "prop"
);

arena_id!(
    /// Handle to an intermediate binding-chain node.
    ChainId,
    "chain"
);

/// Ticket for a deferred function result.
///
/// Returned by [`FuncContext::defer`](crate::func::FuncContext::defer) and
/// redeemed through [`Root::complete_task`](crate::root::Root::complete_task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task_{}", self.0)
    }
}

/// Handle to an external value watch registered through the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub(crate) u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_index_only() {
        let id = BlockId::compose(7, 3);
        assert_eq!(id.to_string(), "block_7");
        let id = PropId::compose(0, 0);
        assert_eq!(id.to_string(), "prop_0");
    }

    #[test]
    fn ids_compare_by_index_and_generation() {
        let a = BlockId::compose(1, 0);
        let b = BlockId::compose(1, 1);
        let c = BlockId::compose(1, 0);
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn task_and_watch_ids_display() {
        assert_eq!(TaskId(9).to_string(), "task_9");
        assert_eq!(WatchId(2).to_string(), "watch_2");
    }
}
