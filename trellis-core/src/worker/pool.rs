//! Slot accounting for fan-out workers.
//!
//! A pool hands out integer slot ids and tracks which of them are busy,
//! which are warm (released with their worker kept alive), and which ids
//! are free. It never touches the graph: the fan-out functions own the
//! worker blocks behind the slots and act on what `done`, `resize`, and
//! `clear` report back.

use std::collections::HashMap;
use std::sync::Arc;

/// What a capacity change requires of the caller.
#[derive(Debug, Default)]
pub struct ResizeOutcome {
    /// The pool was idle and gained capacity. Assignment that stalled on
    /// saturation can resume immediately; there is no release coming that
    /// would signal it otherwise.
    pub ready: bool,
    /// Warm slots cut off by a shrink. Their workers must be destroyed.
    pub retired: Vec<usize>,
}

/// Bounded or unbounded slot pool.
///
/// Bounded pools recycle ids in `[0, capacity)` and report saturation by
/// returning `None` from [`next`]. Unbounded pools allocate monotonically
/// increasing ids and only ever reuse a warm slot whose key matches, so a
/// reappearing key gets its old worker back.
///
/// [`next`]: WorkerPool::next
pub struct WorkerPool {
    /// `None` for unbounded.
    capacity: Option<usize>,
    /// Next fresh id in unbounded mode.
    next_id: usize,
    /// Slot to the key it is serving.
    busy: HashMap<usize, Option<Arc<str>>>,
    /// Released slots whose worker is still alive, with the key they last
    /// served.
    warm: Vec<(Option<Arc<str>>, usize)>,
}

impl WorkerPool {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            next_id: 0,
            busy: HashMap::new(),
            warm: Vec::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            next_id: 0,
            busy: HashMap::new(),
            warm: Vec::new(),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity.is_some()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn busy_len(&self) -> usize {
        self.busy.len()
    }

    /// No slot is in flight. Warm slots do not count: nothing is running.
    pub fn is_idle(&self) -> bool {
        self.busy.is_empty()
    }

    /// Allocate a slot for `preferred`, or `None` when saturated. A warm
    /// slot that last served the same key wins over everything else; a
    /// bounded pool then falls back to any warm slot, then to a free id.
    pub fn next(&mut self, preferred: Option<&str>) -> Option<usize> {
        if let Some(key) = preferred {
            if let Some(pos) = self
                .warm
                .iter()
                .position(|(k, _)| k.as_deref() == Some(key))
            {
                let (_, slot) = self.warm.swap_remove(pos);
                self.busy.insert(slot, Some(Arc::from(key)));
                return Some(slot);
            }
        }
        let slot = match self.capacity {
            Some(cap) => {
                if let Some((_, slot)) = self.warm.pop() {
                    slot
                } else {
                    self.free_slot(cap)?
                }
            }
            None => {
                let slot = self.next_id;
                self.next_id += 1;
                slot
            }
        };
        self.busy.insert(slot, preferred.map(Arc::from));
        Some(slot)
    }

    /// Release a slot. Returns `true` when the slot went to the warm set
    /// and its worker must be kept; `false` means the caller destroys the
    /// worker. A slot at or above a shrunken capacity is never retained.
    pub fn done(&mut self, slot: usize, keep_pending: bool) -> bool {
        let Some(key) = self.busy.remove(&slot) else {
            return false;
        };
        let retiring = self.capacity.is_some_and(|cap| slot >= cap);
        if keep_pending && !retiring {
            self.warm.push((key, slot));
            true
        } else {
            false
        }
    }

    /// Change a bounded pool's capacity. No-op for unbounded pools.
    pub fn resize(&mut self, capacity: usize) -> ResizeOutcome {
        let Some(cap) = self.capacity else {
            return ResizeOutcome::default();
        };
        let new_cap = capacity.max(1);
        self.capacity = Some(new_cap);
        let mut outcome = ResizeOutcome::default();
        if new_cap < cap {
            let warm = std::mem::take(&mut self.warm);
            for (key, slot) in warm {
                if slot >= new_cap {
                    outcome.retired.push(slot);
                } else {
                    self.warm.push((key, slot));
                }
            }
        }
        outcome.ready = new_cap > cap && self.busy.is_empty();
        outcome
    }

    /// Drop all accounting and return every slot that still has a worker
    /// behind it, in id order, so the caller can tear them down.
    pub fn clear(&mut self) -> Vec<usize> {
        let mut live: Vec<usize> = self.busy.drain().map(|(slot, _)| slot).collect();
        live.extend(self.warm.drain(..).map(|(_, slot)| slot));
        live.sort_unstable();
        self.next_id = 0;
        live
    }

    /// Smallest id under `cap` that is neither busy nor warm.
    fn free_slot(&self, cap: usize) -> Option<usize> {
        (0..cap).find(|slot| {
            !self.busy.contains_key(slot) && !self.warm.iter().any(|(_, w)| w == slot)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_saturates_at_capacity() {
        let mut pool = WorkerPool::bounded(2);
        assert_eq!(pool.next(Some("a")), Some(0));
        assert_eq!(pool.next(Some("b")), Some(1));
        assert_eq!(pool.next(Some("c")), None);
        assert_eq!(pool.busy_len(), 2);
    }

    #[test]
    fn bounded_reuses_released_ids() {
        let mut pool = WorkerPool::bounded(2);
        assert_eq!(pool.next(Some("a")), Some(0));
        assert_eq!(pool.next(Some("b")), Some(1));
        assert!(!pool.done(0, false));
        assert_eq!(pool.next(Some("c")), Some(0));
    }

    #[test]
    fn warm_slot_prefers_matching_key() {
        let mut pool = WorkerPool::bounded(3);
        assert_eq!(pool.next(Some("a")), Some(0));
        assert_eq!(pool.next(Some("b")), Some(1));
        assert!(pool.done(0, true));
        assert!(pool.done(1, true));
        // "b" gets its old slot back even though 0 was released first.
        assert_eq!(pool.next(Some("b")), Some(1));
    }

    #[test]
    fn bounded_takes_any_warm_before_a_fresh_id() {
        let mut pool = WorkerPool::bounded(3);
        assert_eq!(pool.next(Some("a")), Some(0));
        assert!(pool.done(0, true));
        assert_eq!(pool.next(Some("z")), Some(0));
    }

    #[test]
    fn shrink_retires_warm_now_and_busy_on_release() {
        let mut pool = WorkerPool::bounded(3);
        assert_eq!(pool.next(Some("a")), Some(0));
        assert_eq!(pool.next(Some("b")), Some(1));
        assert_eq!(pool.next(Some("c")), Some(2));
        assert!(pool.done(2, true));

        let outcome = pool.resize(1);
        assert!(!outcome.ready);
        assert_eq!(outcome.retired, vec![2]);
        // Busy slot 1 is above the new bound: dropped when released.
        assert!(!pool.done(1, true));
        assert!(pool.done(0, true));
        assert_eq!(pool.next(None), Some(0));
        assert_eq!(pool.next(None), None);
    }

    #[test]
    fn grow_signals_ready_only_when_idle() {
        let mut pool = WorkerPool::bounded(1);
        assert_eq!(pool.next(Some("a")), Some(0));
        assert!(!pool.resize(2).ready);
        pool.done(0, false);
        assert!(pool.resize(3).ready);
        assert!(!pool.resize(2).ready);
    }

    #[test]
    fn unbounded_allocates_monotonically_with_key_affinity() {
        let mut pool = WorkerPool::unbounded();
        assert_eq!(pool.next(Some("a")), Some(0));
        assert_eq!(pool.next(Some("b")), Some(1));
        assert!(pool.done(0, true));
        // A different key never takes "a"'s warm slot.
        assert_eq!(pool.next(Some("c")), Some(2));
        assert_eq!(pool.next(Some("a")), Some(0));
    }

    #[test]
    fn clear_returns_every_live_slot() {
        let mut pool = WorkerPool::unbounded();
        pool.next(Some("a"));
        pool.next(Some("b"));
        pool.next(Some("c"));
        pool.done(1, true);
        pool.done(2, false);
        assert_eq!(pool.clear(), vec![0, 1]);
        assert!(pool.is_idle());
        assert_eq!(pool.next(None), Some(0));
    }
}
