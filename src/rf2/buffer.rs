//! Write-behind persist buffers used during ingestion.
//!
//! A buffer accumulates entities of one kind and hands back a full batch
//! once the flush interval is reached; the component factory persists the
//! batch and the buffer starts over. Access is single-writer within an
//! import job, so the buffer itself carries no locking.
//!
//! The core-components-flushed latch guards the dependency ordering
//! between buffer groups: reference set members and identifiers must not
//! reach the index before the concepts, descriptions and relationships
//! they reference. The latch is a one-way atomic flag so the transition is
//! visible to any thread that consults it.

use std::sync::atomic::{AtomicBool, Ordering};

/// Entities accumulated before a buffer flushes.
pub const FLUSH_INTERVAL: usize = 5000;

/// An in-memory batch of entities awaiting persistence.
#[derive(Debug)]
pub struct PersistBuffer<T> {
    entries: Vec<T>,
    flush_interval: usize,
}

impl<T> Default for PersistBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PersistBuffer<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            flush_interval: FLUSH_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_flush_interval(flush_interval: usize) -> Self {
        Self {
            entries: Vec::new(),
            flush_interval,
        }
    }

    /// Append an entity. Returns the full batch when the flush interval is
    /// reached, leaving the buffer empty.
    pub fn save(&mut self, entity: T) -> Option<Vec<T>> {
        self.entries.push(entity);
        if self.entries.len() >= self.flush_interval {
            Some(self.drain())
        } else {
            None
        }
    }

    /// Take everything buffered so far.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One-way latch recording that every core component buffer has flushed
/// at least once.
#[derive(Debug, Default)]
pub struct CoreFlushLatch(AtomicBool);

impl CoreFlushLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latch. Returns true for the caller that performed the
    /// transition, false for everyone after.
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The buffer hands back a batch exactly at the flush interval.
    #[test]
    fn test_save_returns_batch_at_interval() {
        let mut buffer = PersistBuffer::with_flush_interval(3);
        assert!(buffer.save(1).is_none());
        assert!(buffer.save(2).is_none());
        let batch = buffer.save(3).expect("batch at interval");
        assert_eq!(batch, vec![1, 2, 3]);
        assert!(buffer.is_empty());

        assert!(buffer.save(4).is_none());
        assert_eq!(buffer.drain(), vec![4]);
    }

    /// Only the first set of the latch reports the transition.
    #[test]
    fn test_latch_transitions_once() {
        let latch = CoreFlushLatch::new();
        assert!(!latch.is_set());
        assert!(latch.set());
        assert!(!latch.set());
        assert!(latch.is_set());
    }

    /// The transition is visible across threads.
    #[test]
    fn test_latch_visible_across_threads() {
        let latch = std::sync::Arc::new(CoreFlushLatch::new());
        let worker = {
            let latch = std::sync::Arc::clone(&latch);
            std::thread::spawn(move || latch.set())
        };
        let transitioned_here = latch.set();
        let transitioned_there = worker.join().expect("worker join");
        assert!(transitioned_here ^ transitioned_there);
        assert!(latch.is_set());
    }
}
