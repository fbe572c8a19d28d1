//! Event batches and their recycling pool

use rtt_common::ClassifiedEvent;

/// Bounded, ordered run of classified events moved between threads as a unit
#[derive(Debug)]
pub struct Batch {
    events: Vec<ClassifiedEvent>,
    capacity: usize,
}

impl Batch {
    /// Allocate an empty batch with room for `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an event, returning `true` once the batch is full
    pub fn push(&mut self, event: ClassifiedEvent) -> bool {
        self.events.push(event);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events in arrival order
    pub fn events(&self) -> &[ClassifiedEvent] {
        &self.events
    }

    fn clear(&mut self) {
        self.events.clear();
    }
}

/// Free list of batches
///
/// Grows only to the number of batches simultaneously in flight; every
/// published batch is eventually released back.
#[derive(Debug)]
pub struct BufferPool {
    free: Vec<Batch>,
    batch_capacity: usize,
    allocated: usize,
}

impl BufferPool {
    pub fn new(batch_capacity: usize) -> Self {
        Self {
            free: Vec::new(),
            batch_capacity,
            allocated: 0,
        }
    }

    /// Take an empty batch, allocating one if the free list is exhausted
    pub fn acquire(&mut self) -> Batch {
        match self.free.pop() {
            Some(batch) => batch,
            None => {
                self.allocated += 1;
                Batch::with_capacity(self.batch_capacity)
            }
        }
    }

    /// Clear a batch and return it to the free list
    pub fn release(&mut self, mut batch: Batch) {
        batch.clear();
        self.free.push(batch);
    }

    /// Number of batches waiting on the free list
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Number of batches this pool has ever allocated
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}
