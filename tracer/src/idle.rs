//! Idle flush controller
//!
//! Counts consecutive empty polls on the consumer side. Once the count
//! reaches the threshold the producer's partial batch is forced out, so a
//! lone begin or end never waits for enough traffic to fill a batch.

/// Consumer-side view of queue activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    /// The last poll returned a batch
    Active,
    /// This many consecutive polls found the queue empty
    Idle(u32),
}

#[derive(Debug, Clone)]
pub struct IdleFlushController {
    threshold: u32,
    state: IdleState,
}

impl IdleFlushController {
    /// `threshold` empty polls trigger a flush request; must be non-zero
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state: IdleState::Active,
        }
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    /// A batch arrived
    pub fn on_batch(&mut self) {
        self.state = IdleState::Active;
    }

    /// The queue was empty for a poll interval
    ///
    /// Returns `true` when a forced flush should be issued; the counter
    /// restarts either way once the threshold is reached.
    pub fn on_empty(&mut self) -> bool {
        let count = match self.state {
            IdleState::Active => 1,
            IdleState::Idle(n) => n + 1,
        };
        if count >= self.threshold {
            self.state = IdleState::Idle(0);
            true
        } else {
            self.state = IdleState::Idle(count);
            false
        }
    }
}
