//! Progress blocks and cancellation targeting.
//!
//! While a statement executes, its context registers itself as the owner of a
//! progress block. A tracker that wants to cancel the running work asks the
//! owner of the innermost block to [`BlockingObject::cancel_block`].

use crate::error::ExecResult;
use crate::sync::lock;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Something that can interrupt the blocking call it is running.
pub trait BlockingObject: Send + Sync {
    /// Interrupt the blocking call. Must be safe to call from any thread.
    fn cancel_block(&self) -> ExecResult<()>;
}

/// Receives "operation in progress" registrations.
pub trait ProgressTracker: Send + Sync {
    fn start_block(&self, owner: Arc<dyn BlockingObject>, label: Option<&str>);

    fn end_block(&self);
}

/// Tracker that ignores every block.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl ProgressTracker for NoopTracker {
    fn start_block(&self, _owner: Arc<dyn BlockingObject>, _label: Option<&str>) {}

    fn end_block(&self) {}
}

struct Block {
    owner: Arc<dyn BlockingObject>,
    label: Option<String>,
}

#[derive(Default)]
struct StackState {
    blocks: Vec<Block>,
    started: usize,
    ended: usize,
    labels: Vec<Option<String>>,
}

/// Tracker keeping active blocks on a stack.
///
/// Counts every start and end so callers can verify blocks are balanced, and
/// can cancel the owner of the innermost block from any thread.
#[derive(Default)]
pub struct BlockStack {
    state: Mutex<StackState>,
}

impl BlockStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently active blocks.
    pub fn depth(&self) -> usize {
        lock(&self.state).blocks.len()
    }

    pub fn started(&self) -> usize {
        lock(&self.state).started
    }

    pub fn ended(&self) -> usize {
        lock(&self.state).ended
    }

    /// Labels of every block ever started, oldest first.
    pub fn labels(&self) -> Vec<Option<String>> {
        lock(&self.state).labels.clone()
    }

    /// Label of the innermost active block.
    pub fn current_label(&self) -> Option<String> {
        lock(&self.state).blocks.last().and_then(|b| b.label.clone())
    }

    /// Cancel the owner of the innermost block. Returns false if no block is active.
    pub fn cancel_current(&self) -> ExecResult<bool> {
        // Cancel outside the lock: the owner may end its block while cancelling.
        let owner = lock(&self.state).blocks.last().map(|b| Arc::clone(&b.owner));
        match owner {
            Some(owner) => {
                owner.cancel_block()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl ProgressTracker for BlockStack {
    fn start_block(&self, owner: Arc<dyn BlockingObject>, label: Option<&str>) {
        let mut state = lock(&self.state);
        state.started += 1;
        state.labels.push(label.map(str::to_string));
        state.blocks.push(Block {
            owner,
            label: label.map(str::to_string),
        });
        debug!(depth = state.blocks.len(), label = label.unwrap_or(""), "Progress block started");
    }

    fn end_block(&self) {
        let mut state = lock(&self.state);
        state.ended += 1;
        if state.blocks.pop().is_none() {
            warn!("Progress block ended without a matching start");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingOwner {
        cancels: AtomicUsize,
    }

    impl BlockingObject for CountingOwner {
        fn cancel_block(&self) -> ExecResult<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_blocks_nest_and_balance() {
        let stack = BlockStack::new();
        let owner = Arc::new(CountingOwner::default());
        stack.start_block(owner.clone(), Some("outer"));
        stack.start_block(owner.clone(), Some("inner"));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.current_label().as_deref(), Some("inner"));
        stack.end_block();
        stack.end_block();
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.started(), 2);
        assert_eq!(stack.ended(), 2);
    }

    #[test]
    fn test_cancel_current_targets_innermost_owner() {
        let stack = BlockStack::new();
        let outer = Arc::new(CountingOwner::default());
        let inner = Arc::new(CountingOwner::default());
        stack.start_block(outer.clone(), None);
        stack.start_block(inner.clone(), None);
        assert!(stack.cancel_current().unwrap());
        assert_eq!(inner.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(outer.cancels.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_without_blocks() {
        let stack = BlockStack::new();
        assert!(!stack.cancel_current().unwrap());
    }

    #[test]
    fn test_unmatched_end_is_counted() {
        let stack = BlockStack::new();
        stack.end_block();
        assert_eq!(stack.ended(), 1);
        assert_eq!(stack.depth(), 0);
    }
}
