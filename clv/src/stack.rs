use std::collections::VecDeque;

use crate::Value;

/// Bounded evaluation stack. Pushing onto a full stack drops the oldest
/// entry, so the stack always holds the most recent `capacity` values.
#[derive(Debug, Clone)]
pub struct EvaluationStack {
    values: VecDeque<Value>,
    capacity: usize,
    evicted: u64,
}

impl EvaluationStack {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Pushes a value, returning the evicted oldest value if the stack was full.
    pub fn push(&mut self, value: Value) -> Option<Value> {
        let dropped = if self.values.len() == self.capacity {
            self.evicted += 1;
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        dropped
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.values.pop_back()
    }

    #[must_use]
    pub fn peek(&self) -> Option<&Value> {
        self.values.back()
    }

    /// Keeps the most recent `min(window, capacity)` entries. Returns how many
    /// were dropped.
    pub fn compact(&mut self, window: usize) -> usize {
        let keep = window.min(self.capacity);
        let excess = self.values.len().saturating_sub(keep);
        self.values.drain(..excess);
        self.evicted += excess as u64;
        excess
    }

    /// Drops repeated values, keeping the first occurrence of each.
    pub fn dedup(&mut self) -> usize {
        let before = self.values.len();
        let mut seen: Vec<Value> = Vec::with_capacity(before);
        self.values.retain(|value| {
            if seen.contains(value) {
                false
            } else {
                seen.push(value.clone());
                true
            }
        });
        before - self.values.len()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of values dropped by overflow or compaction.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Contents, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.values.iter().cloned().collect()
    }
}

/// Return addresses. Depth is bounded; pushing past the bound fails instead of
/// growing.
#[derive(Debug, Clone)]
pub struct CallStack {
    frames: Vec<usize>,
    limit: usize,
}

impl CallStack {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            frames: Vec::new(),
            limit,
        }
    }

    /// Returns `None` when the stack is at its limit.
    pub fn push(&mut self, return_pc: usize) -> Option<()> {
        if self.frames.len() >= self.limit {
            return None;
        }
        self.frames.push(return_pc);
        Some(())
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.frames.pop()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionStateInfo {
    pub stack_size: usize,
    pub return_stack_size: usize,
}

impl Default for ExecutionStateInfo {
    fn default() -> Self {
        Self {
            stack_size: 256,
            return_stack_size: 1024,
        }
    }
}

/// Per-engine stacks. Never shared between threads.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub stack: EvaluationStack,
    pub calls: CallStack,
}

impl ExecutionState {
    #[must_use]
    pub fn new(info: &ExecutionStateInfo) -> Self {
        Self {
            stack: EvaluationStack::new(info.stack_size),
            calls: CallStack::new(info.return_stack_size),
        }
    }

    pub fn push(&mut self, value: Value) {
        if let Some(dropped) = self.stack.push(value) {
            log::trace!("stack full, dropped {dropped}");
        }
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    #[must_use]
    pub fn return_depth(&self) -> usize {
        self.calls.depth()
    }
}
