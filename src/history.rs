//! Bounded undo/redo over timeline snapshots.

use std::collections::VecDeque;

/// Two bounded stacks of snapshots. Pushing a new state clears redo; the
/// oldest entries fall off silently once `depth` is reached.
#[derive(Debug, Clone)]
pub struct History<T> {
    undo: VecDeque<T>,
    redo: VecDeque<T>,
    depth: usize,
}

impl<T> History<T> {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        History {
            undo: VecDeque::with_capacity(depth),
            redo: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Record the state as it was before a mutation.
    pub fn push(&mut self, state: T) {
        Self::push_bounded(&mut self.undo, state, self.depth);
        self.redo.clear();
    }

    /// Step back: `current` is saved for redo and replaced with the last
    /// undo entry. Returns false (and leaves `current` alone) when empty.
    pub fn undo(&mut self, current: &mut T) -> bool {
        match self.undo.pop_back() {
            Some(previous) => {
                let now = std::mem::replace(current, previous);
                Self::push_bounded(&mut self.redo, now, self.depth);
                true
            }
            None => false,
        }
    }

    /// Step forward; the mirror of [`History::undo`].
    pub fn redo(&mut self, current: &mut T) -> bool {
        match self.redo.pop_back() {
            Some(next) => {
                let now = std::mem::replace(current, next);
                Self::push_bounded(&mut self.undo, now, self.depth);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    fn push_bounded(stack: &mut VecDeque<T>, state: T, depth: usize) {
        if stack.len() == depth {
            stack.pop_front();
        }
        stack.push_back(state);
    }
}
