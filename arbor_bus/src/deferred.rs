// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Commands deferred until a later point of the draw cycle.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// When a deferred command runs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Deferral {
    /// After the current pass has applied its changes.
    EndOfPass,
    /// At the start of the next pass, before anything is updated or drawn.
    NextStablePass,
}

/// Two FIFO queues of commands, one per [`Deferral`].
///
/// Each command is handed out exactly once by [`DeferredQueue::take`].
#[derive(Clone, Debug)]
pub struct DeferredQueue<C> {
    end_of_pass: VecDeque<C>,
    next_stable: VecDeque<C>,
}

impl<C> Default for DeferredQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> DeferredQueue<C> {
    /// Create empty queues.
    pub fn new() -> Self {
        Self {
            end_of_pass: VecDeque::new(),
            next_stable: VecDeque::new(),
        }
    }

    fn queue_mut(&mut self, when: Deferral) -> &mut VecDeque<C> {
        match when {
            Deferral::EndOfPass => &mut self.end_of_pass,
            Deferral::NextStablePass => &mut self.next_stable,
        }
    }

    /// Queue a command.
    pub fn push(&mut self, when: Deferral, command: C) {
        self.queue_mut(when).push_back(command);
    }

    /// Remove and return every command queued for `when`, oldest first.
    ///
    /// Commands pushed while the returned batch runs land in the queue again and are picked
    /// up by the next `take`.
    pub fn take(&mut self, when: Deferral) -> Vec<C> {
        self.queue_mut(when).drain(..).collect()
    }

    /// Number of commands queued for `when`.
    pub fn len(&self, when: Deferral) -> usize {
        match when {
            Deferral::EndOfPass => self.end_of_pass.len(),
            Deferral::NextStablePass => self.next_stable.len(),
        }
    }

    /// Returns `true` if both queues are empty.
    pub fn is_empty(&self) -> bool {
        self.end_of_pass.is_empty() && self.next_stable.is_empty()
    }

    /// Drop every queued command.
    pub fn clear(&mut self) {
        self.end_of_pass.clear();
        self.next_stable.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_are_independent_and_fifo() {
        let mut q = DeferredQueue::new();
        q.push(Deferral::EndOfPass, 1);
        q.push(Deferral::NextStablePass, 10);
        q.push(Deferral::EndOfPass, 2);
        assert_eq!(q.len(Deferral::EndOfPass), 2);
        assert_eq!(q.take(Deferral::EndOfPass), [1, 2]);
        assert_eq!(q.take(Deferral::EndOfPass), Vec::<i32>::new());
        assert!(!q.is_empty());
        assert_eq!(q.take(Deferral::NextStablePass), [10]);
        assert!(q.is_empty());
    }
}
