// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use heapless::Deque;

/// Error returned when the wait queue has no room; carries the rejected
/// waiter back to the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WaitQueueFull<T>(pub T);

/// A bounded FIFO of parked waiters.
///
/// The queue owns each waiter from `push` until it is handed back exactly
/// once, either by `pop` or by one of the cancellation calls.
#[derive(Debug)]
pub struct WaitQueue<T, const N: usize> {
    q: Deque<T, N>,
}

impl<T, const N: usize> Default for WaitQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> WaitQueue<T, N> {
    pub const fn new() -> Self {
        Self { q: Deque::new() }
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn push(&mut self, waiter: T) -> Result<(), WaitQueueFull<T>> {
        self.q.push_back(waiter).map_err(WaitQueueFull)
    }

    /// Removes the longest-waiting entry.
    pub fn pop(&mut self) -> Option<T> {
        self.q.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.q.iter()
    }

    /// Removes every waiter for which `cancel` returns `true`, preserving the
    /// order of the rest, and returns how many were removed.
    pub fn cancel_where(
        &mut self,
        mut cancel: impl FnMut(&T) -> bool,
    ) -> usize {
        let mut removed = 0;
        for _ in 0..self.q.len() {
            let Some(w) = self.q.pop_front() else {
                break;
            };
            if cancel(&w) {
                removed += 1;
            } else {
                // Can't fail: we just popped.
                let _ = self.q.push_back(w);
            }
        }
        removed
    }

    /// Drops every waiter, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.q.len();
        self.q.clear();
        n
    }
}
