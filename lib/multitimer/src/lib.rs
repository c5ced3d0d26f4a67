// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A timer multiplexer driven by an external clock.
//!
//! `Multitimer` tracks several independent deadlines, named by the variants of
//! an enum, on behalf of code that only gets to see time when somebody hands
//! it a timestamp. It never reads a clock itself.
//!
//! The expected usage model is:
//!
//! - Create an `enum` type naming your timers, and derive the `Enum` trait
//!   (from the `enum_map` crate) for it.
//!
//! - Create a `Multitimer<YourEnumType>`.
//!
//! - Use its API to configure your timers to your heart's content.
//!
//! - Ask `next_deadline` when you next need to be woken, and arrange for that
//!   with whatever real timer you have.
//!
//! - When woken (or whenever you like), call `poll` with the current time, and
//!   then `iter_fired` to find out which timers went off.
//!
//! Timestamps are opaque `u64`s; the only requirement is that they don't go
//! backwards.

#![cfg_attr(not(test), no_std)]

use enum_map::{EnumArray, EnumMap};

pub struct Multitimer<E: EnumArray<Timer>> {
    timers: EnumMap<E, Timer>,
}

impl<E: EnumArray<Timer> + Copy> Default for Multitimer<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EnumArray<Timer> + Copy> Multitimer<E> {
    pub fn new() -> Self {
        Self {
            timers: EnumMap::default(),
        }
    }

    /// Sets the timer chosen by `which` to go off at time `deadline`, with
    /// optional auto-repeat behavior. This replaces any prior setting for the
    /// timer and enables it.
    pub fn set_timer(
        &mut self,
        which: E,
        deadline: u64,
        repeat: Option<Repeat>,
    ) {
        // If the timer has previously fired without us noticing it, preserve
        // that across set.
        let fired_but_not_observed = self.timers[which].fired_but_not_observed;
        self.timers[which] = Timer {
            deadline: Some((deadline, repeat)),
            fired_but_not_observed,
        };
    }

    pub fn get_timer(&self, which: E) -> Option<(u64, Option<Repeat>)> {
        self.timers[which].deadline
    }

    pub fn is_armed(&self, which: E) -> bool {
        self.timers[which].deadline.is_some()
    }

    /// Disarms `which`, and forgets any firing that hasn't been observed yet.
    /// Returns `true` if the timer was armed.
    pub fn clear_timer(&mut self, which: E) -> bool {
        let timer = &mut self.timers[which];
        timer.fired_but_not_observed = false;
        timer.deadline.take().is_some()
    }

    /// Disarms every timer.
    pub fn clear_all(&mut self) {
        for timer in self.timers.values_mut() {
            *timer = Timer::default();
        }
    }

    /// Earliest deadline among armed timers.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers
            .values()
            .filter_map(|timer| timer.deadline)
            .map(|(dl, _repeat)| dl)
            .min()
    }

    /// Marks every timer whose deadline is at or before `now` as fired,
    /// applying its repeat setting. Read the results (destructively) with
    /// `iter_fired()`.
    pub fn poll(&mut self, now: u64) {
        for timer in self.timers.values_mut() {
            let Some((d, r)) = timer.deadline else {
                continue;
            };
            if d > now {
                continue;
            }
            timer.deadline = r.map(|kind| {
                let next = match kind {
                    Repeat::AfterWake(period) => now.saturating_add(period),
                    Repeat::AfterDeadline(period) => d.saturating_add(period),
                };
                (next, r)
            });
            timer.fired_but_not_observed = true;
        }
    }

    /// Returns an iterator over all timers that have fired since the last time
    /// they were observed through this function. A timer may have fired more
    /// than once; that information is lost.
    ///
    /// Timers that have fired will appear in the order given by their `Enum`
    /// implementation, which in practice means declaration order.
    ///
    /// If you drop the iterator before it's exhausted, any timers you didn't
    /// observe will appear next time you call this.
    pub fn iter_fired(&mut self) -> impl Iterator<Item = E> + '_ {
        self.timers.iter_mut().filter_map(move |(e, timer)| {
            if core::mem::replace(&mut timer.fired_but_not_observed, false) {
                Some(e)
            } else {
                None
            }
        })
    }
}

#[derive(Copy, Clone, Default)]
pub struct Timer {
    deadline: Option<(u64, Option<Repeat>)>,
    fired_but_not_observed: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Repeat {
    AfterWake(u64),
    AfterDeadline(u64),
}
