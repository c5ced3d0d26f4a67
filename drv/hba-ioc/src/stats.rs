// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Running counters for one adapter. All counters wrap.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IocStats {
    /// Times the firmware was reset and re-enabled.
    pub enable_cycles: u32,
    pub init_failures: u32,
    pub fw_mismatches: u32,
    pub hb_failures: u32,
    pub hw_errors: u32,
    pub mbox_timeouts: u32,
    /// Mailbox frames from an earlier generation.
    pub mbox_stale: u32,
    /// Ring responses from an earlier generation.
    pub rsp_stale: u32,
    /// Events the state machines had no transition for.
    pub illegal_events: u32,
    pub unknown_class: u32,
    pub unhandled_class: u32,
    pub ring_full: u32,
    pub waiters_resumed: u32,
    pub waiters_flushed: u32,
}

pub(crate) fn bump(counter: &mut u32) {
    *counter = counter.wrapping_add(1);
}

pub(crate) fn add(counter: &mut u32, n: usize) {
    *counter = counter.wrapping_add(n as u32);
}
