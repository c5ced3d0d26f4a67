// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Adapter lifecycle: reset, firmware bring-up, health monitoring, and
//! teardown.
//!
//! This module is pure. [`next`] maps a state and an input to a transition,
//! and [`entry`] lists what has to happen on arrival in a state; the adapter
//! carries the actions out in order. Keeping the table free of side effects
//! means every edge can be checked without hardware.

use crate::Transition;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocState {
    /// Not attached to an adapter.
    Uninit,
    /// Attached, firmware not running.
    Reset,
    /// Waiting for another PCI function to release the semaphore.
    SemaphoreWait,
    /// Adapter reset, waiting for the firmware's enable reply.
    HwInit,
    /// Reading the firmware attribute block.
    GetAttr,
    Operational,
    /// Bring-up failed. Needs an enable to retry.
    InitFail,
    /// Lost the firmware after it was up.
    Fail,
    Disabling,
    Disabled,
    /// The firmware's major version is not one we support.
    FwMismatch,
    /// Re-enabling from a quiescent state; waiting for the semaphore.
    Enabling,
    /// The adapter reported an error while already failed.
    HwFail,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocInput {
    Attach,
    Detach,
    Enable,
    /// Enable, with the semaphore already acquired by the caller.
    EnableGranted,
    Disable,
    SemGranted,
    FwEnabled,
    FwEnableFailed,
    FwMismatch,
    AttrOk,
    AttrInvalid,
    FwDisabled,
    MboxTimeout,
    HbLost,
    HwError,
}

/// Things the IOC reports upward to the controller on state entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocNotice {
    Enabled,
    EnableFailed,
    FwMismatch,
    Disabled,
    Failed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocAction {
    /// Disarms every IOC timer.
    StopTimers,
    StopHeartbeat,
    StopIocTimer,
    StartHeartbeat,
    ArmIocTimer,
    ArmSemRetry,
    /// Takes the semaphore if free, otherwise arms the retry timer.
    TrySemaphore,
    ReleaseSemaphore,
    /// Forgets any outstanding mailbox request.
    AbandonMailbox,
    /// Drops every queued request-ring waiter.
    FlushWaiters,
    BumpGeneration,
    ResetHw,
    Halt,
    SendEnable,
    SendGetAttr,
    SendDisable,
    /// Calls `iocdisable` on every registered module.
    NotifyDependents,
    Report(IocNotice),
}

/// Identifies one enable cycle. Every message sent carries the generation
/// it was sent in, and anything that comes back tagged with an older one is
/// dropped.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Generation(u16);

impl Generation {
    pub fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

pub fn next(state: IocState, input: IocInput) -> Transition<IocState> {
    use IocInput::*;
    use IocState as S;
    use Transition::{Goto, Reject, Stay};

    match (state, input) {
        (S::Uninit, Attach) => Goto(S::Reset),
        (S::Uninit, _) => Reject,
        (_, Detach) => Goto(S::Uninit),
        (_, Attach) => Reject,

        (S::Reset, EnableGranted) => Goto(S::HwInit),
        (S::Reset, Enable) => Goto(S::SemaphoreWait),
        (S::Reset, Disable) => Goto(S::Disabled),

        (S::SemaphoreWait | S::Enabling, SemGranted) => Goto(S::HwInit),
        (S::SemaphoreWait | S::Enabling, Disable) => Goto(S::Disabled),
        (S::SemaphoreWait, HwError) => Goto(S::InitFail),
        (S::Enabling, HbLost | HwError) => Goto(S::Fail),

        (S::HwInit, FwEnabled) => Goto(S::GetAttr),
        (S::HwInit, FwMismatch) => Goto(S::FwMismatch),
        (S::HwInit, FwEnableFailed | MboxTimeout | HwError) => {
            Goto(S::InitFail)
        }
        (S::HwInit, Disable) => Goto(S::Disabled),

        (S::GetAttr, AttrOk) => Goto(S::Operational),
        (S::GetAttr, AttrInvalid | MboxTimeout) => Goto(S::InitFail),
        (S::GetAttr, HwError | HbLost) => Goto(S::Fail),
        (S::GetAttr, Disable) => Goto(S::Disabling),

        (S::Operational, Disable) => Goto(S::Disabling),
        (S::Operational, HbLost | HwError | MboxTimeout) => Goto(S::Fail),

        (S::Disabling, FwDisabled | MboxTimeout | HwError) => {
            Goto(S::Disabled)
        }
        (S::Disabling | S::Disabled, Disable) => Stay,

        (S::Disabled | S::InitFail | S::FwMismatch, Enable | EnableGranted) => {
            Goto(S::Enabling)
        }
        (S::InitFail | S::FwMismatch, Disable) => Goto(S::Disabled),

        (S::Fail, HwError) => Goto(S::HwFail),
        (S::Fail, HbLost | MboxTimeout) => Stay,
        (S::Fail | S::HwFail, Disable) => Goto(S::Disabled),
        (S::HwFail, HwError | HbLost | MboxTimeout) => Stay,

        // Already on the way up, or up.
        (
            S::SemaphoreWait | S::Enabling | S::HwInit | S::GetAttr
            | S::Operational,
            Enable | EnableGranted,
        ) => Stay,

        _ => Reject,
    }
}

/// What to do on arrival in `state`, in order.
pub fn entry(state: IocState) -> &'static [IocAction] {
    use IocAction::*;

    match state {
        IocState::Uninit => &[
            StopTimers,
            AbandonMailbox,
            FlushWaiters,
            Halt,
            ReleaseSemaphore,
        ],
        IocState::Reset => &[],
        IocState::SemaphoreWait => &[ArmSemRetry],
        IocState::Enabling => &[TrySemaphore],
        IocState::HwInit => &[
            AbandonMailbox,
            FlushWaiters,
            BumpGeneration,
            ResetHw,
            SendEnable,
            ArmIocTimer,
        ],
        IocState::GetAttr => &[SendGetAttr, ArmIocTimer],
        IocState::Operational => &[
            StopIocTimer,
            ReleaseSemaphore,
            StartHeartbeat,
            Report(IocNotice::Enabled),
        ],
        IocState::InitFail => &[
            StopTimers,
            AbandonMailbox,
            Halt,
            ReleaseSemaphore,
            Report(IocNotice::EnableFailed),
        ],
        IocState::FwMismatch => &[
            StopTimers,
            AbandonMailbox,
            Halt,
            ReleaseSemaphore,
            Report(IocNotice::FwMismatch),
        ],
        IocState::Disabling => &[
            StopHeartbeat,
            FlushWaiters,
            NotifyDependents,
            AbandonMailbox,
            SendDisable,
            ArmIocTimer,
        ],
        IocState::Disabled => &[
            StopTimers,
            AbandonMailbox,
            Halt,
            ReleaseSemaphore,
            Report(IocNotice::Disabled),
        ],
        IocState::Fail => &[
            StopTimers,
            AbandonMailbox,
            FlushWaiters,
            NotifyDependents,
            ReleaseSemaphore,
            Report(IocNotice::Failed),
        ],
        IocState::HwFail => &[Halt],
    }
}
