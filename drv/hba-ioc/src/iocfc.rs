// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Controller lifecycle layered on the IOC: persisted configuration, ring
//! negotiation, and starting and stopping the dependent modules.
//!
//! As with [`crate::ioc`], the table here is pure and the adapter executes
//! the entry actions.

use crate::module::Op;
use crate::Transition;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocfcState {
    Stopped,
    /// Bringing the IOC up for the first time.
    Initing,
    ReadPersistedConfig,
    /// Negotiation request sent, waiting for the grant.
    InitCfgWait,
    /// Negotiated; modules not started yet.
    InitCfgDone,
    Operational,
    WritePersistedConfig,
    Stopping,
    /// Re-enabling after a disable.
    Enabling,
    CfgWait,
    Disabling,
    Disabled,
    Failed,
    InitFailed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocfcInput {
    Init,
    Start,
    Stop,
    Enable,
    Disable,
    IocEnabled,
    IocFailed,
    IocDisabled,
    PersistDone,
    CfgDone,
    CfgFailed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocfcAction {
    /// Asks the IOC to enable, or reports `IocEnabled` at once if it
    /// already is.
    EnableIoc,
    /// Asks the IOC to disable, or reports `IocDisabled` at once if it
    /// already is.
    DisableIoc,
    ReadPersisted,
    WritePersisted,
    /// Resets both rings and starts accepting traffic.
    OpenRings,
    /// Stops accepting ring traffic and drops the waiters.
    CloseRings,
    SendCfg,
    StartModules,
    /// Calls `stop` on every module, if they were started.
    StopModules,
    /// Completes the pending operation if it is `Op`.
    Complete(Op),
    /// Fails whatever operation is pending.
    FailPending,
    /// Posts `Start` if the pending enable asked for it.
    AutoStart,
}

pub fn next(state: IocfcState, input: IocfcInput) -> Transition<IocfcState> {
    use IocfcInput::*;
    use IocfcState as S;
    use Transition::{Goto, Reject, Stay};

    match (state, input) {
        (S::Stopped, Init | Enable) => Goto(S::Initing),

        (S::Initing, IocEnabled) => Goto(S::ReadPersistedConfig),
        (S::ReadPersistedConfig, PersistDone) => Goto(S::InitCfgWait),
        (S::InitCfgWait, CfgDone) => Goto(S::InitCfgDone),
        (S::InitCfgWait, CfgFailed) => Goto(S::InitFailed),
        (S::InitCfgDone, Start) => Goto(S::Operational),

        (S::Enabling, IocEnabled) => Goto(S::CfgWait),
        (S::CfgWait, CfgDone) => Goto(S::Operational),
        (S::CfgWait, CfgFailed) => Goto(S::Failed),

        (S::Initing | S::ReadPersistedConfig | S::InitCfgWait, IocFailed) => {
            Goto(S::InitFailed)
        }
        (
            S::InitCfgDone | S::Operational | S::Enabling | S::CfgWait,
            IocFailed,
        ) => Goto(S::Failed),
        (S::Failed | S::InitFailed | S::Disabling | S::Stopping, IocFailed) => {
            Stay
        }
        (S::WritePersistedConfig, PersistDone | IocFailed) => {
            Goto(S::Stopping)
        }

        (S::Initing | S::ReadPersistedConfig | S::Enabling, Stop) => {
            Goto(S::Stopping)
        }
        (
            S::InitCfgWait
            | S::InitCfgDone
            | S::Operational
            | S::CfgWait
            | S::Disabled
            | S::Failed,
            Stop,
        ) => Goto(S::WritePersistedConfig),
        (S::InitFailed, Stop) => Goto(S::Stopping),
        (S::WritePersistedConfig | S::Stopping, Stop) => Stay,
        (S::Stopping, IocDisabled) => Goto(S::Stopped),

        (
            S::Initing
            | S::ReadPersistedConfig
            | S::InitCfgWait
            | S::InitCfgDone
            | S::Operational
            | S::Enabling
            | S::CfgWait
            | S::Failed
            | S::InitFailed,
            Disable,
        ) => Goto(S::Disabling),
        (S::Disabling | S::Disabled, Disable) => Stay,
        (S::Disabling, IocDisabled) => Goto(S::Disabled),

        (S::Disabled, Enable) => Goto(S::Enabling),
        (S::InitFailed, Init | Enable) => Goto(S::Initing),
        (S::Operational, Enable) => Stay,

        _ => Reject,
    }
}

/// What to do on arrival in `state`, in order.
pub fn entry(state: IocfcState) -> &'static [IocfcAction] {
    use IocfcAction::*;

    match state {
        IocfcState::Stopped => &[StopModules, Complete(Op::Stop)],
        IocfcState::Initing | IocfcState::Enabling => &[EnableIoc],
        IocfcState::ReadPersistedConfig => &[ReadPersisted],
        IocfcState::InitCfgWait | IocfcState::CfgWait => {
            &[OpenRings, SendCfg]
        }
        IocfcState::InitCfgDone => &[Complete(Op::Init), AutoStart],
        IocfcState::Operational => &[StartModules, Complete(Op::Enable)],
        IocfcState::WritePersistedConfig => &[WritePersisted],
        IocfcState::Stopping | IocfcState::Disabling => {
            &[CloseRings, DisableIoc]
        }
        IocfcState::Disabled => {
            &[CloseRings, StopModules, Complete(Op::Disable)]
        }
        IocfcState::Failed | IocfcState::InitFailed => {
            &[CloseRings, FailPending]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IocfcInput as I;
    use IocfcState as S;

    fn walk(mut s: IocfcState, inputs: &[IocfcInput]) -> IocfcState {
        for &i in inputs {
            match next(s, i) {
                Transition::Goto(to) => s = to,
                Transition::Stay => {}
                Transition::Reject => panic!("{s:?} rejected {i:?}"),
            }
        }
        s
    }

    #[test]
    fn init_then_start() {
        let s = walk(
            S::Stopped,
            &[I::Init, I::IocEnabled, I::PersistDone, I::CfgDone],
        );
        assert_eq!(s, S::InitCfgDone);
        assert_eq!(walk(s, &[I::Start]), S::Operational);
    }

    #[test]
    fn negotiation_failure() {
        assert_eq!(
            walk(
                S::Stopped,
                &[I::Init, I::IocEnabled, I::PersistDone, I::CfgFailed]
            ),
            S::InitFailed
        );
        assert_eq!(
            walk(S::Disabled, &[I::Enable, I::IocEnabled, I::CfgFailed]),
            S::Failed
        );
    }

    #[test]
    fn ioc_failure_splits_on_whether_we_ever_came_up() {
        for s in [S::Initing, S::ReadPersistedConfig, S::InitCfgWait] {
            assert_eq!(next(s, I::IocFailed), Transition::Goto(S::InitFailed));
        }
        for s in [S::InitCfgDone, S::Operational, S::Enabling, S::CfgWait] {
            assert_eq!(next(s, I::IocFailed), Transition::Goto(S::Failed));
        }
    }

    #[test]
    fn stop_persists_first_once_configured() {
        assert_eq!(
            walk(S::Operational, &[I::Stop, I::PersistDone, I::IocDisabled]),
            S::Stopped
        );
        // Nothing worth persisting before the rings were negotiated.
        assert_eq!(next(S::Initing, I::Stop), Transition::Goto(S::Stopping));
    }

    #[test]
    fn disable_then_reenable() {
        let s = walk(S::Operational, &[I::Disable, I::IocDisabled]);
        assert_eq!(s, S::Disabled);
        assert_eq!(next(s, I::Disable), Transition::Stay);
        assert_eq!(
            walk(s, &[I::Enable, I::IocEnabled, I::CfgDone]),
            S::Operational
        );
    }

    #[test]
    fn failed_needs_disable_before_enable() {
        assert_eq!(next(S::Failed, I::Enable), Transition::Reject);
        assert_eq!(next(S::Failed, I::Disable), Transition::Goto(S::Disabling));
    }

    #[test]
    fn stray_completions_are_rejected() {
        assert_eq!(next(S::Stopped, I::CfgDone), Transition::Reject);
        assert_eq!(next(S::Operational, I::PersistDone), Transition::Reject);
        assert_eq!(next(S::Stopped, I::IocDisabled), Transition::Reject);
    }

    #[test]
    fn modules_stop_in_terminal_states() {
        assert!(entry(S::Stopped).contains(&IocfcAction::StopModules));
        assert!(entry(S::Disabled).contains(&IocfcAction::StopModules));
        assert!(!entry(S::Failed).contains(&IocfcAction::StopModules));
    }
}
