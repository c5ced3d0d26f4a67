// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use hba_msgs::iocfc::{IntrAttr, ResourceCounts};
use hba_msgs::{FwVersion, MsgClass};

use crate::ioc::{Generation, IocInput, IocState};
use crate::iocfc::{IocfcInput, IocfcState};
use crate::module::{ModuleId, Op};

pub const TRACE_DEPTH: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Trace {
    None,
    Ioc {
        from: IocState,
        to: IocState,
        input: IocInput,
    },
    IocRejected {
        state: IocState,
        input: IocInput,
    },
    Iocfc {
        from: IocfcState,
        to: IocfcState,
        input: IocfcInput,
    },
    IocfcRejected {
        state: IocfcState,
        input: IocfcInput,
    },
    NewGeneration(Generation),
    SemaphoreBusy,
    HwError,
    HeartbeatMiss(u32),

    MboxSent(u8),
    MboxSendFailed(u8),
    MboxReply(u8),
    MboxTimeout(u8),
    MboxStale {
        token: u16,
        current: Generation,
    },
    MboxUnexpected(u8),
    MboxWrongClass(u8),
    MboxUndecodable,

    FwVersion(FwVersion),
    FwEnableFailed,
    AttrInvalid,

    CfgSendFailed,
    CfgGranted(ResourceCounts),
    CfgRejected(ResourceCounts),
    CfgUnexpected,
    IntrAttr(IntrAttr),

    RingFull {
        class: MsgClass,
    },
    BadPeerIndex(u16),
    UnknownClass(u8),
    UnhandledClass(MsgClass),
    Misrouted,
    RspStale {
        class: MsgClass,
        token: u16,
    },
    RspUndecodable,
    WaiterQueued {
        owner: ModuleId,
        arg: u32,
    },
    WaiterResumed {
        owner: ModuleId,
        arg: u32,
    },
    WaitersFlushed(u16),

    PersistLoaded,
    PersistInvalid,
    PersistWrite,
    Completed(Op),
    Superseded(Op),
    EventOverflow,
}
