// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host side of the HBA firmware interface.
//!
//! An [`Hba`] owns one adapter function: the bring-up mailbox, the request
//! and response rings, and two stacked state machines. The IOC machine
//! ([`ioc`]) takes the firmware from reset to operational and notices when
//! it dies; the IOCFC machine ([`iocfc`]) sits on top, negotiating ring
//! resources and starting and stopping the dependent [`FeatureModule`]s.
//!
//! Both machines are plain transition tables. The adapter feeds them inputs
//! from interrupts, timers and API calls, and carries out the actions each
//! state lists on entry.

#![cfg_attr(not(test), no_std)]

mod adapter;
mod config;
mod dispatch;
mod error;
mod hw;
pub mod ioc;
pub mod iocfc;
mod mbox;
mod module;
mod persist;
mod reqq;
mod stats;
mod trace;

pub use adapter::{
    DebugCmd, DebugReply, Hba, FW_MAJOR_SUPPORTED, MAX_LISTENERS,
};
pub use config::{HbaConfig, MAX_RING_DEPTH};
pub use dispatch::DispatchTable;
pub use error::{
    ConfigError, HbaError, MboxError, RegistryError, SendError, StateError,
};
pub use hw::{HbaHw, IntrStatus};
pub use ioc::{Generation, IocState};
pub use iocfc::IocfcState;
pub use mbox::Outstanding;
pub use module::{
    Completion, FeatureModule, HbaEvents, IocEvent, ModuleId, Op, OpError,
    Response, Tx, MAX_MODULES,
};
pub use persist::{PersistStore, PersistedConfig, PERSIST_MAGIC};
pub use reqq::{Space, MAX_WAITERS};
pub use stats::IocStats;
pub use trace::{Trace, TRACE_DEPTH};

/// Result of feeding one input to a state table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum Transition<S> {
    Goto(S),
    /// Accepted, but nothing to do.
    Stay,
    /// Not valid in the current state.
    Reject,
}
