// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dependent feature modules and everybody else who wants to hear about the
//! adapter's lifecycle.

use hba_msgs::iocfc::ResourceCounts;
use hba_msgs::{MsgClass, MsgHeader};

use crate::config::HbaConfig;
use crate::error::{RegistryError, SendError};
use crate::reqq::{RequestPort, Space};

/// Most modules one adapter can carry.
pub const MAX_MODULES: usize = 16;

/// Position of a module in registration order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModuleId(u8);

impl ModuleId {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// A response slot, delivered to the module that owns its class.
#[derive(Copy, Clone, Debug)]
pub struct Response<'a> {
    pub header: MsgHeader,
    /// The rest of the slot after the header, padding included.
    pub body: &'a [u8],
}

/// Sending side of the request ring, as seen from inside a module callback.
pub struct Tx<'a> {
    port: &'a mut dyn RequestPort,
    owner: ModuleId,
    granted: &'a ResourceCounts,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(
        port: &'a mut dyn RequestPort,
        owner: ModuleId,
        granted: &'a ResourceCounts,
    ) -> Self {
        Self {
            port,
            owner,
            granted,
        }
    }

    pub fn owner(&self) -> ModuleId {
        self.owner
    }

    /// Resource counts granted by the firmware in the last negotiation.
    pub fn granted(&self) -> &ResourceCounts {
        self.granted
    }

    pub fn send(
        &mut self,
        class: MsgClass,
        id: u8,
        payload: &[u8],
    ) -> Result<(), SendError> {
        self.port.send(class, id, payload)
    }

    /// See [`crate::Hba::wait_for_space`].
    pub fn wait_for_space(&mut self, arg: u32) -> Result<Space, SendError> {
        self.port.wait_for_space(self.owner, arg)
    }

    pub fn free_slots(&self) -> u16 {
        self.port.free_slots()
    }
}

/// A subsystem whose lifecycle follows the controller's.
///
/// Callbacks are made in registration order, synchronously, from whatever
/// context is driving the adapter. None of them may block.
pub trait FeatureModule {
    fn name(&self) -> &'static str;

    /// Bytes of DMA-able memory this module needs under `config`.
    fn meminfo(&self, _config: &HbaConfig) -> usize {
        0
    }

    fn attach(&mut self, config: &HbaConfig);

    /// The firmware has granted `granted`; size pools to fit. Called before
    /// the controller reports negotiation complete.
    fn reconfigure(&mut self, _granted: &ResourceCounts) {}

    fn start(&mut self, tx: &mut Tx<'_>);

    fn stop(&mut self);

    /// The adapter went away underneath us. Anything outstanding is lost.
    fn iocdisable(&mut self);

    fn handle(&mut self, _tx: &mut Tx<'_>, _rsp: &Response<'_>) {}

    /// A slot is free for the request parked with `arg`.
    fn resume(&mut self, _tx: &mut Tx<'_>, _arg: u32) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocEvent {
    Operational,
    Failed,
    Disabled,
    FwMismatch,
}

/// Operations that complete asynchronously.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Init,
    Enable,
    Disable,
    Stop,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpError {
    Failed,
    /// Another operation was requested before this one finished.
    Superseded,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub op: Op,
    pub result: Result<(), OpError>,
}

pub trait HbaEvents {
    fn ioc_event(&mut self, _event: IocEvent) {}

    fn completion(&mut self, _completion: Completion) {}
}

pub(crate) struct Registry<'m> {
    modules: heapless::Vec<&'m mut dyn FeatureModule, MAX_MODULES>,
}

impl<'m> Registry<'m> {
    pub fn new() -> Self {
        Self {
            modules: heapless::Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        module: &'m mut dyn FeatureModule,
    ) -> Result<ModuleId, RegistryError> {
        let id = ModuleId(self.modules.len() as u8);
        self.modules
            .push(module)
            .map_err(|_| RegistryError::Full)?;
        Ok(id)
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        id.index() < self.modules.len()
    }

    pub fn get_mut(
        &mut self,
        id: ModuleId,
    ) -> Option<&mut (dyn FeatureModule + 'm)> {
        self.modules.get_mut(id.index()).map(|m| &mut **m)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(dyn FeatureModule + 'm)> {
        self.modules.iter().map(|m| &**m)
    }

    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (ModuleId, &mut (dyn FeatureModule + 'm))> {
        self.modules
            .iter_mut()
            .enumerate()
            .map(|(i, m)| (ModuleId(i as u8), &mut **m))
    }
}
