// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use enum_map::EnumMap;
use hba_msgs::{MsgClass, MsgHeader};

use crate::error::RegistryError;
use crate::module::ModuleId;

/// Who handles an incoming response slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    /// The controller's own negotiation traffic.
    Iocfc,
    Module(ModuleId),
    /// A known class that nobody registered for.
    Unhandled(MsgClass),
    /// The mailbox class showed up on a ring.
    Misrouted,
    Unknown(u8),
}

/// Response class to owning module.
#[derive(Default)]
pub struct DispatchTable {
    owners: EnumMap<MsgClass, Option<ModuleId>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        class: MsgClass,
        owner: ModuleId,
    ) -> Result<(), RegistryError> {
        match class {
            MsgClass::Ioc | MsgClass::Iocfc => {
                Err(RegistryError::ClassReserved(class))
            }
            _ if self.owners[class].is_some() => {
                Err(RegistryError::ClassTaken(class))
            }
            _ => {
                self.owners[class] = Some(owner);
                Ok(())
            }
        }
    }

    pub fn owner(&self, class: MsgClass) -> Option<ModuleId> {
        self.owners[class]
    }

    pub(crate) fn route(&self, header: &MsgHeader) -> Route {
        match header.class() {
            None => Route::Unknown(header.class),
            Some(MsgClass::Ioc) => Route::Misrouted,
            Some(MsgClass::Iocfc) => Route::Iocfc,
            Some(c) => match self.owners[c] {
                Some(m) => Route::Module(m),
                None => Route::Unhandled(c),
            },
        }
    }
}
