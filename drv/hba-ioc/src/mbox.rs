// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bring-up mailbox: one request in flight at a time, used before the
//! rings exist and for debug commands after.

use hba_msgs::ioc::{IocReply, IocRequest};
use hba_msgs::{MboxFrame, Message, MsgClass};

use crate::error::MboxError;
use crate::hw::HbaHw;
use crate::ioc::Generation;

/// The request currently awaiting a reply.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Outstanding {
    pub id: u8,
    pub generation: Generation,
}

/// What a received mailbox frame turned out to be.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MboxOutcome {
    Reply(IocReply),
    /// Tagged with a generation other than the current one.
    Stale { token: u16 },
    /// Decodes, but doesn't answer what we asked.
    Unexpected { id: u8 },
    WrongClass(u8),
    Undecodable,
}

#[derive(Debug, Default)]
pub struct Mailbox {
    pending: Option<Outstanding>,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self { pending: None }
    }

    pub fn outstanding(&self) -> Option<Outstanding> {
        self.pending
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn send(
        &mut self,
        hw: &mut impl HbaHw,
        req: &IocRequest,
        generation: Generation,
    ) -> Result<(), MboxError> {
        if self.pending.is_some() {
            return Err(MboxError::Busy);
        }
        let frame = MboxFrame::encode(req, generation.raw())
            .map_err(MboxError::Encode)?;
        hw.mbox_send(frame.to_words());
        self.pending = Some(Outstanding {
            id: req.id(),
            generation,
        });
        Ok(())
    }

    /// Matches a frame from the firmware against the outstanding request.
    /// Only a `Reply` frees the mailbox.
    pub(crate) fn complete(
        &mut self,
        frame: &MboxFrame,
        current: Generation,
    ) -> MboxOutcome {
        if frame.header.class != MsgClass::Ioc as u8 {
            return MboxOutcome::WrongClass(frame.header.class);
        }
        let token = frame.header.token();
        if token != current.raw() {
            return MboxOutcome::Stale { token };
        }
        let Some(out) = self.pending else {
            return MboxOutcome::Unexpected {
                id: frame.header.id,
            };
        };
        match frame.decode::<IocReply>() {
            Ok((_, reply))
                if reply.request_id() == out.id
                    && out.generation == current =>
            {
                self.pending = None;
                MboxOutcome::Reply(reply)
            }
            Ok((_, reply)) => MboxOutcome::Unexpected { id: reply.id() },
            Err(_) => MboxOutcome::Undecodable,
        }
    }

    /// Forgets the outstanding request, if any. A reply that arrives for it
    /// afterwards is reported as unexpected.
    pub fn abandon(&mut self) -> Option<Outstanding> {
        self.pending.take()
    }
}
