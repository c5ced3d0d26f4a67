// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register-level access to one adapter function.
//!
//! Everything the driver does to the hardware goes through [`HbaHw`], so the
//! state machines can be driven against a simulated adapter in tests. An
//! implementation for real silicon maps these onto BAR registers; none of the
//! methods may block.

use hba_msgs::MBOX_WORDS;

bitflags::bitflags! {
    /// Latched interrupt causes.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct IntrStatus: u32 {
        /// The firmware has written the host mailbox.
        const MBOX = 1 << 0;
        /// The firmware's consumer index on the request ring moved.
        const REQQ = 1 << 1;
        /// The firmware's producer index on the response ring moved.
        const RSPQ = 1 << 2;
        /// An error register latched: parity, PCIe, or firmware halt.
        const ERROR = 1 << 3;
    }
}

pub trait HbaHw {
    /// Tries to take the hardware semaphore shared by all PCI functions of
    /// the adapter. Returns `true` if we now hold it.
    fn try_acquire_semaphore(&mut self) -> bool;

    fn release_semaphore(&mut self);

    /// Runs the reset sequence and lets the firmware boot. The firmware
    /// reports that it is up by answering the enable request.
    fn reset(&mut self);

    /// Stops the firmware and masks interrupts.
    fn halt(&mut self);

    /// Current value of the firmware heartbeat counter.
    fn heartbeat(&mut self) -> u32;

    /// Reads and acknowledges the pending interrupt causes.
    fn take_intr(&mut self) -> IntrStatus;

    /// Writes a full frame to the host-to-firmware mailbox and rings its
    /// doorbell.
    fn mbox_send(&mut self, words: [u32; MBOX_WORDS]);

    /// Takes the next frame the firmware has posted to the firmware-to-host
    /// mailbox, if any.
    fn mbox_recv(&mut self) -> Option<[u32; MBOX_WORDS]>;

    /// Bus address of the attribute block the firmware fills in on a
    /// get-attributes request.
    fn attr_bus_addr(&self) -> u64;

    /// Copies the attribute block out of its DMA buffer.
    fn read_attr(&mut self, out: &mut [u8]);

    fn reqq_doorbell(&mut self, pi: u16);

    fn reqq_consumer_index(&mut self) -> u16;

    fn rspq_producer_index(&mut self) -> u16;

    fn rspq_doorbell(&mut self, ci: u16);
}
