// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated adapter: register file, mailbox and ring-consuming firmware.
//!
//! The firmware side answers synchronously when the host writes the mailbox
//! or rings a doorbell, latching the matching interrupt cause. Tests then
//! call `Hba::isr` (usually through [`service`]) to let the host see it.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use drv_hba_ioc::{
    Completion, FeatureModule, Hba, HbaConfig, HbaEvents, HbaHw, IntrStatus,
    IocEvent, PersistStore, Response, Tx,
};
use hba_msgs::ioc::{
    DebugDumpRsp, EnableRsp, IocReply, IocRequest, StatusRsp,
};
use hba_msgs::iocfc::{
    CfgRsp, IocfcReply, IocfcRequest, ResourceCounts, SetIntrRsp,
};
use hba_msgs::{
    FwAttributes, FwStatus, FwVersion, MboxFrame, Message, MsgClass,
    MsgHeader, ATTR_SIGNATURE, HEADER_LEN, REPLY_BIT,
};
use msgq::SlotMemory;
use zerocopy::{FromZeros, IntoBytes};

pub const REQQ_BUS: u64 = 0x1000_0000;
pub const RSPQ_BUS: u64 = 0x2000_0000;
pub const ATTR_BUS: u64 = 0x3000_0000;

pub const GOOD_FW: FwVersion = FwVersion {
    major: 3,
    minor: 2,
    maint: 1,
    patch: 0,
};

/// Ring memory visible to both the driver and the simulated firmware.
#[derive(Clone)]
pub struct SharedMem {
    bytes: Rc<RefCell<Vec<u8>>>,
    bus: u64,
}

impl SharedMem {
    pub fn new(len: usize, bus: u64) -> Self {
        Self {
            bytes: Rc::new(RefCell::new(vec![0; len])),
            bus,
        }
    }
}

impl SlotMemory for SharedMem {
    fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    fn bus_addr(&self) -> u64 {
        self.bus
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        self.bytes.borrow_mut()[offset..offset + data.len()]
            .copy_from_slice(data);
    }

    fn read(&self, offset: usize, out: &mut [u8]) {
        out.copy_from_slice(&self.bytes.borrow()[offset..offset + out.len()]);
    }
}

/// A request the firmware took off the request ring for a module class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivered {
    pub class: u8,
    pub id: u8,
    pub token: u16,
    pub payload: Vec<u8>,
}

/// Knobs and observations for the simulated firmware.
pub struct Firmware {
    pub version: FwVersion,
    pub enable_status: FwStatus,
    pub attr_signature: u32,
    /// Ignore mailbox requests entirely.
    pub mbox_silent: bool,
    /// Hold replies to mailbox requests until `release_mbox`.
    pub mbox_hold: bool,
    pub held_mbox: VecDeque<[u32; 7]>,
    pub sem_free: bool,
    pub sem_held: bool,
    pub heartbeat: u32,
    pub heartbeat_frozen: bool,
    pub intr: IntrStatus,
    pub mbox_out: VecDeque<[u32; 7]>,
    pub mbox_seen: Vec<IocRequest>,
    pub resets: u32,
    pub halts: u32,

    /// Resources granted in reply to negotiation; `None` grants what was
    /// asked.
    pub grant: Option<ResourceCounts>,
    pub cfg_status: FwStatus,
    /// Answer each Cfg request twice.
    pub cfg_twice: bool,
    pub cfg_seen: Vec<hba_msgs::iocfc::CfgReq>,
    pub intr_seen: Vec<hba_msgs::iocfc::IntrAttr>,
    /// Leave module requests on the ring instead of consuming them.
    pub hold_reqq: bool,
    /// Answer each module request with a response of the same class.
    pub echo: bool,
    pub delivered: Vec<Delivered>,
    pub doorbells: u32,

    config: HbaConfig,
    reqq: SharedMem,
    rspq: SharedMem,
    reqq_ci: u16,
    host_pi: u16,
    rspq_pi: u16,
    rspq_host_ci: u16,
}

impl Firmware {
    fn new(config: HbaConfig, reqq: SharedMem, rspq: SharedMem) -> Self {
        Self {
            version: GOOD_FW,
            enable_status: FwStatus::Ok,
            attr_signature: ATTR_SIGNATURE,
            mbox_silent: false,
            mbox_hold: false,
            held_mbox: VecDeque::new(),
            sem_free: true,
            sem_held: false,
            heartbeat: 1,
            heartbeat_frozen: false,
            intr: IntrStatus::empty(),
            mbox_out: VecDeque::new(),
            mbox_seen: vec![],
            resets: 0,
            halts: 0,
            grant: None,
            cfg_status: FwStatus::Ok,
            cfg_twice: false,
            cfg_seen: vec![],
            intr_seen: vec![],
            hold_reqq: false,
            echo: false,
            delivered: vec![],
            doorbells: 0,
            config,
            reqq,
            rspq,
            reqq_ci: 0,
            host_pi: 0,
            rspq_pi: 0,
            rspq_host_ci: 0,
        }
    }

    pub fn reqq_ci(&self) -> u16 {
        self.reqq_ci
    }

    /// Consumer index the host last wrote to the response doorbell.
    pub fn rspq_host_ci(&self) -> u16 {
        self.rspq_host_ci
    }

    fn reqq_mask(&self) -> u16 {
        self.config.reqq_depth - 1
    }

    fn rspq_mask(&self) -> u16 {
        self.config.rspq_depth - 1
    }

    fn answer_mbox(&mut self, words: [u32; 7]) {
        let frame = MboxFrame::from_words(words);
        let Ok((token, req)) = frame.decode::<IocRequest>() else {
            return;
        };
        self.mbox_seen.push(req);
        let reply = match req {
            IocRequest::Enable(_) => IocReply::Enable(EnableRsp {
                status: self.enable_status,
                fw_version: self.version,
            }),
            IocRequest::Disable => IocReply::Disable(StatusRsp {
                status: FwStatus::Ok,
            }),
            IocRequest::GetAttr(_) => IocReply::GetAttr(StatusRsp {
                status: FwStatus::Ok,
            }),
            IocRequest::DebugSync => IocReply::DebugSync,
            IocRequest::DebugDump(d) => IocReply::DebugDump(DebugDumpRsp {
                offset: d.offset,
                len: 64,
                more: false,
            }),
        };
        if let Ok(out) = MboxFrame::encode(&reply, token) {
            self.mbox_out.push_back(out.to_words());
            self.intr |= IntrStatus::MBOX;
        }
    }

    /// Answers the mailbox requests held back by `mbox_hold`.
    pub fn release_mbox(&mut self) {
        while let Some(words) = self.held_mbox.pop_front() {
            self.answer_mbox(words);
        }
    }

    /// Queues a raw mailbox frame as if the firmware had written it.
    pub fn inject_mbox(&mut self, frame: MboxFrame) {
        self.mbox_out.push_back(frame.to_words());
        self.intr |= IntrStatus::MBOX;
    }

    /// Writes a response slot as the firmware would.
    pub fn respond(&mut self, header: MsgHeader, body: &[u8]) {
        let slot = usize::from(self.config.rspq_slot_size);
        let mut buf = vec![0u8; slot];
        buf[..HEADER_LEN].copy_from_slice(header.as_bytes());
        buf[HEADER_LEN..HEADER_LEN + body.len()].copy_from_slice(body);
        let off = usize::from(self.rspq_pi) * slot;
        self.rspq.write(off, &buf);
        self.rspq_pi = (self.rspq_pi + 1) & self.rspq_mask();
        self.intr |= IntrStatus::RSPQ;
    }

    fn respond_msg<M: Message>(&mut self, msg: &M, token: u16) {
        let slot = usize::from(self.config.rspq_slot_size);
        let mut buf = vec![0u8; slot];
        let Ok(n) = hba_msgs::encode(msg, token, &mut buf) else {
            return;
        };
        let (header, body) = hba_msgs::split(&buf[..n]).unwrap();
        self.respond(header, body);
    }

    /// Takes requests off the request ring up to the host's last doorbell.
    /// Negotiation traffic is always taken; at most `limit` module
    /// requests are.
    fn drain_reqq(&mut self, limit: usize) -> usize {
        let slot = usize::from(self.config.reqq_slot_size);
        let mut modules = 0;
        let mut moved = false;
        while self.reqq_ci != self.host_pi {
            let mut buf = vec![0u8; slot];
            self.reqq.read(usize::from(self.reqq_ci) * slot, &mut buf);
            let ctl = buf[0] == MsgClass::Iocfc as u8;
            if !ctl {
                if modules >= limit {
                    break;
                }
                modules += 1;
            }
            self.reqq_ci = (self.reqq_ci + 1) & self.reqq_mask();
            moved = true;
            self.handle_request(&buf);
        }
        if moved {
            self.intr |= IntrStatus::REQQ;
        }
        modules
    }

    /// Lets up to `n` held module requests through.
    pub fn release_reqq(&mut self, n: usize) -> usize {
        self.drain_reqq(n)
    }

    fn handle_request(&mut self, slot: &[u8]) {
        let Ok((header, body)) = hba_msgs::split(slot) else {
            return;
        };
        let token = header.token();
        if header.class == MsgClass::Iocfc as u8 {
            match IocfcRequest::decode_body(header.id, body) {
                Ok(IocfcRequest::Cfg(req)) => {
                    self.cfg_seen.push(req);
                    let rsp = IocfcReply::Cfg(CfgRsp {
                        status: self.cfg_status,
                        granted: self.grant.unwrap_or(req.requested),
                    });
                    self.respond_msg(&rsp, token);
                    if self.cfg_twice {
                        self.respond_msg(&rsp, token);
                    }
                }
                Ok(IocfcRequest::SetIntr(intr)) => {
                    self.intr_seen.push(intr);
                    self.respond_msg(
                        &IocfcReply::SetIntr(SetIntrRsp {
                            status: FwStatus::Ok,
                            intr,
                        }),
                        token,
                    );
                }
                Err(_) => {}
            }
            return;
        }
        // Module payloads in these tests are a length byte then data.
        let len = usize::from(body[0]);
        let payload = body[1..1 + len].to_vec();
        self.delivered.push(Delivered {
            class: header.class,
            id: header.id,
            token,
            payload: payload.clone(),
        });
        if self.echo {
            let mut rsp = MsgHeader::new(MsgClass::Port, header.id, token);
            rsp.class = header.class;
            rsp.id |= REPLY_BIT;
            let mut body = vec![len as u8];
            body.extend_from_slice(&payload);
            self.respond(rsp, &body);
        }
    }
}

pub struct MockHw {
    fw: Rc<RefCell<Firmware>>,
}

impl HbaHw for MockHw {
    fn try_acquire_semaphore(&mut self) -> bool {
        let mut fw = self.fw.borrow_mut();
        if fw.sem_free && !fw.sem_held {
            fw.sem_held = true;
            true
        } else {
            false
        }
    }

    fn release_semaphore(&mut self) {
        self.fw.borrow_mut().sem_held = false;
    }

    fn reset(&mut self) {
        let mut fw = self.fw.borrow_mut();
        fw.resets += 1;
        fw.reqq_ci = 0;
        fw.host_pi = 0;
        fw.rspq_pi = 0;
        fw.rspq_host_ci = 0;
        fw.intr = IntrStatus::empty();
        fw.mbox_out.clear();
    }

    fn halt(&mut self) {
        self.fw.borrow_mut().halts += 1;
    }

    fn heartbeat(&mut self) -> u32 {
        let mut fw = self.fw.borrow_mut();
        if !fw.heartbeat_frozen {
            fw.heartbeat = fw.heartbeat.wrapping_add(1);
        }
        fw.heartbeat
    }

    fn take_intr(&mut self) -> IntrStatus {
        core::mem::replace(&mut self.fw.borrow_mut().intr, IntrStatus::empty())
    }

    fn mbox_send(&mut self, words: [u32; 7]) {
        let mut fw = self.fw.borrow_mut();
        if fw.mbox_silent {
            return;
        }
        if fw.mbox_hold {
            fw.held_mbox.push_back(words);
        } else {
            fw.answer_mbox(words);
        }
    }

    fn mbox_recv(&mut self) -> Option<[u32; 7]> {
        self.fw.borrow_mut().mbox_out.pop_front()
    }

    fn attr_bus_addr(&self) -> u64 {
        ATTR_BUS
    }

    fn read_attr(&mut self, out: &mut [u8]) {
        let fw = self.fw.borrow();
        let mut attr = FwAttributes::new_zeroed();
        attr.signature.set(fw.attr_signature);
        attr.fw_version = fw.version.to_bytes();
        attr.port_count = 2;
        let n = out.len().min(FwAttributes::LEN);
        out[..n].copy_from_slice(&attr.as_bytes()[..n]);
    }

    fn reqq_doorbell(&mut self, pi: u16) {
        let mut fw = self.fw.borrow_mut();
        fw.doorbells += 1;
        fw.host_pi = pi;
        let limit = if fw.hold_reqq { 0 } else { usize::MAX };
        fw.drain_reqq(limit);
    }

    fn reqq_consumer_index(&mut self) -> u16 {
        self.fw.borrow().reqq_ci
    }

    fn rspq_producer_index(&mut self) -> u16 {
        self.fw.borrow().rspq_pi
    }

    fn rspq_doorbell(&mut self, ci: u16) {
        self.fw.borrow_mut().rspq_host_ci = ci;
    }
}

impl MockHw {
    pub fn firmware(&self) -> std::cell::Ref<'_, Firmware> {
        self.fw.borrow()
    }
}

pub struct Bench {
    pub fw: Rc<RefCell<Firmware>>,
    pub hw: Option<MockHw>,
    pub reqq: SharedMem,
    pub rspq: SharedMem,
    pub config: HbaConfig,
}

pub fn small_config() -> HbaConfig {
    HbaConfig {
        reqq_depth: 8,
        rspq_depth: 8,
        reqq_slot_size: 64,
        rspq_slot_size: 64,
        ..HbaConfig::default()
    }
}

impl Bench {
    pub fn new(config: HbaConfig) -> Self {
        let reqq = SharedMem::new(
            usize::from(config.reqq_depth) * usize::from(config.reqq_slot_size),
            REQQ_BUS,
        );
        let rspq = SharedMem::new(
            usize::from(config.rspq_depth) * usize::from(config.rspq_slot_size),
            RSPQ_BUS,
        );
        let fw = Rc::new(RefCell::new(Firmware::new(
            config,
            reqq.clone(),
            rspq.clone(),
        )));
        let hw = MockHw { fw: fw.clone() };
        Self {
            fw,
            hw: Some(hw),
            reqq,
            rspq,
            config,
        }
    }

    pub fn hba<'m>(&mut self) -> Hba<'m, MockHw, SharedMem> {
        Hba::new(
            self.hw.take().unwrap(),
            self.reqq.clone(),
            self.rspq.clone(),
            self.config,
        )
        .unwrap()
    }
}

/// Runs the interrupt handler until the simulated adapter goes quiet.
pub fn service(hba: &mut Hba<'_, MockHw, SharedMem>) {
    for _ in 0..64 {
        if hba.hw().firmware().intr.is_empty() {
            return;
        }
        hba.isr();
    }
    panic!("adapter never went quiet");
}

/// Attaches and enables, answering everything; ends with modules started.
pub fn bring_up(hba: &mut Hba<'_, MockHw, SharedMem>) {
    hba.attach().unwrap();
    hba.enable().unwrap();
    service(hba);
}

//
// Recording module and listener.
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Attach,
    Reconfigure(ResourceCounts),
    Start,
    Stop,
    IocDisable,
    Handle { class: u8, id: u8, body: Vec<u8> },
    Resume(u32),
    SendFailed(u32),
}

pub type Log = Rc<RefCell<Vec<(&'static str, Call)>>>;

pub fn log() -> Log {
    Rc::new(RefCell::new(vec![]))
}

/// A module that records every callback and, on `resume`, sends the request
/// it parked.
pub struct Recorder {
    pub name: &'static str,
    pub log: Log,
    pub class: MsgClass,
    pub meminfo: usize,
    /// Requests to send from `start`, by argument.
    pub on_start: Vec<u32>,
    /// Record `resume` without sending anything.
    pub quiet_resume: bool,
}

impl Recorder {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: log.clone(),
            class: MsgClass::Port,
            meminfo: 0,
            on_start: vec![],
            quiet_resume: false,
        }
    }

    fn record(&self, call: Call) {
        self.log.borrow_mut().push((self.name, call));
    }
}

/// The body the simulated firmware expects: a length byte then data.
pub fn payload(arg: u32) -> Vec<u8> {
    let mut p = vec![4];
    p.extend_from_slice(&arg.to_le_bytes());
    p
}

impl FeatureModule for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn meminfo(&self, _config: &HbaConfig) -> usize {
        self.meminfo
    }

    fn attach(&mut self, _config: &HbaConfig) {
        self.record(Call::Attach);
    }

    fn reconfigure(&mut self, granted: &ResourceCounts) {
        self.record(Call::Reconfigure(*granted));
    }

    fn start(&mut self, tx: &mut Tx<'_>) {
        self.record(Call::Start);
        for &arg in &self.on_start {
            if tx.send(self.class, 0x10, &payload(arg)).is_err() {
                self.record(Call::SendFailed(arg));
            }
        }
    }

    fn stop(&mut self) {
        self.record(Call::Stop);
    }

    fn iocdisable(&mut self) {
        self.record(Call::IocDisable);
    }

    fn handle(&mut self, _tx: &mut Tx<'_>, rsp: &Response<'_>) {
        let len = usize::from(rsp.body[0]);
        self.record(Call::Handle {
            class: rsp.header.class,
            id: rsp.header.id,
            body: rsp.body[1..1 + len].to_vec(),
        });
    }

    fn resume(&mut self, tx: &mut Tx<'_>, arg: u32) {
        self.record(Call::Resume(arg));
        if self.quiet_resume {
            return;
        }
        if tx.send(self.class, 0x10, &payload(arg)).is_err() {
            self.record(Call::SendFailed(arg));
        }
    }
}

#[derive(Default)]
pub struct Listener {
    pub events: Rc<RefCell<Vec<IocEvent>>>,
    pub completions: Rc<RefCell<Vec<Completion>>>,
}

impl Listener {
    pub fn share(&self) -> Self {
        Self {
            events: self.events.clone(),
            completions: self.completions.clone(),
        }
    }

    pub fn events(&self) -> Vec<IocEvent> {
        self.events.borrow().clone()
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.completions.borrow().clone()
    }
}

impl HbaEvents for Listener {
    fn ioc_event(&mut self, event: IocEvent) {
        self.events.borrow_mut().push(event);
    }

    fn completion(&mut self, completion: Completion) {
        self.completions.borrow_mut().push(completion);
    }
}

#[derive(Default)]
pub struct Store {
    pub reads: Rc<RefCell<u32>>,
    pub written: Rc<RefCell<Option<Vec<u8>>>>,
}

impl Store {
    pub fn share(&self) -> Self {
        Self {
            reads: self.reads.clone(),
            written: self.written.clone(),
        }
    }
}

impl PersistStore for Store {
    fn begin_read(&mut self) {
        *self.reads.borrow_mut() += 1;
    }

    fn begin_write(&mut self, data: &[u8]) {
        *self.written.borrow_mut() = Some(data.to_vec());
    }
}
