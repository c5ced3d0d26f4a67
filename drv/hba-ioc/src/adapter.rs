// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use enum_map::Enum;
use hba_msgs::ioc::{
    DebugDumpReq, DebugDumpRsp, EnableReq, GetAttrReq, IocReply, IocRequest,
};
use hba_msgs::iocfc::{
    CfgReq, CfgRsp, IntrAttr, IocfcReply, IocfcRequest, ResourceCounts,
    RingDesc,
};
use hba_msgs::{
    FwAttributes, FwStatus, FwVersion, MboxFrame, Message, MsgClass,
    MsgHeader, MAX_SLOT_SIZE, MBOX_WORDS,
};
use heapless::Deque;
use hubpack::SerializedSize;
use msgq::{BadIndex, Ring, SlotMemory};
use multitimer::{Multitimer, Repeat};
use ringbuf::{ringbuf_entry, Ringbuf};

use crate::config::HbaConfig;
use crate::dispatch::{DispatchTable, Route};
use crate::error::{
    ConfigError, HbaError, MboxError, RegistryError, SendError, StateError,
};
use crate::hw::{HbaHw, IntrStatus};
use crate::ioc::{self, Generation, IocAction, IocInput, IocNotice, IocState};
use crate::iocfc::{self, IocfcAction, IocfcInput, IocfcState};
use crate::mbox::{Mailbox, MboxOutcome, Outstanding};
use crate::module::{
    Completion, FeatureModule, HbaEvents, IocEvent, ModuleId, Op, OpError,
    Registry, Response, Tx,
};
use crate::persist::{PersistStore, PersistedConfig};
use crate::reqq::{Outbound, ReqQueue, RequestPort, Space};
use crate::stats::{self, IocStats};
use crate::trace::{Trace, TRACE_DEPTH};
use crate::Transition;

/// Firmware major version this driver speaks.
pub const FW_MAJOR_SUPPORTED: u8 = 3;

pub const MAX_LISTENERS: usize = 4;

/// Internal events posted by one state machine for another, or for itself.
const EVENT_DEPTH: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
enum HbaTimer {
    Heartbeat,
    IocTimeout,
    SemRetry,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Event {
    Ioc(IocInput),
    Iocfc(IocfcInput),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugCmd {
    Sync,
    Dump { offset: u32 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugReply {
    Sync,
    Dump(DebugDumpRsp),
}

struct IocContext {
    state: IocState,
    generation: Generation,
    sem_held: bool,
    fw_version: Option<FwVersion>,
    attributes: Option<FwAttributes>,
    hb_last: u32,
}

struct IocfcContext {
    state: IocfcState,
    /// The asynchronous operation a completion is owed for.
    pending: Option<Op>,
    /// Start the modules as soon as negotiation finishes.
    auto_start: bool,
    modules_started: bool,
    /// A Cfg request is on the ring and unanswered.
    cfg_outstanding: bool,
    granted: ResourceCounts,
    intr: IntrAttr,
}

/// Builds the sending view handed to module callbacks. A macro rather than a
/// method so the borrows stay per-field and the module registry remains free
/// for the caller.
macro_rules! outbound {
    ($hba:ident) => {
        Outbound {
            hw: &mut $hba.hw,
            reqq: &mut $hba.reqq,
            dispatch: &$hba.dispatch,
            generation: $hba.ioc.generation,
            admit: $hba.iocfc.state == IocfcState::Operational,
            stats: &mut $hba.stats,
            trace: &mut $hba.trace,
        }
    };
}

/// One adapter function: its IOC and IOCFC state machines, its rings, and
/// the modules riding on it.
///
/// Nothing here blocks or takes locks. The platform calls [`Hba::isr`] when
/// the adapter interrupts and [`Hba::tick`] when [`Hba::next_deadline`]
/// passes; all callbacks into modules and listeners happen from inside those
/// calls or the public operations, one at a time.
pub struct Hba<'m, H, M> {
    hw: H,
    config: HbaConfig,
    now: u64,
    ioc: IocContext,
    iocfc: IocfcContext,
    mbox: Mailbox,
    reqq: ReqQueue<M>,
    rspq: Ring<M>,
    dispatch: DispatchTable,
    modules: Registry<'m>,
    listeners: heapless::Vec<&'m mut dyn HbaEvents, MAX_LISTENERS>,
    persist: Option<&'m mut dyn PersistStore>,
    timers: Multitimer<HbaTimer>,
    events: Deque<Event, EVENT_DEPTH>,
    stats: IocStats,
    trace: Ringbuf<Trace, TRACE_DEPTH>,
    last_debug: Option<DebugReply>,
}

impl<'m, H: HbaHw, M: SlotMemory> Hba<'m, H, M> {
    pub fn new(
        hw: H,
        reqq_mem: M,
        rspq_mem: M,
        config: HbaConfig,
    ) -> Result<Self, HbaError> {
        config.validate()?;
        let reqq = Ring::new(reqq_mem, config.reqq_geometry()?)
            .map_err(ConfigError::from)?;
        let rspq = Ring::new(rspq_mem, config.rspq_geometry()?)
            .map_err(ConfigError::from)?;
        Ok(Self {
            hw,
            config,
            now: 0,
            ioc: IocContext {
                state: IocState::Uninit,
                generation: Generation::default(),
                sem_held: false,
                fw_version: None,
                attributes: None,
                hb_last: 0,
            },
            iocfc: IocfcContext {
                state: IocfcState::Stopped,
                pending: None,
                auto_start: false,
                modules_started: false,
                cfg_outstanding: false,
                granted: ResourceCounts::default(),
                intr: config.intr,
            },
            mbox: Mailbox::new(),
            reqq: ReqQueue::new(reqq),
            rspq,
            dispatch: DispatchTable::new(),
            modules: Registry::new(),
            listeners: heapless::Vec::new(),
            persist: None,
            timers: Multitimer::new(),
            events: Deque::new(),
            stats: IocStats::default(),
            trace: Ringbuf::new(Trace::None),
            last_debug: None,
        })
    }

    //
    // Registration
    //

    /// Adds a module. Modules are attached, started, stopped and notified in
    /// the order they were registered, and can only be added before
    /// [`Hba::attach`].
    pub fn register_module(
        &mut self,
        module: &'m mut dyn FeatureModule,
    ) -> Result<ModuleId, RegistryError> {
        if self.ioc.state != IocState::Uninit {
            return Err(RegistryError::AlreadyAttached);
        }
        self.modules.register(module)
    }

    /// Routes responses of `class` to `owner`.
    pub fn register_message_class(
        &mut self,
        class: MsgClass,
        owner: ModuleId,
    ) -> Result<(), RegistryError> {
        if !self.modules.contains(owner) {
            return Err(RegistryError::UnknownModule(owner));
        }
        self.dispatch.register(class, owner)
    }

    pub fn on_ioc_event(
        &mut self,
        listener: &'m mut dyn HbaEvents,
    ) -> Result<(), RegistryError> {
        self.listeners
            .push(listener)
            .map_err(|_| RegistryError::Full)
    }

    pub fn set_persist_store(&mut self, store: &'m mut dyn PersistStore) {
        self.persist = Some(store);
    }

    /// DMA-able memory the registered modules need, in bytes.
    pub fn meminfo(&self) -> usize {
        self.modules.iter().map(|m| m.meminfo(&self.config)).sum()
    }

    //
    // Lifecycle
    //

    pub fn attach(&mut self) -> Result<(), StateError> {
        if self.ioc.state != IocState::Uninit {
            return Err(StateError::Ioc(self.ioc.state));
        }
        for (_, m) in self.modules.iter_mut() {
            m.attach(&self.config);
        }
        self.post(Event::Ioc(IocInput::Attach));
        self.run();
        Ok(())
    }

    /// Tears everything down and returns the adapter to its unattached
    /// state. Modules that were started are stopped; a pending operation
    /// completes as superseded.
    pub fn detach(&mut self) {
        if self.ioc.state == IocState::Uninit {
            return;
        }
        self.stop_modules();
        self.close_rings();
        if let Some(op) = self.iocfc.pending.take() {
            self.supersede(op);
        }
        self.iocfc.state = IocfcState::Stopped;
        self.iocfc.auto_start = false;
        self.events.clear();
        self.post(Event::Ioc(IocInput::Detach));
        self.run();
    }

    /// Brings the controller up as far as negotiated-but-not-started.
    /// Completes with [`Op::Init`].
    pub fn init(&mut self) -> Result<(), StateError> {
        self.request(Op::Init, IocfcInput::Init)
    }

    /// Starts the modules after a successful init.
    pub fn start(&mut self) -> Result<(), StateError> {
        if iocfc::next(self.iocfc.state, IocfcInput::Start)
            == Transition::Reject
        {
            return Err(StateError::Iocfc(self.iocfc.state));
        }
        self.post(Event::Iocfc(IocfcInput::Start));
        self.run();
        Ok(())
    }

    /// Saves settings, stops the modules and the firmware. Completes with
    /// [`Op::Stop`].
    pub fn stop(&mut self) -> Result<(), StateError> {
        self.request(Op::Stop, IocfcInput::Stop)
    }

    /// Brings the controller all the way up, from stopped or disabled.
    /// Completes with [`Op::Enable`].
    pub fn enable(&mut self) -> Result<(), StateError> {
        self.request(Op::Enable, IocfcInput::Enable)
    }

    /// Quiesces the controller and the firmware. Disabling an adapter that
    /// is already disabled, or on its way there, is not an error. Completes
    /// with [`Op::Disable`].
    pub fn disable(&mut self) -> Result<(), StateError> {
        self.request(Op::Disable, IocfcInput::Disable)
    }

    fn request(
        &mut self,
        op: Op,
        input: IocfcInput,
    ) -> Result<(), StateError> {
        if self.ioc.state == IocState::Uninit {
            return Err(StateError::Ioc(IocState::Uninit));
        }
        let from = self.iocfc.state;
        match iocfc::next(from, input) {
            Transition::Reject => {
                ringbuf_entry!(
                    self.trace,
                    Trace::IocfcRejected { state: from, input }
                );
                Err(StateError::Iocfc(from))
            }
            Transition::Stay => {
                // Already there, or already on the way.
                if self.iocfc.pending != Some(op) {
                    self.notify_completion(op, Ok(()));
                }
                Ok(())
            }
            Transition::Goto(_) => {
                if let Some(old) = self.iocfc.pending.replace(op) {
                    self.supersede(old);
                }
                self.iocfc.auto_start = op == Op::Enable
                    && matches!(
                        from,
                        IocfcState::Stopped | IocfcState::InitFailed
                    );
                self.post(Event::Iocfc(input));
                self.run();
                Ok(())
            }
        }
    }

    /// Answers a `begin_read` or `begin_write` on the persist store. For a
    /// read, `data` is the saved record, or `None` if there is none.
    pub fn persist_done(
        &mut self,
        data: Option<&[u8]>,
    ) -> Result<(), StateError> {
        match self.iocfc.state {
            IocfcState::ReadPersistedConfig => {
                if let Some(raw) = data {
                    match PersistedConfig::decode(raw) {
                        Some(rec) => {
                            self.iocfc.intr = rec.intr;
                            ringbuf_entry!(self.trace, Trace::PersistLoaded);
                        }
                        None => {
                            ringbuf_entry!(self.trace, Trace::PersistInvalid)
                        }
                    }
                }
            }
            IocfcState::WritePersistedConfig => {}
            _ => return Err(StateError::NoPersistOp),
        }
        self.post(Event::Iocfc(IocfcInput::PersistDone));
        self.run();
        Ok(())
    }

    //
    // Traffic
    //

    /// Puts one request on the request ring. `payload` follows the header in
    /// the slot; the header's token is the current generation.
    pub fn send_request(
        &mut self,
        class: MsgClass,
        id: u8,
        payload: &[u8],
    ) -> Result<(), SendError> {
        outbound!(self).send(class, id, payload)
    }

    /// Asks for a request slot on behalf of `owner`.
    ///
    /// Returns `Available` only if a slot is free and nobody is already
    /// waiting; otherwise parks `(owner, arg)` at the back of the queue and
    /// returns `Queued`. Each queued waiter is resumed exactly once, in
    /// arrival order, as slots free, or is dropped if the adapter goes down
    /// first.
    pub fn wait_for_space(
        &mut self,
        owner: ModuleId,
        arg: u32,
    ) -> Result<Space, SendError> {
        outbound!(self).wait_for_space(owner, arg)
    }

    /// Changes interrupt coalescing on a running controller. The change
    /// takes effect when the firmware acknowledges it.
    pub fn set_intr_attr(&mut self, intr: IntrAttr) -> Result<(), HbaError> {
        if self.iocfc.state != IocfcState::Operational {
            return Err(StateError::Iocfc(self.iocfc.state).into());
        }
        self.send_iocfc(&IocfcRequest::SetIntr(intr))?;
        Ok(())
    }

    /// Sends a firmware debug command through the mailbox. The reply shows
    /// up in [`Hba::last_debug_reply`].
    pub fn fw_debug(&mut self, cmd: DebugCmd) -> Result<(), HbaError> {
        if self.mbox.is_busy() {
            return Err(MboxError::Busy.into());
        }
        if self.ioc.state != IocState::Operational {
            return Err(StateError::Ioc(self.ioc.state).into());
        }
        let req = match cmd {
            DebugCmd::Sync => IocRequest::DebugSync,
            DebugCmd::Dump { offset } => {
                IocRequest::DebugDump(DebugDumpReq { offset })
            }
        };
        self.mbox.send(&mut self.hw, &req, self.ioc.generation)?;
        ringbuf_entry!(self.trace, Trace::MboxSent(req.id()));
        self.last_debug = None;
        self.arm_ioc_timer();
        Ok(())
    }

    //
    // Events from the platform
    //

    /// Services the adapter interrupt.
    pub fn isr(&mut self) {
        let status = self.hw.take_intr();

        if status.contains(IntrStatus::ERROR) {
            stats::bump(&mut self.stats.hw_errors);
            ringbuf_entry!(self.trace, Trace::HwError);
            self.post(Event::Ioc(IocInput::HwError));
            self.run();
        }
        if status.contains(IntrStatus::MBOX) {
            while let Some(words) = self.hw.mbox_recv() {
                self.mbox_isr(words);
                self.run();
            }
        }
        if status.contains(IntrStatus::REQQ) {
            self.reqq_isr();
        }
        if status.contains(IntrStatus::RSPQ) {
            self.rspq_isr();
        }
        self.run();
    }

    /// Advances time to `now`, in milliseconds, and handles any timers that
    /// expired.
    pub fn tick(&mut self, now: u64) {
        self.now = now;
        self.timers.poll(now);
        let fired: heapless::Vec<HbaTimer, 3> =
            self.timers.iter_fired().collect();
        for t in fired {
            match t {
                HbaTimer::Heartbeat => self.heartbeat_check(),
                HbaTimer::IocTimeout => self.ioc_timeout(),
                HbaTimer::SemRetry => self.sem_retry(),
            }
            self.run();
        }
    }

    /// When [`Hba::tick`] next needs to be called.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    //
    // Inspection
    //

    pub fn ioc_state(&self) -> IocState {
        self.ioc.state
    }

    pub fn iocfc_state(&self) -> IocfcState {
        self.iocfc.state
    }

    pub fn generation(&self) -> Generation {
        self.ioc.generation
    }

    pub fn fw_version(&self) -> Option<FwVersion> {
        self.ioc.fw_version
    }

    pub fn fw_attributes(&self) -> Option<&FwAttributes> {
        self.ioc.attributes.as_ref()
    }

    /// Resources granted in the last successful negotiation.
    pub fn granted(&self) -> &ResourceCounts {
        &self.iocfc.granted
    }

    pub fn intr_attr(&self) -> IntrAttr {
        self.iocfc.intr
    }

    pub fn config(&self) -> &HbaConfig {
        &self.config
    }

    pub fn stats(&self) -> &IocStats {
        &self.stats
    }

    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_DEPTH> {
        &self.trace
    }

    pub fn mailbox_outstanding(&self) -> Option<Outstanding> {
        self.mbox.outstanding()
    }

    pub fn last_debug_reply(&self) -> Option<DebugReply> {
        self.last_debug
    }

    pub fn free_slots(&self) -> u16 {
        self.reqq.ring.free()
    }

    pub fn queued_waiters(&self) -> usize {
        self.reqq.waiters.len()
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    //
    // Event pump
    //

    fn post(&mut self, event: Event) {
        if self.events.push_back(event).is_err() {
            ringbuf_entry!(self.trace, Trace::EventOverflow);
        }
    }

    fn run(&mut self) {
        while let Some(event) = self.events.pop_front() {
            match event {
                Event::Ioc(input) => self.ioc_step(input),
                Event::Iocfc(input) => self.iocfc_step(input),
            }
        }
    }

    fn ioc_step(&mut self, input: IocInput) {
        let from = self.ioc.state;
        match ioc::next(from, input) {
            Transition::Goto(to) => {
                ringbuf_entry!(self.trace, Trace::Ioc { from, to, input });
                self.ioc.state = to;
                for &action in ioc::entry(to) {
                    self.ioc_action(action);
                }
            }
            Transition::Stay => {}
            Transition::Reject => {
                stats::bump(&mut self.stats.illegal_events);
                ringbuf_entry!(
                    self.trace,
                    Trace::IocRejected { state: from, input }
                );
            }
        }
    }

    fn iocfc_step(&mut self, input: IocfcInput) {
        let from = self.iocfc.state;
        match iocfc::next(from, input) {
            Transition::Goto(to) => {
                ringbuf_entry!(self.trace, Trace::Iocfc { from, to, input });
                self.iocfc.state = to;
                for &action in iocfc::entry(to) {
                    self.iocfc_action(action);
                }
            }
            Transition::Stay => {}
            Transition::Reject => {
                stats::bump(&mut self.stats.illegal_events);
                ringbuf_entry!(
                    self.trace,
                    Trace::IocfcRejected { state: from, input }
                );
            }
        }
    }

    fn ioc_action(&mut self, action: IocAction) {
        match action {
            IocAction::StopTimers => self.timers.clear_all(),
            IocAction::StopHeartbeat => {
                self.timers.clear_timer(HbaTimer::Heartbeat);
            }
            IocAction::StopIocTimer => {
                self.timers.clear_timer(HbaTimer::IocTimeout);
            }
            IocAction::StartHeartbeat => {
                self.ioc.hb_last = self.hw.heartbeat();
                let period = self.config.heartbeat_ms;
                self.timers.set_timer(
                    HbaTimer::Heartbeat,
                    self.now.saturating_add(period),
                    Some(Repeat::AfterWake(period)),
                );
            }
            IocAction::ArmIocTimer => self.arm_ioc_timer(),
            IocAction::ArmSemRetry => self.arm_sem_retry(),
            IocAction::TrySemaphore => {
                if self.acquire_semaphore() {
                    self.post(Event::Ioc(IocInput::SemGranted));
                } else {
                    self.arm_sem_retry();
                }
            }
            IocAction::ReleaseSemaphore => {
                if core::mem::take(&mut self.ioc.sem_held) {
                    self.hw.release_semaphore();
                }
            }
            IocAction::AbandonMailbox => {
                self.mbox.abandon();
            }
            IocAction::FlushWaiters => {
                let n = self.reqq.waiters.clear();
                self.count_flushed(n);
            }
            IocAction::BumpGeneration => {
                self.ioc.generation = self.ioc.generation.next();
                self.ioc.fw_version = None;
                self.ioc.attributes = None;
                stats::bump(&mut self.stats.enable_cycles);
                ringbuf_entry!(
                    self.trace,
                    Trace::NewGeneration(self.ioc.generation)
                );
            }
            IocAction::ResetHw => self.hw.reset(),
            IocAction::Halt => self.hw.halt(),
            IocAction::SendEnable => {
                self.ioc_mbox(IocRequest::Enable(EnableReq {
                    host_time_ms: self.now,
                }));
            }
            IocAction::SendGetAttr => {
                let attr_addr = self.hw.attr_bus_addr();
                self.ioc_mbox(IocRequest::GetAttr(GetAttrReq { attr_addr }));
            }
            IocAction::SendDisable => self.ioc_mbox(IocRequest::Disable),
            IocAction::NotifyDependents => {
                for (_, m) in self.modules.iter_mut() {
                    m.iocdisable();
                }
            }
            IocAction::Report(notice) => self.ioc_report(notice),
        }
    }

    fn ioc_report(&mut self, notice: IocNotice) {
        let (event, input) = match notice {
            IocNotice::Enabled => {
                (Some(IocEvent::Operational), IocfcInput::IocEnabled)
            }
            IocNotice::EnableFailed => {
                stats::bump(&mut self.stats.init_failures);
                (None, IocfcInput::IocFailed)
            }
            IocNotice::FwMismatch => {
                stats::bump(&mut self.stats.fw_mismatches);
                (Some(IocEvent::FwMismatch), IocfcInput::IocFailed)
            }
            IocNotice::Disabled => {
                (Some(IocEvent::Disabled), IocfcInput::IocDisabled)
            }
            IocNotice::Failed => {
                (Some(IocEvent::Failed), IocfcInput::IocFailed)
            }
        };
        if let Some(event) = event {
            for l in self.listeners.iter_mut() {
                l.ioc_event(event);
            }
        }
        self.post(Event::Iocfc(input));
    }

    fn iocfc_action(&mut self, action: IocfcAction) {
        match action {
            IocfcAction::EnableIoc => {
                if self.ioc.state == IocState::Operational {
                    self.post(Event::Iocfc(IocfcInput::IocEnabled));
                } else {
                    let input = self.enable_input();
                    self.post(Event::Ioc(input));
                }
            }
            IocfcAction::DisableIoc => {
                if self.ioc.state == IocState::Disabled {
                    self.post(Event::Iocfc(IocfcInput::IocDisabled));
                } else {
                    self.post(Event::Ioc(IocInput::Disable));
                }
            }
            IocfcAction::ReadPersisted => match self.persist.as_deref_mut() {
                Some(store) => store.begin_read(),
                None => self.post(Event::Iocfc(IocfcInput::PersistDone)),
            },
            IocfcAction::WritePersisted => self.write_persisted(),
            IocfcAction::OpenRings => {
                self.reqq.open();
                self.rspq.reset();
            }
            IocfcAction::CloseRings => self.close_rings(),
            IocfcAction::SendCfg => self.send_cfg(),
            IocfcAction::StartModules => self.start_modules(),
            IocfcAction::StopModules => self.stop_modules(),
            IocfcAction::Complete(op) => {
                if self.iocfc.pending == Some(op) {
                    self.iocfc.pending = None;
                    self.notify_completion(op, Ok(()));
                }
            }
            IocfcAction::FailPending => {
                self.iocfc.auto_start = false;
                if let Some(op) = self.iocfc.pending.take() {
                    self.notify_completion(op, Err(OpError::Failed));
                }
            }
            IocfcAction::AutoStart => {
                if core::mem::take(&mut self.iocfc.auto_start) {
                    self.post(Event::Iocfc(IocfcInput::Start));
                }
            }
        }
    }

    //
    // Helpers
    //

    fn acquire_semaphore(&mut self) -> bool {
        if !self.ioc.sem_held {
            self.ioc.sem_held = self.hw.try_acquire_semaphore();
        }
        self.ioc.sem_held
    }

    /// The semaphore is only tried up front from `Reset`; elsewhere the IOC
    /// goes through `Enabling` and tries it there.
    fn enable_input(&mut self) -> IocInput {
        if self.ioc.state == IocState::Reset && self.acquire_semaphore() {
            IocInput::EnableGranted
        } else {
            IocInput::Enable
        }
    }

    fn arm_ioc_timer(&mut self) {
        self.timers.set_timer(
            HbaTimer::IocTimeout,
            self.now.saturating_add(self.config.ioc_timeout_ms),
            None,
        );
    }

    fn arm_sem_retry(&mut self) {
        ringbuf_entry!(self.trace, Trace::SemaphoreBusy);
        self.timers.set_timer(
            HbaTimer::SemRetry,
            self.now.saturating_add(self.config.sem_retry_ms),
            None,
        );
    }

    fn ioc_mbox(&mut self, req: IocRequest) {
        match self.mbox.send(&mut self.hw, &req, self.ioc.generation) {
            Ok(()) => ringbuf_entry!(self.trace, Trace::MboxSent(req.id())),
            Err(_) => {
                ringbuf_entry!(self.trace, Trace::MboxSendFailed(req.id()));
                self.post(Event::Ioc(IocInput::MboxTimeout));
            }
        }
    }

    fn count_flushed(&mut self, n: usize) {
        if n > 0 {
            stats::add(&mut self.stats.waiters_flushed, n);
            ringbuf_entry!(self.trace, Trace::WaitersFlushed(n as u16));
        }
    }

    fn close_rings(&mut self) {
        self.iocfc.cfg_outstanding = false;
        let n = self.reqq.close();
        self.count_flushed(n);
    }

    fn supersede(&mut self, op: Op) {
        ringbuf_entry!(self.trace, Trace::Superseded(op));
        self.notify_completion(op, Err(OpError::Superseded));
    }

    fn notify_completion(&mut self, op: Op, result: Result<(), OpError>) {
        if result.is_ok() {
            ringbuf_entry!(self.trace, Trace::Completed(op));
        }
        let completion = Completion { op, result };
        for l in self.listeners.iter_mut() {
            l.completion(completion);
        }
    }

    fn start_modules(&mut self) {
        self.iocfc.modules_started = true;
        for (id, m) in self.modules.iter_mut() {
            let mut port = outbound!(self);
            let mut tx = Tx::new(&mut port, id, &self.iocfc.granted);
            m.start(&mut tx);
        }
    }

    fn stop_modules(&mut self) {
        if core::mem::take(&mut self.iocfc.modules_started) {
            for (_, m) in self.modules.iter_mut() {
                m.stop();
            }
        }
    }

    fn write_persisted(&mut self) {
        let mut buf = [0u8; PersistedConfig::MAX_SIZE];
        let Some(n) = PersistedConfig::new(self.iocfc.intr).encode(&mut buf)
        else {
            self.post(Event::Iocfc(IocfcInput::PersistDone));
            return;
        };
        match self.persist.as_deref_mut() {
            Some(store) => {
                ringbuf_entry!(self.trace, Trace::PersistWrite);
                store.begin_write(&buf[..n]);
            }
            None => self.post(Event::Iocfc(IocfcInput::PersistDone)),
        }
    }

    fn send_iocfc(&mut self, req: &IocfcRequest) -> Result<(), SendError> {
        if !self.reqq.is_open() {
            return Err(SendError::NotOperational);
        }
        let slot = self.reqq.ring.geometry().slot_size();
        let mut buf = [0u8; MAX_SLOT_SIZE];
        let n = hba_msgs::encode(
            req,
            self.ioc.generation.raw(),
            &mut buf[..slot],
        )
        .map_err(SendError::Encode)?;
        self.reqq.submit(&mut self.hw, &buf[..n])?;
        Ok(())
    }

    fn send_cfg(&mut self) {
        let req = IocfcRequest::Cfg(CfgReq {
            reqq: RingDesc {
                base: self.reqq.ring.memory().bus_addr(),
                depth: self.config.reqq_depth,
                slot_size: self.config.reqq_slot_size,
            },
            rspq: RingDesc {
                base: self.rspq.memory().bus_addr(),
                depth: self.config.rspq_depth,
                slot_size: self.config.rspq_slot_size,
            },
            requested: self.config.resources,
            intr: self.iocfc.intr,
        });
        if self.send_iocfc(&req).is_err() {
            ringbuf_entry!(self.trace, Trace::CfgSendFailed);
            self.post(Event::Iocfc(IocfcInput::CfgFailed));
        } else {
            self.iocfc.cfg_outstanding = true;
        }
    }

    fn heartbeat_check(&mut self) {
        if self.ioc.state != IocState::Operational {
            self.timers.clear_timer(HbaTimer::Heartbeat);
            return;
        }
        let hb = self.hw.heartbeat();
        if hb == self.ioc.hb_last {
            stats::bump(&mut self.stats.hb_failures);
            ringbuf_entry!(self.trace, Trace::HeartbeatMiss(hb));
            self.post(Event::Ioc(IocInput::HbLost));
        } else {
            self.ioc.hb_last = hb;
        }
    }

    fn ioc_timeout(&mut self) {
        if let Some(out) = self.mbox.abandon() {
            stats::bump(&mut self.stats.mbox_timeouts);
            ringbuf_entry!(self.trace, Trace::MboxTimeout(out.id));
            self.post(Event::Ioc(IocInput::MboxTimeout));
        }
    }

    fn sem_retry(&mut self) {
        if !matches!(
            self.ioc.state,
            IocState::SemaphoreWait | IocState::Enabling
        ) {
            return;
        }
        if self.acquire_semaphore() {
            self.post(Event::Ioc(IocInput::SemGranted));
        } else {
            self.arm_sem_retry();
        }
    }

    //
    // Mailbox
    //

    fn mbox_isr(&mut self, words: [u32; MBOX_WORDS]) {
        let frame = MboxFrame::from_words(words);
        let current = self.ioc.generation;
        match self.mbox.complete(&frame, current) {
            MboxOutcome::Reply(reply) => {
                self.timers.clear_timer(HbaTimer::IocTimeout);
                ringbuf_entry!(self.trace, Trace::MboxReply(reply.id()));
                self.ioc_reply(reply);
            }
            MboxOutcome::Stale { token } => {
                stats::bump(&mut self.stats.mbox_stale);
                ringbuf_entry!(self.trace, Trace::MboxStale { token, current });
            }
            MboxOutcome::Unexpected { id } => {
                ringbuf_entry!(self.trace, Trace::MboxUnexpected(id));
            }
            MboxOutcome::WrongClass(class) => {
                ringbuf_entry!(self.trace, Trace::MboxWrongClass(class));
            }
            MboxOutcome::Undecodable => {
                ringbuf_entry!(self.trace, Trace::MboxUndecodable);
            }
        }
    }

    fn ioc_reply(&mut self, reply: IocReply) {
        let input = match reply {
            IocReply::Enable(rsp) => {
                if rsp.status != FwStatus::Ok {
                    ringbuf_entry!(self.trace, Trace::FwEnableFailed);
                    IocInput::FwEnableFailed
                } else {
                    ringbuf_entry!(
                        self.trace,
                        Trace::FwVersion(rsp.fw_version)
                    );
                    self.ioc.fw_version = Some(rsp.fw_version);
                    if rsp.fw_version.major == FW_MAJOR_SUPPORTED {
                        IocInput::FwEnabled
                    } else {
                        IocInput::FwMismatch
                    }
                }
            }
            IocReply::GetAttr(rsp) => self.check_attributes(rsp.status),
            IocReply::Disable(_) => IocInput::FwDisabled,
            IocReply::DebugSync => {
                self.last_debug = Some(DebugReply::Sync);
                return;
            }
            IocReply::DebugDump(rsp) => {
                self.last_debug = Some(DebugReply::Dump(rsp));
                return;
            }
        };
        self.post(Event::Ioc(input));
    }

    fn check_attributes(&mut self, status: FwStatus) -> IocInput {
        if status == FwStatus::Ok {
            let mut raw = [0u8; FwAttributes::LEN];
            self.hw.read_attr(&mut raw);
            if let Ok(attr) = FwAttributes::parse(&raw) {
                if attr.signature_ok()
                    && Some(attr.version()) == self.ioc.fw_version
                {
                    self.ioc.attributes = Some(attr);
                    return IocInput::AttrOk;
                }
            }
        }
        ringbuf_entry!(self.trace, Trace::AttrInvalid);
        IocInput::AttrInvalid
    }

    //
    // Rings
    //

    fn reqq_isr(&mut self) {
        if !self.reqq.is_open() {
            return;
        }
        let ci = self.hw.reqq_consumer_index();
        match self.reqq.ring.peer_consumed(ci) {
            Ok(_) => self.resume_waiters(),
            Err(BadIndex(ci)) => {
                ringbuf_entry!(self.trace, Trace::BadPeerIndex(ci));
            }
        }
    }

    /// Resumes parked senders, oldest first, until the ring is full again
    /// or everyone queued on entry has had a turn. A waiter that doesn't
    /// produce leaves its slot to the next one.
    fn resume_waiters(&mut self) {
        let mut turns = self.reqq.waiters.len();
        while turns > 0 && !self.reqq.ring.is_full() {
            let Some(w) = self.reqq.waiters.pop() else {
                break;
            };
            turns -= 1;
            stats::bump(&mut self.stats.waiters_resumed);
            ringbuf_entry!(
                self.trace,
                Trace::WaiterResumed {
                    owner: w.owner,
                    arg: w.arg
                }
            );
            if let Some(m) = self.modules.get_mut(w.owner) {
                let mut port = outbound!(self);
                let mut tx = Tx::new(&mut port, w.owner, &self.iocfc.granted);
                m.resume(&mut tx, w.arg);
            }
        }
    }

    fn rspq_isr(&mut self) {
        if !self.reqq.is_open() {
            return;
        }
        let pi = self.hw.rspq_producer_index();
        if self.rspq.peer_produced(pi) == 0 {
            return;
        }
        let slot = self.rspq.geometry().slot_size();
        let mut buf = [0u8; MAX_SLOT_SIZE];
        while self.rspq.consume(&mut buf[..slot]).is_some() {
            self.deliver(&buf[..slot]);
        }
        let ci = self.rspq.ack_consumed();
        self.hw.rspq_doorbell(ci);
    }

    fn deliver(&mut self, slot: &[u8]) {
        let Ok((header, body)) = hba_msgs::split(slot) else {
            ringbuf_entry!(self.trace, Trace::RspUndecodable);
            return;
        };
        let Some(class) = header.class() else {
            stats::bump(&mut self.stats.unknown_class);
            ringbuf_entry!(self.trace, Trace::UnknownClass(header.class));
            return;
        };
        let token = header.token();
        if token != self.ioc.generation.raw() {
            stats::bump(&mut self.stats.rsp_stale);
            ringbuf_entry!(self.trace, Trace::RspStale { class, token });
            return;
        }

        match self.dispatch.route(&header) {
            Route::Iocfc => self.iocfc_reply(&header, body),
            Route::Module(owner) => {
                if let Some(m) = self.modules.get_mut(owner) {
                    let mut port = outbound!(self);
                    let mut tx =
                        Tx::new(&mut port, owner, &self.iocfc.granted);
                    m.handle(&mut tx, &Response { header, body });
                }
            }
            Route::Unhandled(class) => {
                stats::bump(&mut self.stats.unhandled_class);
                ringbuf_entry!(self.trace, Trace::UnhandledClass(class));
            }
            Route::Misrouted => {
                stats::bump(&mut self.stats.unknown_class);
                ringbuf_entry!(self.trace, Trace::Misrouted);
            }
            Route::Unknown(raw) => {
                stats::bump(&mut self.stats.unknown_class);
                ringbuf_entry!(self.trace, Trace::UnknownClass(raw));
            }
        }
    }

    fn iocfc_reply(&mut self, header: &MsgHeader, body: &[u8]) {
        match IocfcReply::decode_body(header.id, body) {
            Ok(IocfcReply::Cfg(rsp)) => self.cfg_reply(rsp),
            Ok(IocfcReply::SetIntr(rsp)) => {
                if rsp.status == FwStatus::Ok {
                    self.iocfc.intr = rsp.intr;
                    ringbuf_entry!(self.trace, Trace::IntrAttr(rsp.intr));
                }
            }
            Err(_) => ringbuf_entry!(self.trace, Trace::RspUndecodable),
        }
    }

    fn cfg_reply(&mut self, rsp: CfgRsp) {
        let waiting = matches!(
            self.iocfc.state,
            IocfcState::InitCfgWait | IocfcState::CfgWait
        );
        // The state only moves in run(), so a second reply in the same
        // drain still sees a wait state.
        if !waiting || !core::mem::take(&mut self.iocfc.cfg_outstanding) {
            ringbuf_entry!(self.trace, Trace::CfgUnexpected);
            return;
        }
        if rsp.status != FwStatus::Ok
            || !rsp.granted.fits_within(&self.config.resources)
        {
            ringbuf_entry!(self.trace, Trace::CfgRejected(rsp.granted));
            self.post(Event::Iocfc(IocfcInput::CfgFailed));
            return;
        }
        self.iocfc.granted = rsp.granted;
        ringbuf_entry!(self.trace, Trace::CfgGranted(rsp.granted));
        for (_, m) in self.modules.iter_mut() {
            m.reconfigure(&rsp.granted);
        }
        self.post(Event::Iocfc(IocfcInput::CfgDone));
    }
}
