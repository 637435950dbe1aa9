//! The interpreter core: state machine, run loop and bus access paths.

mod execute;

use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use emu_core::{Bus, CacheEntry, CacheTable, DynamicClock, EmuTime, Scheduler};

use crate::flags::VF;
use crate::irq::IrqLines;
use crate::policy::CpuPolicy;
use crate::registers::{RegisterId, Registers};

/// Extra wait states inserted by the board.
///
/// A real MSX adds one wait cycle to every Z80 M1 cycle; some machines add
/// more, or a wait per memory access. The R800 runs without board waits
/// (its penalties are the page-break and alignment cycles of the policy).
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuConfig {
    /// Extra cycles per M1 (opcode fetch) cycle.
    pub m1_wait: u64,
    /// Extra cycles per memory access.
    pub mem_wait: u64,
}

impl CpuConfig {
    /// The standard MSX Z80 configuration: one wait per M1 cycle.
    #[must_use]
    pub const fn msx_z80() -> Self {
        Self {
            m1_wait: 1,
            mem_wait: 0,
        }
    }
}

/// Coarse execution state, visible to the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Halted,
    Breaked,
}

/// Cloneable handle for requesting an asynchronous loop exit.
///
/// The only part of the core that may be touched from another thread.
#[derive(Debug, Clone)]
pub struct ExitHandle(Arc<AtomicBool>);

impl ExitHandle {
    pub fn request_exit(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// What the interpreter decides to do at an instruction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingIrq {
    Nmi,
    Irq,
    None,
}

/// Outcome of one executed instruction: how far PC moves and what it cost.
///
/// Repeating block instructions report a negative length so that PC winds
/// back to the start of the instruction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Step {
    pub length: i8,
    pub cycles: u64,
}

impl Step {
    pub(crate) const fn new(length: i8, cycles: u64) -> Self {
        Self { length, cycles }
    }
}

/// The instruction interpreter, monomorphised per CPU flavour.
pub struct CpuCore<P: CpuPolicy> {
    pub(crate) regs: Registers,
    pub(crate) clock: DynamicClock,
    pub(crate) policy: P,
    pub(crate) cache: CacheTable,
    irq: Rc<IrqLines>,
    scheduler: Option<Scheduler>,
    config: CpuConfig,
    /// The burst loop runs while `clock.time() < limit`.
    /// `EmuTime::ZERO` means "yield after the current instruction".
    limit: EmuTime,
    /// Forces single-instruction execution (with interrupt checks) for the
    /// next N instructions.
    slow_instructions: u32,
    exit_flag: Arc<AtomicBool>,
    breaked: bool,
    breakpoints: BTreeSet<u16>,
    break_hook: Option<Box<dyn FnMut(u16)>>,
    freq: u64,
}

impl<P: CpuPolicy> CpuCore<P> {
    /// A core with its own cache table and interrupt lines.
    #[must_use]
    pub fn new(config: CpuConfig, time: EmuTime) -> Self {
        Self::with_shared(config, CacheTable::new(), IrqLines::new(), time)
    }

    /// A core sharing `cache` and `irq` with other components (the slot
    /// router invalidates the cache; a second core may share both when a
    /// machine can switch CPUs).
    #[must_use]
    pub fn with_shared(
        config: CpuConfig,
        cache: CacheTable,
        irq: Rc<IrqLines>,
        time: EmuTime,
    ) -> Self {
        let mut core = Self {
            regs: Registers::default(),
            clock: DynamicClock::new(P::CLOCK_FREQ, time),
            policy: P::default(),
            cache,
            irq,
            scheduler: None,
            config,
            limit: EmuTime::ZERO,
            slow_instructions: 0,
            exit_flag: Arc::new(AtomicBool::new(false)),
            breaked: false,
            breakpoints: BTreeSet::new(),
            break_hook: None,
            freq: P::CLOCK_FREQ,
        };
        core.reset(time);
        core
    }

    /// Attach the machine scheduler; the run loop then yields whenever a
    /// sync point becomes due.
    pub fn attach_scheduler(&mut self, scheduler: Scheduler) {
        self.scheduler = Some(scheduler);
    }

    /// Reset the CPU and advance its clock to `time` without executing.
    ///
    /// All other devices must have released their interrupt lines.
    pub fn reset(&mut self, time: EmuTime) {
        self.regs.reset();
        self.cache.invalidate_all();
        self.clock.advance_to(time);
        self.policy.force_page_break();
        assert_eq!(self.irq.irq_count(), 0, "IRQ sources must reset first");
        assert_eq!(self.irq.nmi_count(), 0, "NMI sources must reset first");
    }

    #[must_use]
    pub fn current_time(&self) -> EmuTime {
        self.clock.time()
    }

    /// Advance the clock without executing instructions.
    ///
    /// # Panics
    ///
    /// Panics (debug) when `time` lies in the past.
    pub fn warp(&mut self, time: EmuTime) {
        self.clock.advance_to(time);
    }

    /// Let the CPU wait until `time` (devices inserting delays).
    pub fn wait(&mut self, time: EmuTime) {
        assert!(time >= self.clock.time());
        self.clock.advance_to(time);
    }

    /// Burn `cycles` CPU cycles (devices inserting delays mid-access).
    pub fn wait_cycles(&mut self, cycles: u64) {
        self.clock.add(cycles);
    }

    /// Retune the clock; the current instant is preserved.
    pub fn set_freq(&mut self, freq: u64) {
        self.freq = freq;
        self.clock.set_freq(freq);
    }

    #[must_use]
    pub fn freq(&self) -> u64 {
        self.freq
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    #[must_use]
    pub fn get_register(&self, id: RegisterId) -> u16 {
        self.regs.get(id)
    }

    pub fn set_register(&mut self, id: RegisterId, value: u16) {
        self.regs.set(id, value);
    }

    /// True while a device services the read of `address` on an M1 cycle.
    ///
    /// Works because PC is only moved at instruction (and prefix)
    /// boundaries, so during an opcode fetch PC still addresses the byte
    /// being fetched.
    #[must_use]
    pub fn is_m1_cycle(&self, address: u16) -> bool {
        address == self.regs.pc()
    }

    #[must_use]
    pub fn state(&self) -> CpuState {
        if self.breaked {
            CpuState::Breaked
        } else if self.regs.halt() {
            CpuState::Halted
        } else {
            CpuState::Running
        }
    }

    #[must_use]
    pub fn cache(&self) -> CacheTable {
        self.cache.clone()
    }

    #[must_use]
    pub fn irq_lines(&self) -> Rc<IrqLines> {
        Rc::clone(&self.irq)
    }

    /// Forget cached lines covering `[start, start + num * 256)`.
    pub fn invalidate_mem_cache(&self, start: u16, num_lines: usize) {
        self.cache.invalidate(start, num_lines);
    }

    // Interrupt lines (devices normally go through IrqHelper).

    pub fn raise_irq(&self) {
        self.irq.raise_irq();
    }

    pub fn lower_irq(&self) {
        self.irq.lower_irq();
    }

    pub fn raise_nmi(&self) {
        self.irq.raise_nmi();
    }

    pub fn lower_nmi(&self) {
        self.irq.lower_nmi();
    }

    // Loop exit.

    /// Handle for requesting an exit from another thread.
    #[must_use]
    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle(Arc::clone(&self.exit_flag))
    }

    /// Force a return from [`CpuCore::execute`] at the next instruction
    /// boundary. Main thread only.
    pub fn exit_loop_sync(&mut self) {
        self.exit_flag.store(true, Ordering::Relaxed);
        self.limit = EmuTime::ZERO;
    }

    /// Same, but callable from any thread via [`CpuCore::exit_handle`].
    pub fn exit_loop_async(&self) {
        self.exit_flag.store(true, Ordering::Relaxed);
    }

    // Breakpoints / debugger.

    pub fn add_breakpoint(&mut self, pc: u16) {
        self.breakpoints.insert(pc);
    }

    pub fn remove_breakpoint(&mut self, pc: u16) {
        self.breakpoints.remove(&pc);
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// Called with the PC whenever the core enters the Breaked state.
    pub fn set_break_hook(&mut self, hook: Box<dyn FnMut(u16)>) {
        self.break_hook = Some(hook);
    }

    #[must_use]
    pub fn is_breaked(&self) -> bool {
        self.breaked
    }

    /// Enter Breaked at the next boundary.
    pub fn do_break(&mut self) {
        if !self.breaked {
            self.breaked = true;
            let pc = self.regs.pc();
            if let Some(hook) = &mut self.break_hook {
                hook(pc);
            }
        }
    }

    /// Leave Breaked, running freely again.
    pub fn do_continue(&mut self) {
        self.breaked = false;
    }

    /// Leave Breaked for exactly one instruction.
    pub fn do_step<B: Bus>(&mut self, bus: &mut B) {
        if self.breaked {
            self.breaked = false;
            self.execute_slow(bus, EmuTime::ZERO);
            self.do_break();
        }
    }

    // Run loop.

    /// Run instructions until the clock reaches `target`, an exit was
    /// requested, or a scheduled sync point became due. Infallible: every
    /// byte sequence has defined behaviour.
    pub fn execute<B: Bus>(&mut self, bus: &mut B, target: EmuTime) {
        if self.breaked {
            return;
        }
        self.set_slow_instructions();
        loop {
            if self.take_exit_request() {
                return;
            }
            let limit = self.effective_limit(target);
            if self.clock.time() >= limit {
                return;
            }
            if self.slow_instructions > 0 || self.attention() || self.regs.halt()
                || !self.breakpoints.is_empty()
            {
                self.slow_instructions = self.slow_instructions.saturating_sub(1);
                self.execute_slow(bus, limit);
                if self.breaked {
                    return;
                }
                if !self.breakpoints.is_empty()
                    && self.pending_irq() == PendingIrq::None
                    && self.breakpoints.contains(&self.regs.pc())
                {
                    self.do_break();
                    return;
                }
            } else {
                self.limit = limit;
                self.execute_instructions(bus);
                // Note: the pipeline history shifts once per burst; the
                // instructions that feed it all end their burst anyway.
                self.regs.end_instruction();
            }
        }
    }

    /// One instruction worth of progress with full interrupt checks.
    fn execute_slow<B: Bus>(&mut self, bus: &mut B, limit: EmuTime) {
        match self.pending_irq() {
            PendingIrq::Nmi => {
                self.irq.clear_nmi_edge();
                self.accept_nmi(bus);
                self.set_slow_instructions();
            }
            PendingIrq::Irq => {
                if self.regs.prev_was_ld_ai() {
                    // LD A,I / LD A,R copy IFF2 into V, but the copy is
                    // lost when an IRQ is accepted right at this boundary.
                    self.regs.set_f(self.regs.f() & !VF);
                }
                match self.regs.im() {
                    0 => self.accept_irq0(bus),
                    1 => self.accept_irq1(bus),
                    _ => self.accept_irq2(bus),
                }
                self.regs.end_instruction();
                self.set_slow_instructions();
            }
            PendingIrq::None if self.regs.halt() => {
                // No fetches while halted: burn NOP-sized bursts up to the
                // limit, counting the skipped M1 cycles in R. Capped so an
                // open-ended limit cannot overflow the clock.
                let burst = P::HALT_STATES + self.config.m1_wait;
                let n = if self.clock.time() >= limit {
                    1
                } else {
                    (self.clock.ticks_until(limit) / burst + 1).min(1 << 20)
                };
                self.clock.add(n * burst);
                self.regs.incr_r((n & 0x7F) as u8);
                self.set_slow_instructions();
            }
            PendingIrq::None => {
                self.limit = EmuTime::ZERO; // exactly one instruction
                self.execute_instructions(bus);
                self.regs.end_instruction();
                if P::IS_R800
                    && self.regs.prev2_was_call()
                    && !self.regs.prev_was_pop_ret()
                {
                    // A CALL or RST not immediately followed by a
                    // single-byte POP or RET costs one extra cycle in the
                    // following instruction.
                    self.clock.add(1);
                }
            }
        }
    }

    /// Fetch-dispatch until the limit is reached or something needs the
    /// slow loop.
    fn execute_instructions<B: Bus>(&mut self, bus: &mut B) {
        loop {
            let pc = self.regs.pc();
            self.policy.pre_fetch(&mut self.clock, pc);
            let opcode = self.rdmem_opcode(bus, 0, P::CC_MAIN);
            self.regs.incr_r(1);
            self.add_m1_wait();
            let step = self.exec_main(bus, opcode);
            self.apply(step);
            if self.limit_reached() || self.attention() {
                return;
            }
        }
    }

    pub(crate) fn apply(&mut self, step: Step) {
        self.regs.add_pc(step.length as i16 as u16);
        self.clock.add(step.cycles);
    }

    fn effective_limit(&self, target: EmuTime) -> EmuTime {
        match &self.scheduler {
            Some(scheduler) => target.min(scheduler.next_sync_time()),
            None => target,
        }
    }

    fn limit_reached(&self) -> bool {
        let mut limit = self.limit;
        if let Some(scheduler) = &self.scheduler {
            limit = limit.min(scheduler.next_sync_time());
        }
        self.clock.time() >= limit
    }

    pub(crate) fn set_slow_instructions(&mut self) {
        self.slow_instructions = 2;
        self.limit = EmuTime::ZERO;
    }

    fn take_exit_request(&mut self) -> bool {
        self.exit_flag.swap(false, Ordering::Relaxed)
    }

    fn attention(&self) -> bool {
        self.irq.nmi_edge() || (self.irq.irq_asserted() && self.regs.iff1())
    }

    fn pending_irq(&self) -> PendingIrq {
        if self.irq.nmi_edge() {
            PendingIrq::Nmi
        } else if self.irq.irq_asserted() && self.regs.iff1() && !self.regs.prev_was_ei() {
            PendingIrq::Irq
        } else {
            PendingIrq::None
        }
    }

    // Interrupt acceptance.

    fn accept_nmi<B: Bus>(&mut self, bus: &mut B) {
        self.regs.incr_r(1);
        self.add_m1_wait();
        self.regs.set_halt(false);
        self.regs.set_iff1(false); // IFF2 preserved
        let pc = self.regs.pc();
        self.push16(bus, pc, P::EE_NMI_1);
        self.regs.set_pc(0x0066);
        self.clock.add(P::CC_NMI);
    }

    fn accept_irq0<B: Bus>(&mut self, bus: &mut B) {
        self.regs.incr_r(1);
        self.add_m1_wait();
        self.regs.set_halt(false);
        self.regs.set_iff1(false);
        self.regs.set_iff2(false);
        let pc = self.regs.pc();
        self.push16(bus, pc, P::EE_IRQ0_1);
        // Execute the byte the device drives on the bus; only RST n is
        // meaningful on MSX (the bus floats to 0xFF = RST 38).
        let vector = bus.irq_vector();
        let target = if vector & 0xC7 == 0xC7 {
            u16::from(vector & 0x38)
        } else {
            0x0038
        };
        self.regs.set_pc(target);
        self.regs.set_memptr(target);
        self.clock.add(P::CC_IRQ0);
    }

    fn accept_irq1<B: Bus>(&mut self, bus: &mut B) {
        self.regs.incr_r(1);
        self.add_m1_wait();
        self.regs.set_halt(false);
        self.regs.set_iff1(false);
        self.regs.set_iff2(false);
        let pc = self.regs.pc();
        self.push16(bus, pc, P::EE_IRQ1_1);
        self.regs.set_pc(0x0038);
        self.regs.set_memptr(0x0038);
        self.clock.add(P::CC_IRQ1);
    }

    fn accept_irq2<B: Bus>(&mut self, bus: &mut B) {
        self.regs.incr_r(1);
        self.add_m1_wait();
        self.regs.set_halt(false);
        self.regs.set_iff1(false);
        self.regs.set_iff2(false);
        let pc = self.regs.pc();
        self.push16(bus, pc, P::EE_IRQ2_1);
        let vector = u16::from(bus.irq_vector()) | (u16::from(self.regs.i()) << 8);
        let target = self.rd_word(bus, vector, P::CC_IRQ2_2);
        self.regs.set_pc(target);
        self.regs.set_memptr(target);
        self.clock.add(P::CC_IRQ2);
    }

    // Wait-state plumbing.

    pub(crate) fn add_m1_wait(&mut self) {
        if self.config.m1_wait != 0 {
            self.clock.add(self.config.m1_wait);
        }
    }

    fn add_mem_wait(&mut self) {
        if self.config.mem_wait != 0 {
            self.clock.add(self.config.mem_wait);
        }
    }

    // Memory access. `cc` is the cycle offset of the access within the
    // current instruction; the clock still holds the instruction start
    // (plus any waits/penalties already inserted).

    pub(crate) fn rdmem_opcode<B: Bus>(&mut self, bus: &mut B, pc_offset: u16, cc: u64) -> u8 {
        let address = self.regs.pc().wrapping_add(pc_offset);
        self.rdmem_impl(bus, address, cc, false, false)
    }

    pub(crate) fn rdmem<B: Bus>(&mut self, bus: &mut B, address: u16, cc: u64) -> u8 {
        self.rdmem_impl(bus, address, cc, true, true)
    }

    fn rdmem_impl<B: Bus>(
        &mut self,
        bus: &mut B,
        address: u16,
        cc: u64,
        pre: bool,
        post: bool,
    ) -> u8 {
        let line = usize::from(address >> 8);
        match self.cache.read_entry(line) {
            CacheEntry::Cached(slice) => {
                if pre {
                    self.policy.pre_mem(&mut self.clock, address);
                }
                if post {
                    self.policy.post_mem(address);
                }
                self.add_mem_wait();
                slice.read(address as u8)
            }
            CacheEntry::Unprobed => {
                let base = address & 0xFF00;
                if let Some(slice) = bus.read_cache_line(base) {
                    if pre {
                        self.policy.pre_mem(&mut self.clock, address);
                    }
                    if post {
                        self.policy.post_mem(address);
                    }
                    self.add_mem_wait();
                    let value = slice.read(address as u8);
                    self.cache.set_read_entry(line, CacheEntry::Cached(slice));
                    value
                } else {
                    self.cache.set_read_entry(line, CacheEntry::Uncacheable);
                    self.rdmem_uncached(bus, address, cc, pre, post)
                }
            }
            CacheEntry::Uncacheable => self.rdmem_uncached(bus, address, cc, pre, post),
        }
    }

    fn rdmem_uncached<B: Bus>(
        &mut self,
        bus: &mut B,
        address: u16,
        cc: u64,
        pre: bool,
        post: bool,
    ) -> u8 {
        if pre {
            self.policy.pre_mem(&mut self.clock, address);
        }
        let time = self.clock.calc_time(cc);
        let value = bus.read_mem(address, time);
        if post {
            self.policy.post_mem(address);
        }
        self.add_mem_wait();
        value
    }

    pub(crate) fn wrmem<B: Bus>(&mut self, bus: &mut B, address: u16, value: u8, cc: u64) {
        self.wrmem_impl(bus, address, value, cc, true, true);
    }

    fn wrmem_impl<B: Bus>(
        &mut self,
        bus: &mut B,
        address: u16,
        value: u8,
        cc: u64,
        pre: bool,
        post: bool,
    ) {
        let line = usize::from(address >> 8);
        match self.cache.write_entry(line) {
            CacheEntry::Cached(slice) => {
                if pre {
                    self.policy.pre_mem(&mut self.clock, address);
                }
                if post {
                    self.policy.post_mem(address);
                }
                self.add_mem_wait();
                slice.write(address as u8, value);
            }
            CacheEntry::Unprobed => {
                let base = address & 0xFF00;
                if let Some(slice) = bus.write_cache_line(base) {
                    if pre {
                        self.policy.pre_mem(&mut self.clock, address);
                    }
                    if post {
                        self.policy.post_mem(address);
                    }
                    self.add_mem_wait();
                    slice.write(address as u8, value);
                    self.cache.set_write_entry(line, CacheEntry::Cached(slice));
                } else {
                    self.cache.set_write_entry(line, CacheEntry::Uncacheable);
                    self.wrmem_uncached(bus, address, value, cc, pre, post);
                }
            }
            CacheEntry::Uncacheable => {
                self.wrmem_uncached(bus, address, value, cc, pre, post);
            }
        }
    }

    fn wrmem_uncached<B: Bus>(
        &mut self,
        bus: &mut B,
        address: u16,
        value: u8,
        cc: u64,
        pre: bool,
        post: bool,
    ) {
        if pre {
            self.policy.pre_mem(&mut self.clock, address);
        }
        let time = self.clock.calc_time(cc);
        bus.write_mem(address, value, time);
        if post {
            self.policy.post_mem(address);
        }
        self.add_mem_wait();
    }

    pub(crate) fn rd_word<B: Bus>(&mut self, bus: &mut B, address: u16, cc: u64) -> u16 {
        let lo = self.rdmem_impl(bus, address, cc, true, false);
        let hi = self.rdmem_impl(bus, address.wrapping_add(1), cc + P::CC_RDMEM, false, true);
        u16::from_le_bytes([lo, hi])
    }

    pub(crate) fn rd_word_pc<B: Bus>(&mut self, bus: &mut B, pc_offset: u16, cc: u64) -> u16 {
        let address = self.regs.pc().wrapping_add(pc_offset);
        let lo = self.rdmem_impl(bus, address, cc, false, false);
        let hi = self.rdmem_impl(bus, address.wrapping_add(1), cc + P::CC_RDMEM, false, false);
        u16::from_le_bytes([lo, hi])
    }

    /// Write a word, low byte first.
    pub(crate) fn wr_word<B: Bus>(&mut self, bus: &mut B, address: u16, value: u16, cc: u64) {
        let [lo, hi] = value.to_le_bytes();
        self.wrmem_impl(bus, address, lo, cc, true, false);
        self.wrmem_impl(bus, address.wrapping_add(1), hi, cc + P::CC_WRMEM, false, true);
    }

    /// Write a word, high byte first (stack pushes).
    pub(crate) fn wr_word_rev<B: Bus>(&mut self, bus: &mut B, address: u16, value: u16, cc: u64) {
        let [lo, hi] = value.to_le_bytes();
        self.wrmem_impl(bus, address.wrapping_add(1), hi, cc, true, false);
        self.wrmem_impl(bus, address, lo, cc + P::CC_WRMEM, false, true);
    }

    pub(crate) fn push16<B: Bus>(&mut self, bus: &mut B, value: u16, ee: u64) {
        let sp = self.regs.sp().wrapping_sub(2);
        self.regs.set_sp(sp);
        self.wr_word_rev(bus, sp, value, P::CC_PUSH_1 + ee);
    }

    pub(crate) fn pop16<B: Bus>(&mut self, bus: &mut B, ee: u64) -> u16 {
        let address = self.regs.sp();
        self.regs.set_sp(address.wrapping_add(2));
        if P::IS_R800 && ee == 0 {
            // Covers POP rr and RET; POP IX/IY and RETN carry an extra
            // cost and do not cancel the call penalty.
            self.regs.set_current_pop_ret();
        }
        self.rd_word(bus, address, P::CC_POP_1 + ee)
    }

    pub(crate) fn read_port<B: Bus>(&mut self, bus: &mut B, port: u16, cc: u64) -> u8 {
        let time = self.clock.calc_time(cc);
        bus.read_io(port, time)
    }

    pub(crate) fn write_port<B: Bus>(&mut self, bus: &mut B, port: u16, value: u8, cc: u64) {
        let time = self.clock.calc_time(cc);
        bus.write_io(port, value, time);
    }
}

#[cfg(feature = "test-utils")]
impl<P: CpuPolicy> CpuCore<P> {
    /// Execute exactly one instruction (accepting a pending interrupt
    /// first, like the real boundary would).
    pub fn step<B: Bus>(&mut self, bus: &mut B) {
        self.execute_slow(bus, EmuTime::ZERO);
    }

    /// Mutable register access for test harnesses.
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    /// Simulate a RET: pop the return address into PC (test harness
    /// system-call intercepts).
    pub fn force_ret<B: Bus>(&mut self, bus: &mut B) {
        let target = self.pop16(bus, 0);
        self.regs.set_pc(target);
    }
}
