//! The machine context: both CPU cores, the bus and the scheduler.

use std::cell::Cell;
use std::rc::Rc;

use cpu_z80::{CpuConfig, CpuCore, IrqLines, R800, Registers, Z80};
use emu_core::{CacheTable, EmuTime, Scheduler};

use crate::bus::MsxBus;

/// Which CPU drives the machine. TurboR machines switch at runtime; the
/// idle core is warped forward so both share one time line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuModel {
    Z80,
    R800,
}

/// The Z80/R800 pair. Both cores share the cache table and the interrupt
/// lines, so devices never care which one is running.
pub struct MsxCpu {
    z80: CpuCore<Z80>,
    r800: CpuCore<R800>,
    active: CpuModel,
    r800_active: Rc<Cell<bool>>,
    cache: CacheTable,
}

impl MsxCpu {
    #[must_use]
    pub fn new(cache: CacheTable, irq: Rc<IrqLines>, time: EmuTime) -> Self {
        let z80 = CpuCore::with_shared(CpuConfig::msx_z80(), cache.clone(), Rc::clone(&irq), time);
        let r800 = CpuCore::with_shared(CpuConfig::default(), cache.clone(), irq, time);
        Self {
            z80,
            r800,
            active: CpuModel::Z80,
            r800_active: Rc::new(Cell::new(false)),
            cache,
        }
    }

    pub fn attach_scheduler(&mut self, scheduler: Scheduler) {
        self.z80.attach_scheduler(scheduler.clone());
        self.r800.attach_scheduler(scheduler);
    }

    #[must_use]
    pub fn active_model(&self) -> CpuModel {
        self.active
    }

    /// Flag observed by devices that behave differently under the R800
    /// (VDP I/O delay).
    #[must_use]
    pub fn r800_active_flag(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.r800_active)
    }

    /// Switch the running core. The incoming core is warped to the
    /// current time and the whole memory cache is flushed.
    pub fn select(&mut self, model: CpuModel) {
        if model == self.active {
            return;
        }
        let now = self.current_time();
        match model {
            CpuModel::Z80 => self.z80.warp(now),
            CpuModel::R800 => self.r800.warp(now),
        }
        self.cache.invalidate_all();
        self.active = model;
        self.r800_active.set(model == CpuModel::R800);
    }

    pub fn execute(&mut self, bus: &mut MsxBus, target: EmuTime) {
        match self.active {
            CpuModel::Z80 => self.z80.execute(bus, target),
            CpuModel::R800 => self.r800.execute(bus, target),
        }
    }

    #[must_use]
    pub fn current_time(&self) -> EmuTime {
        match self.active {
            CpuModel::Z80 => self.z80.current_time(),
            CpuModel::R800 => self.r800.current_time(),
        }
    }

    pub fn reset(&mut self, time: EmuTime) {
        self.z80.reset(time);
        self.r800.reset(time);
        self.select(CpuModel::Z80);
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        match self.active {
            CpuModel::Z80 => self.z80.registers(),
            CpuModel::R800 => self.r800.registers(),
        }
    }

    #[must_use]
    pub fn is_breaked(&self) -> bool {
        match self.active {
            CpuModel::Z80 => self.z80.is_breaked(),
            CpuModel::R800 => self.r800.is_breaked(),
        }
    }

    pub fn raise_irq(&self) {
        self.z80.raise_irq(); // lines are shared with the R800 core
    }

    pub fn lower_irq(&self) {
        self.z80.lower_irq();
    }

    pub fn raise_nmi(&self) {
        self.z80.raise_nmi();
    }

    pub fn lower_nmi(&self) {
        self.z80.lower_nmi();
    }

    #[must_use]
    pub fn irq_lines(&self) -> Rc<IrqLines> {
        self.z80.irq_lines()
    }

    #[must_use]
    pub fn z80(&self) -> &CpuCore<Z80> {
        &self.z80
    }

    pub fn z80_mut(&mut self) -> &mut CpuCore<Z80> {
        &mut self.z80
    }

    #[must_use]
    pub fn r800(&self) -> &CpuCore<R800> {
        &self.r800
    }

    pub fn r800_mut(&mut self) -> &mut CpuCore<R800> {
        &mut self.r800
    }
}

/// A complete machine: CPU pair, slot router and event scheduler.
///
/// `run_until` drives the CPU to the requested time, yielding to device
/// sync points in between; devices raise interrupts through the shared
/// lines and schedule future work on the scheduler handle.
pub struct Msx {
    cpu: MsxCpu,
    bus: MsxBus,
    scheduler: Scheduler,
}

impl Msx {
    /// Wrap a configured bus into a machine. The bus keeps its cache
    /// table; both CPU cores attach to it.
    #[must_use]
    pub fn new(bus: MsxBus) -> Self {
        let scheduler = Scheduler::new();
        let mut cpu = MsxCpu::new(bus.cache(), IrqLines::new(), EmuTime::ZERO);
        cpu.attach_scheduler(scheduler.clone());
        Self {
            cpu,
            bus,
            scheduler,
        }
    }

    /// Reset devices, slot selection and CPU state, advancing the CPU
    /// clock to `time` without executing anything.
    pub fn reset(&mut self, time: EmuTime) {
        self.bus.reset(time);
        self.cpu.reset(time);
    }

    /// Emulate until `limit`. Returns early when the CPU entered the
    /// Breaked state or an asynchronous exit was requested.
    pub fn run_until(&mut self, limit: EmuTime) {
        loop {
            let target = limit.min(self.scheduler.next_sync_time());
            self.cpu.execute(&mut self.bus, target);
            let now = self.cpu.current_time();
            while let Some(sync_point) = self.scheduler.pop_due(now) {
                self.bus.execute_sync_point(sync_point);
            }
            if self.cpu.is_breaked() || now >= limit {
                return;
            }
            if now < target {
                // The core returned before its target: an exit request.
                return;
            }
        }
    }

    #[must_use]
    pub fn cpu(&self) -> &MsxCpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut MsxCpu {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &MsxBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut MsxBus {
        &mut self.bus
    }

    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }
}
