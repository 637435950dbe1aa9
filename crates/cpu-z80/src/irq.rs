//! Interrupt line bookkeeping shared between the CPU and its devices.

use std::cell::Cell;
use std::rc::Rc;

/// Pending interrupt counters.
///
/// The IRQ (resp. NMI) line is asserted iff the counter is non-zero; the
/// counter equals the number of distinct active sources. The NMI
/// additionally latches its rising edge, cleared when the CPU jumps to the
/// NMI handler.
///
/// Held behind `Rc` so devices can raise/lower between instructions while
/// the CPU observes the lines at instruction boundaries.
#[derive(Debug, Default)]
pub struct IrqLines {
    irq: Cell<u32>,
    nmi: Cell<u32>,
    nmi_edge: Cell<bool>,
}

impl IrqLines {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn raise_irq(&self) {
        self.irq.set(self.irq.get() + 1);
    }

    /// # Panics
    ///
    /// Panics on a lower without a matching raise.
    pub fn lower_irq(&self) {
        let count = self.irq.get();
        assert!(count > 0, "lower_irq without matching raise_irq");
        self.irq.set(count - 1);
    }

    pub fn raise_nmi(&self) {
        if self.nmi.get() == 0 {
            self.nmi_edge.set(true);
        }
        self.nmi.set(self.nmi.get() + 1);
    }

    /// # Panics
    ///
    /// Panics on a lower without a matching raise.
    pub fn lower_nmi(&self) {
        let count = self.nmi.get();
        assert!(count > 0, "lower_nmi without matching raise_nmi");
        self.nmi.set(count - 1);
    }

    #[must_use]
    pub fn irq_asserted(&self) -> bool {
        self.irq.get() > 0
    }

    #[must_use]
    pub fn nmi_asserted(&self) -> bool {
        self.nmi.get() > 0
    }

    #[must_use]
    pub fn nmi_edge(&self) -> bool {
        self.nmi_edge.get()
    }

    /// Called when the CPU accepts the NMI.
    pub fn clear_nmi_edge(&self) {
        self.nmi_edge.set(false);
    }

    /// Restore latched edge state (host savestate loading).
    pub fn set_nmi_edge(&self, edge: bool) {
        self.nmi_edge.set(edge);
    }

    #[must_use]
    pub fn irq_count(&self) -> u32 {
        self.irq.get()
    }

    #[must_use]
    pub fn nmi_count(&self) -> u32 {
        self.nmi.get()
    }
}

/// A device-side handle that keeps raise/lower balanced.
///
/// Devices latch their interrupt output; `set`/`reset` are idempotent and
/// the line is released when the helper is dropped.
#[derive(Debug)]
pub struct IrqHelper {
    lines: Rc<IrqLines>,
    active: bool,
}

impl IrqHelper {
    #[must_use]
    pub fn new(lines: Rc<IrqLines>) -> Self {
        Self {
            lines,
            active: false,
        }
    }

    pub fn set(&mut self) {
        if !self.active {
            self.active = true;
            self.lines.raise_irq();
        }
    }

    pub fn reset(&mut self) {
        if self.active {
            self.active = false;
            self.lines.lower_irq();
        }
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.active
    }
}

impl Drop for IrqHelper {
    fn drop(&mut self) {
        self.reset();
    }
}
