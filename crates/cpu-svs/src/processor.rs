//! Processor state and the simulation loop.
//!
//! One flat record holds everything a processor owns; the ALU, MMU,
//! dispatcher and interrupt code are `impl Processor` blocks in their own
//! modules. Physical memory is shared with the rest of the machine and is
//! reached only through the MMU operations.

use svs_core::tag::{TAG_INSN48, TAG_NUMBER48};
use svs_core::word::{ADDR_MASK, BITS48, addr15, bits};
use svs_core::{Memory, SharedMemory, SvsStatus};

use crate::decode::assemble;
use crate::flags::{
    PSW, PSW_CHECK_HALT, PSW_INTR_DISABLE, PSW_INTR_HALT, PSW_MMAP_DISABLE, PSW_PROT_DISABLE,
    RUU_AVOST_DISABLE, RUU_EXTRACODE, RUU_RIGHT_INSTR, SPSW, SPSW_EXTRACODE, SPSW_INTR_DISABLE,
    SPSW_MMAP_DISABLE, SPSW_PROT_DISABLE, is_supervisor,
};
use crate::trace::{TraceMode, TraceSnapshot};

/// Number of modifier registers. Indexing is by a 5-bit field, so the
/// array is padded to 32; entries 30 and 31 are architecturally unused.
pub(crate) const NREGS: usize = 32;

/// One SVS processor.
pub struct Processor {
    /// Processor number, 0..3.
    pub(crate) index: u32,

    /// Program counter (СчАС).
    pub(crate) pc: u32,
    /// Instruction register (РК), the 24-bit half-instruction being executed.
    pub(crate) rk: u32,
    /// Effective address of the current instruction.
    pub(crate) aex: u32,
    /// ALU mode register (РАУ).
    pub(crate) rau: u32,
    /// Control-unit mode register (РУУ).
    pub(crate) ruu: u32,
    /// Accumulator.
    pub(crate) acc: u64,
    /// Minor register (РМР), receives shifted-out and low-order bits.
    pub(crate) rmr: u64,
    /// Modifier registers; M[0] reads as zero.
    pub(crate) m: [u32; NREGS],

    /// User page-mapping registers (РП), four 12-bit descriptors each.
    pub(crate) rp: [u64; 8],
    /// Supervisor page-mapping registers (РПС).
    pub(crate) rps: [u64; 8],
    /// Per-page expansion of РП; memory access goes through these.
    pub(crate) utlb: [u32; 32],
    /// Per-page expansion of РПС.
    pub(crate) stlb: [u32; 32],
    /// Protection register (РЗ), one bit per virtual page.
    pub(crate) rz: u32,

    /// Tag register.
    pub(crate) tag_reg: u8,
    /// Internal interrupt register (РПР).
    pub(crate) rpr: u64,
    /// External interrupt register (ГРВП).
    pub(crate) grvp: u32,
    /// External interrupt mask (ГРМ).
    pub(crate) grm: u32,

    /// Requests to processors (ПП).
    pub(crate) pp: u64,
    /// Responses to processors (ОПП).
    pub(crate) opp: u64,
    /// Interrupts from processors (ПОП).
    pub(crate) pop: u64,
    /// Responses from processors (ОПОП).
    pub(crate) opop: u64,
    /// Processor configuration (РКП).
    pub(crate) rkp: u64,

    /// Console switch registers.
    pub(crate) pult: [u64; 8],

    /// Virtual page or block number latched by the faulting MMU access.
    pub(crate) bad_addr: u32,
    /// Stack-pointer correction to apply if the instruction faults.
    pub(crate) corr_stack: i32,
    /// An interrupt is being delivered and its handler has not yet run.
    pub(crate) in_interrupt: bool,

    /// Estimated elapsed time in 100 ns ticks.
    pub(crate) ticks: u64,

    pub(crate) trace: TraceMode,
    pub(crate) prev: TraceSnapshot,

    pub(crate) memory: SharedMemory,

    breakpoints: Vec<u32>,
    pub(crate) read_watches: Vec<u32>,
    pub(crate) write_watches: Vec<u32>,
}

impl Processor {
    /// Allocate a processor attached to a shared physical memory.
    ///
    /// The state is zero-initialized; call [`reset`](Self::reset) to bring
    /// it to the architectural reset state before running.
    #[must_use]
    pub fn new(index: u32, memory: SharedMemory) -> Self {
        Self {
            index,
            pc: 0,
            rk: 0,
            aex: 0,
            rau: 0,
            ruu: 0,
            acc: 0,
            rmr: 0,
            m: [0; NREGS],
            rp: [0; 8],
            rps: [0; 8],
            utlb: [0; 32],
            stlb: [0; 32],
            rz: 0,
            tag_reg: 0,
            rpr: 0,
            grvp: 0,
            grm: 0,
            pp: 0,
            opp: 0,
            pop: 0,
            opop: 0,
            rkp: 0,
            pult: [0; 8],
            bad_addr: 0,
            corr_stack: 0,
            in_interrupt: false,
            ticks: 0,
            trace: TraceMode::None,
            prev: TraceSnapshot::default(),
            memory,
            breakpoints: Vec::new(),
            read_watches: Vec::new(),
            write_watches: Vec::new(),
        }
    }

    /// Allocate a processor with its own private memory.
    #[must_use]
    pub fn new_standalone(index: u32) -> Self {
        Self::new(index, Memory::new_shared())
    }

    /// Bring the processor to the architectural reset state: supervisor
    /// extracode mode with АВОСТ disabled, all mapping/protection/interrupt
    /// disables and both halt bits set, everything else cleared.
    pub fn reset(&mut self) {
        self.acc = 0;
        self.rmr = 0;
        self.rau = 0;
        self.ruu = RUU_EXTRACODE | RUU_AVOST_DISABLE;

        self.m = [0; NREGS];
        self.m[PSW] = PSW_MMAP_DISABLE
            | PSW_PROT_DISABLE
            | PSW_INTR_HALT
            | PSW_CHECK_HALT
            | PSW_INTR_DISABLE;
        self.m[SPSW] =
            SPSW_MMAP_DISABLE | SPSW_PROT_DISABLE | SPSW_EXTRACODE | SPSW_INTR_DISABLE;

        self.rz = 0;
        self.rp = [0; 8];
        self.rps = [0; 8];
        self.mmu_setup();

        self.rpr = 0;
        self.grm = 0;
        self.pp = 0;
        self.opp = 0;
        self.pop = 0;
        self.opop = 0;
        self.rkp = 0;

        self.bad_addr = 0;
        self.corr_stack = 0;
        self.in_interrupt = false;

        log::debug!("cpu{} --- reset", self.index);
    }

    /// Run until a stop code.
    pub fn simulate(&mut self) -> SvsStatus {
        self.pc &= ADDR_MASK;
        self.mmu_setup();
        if self.trace == TraceMode::All {
            self.trace_registers();
        }
        loop {
            if let Some(status) = self.step() {
                log::debug!("cpu{} --- {status}", self.index);
                return status;
            }
        }
    }

    /// One iteration of the dispatch loop: runaway and breakpoint checks,
    /// pending-interrupt delivery, then a single instruction. Returns a stop
    /// code when the simulation should return to the caller. External
    /// devices compose with the core by calling this between instructions
    /// and raising ГРВП bits via [`raise_external`](Self::raise_external).
    pub fn step(&mut self) -> Option<SvsStatus> {
        if self.pc > ADDR_MASK && is_supervisor(self.ruu) {
            // Runaway execution in supervisor mode warrants attention.
            return Some(SvsStatus::Runout);
        }

        if self.ruu & RUU_RIGHT_INSTR == 0 && self.breakpoints.contains(&self.pc) {
            return Some(SvsStatus::Ibkpt);
        }

        if !self.in_interrupt
            && self.ruu & RUU_RIGHT_INSTR == 0
            && self.m[PSW] & PSW_INTR_DISABLE == 0
        {
            if self.rpr != 0 {
                log::debug!("cpu{} --- internal interrupt", self.index);
                self.op_int_external();
            }
            if self.grvp & self.grm != 0 {
                log::debug!("cpu{} --- external interrupt", self.index);
                self.op_int_external();
            }
        }

        match self.one_instr() {
            Ok(()) => {
                self.in_interrupt = false;
                None
            }
            Err(fault) => self.handle_fault(fault),
        }
    }

    // === Harness interface ===

    /// Poke a number-tagged data word. Addresses below 8 go to the console
    /// switch registers.
    pub fn store_data(&mut self, addr: u32, word: u64) {
        let word = word & BITS48;
        if addr < 8 {
            self.pult[addr as usize] = word;
        } else {
            self.memory
                .borrow_mut()
                .write(addr as usize, word << 16, TAG_NUMBER48);
        }
    }

    /// Assemble two half-instructions into one word and poke it in with the
    /// instruction tag.
    pub fn store_instruction(
        &mut self,
        addr: u32,
        reg_left: u32,
        op_left: u32,
        addr_left: u32,
        reg_right: u32,
        op_right: u32,
        addr_right: u32,
    ) {
        let word = (u64::from(assemble(reg_left, op_left, addr_left)) << 24)
            | u64::from(assemble(reg_right, op_right, addr_right));
        if addr < 8 {
            self.pult[addr as usize] = word;
        } else {
            self.memory
                .borrow_mut()
                .write(addr as usize, word << 16, TAG_INSN48);
        }
    }

    /// Read back a data word as the harness sees it.
    #[must_use]
    pub fn data_word(&self, addr: u32) -> u64 {
        if addr < 8 {
            self.pult[addr as usize]
        } else {
            self.memory.borrow().word(addr as usize) >> 16
        }
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = addr15(pc);
    }

    #[must_use]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_acc(&mut self, acc: u64) {
        self.acc = acc & BITS48;
    }

    #[must_use]
    pub fn acc(&self) -> u64 {
        self.acc
    }

    pub fn set_rmr(&mut self, rmr: u64) {
        self.rmr = rmr & BITS48;
    }

    #[must_use]
    pub fn rmr(&self) -> u64 {
        self.rmr
    }

    pub fn set_rau(&mut self, rau: u32) {
        self.rau = rau & 0o77;
    }

    #[must_use]
    pub fn rau(&self) -> u32 {
        self.rau
    }

    #[must_use]
    pub fn ruu(&self) -> u32 {
        self.ruu
    }

    /// Modifier register i. M[0] always reads as zero.
    #[must_use]
    pub fn m(&self, i: usize) -> u32 {
        self.m[i & 0o37]
    }

    pub fn set_m(&mut self, i: usize, value: u32) {
        let i = i & 0o37;
        if i != 0 {
            // 15 bits plus the physical-address marker of M[IBP]/M[DWP].
            self.m[i] = value & 0xFFFF;
        }
    }

    #[must_use]
    pub fn rpr(&self) -> u64 {
        self.rpr
    }

    #[must_use]
    pub fn grvp(&self) -> u32 {
        self.grvp
    }

    /// OR bits into the external interrupt register, as the clock and the
    /// I/O processors do.
    pub fn raise_external(&mut self, mask: u32) {
        self.grvp |= mask & bits(24) as u32;
    }

    /// Load a console switch register.
    pub fn set_pult(&mut self, i: usize, word: u64) {
        self.pult[i & 7] = word & BITS48;
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Estimated elapsed time in 100 ns ticks.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn set_trace(&mut self, mode: TraceMode) {
        self.trace = mode;
    }

    /// Stop with IBKPT before fetching a left half-instruction at `addr`.
    pub fn set_breakpoint(&mut self, addr: u32) {
        self.breakpoints.push(addr15(addr));
    }

    /// Stop with RWATCH when an operand is loaded from `addr`.
    pub fn set_read_watch(&mut self, addr: u32) {
        self.read_watches.push(addr15(addr));
    }

    /// Stop with WWATCH when a word is stored to `addr`.
    pub fn set_write_watch(&mut self, addr: u32) {
        self.write_watches.push(addr15(addr));
    }

    /// Drop all emulator breakpoints and watchpoints.
    pub fn clear_watches(&mut self) {
        self.breakpoints.clear();
        self.read_watches.clear();
        self.write_watches.clear();
    }
}
