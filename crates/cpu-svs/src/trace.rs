//! Instruction and register tracing.
//!
//! Output goes through the `log` facade: the containing program decides the
//! sink. Register tracing reports only the registers an instruction
//! changed, by comparison against a snapshot of the previous state.

use crate::flags::RUU_RIGHT_INSTR;
use crate::processor::{NREGS, Processor};

/// What to trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TraceMode {
    /// Nothing.
    #[default]
    None,
    /// Extracodes only (except э75).
    Extracodes,
    /// Every instruction.
    Instructions,
    /// Instructions, registers and memory access.
    All,
}

/// Previous register state for delta reporting.
#[derive(Debug, Clone, Default)]
pub(crate) struct TraceSnapshot {
    acc: u64,
    rmr: u64,
    m: [u32; NREGS],
    rau: u32,
    ruu: u32,
    rp: [u64; 8],
    rps: [u64; 8],
    rz: u32,
    tag_reg: u8,
    bad_addr: u32,
    rpr: u64,
    grvp: u32,
    grm: u32,
    pp: u64,
    opp: u64,
    pop: u64,
    opop: u64,
    rkp: u64,
}

impl Processor {
    /// One line per executed instruction: location, physical address,
    /// half marker and the raw instruction code.
    pub(crate) fn trace_opcode(&self, paddr: u32) {
        log::trace!(
            "cpu{} {:05o} {:07o} {}: {:08o}",
            self.index,
            self.pc,
            paddr,
            if self.ruu & RUU_RIGHT_INSTR != 0 { 'R' } else { 'L' },
            self.rk
        );
    }

    /// Report the registers changed since the previous call.
    pub(crate) fn trace_registers(&mut self) {
        let i = self.index;
        if self.acc != self.prev.acc {
            log::trace!("cpu{i}       Write ACC = {:016o}", self.acc);
        }
        if self.rmr != self.prev.rmr {
            log::trace!("cpu{i}       Write RMR = {:016o}", self.rmr);
        }
        for r in 0..NREGS {
            if self.m[r] != self.prev.m[r] {
                log::trace!("cpu{i}       Write M{r:o} = {:05o}", self.m[r]);
            }
        }
        if self.rau != self.prev.rau {
            log::trace!("cpu{i}       Write RAU = {:02o}", self.rau);
        }
        // The half-instruction marker flips every instruction; ignore it.
        if self.ruu & !RUU_RIGHT_INSTR != self.prev.ruu & !RUU_RIGHT_INSTR {
            log::trace!("cpu{i}       Write RUU = {:03o}", self.ruu);
        }
        for r in 0..8 {
            if self.rp[r] != self.prev.rp[r] {
                log::trace!("cpu{i}       Write RP{r:o} = {:016o}", self.rp[r]);
            }
            if self.rps[r] != self.prev.rps[r] {
                log::trace!("cpu{i}       Write RPS{r:o} = {:016o}", self.rps[r]);
            }
        }
        if self.rz != self.prev.rz {
            log::trace!("cpu{i}       Write RZ = {:011o}", self.rz);
        }
        if self.bad_addr != self.prev.bad_addr {
            log::trace!("cpu{i}       Write EADDR = {:03o}", self.bad_addr);
        }
        if self.tag_reg != self.prev.tag_reg {
            log::trace!("cpu{i}       Write TAG = {:03o}", self.tag_reg);
        }
        if self.pp != self.prev.pp {
            log::trace!("cpu{i}       Write PP = {:016o}", self.pp);
        }
        if self.opp != self.prev.opp {
            log::trace!("cpu{i}       Write OPP = {:016o}", self.opp);
        }
        if self.pop != self.prev.pop {
            log::trace!("cpu{i}       Write POP = {:016o}", self.pop);
        }
        if self.opop != self.prev.opop {
            log::trace!("cpu{i}       Write OPOP = {:016o}", self.opop);
        }
        if self.rkp != self.prev.rkp {
            log::trace!("cpu{i}       Write RKP = {:016o}", self.rkp);
        }
        if self.rpr != self.prev.rpr {
            log::trace!("cpu{i}       Write RPR = {:016o}", self.rpr);
        }
        if self.grvp != self.prev.grvp {
            log::trace!("cpu{i}       Write GRVP = {:010o}", self.grvp);
        }
        if self.grm != self.prev.grm {
            log::trace!("cpu{i}       Write GRM = {:010o}", self.grm);
        }

        self.prev = TraceSnapshot {
            acc: self.acc,
            rmr: self.rmr,
            m: self.m,
            rau: self.rau,
            ruu: self.ruu,
            rp: self.rp,
            rps: self.rps,
            rz: self.rz,
            tag_reg: self.tag_reg,
            bad_addr: self.bad_addr,
            rpr: self.rpr,
            grvp: self.grvp,
            grm: self.grm,
            pp: self.pp,
            opp: self.opp,
            pop: self.pop,
            opop: self.opop,
            rkp: self.rkp,
        };
    }
}
