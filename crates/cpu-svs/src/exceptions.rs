//! Interrupts, extracodes and fault handling.
//!
//! Two hardware entry points exist: the internal interrupt (vector 0o500)
//! and the external interrupt (vector 0o501); extracodes enter supervisor
//! mode at 0o500+op or 0o540+op/8. The dispatch loop's fault handler below
//! is the single place where a raised fault either stops the simulation or
//! becomes an internal interrupt, with the PC adjusted so that выпр resumes
//! at the right half-instruction.

use svs_core::SvsStatus;

use crate::flags::{
    ERET, IRET, PSW, PSW_CHECK_HALT, PSW_INTR_DISABLE, PSW_INTR_HALT, PSW_MMAP_DISABLE,
    PSW_PROT_DISABLE, RPR_BREAKPOINT, RPR_CHECK, RPR_DIVZERO, RPR_ILL_INSN, RPR_INSN_CHECK,
    RPR_INSN_PROT, RPR_OPRND_PROT, RPR_OVERFLOW, RPR_RAM_CHECK, RPR_WATCHPT_R, RPR_WATCHPT_W,
    RUU_AVOST_DISABLE, RUU_MOD_RK, RUU_RIGHT_INSTR, SPSW, SPSW_EXTRACODE, SPSW_INTERRUPT,
    SPSW_MOD_RK, SPSW_NEXT_RK, SPSW_RIGHT_INSTR, rpr_set_block, rpr_set_page, set_supervisor,
    supervisor_bits,
};
use crate::processor::Processor;

impl Processor {
    /// Internal interrupt entry: save the mode bits, latch the return
    /// address, disable interrupts, mapping and protection, and jump to
    /// vector 0o500 in interrupt mode.
    pub(crate) fn op_int_internal(&mut self) {
        self.m[SPSW] = (self.m[PSW]
            & (PSW_INTR_DISABLE | PSW_MMAP_DISABLE | PSW_PROT_DISABLE))
            | supervisor_bits(self.ruu);
        if self.ruu & RUU_RIGHT_INSTR != 0 {
            self.m[SPSW] |= SPSW_RIGHT_INSTR;
        }
        self.m[IRET] = self.pc;
        self.m[PSW] |= PSW_INTR_DISABLE | PSW_MMAP_DISABLE | PSW_PROT_DISABLE;
        if self.ruu & RUU_MOD_RK != 0 {
            self.m[SPSW] |= SPSW_MOD_RK;
            self.ruu &= !RUU_MOD_RK;
        }
        self.pc = 0o500;
        self.ruu &= !RUU_RIGHT_INSTR;
        self.ruu = set_supervisor(self.ruu, SPSW_INTERRUPT);
    }

    /// External interrupt entry: as the internal one, at vector 0o501.
    /// Delivered only between instructions, so the right-instruction flag
    /// is never saved.
    pub(crate) fn op_int_external(&mut self) {
        self.m[SPSW] = (self.m[PSW]
            & (PSW_INTR_DISABLE | PSW_MMAP_DISABLE | PSW_PROT_DISABLE))
            | supervisor_bits(self.ruu);
        self.m[IRET] = self.pc;
        self.m[PSW] |= PSW_INTR_DISABLE | PSW_MMAP_DISABLE | PSW_PROT_DISABLE;
        if self.ruu & RUU_MOD_RK != 0 {
            self.m[SPSW] |= SPSW_MOD_RK;
            self.ruu &= !RUU_MOD_RK;
        }
        self.pc = 0o501;
        self.ruu &= !RUU_RIGHT_INSTR;
        self.ruu = set_supervisor(self.ruu, SPSW_INTERRUPT);
    }

    /// Extracode entry: record the return address in M[ERET], save the mode
    /// bits with the extracode flag, stash Aex in M[14] and jump to the
    /// vector derived from the opcode.
    pub(crate) fn enter_extracode(&mut self, opcode: u32, nextpc: u32) {
        self.m[ERET] = nextpc;
        self.m[SPSW] = (self.m[PSW]
            & (PSW_INTR_DISABLE | PSW_MMAP_DISABLE | PSW_PROT_DISABLE))
            | supervisor_bits(self.ruu);
        self.m[PSW] =
            PSW_INTR_DISABLE | PSW_MMAP_DISABLE | PSW_PROT_DISABLE | PSW_INTR_HALT;
        self.m[14] = self.aex;
        self.ruu = set_supervisor(self.ruu, SPSW_EXTRACODE);
        self.pc = if opcode <= 0o77 {
            0o500 + opcode
        } else {
            0o540 + (opcode >> 3)
        };
        self.ruu &= !RUU_RIGHT_INSTR;
    }

    /// Step past the faulting half-instruction so that выпр resumes at the
    /// one after it.
    fn advance_past_fault(&mut self) {
        if self.ruu & RUU_RIGHT_INSTR != 0 {
            self.pc += 1;
        }
        self.ruu ^= RUU_RIGHT_INSTR;
    }

    /// The single fault-handling site. Applies the stack correction, then
    /// either returns a stop code to the caller or converts the fault into
    /// an internal interrupt with the matching РПР bits. A second fault
    /// before the first handler instruction completes is unrecoverable.
    pub(crate) fn handle_fault(&mut self, fault: SvsStatus) -> Option<SvsStatus> {
        log::debug!("cpu{} --- {fault}", self.index);
        self.m[0o17] = self.m[0o17].wrapping_add_signed(self.corr_stack);

        // The halt bits ПоП and ПоК stop the machine on internal-interrupt
        // and check-class faults respectively. When they are clear the
        // fault becomes an internal interrupt; faults that completed their
        // instruction advance PC first so выпр continues behind them,
        // marking SPSW accordingly.
        match fault {
            SvsStatus::Rwatch | SvsStatus::Wwatch => {
                // Step back one half-instruction to re-execute it.
                if self.ruu & RUU_RIGHT_INSTR == 0 {
                    self.pc = self.pc.wrapping_sub(1);
                }
                self.ruu ^= RUU_RIGHT_INSTR;
                return Some(fault);
            }
            SvsStatus::BadCmd => {
                if self.m[PSW] & PSW_INTR_HALT != 0 {
                    return Some(fault);
                }
                self.op_int_internal();
                // SPSW_NEXT_RK does not matter for this interrupt.
                self.rpr |= RPR_ILL_INSN;
            }
            SvsStatus::InsnCheck => {
                if self.m[PSW] & PSW_CHECK_HALT != 0 {
                    return Some(fault);
                }
                self.op_int_internal();
                // SPSW_NEXT_RK must be 0 here; it already is.
                self.rpr |= RPR_INSN_CHECK;
            }
            SvsStatus::InsnProt => {
                if self.m[PSW] & PSW_INTR_HALT != 0 {
                    return Some(fault);
                }
                self.advance_past_fault();
                self.op_int_internal();
                self.m[SPSW] |= SPSW_NEXT_RK;
                self.rpr |= RPR_INSN_PROT;
            }
            SvsStatus::OperandProt => {
                // No halt check: ДИСПАК runs with ПоП set and an operand
                // protection fault must still interrupt.
                self.advance_past_fault();
                self.op_int_internal();
                self.m[SPSW] |= SPSW_NEXT_RK;
                // The offending virtual page goes to bits 9..5.
                self.rpr |= RPR_OPRND_PROT;
                self.rpr = rpr_set_page(self.rpr, u64::from(self.bad_addr));
            }
            SvsStatus::RamCheck => {
                if self.m[PSW] & PSW_CHECK_HALT != 0 {
                    return Some(fault);
                }
                self.op_int_internal();
                // The offending interleaved block number goes to bits 3..1.
                self.rpr |= RPR_CHECK | RPR_RAM_CHECK;
                self.rpr = rpr_set_block(self.rpr, u64::from(self.bad_addr));
            }
            SvsStatus::CacheCheck => {
                if self.m[PSW] & PSW_CHECK_HALT != 0 {
                    return Some(fault);
                }
                self.op_int_internal();
                self.rpr |= RPR_CHECK;
                self.rpr &= !RPR_RAM_CHECK;
                self.rpr = rpr_set_block(self.rpr, u64::from(self.bad_addr));
            }
            SvsStatus::InsnAddrMatch => {
                if self.m[PSW] & PSW_INTR_HALT != 0 {
                    return Some(fault);
                }
                self.advance_past_fault();
                self.op_int_internal();
                self.m[SPSW] |= SPSW_NEXT_RK;
                self.rpr |= RPR_BREAKPOINT;
            }
            SvsStatus::LoadAddrMatch => {
                if self.m[PSW] & PSW_INTR_HALT != 0 {
                    return Some(fault);
                }
                self.advance_past_fault();
                self.op_int_internal();
                self.m[SPSW] |= SPSW_NEXT_RK;
                self.rpr |= RPR_WATCHPT_R;
            }
            SvsStatus::StoreAddrMatch => {
                if self.m[PSW] & PSW_INTR_HALT != 0 {
                    return Some(fault);
                }
                self.advance_past_fault();
                self.op_int_internal();
                self.m[SPSW] |= SPSW_NEXT_RK;
                self.rpr |= RPR_WATCHPT_W;
            }
            SvsStatus::Ovfl => {
                // An ALU fault stops the machine only when АВОСТ is not
                // disabled and one of the halt bits is set.
                if self.ruu & RUU_AVOST_DISABLE == 0
                    && self.m[PSW] & (PSW_INTR_HALT | PSW_CHECK_HALT) != 0
                {
                    return Some(fault);
                }
                self.op_int_internal();
                self.rpr |= RPR_OVERFLOW | RPR_RAM_CHECK;
            }
            SvsStatus::DivZero => {
                if self.ruu & RUU_AVOST_DISABLE == 0
                    && self.m[PSW] & (PSW_INTR_HALT | PSW_CHECK_HALT) != 0
                {
                    return Some(fault);
                }
                self.op_int_internal();
                self.rpr |= RPR_DIVZERO | RPR_RAM_CHECK;
            }
            // Halt, debugger stops and everything unrecoverable go
            // straight to the caller.
            _ => return Some(fault),
        }

        if self.in_interrupt {
            return Some(SvsStatus::DoubleIntr);
        }
        self.in_interrupt = true;
        None
    }
}
