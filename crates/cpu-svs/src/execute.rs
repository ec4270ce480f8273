//! Instruction dispatch.
//!
//! One call of [`one_instr`] executes the half-instruction at
//! (PC, РУУ.right): fetch through the MMU, decode, form the effective
//! address with the modifier register and an optional M[MOD] adjustment,
//! run the opcode, and finish with the modifier handover for the next
//! instruction and the external-request update. Any fault propagates back
//! to the dispatch loop through the `Result` channel.
//!
//! [`one_instr`]: Processor::one_instr

use svs_core::SvsStatus;
use svs_core::word::{BIT41, BIT48, BIT49, BITS40, BITS41, BITS48, addr15, bbit, bits};

use crate::alu::{count_ones, highest_bit, pack, unpack};
use crate::decode::{Decoded, decode, is_extracode};
use crate::flags::{
    DWP, IBP, MOD, PSW, PSW_CHECK_HALT, PSW_INTR_DISABLE, PSW_MMAP_DISABLE, PSW_PROT_DISABLE,
    PSW_WRITE_WATCH, SPSW, SPSW_EXTRACODE, SPSW_INTERRUPT, SPSW_INTR_DISABLE, SPSW_MMAP_DISABLE,
    SPSW_MOD_RK, SPSW_PROT_DISABLE, SPSW_RIGHT_INSTR, GRVP_REQUEST, RUU_MOD_RK, RUU_RIGHT_INSTR,
    is_additive, is_logical, is_multiplicative, is_supervisor, set_additive, set_logical,
    set_multiplicative, set_supervisor,
};
use crate::processor::Processor;
use crate::trace::TraceMode;

/// Plausible execution time in 100 ns ticks given the control-unit and ALU
/// tick counts, assuming the two units overlap half the time.
const fn mean_time(x: u32, y: u32) -> u32 {
    if x > y { x + y / 2 } else { x / 2 + y }
}

impl Processor {
    /// Execute one half-instruction.
    pub(crate) fn one_instr(&mut self) -> Result<(), SvsStatus> {
        self.corr_stack = 0;
        let (word, paddr) = self.mmu_fetch(self.pc)?;
        self.rk = if self.ruu & RUU_RIGHT_INSTR != 0 {
            word as u32
        } else {
            (word >> 24) as u32
        } & bits(24) as u32;

        let Decoded {
            reg,
            opcode,
            mut addr,
        } = decode(self.rk);

        if self.trace >= TraceMode::Instructions
            || (self.trace == TraceMode::Extracodes && is_extracode(opcode))
        {
            self.trace_opcode(paddr);
        }

        let nextpc = addr15(self.pc + 1);
        if self.ruu & RUU_RIGHT_INSTR != 0 {
            self.pc += 1;
            self.ruu &= !RUU_RIGHT_INSTR;
        } else {
            self.ruu |= RUU_RIGHT_INSTR;
        }

        if self.ruu & RUU_MOD_RK != 0 {
            addr = addr15(addr + self.m[MOD]);
        }
        let mut next_mod = 0;
        let mut delay;

        match opcode {
            0o000 => {
                // зп, atx
                self.aex = addr15(addr + self.m[reg]);
                self.mmu_store(self.aex, self.acc)?;
                if addr == 0 && reg == 0o17 {
                    self.m[0o17] = addr15(self.m[0o17] + 1);
                }
                delay = mean_time(3, 3);
            }
            0o001 => {
                // зпм, stx
                self.aex = addr15(addr + self.m[reg]);
                self.mmu_store(self.aex, self.acc)?;
                self.m[0o17] = addr15(self.m[0o17].wrapping_sub(1));
                self.corr_stack = 1;
                self.acc = self.mmu_load(self.m[0o17])?;
                self.rau = set_logical(self.rau);
                delay = mean_time(6, 6);
            }
            0o002 => {
                // рег
                self.aex = addr15(addr + self.m[reg]);
                if !is_supervisor(self.ruu) {
                    return Err(SvsStatus::BadCmd);
                }
                self.special_register();
                // A read sub-operation leaves the ALU in the logical group.
                if self.aex & 0o200 != 0 {
                    self.rau = set_logical(self.rau);
                }
                delay = mean_time(3, 3);
            }
            0o003 => {
                // счм, xts
                self.mmu_store(self.m[0o17], self.acc)?;
                self.m[0o17] = addr15(self.m[0o17] + 1);
                self.corr_stack = -1;
                self.aex = addr15(addr + self.m[reg]);
                self.acc = self.mmu_load(self.aex)?;
                self.rau = set_logical(self.rau);
                delay = mean_time(6, 6);
            }
            0o004 => {
                // сл, a+x
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                let val = self.mmu_load(self.aex)?;
                self.alu_add(val, false, false)?;
                self.rau = set_additive(self.rau);
                delay = mean_time(3, 11);
            }
            0o005 => {
                // вч, a-x
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                let val = self.mmu_load(self.aex)?;
                self.alu_add(val, false, true)?;
                self.rau = set_additive(self.rau);
                delay = mean_time(3, 11);
            }
            0o006 => {
                // вчоб, x-a
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                let val = self.mmu_load(self.aex)?;
                self.alu_add(val, true, false)?;
                self.rau = set_additive(self.rau);
                delay = mean_time(3, 11);
            }
            0o007 => {
                // вчаб, amx
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                let val = self.mmu_load(self.aex)?;
                self.alu_add(val, true, true)?;
                self.rau = set_additive(self.rau);
                delay = mean_time(3, 11);
            }
            0o010 => {
                // сч, xta
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                self.acc = self.mmu_load(self.aex)?;
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 3);
            }
            0o011 => {
                // и, aax
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                self.acc &= self.mmu_load(self.aex)?;
                self.rmr = 0;
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 4);
            }
            0o012 => {
                // нтж, aex
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                self.rmr = self.acc;
                self.acc ^= self.mmu_load(self.aex)?;
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 3);
            }
            0o013 => {
                // слц, arx
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                self.acc += self.mmu_load(self.aex)?;
                if self.acc & BIT49 != 0 {
                    self.acc = (self.acc + 1) & BITS48;
                }
                self.rmr = 0;
                self.rau = set_multiplicative(self.rau);
                delay = mean_time(3, 6);
            }
            0o014 => {
                // знак, avx
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                let sign = (self.mmu_load(self.aex)? >> 40) & 1 != 0;
                self.alu_change_sign(sign)?;
                self.rau = set_additive(self.rau);
                delay = mean_time(3, 5);
            }
            0o015 => {
                // или, aox
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                self.acc |= self.mmu_load(self.aex)?;
                self.rmr = 0;
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 4);
            }
            0o016 => {
                // дел, a/x
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                let val = self.mmu_load(self.aex)?;
                self.alu_divide(val)?;
                self.rau = set_multiplicative(self.rau);
                delay = mean_time(3, 50);
            }
            0o017 => {
                // умн, a*x
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                let val = self.mmu_load(self.aex)?;
                self.alu_multiply(val)?;
                self.rau = set_multiplicative(self.rau);
                delay = mean_time(3, 18);
            }
            0o020 => {
                // сбр, apx
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                self.acc = pack(self.acc, self.mmu_load(self.aex)?);
                self.rmr = 0;
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 53);
            }
            0o021 => {
                // рзб, aux
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                self.acc = unpack(self.acc, self.mmu_load(self.aex)?);
                self.rmr = 0;
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 53);
            }
            0o022 => {
                // чед, acx
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                self.acc = u64::from(count_ones(self.acc)) + self.mmu_load(self.aex)?;
                if self.acc & BIT49 != 0 {
                    self.acc = (self.acc + 1) & BITS48;
                }
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 56);
            }
            0o023 => {
                // нед, anx
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                if self.acc != 0 {
                    let n = highest_bit(self.acc);
                    // The accumulator's residue, excluding the found bit,
                    // lands in РМР starting from РМР's top bit.
                    self.alu_shift(48 - n as i32);
                    self.acc = u64::from(n) + self.mmu_load(self.aex)?;
                    if self.acc & BIT49 != 0 {
                        self.acc = (self.acc + 1) & BITS48;
                    }
                } else {
                    self.rmr = 0;
                    self.acc = self.mmu_load(self.aex)?;
                }
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 32);
            }
            0o024 => {
                // слп, e+x
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                let exp = (self.mmu_load(self.aex)? >> 41) as i32;
                self.alu_add_exponent(exp - 64)?;
                self.rau = set_multiplicative(self.rau);
                delay = mean_time(3, 5);
            }
            0o025 => {
                // вчп, e-x
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                let exp = (self.mmu_load(self.aex)? >> 41) as i32;
                self.alu_add_exponent(64 - exp)?;
                self.rau = set_multiplicative(self.rau);
                delay = mean_time(3, 5);
            }
            0o026 => {
                // сд, asx
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                let n = (self.mmu_load(self.aex)? >> 41) as i32 - 64;
                self.alu_shift(n);
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 4 + n.unsigned_abs());
            }
            0o027 => {
                // рж, xtr
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                self.rau = ((self.mmu_load(self.aex)? >> 41) & 0o77) as u32;
                delay = mean_time(3, 3);
            }
            0o030 => {
                // счрж, rte
                self.aex = addr15(addr + self.m[reg]);
                self.acc = u64::from(self.rau & self.aex & 0o177) << 41;
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 3);
            }
            0o031 => {
                // счмр, yta
                self.aex = addr15(addr + self.m[reg]);
                if is_logical(self.rau) {
                    self.acc = self.rmr;
                } else {
                    let x = self.rmr;
                    self.acc = (self.acc & !BITS41) | (self.rmr & BITS40);
                    self.alu_add_exponent((self.aex & 0o177) as i32 - 64)?;
                    self.rmr = x;
                }
                delay = mean_time(3, 5);
            }
            0o032 => {
                // зпп, full-width store
                self.aex = addr15(addr + self.m[reg]);
                if !is_supervisor(self.ruu) {
                    return Err(SvsStatus::BadCmd);
                }
                self.mmu_store64(self.aex, (self.acc << 16) | ((self.rmr >> 32) & bits(16)))?;
                delay = mean_time(3, 8);
            }
            0o033 => {
                // счп, full-width load
                self.aex = addr15(addr + self.m[reg]);
                if !is_supervisor(self.ruu) {
                    return Err(SvsStatus::BadCmd);
                }
                self.acc = self.mmu_load64(self.aex, true)?;
                self.rmr = (self.acc & bits(16)) << 32;
                self.acc >>= 16;
                delay = mean_time(3, 8);
            }
            0o034 => {
                // слпа, e+n
                self.aex = addr15(addr + self.m[reg]);
                self.alu_add_exponent((self.aex & 0o177) as i32 - 64)?;
                self.rau = set_multiplicative(self.rau);
                delay = mean_time(3, 5);
            }
            0o035 => {
                // вчпа, e-n
                self.aex = addr15(addr + self.m[reg]);
                self.alu_add_exponent(64 - (self.aex & 0o177) as i32)?;
                self.rau = set_multiplicative(self.rau);
                delay = mean_time(3, 5);
            }
            0o036 => {
                // сда, asn
                self.aex = addr15(addr + self.m[reg]);
                let n = (self.aex & 0o177) as i32 - 64;
                self.alu_shift(n);
                self.rau = set_logical(self.rau);
                delay = mean_time(3, 4 + n.unsigned_abs());
            }
            0o037 => {
                // ржа, ntr
                self.aex = addr15(addr + self.m[reg]);
                self.rau = self.aex & 0o77;
                delay = mean_time(3, 3);
            }
            0o040 => {
                // уи, ati
                self.aex = addr15(addr + self.m[reg]);
                if is_supervisor(self.ruu) {
                    let idx = self.aex as usize & 0o37;
                    self.m[idx] = addr15(self.acc as u32);
                    // Breakpoint registers match physical or virtual
                    // addresses depending on the current mapping mode.
                    if self.m[PSW] & PSW_MMAP_DISABLE != 0 && (idx == IBP || idx == DWP) {
                        self.m[idx] |= bbit(16);
                    }
                } else {
                    self.m[self.aex as usize & 0o17] = addr15(self.acc as u32);
                }
                self.m[0] = 0;
                delay = mean_time(14, 3);
            }
            0o041 => {
                // уим, sti
                self.aex = addr15(addr + self.m[reg]);
                let rg = self.aex as usize & if is_supervisor(self.ruu) { 0o37 } else { 0o17 };
                let ad = addr15(self.acc as u32);
                if rg != 0o17 {
                    self.m[0o17] = addr15(self.m[0o17].wrapping_sub(1));
                    self.corr_stack = 1;
                }
                let src = if rg == 0o17 { ad } else { self.m[0o17] };
                self.acc = self.mmu_load(src)?;
                self.m[rg] = ad;
                if self.m[PSW] & PSW_MMAP_DISABLE != 0 && (rg == IBP || rg == DWP) {
                    self.m[rg] |= bbit(16);
                }
                self.m[0] = 0;
                self.rau = set_logical(self.rau);
                delay = mean_time(14, 3);
            }
            0o042 => {
                // счи, ita
                self.load_modifier(addr, reg);
                delay = mean_time(6, 3);
            }
            0o043 => {
                // счим, its
                self.mmu_store(self.m[0o17], self.acc)?;
                self.m[0o17] = addr15(self.m[0o17] + 1);
                self.load_modifier(addr, reg);
                delay = mean_time(9, 6);
            }
            0o044 => {
                // уии, mtj
                self.aex = addr;
                if is_supervisor(self.ruu) {
                    self.transfer_modifier(reg);
                } else {
                    self.m[self.aex as usize & 0o17] = self.m[reg];
                }
                self.m[0] = 0;
                delay = 6;
            }
            0o045 => {
                // сли, j+m
                self.aex = addr;
                if self.aex & 0o20 != 0 && is_supervisor(self.ruu) {
                    self.transfer_modifier(reg);
                } else {
                    let idx = self.aex as usize & 0o17;
                    self.m[idx] = addr15(self.m[idx] + self.m[reg]);
                }
                self.m[0] = 0;
                delay = 6;
            }
            0o046 => {
                // соп, special full-width load
                self.aex = addr;
                if !is_supervisor(self.ruu) {
                    return Err(SvsStatus::BadCmd);
                }
                self.acc = self.mmu_load64(self.aex, false)?;
                self.rmr = (self.acc & bits(16)) << 32;
                self.acc >>= 16;
                delay = 6;
            }
            0o047 => {
                // э47
                self.aex = addr;
                if !is_supervisor(self.ruu) {
                    return Err(SvsStatus::BadCmd);
                }
                let idx = self.aex as usize & 0o17;
                self.m[idx] = addr15(self.m[idx] + self.aex);
                self.m[0] = 0;
                delay = 6;
            }
            0o050..=0o077 | 0o200 | 0o210 => {
                // э50..э77, э20, э21
                self.aex = addr15(addr + self.m[reg]);
                self.enter_extracode(opcode, nextpc);
                delay = 7;
            }
            0o220 => {
                // мода, utc
                self.aex = addr15(addr + self.m[reg]);
                next_mod = self.aex;
                delay = 4;
            }
            0o230 => {
                // мод, wtc
                self.stack_pre(addr, reg);
                self.aex = addr15(addr + self.m[reg]);
                next_mod = addr15(self.mmu_load(self.aex)? as u32);
                delay = mean_time(13, 3);
            }
            0o240 => {
                // уиа, vtm
                self.aex = addr;
                self.m[reg] = addr;
                self.m[0] = 0;
                if is_supervisor(self.ruu) && reg == 0 {
                    self.set_psw_mode_bits(addr);
                }
                delay = 4;
            }
            0o250 => {
                // слиа, utm
                self.aex = addr15(addr + self.m[reg]);
                self.m[reg] = self.aex;
                self.m[0] = 0;
                if is_supervisor(self.ruu) && reg == 0 {
                    self.set_psw_mode_bits(addr);
                }
                delay = 4;
            }
            0o260 => {
                // по, uza
                self.aex = addr15(addr + self.m[reg]);
                self.rmr = self.acc;
                delay = mean_time(12, 3);
                let branch = if is_additive(self.rau) {
                    self.acc & BIT41 == 0
                } else if is_multiplicative(self.rau) {
                    self.acc & BIT48 != 0
                } else if is_logical(self.rau) {
                    self.acc == 0
                } else {
                    false
                };
                if branch {
                    self.pc = self.aex;
                    self.ruu &= !RUU_RIGHT_INSTR;
                    delay += 3;
                }
            }
            0o270 => {
                // пе, u1a
                self.aex = addr15(addr + self.m[reg]);
                self.rmr = self.acc;
                delay = mean_time(12, 3);
                let branch = if is_additive(self.rau) {
                    self.acc & BIT41 != 0
                } else if is_multiplicative(self.rau) {
                    self.acc & BIT48 == 0
                } else if is_logical(self.rau) {
                    self.acc != 0
                } else {
                    // Group-less РАУ branches unconditionally.
                    true
                };
                if branch {
                    self.pc = self.aex;
                    self.ruu &= !RUU_RIGHT_INSTR;
                    delay += 3;
                }
            }
            0o300 => {
                // пб, uj
                self.aex = addr15(addr + self.m[reg]);
                self.pc = self.aex;
                self.ruu &= !RUU_RIGHT_INSTR;
                delay = 7;
            }
            0o310 => {
                // пв, vjm
                self.aex = addr;
                self.m[reg] = nextpc;
                self.m[0] = 0;
                self.pc = addr;
                self.ruu &= !RUU_RIGHT_INSTR;
                delay = 7;
            }
            0o320 => {
                // выпр, iret
                self.aex = addr;
                if !is_supervisor(self.ruu) {
                    return Err(SvsStatus::BadCmd);
                }
                self.m[PSW] = (self.m[PSW] & PSW_WRITE_WATCH)
                    | (self.m[SPSW]
                        & (SPSW_INTR_DISABLE | SPSW_MMAP_DISABLE | SPSW_PROT_DISABLE));
                self.pc = self.m[(reg & 3) | 0o30];
                if self.m[SPSW] & SPSW_RIGHT_INSTR != 0 {
                    self.ruu |= RUU_RIGHT_INSTR;
                } else {
                    self.ruu &= !RUU_RIGHT_INSTR;
                }
                self.ruu = set_supervisor(
                    self.ruu,
                    self.m[SPSW] & (SPSW_EXTRACODE | SPSW_INTERRUPT),
                );
                if self.m[SPSW] & SPSW_MOD_RK != 0 {
                    next_mod = self.m[MOD];
                }
                delay = 7;
            }
            0o330 => {
                // стоп
                self.aex = addr15(addr + self.m[reg]);
                delay = 7;
                if is_supervisor(self.ruu) {
                    return Err(SvsStatus::Halt);
                }
                if self.m[PSW] & PSW_CHECK_HALT == 0 {
                    // In user mode the stop opcode acts as extracode э63.
                    self.enter_extracode(0o63, nextpc);
                }
                // With the check-halt bit set a user-mode stop does nothing.
            }
            0o340 | 0o360 => {
                // пио, vzm (э36 behaves the same, with a cache flush on the
                // real machine)
                self.aex = addr;
                delay = 4;
                if self.m[reg] == 0 {
                    self.pc = addr;
                    self.ruu &= !RUU_RIGHT_INSTR;
                    delay += 3;
                }
            }
            0o350 => {
                // пино, v1m
                self.aex = addr;
                delay = 4;
                if self.m[reg] != 0 {
                    self.pc = addr;
                    self.ruu &= !RUU_RIGHT_INSTR;
                    delay += 3;
                }
            }
            0o370 => {
                // цикл, vlm
                self.aex = addr;
                delay = 4;
                if self.m[reg] != 0 {
                    self.m[reg] = addr15(self.m[reg] + 1);
                    self.pc = addr;
                    self.ruu &= !RUU_RIGHT_INSTR;
                    delay += 3;
                }
            }
            _ => {
                // Unreachable: every short and long opcode has an arm.
                return Err(SvsStatus::Halt);
            }
        }

        if next_mod != 0 {
            // The next instruction is modified by M[MOD].
            self.m[MOD] = next_mod;
            self.ruu |= RUU_MOD_RK;
        } else {
            self.ruu &= !RUU_MOD_RK;
        }

        // Mirror pending inter-processor interrupts into ГРВП.
        if self.pop & self.rkp != 0 {
            self.grvp |= GRVP_REQUEST;
        } else {
            self.grvp &= !GRVP_REQUEST;
        }

        self.ticks += u64::from(delay);

        if self.trace == TraceMode::All {
            self.trace_registers();
        }
        Ok(())
    }

    /// The stack-popping address form: register 15 with a zero address
    /// pre-decrements the stack pointer and records the correction to apply
    /// should the instruction fault.
    fn stack_pre(&mut self, addr: u32, reg: usize) {
        if addr == 0 && reg == 0o17 {
            self.m[0o17] = addr15(self.m[0o17].wrapping_sub(1));
            self.corr_stack = 1;
        }
    }

    /// ACC := M[Aex], shared by счи and счим.
    fn load_modifier(&mut self, addr: u32, reg: usize) {
        self.aex = addr15(addr + self.m[reg]);
        let mask = if is_supervisor(self.ruu) { 0o37 } else { 0o17 };
        self.acc = u64::from(addr15(self.m[self.aex as usize & mask]));
        self.rau = set_logical(self.rau);
    }

    /// M[Aex] := M[reg], the supervisor arm of уии and сли.
    fn transfer_modifier(&mut self, reg: usize) {
        let idx = self.aex as usize & 0o37;
        self.m[idx] = self.m[reg];
        if self.m[PSW] & PSW_MMAP_DISABLE != 0 && (idx == IBP || idx == DWP) {
            self.m[idx] |= bbit(16);
        }
    }

    /// Writing modifier 0 in supervisor mode updates the PSW disable bits.
    fn set_psw_mode_bits(&mut self, addr: u32) {
        let mode = PSW_INTR_DISABLE | PSW_MMAP_DISABLE | PSW_PROT_DISABLE;
        self.m[PSW] = (self.m[PSW] & !mode) | (addr & mode);
    }
}
