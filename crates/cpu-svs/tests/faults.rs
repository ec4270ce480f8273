//! Fault delivery, PC adjustment and debugger stops.
//!
//! These programs exercise the single fault-handling site: supervisor
//! gating, tag checks, protection faults with their РПР page field, the
//! halt-bit policy, watchpoints with the stack correction, and the
//! double-interrupt stop.

use cpu_svs::flags::{
    RPR_ILL_INSN, RPR_OPRND_PROT, RPR_OVERFLOW, RPR_PAGE_MASK, RUU_RIGHT_INSTR, SPSW_INTR_DISABLE,
    SPSW_MMAP_DISABLE, SPSW_NEXT_RK, SPSW_PROT_DISABLE,
};
use cpu_svs::{Processor, SvsStatus};

const ATX: u32 = 0o000;
const REG: u32 = 0o002;
const XTA: u32 = 0o010;
const E_PLUS_N: u32 = 0o034;
const ATI: u32 = 0o040;

const UTC: u32 = 0o220;
const VTM: u32 = 0o240;
const UJ: u32 = 0o300;
const IRET_OP: u32 = 0o320;
const STOP: u32 = 0o330;

fn boot() -> Processor {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut cpu = Processor::new_standalone(0);
    cpu.reset();
    cpu
}

fn stop_pass(cpu: &mut Processor, addr: u32) {
    cpu.store_instruction(addr, 6, STOP, 0o12345, 0, UTC, 0);
}

fn stop_fail(cpu: &mut Processor, addr: u32) {
    cpu.store_instruction(addr, 2, STOP, 0o76543, 0, UTC, 0);
}

/// Set up a выпр into user mode at `target` with the given SPSW mode bits,
/// starting from 0o10. The entry code occupies 0o10..0o14.
fn drop_to_user(cpu: &mut Processor, spsw: u32, target: u32) {
    cpu.store_data(0o76, u64::from(spsw));
    cpu.store_data(0o77, u64::from(target));
    cpu.store_instruction(0o10, 0, XTA, 0o76, 0, ATI, 0o27);
    cpu.store_instruction(0o11, 0, XTA, 0o77, 0, ATI, 0o33);
    cpu.store_instruction(0o12, 3, IRET_OP, 0, 0, UTC, 0);
}

#[test]
fn special_register_port_is_supervisor_only() {
    let mut cpu = boot();
    drop_to_user(
        &mut cpu,
        SPSW_MMAP_DISABLE | SPSW_PROT_DISABLE | SPSW_INTR_DISABLE,
        0o20,
    );
    cpu.store_instruction(0o20, 0, REG, 0o237, 0, UTC, 0);
    stop_pass(&mut cpu, 0o500);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::Halt);
    assert_eq!(cpu.pc(), 0o500);
    assert_ne!(cpu.rpr() & RPR_ILL_INSN, 0);
    // The gated port must not have touched ACC; it still holds the return
    // address loaded during the выпр setup.
    assert_eq!(cpu.acc(), 0o20);
}

#[test]
fn full_width_opcodes_are_supervisor_only() {
    let mut cpu = boot();
    drop_to_user(
        &mut cpu,
        SPSW_MMAP_DISABLE | SPSW_PROT_DISABLE | SPSW_INTR_DISABLE,
        0o20,
    );
    // счп in user mode.
    cpu.store_instruction(0o20, 0, 0o033, 0o100, 0, UTC, 0);
    stop_pass(&mut cpu, 0o500);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::Halt);
    assert_eq!(cpu.pc(), 0o500);
    assert_ne!(cpu.rpr() & RPR_ILL_INSN, 0);
}

#[test]
fn fetching_a_number_tagged_word_is_an_instruction_check() {
    let mut cpu = boot();
    cpu.store_data(0o20, 0);
    cpu.store_instruction(0o10, 0, UJ, 0o20, 0, UTC, 0);

    cpu.set_pc(0o10);
    // The reset-time ПоК bit stops the machine on check faults.
    assert_eq!(cpu.simulate(), SvsStatus::InsnCheck);
    assert_eq!(cpu.pc(), 0o20);
}

#[test]
fn double_interrupt_is_unrecoverable() {
    let mut cpu = boot();
    drop_to_user(
        &mut cpu,
        SPSW_MMAP_DISABLE | SPSW_PROT_DISABLE | SPSW_INTR_DISABLE,
        0o20,
    );
    cpu.store_instruction(0o20, 0, REG, 0o237, 0, UTC, 0);
    // The interrupt vector holds a data word, so the very first handler
    // fetch faults again.
    cpu.store_data(0o500, 0);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::DoubleIntr);
}

#[test]
fn operand_protection_advances_past_the_faulting_instruction() {
    let mut cpu = boot();
    // Identity-map user pages 0..3 (page 0 keeps descriptor 0), protect
    // page 1, then drop to user mode with mapping and protection both live.
    let identity = (1u64 << 12) | (2 << 24) | (3 << 36);
    cpu.store_data(0o100, 0b10);
    cpu.store_data(0o101, identity);
    cpu.store_instruction(0o14, 0, XTA, 0o100, 0, REG, 0o30);
    cpu.store_instruction(0o15, 0, XTA, 0o101, 0, REG, 0o20);
    cpu.store_instruction(0o16, 0, UJ, 0o10, 0, UTC, 0);
    drop_to_user(&mut cpu, SPSW_INTR_DISABLE, 0o20);
    cpu.store_instruction(0o20, 0, XTA, 0o2000, 0, UTC, 0);
    stop_pass(&mut cpu, 0o500);

    cpu.set_pc(0o14);
    assert_eq!(cpu.simulate(), SvsStatus::Halt);
    assert_eq!(cpu.pc(), 0o500);
    assert_ne!(cpu.rpr() & RPR_OPRND_PROT, 0);
    assert_eq!((cpu.rpr() & RPR_PAGE_MASK) >> 4, 1, "faulting page latched");
    // выпр must resume past the faulting word.
    assert_eq!(cpu.m(0o33), 0o21);
    assert_ne!(cpu.m(0o27) & SPSW_NEXT_RK, 0);
}

#[test]
fn exponent_overflow_interrupts_under_avost_disable() {
    let mut cpu = boot();
    cpu.store_data(0o100, 0o4050000000000000); // 1.0
    cpu.store_instruction(0o10, 0, XTA, 0o100, 0, E_PLUS_N, 0o177);
    stop_fail(&mut cpu, 0o11);
    stop_pass(&mut cpu, 0o500);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::Halt);
    assert_eq!(cpu.pc(), 0o500);
    assert_eq!(cpu.rpr() & RPR_OVERFLOW, RPR_OVERFLOW);
    // The handler sees the faulting value: exponent truncated to 7 bits,
    // mantissa intact.
    assert_eq!(cpu.acc(), 1 << 39);
}

#[test]
fn exponent_overflow_stops_when_avost_enabled() {
    let mut cpu = boot();
    cpu.store_data(0o100, 0o4050000000000000);
    cpu.store_instruction(0o10, 0, REG, 0o100, 0, XTA, 0o100);
    cpu.store_instruction(0o11, 0, E_PLUS_N, 0o177, 0, UTC, 0);
    stop_fail(&mut cpu, 0o12);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::Ovfl);
}

#[test]
fn breakpoint_stops_before_execution() {
    let mut cpu = boot();
    cpu.store_instruction(0o10, 0, UTC, 0, 0, UTC, 0);
    stop_fail(&mut cpu, 0o11);
    cpu.set_breakpoint(0o11);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::Ibkpt);
    assert_eq!(cpu.pc(), 0o11);
}

#[test]
fn read_watch_mid_pop_restores_the_stack_pointer() {
    let mut cpu = boot();
    cpu.store_data(0o100, 0o111);
    cpu.store_instruction(0o10, 0o17, VTM, 0o2000, 0, XTA, 0o100);
    cpu.store_instruction(0o11, 0o17, ATX, 0, 0, UTC, 0);
    cpu.store_instruction(0o12, 0o17, XTA, 0, 0, UTC, 0);
    stop_pass(&mut cpu, 0o13);
    cpu.set_read_watch(0o2000);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::Rwatch);
    // The pre-decrement was undone and the pop will re-execute.
    assert_eq!(cpu.m(0o17), 0o2001);
    assert_eq!(cpu.pc(), 0o12);
    assert_eq!(cpu.ruu() & RUU_RIGHT_INSTR, 0);

    cpu.clear_watches();
    assert_eq!(cpu.simulate(), SvsStatus::Halt);
    assert_eq!(cpu.pc(), 0o13);
    assert_eq!(cpu.acc(), 0o111);
    assert_eq!(cpu.m(0o17), 0o2000);
}

#[test]
fn write_watch_steps_back_to_reexecute() {
    let mut cpu = boot();
    cpu.store_instruction(0o10, 0, ATX, 0o2345, 0, UTC, 0);
    stop_pass(&mut cpu, 0o11);
    cpu.set_write_watch(0o2345);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::Wwatch);
    assert_eq!(cpu.pc(), 0o10);
    assert_eq!(cpu.ruu() & RUU_RIGHT_INSTR, 0);
}

#[test]
fn dwp_load_match_stops_with_intr_halt_set() {
    let mut cpu = boot();
    cpu.store_data(0o100, 0o2000);
    // Arm M[DWP]; with mapping disabled the register gets the physical
    // marker and compares against physical addresses.
    cpu.store_instruction(0o10, 0, XTA, 0o100, 0, ATI, 0o35);
    cpu.store_instruction(0o11, 0, XTA, 0o2000, 0, UTC, 0);
    stop_fail(&mut cpu, 0o12);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::LoadAddrMatch);
}

#[test]
fn dwp_store_match_requires_the_write_watch_bit() {
    let mut cpu = boot();
    // Rewrite the PSW with the write-watch bit on top of the reset state.
    cpu.store_data(0o100, 0o2037);
    cpu.store_data(0o101, 0o2000);
    cpu.store_instruction(0o10, 0, XTA, 0o100, 0, ATI, 0o21);
    cpu.store_instruction(0o11, 0, XTA, 0o101, 0, ATI, 0o35);
    cpu.store_instruction(0o12, 0, ATX, 0o2000, 0, UTC, 0);
    stop_fail(&mut cpu, 0o13);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::StoreAddrMatch);
}

#[test]
fn user_mode_stop_becomes_extracode_63() {
    let mut cpu = boot();
    drop_to_user(
        &mut cpu,
        SPSW_MMAP_DISABLE | SPSW_PROT_DISABLE | SPSW_INTR_DISABLE,
        0o20,
    );
    cpu.store_instruction(0o20, 2, STOP, 0o76543, 0, UTC, 0);
    stop_pass(&mut cpu, 0o563);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::Halt);
    assert_eq!(cpu.pc(), 0o563);
}

#[test]
fn runaway_supervisor_execution_stops() {
    let mut cpu = boot();
    cpu.store_instruction(0o10, 0, UJ, 0o77777, 0, UTC, 0);
    cpu.store_instruction(0o77777, 0, UTC, 0, 0, UTC, 0);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::Runout);
    assert_eq!(cpu.pc(), 0o100000);
}

#[test]
fn external_interrupt_enters_vector_501() {
    let mut cpu = boot();
    // Unmask the timer bit and clear the PSW interrupt disable, then raise
    // the timer line as the clock device would.
    cpu.store_data(0o100, 0o10); // ГРМ := timer
    cpu.store_data(0o101, 0o37); // PSW without БлПр
    cpu.store_instruction(0o10, 0, XTA, 0o100, 0, REG, 0o46);
    cpu.store_instruction(0o11, 0, XTA, 0o101, 0, ATI, 0o21);
    cpu.store_instruction(0o12, 0, UTC, 0, 0, UTC, 0);
    stop_fail(&mut cpu, 0o13);
    stop_pass(&mut cpu, 0o501);

    cpu.set_pc(0o10);
    cpu.raise_external(0o10); // GRVP_TIMER
    assert_eq!(cpu.simulate(), SvsStatus::Halt);
    assert_eq!(cpu.pc(), 0o501);
    // The return address points at the instruction that would have run.
    assert_eq!(cpu.m(0o33), 0o12);
}

#[test]
fn m0_stays_zero() {
    let mut cpu = boot();
    cpu.store_data(0o100, 0o7777);
    // уи 0 tries to write M[0]; уиа (0) likewise.
    cpu.store_instruction(0o10, 0, XTA, 0o100, 0, ATI, 0);
    cpu.store_instruction(0o11, 0, VTM, 0o123, 0, UTC, 0);
    stop_pass(&mut cpu, 0o12);

    cpu.set_pc(0o10);
    assert_eq!(cpu.simulate(), SvsStatus::Halt);
    assert_eq!(cpu.m(0), 0);
}
