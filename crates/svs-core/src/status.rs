//! Simulator status codes.
//!
//! One enum covers both roles the original stop codes played: the value
//! `simulate` returns to the caller, and the fault channel that unwinds from
//! deep inside the ALU or MMU back to the dispatch loop. Discriminants are
//! part of the external ABI and never change.

use thiserror::Error;

/// Stop and fault codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u8)]
pub enum SvsStatus {
    /// Still running; never returned by `simulate`.
    #[error("no error")]
    Ok = 0,
    /// Stop instruction in supervisor mode.
    #[error("halt")]
    Halt = 1,
    /// Emulator breakpoint.
    #[error("breakpoint")]
    Ibkpt = 2,
    /// Emulator read watchpoint.
    #[error("read watchpoint")]
    Rwatch = 3,
    /// Emulator write watchpoint.
    #[error("write watchpoint")]
    Wwatch = 4,
    /// Runaway execution beyond the address space.
    #[error("run out of memory limits")]
    Runout = 5,
    /// Illegal or privileged instruction.
    #[error("illegal instruction")]
    BadCmd = 6,
    /// A data-tagged word was fetched for execution.
    #[error("instruction check")]
    InsnCheck = 7,
    /// Paging protection tripped during fetch.
    #[error("instruction in a foreign page")]
    InsnProt = 8,
    /// Paging protection tripped during load or store.
    #[error("operand in a foreign page")]
    OperandProt = 9,
    /// RAM parity check.
    #[error("RAM check")]
    RamCheck = 10,
    /// Write-cache parity check.
    #[error("cache check")]
    CacheCheck = 11,
    /// Arithmetic overflow.
    #[error("arithmetic overflow")]
    Ovfl = 12,
    /// Division by zero or by a denormalized divisor.
    #[error("division by zero")]
    DivZero = 13,
    /// A second internal interrupt before the first was serviced.
    #[error("double internal interrupt")]
    DoubleIntr = 14,
    /// Reading an unformatted drum.
    #[error("unformatted drum data")]
    DrumInvData = 15,
    /// Reading an unformatted disk.
    #[error("unformatted disk data")]
    DiskInvData = 16,
    /// Hardware instruction-address match.
    #[error("instruction address match")]
    InsnAddrMatch = 17,
    /// Hardware operand-address match on load.
    #[error("load address match")]
    LoadAddrMatch = 18,
    /// Hardware operand-address match on store.
    #[error("store address match")]
    StoreAddrMatch = 19,
    /// Unimplemented device or special-register access.
    #[error("unimplemented")]
    Unimplemented = 20,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_are_stable() {
        assert_eq!(SvsStatus::Ok as u8, 0);
        assert_eq!(SvsStatus::Halt as u8, 1);
        assert_eq!(SvsStatus::DivZero as u8, 13);
        assert_eq!(SvsStatus::Unimplemented as u8, 20);
    }

    #[test]
    fn displays_are_short() {
        assert_eq!(SvsStatus::Halt.to_string(), "halt");
        assert_eq!(SvsStatus::InsnCheck.to_string(), "instruction check");
    }
}
