//! Shared primitives for the SVS (СВС) emulator.
//!
//! The SVS is a 48-bit word-addressed multiprocessor of the BESM-6 family.
//! This crate holds the types every component agrees on: the hardware bit
//! numbering over 48-bit words, the 5-bit memory tags, the word+tag physical
//! memory, and the simulator status codes.

pub mod memory;
pub mod status;
pub mod tag;
pub mod word;

pub use memory::{MEM_SIZE, Memory, SharedMemory};
pub use status::SvsStatus;
