//! Memory management unit.
//!
//! Virtual addresses are 15 bits: 32 pages of 1024 words. Each of the eight
//! page-mapping registers (РП for user mode, РПС for supervisor mode) packs
//! four 12-bit page descriptors; accesses go through the per-page expansion
//! in `utlb`/`stlb`. The protection register РЗ carries one bit per virtual
//! page. Every word moves together with its tag, and fetching anything that
//! is not instruction-tagged is an instruction check.

use svs_core::SvsStatus;
use svs_core::tag::{TAG_NUMBER48, is_48bit, is_insn48};
use svs_core::word::{ADDR_MASK, BITS48, bbit};

use crate::flags::{DWP, IBP, PSW, PSW_MMAP_DISABLE, PSW_PROT_DISABLE, PSW_WRITE_WATCH, is_supervisor};
use crate::processor::Processor;

/// Words per page.
const PAGE_SIZE: u32 = 1024;
/// Physical page number inside a 12-bit descriptor.
const DESC_PAGE_MASK: u32 = 0x3FF;
/// Marker bit 16 of M[IBP]/M[DWP]: the register holds a physical address.
const PHYS_MARKER: u32 = bbit(16);

enum Access {
    Fetch,
    Data,
}

impl Processor {
    /// Expand РП/РПС into the per-page caches. Run on reset and whenever a
    /// page register is deposited from outside the instruction stream.
    pub(crate) fn mmu_setup(&mut self) {
        for idx in 0..8 {
            self.expand_rp(idx, false);
            self.expand_rp(idx, true);
        }
    }

    fn expand_rp(&mut self, idx: usize, supervisor: bool) {
        let word = if supervisor { self.rps[idx] } else { self.rp[idx] };
        for sub in 0..4 {
            let desc = ((word >> (12 * sub)) & 0xFFF) as u32;
            if supervisor {
                self.stlb[idx * 4 + sub] = desc;
            } else {
                self.utlb[idx * 4 + sub] = desc;
            }
        }
    }

    /// Write a page-register group and refresh the matching cache slots.
    pub(crate) fn mmu_set_rp(&mut self, idx: usize, word: u64, supervisor: bool) {
        let word = word & BITS48;
        if supervisor {
            self.rps[idx] = word;
        } else {
            self.rp[idx] = word;
        }
        self.expand_rp(idx, supervisor);
        log::trace!(
            "cpu{} mmu: {} map group {} = {:016o}",
            self.index,
            if supervisor { "supervisor" } else { "user" },
            idx,
            word
        );
    }

    /// Replace eight bits of the protection register.
    pub(crate) fn mmu_set_protection(&mut self, idx: usize, word: u64) {
        let shift = idx * 8;
        self.rz = (self.rz & !(0xFF << shift)) | ((word & 0xFF) as u32) << shift;
        log::trace!("cpu{} mmu: РЗ = {:011o}", self.index, self.rz);
    }

    /// Virtual-to-physical translation with the protection check. On a
    /// protection fault the offending virtual page is latched for the
    /// interrupt handler.
    fn translate(&mut self, vaddr: u32, access: &Access) -> Result<u32, SvsStatus> {
        let vaddr = vaddr & ADDR_MASK;
        if self.m[PSW] & PSW_MMAP_DISABLE != 0 {
            return Ok(vaddr);
        }
        let page = (vaddr / PAGE_SIZE) as usize;
        if self.m[PSW] & PSW_PROT_DISABLE == 0 && self.rz & (1 << page) != 0 {
            self.bad_addr = page as u32;
            return Err(match access {
                Access::Fetch => SvsStatus::InsnProt,
                Access::Data => SvsStatus::OperandProt,
            });
        }
        let desc = if is_supervisor(self.ruu) {
            self.stlb[page]
        } else {
            self.utlb[page]
        };
        Ok((desc & DESC_PAGE_MASK) * PAGE_SIZE + (vaddr % PAGE_SIZE))
    }

    /// Does the given address-match register point at this access?
    /// Bit 16 selects physical comparison, otherwise virtual.
    fn addr_match(&self, reg: usize, vaddr: u32, paddr: u32) -> bool {
        let watch = self.m[reg];
        if watch == 0 {
            return false;
        }
        if watch & PHYS_MARKER != 0 {
            watch == (paddr | PHYS_MARKER)
        } else {
            watch == (vaddr & ADDR_MASK)
        }
    }

    /// Translate and load an instruction word, returning it with its
    /// physical address. In supervisor mode addresses 0..7 fetch from the
    /// console switch registers.
    pub(crate) fn mmu_fetch(&mut self, vaddr: u32) -> Result<(u64, u32), SvsStatus> {
        let vaddr = vaddr & ADDR_MASK;
        if vaddr < 8 && is_supervisor(self.ruu) {
            return Ok((self.pult[vaddr as usize], vaddr));
        }
        let paddr = self.translate(vaddr, &Access::Fetch)?;
        if self.addr_match(IBP, vaddr, paddr) {
            return Err(SvsStatus::InsnAddrMatch);
        }
        let (word, tag) = self.memory.borrow().read(paddr as usize);
        if !is_insn48(tag) {
            return Err(SvsStatus::InsnCheck);
        }
        Ok((word >> 16, paddr))
    }

    /// Translate and load a data word.
    pub(crate) fn mmu_load(&mut self, vaddr: u32) -> Result<u64, SvsStatus> {
        let vaddr = vaddr & ADDR_MASK;
        if vaddr < 8 && is_supervisor(self.ruu) {
            return Ok(self.pult[vaddr as usize]);
        }
        if self.read_watches.contains(&vaddr) {
            return Err(SvsStatus::Rwatch);
        }
        let paddr = self.translate(vaddr, &Access::Data)?;
        if self.addr_match(DWP, vaddr, paddr) {
            return Err(SvsStatus::LoadAddrMatch);
        }
        Ok(self.memory.borrow().word(paddr as usize) >> 16)
    }

    /// Translate and store a number-tagged word. Stores into the switch
    /// register window are ignored.
    pub(crate) fn mmu_store(&mut self, vaddr: u32, word: u64) -> Result<(), SvsStatus> {
        let vaddr = vaddr & ADDR_MASK;
        if vaddr < 8 && is_supervisor(self.ruu) {
            return Ok(());
        }
        if self.write_watches.contains(&vaddr) {
            return Err(SvsStatus::Wwatch);
        }
        let paddr = self.translate(vaddr, &Access::Data)?;
        if self.m[PSW] & PSW_WRITE_WATCH != 0 && self.addr_match(DWP, vaddr, paddr) {
            return Err(SvsStatus::StoreAddrMatch);
        }
        self.memory
            .borrow_mut()
            .write(paddr as usize, (word & BITS48) << 16, TAG_NUMBER48);
        Ok(())
    }

    /// Full-width load for the supervisor opcodes. With `tag_check` a word
    /// that is not 48-bit tagged raises a RAM check, latching the
    /// interleaved block number.
    pub(crate) fn mmu_load64(&mut self, vaddr: u32, tag_check: bool) -> Result<u64, SvsStatus> {
        let paddr = self.translate(vaddr, &Access::Data)?;
        let (word, tag) = self.memory.borrow().read(paddr as usize);
        if tag_check && !is_48bit(tag) {
            self.bad_addr = vaddr & 7;
            return Err(SvsStatus::RamCheck);
        }
        Ok(word)
    }

    /// Full-width store for the supervisor opcodes.
    pub(crate) fn mmu_store64(&mut self, vaddr: u32, word: u64) -> Result<(), SvsStatus> {
        let paddr = self.translate(vaddr, &Access::Data)?;
        self.memory
            .borrow_mut()
            .write(paddr as usize, word, TAG_NUMBER48);
        Ok(())
    }
}
