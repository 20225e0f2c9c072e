//! Simulated hardware the pager runs on: a flat physical memory array,
//! the TLB register file and the address arithmetic of the processor.

mod memory;
mod tlb;
mod translation;

pub use memory::{MemoryError, PhysicalMemory};
pub use tlb::Tlb;
pub use translation::TranslationEntry;

/// Virtual page number of `vaddr`.
#[inline]
pub const fn page_from_address<const PAGE_SIZE: usize>(vaddr: u32) -> u32 {
    vaddr / PAGE_SIZE as u32
}

/// Byte offset of `vaddr` inside its page.
#[inline]
pub const fn offset_from_address<const PAGE_SIZE: usize>(vaddr: u32) -> u32 {
    vaddr % PAGE_SIZE as u32
}

#[inline]
pub const fn make_address<const PAGE_SIZE: usize>(page: u32, offset: u32) -> u32 {
    page * PAGE_SIZE as u32 + offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_split() {
        let vaddr = make_address::<1024>(5, 17);
        assert_eq!(vaddr, 5137);
        assert_eq!(page_from_address::<1024>(vaddr), 5);
        assert_eq!(offset_from_address::<1024>(vaddr), 17);
    }

    #[test]
    fn test_page_boundary() {
        assert_eq!(page_from_address::<512>(511), 0);
        assert_eq!(page_from_address::<512>(512), 1);
        assert_eq!(offset_from_address::<512>(512), 0);
    }
}
