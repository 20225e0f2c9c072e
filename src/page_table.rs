use std::sync::{Arc, Mutex, MutexGuard};

use machine::TranslationEntry;
use swap_manager::SwapSlot;

use crate::VmError;

/// Where the content of a virtual page currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Never loaded, or dropped clean: comes from the image or is zero.
    Absent,
    Resident(u32),
    Swapped(SwapSlot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub vpn: u32,
    pub state: PageState,
    pub read_only: bool,
    pub used: bool,
    pub dirty: bool,
    /// Content came back from swap, so the image can no longer reproduce it.
    pub swap_backed: bool,
}

impl PageTableEntry {
    fn new(vpn: u32, read_only: bool) -> Self {
        Self {
            vpn,
            state: PageState::Absent,
            read_only,
            used: false,
            dirty: false,
            swap_backed: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, PageState::Resident(_))
    }

    pub fn frame(&self) -> Option<u32> {
        match self.state {
            PageState::Resident(frame) => Some(frame),
            _ => None,
        }
    }

    /// Eviction has to preserve the content in swap.
    pub fn needs_swap(&self) -> bool {
        self.dirty || self.swap_backed
    }

    /// The hardware view of this entry. Non-resident pages come out invalid.
    pub fn translation(&self) -> TranslationEntry {
        TranslationEntry::new(
            self.vpn,
            self.frame().unwrap_or(0),
            self.is_valid(),
            self.read_only,
            self.used,
            self.dirty,
        )
    }
}

/// Flat per-process table, one entry per virtual page.
#[derive(Debug)]
pub struct PageTable {
    entries: Vec<PageTableEntry>,
}

pub(crate) type SharedPageTable = Arc<Mutex<PageTable>>;

pub(crate) fn lock_table(table: &SharedPageTable) -> MutexGuard<'_, PageTable> {
    table.lock().expect("page table lock poisoned")
}

impl PageTable {
    pub fn new(num_pages: u32) -> Self {
        Self {
            entries: (0..num_pages).map(|vpn| PageTableEntry::new(vpn, false)).collect(),
        }
    }

    pub fn get(&self, vpn: u32) -> Result<&PageTableEntry, VmError> {
        self.entries
            .get(vpn as usize)
            .ok_or(VmError::AddressOutOfRange { vpn })
    }

    pub fn get_mut(&mut self, vpn: u32) -> Result<&mut PageTableEntry, VmError> {
        self.entries
            .get_mut(vpn as usize)
            .ok_or(VmError::AddressOutOfRange { vpn })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PageTableEntry> {
        self.entries.iter_mut()
    }

    pub fn snapshot(&self) -> Vec<PageTableEntry> {
        self.entries.clone()
    }

    /// Folds the reference bits of a TLB copy into the entry for `vpn`,
    /// provided that page still sits in `frame`. Returns the merged entry.
    pub fn merge_hardware_bits(
        &mut self,
        vpn: u32,
        frame: u32,
        hw: &TranslationEntry,
    ) -> Option<PageTableEntry> {
        let entry = self.entries.get_mut(vpn as usize)?;
        if entry.state != PageState::Resident(frame) {
            return None;
        }
        entry.used |= hw.used;
        entry.dirty |= hw.dirty;
        Some(*entry)
    }

    pub fn clear_used(&mut self, vpn: u32, frame: u32) {
        if let Some(entry) = self.entries.get_mut(vpn as usize) {
            if entry.state == PageState::Resident(frame) {
                entry.used = false;
            }
        }
    }

    /// Records a software access to a resident page.
    pub fn touch(&mut self, vpn: u32, write: bool) -> Result<PageTableEntry, VmError> {
        let entry = self.get_mut(vpn)?;
        entry.used = true;
        if write {
            entry.dirty = true;
        }
        Ok(*entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_is_absent() {
        let entries = PageTable::new(11).snapshot();
        assert_eq!(entries.len(), 11);
        for (vpn, entry) in entries.iter().enumerate() {
            assert_eq!(entry.vpn, vpn as u32);
            assert_eq!(entry.state, PageState::Absent);
            assert!(!entry.translation().valid);
        }
    }

    #[test]
    fn test_out_of_range() {
        let mut table = PageTable::new(2);
        assert_eq!(table.get(2), Err(VmError::AddressOutOfRange { vpn: 2 }));
        assert!(table.get_mut(7).is_err());
        assert!(table.touch(2, false).is_err());
    }

    #[test]
    fn test_translation_of_resident_page() {
        let mut table = PageTable::new(4);
        let entry = table.get_mut(3).unwrap();
        entry.state = PageState::Resident(9);
        entry.read_only = true;
        let hw = table.get(3).unwrap().translation();
        assert_eq!(hw, TranslationEntry::new(3, 9, true, true, false, false));
    }

    #[test]
    fn test_merge_hardware_bits() {
        let mut table = PageTable::new(4);
        table.get_mut(1).unwrap().state = PageState::Resident(2);
        let hw = TranslationEntry::new(1, 2, true, false, true, true);

        let merged = table.merge_hardware_bits(1, 2, &hw).unwrap();
        assert!(merged.used);
        assert!(merged.dirty);

        // a clean TLB copy never wipes out an earlier store
        let clean = TranslationEntry::new(1, 2, true, false, false, false);
        assert!(table.merge_hardware_bits(1, 2, &clean).unwrap().dirty);

        // page moved on: nothing to merge
        assert!(table.merge_hardware_bits(1, 3, &hw).is_none());
    }

    #[test]
    fn test_needs_swap() {
        let mut table = PageTable::new(1);
        assert!(!table.get(0).unwrap().needs_swap());
        table.touch(0, true).unwrap();
        assert!(table.get(0).unwrap().needs_swap());
        let entry = table.get_mut(0).unwrap();
        entry.dirty = false;
        entry.swap_backed = true;
        assert!(entry.needs_swap());
    }
}
