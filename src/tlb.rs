use log::trace;
use machine::{
    offset_from_address, page_from_address, MemoryError, PhysicalMemory, Tlb, TranslationEntry,
};
use rand::Rng;

use crate::{
    kernel::{MemoryState, VmKernel},
    Pid, VmError,
};

/// The hardware TLB plus, per slot, the process that installed it. The
/// tag lets several process threads share one TLB; ownership of a frame
/// is still decided by the frame table.
pub(crate) struct TlbState {
    hw: Tlb,
    owners: Vec<Option<Pid>>,
}

impl TlbState {
    pub fn new(size: usize) -> Self {
        Self {
            hw: Tlb::new(size),
            owners: vec![None; size],
        }
    }

    fn lookup(&self, pid: Pid, vpn: u32) -> Option<usize> {
        (0..self.hw.size()).find(|&i| {
            let entry = self.hw.read_entry(i);
            entry.valid && entry.vpn == vpn && self.owners[i] == Some(pid)
        })
    }

    /// Slot a new translation for (`pid`, `vpn`) goes to: the one already
    /// holding that page, else an invalid one, else any slot at random.
    /// The random pick is unrelated to the clock used for frames.
    fn choose_slot(&self, pid: Pid, vpn: u32) -> usize {
        if let Some(i) = self.lookup(pid, vpn) {
            return i;
        }
        if let Some(i) = (0..self.hw.size()).find(|&i| !self.hw.read_entry(i).valid) {
            return i;
        }
        rand::thread_rng().gen_range(0..self.hw.size())
    }

    /// Invalidates slot `i`, handing back what it held if it was valid.
    fn take(&mut self, i: usize) -> Option<(Pid, TranslationEntry)> {
        let entry = self.hw.read_entry(i);
        let owner = self.owners[i].take();
        if !entry.valid {
            return None;
        }
        self.hw.write_entry(i, TranslationEntry { valid: false, ..entry });
        owner.map(|pid| (pid, entry))
    }

    fn take_where(
        &mut self,
        pred: impl Fn(Option<Pid>, &TranslationEntry) -> bool,
    ) -> Vec<(Pid, TranslationEntry)> {
        let mut taken = Vec::new();
        for i in 0..self.hw.size() {
            let entry = self.hw.read_entry(i);
            if entry.valid && pred(self.owners[i], &entry) {
                taken.extend(self.take(i));
            }
        }
        taken
    }

    pub fn drain(&mut self) -> Vec<(Pid, TranslationEntry)> {
        self.take_where(|_, _| true)
    }

    pub fn take_frame(&mut self, frame: u32) -> Vec<(Pid, TranslationEntry)> {
        self.take_where(|_, entry| entry.ppn == frame)
    }

    pub fn take_owned_by(&mut self, pid: Pid) -> Vec<(Pid, TranslationEntry)> {
        self.take_where(|owner, _| owner == Some(pid))
    }

    /// Copies out every valid entry and clears the used bits left in the
    /// TLB, so the next harvest only sees new references.
    pub fn harvest(&mut self) -> Vec<TranslationEntry> {
        let mut harvested = Vec::new();
        for i in 0..self.hw.size() {
            let entry = self.hw.read_entry(i);
            if entry.valid {
                harvested.push(entry);
                self.hw.write_entry(i, TranslationEntry { used: false, ..entry });
            }
        }
        harvested
    }

    pub fn snapshot(&self) -> Vec<TranslationEntry> {
        self.hw.iter().copied().collect()
    }
}

impl<const PAGE_SIZE: usize> VmKernel<PAGE_SIZE> {
    /// Puts `entry` into the TLB for `pid`. Whatever the chosen slot held
    /// before is reconciled into its page table first.
    pub(crate) fn install(&self, mem: &mut MemoryState, pid: Pid, entry: TranslationEntry) {
        debug_assert!(entry.valid);
        let replaced = {
            let mut tlb = self.lock_tlb();
            let slot = tlb.choose_slot(pid, entry.vpn);
            let replaced = tlb.take(slot);
            tlb.hw.write_entry(slot, entry);
            tlb.owners[slot] = Some(pid);
            replaced
        };
        if let Some((owner, old)) = replaced {
            trace!("TLB replaced process {} vpn {}", owner, old.vpn);
            mem.reconcile(&old);
        }
    }

    /// Called when the running process gives up the processor: every valid
    /// TLB entry is written back and the whole TLB is invalidated.
    pub fn flush_on_switch(&self) {
        let mut mem = self.lock_memory();
        let flushed = self.lock_tlb().drain();
        for (_, entry) in &flushed {
            mem.reconcile(entry);
        }
        trace!("TLB flushed, {} entries written back", flushed.len());
    }

    /// Pulls hardware reference bits into the page tables ahead of a clock sweep.
    pub(crate) fn harvest_tlb(&self, mem: &mut MemoryState) {
        let harvested = self.lock_tlb().harvest();
        for entry in &harvested {
            mem.reconcile(entry);
        }
    }

    /// One user-mode access through the TLB. On a hit the hardware marks
    /// the entry used (and dirty for stores) and `op` runs on the physical
    /// address while the TLB lock is held, so no eviction can slip in
    /// between. `Ok(None)` is a TLB miss.
    pub(crate) fn access<T>(
        &self,
        pid: Pid,
        vaddr: u32,
        write: bool,
        op: &impl Fn(&PhysicalMemory<PAGE_SIZE>, u64) -> Result<T, MemoryError>,
    ) -> Result<Option<T>, VmError> {
        let vpn = page_from_address::<PAGE_SIZE>(vaddr);
        let mut tlb = self.lock_tlb();
        let Some(slot) = tlb.lookup(pid, vpn) else {
            return Ok(None);
        };
        let mut entry = tlb.hw.read_entry(slot);
        if write && entry.read_only {
            return Err(VmError::ReadOnly { vpn });
        }
        entry.used = true;
        if write {
            entry.dirty = true;
        }
        tlb.hw.write_entry(slot, entry);

        let offset = offset_from_address::<PAGE_SIZE>(vaddr) as u64;
        let paddr = entry.ppn as u64 * PAGE_SIZE as u64 + offset;
        Ok(Some(op(self.memory(), paddr)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(vpn: u32, ppn: u32) -> TranslationEntry {
        TranslationEntry::new(vpn, ppn, true, false, false, false)
    }

    fn fill(tlb: &mut TlbState, pid: Pid, entries: &[TranslationEntry]) {
        for e in entries {
            let slot = tlb.choose_slot(pid, e.vpn);
            tlb.take(slot);
            tlb.hw.write_entry(slot, *e);
            tlb.owners[slot] = Some(pid);
        }
    }

    #[test]
    fn test_prefers_invalid_slot() {
        let mut tlb = TlbState::new(4);
        fill(&mut tlb, 1, &[entry(0, 0), entry(1, 1)]);
        assert_eq!(tlb.choose_slot(1, 5), 2);
    }

    #[test]
    fn test_reuses_slot_of_same_page() {
        let mut tlb = TlbState::new(2);
        fill(&mut tlb, 1, &[entry(0, 0), entry(1, 1)]);
        assert_eq!(tlb.choose_slot(1, 1), 1);
        assert_eq!(tlb.lookup(2, 1), None);
    }

    #[test]
    fn test_random_slot_when_full() {
        let mut tlb = TlbState::new(2);
        fill(&mut tlb, 1, &[entry(0, 0), entry(1, 1)]);
        for _ in 0..20 {
            assert!(tlb.choose_slot(1, 9) < 2);
        }
    }

    #[test]
    fn test_drain_invalidates_everything() {
        let mut tlb = TlbState::new(4);
        fill(&mut tlb, 1, &[entry(0, 0), entry(1, 1)]);
        fill(&mut tlb, 2, &[entry(0, 2)]);
        let drained = tlb.drain();
        assert_eq!(drained.len(), 3);
        assert!(tlb.snapshot().iter().all(|e| !e.valid));
        assert!(tlb.drain().is_empty());
    }

    #[test]
    fn test_take_frame_and_owner() {
        let mut tlb = TlbState::new(4);
        fill(&mut tlb, 1, &[entry(0, 0), entry(1, 1)]);
        fill(&mut tlb, 2, &[entry(0, 2)]);
        assert_eq!(tlb.take_frame(1), vec![(1, entry(1, 1))]);
        assert_eq!(tlb.take_owned_by(2), vec![(2, entry(0, 2))]);
        assert_eq!(tlb.lookup(1, 0), Some(0));
    }

    #[test]
    fn test_harvest_clears_used() {
        let mut tlb = TlbState::new(2);
        let used = TranslationEntry::new(3, 1, true, false, true, true);
        fill(&mut tlb, 1, &[used]);
        assert_eq!(tlb.harvest(), vec![used]);
        let after = tlb.snapshot()[0];
        assert!(after.valid);
        assert!(!after.used);
        assert!(after.dirty);
    }
}
