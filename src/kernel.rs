use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use disk::{BackingStore, DiskError, SwapFile};
use log::{debug, info, trace, warn};
use machine::{PhysicalMemory, TranslationEntry};
use swap_manager::SwapSpace;

use crate::{
    clock::ClockHand,
    frame_table::{FrameInfo, FrameTable},
    image::Executable,
    page_table::{lock_table, PageState, PageTable, SharedPageTable},
    process::VmProcess,
    tlb::TlbState,
    KernelConfig, Pid, VmError, DEFAULT_PAGE_SIZE,
};

/// Everything guarded by the memory lock: the frame table, the free pool,
/// the clock hand and the registry of live page tables.
///
/// Lock order is memory, then any page table, then swap, then TLB.
pub(crate) struct MemoryState {
    pub frames: FrameTable,
    pub hand: ClockHand,
    pub page_tables: HashMap<Pid, SharedPageTable>,
}

impl MemoryState {
    /// Writes a TLB copy back into the page table and frame table entry it
    /// came from. The frame table decides which page that is; the vpn
    /// cached in the TLB is not trusted.
    pub fn reconcile(&mut self, hw: &TranslationEntry) {
        if !hw.valid {
            return;
        }
        let frame = hw.ppn;
        let info = *self.frames.lookup(frame);
        let Some(owner) = info.owner else {
            trace!("Dropping TLB copy of unowned frame {}", frame);
            return;
        };
        let vpn = info.entry.vpn;
        if vpn != hw.vpn {
            warn!(
                "TLB copy of frame {} names vpn {}, frame table says {}",
                frame, hw.vpn, vpn
            );
        }
        let Some(table) = self.page_tables.get(&owner) else {
            return;
        };
        if let Some(merged) = lock_table(table).merge_hardware_bits(vpn, frame, hw) {
            self.frames.record(frame, merged.translation());
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub free_frames: usize,
    pub owned_frames: usize,
    pub pinned_frames: usize,
    pub swap_slots_in_use: usize,
    pub swap_reads: u64,
    pub swap_writes: u64,
    pub page_faults: u64,
    pub evictions: u64,
}

/// The physical memory manager shared by every process: frames, swap
/// and TLB, each behind its own lock.
pub struct VmKernel<const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE> {
    config: KernelConfig,
    memory: PhysicalMemory<PAGE_SIZE>,
    state: Mutex<MemoryState>,
    swap: SwapSpace<PAGE_SIZE>,
    tlb: Mutex<TlbState>,
    next_pid: AtomicU32,
    page_faults: AtomicU64,
    evictions: AtomicU64,
}

impl<const PAGE_SIZE: usize> VmKernel<PAGE_SIZE> {
    /// Boots a kernel that swaps to the file named in `config`.
    pub fn new(config: KernelConfig) -> Result<Arc<Self>, VmError> {
        let swap_file = SwapFile::create(&config.swap_file)
            .map_err(|e| VmError::Swap(DiskError::from(e).into()))?;
        info!("Swap file {} created", swap_file.file_name());
        Ok(Self::with_backing_store(config, Box::new(swap_file)))
    }

    pub fn with_backing_store(config: KernelConfig, store: Box<dyn BackingStore>) -> Arc<Self> {
        info!(
            "Kernel up: {} frames of {} bytes, {} TLB slots",
            config.num_phys_pages, PAGE_SIZE, config.tlb_size
        );
        Arc::new(Self {
            memory: PhysicalMemory::new(config.num_phys_pages),
            state: Mutex::new(MemoryState {
                frames: FrameTable::new(config.num_phys_pages),
                hand: ClockHand::default(),
                page_tables: HashMap::new(),
            }),
            swap: SwapSpace::new(store),
            tlb: Mutex::new(TlbState::new(config.tlb_size)),
            next_pid: AtomicU32::new(1),
            page_faults: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn memory(&self) -> &PhysicalMemory<PAGE_SIZE> {
        &self.memory
    }

    pub(crate) fn swap(&self) -> &SwapSpace<PAGE_SIZE> {
        &self.swap
    }

    pub(crate) fn lock_memory(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory lock poisoned")
    }

    pub(crate) fn lock_tlb(&self) -> MutexGuard<'_, TlbState> {
        self.tlb.lock().expect("TLB lock poisoned")
    }

    pub(crate) fn count_fault(&self) {
        self.page_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Sets up the address space of a new process: the image pages followed
    /// by the stack, every page absent until first touched.
    pub fn spawn(
        self: &Arc<Self>,
        executable: Executable,
    ) -> Result<VmProcess<PAGE_SIZE>, VmError> {
        executable.check_page_size(PAGE_SIZE)?;
        executable.check_contiguous()?;
        let image_pages = executable.num_pages();
        let num_pages = image_pages + self.config.stack_pages;

        let mut table = PageTable::new(num_pages);
        for section in executable.sections() {
            debug!(
                "\tinitializing {} section ({} pages)",
                section.name(),
                section.num_pages()
            );
            for i in 0..section.num_pages() {
                table.get_mut(section.first_vpn() + i)?.read_only = section.is_read_only();
            }
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let table = Arc::new(Mutex::new(table));
        self.lock_memory().page_tables.insert(pid, table.clone());
        info!("Process {} spawned with {} pages", pid, num_pages);

        Ok(VmProcess::new(pid, self.clone(), table, executable, num_pages))
    }

    pub(crate) fn unpin_frame(&self, frame: u32) {
        self.lock_memory().frames.unpin(frame);
    }

    /// Tears down the memory of `pid`: its TLB slots, frames and swap slots.
    pub(crate) fn release_process(&self, pid: Pid, table: &SharedPageTable) {
        let mut mem = self.lock_memory();
        let dropped = self.lock_tlb().take_owned_by(pid);
        trace!("Dropped {} TLB entries of process {}", dropped.len(), pid);

        let mut frames = 0;
        let mut slots = 0;
        let mut table = lock_table(table);
        for entry in table.iter_mut() {
            match entry.state {
                PageState::Resident(frame) => {
                    mem.frames.free_or_defer(frame);
                    frames += 1;
                }
                PageState::Swapped(slot) => {
                    self.swap.free_slot(slot);
                    slots += 1;
                }
                PageState::Absent => {}
            }
            entry.state = PageState::Absent;
        }
        drop(table);
        mem.page_tables.remove(&pid);

        let leaked = self.swap.free_all(pid);
        if leaked > 0 {
            warn!("Process {} left {} untracked swap slots behind", pid, leaked);
        }
        info!("Process {} released {} frames and {} swap slots", pid, frames, slots);
    }

    pub fn frame_info(&self, frame: u32) -> FrameInfo {
        *self.lock_memory().frames.lookup(frame)
    }

    pub fn tlb_snapshot(&self) -> Vec<TranslationEntry> {
        self.lock_tlb().snapshot()
    }

    pub fn stats(&self) -> MemoryStats {
        let mem = self.lock_memory();
        let swap = self.swap.stats();
        MemoryStats {
            free_frames: mem.frames.free_frames(),
            owned_frames: mem.frames.iter().filter(|f| f.owner.is_some()).count(),
            pinned_frames: mem.frames.iter().filter(|f| f.is_pinned()).count(),
            swap_slots_in_use: swap.slots_in_use,
            swap_reads: swap.reads,
            swap_writes: swap.writes,
            page_faults: self.page_faults.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_state(pid: Pid, num_pages: u32) -> (MemoryState, SharedPageTable) {
        let table = Arc::new(Mutex::new(PageTable::new(num_pages)));
        let mut page_tables = HashMap::new();
        page_tables.insert(pid, table.clone());
        let mem = MemoryState {
            frames: FrameTable::new(2),
            hand: ClockHand::default(),
            page_tables,
        };
        (mem, table)
    }

    #[test]
    fn test_reconcile_trusts_frame_table_vpn() {
        let (mut mem, table) = memory_state(1, 8);
        let frame = mem.frames.take_one().unwrap();
        let installed = TranslationEntry::new(2, frame, true, false, false, false);
        mem.frames.assign(frame, 1, installed);
        lock_table(&table).get_mut(2).unwrap().state = PageState::Resident(frame);

        let stale = TranslationEntry::new(5, frame, true, false, true, true);
        mem.reconcile(&stale);

        let table = lock_table(&table);
        let entry = table.get(2).unwrap();
        assert!(entry.dirty);
        assert!(entry.used);
        let untouched = table.get(5).unwrap();
        assert_eq!(untouched.state, PageState::Absent);
        assert!(!untouched.dirty);
        assert!(!untouched.used);
        assert_eq!(mem.frames.lookup(frame).entry, entry.translation());
        assert_eq!(mem.frames.lookup(frame).entry.vpn, 2);
    }

    #[test]
    fn test_reconcile_unowned_frame() {
        let (mut mem, table) = memory_state(1, 4);
        mem.reconcile(&TranslationEntry::new(0, 1, true, false, true, true));
        assert!(lock_table(&table).snapshot().iter().all(|e| !e.dirty && !e.used));
        assert_eq!(mem.frames.lookup(1).owner, None);
    }
}
