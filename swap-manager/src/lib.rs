mod slot_table;

use std::sync::Mutex;

use disk::{BackingStore, DiskError};
use log::{debug, error, trace};

use self::slot_table::SlotTable;

pub use self::slot_table::SlotOwner;

pub type SwapSlot = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    Disk(DiskError),
}

impl From<DiskError> for SwapError {
    fn from(e: DiskError) -> Self {
        SwapError::Disk(e)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapStats {
    pub slots_in_use: usize,
    pub slots_total: usize,
    pub reads: u64,
    pub writes: u64,
}

struct SwapState {
    table: SlotTable,
    store: Box<dyn BackingStore>,
    reads: u64,
    writes: u64,
}

/// Page-sized slots on a backing store. Slot `n` lives at byte
/// `n * PAGE_SIZE`. Every call holds the swap lock from start to end, so
/// slot bookkeeping and the transfer it guards are atomic together.
pub struct SwapSpace<const PAGE_SIZE: usize> {
    state: Mutex<SwapState>,
}

impl<const PAGE_SIZE: usize> SwapSpace<PAGE_SIZE> {
    pub fn new(store: Box<dyn BackingStore>) -> Self {
        Self {
            state: Mutex::new(SwapState {
                table: SlotTable::new(),
                store,
                reads: 0,
                writes: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SwapState> {
        self.state.lock().expect("swap lock poisoned")
    }

    fn offset(slot: SwapSlot) -> u64 {
        slot as u64 * PAGE_SIZE as u64
    }

    pub fn allocate_slot(&self, owner: SlotOwner) -> SwapSlot {
        let slot = self.lock().table.allocate(owner);
        trace!("Swap slot {} allocated for {:?}", slot, owner);
        slot
    }

    pub fn free_slot(&self, slot: SwapSlot) {
        self.lock().table.deallocate(slot);
        trace!("Swap slot {} freed", slot);
    }

    pub fn owner(&self, slot: SwapSlot) -> Option<SlotOwner> {
        self.lock().table.owner(slot)
    }

    pub fn write_page(&self, slot: SwapSlot, page: &[u8]) -> Result<(), SwapError> {
        assert_eq!(page.len(), PAGE_SIZE, "Swap transfers are exactly one page");
        let mut state = self.lock();
        assert!(state.table.owner(slot).is_some(), "Writing to free swap slot {}", slot);
        state.store.write(Self::offset(slot), page)?;
        state.writes += 1;
        Ok(())
    }

    pub fn read_page(&self, slot: SwapSlot, page: &mut [u8]) -> Result<(), SwapError> {
        assert_eq!(page.len(), PAGE_SIZE, "Swap transfers are exactly one page");
        let mut state = self.lock();
        assert!(state.table.owner(slot).is_some(), "Reading from free swap slot {}", slot);
        state.store.read(Self::offset(slot), page)?;
        state.reads += 1;
        Ok(())
    }

    /// Allocates a slot for `owner` and writes `page` into it. On failure the
    /// slot is released again and nothing is left behind.
    pub fn swap_out(&self, owner: SlotOwner, page: &[u8]) -> Result<SwapSlot, SwapError> {
        assert_eq!(page.len(), PAGE_SIZE, "Swap transfers are exactly one page");
        let mut state = self.lock();
        let slot = state.table.allocate(owner);
        if let Err(e) = state.store.write(Self::offset(slot), page) {
            error!("Swap out of {:?} to slot {} failed: {:?}", owner, slot, e);
            state.table.deallocate(slot);
            return Err(e.into());
        }
        state.writes += 1;
        debug!("Swapped out {:?} to slot {}", owner, slot);
        Ok(slot)
    }

    /// Reads `slot` into `page` and frees the slot. On failure the slot keeps
    /// its content, so the page is still recoverable.
    pub fn swap_in(&self, slot: SwapSlot, page: &mut [u8]) -> Result<(), SwapError> {
        assert_eq!(page.len(), PAGE_SIZE, "Swap transfers are exactly one page");
        let mut state = self.lock();
        let owner = state.table.owner(slot);
        assert!(owner.is_some(), "Swapping in free slot {}", slot);
        if let Err(e) = state.store.read(Self::offset(slot), page) {
            error!("Swap in of slot {} failed: {:?}", slot, e);
            return Err(e.into());
        }
        state.reads += 1;
        state.table.deallocate(slot);
        debug!("Swapped in {:?} from slot {}", owner, slot);
        Ok(())
    }

    /// Frees every slot owned by `pid`; returns how many there were.
    pub fn free_all(&self, pid: u32) -> usize {
        let freed = self.lock().table.deallocate_owned_by(pid);
        if freed > 0 {
            debug!("Freed {} swap slots of process {}", freed, pid);
        }
        freed
    }

    pub fn stats(&self) -> SwapStats {
        let state = self.lock();
        SwapStats {
            slots_in_use: state.table.in_use(),
            slots_total: state.table.len(),
            reads: state.reads,
            writes: state.writes,
        }
    }
}
