use log::{debug, error, info, warn};
use swap_manager::{SlotOwner, SwapSlot};

use crate::{
    frame_table::FrameTable,
    kernel::{MemoryState, VmKernel},
    page_table::{lock_table, PageState},
    Pid, VmError,
};

/// Position of the clock hand over the frame table.
#[derive(Debug, Default)]
pub(crate) struct ClockHand {
    position: usize,
}

impl ClockHand {
    fn advance(&mut self, len: usize) -> u32 {
        let frame = self.position;
        self.position = (self.position + 1) % len;
        frame as u32
    }

    /// Second-chance sweep. Pinned and unowned frames are passed over, a
    /// used frame loses its used bit and survives this round, the first
    /// unused frame is the victim. Two full turns without a victim means
    /// every frame is pinned.
    pub fn select_victim(
        &mut self,
        frames: &mut FrameTable,
        mut on_second_chance: impl FnMut(Pid, u32, u32),
    ) -> Option<(u32, Pid)> {
        let len = frames.len();
        for _ in 0..2 * len {
            let frame = self.advance(len);
            let info = *frames.lookup(frame);
            let Some(owner) = info.owner else {
                continue;
            };
            if info.is_pinned() {
                continue;
            }
            if info.entry.used {
                frames.clear_used(frame);
                on_second_chance(owner, info.entry.vpn, frame);
                continue;
            }
            return Some((frame, owner));
        }
        None
    }
}

impl<const PAGE_SIZE: usize> VmKernel<PAGE_SIZE> {
    /// A frame for a faulting page: from the pool while it lasts, otherwise
    /// taken from a victim.
    pub(crate) fn allocate_frame(&self, mem: &mut MemoryState) -> Result<u32, VmError> {
        if let Some(frame) = mem.frames.take_one() {
            return Ok(frame);
        }
        self.evict(mem)
    }

    fn evict(&self, mem: &mut MemoryState) -> Result<u32, VmError> {
        self.harvest_tlb(mem);

        let MemoryState {
            frames,
            hand,
            page_tables,
        } = &mut *mem;
        let (frame, owner) = hand
            .select_victim(frames, |pid, vpn, frame| {
                if let Some(table) = page_tables.get(&pid) {
                    lock_table(table).clear_used(vpn, frame);
                }
            })
            .ok_or_else(|| {
                error!("No frame can be evicted, all {} are pinned", frames.len());
                VmError::OutOfMemory
            })?;

        // the TLB must not translate to this frame once it changes hands
        let stale = self.lock_tlb().take_frame(frame);
        for (_, entry) in stale {
            mem.reconcile(&entry);
        }

        let vpn = mem.frames.lookup(frame).entry.vpn;
        debug!("Evicting process {} vpn {} from frame {}", owner, vpn, frame);

        let Some(table) = mem.page_tables.get(&owner).cloned() else {
            warn!("Frame {} belongs to unknown process {}", frame, owner);
            mem.frames.release(frame);
            return Ok(frame);
        };
        let mut table = lock_table(&table);
        let entry = table.get_mut(vpn)?;
        debug_assert_eq!(entry.state, PageState::Resident(frame));

        if entry.needs_swap() {
            mem.frames.pin(frame);
            let written = self.write_out(frame, SlotOwner { pid: owner, vpn });
            mem.frames.unpin(frame);
            let slot = written?;
            info!("Swapped out process {} vpn {} to slot {}", owner, vpn, slot);
            entry.state = PageState::Swapped(slot);
        } else {
            entry.state = PageState::Absent;
        }
        entry.used = false;
        drop(table);

        mem.frames.release(frame);
        self.count_eviction();
        Ok(frame)
    }

    fn write_out(&self, frame: u32, owner: SlotOwner) -> Result<SwapSlot, VmError> {
        let mut page = vec![0; PAGE_SIZE];
        self.memory().read_frame(frame, &mut page)?;
        Ok(self.swap().swap_out(owner, &page)?)
    }
}
