use log::{debug, info};
use machine::{page_from_address, TranslationEntry};

use crate::{
    kernel::MemoryState,
    page_table::{lock_table, PageState, PageTableEntry},
    process::VmProcess,
    VmError,
};

impl<const PAGE_SIZE: usize> VmProcess<PAGE_SIZE> {
    /// Entry point for a TLB miss at `vaddr`. A resident page only needs
    /// its translation loaded; anything else is a page fault first.
    ///
    /// An error here means the process cannot go on and must be killed.
    /// No half-done mapping is left behind in that case.
    pub fn handle_tlb_miss(&self, vaddr: u32) -> Result<(), VmError> {
        let vpn = page_from_address::<PAGE_SIZE>(vaddr);
        let mut mem = self.kernel.lock_memory();
        let translation = self.resolve(&mut mem, vpn)?;
        self.kernel.install(&mut mem, self.pid, translation);
        Ok(())
    }

    /// Valid translation for `vpn`, paging it in when it is not resident.
    ///
    /// Liveness is checked here, under the memory lock: `exit` marks the
    /// process before it takes that lock, so a fault that gets past this
    /// check is torn down by the release that follows it.
    pub(crate) fn resolve(
        &self,
        mem: &mut MemoryState,
        vpn: u32,
    ) -> Result<TranslationEntry, VmError> {
        self.check_alive()?;
        let entry = *lock_table(&self.page_table).get(vpn)?;
        if entry.is_valid() {
            return Ok(entry.translation());
        }
        self.page_in(mem, entry)
    }

    fn page_in(
        &self,
        mem: &mut MemoryState,
        entry: PageTableEntry,
    ) -> Result<TranslationEntry, VmError> {
        let vpn = entry.vpn;
        self.kernel.count_fault();
        debug!("Page fault: process {} vpn {} ({:?})", self.pid, vpn, entry.state);

        let frame = self.kernel.allocate_frame(mem)?;
        mem.frames.assign(
            frame,
            self.pid,
            TranslationEntry::new(vpn, frame, false, entry.read_only, false, false),
        );
        mem.frames.pin(frame);

        let from_swap = match self.fill_frame(frame, vpn, entry.state) {
            Ok(from_swap) => from_swap,
            Err(e) => {
                mem.frames.release(frame);
                mem.frames.unpin(frame);
                mem.frames.give_back(frame);
                return Err(e);
            }
        };

        let entry = {
            let mut table = lock_table(&self.page_table);
            let entry = table.get_mut(vpn)?;
            entry.state = PageState::Resident(frame);
            entry.dirty = false;
            entry.used = true;
            if from_swap {
                entry.swap_backed = true;
            }
            *entry
        };
        mem.frames.record(frame, entry.translation());
        mem.frames.unpin(frame);
        Ok(entry.translation())
    }

    /// Loads the content of `vpn` into `frame`: from swap, from the image,
    /// or zeroes for stack pages. Returns whether it came from swap.
    fn fill_frame(&self, frame: u32, vpn: u32, state: PageState) -> Result<bool, VmError> {
        let mut page = vec![0; PAGE_SIZE];
        let from_swap = match state {
            PageState::Swapped(slot) => {
                self.kernel.swap().swap_in(slot, &mut page)?;
                info!("Swapped in process {} vpn {} from slot {}", self.pid, vpn, slot);
                true
            }
            PageState::Absent if vpn < self.executable.num_pages() => {
                let section = self
                    .executable
                    .section_for(vpn)
                    .ok_or(VmError::SectionMissing { vpn })?;
                section.load_page(vpn - section.first_vpn(), &mut page)?;
                debug!("Loaded vpn {} from section {}", vpn, section.name());
                false
            }
            PageState::Absent => false,
            PageState::Resident(frame) => {
                unreachable!("vpn {} is already resident in frame {}", vpn, frame)
            }
        };
        self.kernel.memory().write_frame(frame, &page)?;
        Ok(from_swap)
    }
}
