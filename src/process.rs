use std::{
    ops::Range,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::debug;
use machine::{offset_from_address, page_from_address, MemoryError, PhysicalMemory};

use crate::{
    image::Executable,
    kernel::VmKernel,
    page_table::{lock_table, PageTableEntry, SharedPageTable},
    Pid, VmError, DEFAULT_PAGE_SIZE,
};

/// A user process as far as memory is concerned: its page table, the image
/// it pages from, and the kernel it shares frames, swap and TLB with.
pub struct VmProcess<const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE> {
    pub(crate) pid: Pid,
    pub(crate) kernel: Arc<VmKernel<PAGE_SIZE>>,
    pub(crate) page_table: SharedPageTable,
    pub(crate) executable: Executable,
    num_pages: u32,
    exited: AtomicBool,
}

impl<const PAGE_SIZE: usize> VmProcess<PAGE_SIZE> {
    pub(crate) fn new(
        pid: Pid,
        kernel: Arc<VmKernel<PAGE_SIZE>>,
        page_table: SharedPageTable,
        executable: Executable,
        num_pages: u32,
    ) -> Self {
        Self {
            pid,
            kernel,
            page_table,
            executable,
            num_pages,
            exited: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    pub fn kernel(&self) -> &Arc<VmKernel<PAGE_SIZE>> {
        &self.kernel
    }

    pub(crate) fn check_alive(&self) -> Result<(), VmError> {
        if self.exited.load(Ordering::SeqCst) {
            return Err(VmError::ProcessExited { pid: self.pid });
        }
        Ok(())
    }

    pub fn page_table_snapshot(&self) -> Vec<PageTableEntry> {
        lock_table(&self.page_table).snapshot()
    }

    /// Context switch out. The TLB is shared hardware, so everything in it
    /// is written back and invalidated.
    pub fn save_state(&self) {
        self.kernel.flush_on_switch();
    }

    /// Context switch in. The TLB refills on demand.
    pub fn restore_state(&self) {}

    /// Runs a user-mode memory instruction: translate through the TLB,
    /// take the miss if there is one, and retry.
    fn user_access<T>(
        &self,
        vaddr: u32,
        write: bool,
        op: impl Fn(&PhysicalMemory<PAGE_SIZE>, u64) -> Result<T, MemoryError>,
    ) -> Result<T, VmError> {
        self.check_alive()?;
        let vpn = page_from_address::<PAGE_SIZE>(vaddr);
        if vpn >= self.num_pages {
            return Err(VmError::AddressOutOfRange { vpn });
        }
        loop {
            if let Some(value) = self.kernel.access(self.pid, vaddr, write, &op)? {
                return Ok(value);
            }
            self.handle_tlb_miss(vaddr)?;
        }
    }

    fn check_aligned(vaddr: u32, align: u32) -> Result<(), VmError> {
        if vaddr % align != 0 {
            return Err(VmError::UnalignedAccess { vaddr });
        }
        Ok(())
    }

    pub fn load_u8(&self, vaddr: u32) -> Result<u8, VmError> {
        self.user_access(vaddr, false, |mem, paddr| mem.read_u8(paddr))
    }

    pub fn store_u8(&self, vaddr: u32, value: u8) -> Result<(), VmError> {
        self.user_access(vaddr, true, |mem, paddr| mem.write_u8(paddr, value))
    }

    pub fn load_u32(&self, vaddr: u32) -> Result<u32, VmError> {
        Self::check_aligned(vaddr, 4)?;
        self.user_access(vaddr, false, |mem, paddr| mem.read_u32(paddr))
    }

    pub fn store_u32(&self, vaddr: u32, value: u32) -> Result<(), VmError> {
        Self::check_aligned(vaddr, 4)?;
        self.user_access(vaddr, true, |mem, paddr| mem.write_u32(paddr, value))
    }

    /// Copies from this address space into `data`. Stops early, returning a
    /// short count, where the range leaves the address space.
    pub fn read_virtual_memory(&self, vaddr: u32, data: &mut [u8]) -> Result<usize, VmError> {
        let memory = self.kernel.memory().clone();
        self.copy_pages(vaddr, data.len(), false, |paddr, range| {
            memory.read(paddr, &mut data[range])
        })
    }

    /// Copies `data` into this address space. Refuses read-only pages.
    pub fn write_virtual_memory(&self, vaddr: u32, data: &[u8]) -> Result<usize, VmError> {
        let memory = self.kernel.memory().clone();
        self.copy_pages(vaddr, data.len(), true, |paddr, range| {
            memory.write(paddr, &data[range])
        })
    }

    fn copy_pages(
        &self,
        vaddr: u32,
        len: usize,
        write: bool,
        mut copy: impl FnMut(u64, Range<usize>) -> Result<(), MemoryError>,
    ) -> Result<usize, VmError> {
        self.check_alive()?;
        let mut done = 0;
        while done < len {
            let Ok(addr) = u32::try_from(vaddr as u64 + done as u64) else {
                break;
            };
            let vpn = page_from_address::<PAGE_SIZE>(addr);
            if vpn >= self.num_pages {
                break;
            }
            let offset = offset_from_address::<PAGE_SIZE>(addr) as usize;
            let amount = (PAGE_SIZE - offset).min(len - done);

            let frame = self.pin_page(vpn, write)?;
            let paddr = frame as u64 * PAGE_SIZE as u64 + offset as u64;
            let copied = copy(paddr, done..done + amount);
            self.kernel.unpin_frame(frame);
            copied?;
            done += amount;
        }
        Ok(done)
    }

    /// Makes `vpn` resident and pins its frame for a kernel-side copy.
    fn pin_page(&self, vpn: u32, write: bool) -> Result<u32, VmError> {
        let mut mem = self.kernel.lock_memory();
        let translation = self.resolve(&mut mem, vpn)?;
        if write && translation.read_only {
            return Err(VmError::ReadOnly { vpn });
        }
        let frame = translation.ppn;
        let touched = lock_table(&self.page_table).touch(vpn, write)?;
        mem.frames.record(frame, touched.translation());
        mem.frames.pin(frame);
        Ok(frame)
    }

    /// Gives back every frame and swap slot of this process. Safe to call
    /// more than once; dropping the process calls it too.
    pub fn exit(&self) {
        if self.exited.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Process {} exiting", self.pid);
        self.kernel.release_process(self.pid, &self.page_table);
    }
}

impl<const PAGE_SIZE: usize> Drop for VmProcess<PAGE_SIZE> {
    fn drop(&mut self) {
        self.exit();
    }
}
