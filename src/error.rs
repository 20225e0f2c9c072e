use machine::MemoryError;
use swap_manager::SwapError;
use thiserror::Error;

use crate::{image::ImageError, Pid};

/// Faults a process cannot recover from. The kernel answers every one of
/// them by tearing the offending process down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("virtual page {vpn} is outside the address space")]
    AddressOutOfRange { vpn: u32 },
    #[error("unaligned access at {vaddr:#x}")]
    UnalignedAccess { vaddr: u32 },
    #[error("write to read-only page {vpn}")]
    ReadOnly { vpn: u32 },
    #[error("out of physical memory: every frame is pinned")]
    OutOfMemory,
    #[error("swap I/O failed: {0:?}")]
    Swap(SwapError),
    #[error("physical memory access failed: {0:?}")]
    Memory(MemoryError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("no section covers image page {vpn}")]
    SectionMissing { vpn: u32 },
    #[error("section {section} starts at page {first_vpn}, expected {expected}")]
    FragmentedExecutable {
        section: String,
        first_vpn: u32,
        expected: u32,
    },
    #[error("process {pid} has exited")]
    ProcessExited { pid: Pid },
}

impl From<SwapError> for VmError {
    fn from(e: SwapError) -> Self {
        VmError::Swap(e)
    }
}

impl From<MemoryError> for VmError {
    fn from(e: MemoryError) -> Self {
        VmError::Memory(e)
    }
}
