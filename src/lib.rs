//! Demand-paged virtual memory for a teaching kernel.
//!
//! Physical frames are handed out lazily on TLB misses. When memory runs out
//! a clock sweep over the frame table picks a victim, dirty victims go to a
//! swap file, and clean ones are simply dropped to be reloaded from the
//! executable image later.

mod clock;
pub mod config;
pub mod error;
mod fault;
mod frame_table;
pub mod image;
pub mod kernel;
mod page_table;
pub mod process;
mod tlb;

pub use config::KernelConfig;
pub use error::VmError;
pub use frame_table::FrameInfo;
pub use image::{Executable, ImageError, MemorySection, Section};
pub use kernel::{MemoryStats, VmKernel};
pub use page_table::{PageState, PageTableEntry};
pub use process::VmProcess;

pub const DEFAULT_PAGE_SIZE: usize = 1024;

pub type Pid = u32;
