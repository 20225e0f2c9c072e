use std::sync::Arc;

use vm_kernel::{Executable, KernelConfig, MemorySection, VmError, VmKernel};

const PAGE_SIZE: usize = 1024;
const NUM_PHYS_PAGES: usize = 4;
const CODE_PAGES: usize = 3;
const STACK_PAGES: u32 = 8;

fn main() -> Result<(), VmError> {
    env_logger::init();

    let config = KernelConfig::default()
        .with_phys_pages(NUM_PHYS_PAGES)
        .with_stack_pages(STACK_PAGES)
        .with_swap_file("demo");
    let kernel = VmKernel::<PAGE_SIZE>::new(config)?;
    println!("---- Kernel initialized ----");

    let code: Vec<u8> = (0..CODE_PAGES * PAGE_SIZE).map(|i| (i % 253) as u8).collect();
    let text = Arc::new(MemorySection::new(".text", 0, true, PAGE_SIZE, code));
    let process = kernel.spawn(Executable::new().with_section(text.clone()))?;

    // touch every page in program order: read the code, write the stack
    for vpn in 0..process.num_pages() {
        let vaddr = vpn * PAGE_SIZE as u32;
        if vpn < CODE_PAGES as u32 {
            process.load_u32(vaddr)?;
        } else {
            process.store_u32(vaddr, vpn)?;
        }
    }
    process.save_state();
    println!("After first pass: {:?}", kernel.stats());

    // the code pages were dropped clean, so they come back from the image
    let mut buf = vec![0; PAGE_SIZE];
    process.read_virtual_memory(0, &mut buf)?;
    if buf == text.page(0) {
        println!("Code page 0 matches the image");
    } else {
        println!("Code page 0 differs from the image");
    }
    for vpn in CODE_PAGES as u32..process.num_pages() {
        let word = process.load_u32(vpn * PAGE_SIZE as u32)?;
        if word != vpn {
            println!("Stack page {} holds {}, expected {}", vpn, word, vpn);
        }
    }
    println!("Image loads of .text: {}", text.loads());
    println!("After second pass: {:?}", kernel.stats());

    process.exit();
    println!("After exit: {:?}", kernel.stats());
    println!("---- Kernel halted ----");
    Ok(())
}
