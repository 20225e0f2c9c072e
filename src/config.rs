/// Sizes of the simulated machine and of each address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub num_phys_pages: usize,
    pub tlb_size: usize,
    /// Pages of zero-filled stack placed after the executable image.
    pub stack_pages: u32,
    pub swap_file: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            num_phys_pages: 32,
            tlb_size: 4,
            stack_pages: 8,
            swap_file: String::from("swap"),
        }
    }
}

impl KernelConfig {
    pub fn with_phys_pages(mut self, num_phys_pages: usize) -> Self {
        self.num_phys_pages = num_phys_pages;
        self
    }

    pub fn with_tlb_size(mut self, tlb_size: usize) -> Self {
        self.tlb_size = tlb_size;
        self
    }

    pub fn with_stack_pages(mut self, stack_pages: u32) -> Self {
        self.stack_pages = stack_pages;
        self
    }

    pub fn with_swap_file(mut self, swap_file: &str) -> Self {
        self.swap_file = String::from(swap_file);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = KernelConfig::default()
            .with_phys_pages(4)
            .with_tlb_size(2)
            .with_stack_pages(1)
            .with_swap_file("builder");
        assert_eq!(config.num_phys_pages, 4);
        assert_eq!(config.tlb_size, 2);
        assert_eq!(config.stack_pages, 1);
        assert_eq!(config.swap_file, "builder");
    }
}
