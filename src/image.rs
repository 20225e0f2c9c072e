use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use thiserror::Error;

use crate::VmError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("section {section} has no page {index}")]
    PageOutOfRange { section: String, index: u32 },
    #[error("section {section} could not be read")]
    Unreadable { section: String },
    #[error("section {section} has {page_size}-byte pages, expected {expected}")]
    PageSizeMismatch {
        section: String,
        page_size: usize,
        expected: usize,
    },
}

/// One section of an executable image, as the image reader presents it.
pub trait Section: Send + Sync {
    fn name(&self) -> &str;

    fn first_vpn(&self) -> u32;

    fn num_pages(&self) -> u32;

    fn is_read_only(&self) -> bool;

    fn page_size(&self) -> usize;

    /// Fills `dst` (one page) with page `index` of this section.
    fn load_page(&self, index: u32, dst: &mut [u8]) -> Result<(), ImageError>;
}

/// The sections of a program, in virtual address order.
#[derive(Clone, Default)]
pub struct Executable {
    sections: Vec<Arc<dyn Section>>,
}

impl Executable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(mut self, section: Arc<dyn Section>) -> Self {
        self.sections.push(section);
        self
    }

    pub fn sections(&self) -> &[Arc<dyn Section>] {
        &self.sections
    }

    pub fn num_pages(&self) -> u32 {
        self.sections.iter().map(|s| s.num_pages()).sum()
    }

    pub fn section_for(&self, vpn: u32) -> Option<&dyn Section> {
        self.sections
            .iter()
            .find(|s| vpn >= s.first_vpn() && vpn < s.first_vpn() + s.num_pages())
            .map(|s| s.as_ref())
    }

    /// Every section has to be paged in units of `page_size`.
    pub fn check_page_size(&self, page_size: usize) -> Result<(), ImageError> {
        for section in &self.sections {
            if section.page_size() != page_size {
                return Err(ImageError::PageSizeMismatch {
                    section: section.name().to_string(),
                    page_size: section.page_size(),
                    expected: page_size,
                });
            }
        }
        Ok(())
    }

    /// Sections have to tile the image from page 0 without holes.
    pub fn check_contiguous(&self) -> Result<(), VmError> {
        let mut expected = 0;
        for section in &self.sections {
            if section.first_vpn() != expected {
                return Err(VmError::FragmentedExecutable {
                    section: section.name().to_string(),
                    first_vpn: section.first_vpn(),
                    expected,
                });
            }
            expected += section.num_pages();
        }
        Ok(())
    }
}

/// A section held in memory. Keeps count of how many pages were loaded
/// from it.
pub struct MemorySection {
    name: String,
    first_vpn: u32,
    read_only: bool,
    page_size: usize,
    data: Vec<u8>,
    loads: AtomicUsize,
}

impl MemorySection {
    pub fn new(
        name: &str,
        first_vpn: u32,
        read_only: bool,
        page_size: usize,
        data: Vec<u8>,
    ) -> Self {
        assert!(page_size > 0, "Section {} has zero-sized pages", name);
        Self {
            name: String::from(name),
            first_vpn,
            read_only,
            page_size,
            data,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Expected content of page `index`, zero padded.
    pub fn page(&self, index: u32) -> Vec<u8> {
        let mut page = vec![0; self.page_size];
        let start = (index as usize * self.page_size).min(self.data.len());
        let end = (start + self.page_size).min(self.data.len());
        page[..end - start].copy_from_slice(&self.data[start..end]);
        page
    }
}

impl Section for MemorySection {
    fn name(&self) -> &str {
        &self.name
    }

    fn first_vpn(&self) -> u32 {
        self.first_vpn
    }

    fn num_pages(&self) -> u32 {
        ((self.data.len() + self.page_size - 1) / self.page_size) as u32
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn load_page(&self, index: u32, dst: &mut [u8]) -> Result<(), ImageError> {
        if index >= self.num_pages() {
            return Err(ImageError::PageOutOfRange {
                section: self.name.clone(),
                index,
            });
        }
        if dst.len() != self.page_size {
            return Err(ImageError::PageSizeMismatch {
                section: self.name.clone(),
                page_size: self.page_size,
                expected: dst.len(),
            });
        }
        dst.copy_from_slice(&self.page(index));
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(name: &str, first_vpn: u32, pages: usize) -> Arc<MemorySection> {
        Arc::new(MemorySection::new(name, first_vpn, false, 16, vec![0x5; pages * 16]))
    }

    #[test]
    fn test_section_lookup() {
        let exe = Executable::new()
            .with_section(section(".text", 0, 2))
            .with_section(section(".data", 2, 3));
        assert_eq!(exe.num_pages(), 5);
        assert_eq!(exe.section_for(1).unwrap().name(), ".text");
        assert_eq!(exe.section_for(2).unwrap().name(), ".data");
        assert!(exe.section_for(5).is_none());
        assert!(exe.check_contiguous().is_ok());
    }

    #[test]
    fn test_fragmented() {
        let exe = Executable::new()
            .with_section(section(".text", 0, 2))
            .with_section(section(".data", 3, 1));
        assert_eq!(
            exe.check_contiguous(),
            Err(VmError::FragmentedExecutable {
                section: String::from(".data"),
                first_vpn: 3,
                expected: 2,
            })
        );
    }

    #[test]
    fn test_partial_last_page() {
        let s = MemorySection::new(".rodata", 0, true, 16, vec![0x9; 20]);
        assert_eq!(s.num_pages(), 2);
        let mut buf = [0xff; 16];
        s.load_page(1, &mut buf).unwrap();
        assert_eq!(&buf[..4], &[0x9; 4]);
        assert!(buf[4..].iter().all(|b| *b == 0));
        assert_eq!(s.loads(), 1);
    }

    #[test]
    fn test_load_past_end() {
        let s = MemorySection::new(".text", 0, true, 16, vec![0x1; 16]);
        let mut buf = [0; 16];
        assert_eq!(
            s.load_page(1, &mut buf),
            Err(ImageError::PageOutOfRange {
                section: String::from(".text"),
                index: 1,
            })
        );
        assert_eq!(s.loads(), 0);
    }

    #[test]
    fn test_load_into_wrong_sized_page() {
        let s = MemorySection::new(".text", 0, true, 16, vec![0x1; 32]);
        let mut buf = [0; 32];
        assert_eq!(
            s.load_page(0, &mut buf),
            Err(ImageError::PageSizeMismatch {
                section: String::from(".text"),
                page_size: 16,
                expected: 32,
            })
        );
        assert!(buf.iter().all(|b| *b == 0));
        assert_eq!(s.loads(), 0);
    }

    #[test]
    fn test_check_page_size() {
        let exe = Executable::new()
            .with_section(section(".text", 0, 1))
            .with_section(Arc::new(MemorySection::new(".data", 1, false, 32, vec![0; 32])));
        assert_eq!(
            exe.check_page_size(16),
            Err(ImageError::PageSizeMismatch {
                section: String::from(".data"),
                page_size: 32,
                expected: 16,
            })
        );
        assert!(exe.check_page_size(32).is_err());
    }

    #[test]
    #[should_panic]
    fn test_zero_page_size() {
        MemorySection::new(".bss", 0, false, 0, Vec::new());
    }
}
