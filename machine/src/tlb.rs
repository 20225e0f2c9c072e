use crate::TranslationEntry;

/// The TLB register file. Software-managed: the kernel reads and writes
/// slots directly, the hardware only sets `used`/`dirty` on hits.
#[derive(Debug, Clone)]
pub struct Tlb {
    entries: Vec<TranslationEntry>,
}

impl Tlb {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "TLB needs at least one slot");
        Self {
            entries: vec![TranslationEntry::invalid(); size],
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn read_entry(&self, index: usize) -> TranslationEntry {
        self.entries[index]
    }

    pub fn write_entry(&mut self, index: usize, entry: TranslationEntry) {
        log::trace!("TLB[{}] <- {:?}", index, entry);
        self.entries[index] = entry;
    }

    pub fn iter(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter()
    }
}
