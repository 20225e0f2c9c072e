/// One virtual-to-physical mapping as the hardware sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranslationEntry {
    pub vpn: u32,
    pub ppn: u32,
    pub valid: bool,
    pub read_only: bool,
    /// Set by the hardware on every access through this entry.
    pub used: bool,
    /// Set by the hardware on every store through this entry.
    pub dirty: bool,
}

impl TranslationEntry {
    pub fn new(vpn: u32, ppn: u32, valid: bool, read_only: bool, used: bool, dirty: bool) -> Self {
        Self {
            vpn,
            ppn,
            valid,
            read_only,
            used,
            dirty,
        }
    }

    pub fn invalid() -> Self {
        Self::default()
    }
}
