use crate::SwapSlot;

/// Process and virtual page whose evicted content a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOwner {
    pub pid: u32,
    pub vpn: u32,
}

/// Growable list of swap slots, each free or tagged with its owner.
#[derive(Debug, Default)]
pub(crate) struct SlotTable {
    slots: Vec<Option<SlotOwner>>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, owner: SlotOwner) -> SwapSlot {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(owner);
                return i as SwapSlot;
            }
        }
        self.slots.push(Some(owner));
        (self.slots.len() - 1) as SwapSlot
    }

    pub fn deallocate(&mut self, slot: SwapSlot) {
        match self.slots.get_mut(slot as usize) {
            Some(entry @ Some(_)) => *entry = None,
            _ => panic!("Swap slot {} is not allocated", slot),
        }
    }

    pub fn deallocate_owned_by(&mut self, pid: u32) -> usize {
        let mut freed = 0;
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(owner) if owner.pid == pid) {
                *slot = None;
                freed += 1;
            }
        }
        freed
    }

    pub fn owner(&self, slot: SwapSlot) -> Option<SlotOwner> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_on_demand() {
        let mut table = SlotTable::new();
        assert_eq!(table.len(), 0);
        for i in 0..5 {
            assert_eq!(table.allocate(SlotOwner { pid: 1, vpn: i }), i);
        }
        assert_eq!(table.len(), 5);
        assert_eq!(table.in_use(), 5);
    }

    #[test]
    fn test_owner_of_unknown_slot() {
        let table = SlotTable::new();
        assert_eq!(table.owner(42), None);
    }

    #[test]
    #[should_panic]
    fn test_deallocate_out_of_range() {
        let mut table = SlotTable::new();
        table.deallocate(0);
    }
}
