use std::collections::VecDeque;

use machine::TranslationEntry;

use crate::Pid;

/// What the kernel knows about one physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    pub owner: Option<Pid>,
    /// Last translation recorded for this frame. Its vpn is authoritative
    /// when a TLB copy has to be traced back to its page table slot.
    pub entry: TranslationEntry,
    pub pin_count: u32,
    free_when_unpinned: bool,
}

impl FrameInfo {
    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }
}

/// Inverted page table plus the pool of unowned frames. Both change
/// together and live under the kernel's memory lock.
#[derive(Debug)]
pub(crate) struct FrameTable {
    frames: Vec<FrameInfo>,
    free: VecDeque<u32>,
}

impl FrameTable {
    pub fn new(num_frames: usize) -> Self {
        Self {
            frames: vec![FrameInfo::default(); num_frames],
            free: (0..num_frames as u32).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn lookup(&self, frame: u32) -> &FrameInfo {
        &self.frames[frame as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameInfo> {
        self.frames.iter()
    }

    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    /// Oldest frame of the pool, if any.
    pub fn take_one(&mut self) -> Option<u32> {
        self.free.pop_front()
    }

    pub fn give_back(&mut self, frame: u32) {
        let info = &mut self.frames[frame as usize];
        assert!(!info.is_pinned(), "Frame {} is still pinned", frame);
        debug_assert!(!self.free.contains(&frame), "Frame {} freed twice", frame);
        *info = FrameInfo::default();
        self.free.push_back(frame);
    }

    pub fn assign(&mut self, frame: u32, owner: Pid, entry: TranslationEntry) {
        let info = &mut self.frames[frame as usize];
        info.owner = Some(owner);
        info.entry = entry;
    }

    pub fn record(&mut self, frame: u32, entry: TranslationEntry) {
        self.frames[frame as usize].entry = entry;
    }

    /// Drops the owner of `frame`. The frame does not go back to the pool.
    pub fn release(&mut self, frame: u32) {
        let info = &mut self.frames[frame as usize];
        info.owner = None;
        info.entry = TranslationEntry::invalid();
    }

    /// Drops the owner and returns the frame to the pool, at once if
    /// nobody has it pinned, otherwise on the final unpin.
    pub fn free_or_defer(&mut self, frame: u32) {
        self.release(frame);
        if self.frames[frame as usize].is_pinned() {
            self.frames[frame as usize].free_when_unpinned = true;
        } else {
            self.give_back(frame);
        }
    }

    pub fn clear_used(&mut self, frame: u32) {
        self.frames[frame as usize].entry.used = false;
    }

    pub fn pin(&mut self, frame: u32) {
        self.frames[frame as usize].pin_count += 1;
    }

    pub fn unpin(&mut self, frame: u32) {
        let info = &mut self.frames[frame as usize];
        if info.pin_count == 0 {
            panic!("Frame {} is not pinned", frame);
        }
        info.pin_count -= 1;
        if info.pin_count == 0 && info.free_when_unpinned {
            self.give_back(frame);
        }
    }
}
