use std::{
    mem::size_of,
    sync::{Arc, Mutex},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    OverCapacity,
}

/// Main memory of the machine, `num_frames` frames of `PAGE_SIZE` bytes.
///
/// Cloning hands out another handle to the same memory.
#[derive(Clone)]
pub struct PhysicalMemory<const PAGE_SIZE: usize> {
    num_frames: usize,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<const PAGE_SIZE: usize> PhysicalMemory<PAGE_SIZE> {
    pub fn new(num_frames: usize) -> Self {
        assert!(
            PAGE_SIZE.is_power_of_two(),
            "Page size {} is not a power of 2",
            PAGE_SIZE
        );
        assert!(num_frames > 0, "Machine needs at least one frame");
        Self {
            num_frames,
            buffer: Arc::new(Mutex::new(vec![0; num_frames * PAGE_SIZE])),
        }
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn capacity(&self) -> usize {
        self.num_frames * PAGE_SIZE
    }

    pub fn check_address(&self, address: u64, len: usize) -> Result<(), MemoryError> {
        if address as usize + len > self.capacity() {
            return Err(MemoryError::OverCapacity);
        }
        Ok(())
    }

    fn check_frame(&self, frame: u32) -> Result<(), MemoryError> {
        if frame as usize >= self.num_frames {
            return Err(MemoryError::OverCapacity);
        }
        Ok(())
    }

    pub fn read_u8(&self, address: u64) -> Result<u8, MemoryError> {
        self.check_address(address, 1)?;
        let buffer = self.buffer.lock().expect("physical memory lock poisoned");
        Ok(buffer[address as usize])
    }

    pub fn write_u8(&self, address: u64, byte: u8) -> Result<(), MemoryError> {
        self.check_address(address, 1)?;
        let mut buffer = self.buffer.lock().expect("physical memory lock poisoned");
        buffer[address as usize] = byte;
        Ok(())
    }

    pub fn read_u32(&self, address: u64) -> Result<u32, MemoryError> {
        self.check_address(address, size_of::<u32>())?;
        let buffer = self.buffer.lock().expect("physical memory lock poisoned");
        let mut bytes = [0; size_of::<u32>()];
        bytes.copy_from_slice(&buffer[address as usize..address as usize + size_of::<u32>()]);
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn write_u32(&self, address: u64, word: u32) -> Result<(), MemoryError> {
        self.check_address(address, size_of::<u32>())?;
        let mut buffer = self.buffer.lock().expect("physical memory lock poisoned");
        let bytes = word.to_be_bytes();
        buffer[address as usize..address as usize + size_of::<u32>()].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn read(&self, address: u64, dest: &mut [u8]) -> Result<(), MemoryError> {
        self.check_address(address, dest.len())?;
        let buffer = self.buffer.lock().expect("physical memory lock poisoned");
        let start = address as usize;
        dest.copy_from_slice(&buffer[start..start + dest.len()]);
        Ok(())
    }

    pub fn write(&self, address: u64, src: &[u8]) -> Result<(), MemoryError> {
        self.check_address(address, src.len())?;
        let mut buffer = self.buffer.lock().expect("physical memory lock poisoned");
        let start = address as usize;
        buffer[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Copies the whole of `frame` into `dest`, which must be one page long.
    pub fn read_frame(&self, frame: u32, dest: &mut [u8]) -> Result<(), MemoryError> {
        assert_eq!(dest.len(), PAGE_SIZE, "Frame buffer must be exactly one page");
        self.check_frame(frame)?;
        self.read(frame as u64 * PAGE_SIZE as u64, dest)
    }

    pub fn write_frame(&self, frame: u32, src: &[u8]) -> Result<(), MemoryError> {
        assert_eq!(src.len(), PAGE_SIZE, "Frame buffer must be exactly one page");
        self.check_frame(frame)?;
        self.write(frame as u64 * PAGE_SIZE as u64, src)
    }

    pub fn zero_frame(&self, frame: u32) -> Result<(), MemoryError> {
        self.check_frame(frame)?;
        let mut buffer = self.buffer.lock().expect("physical memory lock poisoned");
        let start = frame as usize * PAGE_SIZE;
        buffer[start..start + PAGE_SIZE].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let mem = PhysicalMemory::<512>::new(2);
        mem.write_u8(0, 0x12).unwrap();
        assert_eq!(mem.read_u8(0).unwrap(), 0x12);
    }

    #[test]
    fn test_write_a_lot_of_data() {
        let mem = PhysicalMemory::<512>::new(2);
        for i in 0..1024 {
            mem.write_u8(i, i as u8).unwrap();
        }
        for i in 0..1024 {
            assert_eq!(mem.read_u8(i).unwrap(), i as u8);
        }
    }

    #[test]
    fn test_write_invalid_address() {
        let mem = PhysicalMemory::<512>::new(2);
        assert_eq!(mem.write_u8(1024, 0x12), Err(MemoryError::OverCapacity));
        assert_eq!(mem.read_u32(1022), Err(MemoryError::OverCapacity));
    }

    #[test]
    fn test_words() {
        let mem = PhysicalMemory::<512>::new(1);
        mem.write_u32(8, 0xdead_beef).unwrap();
        assert_eq!(mem.read_u32(8).unwrap(), 0xdead_beef);
        assert_eq!(mem.read_u8(8).unwrap(), 0xde);
    }

    #[test]
    fn test_frames() {
        let mem = PhysicalMemory::<512>::new(4);
        let page = [0x7; 512];
        mem.write_frame(2, &page).unwrap();
        assert_eq!(mem.read_u8(2 * 512).unwrap(), 0x7);
        assert_eq!(mem.read_u8(3 * 512).unwrap(), 0);

        let mut buf = [0; 512];
        mem.read_frame(2, &mut buf).unwrap();
        assert_eq!(buf, page);

        mem.zero_frame(2).unwrap();
        mem.read_frame(2, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));

        assert_eq!(mem.zero_frame(4), Err(MemoryError::OverCapacity));
    }

    #[test]
    fn test_clone_shares_memory() {
        let mem = PhysicalMemory::<512>::new(1);
        let other = mem.clone();
        other.write_u8(3, 9).unwrap();
        assert_eq!(mem.read_u8(3).unwrap(), 9);
    }
}
