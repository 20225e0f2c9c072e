use std::{
    fs::{remove_file, File},
    io::{Read, Seek, SeekFrom, Write},
};

use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// The transfer would run past the configured size of the store.
    OverCapacity,
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for DiskError {
    fn from(e: std::io::Error) -> Self {
        DiskError::Io(e.kind())
    }
}

/// Raw byte-addressable storage the swap area lives on.
pub trait BackingStore: Send {
    fn read(&mut self, offset: u64, dest: &mut [u8]) -> Result<(), DiskError>;

    fn write(&mut self, offset: u64, src: &[u8]) -> Result<(), DiskError>;
}

pub fn make_name(name: &str) -> String {
    let name = name.replace("-", "_");
    let mut file_name = String::from("SWAP_FILE_");
    file_name.push_str(&name);
    file_name
}

/// Swap file on the host file system. It has no header: byte `n` of the
/// store is byte `n` of the file, and the file grows as slots are written.
/// The file is scratch space and is deleted when the handle is dropped.
#[derive(Debug)]
pub struct SwapFile {
    file_name: String,
    file: File,
    capacity: Option<u64>,
}

impl SwapFile {
    pub fn create(name: &str) -> Result<Self, std::io::Error> {
        let file_name = make_name(name);
        let file = File::options()
            .truncate(true)
            .write(true)
            .read(true)
            .create(true)
            .open(&file_name)?;
        Ok(Self {
            file_name,
            file,
            capacity: None,
        })
    }

    /// Same as [`SwapFile::create`] but refuses transfers beyond `capacity` bytes.
    pub fn with_capacity(name: &str, capacity: u64) -> Result<Self, std::io::Error> {
        let mut swap = Self::create(name)?;
        swap.capacity = Some(capacity);
        Ok(swap)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn len(&self) -> Result<u64, DiskError> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, DiskError> {
        Ok(self.len()? == 0)
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<(), DiskError> {
        match self.capacity {
            Some(capacity) if offset + len as u64 > capacity => Err(DiskError::OverCapacity),
            _ => Ok(()),
        }
    }
}

impl BackingStore for SwapFile {
    fn read(&mut self, offset: u64, dest: &mut [u8]) -> Result<(), DiskError> {
        self.check_range(offset, dest.len())?;
        debug!("Start reading {} bytes at {}", dest.len(), offset);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(dest)?;
        debug!("Done reading {} bytes at {}", dest.len(), offset);
        Ok(())
    }

    fn write(&mut self, offset: u64, src: &[u8]) -> Result<(), DiskError> {
        self.check_range(offset, src.len())?;
        debug!("Start writing {} bytes at {}", src.len(), offset);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(src)?;
        debug!("Done writing {} bytes at {}", src.len(), offset);
        Ok(())
    }
}

impl Drop for SwapFile {
    fn drop(&mut self) {
        if let Err(e) = remove_file(&self.file_name) {
            warn!("Could not remove swap file {}: {}", self.file_name, e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_create() {
        let swap = SwapFile::create("test_create").unwrap();
        assert!(Path::new(&make_name("test_create")).exists());
        assert!(swap.is_empty().unwrap());
    }

    #[test]
    fn test_removed_on_drop() {
        let swap = SwapFile::create("test_removed_on_drop").unwrap();
        drop(swap);
        assert!(!Path::new(&make_name("test_removed_on_drop")).exists());
    }

    #[test]
    fn test_read_write() {
        let mut swap = SwapFile::create("test_read_write").unwrap();
        let mut block = [0; 512];
        block[0] = 1;
        block[511] = 2;
        swap.write(512, &block).unwrap();
        assert_eq!(swap.len().unwrap(), 1024);

        let mut buf = [0xff; 512];
        swap.read(512, &mut buf).unwrap();
        assert_eq!(buf, block);

        // the hole in front of the first write reads back as zeroes
        swap.read(0, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_read_past_end() {
        let mut swap = SwapFile::create("test_read_past_end").unwrap();
        let mut buf = [0; 16];
        assert_eq!(
            swap.read(0, &mut buf),
            Err(DiskError::Io(std::io::ErrorKind::UnexpectedEof))
        );
    }

    #[test]
    fn test_over_capacity() {
        let mut swap = SwapFile::with_capacity("test_over_capacity", 1024).unwrap();
        let block = [0x1; 512];
        swap.write(512, &block).unwrap();
        assert_eq!(swap.write(1024, &block), Err(DiskError::OverCapacity));
        let mut buf = [0; 512];
        assert_eq!(swap.read(768, &mut buf), Err(DiskError::OverCapacity));
    }

    #[test]
    fn test_make_name() {
        assert_eq!(make_name("my-swap"), "SWAP_FILE_my_swap");
    }
}
