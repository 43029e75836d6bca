use super::block::{BlockNumber, BlockStorage};
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// Emulates the disks of a device array in userspace using one file as block
/// storage. Disk `d` block `b` lives at block number `d * blocks_per_disk + b`.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    block_size: usize,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check(&self, blocknr: BlockNumber, buf_len: usize) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block out of range",
            ));
        }
        if buf_len < self.block_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not hold a whole block",
            ));
        }
        Ok(())
    }

    fn position(&self, blocknr: BlockNumber) -> SeekFrom {
        SeekFrom::Start((blocknr * self.block_size) as u64)
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P, block_size: usize, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return error if the file does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        FileBlockEmulatorBuilder::from(file)
            .with_block_size(block_size)
            .with_block_count(nblocks)
            .clear_medium(false)
            .build()
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check(blocknr, buf.len())?;
        let pos = self.position(blocknr);
        self.fd.seek(pos)?;
        self.fd.read_exact(&mut buf[..self.block_size])
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check(blocknr, buf.len())?;
        let pos = self.position(blocknr);
        self.fd.seek(pos)?;
        self.fd.write_all(&buf[..self.block_size])
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_size: usize,
    block_count: usize,
    clear: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            block_size: 0,
            block_count: 0,
            clear: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the size of a single block in bytes.
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the number of blocks in the store, across all disks.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Whether `build` zeroes the medium. Defaults to true; turn it off to
    /// reopen storage that already holds data.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// Ownership of the file is transferred to the emulator meaning this
    /// builder can only be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_size == 0 || self.block_count == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block size and block count must be nonzero",
            ));
        }
        if self.clear {
            self.zero_medium()?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_size: self.block_size,
            block_count: self.block_count,
        })
    }

    fn zero_medium(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let zeroes = vec![0x00; self.block_size];
        let mut bfd = BufWriter::new(&self.fd);
        // Buffer each block so the medium isn't written a block at a time.
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulator(blocks: usize) -> FileBlockEmulator {
        let fs_block = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(fs_block)
            .with_block_size(256)
            .with_block_count(blocks)
            .build()
            .expect("failed to allocate file block")
    }

    #[test]
    fn file_emulator_allocates_correct_num_bytes() {
        let mut disk_emu = emulator(4);
        disk_emu.sync_disk().unwrap();
        assert_eq!(disk_emu.into_file().metadata().unwrap().len(), 4 * 256);
    }

    #[test]
    fn can_read_and_write_blocks() {
        let mut disk_emu = emulator(4);

        disk_emu.write_block(2, &[0x55; 256]).unwrap();

        let mut read_block = vec![0xff; 256];
        disk_emu.read_block(3, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x00; 256]);

        disk_emu.read_block(2, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x55; 256]);
    }

    #[test]
    fn can_read_and_write_start_and_end_blocks() {
        let mut disk_emu = emulator(2);
        let mut read_block = vec![0x00; 256];

        disk_emu.write_block(0, &[0x11; 256]).unwrap();
        disk_emu.write_block(1, &[0x22; 256]).unwrap();

        disk_emu.read_block(0, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x11; 256]);
        disk_emu.read_block(1, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x22; 256]);
    }

    #[test]
    fn block_beyond_range_is_an_error() {
        let mut disk_emu = emulator(1);
        let mut block = vec![0x55; 256];

        assert!(disk_emu.write_block(1, &block).is_err());
        assert!(disk_emu.read_block(1, &mut block).is_err());
    }

    #[test]
    fn partial_block_buffers_are_rejected() {
        let mut disk_emu = emulator(1);
        assert!(disk_emu.write_block(0, &[0x55; 128]).is_err());
        assert!(disk_emu.read_block(0, &mut [0; 128]).is_err());
    }

    #[test]
    fn reopening_without_clearing_keeps_data() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        let mut first = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_block_size(256)
            .with_block_count(2)
            .build()
            .unwrap();
        first.write_block(1, &[0x7e; 256]).unwrap();
        first.sync_disk().unwrap();

        let mut second = FileBlockEmulator::open_disk(disk.path(), 256, 2).unwrap();
        let mut read_block = vec![0; 256];
        second.read_block(1, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x7e; 256]);
    }
}
