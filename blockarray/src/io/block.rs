use std::path::Path;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available. Blocks of every disk in the
/// array are numbered consecutively, disk 0 first.
pub type BlockNumber = usize;

/// Flat block storage backing an emulated device array.
pub trait BlockStorage {
    /// Opens existing storage at the specified path. This method does not
    /// validate the storage blocks, it is up to clients to ensure the medium
    /// was initialized with the same geometry.
    fn open_disk<P: AsRef<Path>>(path: P, block_size: usize, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    fn block_size(&self) -> usize;
    fn block_count(&self) -> usize;
    /// Reads one block into the front of `buf`.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or into a buffer smaller than
    /// a block, will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes the first block worth of `buf` into the specified block number.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range, or from a buffer smaller than
    /// a block, will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}
