use crate::codec::{HEADER_LEN, MAX_BLOCKS_PER_DISK, MAX_DISKS};
use crate::error::{ArrayError, Result};

const DEFAULT_DISKS: u32 = 16;
const DEFAULT_BLOCKS_PER_DISK: u32 = 256;
const DEFAULT_BLOCK_SIZE: u32 = 256;
/// Largest single read or write accepted by default.
const DEFAULT_MAX_TRANSFER: u32 = 1024;

/// Shape of the device array: a fixed number of equally sized disks, each
/// split into fixed size blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    disks: u32,
    blocks_per_disk: u32,
    block_size: u32,
}

/// A linear address resolved to the disk and block that hold it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAddress {
    pub disk: u32,
    pub block: u32,
    /// Byte offset within the block.
    pub offset: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            disks: DEFAULT_DISKS,
            blocks_per_disk: DEFAULT_BLOCKS_PER_DISK,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl Geometry {
    pub fn builder() -> GeometryBuilder {
        GeometryBuilder::default()
    }

    pub fn disks(&self) -> u32 {
        self.disks
    }

    pub fn blocks_per_disk(&self) -> u32 {
        self.blocks_per_disk
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn disk_size(&self) -> u64 {
        u64::from(self.blocks_per_disk) * u64::from(self.block_size)
    }

    /// Total number of addressable bytes across every disk.
    pub fn capacity(&self) -> u64 {
        u64::from(self.disks) * self.disk_size()
    }

    /// Total number of blocks across every disk.
    pub fn total_blocks(&self) -> usize {
        self.disks as usize * self.blocks_per_disk as usize
    }

    /// Resolves `addr` to its disk, block and offset. The address must be
    /// below [`Geometry::capacity`].
    pub fn locate(&self, addr: u32) -> BlockAddress {
        debug_assert!(u64::from(addr) < self.capacity());
        let addr = u64::from(addr);
        let disk = addr / self.disk_size();
        let within_disk = addr % self.disk_size();
        BlockAddress {
            disk: disk as u32,
            block: (within_disk / u64::from(self.block_size)) as u32,
            offset: (within_disk % u64::from(self.block_size)) as u32,
        }
    }

    /// The first byte of the block following `at`, rolling over to block 0
    /// of the next disk after the last block of a disk, and back to disk 0
    /// after the last disk.
    pub fn successor(&self, at: BlockAddress) -> BlockAddress {
        if at.block + 1 < self.blocks_per_disk {
            BlockAddress {
                disk: at.disk,
                block: at.block + 1,
                offset: 0,
            }
        } else {
            BlockAddress {
                disk: (at.disk + 1) % self.disks,
                block: 0,
                offset: 0,
            }
        }
    }

    /// Position of the block in a flat, disk-major numbering of every block.
    pub fn linear_block(&self, disk: u32, block: u32) -> usize {
        disk as usize * self.blocks_per_disk as usize + block as usize
    }
}

#[derive(Debug, Default)]
pub struct GeometryBuilder {
    disks: Option<u32>,
    blocks_per_disk: Option<u32>,
    block_size: Option<u32>,
}

impl GeometryBuilder {
    pub fn with_disks(mut self, disks: u32) -> Self {
        self.disks = Some(disks);
        self
    }

    pub fn with_blocks_per_disk(mut self, blocks: u32) -> Self {
        self.blocks_per_disk = Some(blocks);
        self
    }

    /// Sets the size of a block in bytes.
    pub fn with_block_size(mut self, bytes: u32) -> Self {
        self.block_size = Some(bytes);
        self
    }

    /// Checks every dimension against what the wire format can address.
    pub fn build(self) -> Result<Geometry> {
        let defaults = Geometry::default();
        let geometry = Geometry {
            disks: self.disks.unwrap_or(defaults.disks),
            blocks_per_disk: self.blocks_per_disk.unwrap_or(defaults.blocks_per_disk),
            block_size: self.block_size.unwrap_or(defaults.block_size),
        };

        if geometry.disks == 0 || geometry.disks > MAX_DISKS {
            return Err(ArrayError::invalid(format!(
                "disk count must be within 1..={}, got {}",
                MAX_DISKS, geometry.disks
            )));
        }
        if geometry.blocks_per_disk == 0 || geometry.blocks_per_disk > MAX_BLOCKS_PER_DISK {
            return Err(ArrayError::invalid(format!(
                "blocks per disk must be within 1..={}, got {}",
                MAX_BLOCKS_PER_DISK, geometry.blocks_per_disk
            )));
        }
        let max_block = u32::from(u16::MAX) - HEADER_LEN as u32;
        if geometry.block_size == 0 || geometry.block_size > max_block {
            return Err(ArrayError::invalid(format!(
                "block size must be within 1..={}, got {}",
                max_block, geometry.block_size
            )));
        }
        Ok(geometry)
    }
}

/// Client side settings: the array geometry plus the largest transfer a
/// single read or write may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayConfig {
    pub geometry: Geometry,
    pub max_transfer: u32,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            max_transfer: DEFAULT_MAX_TRANSFER,
        }
    }
}

impl ArrayConfig {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            ..Self::default()
        }
    }

    pub fn with_max_transfer(mut self, bytes: u32) -> Self {
        self.max_transfer = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_holds_one_mebibyte() {
        let g = Geometry::default();
        assert_eq!(g.disk_size(), 65536);
        assert_eq!(g.capacity(), 1_048_576);
        assert_eq!(g.total_blocks(), 4096);
    }

    #[test]
    fn locate_splits_address_into_disk_block_offset() {
        let g = Geometry::default();
        assert_eq!(
            g.locate(250),
            BlockAddress {
                disk: 0,
                block: 0,
                offset: 250
            }
        );
        assert_eq!(
            g.locate(65279),
            BlockAddress {
                disk: 0,
                block: 254,
                offset: 255
            }
        );
        assert_eq!(
            g.locate(65536 * 3 + 257),
            BlockAddress {
                disk: 3,
                block: 1,
                offset: 1
            }
        );
        assert_eq!(
            g.locate(1_048_575),
            BlockAddress {
                disk: 15,
                block: 255,
                offset: 255
            }
        );
    }

    #[test]
    fn successor_rolls_over_disks() {
        let g = Geometry::default();
        let mid = g.locate(300);
        assert_eq!(g.successor(mid), g.locate(512));

        let last_of_disk = g.locate(65280);
        assert_eq!(g.successor(last_of_disk), g.locate(65536));

        let last_of_array = g.locate(1_048_575);
        assert_eq!(g.successor(last_of_array), g.locate(0));
    }

    #[test]
    fn builder_rejects_shapes_the_wire_cannot_address() {
        assert!(Geometry::builder().with_disks(17).build().is_err());
        assert!(Geometry::builder().with_disks(0).build().is_err());
        assert!(Geometry::builder().with_blocks_per_disk(257).build().is_err());
        assert!(Geometry::builder().with_block_size(65528).build().is_err());
        assert!(Geometry::builder().with_block_size(0).build().is_err());

        let g = Geometry::builder()
            .with_disks(2)
            .with_blocks_per_disk(4)
            .with_block_size(32)
            .build()
            .unwrap();
        assert_eq!(g.capacity(), 256);
    }
}
