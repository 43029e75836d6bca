use crate::cache::{BlockCache, NoCache};
use crate::codec::{Command, Descriptor};
use crate::error::{ArrayError, Result};
use crate::geometry::{ArrayConfig, BlockAddress, Geometry};
use crate::mount::MountState;
use crate::transport::Session;

use std::convert::TryFrom;
use std::io::{Read, Write};
use std::net::TcpStream;

/// Presents the device array behind a [`Session`] as one linear range of
/// bytes.
///
/// Every byte range is split into whole block operations. The server keeps
/// an implicit cursor that READ_BLOCK and WRITE_BLOCK advance, so the
/// cursor is repositioned with SEEK_TO_DISK and SEEK_TO_BLOCK before every
/// block access.
pub struct ArrayClient<S, C = NoCache> {
    session: Session<S>,
    state: MountState,
    config: ArrayConfig,
    cache: C,
}

impl<C: BlockCache> ArrayClient<TcpStream, C> {
    /// Opens a TCP session to the array server at `ip:port`.
    pub fn connect(ip: &str, port: u16, config: ArrayConfig, cache: C) -> Result<Self> {
        let block_size = wire_block_size(&config.geometry)?;
        let session = Session::connect(ip, port, block_size)?;
        Ok(Self::new(session, config, cache))
    }
}

impl<S: Read + Write, C: BlockCache> ArrayClient<S, C> {
    pub fn new(session: Session<S>, config: ArrayConfig, cache: C) -> Self {
        debug_assert_eq!(
            session.block_size(),
            config.geometry.block_size() as usize,
            "session and geometry disagree on the block size"
        );
        Self {
            session,
            state: MountState::default(),
            config,
            cache,
        }
    }

    /// Builds a client over an already connected stream.
    pub fn from_stream(stream: S, config: ArrayConfig, cache: C) -> Result<Self> {
        let block_size = wire_block_size(&config.geometry)?;
        Ok(Self::new(
            Session::from_stream(stream, block_size),
            config,
            cache,
        ))
    }

    pub fn geometry(&self) -> &Geometry {
        &self.config.geometry
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn is_mounted(&self) -> bool {
        self.state.is_mounted()
    }

    /// Closes the session. The mount state is left as is; later I/O fails
    /// with a transport error.
    pub fn disconnect(&mut self) -> Option<S> {
        self.session.disconnect()
    }

    pub fn mount(&mut self) -> Result<()> {
        self.state.mount(&mut self.session)
    }

    pub fn unmount(&mut self) -> Result<()> {
        self.state.unmount(&mut self.session)
    }

    /// Reads `len` bytes starting at linear address `addr` into `buf`.
    ///
    /// A missing buffer is only accepted for a zero length read. Returns
    /// the number of bytes read, which is always `len`.
    ///
    /// # Errors
    ///
    /// Fails before any I/O if the range leaves the array, `len` exceeds
    /// the configured maximum transfer, the buffer is missing or too short,
    /// or the array is not mounted. Fails part way through if any block
    /// operation fails.
    pub fn read(&mut self, addr: u32, len: u32, buf: Option<&mut [u8]>) -> Result<u32> {
        self.validate(addr, len, buf.as_ref().map(|b| b.len()))?;
        let out = match buf {
            Some(out) if len > 0 => out,
            _ => return Ok(0),
        };

        let geometry = self.config.geometry;
        let block_size = geometry.block_size() as usize;
        let mut image = vec![0; block_size];
        let mut at = geometry.locate(addr);
        let mut done = 0;
        let mut remaining = len as usize;

        while remaining > 0 {
            self.fetch_block(at, &mut image)?;

            let offset = at.offset as usize;
            let n = remaining.min(block_size - offset);
            out[done..done + n].copy_from_slice(&image[offset..offset + n]);

            done += n;
            remaining -= n;
            at = geometry.successor(at);
        }
        Ok(len)
    }

    /// Writes `len` bytes from `buf` starting at linear address `addr`.
    ///
    /// Each touched block is read, patched and written back whole. Blocks
    /// written before a failure stay written.
    ///
    /// # Errors
    ///
    /// Same as [`ArrayClient::read`].
    pub fn write(&mut self, addr: u32, len: u32, buf: Option<&[u8]>) -> Result<u32> {
        self.validate(addr, len, buf.map(|b| b.len()))?;
        let input = match buf {
            Some(input) if len > 0 => input,
            _ => return Ok(0),
        };

        let geometry = self.config.geometry;
        let block_size = geometry.block_size() as usize;
        let mut image = vec![0; block_size];
        let mut at = geometry.locate(addr);
        let mut done = 0;
        let mut remaining = len as usize;

        while remaining > 0 {
            let resident = self.fetch_block(at, &mut image)?;

            let offset = at.offset as usize;
            let n = remaining.min(block_size - offset);
            image[offset..offset + n].copy_from_slice(&input[done..done + n]);

            // Fetching the old image moved the cursor past this block.
            self.seek(at)?;
            self.session.call(
                Descriptor::command_only(Command::WriteBlock),
                Some(&mut image[..]),
            )?;
            if self.cache.enabled() {
                if resident {
                    self.cache.update(at.disk, at.block, &image);
                } else {
                    self.cache.insert(at.disk, at.block, &image);
                }
            }

            done += n;
            remaining -= n;
            at = geometry.successor(at);
        }
        Ok(len)
    }

    /// Reads `buf.len()` bytes starting at `addr`.
    pub fn read_at(&mut self, addr: u32, buf: &mut [u8]) -> Result<u32> {
        let len = transfer_len(buf.len())?;
        self.read(addr, len, Some(buf))
    }

    /// Writes all of `buf` starting at `addr`.
    pub fn write_at(&mut self, addr: u32, buf: &[u8]) -> Result<u32> {
        let len = transfer_len(buf.len())?;
        self.write(addr, len, Some(buf))
    }

    fn validate(&self, addr: u32, len: u32, buf_len: Option<usize>) -> Result<()> {
        let capacity = self.config.geometry.capacity();
        if u64::from(addr) + u64::from(len) > capacity {
            return Err(ArrayError::invalid(format!(
                "range {}+{} exceeds array capacity {}",
                addr, len, capacity
            )));
        }
        if len > self.config.max_transfer {
            return Err(ArrayError::invalid(format!(
                "length {} exceeds maximum transfer of {} bytes",
                len, self.config.max_transfer
            )));
        }
        match buf_len {
            None if len > 0 => {
                return Err(ArrayError::invalid(format!(
                    "no buffer supplied for {} bytes",
                    len
                )))
            }
            Some(n) if n < len as usize => {
                return Err(ArrayError::invalid(format!(
                    "buffer of {} bytes is shorter than length {}",
                    n, len
                )))
            }
            _ => {}
        }
        self.state.ensure_mounted()
    }

    fn seek(&mut self, at: BlockAddress) -> Result<()> {
        self.session.call(Descriptor::seek_to_disk(at.disk)?, None)?;
        self.session.call(Descriptor::seek_to_block(at.block)?, None)
    }

    /// Positions the cursor on `at` and fills `image` with the block's
    /// current contents, from the cache when possible. On return the remote
    /// cursor sits just past the block either way.
    ///
    /// Returns whether the block is now held by the cache.
    fn fetch_block(&mut self, at: BlockAddress, image: &mut [u8]) -> Result<bool> {
        self.seek(at)?;
        let read = Descriptor::command_only(Command::ReadBlock);
        if !self.cache.enabled() {
            self.session.call(read, Some(&mut *image))?;
            return Ok(false);
        }

        if self.cache.lookup(at.disk, at.block, image) {
            // Mirror the advance a physical read would have made.
            let next = self.config.geometry.successor(at);
            if next.disk != at.disk {
                self.session.call(Descriptor::seek_to_disk(next.disk)?, None)?;
            }
            self.session
                .call(Descriptor::seek_to_block(next.block)?, None)?;
            return Ok(true);
        }

        debug!("Cache miss for disk {} block {}.", at.disk, at.block);
        self.session.call(read, Some(&mut *image))?;
        self.cache.insert(at.disk, at.block, image);
        Ok(true)
    }
}

fn wire_block_size(geometry: &Geometry) -> Result<u16> {
    u16::try_from(geometry.block_size()).map_err(|_| {
        ArrayError::invalid(format!(
            "block size {} does not fit the packet length field",
            geometry.block_size()
        ))
    })
}

fn transfer_len(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| ArrayError::invalid(format!("buffer of {} bytes is too large", len)))
}
