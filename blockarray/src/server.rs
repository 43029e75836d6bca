//! An emulated device array server. It executes the same wire protocol a
//! real array speaks, against any [`BlockStorage`], and is used to exercise
//! clients end to end.
use crate::codec::{Command, Descriptor, PacketHeader, COMMAND_COUNT, HEADER_LEN};
use crate::error::{ArrayError, Result};
use crate::geometry::Geometry;
use crate::io::BlockStorage;
use crate::transport::{recv_exact, send_all};

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpListener;
use zerocopy::AsBytes;

/// Status codes carried in response headers.
pub mod status {
    pub const OK: u16 = 0;
    pub const NOT_MOUNTED: u16 = 1;
    pub const ALREADY_MOUNTED: u16 = 2;
    pub const OUT_OF_RANGE: u16 = 3;
    pub const BAD_COMMAND: u16 = 4;
    pub const STORAGE: u16 = 5;
}

/// Server side state of one device array: the disks, whether they are
/// mounted and the cursor that seeks position and block I/O advances.
pub struct DeviceArray<T> {
    storage: T,
    geometry: Geometry,
    mounted: bool,
    disk: u32,
    block: u32,
    calls: [u64; COMMAND_COUNT],
}

impl<T: BlockStorage> DeviceArray<T> {
    pub fn new(storage: T, geometry: Geometry) -> Result<Self> {
        if storage.block_size() != geometry.block_size() as usize
            || storage.block_count() != geometry.total_blocks()
        {
            return Err(ArrayError::invalid(format!(
                "storage holds {} blocks of {} bytes, geometry needs {} blocks of {} bytes",
                storage.block_count(),
                storage.block_size(),
                geometry.total_blocks(),
                geometry.block_size()
            )));
        }
        Ok(Self {
            storage,
            geometry,
            mounted: false,
            disk: 0,
            block: 0,
            calls: [0; COMMAND_COUNT],
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Current `(disk, block)` cursor position.
    pub fn cursor(&self) -> (u32, u32) {
        (self.disk, self.block)
    }

    /// How many requests for `command` have been executed.
    pub fn calls(&self, command: Command) -> u64 {
        self.calls[command as usize]
    }

    pub fn into_storage(self) -> T {
        self.storage
    }

    fn advance(&mut self) {
        self.block += 1;
        if self.block == self.geometry.blocks_per_disk() {
            self.block = 0;
            self.disk = (self.disk + 1) % self.geometry.disks();
        }
    }

    /// Runs one command. `block` carries the payload of a write and receives
    /// the payload of a read or sign; it must hold at least one block.
    pub fn execute(&mut self, descriptor: &Descriptor, block: &mut [u8]) -> u16 {
        let command = descriptor.command();
        self.calls[command as usize] += 1;
        trace!(
            "{:?} disk={} block={} reserved={} at cursor {:?}",
            command,
            descriptor.disk(),
            descriptor.block(),
            descriptor.reserved(),
            self.cursor()
        );

        match command {
            Command::Mount if self.mounted => status::ALREADY_MOUNTED,
            Command::Mount => {
                self.mounted = true;
                status::OK
            }
            Command::Unmount if !self.mounted => status::NOT_MOUNTED,
            Command::Unmount => {
                self.mounted = false;
                status::OK
            }
            _ if !self.mounted => status::NOT_MOUNTED,
            Command::SeekToDisk => {
                if descriptor.disk() >= self.geometry.disks() {
                    return status::OUT_OF_RANGE;
                }
                self.disk = descriptor.disk();
                self.block = 0;
                status::OK
            }
            Command::SeekToBlock => {
                if descriptor.block() >= self.geometry.blocks_per_disk() {
                    return status::OUT_OF_RANGE;
                }
                self.block = descriptor.block();
                status::OK
            }
            Command::ReadBlock | Command::SignBlock => {
                let blocknr = self.geometry.linear_block(self.disk, self.block);
                if let Err(e) = self.storage.read_block(blocknr, block) {
                    warn!("Reading block {} failed: {}", blocknr, e);
                    return status::STORAGE;
                }
                if command == Command::ReadBlock {
                    self.advance();
                }
                status::OK
            }
            Command::WriteBlock => {
                let blocknr = self.geometry.linear_block(self.disk, self.block);
                if let Err(e) = self.storage.write_block(blocknr, block) {
                    warn!("Writing block {} failed: {}", blocknr, e);
                    return status::STORAGE;
                }
                self.advance();
                status::OK
            }
        }
    }

    /// Builds the complete response packet for one request.
    fn respond(&mut self, request: &PacketHeader, payload: &[u8]) -> Vec<u8> {
        let block_size = self.geometry.block_size() as usize;
        let mut block = vec![0; block_size];

        let status = match Descriptor::decode(request.op()) {
            Ok(descriptor) => {
                let expected = if descriptor.command().request_carries_block() {
                    block_size
                } else {
                    0
                };
                if payload.len() != expected {
                    warn!(
                        "{:?} request carried {} payload bytes, expected {}.",
                        descriptor.command(),
                        payload.len(),
                        expected
                    );
                    status::BAD_COMMAND
                } else {
                    block[..payload.len()].copy_from_slice(payload);
                    self.execute(&descriptor, &mut block)
                }
            }
            Err(e) => {
                warn!("Rejecting request: {}", e);
                status::BAD_COMMAND
            }
        };

        let header = PacketHeader::response(request.op(), status, block_size as u16);
        let mut packet = header.as_bytes().to_vec();
        if header.payload_len() > 0 {
            packet.extend_from_slice(&block);
        }
        packet
    }

    /// Answers requests arriving on `stream` until the peer closes it.
    pub fn serve<S: Read + Write>(&mut self, stream: &mut S) -> io::Result<()> {
        loop {
            let mut raw = [0; HEADER_LEN];
            match recv_exact(stream, &mut raw) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    debug!("Client closed the connection.");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            let header = PacketHeader::parse(&raw)
                .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "short packet header"))?;
            let mut payload = vec![0; header.payload_len()];
            recv_exact(stream, &mut payload)?;

            let reply = self.respond(&header, &payload);
            send_all(stream, &reply)?;
        }
    }

    /// Accepts a single connection on `listener` and serves it to completion.
    pub fn serve_one(&mut self, listener: &TcpListener) -> io::Result<()> {
        let (mut stream, peer) = listener.accept()?;
        info!("Serving device array to {}.", peer);
        let result = self.serve(&mut stream);
        info!("Connection from {} finished.", peer);
        result
    }
}

/// An in-process stream to a [`DeviceArray`]: requests written to it are
/// executed as soon as they are complete and their responses become
/// readable.
pub struct Loopback<T> {
    array: DeviceArray<T>,
    pending: Vec<u8>,
    replies: VecDeque<u8>,
}

impl<T: BlockStorage> Loopback<T> {
    pub fn new(array: DeviceArray<T>) -> Self {
        Self {
            array,
            pending: Vec::new(),
            replies: VecDeque::new(),
        }
    }

    pub fn array(&self) -> &DeviceArray<T> {
        &self.array
    }

    pub fn into_array(self) -> DeviceArray<T> {
        self.array
    }

    fn process_pending(&mut self) {
        while let Some(header) = PacketHeader::parse(&self.pending) {
            let frame_len = HEADER_LEN + header.payload_len();
            if self.pending.len() < frame_len {
                return;
            }
            let frame: Vec<u8> = self.pending.drain(..frame_len).collect();
            let reply = self.array.respond(&header, &frame[HEADER_LEN..]);
            self.replies.extend(reply);
        }
    }
}

impl<T: BlockStorage> Write for Loopback<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.process_pending();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: BlockStorage> Read for Loopback<T> {
    /// Reads buffered replies. Reading with nothing queued behaves like a
    /// closed connection.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.replies.len());
        for (dst, src) in buf.iter_mut().zip(self.replies.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}
