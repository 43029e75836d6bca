//! Encoding of operation descriptors and packet headers exchanged with the
//! device array server. Nothing in here performs I/O.
//!
//! # Descriptor layout
//! ```text
//!  31    28 27        20 19     14 13      8 7         0
//! +--------+------------+---------+---------+-----------+
//! |  disk  |   block    | command | (zero)  | reserved  |
//! +--------+------------+---------+---------+-----------+
//! ```
use crate::error::{ArrayError, Result};

use zerocopy::byteorder::{NetworkEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

/// Size in bytes of the fixed packet header preceding every request and response.
pub const HEADER_LEN: usize = 8;

const RESERVED_SHIFT: u32 = 0;
const RESERVED_BITS: u32 = 8;
const UNUSED_SHIFT: u32 = 8;
const UNUSED_BITS: u32 = 6;
const COMMAND_SHIFT: u32 = 14;
const COMMAND_BITS: u32 = 6;
const BLOCK_SHIFT: u32 = 20;
const BLOCK_BITS: u32 = 8;
const DISK_SHIFT: u32 = 28;
const DISK_BITS: u32 = 4;

/// Largest disk index representable in a descriptor.
pub const MAX_DISKS: u32 = 1 << DISK_BITS;
/// Largest number of blocks per disk representable in a descriptor.
pub const MAX_BLOCKS_PER_DISK: u32 = 1 << BLOCK_BITS;

const fn mask(bits: u32) -> u32 {
    (1 << bits) - 1
}

fn field(raw: u32, shift: u32, bits: u32) -> u32 {
    (raw >> shift) & mask(bits)
}

/// Commands understood by the device array.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Mount = 0,
    Unmount = 1,
    SeekToDisk = 2,
    SeekToBlock = 3,
    ReadBlock = 4,
    WriteBlock = 5,
    /// Never issued by the client; recognized so its response payload is consumed.
    SignBlock = 6,
}

/// Number of distinct commands.
pub const COMMAND_COUNT: usize = 7;

impl Command {
    pub const ALL: [Command; COMMAND_COUNT] = [
        Command::Mount,
        Command::Unmount,
        Command::SeekToDisk,
        Command::SeekToBlock,
        Command::ReadBlock,
        Command::WriteBlock,
        Command::SignBlock,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Command::ALL.iter().copied().find(|c| *c as u32 == raw)
    }

    /// Whether a request for this command is followed by one block of payload.
    pub fn request_carries_block(self) -> bool {
        self == Command::WriteBlock
    }

    /// Whether a response to this command is followed by one block of payload.
    pub fn response_carries_block(self) -> bool {
        matches!(self, Command::ReadBlock | Command::SignBlock)
    }
}

/// Identifies a target disk/block and the command to run against it.
///
/// Fields are checked against their bit widths on construction, so encoding
/// never truncates one field into its neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    disk: u32,
    block: u32,
    command: Command,
    reserved: u32,
}

impl Descriptor {
    pub fn new(disk: u32, block: u32, command: Command, reserved: u32) -> Result<Self> {
        if disk > mask(DISK_BITS) {
            return Err(ArrayError::invalid(format!(
                "disk index {} does not fit in {} bits",
                disk, DISK_BITS
            )));
        }
        if block > mask(BLOCK_BITS) {
            return Err(ArrayError::invalid(format!(
                "block index {} does not fit in {} bits",
                block, BLOCK_BITS
            )));
        }
        if reserved > mask(RESERVED_BITS) {
            return Err(ArrayError::invalid(format!(
                "reserved value {} does not fit in {} bits",
                reserved, RESERVED_BITS
            )));
        }
        Ok(Self {
            disk,
            block,
            command,
            reserved,
        })
    }

    /// A descriptor carrying only a command, such as MOUNT or READ_BLOCK.
    pub fn command_only(command: Command) -> Self {
        Self {
            disk: 0,
            block: 0,
            command,
            reserved: 0,
        }
    }

    pub fn seek_to_disk(disk: u32) -> Result<Self> {
        Self::new(disk, 0, Command::SeekToDisk, 0)
    }

    pub fn seek_to_block(block: u32) -> Result<Self> {
        Self::new(0, block, Command::SeekToBlock, 0)
    }

    pub fn disk(&self) -> u32 {
        self.disk
    }

    pub fn block(&self) -> u32 {
        self.block
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Packs the descriptor into its wire form.
    pub fn encode(&self) -> u32 {
        (self.reserved << RESERVED_SHIFT)
            | ((self.command as u32) << COMMAND_SHIFT)
            | (self.block << BLOCK_SHIFT)
            | (self.disk << DISK_SHIFT)
    }

    /// Unpacks every field of a wire descriptor. Only the server side needs
    /// the disk and block fields; clients use [`decode_command`].
    pub fn decode(raw: u32) -> Result<Self> {
        if field(raw, UNUSED_SHIFT, UNUSED_BITS) != 0 {
            return Err(ArrayError::invalid(format!(
                "descriptor {:#010x} has unused bits set",
                raw
            )));
        }
        let command = decode_command(raw).ok_or_else(|| {
            ArrayError::invalid(format!(
                "descriptor {:#010x} names unknown command {}",
                raw,
                field(raw, COMMAND_SHIFT, COMMAND_BITS)
            ))
        })?;
        Ok(Self {
            disk: field(raw, DISK_SHIFT, DISK_BITS),
            block: field(raw, BLOCK_SHIFT, BLOCK_BITS),
            command,
            reserved: field(raw, RESERVED_SHIFT, RESERVED_BITS),
        })
    }
}

/// Extracts just the command field of a wire descriptor.
pub fn decode_command(raw: u32) -> Option<Command> {
    Command::from_raw(field(raw, COMMAND_SHIFT, COMMAND_BITS))
}

/// The fixed header of every packet, stored in network byte order.
#[repr(C)]
#[derive(AsBytes, FromBytes, Unaligned, Clone, Copy)]
pub struct PacketHeader {
    length: U16<NetworkEndian>,
    op: U32<NetworkEndian>,
    status: U16<NetworkEndian>,
}

impl PacketHeader {
    pub fn new(length: u16, op: u32, status: u16) -> Self {
        Self {
            length: U16::new(length),
            op: U32::new(op),
            status: U16::new(status),
        }
    }

    /// Header for a client request. Requests always carry a zero status and
    /// include one block of payload only for WRITE_BLOCK.
    pub fn request(descriptor: &Descriptor, block_size: u16) -> Self {
        let length = if descriptor.command().request_carries_block() {
            HEADER_LEN as u16 + block_size
        } else {
            HEADER_LEN as u16
        };
        Self::new(length, descriptor.encode(), 0)
    }

    /// Header for a server response echoing the request's descriptor.
    pub fn response(op: u32, status: u16, block_size: u16) -> Self {
        let carries_block = decode_command(op)
            .map(Command::response_carries_block)
            .unwrap_or(false);
        let length = if carries_block {
            HEADER_LEN as u16 + block_size
        } else {
            HEADER_LEN as u16
        };
        Self::new(length, op, status)
    }

    /// Reads a header from the front of `buf`. Returns `None` if `buf` is
    /// shorter than [`HEADER_LEN`].
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        LayoutVerified::<_, PacketHeader>::new(&buf[..HEADER_LEN]).map(|header| *header)
    }

    pub fn length(&self) -> u16 {
        self.length.get()
    }

    pub fn op(&self) -> u32 {
        self.op.get()
    }

    pub fn status(&self) -> u16 {
        self.status.get()
    }

    pub fn command(&self) -> Option<Command> {
        decode_command(self.op())
    }

    /// Number of payload bytes declared to follow this header.
    pub fn payload_len(&self) -> usize {
        (self.length() as usize).saturating_sub(HEADER_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_land_in_disjoint_bit_ranges() {
        let d = Descriptor::new(0xf, 0xff, Command::SignBlock, 0xff).unwrap();
        assert_eq!(d.encode(), 0xfff1_80ff);

        let only_disk = Descriptor::new(3, 0, Command::Mount, 0).unwrap();
        assert_eq!(only_disk.encode(), 3 << 28);

        let only_block = Descriptor::seek_to_block(255).unwrap();
        assert_eq!(only_block.encode(), (255 << 20) | (3 << 14));
    }

    #[test]
    fn large_block_does_not_leak_into_command() {
        let d = Descriptor::new(0, 255, Command::ReadBlock, 0).unwrap();
        assert_eq!(decode_command(d.encode()), Some(Command::ReadBlock));
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        assert!(matches!(
            Descriptor::new(16, 0, Command::SeekToDisk, 0),
            Err(ArrayError::InvalidArgument(_))
        ));
        assert!(matches!(
            Descriptor::seek_to_block(256),
            Err(ArrayError::InvalidArgument(_))
        ));
        assert!(matches!(
            Descriptor::new(0, 0, Command::Mount, 256),
            Err(ArrayError::InvalidArgument(_))
        ));
    }

    #[test]
    fn server_decode_recovers_all_fields() {
        let d = Descriptor::new(7, 200, Command::WriteBlock, 9).unwrap();
        let decoded = Descriptor::decode(d.encode()).unwrap();
        assert_eq!(decoded, d);
        assert_eq!(decoded.reserved(), 9);
    }

    #[test]
    fn server_decode_rejects_unknown_command_and_stray_bits() {
        assert!(Descriptor::decode(63 << 14).is_err());
        assert!(Descriptor::decode(1 << 9).is_err());
    }

    #[test]
    fn request_length_includes_block_only_for_writes() {
        for command in Command::ALL.iter().copied() {
            let header = PacketHeader::request(&Descriptor::command_only(command), 256);
            let expected = if command == Command::WriteBlock { 264 } else { 8 };
            assert_eq!(header.length(), expected, "{:?}", command);
            assert_eq!(header.status(), 0);
        }
    }

    #[test]
    fn response_length_includes_block_for_reads_and_signs() {
        for command in Command::ALL.iter().copied() {
            let op = Descriptor::command_only(command).encode();
            let header = PacketHeader::response(op, 0, 256);
            let expected = match command {
                Command::ReadBlock | Command::SignBlock => 264,
                _ => 8,
            };
            assert_eq!(header.length(), expected, "{:?}", command);
        }
    }

    #[test]
    fn header_is_network_byte_order() {
        let header = PacketHeader::new(0x0108, 0x0010_c000, 0x0002);
        assert_eq!(
            header.as_bytes(),
            &[0x01, 0x08, 0x00, 0x10, 0xc0, 0x00, 0x00, 0x02]
        );

        let parsed = PacketHeader::parse(header.as_bytes()).unwrap();
        assert_eq!(parsed.length(), 0x0108);
        assert_eq!(parsed.op(), 0x0010_c000);
        assert_eq!(parsed.status(), 2);
    }

    #[test]
    fn short_buffer_has_no_header() {
        assert!(PacketHeader::parse(&[0; 7]).is_none());
    }
}
