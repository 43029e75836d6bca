use crate::codec::{Command, Descriptor, PacketHeader, HEADER_LEN};
use crate::error::{ArrayError, Result};

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};
use zerocopy::AsBytes;

/// Upper bound on consecutive `Interrupted` results tolerated by a single
/// transfer before giving up.
const MAX_INTERRUPTS: usize = 16;

/// Writes all of `buf`, failing if the stream stops accepting bytes.
pub(crate) fn send_all<W: Write>(stream: &mut W, mut buf: &[u8]) -> io::Result<()> {
    let mut interrupts = 0;
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "stream accepted no bytes",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                interrupts = 0;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted && interrupts < MAX_INTERRUPTS => {
                interrupts += 1;
            }
            Err(e) => return Err(e),
        }
    }
    stream.flush()
}

/// Fills all of `buf`, failing on end of stream.
pub(crate) fn recv_exact<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    let mut interrupts = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("stream closed after {} of {} bytes", filled, buf.len()),
                ))
            }
            Ok(n) => {
                filled += n;
                interrupts = 0;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted && interrupts < MAX_INTERRUPTS => {
                interrupts += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// One connection to a device array server. Every [`Session::call`] sends a
/// single request and blocks until its response has been read in full.
pub struct Session<S> {
    stream: Option<S>,
    block_size: u16,
}

impl Session<TcpStream> {
    /// Opens a TCP session to the server at `ip:port`.
    pub fn connect(ip: &str, port: u16, block_size: u16) -> Result<Self> {
        let addr = format!("{}:{}", ip, port);
        let ip: Ipv4Addr = ip.parse().map_err(|e| ArrayError::Connect {
            addr: addr.clone(),
            source: io::Error::new(ErrorKind::InvalidInput, e),
        })?;
        let stream = TcpStream::connect(SocketAddrV4::new(ip, port)).map_err(|source| {
            ArrayError::Connect {
                addr: addr.clone(),
                source,
            }
        })?;
        debug!("Connected to device array at {}.", addr);
        Ok(Session::from_stream(stream, block_size))
    }
}

impl<S: Read + Write> Session<S> {
    /// Wraps an already established stream.
    pub fn from_stream(stream: S, block_size: u16) -> Self {
        Self {
            stream: Some(stream),
            block_size,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn block_size(&self) -> usize {
        self.block_size as usize
    }

    /// Borrows the underlying stream, if the session is still open.
    pub fn get_ref(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    /// Closes the session and hands back the stream. Later calls fail with a
    /// `NotConnected` transport error.
    pub fn disconnect(&mut self) -> Option<S> {
        let stream = self.stream.take();
        if stream.is_some() {
            debug!("Disconnected from device array.");
        }
        stream
    }

    /// Performs one request/response exchange.
    ///
    /// `block` is the payload source for WRITE_BLOCK and the payload
    /// destination for READ_BLOCK and SIGN_BLOCK; it must hold at least one
    /// block for those commands and is ignored otherwise.
    ///
    /// # Errors
    ///
    /// Fails if either direction of the exchange fails, if the response is
    /// malformed, or if the server reports a nonzero status.
    pub fn call(&mut self, descriptor: Descriptor, mut block: Option<&mut [u8]>) -> Result<()> {
        let command = descriptor.command();
        let block_size = self.block_size();
        let needs_block = command.request_carries_block() || command.response_carries_block();
        if needs_block && block.as_ref().map_or(true, |b| b.len() < block_size) {
            return Err(ArrayError::invalid(format!(
                "{:?} requires a buffer of at least {} bytes",
                command, block_size
            )));
        }

        let header = PacketHeader::request(&descriptor, self.block_size);
        let mut packet = Vec::with_capacity(header.length() as usize);
        packet.extend_from_slice(header.as_bytes());
        if command.request_carries_block() {
            if let Some(buf) = block.as_ref() {
                packet.extend_from_slice(&buf[..block_size]);
            }
        }

        let stream = self.stream.as_mut().ok_or_else(|| {
            io::Error::new(ErrorKind::NotConnected, "session is disconnected")
        })?;
        trace!(
            "-> {:?} disk={} block={} ({} bytes)",
            command,
            descriptor.disk(),
            descriptor.block(),
            packet.len()
        );
        if let Err(e) = send_all(stream, &packet) {
            warn!("Sending {:?} failed: {}", command, e);
            return Err(e.into());
        }

        let response = match Self::recv_response(stream, command, block_size, block.as_deref_mut())
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Receiving response to {:?} failed: {}", command, e);
                return Err(e.into());
            }
        };
        trace!("<- {:?} status={}", response.command(), response.status());

        if response.status() != 0 {
            warn!("Device rejected {:?} with status {}.", command, response.status());
            return Err(ArrayError::Device {
                command,
                status: response.status(),
            });
        }
        Ok(())
    }

    fn recv_response(
        stream: &mut S,
        command: Command,
        block_size: usize,
        block: Option<&mut [u8]>,
    ) -> io::Result<PacketHeader> {
        let mut raw = [0; HEADER_LEN];
        recv_exact(stream, &mut raw)?;
        let header = PacketHeader::parse(&raw)
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "short packet header"))?;

        if header.command() != Some(command) {
            let mut discard = vec![0; header.payload_len()];
            recv_exact(stream, &mut discard)?;
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "response op {:#010x} does not answer {:?}",
                    header.op(),
                    command
                ),
            ));
        }

        let carries_block = command.response_carries_block();
        let expected = if carries_block { block_size } else { 0 };
        if header.payload_len() != expected {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "response declares {} payload bytes, expected {}",
                    header.payload_len(),
                    expected
                ),
            ));
        }

        if carries_block {
            match block {
                Some(buf) if buf.len() >= block_size => recv_exact(stream, &mut buf[..block_size])?,
                _ => {
                    // Drain the payload so the stream stays aligned on packet boundaries.
                    let mut discard = vec![0; block_size];
                    recv_exact(stream, &mut discard)?;
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        "response carried a block nobody asked for",
                    ));
                }
            }
        }
        Ok(header)
    }
}
