//! Framer/Transport (C2, `spec.md` §4.2): reads and writes exactly one
//! framed message at a time over a TCP or Unix-domain stream.
//!
//! Grounded on the teacher's socket-handling idiom (blocking I/O with an
//! OS-level read timeout rather than a manual poll loop), adapted from a
//! continuous-stream protocol to MX's "header first, then body sized by
//! the header" framing.

use crate::buffer::MessageBuffer;
use crate::error::{ErrorKind, MxNetError, Result};
use crate::header::{MessageHeader, CURRENT_HEADER_LENGTH, LEGACY_HEADER_LENGTH};
use byteorder::{BigEndian, ByteOrder};
use std::io::{Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// The first three words of any header - magic, header length, message
/// length - are always present regardless of protocol version
/// (`spec.md` §4.3), so this much can always be read before the rest of
/// the header's length is known.
const PREFIX_LENGTH: usize = 12;

/// The underlying byte stream. MX speaks the same framing over either
/// transport (`spec.md` §4.10 "Address"); only connection setup differs.
pub enum Socket {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Socket {
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Socket::Tcp(s) => s.set_read_timeout(timeout)?,
            #[cfg(unix)]
            Socket::Unix(s) => s.set_read_timeout(timeout)?,
        }
        Ok(())
    }

    pub fn try_clone(&self) -> Result<Socket> {
        Ok(match self {
            Socket::Tcp(s) => Socket::Tcp(s.try_clone()?),
            #[cfg(unix)]
            Socket::Unix(s) => Socket::Unix(s.try_clone()?),
        })
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Socket::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Socket::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Socket::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Socket::Unix(s) => s.flush(),
        }
    }
}

/// Wraps one [`Socket`] with the framing contract: send a header plus a
/// body, receive a header plus the body it announces.
pub struct Transport {
    socket: Socket,
    /// Header length this side writes with (`spec.md` §4.3: negotiated
    /// once at connect time, then fixed for the life of the connection).
    local_header_length: u32,
}

impl Transport {
    pub fn new(socket: Socket) -> Transport {
        Transport {
            socket,
            local_header_length: CURRENT_HEADER_LENGTH,
        }
    }

    pub fn set_local_header_length(&mut self, header_length: u32) {
        self.local_header_length = header_length;
    }

    pub fn try_clone(&self) -> Result<Transport> {
        Ok(Transport {
            socket: self.socket.try_clone()?,
            local_header_length: self.local_header_length,
        })
    }

    /// Writes `header` (with `message_length` set to `body.len()`)
    /// followed by `body` (`spec.md` §4.2 "send").
    pub fn send(&mut self, mut header: MessageHeader, body: &[u8]) -> Result<()> {
        header.header_length = self.local_header_length;
        header.message_length = body.len() as u32;
        let mut frame = vec![0u8; self.local_header_length as usize];
        header.encode(&mut frame)?;
        self.socket.write_all(&frame)?;
        self.socket.write_all(body)?;
        self.socket.flush()?;
        Ok(())
    }

    /// Reads one complete message: the prefix (magic/header-length/
    /// message-length), then the remainder of the header and the body it
    /// announces, growing `buffer` as needed (`spec.md` §4.2 "receive").
    /// `deadline` bounds the whole read; `None` blocks forever.
    pub fn receive(&mut self, buffer: &mut MessageBuffer, deadline: Option<Duration>) -> Result<MessageHeader> {
        self.socket.set_read_timeout(deadline)?;

        let mut prefix = [0u8; PREFIX_LENGTH];
        self.socket.read_exact(&mut prefix)?;

        let peer_header_length = BigEndian::read_u32(&prefix[4..8]);
        if peer_header_length < LEGACY_HEADER_LENGTH {
            return Err(MxNetError::new(
                ErrorKind::CorruptDataStructure,
                format!("peer reported implausible header length {}", peer_header_length),
            ));
        }
        let message_length = BigEndian::read_u32(&prefix[8..12]);

        let total = peer_header_length as usize + message_length as usize;
        buffer.ensure_capacity(total);
        let rest = buffer.slice_mut(total);
        rest[..PREFIX_LENGTH].copy_from_slice(&prefix);
        self.socket.read_exact(&mut rest[PREFIX_LENGTH..peer_header_length as usize])?;
        self.socket
            .read_exact(&mut rest[peer_header_length as usize..total])?;

        MessageHeader::decode(&buffer.as_bytes()[..peer_header_length as usize], peer_header_length)
    }
}
