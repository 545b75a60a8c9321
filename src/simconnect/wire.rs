//! Low-level wire primitives shared by all packet types.
//!
//! Every top-level structure travels in a frame:
//!
//! ```text
//! ┌──────────────┬──────────────┬────────────────┬──────────────┐
//! │ Magic (u32)  │ Size (u32)   │ Version (u32)  │ Body         │
//! │ per struct   │ bytes after  │ per struct     │ field layout │
//! └──────────────┴──────────────┴────────────────┴──────────────┘
//! ```
//!
//! All integers and floats are big-endian. Short strings carry a u8 length,
//! long strings a u16 length; neither is null terminated on the wire.

use bytes::{Buf, BufMut, BytesMut};

use super::error::ProtocolError;

/// Magic number and size field preceding the versioned body
pub const FRAME_PREFIX_SIZE: usize = 8;

/// Longest text a short string field carries
pub const SHORT_STRING_MAX: usize = u8::MAX as usize;

/// Longest text a long string field carries
pub const LONG_STRING_MAX: usize = u16::MAX as usize;

/// Largest size field accepted, anything beyond it is a broken or hostile peer
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Sentinel for an unset coordinate or altitude
pub const INVALID_ORDINATE: f32 = f32::MAX;

/// Cut `text` to at most `max` bytes without splitting a UTF-8 character
pub fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Append a string with a one byte length prefix, truncating silently
pub fn put_short_string(buf: &mut BytesMut, text: &str) {
    let text = truncate_utf8(text, SHORT_STRING_MAX);
    buf.put_u8(text.len() as u8);
    buf.put_slice(text.as_bytes());
}

/// Append a string with a two byte length prefix, truncating silently
pub fn put_long_string(buf: &mut BytesMut, text: &str) {
    let text = truncate_utf8(text, LONG_STRING_MAX);
    buf.put_u16(text.len() as u16);
    buf.put_slice(text.as_bytes());
}

/// Write a complete frame and return the number of bytes appended.
///
/// The size field is back-patched once the body is known.
pub fn write_frame(
    buf: &mut BytesMut,
    magic: u32,
    version: u32,
    body: impl FnOnce(&mut BytesMut),
) -> usize {
    let start = buf.len();
    buf.put_u32(magic);
    let size_pos = buf.len();
    buf.put_u32(0);
    buf.put_u32(version);
    body(buf);

    let size = (buf.len() - size_pos - 4) as u32;
    buf[size_pos..size_pos + 4].copy_from_slice(&size.to_be_bytes());
    buf.len() - start
}

/// Total length of the frame at the start of `buf`.
///
/// Returns `Ok(None)` while the buffer is too short to tell or to hold the
/// whole frame. Nothing is consumed. A size field above [`MAX_FRAME_SIZE`]
/// is rejected before any of the body is buffered.
pub fn frame_length(buf: &[u8], magic: u32) -> Result<Option<usize>, ProtocolError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let found = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if found != magic {
        return Err(ProtocolError::InvalidMagicNumber {
            expected: magic,
            found,
        });
    }

    if buf.len() < FRAME_PREFIX_SIZE {
        return Ok(None);
    }

    let size = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    let total = FRAME_PREFIX_SIZE + size;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(total))
}

/// Decode one frame from the front of `buf`.
///
/// The frame is only consumed once it decoded successfully, so a short buffer
/// can be retried after more bytes arrived. On error the buffer is left as is
/// and the caller is expected to drop the session.
pub fn read_frame<T>(
    buf: &mut BytesMut,
    magic: u32,
    version: u32,
    decode: impl FnOnce(&mut WireReader<'_>) -> Result<T, ProtocolError>,
) -> Result<Option<T>, ProtocolError> {
    let Some(total) = frame_length(buf, magic)? else {
        return Ok(None);
    };

    let value = {
        let mut reader = WireReader::new(&buf[FRAME_PREFIX_SIZE..total]);
        let found = reader.u32()?;
        if found != version {
            return Err(ProtocolError::VersionMismatch {
                expected: version,
                found,
            });
        }
        decode(&mut reader)?
    };

    buf.advance(total);
    Ok(Some(value))
}

/// Bounds-checked cursor over a frame body
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn i16(&mut self) -> Result<i16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn i64(&mut self) -> Result<i64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn f32(&mut self) -> Result<f32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn f64(&mut self) -> Result<f64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn short_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u8()? as usize;
        self.string_bytes(len)
    }

    pub fn long_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u16()? as usize;
        self.string_bytes(len)
    }

    fn string_bytes(&mut self, len: usize) -> Result<String, ProtocolError> {
        self.need(len)?;
        let text = String::from_utf8_lossy(&self.buf[..len]).into_owned();
        self.buf.advance(len);
        Ok(text)
    }
}
