use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tether_core::{
    constants::{RELIABLE_HEADER_SIZE, UNRELIABLE_HEADER_SIZE},
    error::{DecodingErrorKind, ErrorKind, Result},
};

use crate::send_option::{EnumConverter, SendMode};

/// Bytes reserved in front of a nested message: a 16-bit length plus a tag.
const MESSAGE_HEADER_SIZE: usize = 3;

/// A framing buffer with independent read and write cursors.
///
/// The buffer is the unit of application I/O: messages are composed into it
/// with the typed writers, optionally wrapped in nested length-tagged
/// frames, and handed to the send path; inbound payloads are wrapped in one
/// and consumed with the typed readers.
///
/// Storage is an `Arc<Vec<u8>>` shared with any views produced by
/// [`read_message`](MessageBuffer::read_message). Writes go through
/// `Arc::make_mut`, so a parent written to after handing out views keeps
/// those views intact instead of corrupting them.
///
/// All integer primitives are little-endian unless the `_be` variant is
/// used. The reliable ID stamped into the preamble by the reliability engine
/// is big-endian, matching the wire contract.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    data: Arc<Vec<u8>>,
    /// Absolute start of this buffer's region within `data`. Non-zero only
    /// for views.
    offset: usize,
    /// Bytes occupied by the send-option preamble.
    header: usize,
    /// Read cursor, relative to the content past the preamble.
    read_pos: usize,
    /// Write cursor, relative to the content past the preamble. For views
    /// this is fixed at the message payload length.
    write_pos: usize,
    send_mode: Option<SendMode>,
    message_tag: Option<u8>,
    /// Offsets of the length fields of currently open nested messages.
    message_starts: Vec<usize>,
    view: bool,
}

impl MessageBuffer {
    /// Creates an empty buffer with no send-option preamble.
    pub fn new(capacity: usize) -> Self {
        Self::build(None, capacity)
    }

    /// Creates a buffer whose first bytes are reserved for the wire header:
    /// one byte for [`SendMode::Unreliable`], three for
    /// [`SendMode::Reliable`] (the reliable ID is stamped on send).
    ///
    /// [`length`](MessageBuffer::length) hides the preamble from the caller.
    pub fn with_send_mode(mode: SendMode, capacity: usize) -> Self {
        Self::build(Some(mode), capacity)
    }

    /// Creates a read-ready buffer over a copy of the given bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let length = bytes.len();
        Self {
            data: Arc::new(bytes.to_vec()),
            offset: 0,
            header: 0,
            read_pos: 0,
            write_pos: length,
            send_mode: None,
            message_tag: None,
            message_starts: Vec::new(),
            view: false,
        }
    }

    fn build(mode: Option<SendMode>, capacity: usize) -> Self {
        let header = match mode {
            None => 0,
            Some(SendMode::Unreliable) => UNRELIABLE_HEADER_SIZE,
            Some(SendMode::Reliable) => RELIABLE_HEADER_SIZE,
        };
        let mut buffer = Self {
            data: Arc::new(vec![0; capacity.max(header)]),
            offset: 0,
            header,
            read_pos: 0,
            write_pos: 0,
            send_mode: mode,
            message_tag: None,
            message_starts: Vec::new(),
            view: false,
        };
        buffer.apply_preamble();
        buffer
    }

    /// Number of content bytes written, excluding the preamble.
    pub fn length(&self) -> usize {
        self.write_pos
    }

    /// True when no content has been written.
    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    /// Content bytes not yet consumed by the read cursor.
    pub fn remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Current read cursor, relative to the content.
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Moves the read cursor. Errors when the target is past the content.
    pub fn set_read_position(&mut self, position: usize) -> Result<()> {
        if position > self.write_pos {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::UnexpectedEnd));
        }
        self.read_pos = position;
        Ok(())
    }

    /// Current write cursor, relative to the content.
    pub fn write_position(&self) -> usize {
        self.write_pos
    }

    /// The send mode this buffer was constructed with, if any.
    pub fn send_mode(&self) -> Option<SendMode> {
        self.send_mode
    }

    /// The tag of the nested message this view was read from.
    pub fn message_tag(&self) -> Option<u8> {
        self.message_tag
    }

    /// True for read-only views produced by
    /// [`read_message`](MessageBuffer::read_message).
    pub fn is_view(&self) -> bool {
        self.view
    }

    /// Number of nested messages currently open.
    pub fn open_messages(&self) -> usize {
        self.message_starts.len()
    }

    /// The content bytes, excluding the preamble.
    pub fn payload(&self) -> &[u8] {
        let start = self.offset + self.header;
        &self.data[start..start + self.write_pos]
    }

    /// The full wire bytes including the preamble.
    ///
    /// Errors when nested messages are still open; such a buffer must not
    /// reach the send path.
    pub fn as_datagram(&self) -> Result<&[u8]> {
        if !self.message_starts.is_empty() {
            return Err(ErrorKind::UnfinishedMessage);
        }
        Ok(&self.data[self.offset..self.offset + self.header + self.write_pos])
    }

    /// Resets both cursors and re-applies the send-option preamble.
    /// Views reject clears.
    pub fn clear(&mut self) -> Result<()> {
        if self.view {
            return Err(ErrorKind::BufferIsView);
        }
        self.read_pos = 0;
        self.write_pos = 0;
        self.message_starts.clear();
        self.apply_preamble();
        Ok(())
    }

    fn apply_preamble(&mut self) {
        if let Some(mode) = self.send_mode {
            let data = Arc::make_mut(&mut self.data);
            data[0] = mode.to_u8();
            if mode == SendMode::Reliable {
                data[1] = 0;
                data[2] = 0;
            }
        }
    }

    /// Grows the storage to fit `additional` bytes past the write cursor.
    /// The new size is the smallest `size + size/2 + 1` iterate that fits.
    fn ensure_space(&mut self, additional: usize) -> Result<()> {
        if self.view {
            return Err(ErrorKind::BufferIsView);
        }
        let needed = self.header + self.write_pos + additional;
        if needed > self.data.len() {
            let mut size = self.data.len();
            while size < needed {
                size = size + size / 2 + 1;
            }
            Arc::make_mut(&mut self.data).resize(size, 0);
        }
        Ok(())
    }

    fn write_slot(&mut self, len: usize) -> Result<&mut [u8]> {
        self.ensure_space(len)?;
        let start = self.offset + self.header + self.write_pos;
        self.write_pos += len;
        Ok(&mut Arc::make_mut(&mut self.data)[start..start + len])
    }

    fn read_slot(&mut self, len: usize) -> Result<&[u8]> {
        if self.read_pos + len > self.write_pos {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::UnexpectedEnd));
        }
        let start = self.offset + self.header + self.read_pos;
        self.read_pos += len;
        Ok(&self.data[start..start + len])
    }

    // ------------------------------------------------------------------
    // Typed writers
    // ------------------------------------------------------------------

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_slot(1)?[0] = value;
        Ok(())
    }

    /// Writes one signed byte.
    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.write_u8(value as u8)
    }

    /// Writes a boolean as `0x01`/`0x00`.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(if value { 0x01 } else { 0x00 })
    }

    /// Writes a little-endian u16.
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        LittleEndian::write_u16(self.write_slot(2)?, value);
        Ok(())
    }

    /// Writes a big-endian u16.
    pub fn write_u16_be(&mut self, value: u16) -> Result<()> {
        BigEndian::write_u16(self.write_slot(2)?, value);
        Ok(())
    }

    /// Writes a little-endian i16.
    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_u16(value as u16)
    }

    /// Writes a little-endian u32.
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        LittleEndian::write_u32(self.write_slot(4)?, value);
        Ok(())
    }

    /// Writes a big-endian u32.
    pub fn write_u32_be(&mut self, value: u32) -> Result<()> {
        BigEndian::write_u32(self.write_slot(4)?, value);
        Ok(())
    }

    /// Writes a little-endian i32.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_u32(value as u32)
    }

    /// Writes a little-endian u64.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        LittleEndian::write_u64(self.write_slot(8)?, value);
        Ok(())
    }

    /// Writes a big-endian u64.
    pub fn write_u64_be(&mut self, value: u64) -> Result<()> {
        BigEndian::write_u64(self.write_slot(8)?, value);
        Ok(())
    }

    /// Writes a little-endian i64.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_u64(value as u64)
    }

    /// Writes an IEEE-754 f32, little-endian.
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        LittleEndian::write_f32(self.write_slot(4)?, value);
        Ok(())
    }

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_slot(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Writes UTF-8 bytes preceded by a packed-int length.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_packed_u32(value.len() as u32)?;
        self.write_bytes(value.as_bytes())
    }

    /// Writes a 32-bit value as little-endian 7-bit groups, each byte's high
    /// bit set while more groups follow. Values below 128 take one byte;
    /// the encoding never exceeds five.
    pub fn write_packed_u32(&mut self, mut value: u32) -> Result<()> {
        loop {
            let group = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                self.write_u8(group | 0x80)?;
            } else {
                self.write_u8(group)?;
                return Ok(());
            }
        }
    }

    /// Writes a signed 32-bit value in packed form. Negative values are cast
    /// to their two's-complement unsigned image first, so they occupy the
    /// full five bytes and match peers that use unsigned wrap. Non-negative
    /// values whose last group would carry a set top bit get one empty
    /// continuation group, so the signed reader cannot mistake that bit for
    /// a sign.
    pub fn write_packed_i32(&mut self, value: i32) -> Result<()> {
        let mut remaining = value as u32;
        loop {
            let group = (remaining & 0x7F) as u8;
            remaining >>= 7;
            if remaining != 0 {
                self.write_u8(group | 0x80)?;
            } else if value >= 0 && group & 0x40 != 0 {
                self.write_u8(group | 0x80)?;
                return self.write_u8(0x00);
            } else {
                return self.write_u8(group);
            }
        }
    }

    // ------------------------------------------------------------------
    // Typed readers
    // ------------------------------------------------------------------

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_slot(1)?[0])
    }

    /// Reads one signed byte.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Reads a boolean: `0x00` is false, any other byte is true.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a little-endian u16.
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.read_slot(2)?))
    }

    /// Reads a big-endian u16.
    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.read_slot(2)?))
    }

    /// Reads a little-endian i16.
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    /// Reads a little-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_slot(4)?))
    }

    /// Reads a big-endian u32.
    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.read_slot(4)?))
    }

    /// Reads a little-endian i32.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a little-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read_slot(8)?))
    }

    /// Reads a big-endian u64.
    pub fn read_u64_be(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.read_slot(8)?))
    }

    /// Reads a little-endian i64.
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Reads an IEEE-754 f32, little-endian.
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.read_slot(4)?))
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        self.read_slot(len)
    }

    /// Reads a packed-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_packed_u32()? as usize;
        let bytes = self.read_slot(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ErrorKind::DecodingError(DecodingErrorKind::Utf8))
    }

    /// Reads a packed 32-bit value. At most five bytes are consumed; the
    /// fifth byte's continuation bit is ignored.
    pub fn read_packed_u32(&mut self) -> Result<u32> {
        self.read_packed(false)
    }

    /// Reads a packed 32-bit value as signed. Encodings shorter than five
    /// bytes are sign-extended from their top data bit.
    pub fn read_packed_i32(&mut self) -> Result<i32> {
        Ok(self.read_packed(true)? as i32)
    }

    fn read_packed(&mut self, signed: bool) -> Result<u32> {
        let mut value = 0u32;
        let mut groups = 0usize;
        loop {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as u32) << (7 * groups);
            groups += 1;
            if byte & 0x80 == 0 || groups == 5 {
                break;
            }
        }
        let bits = 7 * groups;
        if signed && bits < 32 && (value >> (bits - 1)) & 1 == 1 {
            value |= u32::MAX << bits;
        }
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Nested messages
    // ------------------------------------------------------------------

    /// Opens a nested message: reserves its 16-bit length field and writes
    /// the tag byte. Close with [`end_message`](MessageBuffer::end_message)
    /// or discard with [`cancel_message`](MessageBuffer::cancel_message).
    pub fn start_message(&mut self, tag: u8) -> Result<()> {
        let start = self.write_pos;
        let slot = self.write_slot(MESSAGE_HEADER_SIZE)?;
        slot[0] = 0;
        slot[1] = 0;
        slot[2] = tag;
        self.message_starts.push(start);
        Ok(())
    }

    /// Closes the innermost open message, backfilling its length field.
    pub fn end_message(&mut self) -> Result<()> {
        let start = self.message_starts.pop().ok_or(ErrorKind::NoOpenMessage)?;
        let length = (self.write_pos - start - MESSAGE_HEADER_SIZE) as u16;
        let abs = self.offset + self.header + start;
        LittleEndian::write_u16(&mut Arc::make_mut(&mut self.data)[abs..abs + 2], length);
        Ok(())
    }

    /// Discards the innermost open message, truncating the write cursor back
    /// to where it was before the matching `start_message`.
    pub fn cancel_message(&mut self) -> Result<()> {
        let start = self.message_starts.pop().ok_or(ErrorKind::NoOpenMessage)?;
        self.write_pos = start;
        Ok(())
    }

    /// Reads the next nested message, returning a read-only view sharing
    /// this buffer's storage. The view carries the message tag and rejects
    /// writes and clears. The parent read cursor advances past the message.
    pub fn read_message(&mut self) -> Result<MessageBuffer> {
        let length = self.read_u16()? as usize;
        let tag = self.read_u8()?;
        if self.read_pos + length > self.write_pos {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::MessageLength));
        }
        let abs = self.offset + self.header + self.read_pos;
        self.read_pos += length;
        Ok(MessageBuffer {
            data: Arc::clone(&self.data),
            offset: abs,
            header: 0,
            read_pos: 0,
            write_pos: length,
            send_mode: None,
            message_tag: Some(tag),
            message_starts: Vec::new(),
            view: true,
        })
    }
}
