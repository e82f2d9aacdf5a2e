// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The basic codec: bounds-checked primitive access over one message buffer.

use super::{MessageInfo, MessageType};
use crate::message::MessageBuffer;
use crate::status::{ErpcResult, ErpcStatus};

/// Generate write methods for primitive types (eliminates code duplication)
///
/// Each generated method:
/// 1. Makes room through the buffer's capacity policy (`MemoryError` when a
///    fixed buffer overflows)
/// 2. Converts the value to little-endian bytes via `to_le_bytes()`
/// 3. Copies bytes to the buffer and advances the cursor
macro_rules! impl_codec_write {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) -> ErpcResult<()> {
            self.write_raw(&value.to_le_bytes())
        }
    };
}

/// Generate read methods for primitive types (eliminates code duplication)
///
/// Each generated method:
/// 1. Checks message bounds (returns `BufferOverrun` past the used length)
/// 2. Reads N bytes from the buffer
/// 3. Converts bytes to value via `from_le_bytes()` and advances the cursor
macro_rules! impl_codec_read {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> ErpcResult<$type> {
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.read_raw($size)?);
            Ok(<$type>::from_le_bytes(bytes))
        }
    };
}

/// Encoder/decoder for the basic wire format.
///
/// Wraps a [`MessageBuffer`] and a cursor. One codec instance is used either
/// to write a message or to read one; [`BasicCodec::rewind`] restarts reading
/// from the header.
pub struct BasicCodec {
    buffer: MessageBuffer,
    cursor: usize,
}

impl BasicCodec {
    pub fn new(buffer: MessageBuffer) -> Self {
        BasicCodec { buffer, cursor: 0 }
    }

    /// Consume the codec and hand back its buffer.
    pub fn into_buffer(self) -> MessageBuffer {
        self.buffer
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut MessageBuffer {
        &mut self.buffer
    }

    /// Restart the cursor at the header, keeping message content.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Drop message content and restart the cursor.
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes left to read before the message end.
    pub fn remaining(&self) -> usize {
        self.buffer.used().saturating_sub(self.cursor)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> ErpcResult<()> {
        self.buffer.write_at(self.cursor, bytes)?;
        self.cursor += bytes.len();
        Ok(())
    }

    fn read_raw(&mut self, len: usize) -> ErpcResult<&[u8]> {
        if self.cursor + len > self.buffer.used() {
            return Err(ErpcStatus::BufferOverrun);
        }
        let start = self.cursor;
        self.cursor += len;
        self.buffer.read_at(start, len)
    }

    // -- header ------------------------------------------------------------

    /// Write the four-field message header.
    pub fn start_write_message(&mut self, info: &MessageInfo) -> ErpcResult<()> {
        self.write_u32(info.message_type.to_wire())?;
        self.write_u32(info.service_id)?;
        self.write_u32(info.function_id)?;
        self.write_u32(info.sequence)
    }

    /// Read and validate the four-field message header.
    pub fn start_read_message(&mut self) -> ErpcResult<MessageInfo> {
        let message_type = MessageType::from_wire(self.read_u32()?)?;
        let service_id = self.read_u32()?;
        let function_id = self.read_u32()?;
        let sequence = self.read_u32()?;
        Ok(MessageInfo {
            message_type,
            service_id,
            function_id,
            sequence,
        })
    }

    /// IDL-definition checksum, written directly after the header when the
    /// program carries `@crc`.
    pub fn write_idl_crc(&mut self, crc: u16) -> ErpcResult<()> {
        self.write_u32(crc as u32)
    }

    /// Verify the peer's IDL checksum against ours.
    pub fn read_idl_crc(&mut self, expected: u16) -> ErpcResult<()> {
        let value = self.read_u32()?;
        if value != expected as u32 {
            return Err(ErpcStatus::CrcCheckFailed);
        }
        Ok(())
    }

    // -- primitives --------------------------------------------------------

    impl_codec_write!(write_i8, i8);
    impl_codec_write!(write_i16, i16);
    impl_codec_write!(write_i32, i32);
    impl_codec_write!(write_i64, i64);
    impl_codec_write!(write_u8, u8);
    impl_codec_write!(write_u16, u16);
    impl_codec_write!(write_u32, u32);
    impl_codec_write!(write_u64, u64);
    impl_codec_write!(write_f32, f32);
    impl_codec_write!(write_f64, f64);

    impl_codec_read!(read_i8, i8, 1);
    impl_codec_read!(read_i16, i16, 2);
    impl_codec_read!(read_i32, i32, 4);
    impl_codec_read!(read_i64, i64, 8);
    impl_codec_read!(read_u8, u8, 1);
    impl_codec_read!(read_u16, u16, 2);
    impl_codec_read!(read_u32, u32, 4);
    impl_codec_read!(read_u64, u64, 8);
    impl_codec_read!(read_f32, f32, 4);
    impl_codec_read!(read_f64, f64, 8);

    /// Bool is one byte, 0 or 1.
    pub fn write_bool(&mut self, value: bool) -> ErpcResult<()> {
        self.write_u8(u8::from(value))
    }

    pub fn read_bool(&mut self) -> ErpcResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    // -- strings and blobs -------------------------------------------------

    /// `u32 length` + UTF-8 bytes, no terminator.
    pub fn write_string(&mut self, value: &str) -> ErpcResult<()> {
        self.write_u32(value.len() as u32)?;
        self.write_raw(value.as_bytes())
    }

    pub fn read_string(&mut self) -> ErpcResult<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_raw(len)?.to_vec();
        String::from_utf8(bytes).map_err(|_| ErpcStatus::ProtocolError)
    }

    /// `u32 length` + 16-bit units, little-endian.
    pub fn write_ustring(&mut self, value: &[u16]) -> ErpcResult<()> {
        self.write_u32(value.len() as u32)?;
        for &unit in value {
            self.write_u16(unit)?;
        }
        Ok(())
    }

    pub fn read_ustring(&mut self) -> ErpcResult<Vec<u16>> {
        let len = self.read_u32()? as usize;
        let mut units = Vec::with_capacity(len.min(self.remaining() / 2));
        for _ in 0..len {
            units.push(self.read_u16()?);
        }
        Ok(units)
    }

    /// `u32 length` + raw bytes.
    pub fn write_binary(&mut self, value: &[u8]) -> ErpcResult<()> {
        self.write_u32(value.len() as u32)?;
        self.write_raw(value)
    }

    pub fn read_binary(&mut self) -> ErpcResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.read_raw(len)?.to_vec())
    }

    /// Raw byte run with the length carried elsewhere (`@length` members).
    pub fn write_bytes(&mut self, value: &[u8]) -> ErpcResult<()> {
        self.write_raw(value)
    }

    pub fn read_bytes(&mut self, len: usize) -> ErpcResult<Vec<u8>> {
        Ok(self.read_raw(len)?.to_vec())
    }

    // -- aggregates --------------------------------------------------------

    /// `u32 count` before list elements. Arrays elide the count.
    pub fn start_write_list(&mut self, count: u32) -> ErpcResult<()> {
        self.write_u32(count)
    }

    pub fn start_read_list(&mut self) -> ErpcResult<u32> {
        self.read_u32()
    }

    /// Default one-byte union discriminator. Wider declared discriminators
    /// are written through the matching scalar method by generated code.
    pub fn start_write_union(&mut self, discriminator: u8) -> ErpcResult<()> {
        self.write_u8(discriminator)
    }

    pub fn start_read_union(&mut self) -> ErpcResult<u8> {
        self.read_u8()
    }

    /// One flag byte for optional pointers; the referent follows only when
    /// the flag is true.
    pub fn write_null_flag(&mut self, present: bool) -> ErpcResult<()> {
        self.write_bool(present)
    }

    pub fn read_null_flag(&mut self) -> ErpcResult<bool> {
        self.read_bool()
    }

    /// One byte selecting among the callbacks registered against a
    /// callback type, in IDL declaration order.
    pub fn write_callback(&mut self, index: u8) -> ErpcResult<()> {
        self.write_u8(index)
    }

    pub fn read_callback(&mut self) -> ErpcResult<u8> {
        self.read_u8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuffer;

    fn codec() -> BasicCodec {
        BasicCodec::new(MessageBuffer::dynamic(64))
    }

    #[test]
    fn header_roundtrip() {
        let mut c = codec();
        let info = MessageInfo::new(MessageType::Invocation, 3, 9, 41);
        c.start_write_message(&info).expect("write header");
        assert_eq!(c.cursor(), 16);
        c.rewind();
        assert_eq!(c.start_read_message().expect("read header"), info);
    }

    #[test]
    fn header_is_little_endian() {
        let mut c = codec();
        let info = MessageInfo::new(MessageType::Reply, 0x0102, 0x0A, 0x01020304);
        c.start_write_message(&info).expect("write header");
        let bytes = c.buffer().as_slice();
        assert_eq!(&bytes[0..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0x02, 0x01, 0, 0]);
        assert_eq!(&bytes[12..16], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn primitive_roundtrip() {
        let mut c = codec();
        c.write_bool(true).unwrap();
        c.write_i8(-5).unwrap();
        c.write_i16(-300).unwrap();
        c.write_i32(-70_000).unwrap();
        c.write_i64(-5_000_000_000).unwrap();
        c.write_u8(200).unwrap();
        c.write_u16(60_000).unwrap();
        c.write_u32(4_000_000_000).unwrap();
        c.write_u64(u64::MAX - 1).unwrap();
        c.write_f32(1.5).unwrap();
        c.write_f64(-2.25).unwrap();

        c.rewind();
        assert!(c.read_bool().unwrap());
        assert_eq!(c.read_i8().unwrap(), -5);
        assert_eq!(c.read_i16().unwrap(), -300);
        assert_eq!(c.read_i32().unwrap(), -70_000);
        assert_eq!(c.read_i64().unwrap(), -5_000_000_000);
        assert_eq!(c.read_u8().unwrap(), 200);
        assert_eq!(c.read_u16().unwrap(), 60_000);
        assert_eq!(c.read_u32().unwrap(), 4_000_000_000);
        assert_eq!(c.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(c.read_f32().unwrap(), 1.5);
        assert_eq!(c.read_f64().unwrap(), -2.25);
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn string_roundtrip_including_non_ascii() {
        let mut c = codec();
        c.write_string("").unwrap();
        c.write_string("hí ☂").unwrap();
        c.rewind();
        assert_eq!(c.read_string().unwrap(), "");
        assert_eq!(c.read_string().unwrap(), "hí ☂");
    }

    #[test]
    fn string_has_no_terminator() {
        let mut c = codec();
        c.write_string("ab").unwrap();
        assert_eq!(c.buffer().as_slice(), &[2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn invalid_utf8_is_protocol_error() {
        let mut c = codec();
        c.write_u32(2).unwrap();
        c.write_u8(0xFF).unwrap();
        c.write_u8(0xFE).unwrap();
        c.rewind();
        assert_eq!(c.read_string().unwrap_err(), ErpcStatus::ProtocolError);
    }

    #[test]
    fn binary_and_bytes_roundtrip() {
        let mut c = codec();
        c.write_binary(&[0xAA, 0xBB, 0xCC]).unwrap();
        c.write_bytes(&[1, 2, 3]).unwrap();
        c.rewind();
        assert_eq!(c.read_binary().unwrap(), vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(c.read_bytes(3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn ustring_roundtrip() {
        let mut c = codec();
        c.write_ustring(&[0x0041, 0x2603]).unwrap();
        c.rewind();
        assert_eq!(c.read_ustring().unwrap(), vec![0x0041, 0x2603]);
    }

    #[test]
    fn list_count_then_elements() {
        let mut c = codec();
        c.start_write_list(3).unwrap();
        for v in [7i32, 8, 9] {
            c.write_i32(v).unwrap();
        }
        c.rewind();
        assert_eq!(c.start_read_list().unwrap(), 3);
        assert_eq!(c.read_i32().unwrap(), 7);
        assert_eq!(c.read_i32().unwrap(), 8);
        assert_eq!(c.read_i32().unwrap(), 9);
    }

    #[test]
    fn union_discriminator_is_one_byte() {
        let mut c = codec();
        c.start_write_union(1).unwrap();
        c.write_i32(3).unwrap();
        c.write_f32(4.0).unwrap();
        assert_eq!(c.buffer().used(), 1 + 4 + 4);
        c.rewind();
        assert_eq!(c.start_read_union().unwrap(), 1);
    }

    #[test]
    fn null_flag_roundtrip() {
        let mut c = codec();
        c.write_null_flag(false).unwrap();
        c.write_null_flag(true).unwrap();
        c.write_i32(11).unwrap();
        c.rewind();
        assert!(!c.read_null_flag().unwrap());
        assert!(c.read_null_flag().unwrap());
        assert_eq!(c.read_i32().unwrap(), 11);
    }

    #[test]
    fn read_past_end_is_buffer_overrun() {
        let mut c = codec();
        c.write_u16(5).unwrap();
        c.rewind();
        assert_eq!(c.read_u16().unwrap(), 5);
        assert_eq!(c.read_u8().unwrap_err(), ErpcStatus::BufferOverrun);
    }

    #[test]
    fn truncated_length_prefix_never_reads_past_end() {
        let mut c = codec();
        c.write_u32(100).unwrap(); // claims 100 bytes, none follow
        c.rewind();
        assert_eq!(c.read_binary().unwrap_err(), ErpcStatus::BufferOverrun);
    }

    #[test]
    fn fixed_buffer_write_overflow_is_memory_error() {
        let mut c = BasicCodec::new(MessageBuffer::fixed(4));
        c.write_u32(1).unwrap();
        assert_eq!(c.write_u8(2).unwrap_err(), ErpcStatus::MemoryError);
    }

    #[test]
    fn idl_crc_mismatch_detected() {
        let mut c = codec();
        c.write_idl_crc(0xBEEF).unwrap();
        c.rewind();
        assert_eq!(c.read_idl_crc(0xBEEF), Ok(()));
        c.rewind();
        assert_eq!(c.read_idl_crc(0xBEEE).unwrap_err(), ErpcStatus::CrcCheckFailed);
    }
}
