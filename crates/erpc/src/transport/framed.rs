// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-and-CRC framing over an arbitrary byte stream.
//!
//! Each message is preceded by a 4-byte prelude `{u16 length, u16 crc16}`,
//! little-endian, where the CRC covers the following `length` message bytes.
//! A frame longer than the receive buffer allows is consumed and discarded
//! so the stream stays aligned, then reported as `ReceiveFailed`.

use super::Transport;
use crate::crc16::Crc16;
use crate::message::MessageBuffer;
use crate::status::{ErpcResult, ErpcStatus};
use parking_lot::Mutex;
use std::time::Instant;

/// Byte-stream contract required underneath a [`FramedTransport`].
///
/// `read_exact` fills the whole slice or fails; a passed deadline yields
/// `Timeout`, a clean peer shutdown yields `Closed`. `write_all` pushes the
/// whole slice or fails with `SendFailed`.
pub trait StreamIo: Send + Sync {
    fn read_exact(&self, buf: &mut [u8], deadline: Option<Instant>) -> ErpcResult<()>;

    fn write_all(&self, data: &[u8]) -> ErpcResult<()>;

    /// Non-blocking readability hint; may pessimistically return true.
    fn poll_readable(&self) -> bool {
        true
    }
}

/// Framing layer composing a byte stream into a message transport.
#[derive(Debug)]
pub struct FramedTransport<S: StreamIo> {
    stream: S,
    send_lock: Mutex<()>,
    receive_lock: Mutex<()>,
}

impl<S: StreamIo> FramedTransport<S> {
    pub fn new(stream: S) -> Self {
        FramedTransport {
            stream,
            send_lock: Mutex::new(()),
            receive_lock: Mutex::new(()),
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Consume and discard `len` payload bytes after an oversized header so
    /// the next frame starts clean.
    fn drain(&self, len: usize, deadline: Option<Instant>) -> ErpcResult<()> {
        let mut scratch = [0u8; 256];
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            self.stream.read_exact(&mut scratch[..chunk], deadline)?;
            remaining -= chunk;
        }
        Ok(())
    }
}

impl<S: StreamIo> Transport for FramedTransport<S> {
    fn send(&self, message: &[u8]) -> ErpcResult<()> {
        if message.len() > u16::MAX as usize {
            log::error!("message of {} bytes exceeds frame limit", message.len());
            return Err(ErpcStatus::SendFailed);
        }
        let crc = Crc16::checksum(message);
        let mut header = [0u8; 4];
        header[0..2].copy_from_slice(&(message.len() as u16).to_le_bytes());
        header[2..4].copy_from_slice(&crc.to_le_bytes());

        let _guard = self.send_lock.lock();
        self.stream.write_all(&header)?;
        self.stream.write_all(message)
    }

    fn receive(&self, buffer: &mut MessageBuffer, deadline: Option<Instant>) -> ErpcResult<()> {
        let _guard = self.receive_lock.lock();

        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header, deadline)?;
        let length = u16::from_le_bytes([header[0], header[1]]) as usize;
        let expected_crc = u16::from_le_bytes([header[2], header[3]]);

        if buffer.ensure(length).is_err() {
            log::warn!(
                "incoming frame of {} bytes exceeds buffer capacity {}, discarding",
                length,
                buffer.capacity()
            );
            self.drain(length, deadline)?;
            return Err(ErpcStatus::ReceiveFailed);
        }

        self.stream
            .read_exact(&mut buffer.storage_mut()[..length], deadline)?;
        buffer.set_used(length);

        if Crc16::checksum(buffer.as_slice()) != expected_crc {
            log::warn!("frame CRC mismatch, dropping {} bytes", length);
            return Err(ErpcStatus::CrcCheckFailed);
        }
        Ok(())
    }

    fn has_message(&self) -> bool {
        self.stream.poll_readable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::pipe::PipeStream;

    #[test]
    fn frame_roundtrip() {
        let (a, b) = PipeStream::pair();
        let tx = FramedTransport::new(a);
        let rx = FramedTransport::new(b);

        tx.send(&[1, 2, 3, 4, 5]).expect("send");
        let mut buf = MessageBuffer::dynamic(16);
        rx.receive(&mut buf, None).expect("receive");
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let (a, b) = PipeStream::pair();
        let tx = FramedTransport::new(a);
        let rx = FramedTransport::new(b);

        tx.send(&[9, 9, 9, 9]).expect("send");
        b_flip(rx.stream(), 2); // flip one payload bit in flight

        let mut buf = MessageBuffer::dynamic(16);
        assert_eq!(rx.receive(&mut buf, None).unwrap_err(), ErpcStatus::CrcCheckFailed);
    }

    #[test]
    fn oversized_frame_is_drained_and_reported() {
        let (a, b) = PipeStream::pair();
        let tx = FramedTransport::new(a);
        let rx = FramedTransport::new(b);

        tx.send(&[0xAB; 64]).expect("send big");
        tx.send(&[1, 2]).expect("send small");

        let mut buf = MessageBuffer::fixed(8);
        assert_eq!(rx.receive(&mut buf, None).unwrap_err(), ErpcStatus::ReceiveFailed);
        // Stream stays aligned: the next frame still decodes.
        rx.receive(&mut buf, None).expect("next frame");
        assert_eq!(buf.as_slice(), &[1, 2]);
    }

    /// Flip one bit inside the receiving pipe's pending payload.
    fn b_flip(stream: &PipeStream, payload_offset: usize) {
        stream.corrupt_pending(4 + payload_offset);
    }
}
