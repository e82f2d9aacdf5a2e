// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process paired endpoints.
//!
//! [`PipeTransport`] is a packet channel (one message per send, no framing);
//! [`PipeStream`] is a raw byte stream for exercising the framing layer.
//! Both connect two halves of the same process, which is how the loopback
//! topologies and the transport tests run without sockets.

use super::framed::StreamIo;
use super::Transport;
use crate::message::MessageBuffer;
use crate::status::{ErpcResult, ErpcStatus};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Message-level pipe endpoint.
pub struct PipeTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl PipeTransport {
    /// Two connected endpoints; what one sends the other receives.
    pub fn pair() -> (PipeTransport, PipeTransport) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (
            PipeTransport { tx: a_tx, rx: b_rx },
            PipeTransport { tx: b_tx, rx: a_rx },
        )
    }
}

impl Transport for PipeTransport {
    fn send(&self, message: &[u8]) -> ErpcResult<()> {
        self.tx
            .send(message.to_vec())
            .map_err(|_| ErpcStatus::SendFailed)
    }

    fn receive(&self, buffer: &mut MessageBuffer, deadline: Option<Instant>) -> ErpcResult<()> {
        let message = match deadline {
            Some(when) => self.rx.recv_deadline(when).map_err(|e| match e {
                RecvTimeoutError::Timeout => ErpcStatus::Timeout,
                RecvTimeoutError::Disconnected => ErpcStatus::Closed,
            })?,
            None => self.rx.recv().map_err(|_| ErpcStatus::Closed)?,
        };
        if buffer.ensure(message.len()).is_err() {
            log::warn!("pipe message of {} bytes exceeds buffer capacity", message.len());
            return Err(ErpcStatus::ReceiveFailed);
        }
        buffer.storage_mut()[..message.len()].copy_from_slice(&message);
        buffer.set_used(message.len());
        Ok(())
    }

    fn has_message(&self) -> bool {
        !self.rx.is_empty()
    }
}

struct ByteQueueState {
    bytes: VecDeque<u8>,
    closed: bool,
}

struct ByteQueue {
    state: Mutex<ByteQueueState>,
    cond: Condvar,
}

impl ByteQueue {
    fn new() -> Arc<ByteQueue> {
        Arc::new(ByteQueue {
            state: Mutex::new(ByteQueueState {
                bytes: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        })
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.cond.notify_all();
    }
}

/// Byte-stream pipe endpoint implementing [`StreamIo`].
pub struct PipeStream {
    incoming: Arc<ByteQueue>,
    outgoing: Arc<ByteQueue>,
}

impl PipeStream {
    /// Two connected byte streams.
    pub fn pair() -> (PipeStream, PipeStream) {
        let a_to_b = ByteQueue::new();
        let b_to_a = ByteQueue::new();
        (
            PipeStream {
                incoming: b_to_a.clone(),
                outgoing: a_to_b.clone(),
            },
            PipeStream {
                incoming: a_to_b,
                outgoing: b_to_a,
            },
        )
    }

    /// Test support: flip one bit of a byte already queued for this
    /// endpoint, simulating corruption on the wire.
    pub fn corrupt_pending(&self, offset: usize) {
        let mut state = self.incoming.state.lock();
        if let Some(byte) = state.bytes.get_mut(offset) {
            *byte ^= 0x01;
        }
    }
}

impl StreamIo for PipeStream {
    fn read_exact(&self, buf: &mut [u8], deadline: Option<Instant>) -> ErpcResult<()> {
        let mut filled = 0;
        let mut state = self.incoming.state.lock();
        while filled < buf.len() {
            while filled < buf.len() {
                match state.bytes.pop_front() {
                    Some(byte) => {
                        buf[filled] = byte;
                        filled += 1;
                    }
                    None => break,
                }
            }
            if filled == buf.len() {
                break;
            }
            if state.closed {
                // A shutdown mid-message is a short read, not a clean close.
                return Err(if filled == 0 {
                    ErpcStatus::Closed
                } else {
                    ErpcStatus::ReceiveFailed
                });
            }
            match deadline {
                Some(when) => {
                    if self.incoming.cond.wait_until(&mut state, when).timed_out() {
                        return Err(ErpcStatus::Timeout);
                    }
                }
                None => self.incoming.cond.wait(&mut state),
            }
        }
        Ok(())
    }

    fn write_all(&self, data: &[u8]) -> ErpcResult<()> {
        let mut state = self.outgoing.state.lock();
        if state.closed {
            return Err(ErpcStatus::SendFailed);
        }
        state.bytes.extend(data.iter().copied());
        self.outgoing.cond.notify_all();
        Ok(())
    }

    fn poll_readable(&self) -> bool {
        let state = self.incoming.state.lock();
        !state.bytes.is_empty() || state.closed
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        self.outgoing.close();
        self.incoming.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pipe_transport_delivers_messages_in_order() {
        let (a, b) = PipeTransport::pair();
        a.send(&[1]).expect("send 1");
        a.send(&[2, 2]).expect("send 2");

        let mut buf = MessageBuffer::dynamic(8);
        b.receive(&mut buf, None).expect("recv 1");
        assert_eq!(buf.as_slice(), &[1]);
        b.receive(&mut buf, None).expect("recv 2");
        assert_eq!(buf.as_slice(), &[2, 2]);
        assert!(!b.has_message());
    }

    #[test]
    fn pipe_transport_deadline_times_out() {
        let (_a, b) = PipeTransport::pair();
        let mut buf = MessageBuffer::dynamic(8);
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(b.receive(&mut buf, Some(deadline)).unwrap_err(), ErpcStatus::Timeout);
    }

    #[test]
    fn dropped_peer_reads_as_closed() {
        let (a, b) = PipeTransport::pair();
        drop(a);
        let mut buf = MessageBuffer::dynamic(8);
        assert_eq!(b.receive(&mut buf, None).unwrap_err(), ErpcStatus::Closed);
    }

    #[test]
    fn pipe_stream_moves_bytes_across_threads() {
        let (a, b) = PipeStream::pair();
        let writer = std::thread::spawn(move || {
            a.write_all(&[5, 6, 7]).expect("write");
            a
        });
        let mut buf = [0u8; 3];
        b.read_exact(&mut buf, None).expect("read");
        assert_eq!(buf, [5, 6, 7]);
        writer.join().expect("writer thread");
    }

    #[test]
    fn pipe_stream_short_read_after_close() {
        let (a, b) = PipeStream::pair();
        a.write_all(&[1]).expect("write");
        drop(a);
        let mut buf = [0u8; 2];
        assert_eq!(b.read_exact(&mut buf, None).unwrap_err(), ErpcStatus::ReceiveFailed);
        let mut empty = [0u8; 1];
        assert_eq!(b.read_exact(&mut empty, None).unwrap_err(), ErpcStatus::Closed);
    }
}
