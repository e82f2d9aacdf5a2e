// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message buffers and their factories.
//!
//! A [`MessageBuffer`] holds exactly one RPC message: owned byte storage, a
//! used length, and a capacity policy. Buffers are owned exclusively by
//! whatever component currently holds them; there is no sharing.
//!
//! Two allocation policies exist behind one [`MessageBufferFactory`] trait:
//!
//! - [`DynamicMessageBufferFactory`] allocates a fresh growable buffer per
//!   message
//! - [`StaticMessageBufferFactory`] hands out slots from a fixed pool sized
//!   at construction; a write past a slot's capacity fails with
//!   `MemoryError`
//!
//! The codec, transports, and dispatchers are oblivious to the choice.

use crate::status::{ErpcResult, ErpcStatus};
use parking_lot::Mutex;

/// Default capacity for dynamically allocated buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// A sized byte region holding exactly one RPC message.
#[derive(Debug)]
pub struct MessageBuffer {
    data: Vec<u8>,
    used: usize,
    fixed: bool,
}

impl MessageBuffer {
    /// Growable buffer with an initial capacity.
    pub fn dynamic(capacity: usize) -> Self {
        MessageBuffer {
            data: vec![0; capacity],
            used: 0,
            fixed: false,
        }
    }

    /// Fixed-capacity buffer; writes past `capacity` fail.
    pub fn fixed(capacity: usize) -> Self {
        MessageBuffer {
            data: vec![0; capacity],
            used: 0,
            fixed: true,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes of the encoded message written so far.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn set_used(&mut self, used: usize) {
        debug_assert!(used <= self.data.len());
        self.used = used;
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// The encoded message bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Whole backing storage, independent of the used length.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Make room for `required` total bytes, growing when the policy allows.
    pub fn ensure(&mut self, required: usize) -> ErpcResult<()> {
        if required <= self.data.len() {
            return Ok(());
        }
        if self.fixed {
            return Err(ErpcStatus::MemoryError);
        }
        let new_len = required.max(self.data.len() * 2).max(DEFAULT_BUFFER_SIZE);
        self.data.resize(new_len, 0);
        Ok(())
    }

    /// Forget message content; capacity is kept.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> ErpcResult<()> {
        self.ensure(offset + bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        if offset + bytes.len() > self.used {
            self.used = offset + bytes.len();
        }
        Ok(())
    }

    pub fn read_at(&self, offset: usize, len: usize) -> ErpcResult<&[u8]> {
        if offset + len > self.used {
            return Err(ErpcStatus::BufferOverrun);
        }
        Ok(&self.data[offset..offset + len])
    }
}

/// Pluggable allocation policy for message buffers.
///
/// `create` returns a writable buffer sized to hold one message; `dispose`
/// returns it to the factory. Factories are thread-safe.
pub trait MessageBufferFactory: Send + Sync {
    fn create(&self) -> ErpcResult<MessageBuffer>;
    fn dispose(&self, buffer: MessageBuffer);
}

/// Heap allocation per message; buffers grow on demand.
#[derive(Debug)]
pub struct DynamicMessageBufferFactory {
    initial_capacity: usize,
}

impl DynamicMessageBufferFactory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(initial_capacity: usize) -> Self {
        DynamicMessageBufferFactory { initial_capacity }
    }
}

impl Default for DynamicMessageBufferFactory {
    fn default() -> Self {
        DynamicMessageBufferFactory::new()
    }
}

impl MessageBufferFactory for DynamicMessageBufferFactory {
    fn create(&self) -> ErpcResult<MessageBuffer> {
        Ok(MessageBuffer::dynamic(self.initial_capacity))
    }

    fn dispose(&self, buffer: MessageBuffer) {
        drop(buffer);
    }
}

/// Fixed pool of fixed-size buffers chosen at construction.
pub struct StaticMessageBufferFactory {
    pool: Mutex<Vec<MessageBuffer>>,
    buffer_size: usize,
}

impl StaticMessageBufferFactory {
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let pool = (0..count).map(|_| MessageBuffer::fixed(buffer_size)).collect();
        StaticMessageBufferFactory {
            pool: Mutex::new(pool),
            buffer_size,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffers currently available in the pool.
    pub fn available(&self) -> usize {
        self.pool.lock().len()
    }
}

impl MessageBufferFactory for StaticMessageBufferFactory {
    fn create(&self) -> ErpcResult<MessageBuffer> {
        match self.pool.lock().pop() {
            Some(buffer) => Ok(buffer),
            None => {
                log::warn!("static buffer pool exhausted");
                Err(ErpcStatus::MemoryError)
            }
        }
    }

    fn dispose(&self, mut buffer: MessageBuffer) {
        buffer.reset();
        self.pool.lock().push(buffer);
    }
}
