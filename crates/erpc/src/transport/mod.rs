// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction and the concrete channels shipped with the runtime.
//!
//! A [`Transport`] moves whole messages; it is the minimal surface required
//! by both the client manager and the server. Byte-stream channels (TCP,
//! serial) are wrapped in a [`FramedTransport`] that adds the
//! length-and-CRC prelude; packet channels deliver one message per datagram
//! and implement [`Transport`] directly.
//!
//! # Modules
//!
//! - `framed` - length + CRC-16 framing over any byte stream
//! - `tcp` - TCP stream channel with a cancellable acceptor
//! - `pipe` - in-process paired endpoints for tests and same-process use

pub mod framed;
pub mod pipe;
pub mod tcp;

pub use framed::{FramedTransport, StreamIo};
pub use pipe::{PipeStream, PipeTransport};
pub use tcp::{TcpAcceptor, TcpTransport};

use crate::message::MessageBuffer;
use crate::status::ErpcResult;
use std::time::Instant;

/// Bidirectional message channel.
///
/// `send` blocks until the message has been handed to the underlying
/// channel; `receive` blocks until a complete message is in `buffer` or the
/// optional deadline passes (`Timeout`). Implementations are safe to share
/// between a client and a server; the write side serialises internally.
pub trait Transport: Send + Sync {
    fn send(&self, message: &[u8]) -> ErpcResult<()>;

    fn receive(&self, buffer: &mut MessageBuffer, deadline: Option<Instant>) -> ErpcResult<()>;

    /// Non-blocking poll hint; may pessimistically return true.
    fn has_message(&self) -> bool {
        true
    }

    /// Optional zero-copy hook invoked before a client writes a request.
    fn prepare_client_buffer(&self, _buffer: &mut MessageBuffer) -> ErpcResult<()> {
        Ok(())
    }

    /// Optional zero-copy hook invoked before a server reads a request.
    fn prepare_server_buffer(&self, _buffer: &mut MessageBuffer) -> ErpcResult<()> {
        Ok(())
    }
}
