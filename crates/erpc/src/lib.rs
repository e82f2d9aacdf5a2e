// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Embedded RPC runtime core.
//!
//! This crate is the runtime half of the framework: generated client stubs
//! and server skeletons (from the `erpc-gen` tool) sit on top of the codec,
//! buffer, transport, client, and server layers defined here.
//!
//! # Layers
//!
//! - [`codec`] - on-wire encoding of primitives, containers, unions, and
//!   message headers
//! - [`message`] - message buffers and the static/dynamic factory policies
//! - [`transport`] - the transport contract, CRC-16 framing for byte
//!   streams, TCP, and in-process pipes
//! - [`client`] - request/reply management for generated stubs
//! - [`server`] - dispatch loop over registered services
//! - [`arbitrator`] - reply/request demultiplexing so one transport can
//!   serve both a client and a server concurrently
//! - [`setup`] - owned-value construction helpers
//!
//! # Example
//!
//! ```
//! use erpc::codec::{BasicCodec, MessageInfo, MessageType};
//! use erpc::message::MessageBuffer;
//!
//! let mut codec = BasicCodec::new(MessageBuffer::dynamic(64));
//! let header = MessageInfo::new(MessageType::Invocation, 1, 2, 3);
//! codec.start_write_message(&header).unwrap();
//! codec.write_i32(42).unwrap();
//!
//! codec.rewind();
//! assert_eq!(codec.start_read_message().unwrap(), header);
//! assert_eq!(codec.read_i32().unwrap(), 42);
//! ```

pub mod arbitrator;
pub mod client;
pub mod codec;
pub mod crc16;
pub mod message;
pub mod server;
pub mod setup;
pub mod status;
pub mod transport;

pub use client::{ClientManager, RequestContext};
pub use codec::{BasicCodec, MessageInfo, MessageType};
pub use crc16::Crc16;
pub use message::{
    DynamicMessageBufferFactory, MessageBuffer, MessageBufferFactory, StaticMessageBufferFactory,
};
pub use server::{Service, SimpleServer, StaticServer};
pub use status::{ErpcResult, ErpcStatus};
pub use transport::Transport;
