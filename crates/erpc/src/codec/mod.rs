// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-wire encoding and decoding of RPC messages.
//!
//! Every message is a fixed header followed by the argument tuple encoded
//! field by field in declaration order:
//!
//! ```text
//! u32 message_type | u32 service_id | u32 function_id | u32 sequence | body...
//! ```
//!
//! All integers are little-endian at natural width regardless of host. The
//! [`BasicCodec`] performs the encoding over one [`MessageBuffer`]; decoding
//! is symmetric, never panics, and never reads past the message end.
//!
//! [`MessageBuffer`]: crate::message::MessageBuffer

mod basic;

pub use basic::BasicCodec;

use crate::status::ErpcStatus;

/// Kind of RPC message carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Request that expects a reply
    Invocation,
    /// Request without a reply
    Oneway,
    /// Reply to an invocation
    Reply,
    /// Server-originated status notification
    Notification,
}

impl MessageType {
    pub fn to_wire(self) -> u32 {
        match self {
            MessageType::Invocation => 0,
            MessageType::Oneway => 1,
            MessageType::Reply => 2,
            MessageType::Notification => 3,
        }
    }

    pub fn from_wire(value: u32) -> Result<Self, ErpcStatus> {
        match value {
            0 => Ok(MessageType::Invocation),
            1 => Ok(MessageType::Oneway),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Notification),
            _ => Err(ErpcStatus::ProtocolError),
        }
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageInfo {
    pub message_type: MessageType,
    pub service_id: u32,
    pub function_id: u32,
    pub sequence: u32,
}

impl MessageInfo {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 16;

    pub fn new(message_type: MessageType, service_id: u32, function_id: u32, sequence: u32) -> Self {
        MessageInfo {
            message_type,
            service_id,
            function_id,
            sequence,
        }
    }

    /// Parse the header fields from the front of an encoded message without
    /// consuming it.
    pub fn peek(message: &[u8]) -> Result<MessageInfo, ErpcStatus> {
        if message.len() < Self::SIZE {
            return Err(ErpcStatus::BufferOverrun);
        }
        let word = |at: usize| {
            u32::from_le_bytes([message[at], message[at + 1], message[at + 2], message[at + 3]])
        };
        Ok(MessageInfo {
            message_type: MessageType::from_wire(word(0))?,
            service_id: word(4),
            function_id: word(8),
            sequence: word(12),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_values() {
        assert_eq!(MessageType::Invocation.to_wire(), 0);
        assert_eq!(MessageType::Oneway.to_wire(), 1);
        assert_eq!(MessageType::Reply.to_wire(), 2);
        assert_eq!(MessageType::Notification.to_wire(), 3);
    }

    #[test]
    fn message_type_rejects_unknown() {
        assert_eq!(MessageType::from_wire(7), Err(ErpcStatus::ProtocolError));
    }
}
