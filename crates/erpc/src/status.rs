// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Status taxonomy shared by every runtime component.
//!
//! Every runtime operation reports one of these kinds; no panic crosses a
//! public interface. `Ok(_)` in an [`ErpcResult`] corresponds to
//! `ErpcStatus::Success`, so error paths never carry the `Success` variant.

use std::fmt;

/// Result type for runtime operations.
pub type ErpcResult<T> = Result<T, ErpcStatus>;

/// Closed status enumeration for the RPC runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErpcStatus {
    /// Normal completion
    Success,

    /// Transport or factory initialisation error
    InitFailed,

    /// Write to underlying channel failed
    SendFailed,

    /// Read failed or returned short
    ReceiveFailed,

    /// Peer closed the connection cleanly
    Closed,

    /// Header `message_type` mismatched expectation
    ExpectedReply,

    /// Header or payload CRC mismatch
    CrcCheckFailed,

    /// Decode would read past message end
    BufferOverrun,

    /// `service_id` not registered on the server
    UnknownService,

    /// `function_id` not in service
    UnknownFunction,

    /// Handler reported failure (including a trapped panic)
    ServerError,

    /// Reply header fields did not match the request
    ProtocolError,

    /// Caller cancelled the request
    Cancelled,

    /// Call timed out
    Timeout,

    /// Allocation failed or `@max_length` exceeded
    MemoryError,
}

impl ErpcStatus {
    /// True only for the `Success` variant.
    pub fn is_success(self) -> bool {
        self == ErpcStatus::Success
    }

    /// Numeric code used on the wire for in-band error replies.
    pub fn to_wire(self) -> u32 {
        match self {
            ErpcStatus::Success => 0,
            ErpcStatus::InitFailed => 1,
            ErpcStatus::SendFailed => 2,
            ErpcStatus::ReceiveFailed => 3,
            ErpcStatus::Closed => 4,
            ErpcStatus::ExpectedReply => 5,
            ErpcStatus::CrcCheckFailed => 6,
            ErpcStatus::BufferOverrun => 7,
            ErpcStatus::UnknownService => 8,
            ErpcStatus::UnknownFunction => 9,
            ErpcStatus::ServerError => 10,
            ErpcStatus::ProtocolError => 11,
            ErpcStatus::Cancelled => 12,
            ErpcStatus::Timeout => 13,
            ErpcStatus::MemoryError => 14,
        }
    }

    /// Inverse of [`ErpcStatus::to_wire`]. Unknown codes map to `ProtocolError`.
    pub fn from_wire(code: u32) -> Self {
        match code {
            0 => ErpcStatus::Success,
            1 => ErpcStatus::InitFailed,
            2 => ErpcStatus::SendFailed,
            3 => ErpcStatus::ReceiveFailed,
            4 => ErpcStatus::Closed,
            5 => ErpcStatus::ExpectedReply,
            6 => ErpcStatus::CrcCheckFailed,
            7 => ErpcStatus::BufferOverrun,
            8 => ErpcStatus::UnknownService,
            9 => ErpcStatus::UnknownFunction,
            10 => ErpcStatus::ServerError,
            11 => ErpcStatus::ProtocolError,
            12 => ErpcStatus::Cancelled,
            13 => ErpcStatus::Timeout,
            14 => ErpcStatus::MemoryError,
            _ => ErpcStatus::ProtocolError,
        }
    }
}

impl fmt::Display for ErpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErpcStatus::Success => write!(f, "success"),
            ErpcStatus::InitFailed => write!(f, "transport or factory initialisation failed"),
            ErpcStatus::SendFailed => write!(f, "send to underlying channel failed"),
            ErpcStatus::ReceiveFailed => write!(f, "receive failed or returned short"),
            ErpcStatus::Closed => write!(f, "peer closed the connection"),
            ErpcStatus::ExpectedReply => write!(f, "message type mismatched expectation"),
            ErpcStatus::CrcCheckFailed => write!(f, "CRC check failed"),
            ErpcStatus::BufferOverrun => write!(f, "decode past message end"),
            ErpcStatus::UnknownService => write!(f, "service id not registered"),
            ErpcStatus::UnknownFunction => write!(f, "function id not in service"),
            ErpcStatus::ServerError => write!(f, "handler reported failure"),
            ErpcStatus::ProtocolError => write!(f, "reply header did not match request"),
            ErpcStatus::Cancelled => write!(f, "call cancelled"),
            ErpcStatus::Timeout => write!(f, "call timed out"),
            ErpcStatus::MemoryError => write!(f, "allocation failed or max_length exceeded"),
        }
    }
}

impl std::error::Error for ErpcStatus {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_roundtrip() {
        let all = [
            ErpcStatus::Success,
            ErpcStatus::InitFailed,
            ErpcStatus::SendFailed,
            ErpcStatus::ReceiveFailed,
            ErpcStatus::Closed,
            ErpcStatus::ExpectedReply,
            ErpcStatus::CrcCheckFailed,
            ErpcStatus::BufferOverrun,
            ErpcStatus::UnknownService,
            ErpcStatus::UnknownFunction,
            ErpcStatus::ServerError,
            ErpcStatus::ProtocolError,
            ErpcStatus::Cancelled,
            ErpcStatus::Timeout,
            ErpcStatus::MemoryError,
        ];
        for status in all {
            assert_eq!(ErpcStatus::from_wire(status.to_wire()), status);
        }
    }

    #[test]
    fn unknown_wire_code_is_protocol_error() {
        assert_eq!(ErpcStatus::from_wire(0xFFFF), ErpcStatus::ProtocolError);
    }

    #[test]
    fn only_success_is_success() {
        assert!(ErpcStatus::Success.is_success());
        assert!(!ErpcStatus::Timeout.is_success());
    }
}
