// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client request/reply management.
//!
//! Generated stubs drive a [`ClientManager`] through a three-step protocol:
//! [`ClientManager::create_request`] writes the header, the stub serialises
//! arguments into the request codec, [`ClientManager::perform_request`]
//! sends and (for two-way calls) awaits and verifies the reply, after which
//! the stub deserialises results and hands the context back through
//! [`ClientManager::release_request`].
//!
//! A user-settable error handler observes every non-success status
//! immediately before it is returned; it cannot override the status.

use crate::arbitrator::{CancelHandle, ClientToken, TransportArbitrator};
use crate::codec::{BasicCodec, MessageInfo, MessageType};
use crate::message::{MessageBuffer, MessageBufferFactory};
use crate::server::ServerContext;
use crate::status::{ErpcResult, ErpcStatus};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Observer for failed client calls.
pub type ErrorHandler = Box<dyn Fn(ErpcStatus) + Send + Sync>;

enum Channel {
    Direct(Arc<dyn Transport>),
    Arbitrated(Arc<TransportArbitrator>),
}

/// One in-flight request owned by a generated stub.
pub struct RequestContext {
    info: MessageInfo,
    codec: BasicCodec,
    oneway: bool,
    token: Option<ClientToken>,
    cancel: Option<CancelHandle>,
}

impl RequestContext {
    pub fn sequence(&self) -> u32 {
        self.info.sequence
    }

    pub fn is_oneway(&self) -> bool {
        self.oneway
    }

    /// Codec for argument serialisation before the transfer and result
    /// deserialisation after it.
    pub fn codec(&mut self) -> &mut BasicCodec {
        &mut self.codec
    }

    /// Cancellation handle, available for arbitrated two-way calls.
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        self.cancel.clone()
    }
}

/// Issues requests and routes replies for any number of generated stubs.
pub struct ClientManager {
    channel: Channel,
    factory: Arc<dyn MessageBufferFactory>,
    sequence: AtomicU32,
    error_handler: Mutex<Option<ErrorHandler>>,
    timeout: Mutex<Option<Duration>>,
    idl_crc16: Mutex<Option<u16>>,
    server_context: Mutex<Option<Arc<ServerContext>>>,
}

impl ClientManager {
    /// Client over a transport it does not share with an arbitrator.
    pub fn new(transport: Arc<dyn Transport>, factory: Arc<dyn MessageBufferFactory>) -> Self {
        ClientManager {
            channel: Channel::Direct(transport),
            factory,
            sequence: AtomicU32::new(0),
            error_handler: Mutex::new(None),
            timeout: Mutex::new(None),
            idl_crc16: Mutex::new(None),
            server_context: Mutex::new(None),
        }
    }

    /// Client sharing an arbitrated transport with replies demultiplexed by
    /// the arbitrator's receive worker.
    pub fn arbitrated(
        arbitrator: Arc<TransportArbitrator>,
        factory: Arc<dyn MessageBufferFactory>,
    ) -> Self {
        ClientManager {
            channel: Channel::Arbitrated(arbitrator),
            factory,
            sequence: AtomicU32::new(0),
            error_handler: Mutex::new(None),
            timeout: Mutex::new(None),
            idl_crc16: Mutex::new(None),
            server_context: Mutex::new(None),
        }
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(ErpcStatus) + Send + Sync + 'static,
    {
        *self.error_handler.lock() = Some(Box::new(handler));
    }

    /// Per-call timeout; `None` waits indefinitely.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        *self.timeout.lock() = timeout;
    }

    /// Enable IDL-checksum injection and verification (program-level `@crc`).
    pub fn set_idl_crc16(&self, crc: u16) {
        *self.idl_crc16.lock() = Some(crc);
    }

    /// Make nested calls from this server's dispatch thread take the direct
    /// read path (see the server module).
    pub fn bind_server(&self, context: Arc<ServerContext>) {
        *self.server_context.lock() = Some(context);
    }

    /// Invoke the error handler. Generated stubs call this for decode
    /// failures they detect after the transfer; internal failures are
    /// reported automatically.
    pub fn report(&self, status: ErpcStatus) {
        if status.is_success() {
            return;
        }
        if let Some(handler) = self.error_handler.lock().as_ref() {
            handler(status);
        }
    }

    /// Begin a request: allocate a buffer and write the header (and the IDL
    /// checksum when `@crc` is in effect).
    pub fn create_request(
        &self,
        service_id: u32,
        function_id: u32,
        oneway: bool,
    ) -> ErpcResult<RequestContext> {
        match self.try_create_request(service_id, function_id, oneway) {
            Ok(ctx) => Ok(ctx),
            Err(status) => {
                self.report(status);
                Err(status)
            }
        }
    }

    fn try_create_request(
        &self,
        service_id: u32,
        function_id: u32,
        oneway: bool,
    ) -> ErpcResult<RequestContext> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let message_type = if oneway {
            MessageType::Oneway
        } else {
            MessageType::Invocation
        };
        let info = MessageInfo::new(message_type, service_id, function_id, sequence);

        let mut buffer = self.factory.create()?;
        if let Channel::Direct(transport) = &self.channel {
            transport.prepare_client_buffer(&mut buffer)?;
        }
        let mut codec = BasicCodec::new(buffer);
        codec.start_write_message(&info)?;
        if let Some(crc) = *self.idl_crc16.lock() {
            codec.write_idl_crc(crc)?;
        }

        // Register before sending so the reply can never arrive first.
        let (token, cancel) = match (&self.channel, oneway) {
            (Channel::Arbitrated(arb), false) => {
                let token = arb.prepare_client_receive(sequence);
                let cancel = arb.cancel_handle(&token);
                (Some(token), Some(cancel))
            }
            _ => (None, None),
        };

        Ok(RequestContext {
            info,
            codec,
            oneway,
            token,
            cancel,
        })
    }

    /// Send the request; for two-way calls, await and verify the reply and
    /// leave the context's codec positioned at the reply payload.
    pub fn perform_request(&self, ctx: &mut RequestContext) -> ErpcResult<()> {
        match self.transfer(ctx) {
            Ok(()) => Ok(()),
            Err(status) => {
                self.report(status);
                Err(status)
            }
        }
    }

    fn transfer(&self, ctx: &mut RequestContext) -> ErpcResult<()> {
        let deadline = self.timeout.lock().map(|t| Instant::now() + t);
        match &self.channel {
            Channel::Direct(transport) => {
                self.check_nested_topology();
                transport.send(ctx.codec.buffer().as_slice())?;
                if ctx.oneway {
                    return Ok(());
                }
                let mut reply = self.factory.create()?;
                transport.receive(&mut reply, deadline)?;
                self.accept_reply(ctx, reply)
            }
            Channel::Arbitrated(arb) => {
                arb.send(ctx.codec.buffer().as_slice())?;
                if ctx.oneway {
                    return Ok(());
                }
                let token = ctx.token.take().ok_or(ErpcStatus::ProtocolError)?;
                let reply = arb.client_receive(token, deadline)?;
                self.accept_reply(ctx, reply)
            }
        }
    }

    /// Swap the request codec for the verified reply codec.
    fn accept_reply(&self, ctx: &mut RequestContext, reply: MessageBuffer) -> ErpcResult<()> {
        let mut codec = BasicCodec::new(reply);
        let result = self.verify_reply(ctx, &mut codec);
        match result {
            Ok(()) => {
                let request = std::mem::replace(&mut ctx.codec, codec);
                self.factory.dispose(request.into_buffer());
                Ok(())
            }
            Err(status) => {
                self.factory.dispose(codec.into_buffer());
                Err(status)
            }
        }
    }

    fn verify_reply(&self, ctx: &RequestContext, codec: &mut BasicCodec) -> ErpcResult<()> {
        let header = codec.start_read_message()?;
        if let Some(crc) = *self.idl_crc16.lock() {
            codec.read_idl_crc(crc)?;
        }
        if header.service_id != ctx.info.service_id
            || header.function_id != ctx.info.function_id
            || header.sequence != ctx.info.sequence
        {
            log::warn!(
                "reply header mismatch: got {}/{}/{}, expected {}/{}/{}",
                header.service_id,
                header.function_id,
                header.sequence,
                ctx.info.service_id,
                ctx.info.function_id,
                ctx.info.sequence
            );
            return Err(ErpcStatus::ProtocolError);
        }
        match header.message_type {
            MessageType::Reply => Ok(()),
            // In-band server failure: the body is a single status word.
            MessageType::Notification => Err(match ErpcStatus::from_wire(codec.read_u32()?) {
                ErpcStatus::Success => ErpcStatus::ProtocolError,
                status => status,
            }),
            _ => Err(ErpcStatus::ExpectedReply),
        }
    }

    /// Return the context's buffer to the factory and drop any registration
    /// left over from a failed transfer.
    pub fn release_request(&self, ctx: RequestContext) {
        if let (Channel::Arbitrated(arb), Some(token)) = (&self.channel, ctx.token) {
            arb.abandon(token);
        }
        self.factory.dispose(ctx.codec.into_buffer());
    }

    fn check_nested_topology(&self) {
        if let Some(context) = self.server_context.lock().as_ref() {
            if context.is_dispatch_thread() {
                log::debug!("nested client call from server dispatch thread");
            } else if context.is_dispatching() {
                // Reading the shared transport would race the server loop.
                log::warn!(
                    "client call on a server-shared transport from outside the dispatch thread"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DynamicMessageBufferFactory;
    use crate::transport::PipeTransport;

    fn manager() -> (ClientManager, PipeTransport) {
        let (near, far) = PipeTransport::pair();
        let manager = ClientManager::new(
            Arc::new(near),
            Arc::new(DynamicMessageBufferFactory::new()),
        );
        (manager, far)
    }

    fn reply_to(peer: &PipeTransport, tweak: impl FnOnce(&mut MessageInfo)) {
        let mut buf = MessageBuffer::dynamic(64);
        peer.receive(&mut buf, None).expect("request");
        let mut info = MessageInfo::peek(buf.as_slice()).expect("peek");
        info.message_type = MessageType::Reply;
        tweak(&mut info);
        let mut codec = BasicCodec::new(MessageBuffer::dynamic(64));
        codec.start_write_message(&info).expect("header");
        codec.write_i32(42).expect("payload");
        peer.send(codec.buffer().as_slice()).expect("reply");
    }

    #[test]
    fn sequence_increments_per_request() {
        let (manager, _peer) = manager();
        let a = manager.create_request(1, 1, true).expect("a");
        let b = manager.create_request(1, 1, true).expect("b");
        assert_eq!(b.sequence(), a.sequence() + 1);
        manager.release_request(a);
        manager.release_request(b);
    }

    #[test]
    fn oneway_returns_without_reading() {
        let (manager, peer) = manager();
        let mut ctx = manager.create_request(5, 6, true).expect("create");
        manager.perform_request(&mut ctx).expect("perform");
        manager.release_request(ctx);

        let mut buf = MessageBuffer::dynamic(64);
        peer.receive(&mut buf, None).expect("server sees it");
        let info = MessageInfo::peek(buf.as_slice()).expect("peek");
        assert_eq!(info.message_type, MessageType::Oneway);
        assert!(!peer.has_message());
    }

    #[test]
    fn matched_reply_is_accepted() {
        let (manager, peer) = manager();
        let responder = std::thread::spawn(move || {
            reply_to(&peer, |_| {});
            peer
        });
        let mut ctx = manager.create_request(2, 3, false).expect("create");
        manager.perform_request(&mut ctx).expect("perform");
        assert_eq!(ctx.codec().read_i32().expect("payload"), 42);
        manager.release_request(ctx);
        responder.join().expect("responder");
    }

    #[test]
    fn mismatched_sequence_is_protocol_error() {
        let (manager, peer) = manager();
        let responder = std::thread::spawn(move || {
            reply_to(&peer, |info| info.sequence ^= 0xFFFF);
            peer
        });
        let mut ctx = manager.create_request(2, 3, false).expect("create");
        assert_eq!(
            manager.perform_request(&mut ctx).unwrap_err(),
            ErpcStatus::ProtocolError
        );
        manager.release_request(ctx);
        responder.join().expect("responder");
    }

    #[test]
    fn wrong_message_type_is_expected_reply() {
        let (manager, peer) = manager();
        let responder = std::thread::spawn(move || {
            reply_to(&peer, |info| info.message_type = MessageType::Invocation);
            peer
        });
        let mut ctx = manager.create_request(2, 3, false).expect("create");
        assert_eq!(
            manager.perform_request(&mut ctx).unwrap_err(),
            ErpcStatus::ExpectedReply
        );
        manager.release_request(ctx);
        responder.join().expect("responder");
    }

    #[test]
    fn error_handler_sees_failure_status() {
        let (manager, peer) = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            manager.set_error_handler(move |status| seen.lock().push(status));
        }
        let responder = std::thread::spawn(move || {
            reply_to(&peer, |info| info.sequence ^= 1);
            peer
        });
        let mut ctx = manager.create_request(2, 3, false).expect("create");
        let _ = manager.perform_request(&mut ctx);
        manager.release_request(ctx);
        responder.join().expect("responder");
        assert_eq!(seen.lock().as_slice(), &[ErpcStatus::ProtocolError]);
    }

    #[test]
    fn notification_reply_carries_server_status() {
        let (manager, peer) = manager();
        let responder = std::thread::spawn(move || {
            let mut buf = MessageBuffer::dynamic(64);
            peer.receive(&mut buf, None).expect("request");
            let mut info = MessageInfo::peek(buf.as_slice()).expect("peek");
            info.message_type = MessageType::Notification;
            let mut codec = BasicCodec::new(MessageBuffer::dynamic(64));
            codec.start_write_message(&info).expect("header");
            codec
                .write_u32(ErpcStatus::UnknownFunction.to_wire())
                .expect("status");
            peer.send(codec.buffer().as_slice()).expect("reply");
            peer
        });
        let mut ctx = manager.create_request(2, 9, false).expect("create");
        assert_eq!(
            manager.perform_request(&mut ctx).unwrap_err(),
            ErpcStatus::UnknownFunction
        );
        manager.release_request(ctx);
        responder.join().expect("responder");
    }

    #[test]
    fn timeout_without_reply() {
        let (manager, _peer) = manager();
        manager.set_timeout(Some(Duration::from_millis(20)));
        let mut ctx = manager.create_request(1, 1, false).expect("create");
        assert_eq!(
            manager.perform_request(&mut ctx).unwrap_err(),
            ErpcStatus::Timeout
        );
        manager.release_request(ctx);
    }
}
