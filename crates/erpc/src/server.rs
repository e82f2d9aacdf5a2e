// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server dispatch loop.
//!
//! A server owns a transport, a buffer factory, and a set of registered
//! services. Each [`Service`] is generated code: a switch on `function_id`
//! whose arms decode arguments, call the user implementation, and encode
//! the return path. The server frames that dispatch with header decoding,
//! service lookup, panic trapping, and reply transmission.
//!
//! Failures the client must learn about travel back in-band: a
//! `Notification`-type message whose body is a single status word, sent in
//! place of the normal reply (never for oneway requests).

use crate::codec::{BasicCodec, MessageInfo, MessageType};
use crate::message::{MessageBuffer, MessageBufferFactory, StaticMessageBufferFactory};
use crate::status::{ErpcResult, ErpcStatus};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

const RUN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A runtime object implementing one IDL interface on the server side.
pub trait Service: Send + Sync {
    /// The interface's unique id.
    fn service_id(&self) -> u32;

    /// Decode arguments from `request`, invoke the implementation, and
    /// encode results into `reply` (already positioned past the header).
    /// An unknown `function_id` returns `UnknownFunction`.
    fn dispatch(
        &self,
        function_id: u32,
        request: &mut BasicCodec,
        reply: &mut BasicCodec,
    ) -> ErpcResult<()>;
}

/// Dispatch-thread bookkeeping shared with client managers for nested
/// calls: while a handler runs, the client manager can recognise that it is
/// being driven from the server's own dispatch frame.
pub struct ServerContext {
    dispatch_thread: Mutex<Option<ThreadId>>,
}

impl ServerContext {
    fn new() -> Arc<ServerContext> {
        Arc::new(ServerContext {
            dispatch_thread: Mutex::new(None),
        })
    }

    /// True when any handler is currently executing.
    pub fn is_dispatching(&self) -> bool {
        self.dispatch_thread.lock().is_some()
    }

    /// True when the calling thread is the one executing a handler.
    pub fn is_dispatch_thread(&self) -> bool {
        *self.dispatch_thread.lock() == Some(std::thread::current().id())
    }

    fn enter(&self) {
        *self.dispatch_thread.lock() = Some(std::thread::current().id());
    }

    fn exit(&self) {
        *self.dispatch_thread.lock() = None;
    }
}

/// Shared dispatch frame used by both server variants.
struct ServerCore {
    transport: Arc<dyn Transport>,
    services: Mutex<Vec<Arc<dyn Service>>>,
    context: Arc<ServerContext>,
    idl_crc16: Mutex<Option<u16>>,
    requests_processed: AtomicU64,
}

impl ServerCore {
    fn new(transport: Arc<dyn Transport>) -> ServerCore {
        ServerCore {
            transport,
            services: Mutex::new(Vec::new()),
            context: ServerContext::new(),
            idl_crc16: Mutex::new(None),
            requests_processed: AtomicU64::new(0),
        }
    }

    fn find_service(&self, service_id: u32) -> Option<Arc<dyn Service>> {
        self.services
            .lock()
            .iter()
            .find(|s| s.service_id() == service_id)
            .cloned()
    }

    /// Handle one received message. Both buffers come back to the caller
    /// for reuse or disposal.
    fn process(
        &self,
        request: MessageBuffer,
        reply: MessageBuffer,
    ) -> (MessageBuffer, MessageBuffer) {
        let mut request_codec = BasicCodec::new(request);
        let mut reply_codec = BasicCodec::new(reply);
        reply_codec.reset();

        let header = match request_codec.start_read_message() {
            Ok(header) => header,
            Err(status) => {
                log::warn!("dropping undecodable request header: {}", status);
                return (request_codec.into_buffer(), reply_codec.into_buffer());
            }
        };
        let oneway = header.message_type == MessageType::Oneway;

        let status = self.dispatch_frame(&header, &mut request_codec, &mut reply_codec);
        match status {
            Ok(()) => {
                if !oneway {
                    if let Err(send_status) = self.transport.send(reply_codec.buffer().as_slice()) {
                        log::warn!("reply send failed: {}", send_status);
                    }
                }
                self.requests_processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(status) => {
                log::warn!(
                    "request {}/{} seq {} failed: {}",
                    header.service_id,
                    header.function_id,
                    header.sequence,
                    status
                );
                if !oneway {
                    self.send_error_reply(&header, status, &mut reply_codec);
                }
            }
        }
        (request_codec.into_buffer(), reply_codec.into_buffer())
    }

    fn dispatch_frame(
        &self,
        header: &MessageInfo,
        request: &mut BasicCodec,
        reply: &mut BasicCodec,
    ) -> ErpcResult<()> {
        if header.message_type != MessageType::Invocation
            && header.message_type != MessageType::Oneway
        {
            return Err(ErpcStatus::ProtocolError);
        }
        let idl_crc = *self.idl_crc16.lock();
        if let Some(crc) = idl_crc {
            request.read_idl_crc(crc)?;
        }

        let service = self
            .find_service(header.service_id)
            .ok_or(ErpcStatus::UnknownService)?;

        reply.start_write_message(&MessageInfo::new(
            MessageType::Reply,
            header.service_id,
            header.function_id,
            header.sequence,
        ))?;
        if let Some(crc) = idl_crc {
            reply.write_idl_crc(crc)?;
        }

        self.context.enter();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            service.dispatch(header.function_id, request, reply)
        }));
        self.context.exit();

        match outcome {
            Ok(result) => result,
            Err(_) => {
                log::error!(
                    "handler for {}/{} panicked",
                    header.service_id,
                    header.function_id
                );
                Err(ErpcStatus::ServerError)
            }
        }
    }

    fn send_error_reply(&self, header: &MessageInfo, status: ErpcStatus, reply: &mut BasicCodec) {
        reply.reset();
        let result = reply
            .start_write_message(&MessageInfo::new(
                MessageType::Notification,
                header.service_id,
                header.function_id,
                header.sequence,
            ))
            .and_then(|_| reply.write_u32(status.to_wire()))
            .and_then(|_| self.transport.send(reply.buffer().as_slice()));
        if let Err(send_status) = result {
            log::warn!("error reply send failed: {}", send_status);
        }
    }
}

/// Single-threaded dispatch loop allocating buffers per call.
pub struct SimpleServer {
    core: ServerCore,
    factory: Arc<dyn MessageBufferFactory>,
    running: AtomicBool,
}

impl SimpleServer {
    pub fn new(transport: Arc<dyn Transport>, factory: Arc<dyn MessageBufferFactory>) -> Self {
        SimpleServer {
            core: ServerCore::new(transport),
            factory,
            running: AtomicBool::new(false),
        }
    }

    /// Register a service. Services are immutable once the loop runs.
    pub fn add_service(&self, service: Arc<dyn Service>) {
        self.core.services.lock().push(service);
    }

    /// Enable IDL-checksum verification and injection (program-level `@crc`).
    pub fn set_idl_crc16(&self, crc: u16) {
        *self.core.idl_crc16.lock() = Some(crc);
    }

    /// Context handle for wiring nested clients.
    pub fn context(&self) -> Arc<ServerContext> {
        self.core.context.clone()
    }

    pub fn requests_processed(&self) -> u64 {
        self.core.requests_processed.load(Ordering::Relaxed)
    }

    /// Process requests until [`SimpleServer::stop`]. Returns `Ok` on stop
    /// or clean peer close.
    pub fn run(&self) -> ErpcResult<()> {
        self.running.store(true, Ordering::Release);
        log::info!("server loop started");
        while self.running.load(Ordering::Acquire) {
            match self.serve_one(Some(Instant::now() + RUN_POLL_INTERVAL)) {
                Ok(()) => {}
                Err(ErpcStatus::Timeout) => {}
                Err(ErpcStatus::Closed) => break,
                Err(status) => log::warn!("server receive failed: {}", status),
            }
        }
        log::info!("server loop stopped");
        Ok(())
    }

    /// Cooperative single-shot: process one pending request if there is
    /// one. Returns whether a message was handled.
    pub fn poll(&self) -> ErpcResult<bool> {
        if !self.core.transport.has_message() {
            return Ok(false);
        }
        match self.serve_one(Some(Instant::now())) {
            Ok(()) => Ok(true),
            Err(ErpcStatus::Timeout) => Ok(false),
            Err(status) => Err(status),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn serve_one(&self, deadline: Option<Instant>) -> ErpcResult<()> {
        let mut request = self.factory.create()?;
        self.core.transport.prepare_server_buffer(&mut request)?;
        if let Err(status) = self.core.transport.receive(&mut request, deadline) {
            self.factory.dispose(request);
            return Err(status);
        }
        let reply = match self.factory.create() {
            Ok(reply) => reply,
            Err(status) => {
                self.factory.dispose(request);
                return Err(status);
            }
        };
        let (request, reply) = self.core.process(request, reply);
        self.factory.dispose(request);
        self.factory.dispose(reply);
        Ok(())
    }
}

/// Dispatch loop over preallocated buffers: no allocation per call.
pub struct StaticServer {
    core: ServerCore,
    buffers: Mutex<Option<(MessageBuffer, MessageBuffer)>>,
    running: AtomicBool,
}

impl StaticServer {
    /// Buffers are drawn once from the static pool at construction.
    pub fn new(
        transport: Arc<dyn Transport>,
        factory: &StaticMessageBufferFactory,
    ) -> ErpcResult<Self> {
        let request = factory.create()?;
        let reply = factory.create()?;
        Ok(StaticServer {
            core: ServerCore::new(transport),
            buffers: Mutex::new(Some((request, reply))),
            running: AtomicBool::new(false),
        })
    }

    pub fn add_service(&self, service: Arc<dyn Service>) {
        self.core.services.lock().push(service);
    }

    pub fn set_idl_crc16(&self, crc: u16) {
        *self.core.idl_crc16.lock() = Some(crc);
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.core.context.clone()
    }

    pub fn run(&self) -> ErpcResult<()> {
        self.running.store(true, Ordering::Release);
        while self.running.load(Ordering::Acquire) {
            match self.serve_one(Some(Instant::now() + RUN_POLL_INTERVAL)) {
                Ok(()) => {}
                Err(ErpcStatus::Timeout) => {}
                Err(ErpcStatus::Closed) => break,
                Err(status) => log::warn!("server receive failed: {}", status),
            }
        }
        Ok(())
    }

    pub fn poll(&self) -> ErpcResult<bool> {
        if !self.core.transport.has_message() {
            return Ok(false);
        }
        match self.serve_one(Some(Instant::now())) {
            Ok(()) => Ok(true),
            Err(ErpcStatus::Timeout) => Ok(false),
            Err(status) => Err(status),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn serve_one(&self, deadline: Option<Instant>) -> ErpcResult<()> {
        let (mut request, reply) = self
            .buffers
            .lock()
            .take()
            .ok_or(ErpcStatus::ServerError)?;
        request.reset();
        if let Err(status) = self.core.transport.receive(&mut request, deadline) {
            *self.buffers.lock() = Some((request, reply));
            return Err(status);
        }
        let (request, reply) = self.core.process(request, reply);
        *self.buffers.lock() = Some((request, reply));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DynamicMessageBufferFactory;
    use crate::transport::PipeTransport;

    /// Doubles its i32 argument on function 1; panics on function 2.
    struct DoublerService;

    impl Service for DoublerService {
        fn service_id(&self) -> u32 {
            7
        }

        fn dispatch(
            &self,
            function_id: u32,
            request: &mut BasicCodec,
            reply: &mut BasicCodec,
        ) -> ErpcResult<()> {
            match function_id {
                1 => {
                    let value = request.read_i32()?;
                    reply.write_i32(value * 2)
                }
                2 => panic!("handler blew up"),
                _ => Err(ErpcStatus::UnknownFunction),
            }
        }
    }

    fn request(peer: &PipeTransport, message_type: MessageType, service: u32, function: u32) {
        let mut codec = BasicCodec::new(MessageBuffer::dynamic(64));
        codec
            .start_write_message(&MessageInfo::new(message_type, service, function, 99))
            .expect("header");
        codec.write_i32(21).expect("arg");
        peer.send(codec.buffer().as_slice()).expect("send");
    }

    fn receive_reply(peer: &PipeTransport) -> (MessageInfo, BasicCodec) {
        let mut buf = MessageBuffer::dynamic(64);
        peer.receive(&mut buf, None).expect("reply");
        let mut codec = BasicCodec::new(buf);
        let info = codec.start_read_message().expect("header");
        (info, codec)
    }

    fn server_with_peer() -> (Arc<SimpleServer>, PipeTransport) {
        let (near, far) = PipeTransport::pair();
        let server = Arc::new(SimpleServer::new(
            Arc::new(near),
            Arc::new(DynamicMessageBufferFactory::new()),
        ));
        server.add_service(Arc::new(DoublerService));
        (server, far)
    }

    #[test]
    fn dispatches_and_replies() {
        let (server, peer) = server_with_peer();
        request(&peer, MessageType::Invocation, 7, 1);
        assert!(server.poll().expect("poll"));
        let (info, mut codec) = receive_reply(&peer);
        assert_eq!(info.message_type, MessageType::Reply);
        assert_eq!(info.sequence, 99);
        assert_eq!(codec.read_i32().expect("result"), 42);
        assert_eq!(server.requests_processed(), 1);
    }

    #[test]
    fn oneway_never_emits_a_reply() {
        let (server, peer) = server_with_peer();
        request(&peer, MessageType::Oneway, 7, 1);
        assert!(server.poll().expect("poll"));
        assert!(!peer.has_message());
    }

    #[test]
    fn unknown_service_reported_in_band() {
        let (server, peer) = server_with_peer();
        request(&peer, MessageType::Invocation, 12, 1);
        assert!(server.poll().expect("poll"));
        let (info, mut codec) = receive_reply(&peer);
        assert_eq!(info.message_type, MessageType::Notification);
        assert_eq!(
            ErpcStatus::from_wire(codec.read_u32().expect("status")),
            ErpcStatus::UnknownService
        );
    }

    #[test]
    fn unknown_function_reported_in_band() {
        let (server, peer) = server_with_peer();
        request(&peer, MessageType::Invocation, 7, 9);
        assert!(server.poll().expect("poll"));
        let (info, mut codec) = receive_reply(&peer);
        assert_eq!(info.message_type, MessageType::Notification);
        assert_eq!(
            ErpcStatus::from_wire(codec.read_u32().expect("status")),
            ErpcStatus::UnknownFunction
        );
    }

    #[test]
    fn handler_panic_becomes_server_error() {
        let (server, peer) = server_with_peer();
        request(&peer, MessageType::Invocation, 7, 2);
        assert!(server.poll().expect("poll"));
        let (info, mut codec) = receive_reply(&peer);
        assert_eq!(info.message_type, MessageType::Notification);
        assert_eq!(
            ErpcStatus::from_wire(codec.read_u32().expect("status")),
            ErpcStatus::ServerError
        );
        // The server survives and keeps serving.
        request(&peer, MessageType::Invocation, 7, 1);
        assert!(server.poll().expect("poll"));
        let (info, _) = receive_reply(&peer);
        assert_eq!(info.message_type, MessageType::Reply);
    }

    #[test]
    fn run_loop_stops_on_request() {
        let (server, peer) = server_with_peer();
        let handle = {
            let server = server.clone();
            std::thread::spawn(move || server.run())
        };
        request(&peer, MessageType::Invocation, 7, 1);
        let (_, mut codec) = receive_reply(&peer);
        assert_eq!(codec.read_i32().expect("result"), 42);
        server.stop();
        handle.join().expect("join").expect("run");
    }

    #[test]
    fn static_server_reuses_buffers() {
        let (near, far) = PipeTransport::pair();
        let factory = StaticMessageBufferFactory::new(2, 128);
        let server = StaticServer::new(Arc::new(near), &factory).expect("static server");
        assert_eq!(factory.available(), 0);
        server.add_service(Arc::new(DoublerService));

        for _ in 0..3 {
            request(&far, MessageType::Invocation, 7, 1);
            assert!(server.poll().expect("poll"));
            let (_, mut codec) = receive_reply(&far);
            assert_eq!(codec.read_i32().expect("result"), 42);
        }
    }

    #[test]
    fn crc_mismatch_rejected_when_enabled() {
        let (server, peer) = server_with_peer();
        server.set_idl_crc16(0x1234);
        let mut codec = BasicCodec::new(MessageBuffer::dynamic(64));
        codec
            .start_write_message(&MessageInfo::new(MessageType::Invocation, 7, 1, 5))
            .expect("header");
        codec.write_idl_crc(0x9999).expect("wrong crc");
        codec.write_i32(21).expect("arg");
        peer.send(codec.buffer().as_slice()).expect("send");

        assert!(server.poll().expect("poll"));
        let (info, mut reply) = receive_reply(&peer);
        assert_eq!(info.message_type, MessageType::Notification);
        assert_eq!(
            ErpcStatus::from_wire(reply.read_u32().expect("status")),
            ErpcStatus::CrcCheckFailed
        );
    }
}
