// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport arbitration: one bidirectional channel, many conversations.
//!
//! The arbitrator lets a single transport carry outbound client requests,
//! the replies to those requests, and inbound invocations for a local
//! server, concurrently. A dedicated receive worker reads every incoming
//! message, peeks its header, wakes the matching reply waiter, and queues
//! everything else for the server side.
//!
//! Correctness rests on three rules:
//!
//! - a client registers its sequence *before* sending, so a reply can never
//!   arrive unregistered
//! - all writes funnel through one lock, so concurrent senders cannot
//!   interleave frames
//! - replies match on sequence, not arrival order, so two outstanding calls
//!   each see their own reply

use crate::codec::{MessageInfo, MessageType};
use crate::message::{MessageBuffer, MessageBufferFactory};
use crate::status::{ErpcResult, ErpcStatus};
use crate::transport::Transport;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(100);

enum SlotState {
    Waiting,
    Ready(MessageBuffer),
    Failed(ErpcStatus),
    Cancelled,
}

/// One registered pending reply.
struct ReplySlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl ReplySlot {
    fn new() -> Arc<ReplySlot> {
        Arc::new(ReplySlot {
            state: Mutex::new(SlotState::Waiting),
            cond: Condvar::new(),
        })
    }
}

/// Handle returned by [`TransportArbitrator::prepare_client_receive`];
/// redeemed for the reply, or cancelled.
pub struct ClientToken {
    sequence: u32,
    slot: Arc<ReplySlot>,
}

impl ClientToken {
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

/// Cancellation handle detachable from a pending call.
#[derive(Clone)]
pub struct CancelHandle {
    slot: Arc<ReplySlot>,
}

impl CancelHandle {
    /// Mark the call cancelled and wake the waiter. The receive worker
    /// discards the reply if it arrives later.
    pub fn cancel(&self) {
        let mut state = self.slot.state.lock();
        if matches!(*state, SlotState::Waiting) {
            *state = SlotState::Cancelled;
            self.slot.cond.notify_all();
        }
    }
}

struct ArbitratorShared {
    transport: Arc<dyn Transport>,
    factory: Arc<dyn MessageBufferFactory>,
    pending: Mutex<HashMap<u32, Arc<ReplySlot>>>,
    server_queue: Mutex<VecDeque<MessageBuffer>>,
    server_cond: Condvar,
    write_lock: Mutex<()>,
    running: AtomicBool,
    closed: AtomicBool,
}

impl ArbitratorShared {
    fn send(&self, message: &[u8]) -> ErpcResult<()> {
        let _guard = self.write_lock.lock();
        self.transport.send(message)
    }

    fn fail_all_pending(&self, status: ErpcStatus) {
        let mut pending = self.pending.lock();
        for (_, slot) in pending.drain() {
            let mut state = slot.state.lock();
            if matches!(*state, SlotState::Waiting) {
                *state = SlotState::Failed(status);
                slot.cond.notify_all();
            }
        }
    }

    fn route(&self, buffer: MessageBuffer, info: MessageInfo) {
        match info.message_type {
            MessageType::Reply | MessageType::Notification => {
                let slot = self.pending.lock().remove(&info.sequence);
                match slot {
                    Some(slot) => {
                        let mut state = slot.state.lock();
                        match *state {
                            SlotState::Waiting => {
                                *state = SlotState::Ready(buffer);
                                slot.cond.notify_all();
                            }
                            SlotState::Cancelled => {
                                log::debug!("discarding reply for cancelled sequence {}", info.sequence);
                                drop(state);
                                self.factory.dispose(buffer);
                            }
                            _ => {
                                drop(state);
                                self.factory.dispose(buffer);
                            }
                        }
                    }
                    None => {
                        log::warn!("reply for unregistered sequence {}", info.sequence);
                        self.factory.dispose(buffer);
                    }
                }
            }
            MessageType::Invocation | MessageType::Oneway => {
                self.server_queue.lock().push_back(buffer);
                self.server_cond.notify_one();
            }
        }
    }
}

/// Multiplexer presenting one transport to both a client manager and a
/// server.
pub struct TransportArbitrator {
    shared: Arc<ArbitratorShared>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl TransportArbitrator {
    pub fn new(transport: Arc<dyn Transport>, factory: Arc<dyn MessageBufferFactory>) -> Self {
        TransportArbitrator {
            shared: Arc::new(ArbitratorShared {
                transport,
                factory,
                pending: Mutex::new(HashMap::new()),
                server_queue: Mutex::new(VecDeque::new()),
                server_cond: Condvar::new(),
                write_lock: Mutex::new(()),
                running: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the receive worker. Must be called once before any call or
    /// server receive goes through this arbitrator.
    pub fn start(&self) -> ErpcResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("erpc-arbitrator".into())
            .spawn(move || receive_worker(&shared))
            .map_err(|e| {
                log::error!("failed to spawn arbitrator worker: {}", e);
                ErpcStatus::InitFailed
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop the worker and fail outstanding calls with `Closed`.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.shared.closed.store(true, Ordering::Release);
        self.shared.fail_all_pending(ErpcStatus::Closed);
        self.shared.server_cond.notify_all();
    }

    /// Register interest in the reply for `sequence`. Must precede the send
    /// so the reply cannot arrive unregistered.
    pub fn prepare_client_receive(&self, sequence: u32) -> ClientToken {
        let slot = ReplySlot::new();
        self.shared.pending.lock().insert(sequence, slot.clone());
        ClientToken { sequence, slot }
    }

    /// Detach a cancellation handle for a registered call.
    pub fn cancel_handle(&self, token: &ClientToken) -> CancelHandle {
        CancelHandle {
            slot: token.slot.clone(),
        }
    }

    /// Serialised write to the underlying transport.
    pub fn send(&self, message: &[u8]) -> ErpcResult<()> {
        self.shared.send(message)
    }

    /// Block until the registered reply arrives, the deadline passes, the
    /// call is cancelled, or the transport closes.
    pub fn client_receive(
        &self,
        token: ClientToken,
        deadline: Option<Instant>,
    ) -> ErpcResult<MessageBuffer> {
        let mut state = token.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Waiting) {
                SlotState::Ready(buffer) => return Ok(buffer),
                SlotState::Failed(status) => return Err(status),
                SlotState::Cancelled => {
                    *state = SlotState::Cancelled;
                    self.shared.pending.lock().remove(&token.sequence);
                    return Err(ErpcStatus::Cancelled);
                }
                SlotState::Waiting => {}
            }
            if self.shared.closed.load(Ordering::Acquire) {
                self.shared.pending.lock().remove(&token.sequence);
                return Err(ErpcStatus::Closed);
            }
            match deadline {
                Some(when) => {
                    if token.slot.cond.wait_until(&mut state, when).timed_out() {
                        // A reply racing the deadline still wins; otherwise a
                        // cancelled marker makes the worker discard it later.
                        match std::mem::replace(&mut *state, SlotState::Cancelled) {
                            SlotState::Ready(buffer) => return Ok(buffer),
                            SlotState::Failed(status) => return Err(status),
                            _ => {
                                drop(state);
                                self.shared.pending.lock().remove(&token.sequence);
                                return Err(ErpcStatus::Timeout);
                            }
                        }
                    }
                }
                None => token.slot.cond.wait(&mut state),
            }
        }
    }

    /// Drop a registration without waiting (oneway paths, aborted sends).
    pub fn abandon(&self, token: ClientToken) {
        let mut state = token.slot.state.lock();
        if let SlotState::Ready(buffer) = std::mem::replace(&mut *state, SlotState::Cancelled) {
            drop(state);
            self.shared.factory.dispose(buffer);
        }
        self.shared.pending.lock().remove(&token.sequence);
    }

    /// The server-facing side of this arbitrator.
    pub fn server_port(&self) -> ArbitratorServerPort {
        ArbitratorServerPort {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for TransportArbitrator {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn receive_worker(shared: &ArbitratorShared) {
    while shared.running.load(Ordering::Acquire) {
        let mut buffer = match shared.factory.create() {
            Ok(buffer) => buffer,
            Err(_) => {
                // Pool exhausted; give holders a chance to dispose.
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
        };
        let deadline = Instant::now() + WORKER_POLL_INTERVAL;
        match shared.transport.receive(&mut buffer, Some(deadline)) {
            Ok(()) => match MessageInfo::peek(buffer.as_slice()) {
                Ok(info) => shared.route(buffer, info),
                Err(_) => {
                    log::warn!("dropping runt message of {} bytes", buffer.used());
                    shared.factory.dispose(buffer);
                }
            },
            Err(ErpcStatus::Timeout) => {
                shared.factory.dispose(buffer);
            }
            Err(ErpcStatus::Closed) => {
                shared.factory.dispose(buffer);
                break;
            }
            Err(status) => {
                log::warn!("arbitrator receive failed: {}", status);
                shared.factory.dispose(buffer);
            }
        }
    }
    shared.closed.store(true, Ordering::Release);
    shared.fail_all_pending(ErpcStatus::Closed);
    shared.server_cond.notify_all();
}

/// `Transport` facade handed to the server side of an arbitrated link.
pub struct ArbitratorServerPort {
    shared: Arc<ArbitratorShared>,
}

impl Transport for ArbitratorServerPort {
    fn send(&self, message: &[u8]) -> ErpcResult<()> {
        self.shared.send(message)
    }

    fn receive(&self, buffer: &mut MessageBuffer, deadline: Option<Instant>) -> ErpcResult<()> {
        let mut queue = self.shared.server_queue.lock();
        loop {
            if let Some(message) = queue.pop_front() {
                drop(queue);
                if buffer.ensure(message.used()).is_err() {
                    self.shared.factory.dispose(message);
                    return Err(ErpcStatus::ReceiveFailed);
                }
                buffer.storage_mut()[..message.used()].copy_from_slice(message.as_slice());
                buffer.set_used(message.used());
                self.shared.factory.dispose(message);
                return Ok(());
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(ErpcStatus::Closed);
            }
            match deadline {
                Some(when) => {
                    if self
                        .shared
                        .server_cond
                        .wait_until(&mut queue, when)
                        .timed_out()
                    {
                        return Err(ErpcStatus::Timeout);
                    }
                }
                None => self.shared.server_cond.wait(&mut queue),
            }
        }
    }

    fn has_message(&self) -> bool {
        !self.shared.server_queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BasicCodec;
    use crate::message::DynamicMessageBufferFactory;
    use crate::transport::PipeTransport;

    fn encode(info: MessageInfo) -> Vec<u8> {
        let mut codec = BasicCodec::new(MessageBuffer::dynamic(32));
        codec.start_write_message(&info).expect("header");
        codec.into_buffer().as_slice().to_vec()
    }

    fn arbitrated_pair() -> (Arc<TransportArbitrator>, PipeTransport) {
        let (near, far) = PipeTransport::pair();
        let arb = Arc::new(TransportArbitrator::new(
            Arc::new(near),
            Arc::new(DynamicMessageBufferFactory::new()),
        ));
        arb.start().expect("start arbitrator");
        (arb, far)
    }

    #[test]
    fn reply_reaches_registered_waiter() {
        let (arb, peer) = arbitrated_pair();
        let token = arb.prepare_client_receive(7);
        peer.send(&encode(MessageInfo::new(MessageType::Reply, 1, 2, 7)))
            .expect("peer send");
        let reply = arb.client_receive(token, None).expect("reply");
        let info = MessageInfo::peek(reply.as_slice()).expect("peek");
        assert_eq!(info.sequence, 7);
        arb.stop();
    }

    #[test]
    fn interleaved_replies_match_their_requests() {
        let (arb, peer) = arbitrated_pair();
        let token_a = arb.prepare_client_receive(1);
        let token_b = arb.prepare_client_receive(2);
        // Replies in reverse order of registration.
        peer.send(&encode(MessageInfo::new(MessageType::Reply, 9, 9, 2)))
            .expect("send 2");
        peer.send(&encode(MessageInfo::new(MessageType::Reply, 9, 9, 1)))
            .expect("send 1");

        let reply_a = arb.client_receive(token_a, None).expect("a");
        let reply_b = arb.client_receive(token_b, None).expect("b");
        assert_eq!(MessageInfo::peek(reply_a.as_slice()).unwrap().sequence, 1);
        assert_eq!(MessageInfo::peek(reply_b.as_slice()).unwrap().sequence, 2);
        arb.stop();
    }

    #[test]
    fn invocations_go_to_the_server_queue() {
        let (arb, peer) = arbitrated_pair();
        let port = arb.server_port();
        peer.send(&encode(MessageInfo::new(MessageType::Invocation, 3, 4, 5)))
            .expect("send");
        let mut buf = MessageBuffer::dynamic(32);
        port.receive(&mut buf, None).expect("server receive");
        let info = MessageInfo::peek(buf.as_slice()).expect("peek");
        assert_eq!(info.message_type, MessageType::Invocation);
        assert_eq!(info.service_id, 3);
        arb.stop();
    }

    #[test]
    fn cancelled_call_discards_late_reply() {
        let (arb, peer) = arbitrated_pair();
        let token = arb.prepare_client_receive(9);
        let handle = arb.cancel_handle(&token);
        handle.cancel();
        assert_eq!(arb.client_receive(token, None).unwrap_err(), ErpcStatus::Cancelled);

        // The late reply must not leak into the server queue.
        peer.send(&encode(MessageInfo::new(MessageType::Reply, 1, 1, 9)))
            .expect("late reply");
        std::thread::sleep(Duration::from_millis(50));
        assert!(!arb.server_port().has_message());
        arb.stop();
    }

    #[test]
    fn receive_timeout_clears_registration() {
        let (arb, _peer) = arbitrated_pair();
        let token = arb.prepare_client_receive(4);
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(
            arb.client_receive(token, Some(deadline)).unwrap_err(),
            ErpcStatus::Timeout
        );
        assert!(arb.shared.pending.lock().is_empty());
        arb.stop();
    }

    #[test]
    fn stop_fails_outstanding_calls_with_closed() {
        let (arb, _peer) = arbitrated_pair();
        let token = arb.prepare_client_receive(11);
        let waiter = {
            let arb = arb.clone();
            std::thread::spawn(move || arb.client_receive(token, None))
        };
        std::thread::sleep(Duration::from_millis(30));
        arb.stop();
        assert_eq!(waiter.join().expect("join").unwrap_err(), ErpcStatus::Closed);
    }
}
