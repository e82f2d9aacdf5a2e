// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios exercising the full runtime stack with
//! hand-written shims in the shape the generator emits.

use erpc::arbitrator::TransportArbitrator;
use erpc::client::ClientManager;
use erpc::codec::{BasicCodec, MessageInfo, MessageType};
use erpc::message::{DynamicMessageBufferFactory, MessageBuffer};
use erpc::server::{Service, SimpleServer};
use erpc::status::{ErpcResult, ErpcStatus};
use erpc::transport::framed::{FramedTransport, StreamIo};
use erpc::transport::pipe::{PipeStream, PipeTransport};
use erpc::transport::Transport;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn factory() -> Arc<DynamicMessageBufferFactory> {
    Arc::new(DynamicMessageBufferFactory::new())
}

/// Transport wrapper recording the size of every frame it carries.
struct Sniffer {
    inner: PipeTransport,
    sent: Mutex<Vec<usize>>,
}

impl Sniffer {
    fn new(inner: PipeTransport) -> Self {
        Sniffer {
            inner,
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl Transport for Sniffer {
    fn send(&self, message: &[u8]) -> ErpcResult<()> {
        self.sent.lock().unwrap().push(message.len());
        self.inner.send(message)
    }

    fn receive(&self, buffer: &mut MessageBuffer, deadline: Option<Instant>) -> ErpcResult<()> {
        self.inner.receive(buffer, deadline)
    }

    fn has_message(&self) -> bool {
        self.inner.has_message()
    }
}

// ---------------------------------------------------------------------------
// Matrix multiply (5x5 int32 matrices as list<list<int32>>)
// ---------------------------------------------------------------------------

const MATRIX_SERVICE: u32 = 1;
const MATRIX_MULTIPLY_ID: u32 = 1;

type Matrix = Vec<Vec<i32>>;

fn write_matrix(codec: &mut BasicCodec, value: &Matrix) -> ErpcResult<()> {
    codec.start_write_list(value.len() as u32)?;
    for row in value {
        codec.start_write_list(row.len() as u32)?;
        for item in row {
            codec.write_i32(*item)?;
        }
    }
    Ok(())
}

fn read_matrix(codec: &mut BasicCodec) -> ErpcResult<Matrix> {
    let rows = codec.start_read_list()? as usize;
    let mut value = Vec::new();
    for _ in 0..rows {
        let cols = codec.start_read_list()? as usize;
        let mut row = Vec::new();
        for _ in 0..cols {
            row.push(codec.read_i32()?);
        }
        value.push(row);
    }
    Ok(value)
}

struct MatrixMultiplyService;

impl Service for MatrixMultiplyService {
    fn service_id(&self) -> u32 {
        MATRIX_SERVICE
    }

    fn dispatch(
        &self,
        function_id: u32,
        request: &mut BasicCodec,
        reply: &mut BasicCodec,
    ) -> ErpcResult<()> {
        match function_id {
            MATRIX_MULTIPLY_ID => {
                let a = read_matrix(request)?;
                let b = read_matrix(request)?;
                let n = a.len();
                let mut product = vec![vec![0i32; n]; n];
                for (i, row) in product.iter_mut().enumerate() {
                    for (j, cell) in row.iter_mut().enumerate() {
                        for (k, b_row) in b.iter().enumerate() {
                            *cell += a[i][k] * b_row[j];
                        }
                    }
                }
                write_matrix(reply, &product)
            }
            _ => Err(ErpcStatus::UnknownFunction),
        }
    }
}

fn matrix_multiply_stub(client: &ClientManager, a: &Matrix, b: &Matrix) -> ErpcResult<Matrix> {
    let mut ctx = client.create_request(MATRIX_SERVICE, MATRIX_MULTIPLY_ID, false)?;
    write_matrix(ctx.codec(), a)?;
    write_matrix(ctx.codec(), b)?;
    client.perform_request(&mut ctx)?;
    let result = read_matrix(ctx.codec());
    client.release_request(ctx);
    result
}

#[test]
fn matrix_multiply_round_trip() {
    let (near, far) = PipeTransport::pair();
    let near = Arc::new(Sniffer::new(near));
    let client = ClientManager::new(near.clone(), factory());
    let server = Arc::new(SimpleServer::new(Arc::new(far), factory()));
    server.add_service(Arc::new(MatrixMultiplyService));

    let server_thread = {
        let server = server.clone();
        std::thread::spawn(move || server.run())
    };

    let a: Matrix = vec![
        vec![3, 3, 3, 7, 6],
        vec![1, 0, 2, 4, 5],
        vec![7, 1, 3, 0, 2],
        vec![2, 2, 1, 1, 0],
        vec![0, 5, 3, 8, 1],
    ];
    let b: Matrix = vec![
        vec![4, 1, 7, 1, 4],
        vec![1, 9, 0, 2, 3],
        vec![6, 0, 5, 4, 2],
        vec![5, 2, 1, 0, 1],
        vec![3, 4, 0, 6, 8],
    ];
    let product = matrix_multiply_stub(&client, &a, &b).expect("multiply");

    // 3*4 + 3*1 + 3*6 + 7*5 + 6*3 = 86
    assert_eq!(product[0][0], 86);
    for (i, row) in product.iter().enumerate() {
        for (j, cell) in row.iter().enumerate() {
            let expected: i32 = (0..5).map(|k| a[i][k] * b[k][j]).sum();
            assert_eq!(*cell, expected);
        }
    }

    // Request frame: 16-byte header plus two matrices, each an outer
    // count, five inner counts, and 25 values of 4 bytes.
    let sent = near.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], 16 + 2 * (4 + 5 * 4 + 25 * 4));
    server.stop();
    server_thread.join().expect("join").expect("server run");
}

// ---------------------------------------------------------------------------
// Oneway drop
// ---------------------------------------------------------------------------

#[test]
fn oneway_log_produces_exactly_one_frame_and_no_reply() {
    let (near, far) = PipeTransport::pair();
    let near = Arc::new(Sniffer::new(near));
    let client = ClientManager::new(near.clone(), factory());

    let mut ctx = client.create_request(5, 1, true).expect("create");
    ctx.codec().write_string("hi").expect("arg");
    client.perform_request(&mut ctx).expect("perform");
    client.release_request(ctx);

    // Exactly one frame crossed the wire, and nothing came back.
    assert_eq!(near.sent.lock().unwrap().as_slice(), &[16 + 4 + 2]);
    let mut buffer = MessageBuffer::dynamic(64);
    far.receive(&mut buffer, None).expect("server sees request");
    let info = MessageInfo::peek(buffer.as_slice()).expect("header");
    assert_eq!(info.message_type, MessageType::Oneway);
    assert!(!far.has_message());
    assert!(!near.has_message());
}

// ---------------------------------------------------------------------------
// Length-annotated binary: no redundant on-wire length prefix
// ---------------------------------------------------------------------------

const BLOB_SERVICE: u32 = 3;
const BLOB_SEND_ID: u32 = 1;

struct BlobEchoService;

impl Service for BlobEchoService {
    fn service_id(&self) -> u32 {
        BLOB_SERVICE
    }

    fn dispatch(
        &self,
        function_id: u32,
        request: &mut BasicCodec,
        reply: &mut BasicCodec,
    ) -> ErpcResult<()> {
        match function_id {
            BLOB_SEND_ID => {
                // The count travels as the n parameter, ahead of the bytes.
                let n = request.read_i32()?;
                let data = request.read_bytes(n as usize)?;
                reply.write_i32(n)?;
                reply.write_bytes(&data)?;
                Ok(())
            }
            _ => Err(ErpcStatus::UnknownFunction),
        }
    }
}

fn blob_send_stub(client: &ClientManager, data: &[u8], n: i32) -> ErpcResult<Vec<u8>> {
    let mut ctx = client.create_request(BLOB_SERVICE, BLOB_SEND_ID, false)?;
    ctx.codec().write_i32(n)?;
    ctx.codec().write_bytes(data)?;
    client.perform_request(&mut ctx)?;
    let result = (|codec: &mut BasicCodec| {
        let n = codec.read_i32()?;
        codec.read_bytes(n as usize)
    })(ctx.codec());
    client.release_request(ctx);
    result
}

#[test]
fn length_annotated_binary_echo_has_no_redundant_prefix() {
    let (near, far) = PipeTransport::pair();
    let near = Arc::new(Sniffer::new(near));
    let client = ClientManager::new(near.clone(), factory());
    let server = Arc::new(SimpleServer::new(Arc::new(far), factory()));
    server.add_service(Arc::new(BlobEchoService));

    let server_thread = {
        let server = server.clone();
        std::thread::spawn(move || server.run())
    };

    let echoed = blob_send_stub(&client, &[0xAA, 0xBB, 0xCC], 3).expect("echo");
    assert_eq!(echoed, vec![0xAA, 0xBB, 0xCC]);

    // Header + i32 n + 3 raw bytes; no 4-byte length prefix for the blob.
    assert_eq!(near.sent.lock().unwrap().as_slice(), &[16 + 4 + 3]);
    server.stop();
    server_thread.join().expect("join").expect("server run");
}

// ---------------------------------------------------------------------------
// Discriminated union
// ---------------------------------------------------------------------------

const FRUIT_SERVICE: u32 = 4;
const FRUIT_SWAP_ID: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
enum FruitValue {
    Apple(Vec<u8>),
    Banana { x: i32, y: f32 },
    Orange(Vec<i32>),
    Papaya { x: i32, y: f32 },
}

fn write_fruit(codec: &mut BasicCodec, value: &FruitValue) -> ErpcResult<()> {
    match value {
        FruitValue::Apple(data) => {
            codec.start_write_union(0)?;
            codec.write_binary(data)
        }
        FruitValue::Banana { x, y } => {
            codec.start_write_union(1)?;
            codec.write_i32(*x)?;
            codec.write_f32(*y)
        }
        FruitValue::Orange(items) => {
            codec.start_write_union(2)?;
            codec.start_write_list(items.len() as u32)?;
            for item in items {
                codec.write_i32(*item)?;
            }
            Ok(())
        }
        FruitValue::Papaya { x, y } => {
            codec.start_write_union(3)?;
            codec.write_i32(*x)?;
            codec.write_f32(*y)
        }
    }
}

fn read_fruit(codec: &mut BasicCodec) -> ErpcResult<FruitValue> {
    match codec.start_read_union()? {
        0 => Ok(FruitValue::Apple(codec.read_binary()?)),
        1 => Ok(FruitValue::Banana {
            x: codec.read_i32()?,
            y: codec.read_f32()?,
        }),
        2 => {
            let count = codec.start_read_list()? as usize;
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(codec.read_i32()?);
            }
            Ok(FruitValue::Orange(items))
        }
        3 => Ok(FruitValue::Papaya {
            x: codec.read_i32()?,
            y: codec.read_f32()?,
        }),
        _ => Err(ErpcStatus::ProtocolError),
    }
}

struct FruitSwapService;

impl Service for FruitSwapService {
    fn service_id(&self) -> u32 {
        FRUIT_SERVICE
    }

    fn dispatch(
        &self,
        function_id: u32,
        request: &mut BasicCodec,
        reply: &mut BasicCodec,
    ) -> ErpcResult<()> {
        match function_id {
            FRUIT_SWAP_ID => {
                let value = read_fruit(request)?;
                let swapped = match value {
                    FruitValue::Banana { x, y } => FruitValue::Papaya {
                        x: x + 1,
                        y: y - 1.0,
                    },
                    other => other,
                };
                write_fruit(reply, &swapped)
            }
            _ => Err(ErpcStatus::UnknownFunction),
        }
    }
}

#[test]
fn union_banana_returns_papaya() {
    let (near, far) = PipeTransport::pair();
    let near = Arc::new(Sniffer::new(near));
    let client = ClientManager::new(near.clone(), factory());
    let server = Arc::new(SimpleServer::new(Arc::new(far), factory()));
    server.add_service(Arc::new(FruitSwapService));

    let server_thread = {
        let server = server.clone();
        std::thread::spawn(move || server.run())
    };

    let mut ctx = client.create_request(FRUIT_SERVICE, FRUIT_SWAP_ID, false).expect("create");
    write_fruit(ctx.codec(), &FruitValue::Banana { x: 3, y: 4.0 }).expect("encode");
    client.perform_request(&mut ctx).expect("perform");
    let result = read_fruit(ctx.codec()).expect("decode");
    client.release_request(ctx);

    assert_eq!(result, FruitValue::Papaya { x: 4, y: 3.0 });
    // One-byte discriminator + i32 + f32 behind the header.
    assert_eq!(near.sent.lock().unwrap().as_slice(), &[16 + 1 + 4 + 4]);
    server.stop();
    server_thread.join().expect("join").expect("server run");
}

// ---------------------------------------------------------------------------
// Nested callback over one arbitrated transport per side
// ---------------------------------------------------------------------------

const A_SERVICE: u32 = 7;
const A_NESTED_ID: u32 = 1;
const B_SERVICE: u32 = 8;
const B_LEAF_ID: u32 = 1;

struct LeafService;

impl Service for LeafService {
    fn service_id(&self) -> u32 {
        B_SERVICE
    }

    fn dispatch(
        &self,
        function_id: u32,
        _request: &mut BasicCodec,
        reply: &mut BasicCodec,
    ) -> ErpcResult<()> {
        match function_id {
            B_LEAF_ID => reply.write_i32(7),
            _ => Err(ErpcStatus::UnknownFunction),
        }
    }
}

/// Service whose handler calls back into the peer's leaf service during
/// its own dispatch.
struct NestedService {
    peer: Arc<ClientManager>,
}

impl Service for NestedService {
    fn service_id(&self) -> u32 {
        A_SERVICE
    }

    fn dispatch(
        &self,
        function_id: u32,
        _request: &mut BasicCodec,
        reply: &mut BasicCodec,
    ) -> ErpcResult<()> {
        match function_id {
            A_NESTED_ID => {
                let mut ctx = self.peer.create_request(B_SERVICE, B_LEAF_ID, false)?;
                self.peer.perform_request(&mut ctx)?;
                let leaf = ctx.codec().read_i32()?;
                self.peer.release_request(ctx);
                reply.write_i32(leaf + 1)
            }
            _ => Err(ErpcStatus::UnknownFunction),
        }
    }
}

#[test]
fn nested_callback_through_arbitrated_link() {
    let (end1, end2) = PipeTransport::pair();

    // Side 1: the outer client plus the leaf server.
    let arb1 = Arc::new(TransportArbitrator::new(Arc::new(end1), factory()));
    arb1.start().expect("start arbitrator 1");
    let client1 = ClientManager::arbitrated(arb1.clone(), factory());
    let server1 = Arc::new(SimpleServer::new(Arc::new(arb1.server_port()), factory()));
    server1.add_service(Arc::new(LeafService));

    // Side 2: the nested server whose handler acts as a client.
    let arb2 = Arc::new(TransportArbitrator::new(Arc::new(end2), factory()));
    arb2.start().expect("start arbitrator 2");
    let client2 = Arc::new(ClientManager::arbitrated(arb2.clone(), factory()));
    let server2 = Arc::new(SimpleServer::new(Arc::new(arb2.server_port()), factory()));
    server2.add_service(Arc::new(NestedService {
        peer: client2.clone(),
    }));
    client2.bind_server(server2.context());

    let t1 = {
        let server1 = server1.clone();
        std::thread::spawn(move || server1.run())
    };
    let t2 = {
        let server2 = server2.clone();
        std::thread::spawn(move || server2.run())
    };

    let mut ctx = client1.create_request(A_SERVICE, A_NESTED_ID, false).expect("create");
    client1.perform_request(&mut ctx).expect("nested call");
    let value = ctx.codec().read_i32().expect("result");
    client1.release_request(ctx);
    assert_eq!(value, 8);

    server1.stop();
    server2.stop();
    t1.join().expect("join 1").expect("server 1");
    t2.join().expect("join 2").expect("server 2");
    arb1.stop();
    arb2.stop();
}

// ---------------------------------------------------------------------------
// Arbitrator demultiplexing under out-of-order replies
// ---------------------------------------------------------------------------

#[test]
fn concurrent_calls_each_get_their_own_reply() {
    let (near, far) = PipeTransport::pair();
    let arb = Arc::new(TransportArbitrator::new(Arc::new(near), factory()));
    arb.start().expect("start arbitrator");
    let client = Arc::new(ClientManager::arbitrated(arb.clone(), factory()));

    // Manual peer: collect both requests, reply in reverse order, echoing
    // each request's payload.
    let peer = std::thread::spawn(move || {
        let mut requests = Vec::new();
        for _ in 0..2 {
            let mut buffer = MessageBuffer::dynamic(64);
            far.receive(&mut buffer, None).expect("request");
            let mut codec = BasicCodec::new(buffer);
            let info = codec.start_read_message().expect("header");
            let payload = codec.read_i32().expect("payload");
            requests.push((info, payload));
        }
        for (info, payload) in requests.into_iter().rev() {
            let mut codec = BasicCodec::new(MessageBuffer::dynamic(64));
            codec
                .start_write_message(&MessageInfo::new(
                    MessageType::Reply,
                    info.service_id,
                    info.function_id,
                    info.sequence,
                ))
                .expect("header");
            codec.write_i32(payload * 10).expect("payload");
            far.send(codec.buffer().as_slice()).expect("reply");
        }
    });

    let call = |client: Arc<ClientManager>, value: i32| {
        std::thread::spawn(move || -> ErpcResult<i32> {
            let mut ctx = client.create_request(9, 1, false)?;
            ctx.codec().write_i32(value)?;
            client.perform_request(&mut ctx)?;
            let result = ctx.codec().read_i32()?;
            client.release_request(ctx);
            Ok(result)
        })
    };

    let first = call(client.clone(), 1);
    let second = call(client.clone(), 2);
    let first = first.join().expect("join 1").expect("call 1");
    let second = second.join().expect("join 2").expect("call 2");

    assert_eq!(first, 10);
    assert_eq!(second, 20);
    peer.join().expect("peer");
    arb.stop();
}

// ---------------------------------------------------------------------------
// CRC rejection and recovery on a framed link
// ---------------------------------------------------------------------------

/// Byte stream that flips one bit at a fixed absolute read offset.
struct FlipOnce {
    inner: PipeStream,
    flip_at: usize,
    seen: AtomicUsize,
    done: AtomicBool,
}

impl FlipOnce {
    fn new(inner: PipeStream, flip_at: usize) -> Self {
        FlipOnce {
            inner,
            flip_at,
            seen: AtomicUsize::new(0),
            done: AtomicBool::new(false),
        }
    }
}

impl StreamIo for FlipOnce {
    fn read_exact(&self, buf: &mut [u8], deadline: Option<Instant>) -> ErpcResult<()> {
        self.inner.read_exact(buf, deadline)?;
        let start = self.seen.fetch_add(buf.len(), Ordering::Relaxed);
        if !self.done.load(Ordering::Relaxed) {
            let end = start + buf.len();
            if self.flip_at >= start && self.flip_at < end {
                buf[self.flip_at - start] ^= 0x01;
                self.done.store(true, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn write_all(&self, data: &[u8]) -> ErpcResult<()> {
        self.inner.write_all(data)
    }

    fn poll_readable(&self) -> bool {
        self.inner.poll_readable()
    }
}

struct PingService;

impl Service for PingService {
    fn service_id(&self) -> u32 {
        11
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
                reply.write_i32(value + 1)
            }
            _ => Err(ErpcStatus::UnknownFunction),
        }
    }
}

#[test]
fn crc_failure_is_reported_and_next_call_succeeds() {
    let (client_stream, server_stream) = PipeStream::pair();
    // The first reply frame is 4 bytes of framing plus a 20-byte message;
    // flip a payload bit inside it.
    let client_transport = Arc::new(FramedTransport::new(FlipOnce::new(client_stream, 10)));
    let server_transport = Arc::new(FramedTransport::new(server_stream));

    let client = ClientManager::new(client_transport, factory());
    client.set_timeout(Some(Duration::from_secs(5)));
    let server = Arc::new(SimpleServer::new(server_transport, factory()));
    server.add_service(Arc::new(PingService));
    let server_thread = {
        let server = server.clone();
        std::thread::spawn(move || server.run())
    };

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        client.set_error_handler(move |status| seen.lock().unwrap().push(status));
    }

    let ping = |value: i32| -> ErpcResult<i32> {
        let mut ctx = client.create_request(11, 1, false)?;
        ctx.codec().write_i32(value)?;
        client.perform_request(&mut ctx)?;
        let result = ctx.codec().read_i32()?;
        client.release_request(ctx);
        Ok(result)
    };

    assert_eq!(ping(1).unwrap_err(), ErpcStatus::CrcCheckFailed);
    assert_eq!(seen.lock().unwrap().as_slice(), &[ErpcStatus::CrcCheckFailed]);

    // The link recovers: the next exchange is clean.
    assert_eq!(ping(41).expect("second call"), 42);

    server.stop();
    server_thread.join().expect("join").expect("server run");
}
