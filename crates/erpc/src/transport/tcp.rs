// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP stream channel with framing and a cancellable acceptor.
//!
//! TCP is a byte stream, so every message travels behind the framing
//! prelude of [`FramedTransport`]. The acceptor keeps its listener
//! non-blocking and polls against a shutdown flag, so `shutdown()` always
//! unblocks a pending `accept()`.

use super::framed::{FramedTransport, StreamIo};
use crate::status::{ErpcResult, ErpcStatus};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Blocking TCP byte stream implementing [`StreamIo`].
#[derive(Debug)]
pub struct TcpStreamIo {
    stream: TcpStream,
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
}

impl TcpStreamIo {
    pub fn new(stream: TcpStream) -> ErpcResult<Self> {
        stream.set_nodelay(true).map_err(|_| ErpcStatus::InitFailed)?;
        Ok(TcpStreamIo {
            stream,
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn map_read_error(err: &std::io::Error) -> ErpcStatus {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => ErpcStatus::Closed,
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ErpcStatus::Timeout,
            _ => ErpcStatus::ReceiveFailed,
        }
    }
}

impl StreamIo for TcpStreamIo {
    fn read_exact(&self, buf: &mut [u8], deadline: Option<Instant>) -> ErpcResult<()> {
        let _guard = self.read_lock.lock();
        let timeout = match deadline {
            Some(when) => {
                let now = Instant::now();
                if when <= now {
                    return Err(ErpcStatus::Timeout);
                }
                Some(when - now)
            }
            None => None,
        };
        if self.stream.set_read_timeout(timeout).is_err() {
            return Err(ErpcStatus::ReceiveFailed);
        }
        (&self.stream).read_exact(buf).map_err(|e| {
            let status = Self::map_read_error(&e);
            if status == ErpcStatus::ReceiveFailed {
                log::warn!("tcp read failed: {}", e);
            }
            status
        })
    }

    fn write_all(&self, data: &[u8]) -> ErpcResult<()> {
        let _guard = self.write_lock.lock();
        (&self.stream).write_all(data).map_err(|e| {
            log::warn!("tcp write failed: {}", e);
            match e.kind() {
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe => ErpcStatus::Closed,
                _ => ErpcStatus::SendFailed,
            }
        })
    }
}

/// Framed transport over one TCP connection.
pub type TcpTransport = FramedTransport<TcpStreamIo>;

/// Connect to a listening peer.
pub fn connect<A: ToSocketAddrs>(addr: A) -> ErpcResult<TcpTransport> {
    let stream = TcpStream::connect(addr).map_err(|e| {
        log::warn!("tcp connect failed: {}", e);
        ErpcStatus::InitFailed
    })?;
    Ok(FramedTransport::new(TcpStreamIo::new(stream)?))
}

/// Listening side with a cancellable accept loop.
pub struct TcpAcceptor {
    listener: TcpListener,
    shutdown: AtomicBool,
}

impl TcpAcceptor {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> ErpcResult<Self> {
        let addr = addr
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or(ErpcStatus::InitFailed)?;
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|_| ErpcStatus::InitFailed)?;
        socket.set_reuse_address(true).map_err(|_| ErpcStatus::InitFailed)?;
        socket.bind(&addr.into()).map_err(|e| {
            log::warn!("tcp bind failed: {}", e);
            ErpcStatus::InitFailed
        })?;
        socket.listen(8).map_err(|_| ErpcStatus::InitFailed)?;
        let listener: TcpListener = socket.into();
        listener
            .set_nonblocking(true)
            .map_err(|_| ErpcStatus::InitFailed)?;
        Ok(TcpAcceptor {
            listener,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Wait for one inbound connection. Returns `Closed` once
    /// [`TcpAcceptor::shutdown`] has been called.
    pub fn accept(&self) -> ErpcResult<TcpTransport> {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(ErpcStatus::Closed);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("accepted connection from {}", peer);
                    stream
                        .set_nonblocking(false)
                        .map_err(|_| ErpcStatus::InitFailed)?;
                    return Ok(FramedTransport::new(TcpStreamIo::new(stream)?));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    log::warn!("tcp accept failed: {}", e);
                    return Err(ErpcStatus::InitFailed);
                }
            }
        }
    }

    /// Unblock any pending `accept()`.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuffer;
    use crate::transport::Transport;

    #[test]
    fn connect_send_receive_over_loopback() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").expect("bind");
        let addr = acceptor.local_addr().expect("addr");

        let server = std::thread::spawn(move || {
            let transport = acceptor.accept().expect("accept");
            let mut buf = MessageBuffer::dynamic(64);
            transport.receive(&mut buf, None).expect("receive");
            let echoed = buf.as_slice().to_vec();
            transport.send(&echoed).expect("send back");
        });

        let client = connect(addr).expect("connect");
        client.send(&[1, 2, 3]).expect("send");
        let mut buf = MessageBuffer::dynamic(64);
        client.receive(&mut buf, None).expect("receive");
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        server.join().expect("server thread");
    }

    #[test]
    fn shutdown_unblocks_accept() {
        let acceptor = std::sync::Arc::new(TcpAcceptor::bind("127.0.0.1:0").expect("bind"));
        let waiter = {
            let acceptor = acceptor.clone();
            std::thread::spawn(move || acceptor.accept())
        };
        std::thread::sleep(Duration::from_millis(30));
        acceptor.shutdown();
        assert_eq!(waiter.join().expect("join").unwrap_err(), ErpcStatus::Closed);
    }

    #[test]
    fn receive_deadline_expires() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").expect("bind");
        let addr = acceptor.local_addr().expect("addr");
        let server = std::thread::spawn(move || acceptor.accept());
        let client = connect(addr).expect("connect");
        let _peer = server.join().expect("join").expect("accept");

        let mut buf = MessageBuffer::dynamic(16);
        let deadline = Instant::now() + Duration::from_millis(30);
        assert_eq!(
            client.receive(&mut buf, Some(deadline)).unwrap_err(),
            ErpcStatus::Timeout
        );
    }
}
