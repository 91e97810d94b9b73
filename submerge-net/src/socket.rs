use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use submerge_base::{Destination, ProtocolCode};

use crate::error::NetError;
use crate::handshake;

/// One connected transport and its negotiated protocol. Lifetime runs
/// from a successful handshake until `SocketResourceFactory::destroy`.
pub struct SocketAndStreams {
    id: u64,
    stream: TcpStream,
    protocol: ProtocolCode,
}

impl SocketAndStreams {
    pub fn protocol(&self) -> &ProtocolCode {
        &self.protocol
    }

    pub fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(buf)
    }

    /// Best-effort liveness probe; std sockets expose no
    /// isBound/isConnected/isClosed, so a peer-address query stands in.
    fn is_live(&self) -> bool {
        self.stream.peer_addr().is_ok()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SocketFactoryConfig {
    pub so_timeout: Duration,
    pub buffer_size: usize,
}

impl Default for SocketFactoryConfig {
    fn default() -> Self {
        SocketFactoryConfig {
            so_timeout: Duration::from_millis(5_000),
            buffer_size: 64 * 1024,
        }
    }
}

/// Creates, validates, and destroys pooled transports for a Destination,
/// with generational invalidation: a transport is usable against a
/// Destination only if it was created after that Destination's last
/// `mark_destination_closed`.
pub struct SocketResourceFactory {
    config: SocketFactoryConfig,
    created: AtomicU64,
    destroyed: AtomicU64,
    next_id: AtomicU64,
    destination_closed_at: Mutex<HashMap<Destination, Instant>>,
    socket_created_at: Mutex<HashMap<u64, Instant>>,
}

impl SocketResourceFactory {
    pub fn new(config: SocketFactoryConfig) -> Self {
        SocketResourceFactory {
            config,
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            destination_closed_at: Mutex::new(HashMap::new()),
            socket_created_at: Mutex::new(HashMap::new()),
        }
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    pub fn create(&self, dest: &Destination) -> Result<SocketAndStreams, NetError> {
        let addr = (dest.host.as_str(), dest.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                NetError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address resolved for {dest}"),
                ))
            })?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        socket.set_read_timeout(Some(self.config.so_timeout))?;
        socket.set_write_timeout(Some(self.config.so_timeout))?;
        socket.set_send_buffer_size(self.config.buffer_size)?;
        socket.set_recv_buffer_size(self.config.buffer_size)?;
        socket.connect_timeout(&addr.into(), self.config.so_timeout)?;

        let got_send = socket.send_buffer_size().unwrap_or(self.config.buffer_size);
        let got_recv = socket.recv_buffer_size().unwrap_or(self.config.buffer_size);
        if got_send != self.config.buffer_size || got_recv != self.config.buffer_size {
            tracing::debug!(
                destination = %dest,
                requested = self.config.buffer_size,
                got_send,
                got_recv,
                "socket buffer size was clamped by the OS"
            );
        }

        // The transport counts as "created" from here on, whether or not
        // the handshake that follows is accepted: a TCP connection was
        // actually opened and must be tracked in created/destroyed
        // accounting, even though a rejected handshake never earns a
        // creation timestamp and is never handed back to the caller.
        self.created.fetch_add(1, Ordering::Relaxed);

        let mut stream: TcpStream = socket.into();
        if let Err(err) = handshake::perform(&mut stream, &dest.protocol) {
            tracing::warn!(destination = %dest, protocol = %dest.protocol, %err, "handshake failed");
            return Err(err);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_created().insert(id, Instant::now());

        Ok(SocketAndStreams {
            id,
            stream,
            protocol: dest.protocol.clone(),
        })
    }

    /// Closes the transport unconditionally. Double-destroy on the same
    /// SocketAndStreams is a caller bug, not a recoverable condition.
    pub fn destroy(&self, _dest: &Destination, s: SocketAndStreams) {
        let id = s.id;
        drop(s);
        self.lock_created().remove(&id);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn validate(&self, dest: &Destination, s: &SocketAndStreams) -> bool {
        let created_at = self.lock_created().get(&s.id).copied();
        if created_at.is_none() {
            tracing::warn!(socket_id = s.id, destination = %dest, "validating socket with no recorded creation timestamp");
        }
        if let Some(created_at) = created_at {
            if let Some(closed_at) = self.lock_closed().get(dest).copied() {
                if created_at <= closed_at {
                    return false;
                }
            }
        }
        s.is_live()
    }

    /// Records a generational barrier for `dest`. Any transport with a
    /// creation timestamp at or before this moment fails validation from
    /// now on; in-flight transports are caught when checked back in.
    pub fn mark_destination_closed(&self, dest: &Destination) {
        self.lock_closed().insert(dest.clone(), Instant::now());
    }

    pub fn close(&self) {
        self.lock_closed().clear();
        self.lock_created().clear();
    }

    fn lock_created(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Instant>> {
        self.socket_created_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_closed(&self) -> std::sync::MutexGuard<'_, HashMap<Destination, Instant>> {
        self.destination_closed_at.lock().unwrap_or_else(|e| e.into_inner())
    }
}
