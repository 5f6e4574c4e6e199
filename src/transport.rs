//! Reconnecting TCP transport shared by the dashboard, motion and realtime channels
//!
//! A transport knows nothing about the protocol spoken over it. It owns at most one
//! live socket, every blocking call takes an explicit timeout, and the connected flag
//! is a plain atomic so health checks never contend with I/O.

use crate::{Mg400Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Smallest timeout handed to the OS; a zero duration is rejected by `std::net`.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Outcome of a receive that did not fail at the socket level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// This many bytes were written to the front of the buffer.
    Data(usize),
    /// The timeout elapsed before any byte arrived.
    Timeout,
}

/// Byte-level link to one controller port.
///
/// Implementations must be usable from several threads at once; callers are
/// responsible for not interleaving their own request/response exchanges.
pub trait Transport: Send + Sync {
    /// Open the connection, replacing any previous socket.
    fn connect(&self, timeout: Duration) -> Result<()>;

    /// Close the socket if open. Idempotent.
    fn disconnect(&self);

    /// Write all of `bytes` or fail with `Mg400Error::Connection`.
    fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for readable data and read what is available, up to `buf.len()`.
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Received>;

    fn is_connected(&self) -> bool;

    /// Human readable peer address for logs.
    fn peer(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn connect(&self, timeout: Duration) -> Result<()> {
        (**self).connect(timeout)
    }

    fn disconnect(&self) {
        (**self).disconnect()
    }

    fn send(&self, bytes: &[u8]) -> Result<()> {
        (**self).send(bytes)
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Received> {
        (**self).receive(buf, timeout)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn peer(&self) -> String {
        (**self).peer()
    }
}

/// Keep calling `receive` until `buf` is full, the deadline passes, or the link fails.
///
/// Returns `Received::Timeout` only if nothing at all arrived; a partially filled buffer
/// comes back as `Received::Data(n)` with `n < buf.len()`.
pub fn receive_full(transport: &dyn Transport, buf: &mut [u8], timeout: Duration) -> Result<Received> {
    let deadline = Instant::now() + timeout;
    let mut filled = 0;

    while filled < buf.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match transport.receive(&mut buf[filled..], remaining)? {
            Received::Data(n) => filled += n,
            Received::Timeout => break,
        }
    }

    if filled == 0 {
        Ok(Received::Timeout)
    } else {
        Ok(Received::Data(filled))
    }
}

/// Blocking `std::net` implementation of [`Transport`].
pub struct TcpTransport {
    ip: String,
    port: u16,
    stream: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
}

impl TcpTransport {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.ip.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Mg400Error::Connection(format!("Cannot resolve {}: {}", self.peer(), e)))?
            .collect();

        if addrs.is_empty() {
            return Err(Mg400Error::Connection(format!("No address for {}", self.peer())));
        }
        Ok(addrs)
    }

    /// Clone of the live socket so I/O never runs while the slot lock is held.
    fn handle(&self) -> Result<TcpStream> {
        let guard = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        let stream = guard
            .as_ref()
            .ok_or_else(|| Mg400Error::Connection(format!("Not connected to {}", self.peer())))?;

        stream
            .try_clone()
            .map_err(|e| Mg400Error::Connection(format!("Failed to clone socket for {}: {}", self.peer(), e)))
    }

    /// Drop the socket after an I/O failure and build the error for the caller.
    fn fail(&self, action: &str, err: std::io::Error) -> Mg400Error {
        self.disconnect();
        Mg400Error::Connection(format!("{} {} failed: {}", action, self.peer(), err))
    }
}

impl Transport for TcpTransport {
    fn connect(&self, timeout: Duration) -> Result<()> {
        let timeout = timeout.max(MIN_TIMEOUT);
        let mut last_error = None;

        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        return Err(self.fail("Configure socket to", e));
                    }
                    let previous = {
                        let mut guard = self.stream.lock().unwrap_or_else(|e| e.into_inner());
                        guard.replace(stream)
                    };
                    if let Some(old) = previous {
                        let _ = old.shutdown(Shutdown::Both);
                    }
                    self.connected.store(true, Ordering::SeqCst);
                    info!("Connected to {}", self.peer());
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no address tried".to_string());
        Err(Mg400Error::Connection(format!("Failed to connect to {}: {}", self.peer(), reason)))
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let previous = {
            let mut guard = self.stream.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        // Shutting down also wakes any reader blocked on a cloned handle.
        if let Some(stream) = previous {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Closed connection to {}", self.peer());
        }
    }

    fn send(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Mg400Error::Connection(format!("Not connected to {}", self.peer())));
        }
        let mut stream = self.handle()?;

        stream
            .write_all(bytes)
            .and_then(|_| stream.flush())
            .map_err(|e| self.fail("Send to", e))
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Received> {
        if buf.is_empty() {
            return Ok(Received::Data(0));
        }
        let mut stream = self.handle()?;
        stream
            .set_read_timeout(Some(timeout.max(MIN_TIMEOUT)))
            .map_err(|e| self.fail("Set read timeout for", e))?;

        loop {
            match stream.read(buf) {
                Ok(0) => {
                    self.disconnect();
                    return Err(Mg400Error::Connection(format!("{} closed the connection", self.peer())));
                }
                Ok(n) => return Ok(Received::Data(n)),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(Received::Timeout);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.fail("Receive from", e)),
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_connect_send_receive() {
        let (listener, port) = listener();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(b"pong").unwrap();
            buf
        });

        let transport = TcpTransport::new("127.0.0.1", port);
        assert!(!transport.is_connected());
        transport.connect(Duration::from_secs(1)).unwrap();
        assert!(transport.is_connected());

        transport.send(b"ping!").unwrap();
        let mut buf = [0u8; 16];
        let received = receive_full(&transport, &mut buf[..4], Duration::from_secs(2)).unwrap();

        assert_eq!(received, Received::Data(4));
        assert_eq!(&buf[..4], b"pong");
        assert_eq!(&server.join().unwrap(), b"ping!");
    }

    #[test]
    fn test_socket_option_failure_drops_connection() {
        let (listener, port) = listener();
        let transport = TcpTransport::new("127.0.0.1", port);
        transport.connect(Duration::from_secs(1)).unwrap();
        let _accepted = listener.accept().unwrap();

        let err = transport.fail("Set read timeout for", std::io::Error::from(ErrorKind::InvalidInput));
        assert!(matches!(err, Mg400Error::Connection(_)));
        assert!(!transport.is_connected());
        assert!(matches!(transport.send(b"x"), Err(Mg400Error::Connection(_))));
    }

    #[test]
    fn test_receive_timeout_is_not_an_error() {
        let (listener, port) = listener();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
            drop(socket);
        });

        let transport = TcpTransport::new("127.0.0.1", port);
        transport.connect(Duration::from_secs(1)).unwrap();

        let mut buf = [0u8; 8];
        let received = transport.receive(&mut buf, Duration::from_millis(50)).unwrap();
        assert_eq!(received, Received::Timeout);
        assert!(transport.is_connected());

        server.join().unwrap();
    }

    #[test]
    fn test_peer_close_marks_disconnected() {
        let (listener, port) = listener();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            drop(socket);
        });

        let transport = TcpTransport::new("127.0.0.1", port);
        transport.connect(Duration::from_secs(1)).unwrap();
        server.join().unwrap();

        let mut buf = [0u8; 8];
        let err = transport.receive(&mut buf, Duration::from_secs(1)).unwrap_err();
        assert!(err.is_connection());
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_connect_refused() {
        let (listener, port) = listener();
        drop(listener);

        let transport = TcpTransport::new("127.0.0.1", port);
        let err = transport.connect(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, Mg400Error::Connection(_)));
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_send_without_connection_fails_fast() {
        let transport = TcpTransport::new("127.0.0.1", 1);
        let err = transport.send(b"MovJ()").unwrap_err();
        assert!(matches!(err, Mg400Error::Connection(_)));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (listener, port) = listener();
        let transport = TcpTransport::new("127.0.0.1", port);
        transport.connect(Duration::from_secs(1)).unwrap();
        let _accepted = listener.accept().unwrap();

        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_connected());
    }
}
