//! Reference lock server.
//!
//! An in-memory implementation of the server side of the protocol. It keeps
//! one holder per key and answers every request with a single
//! acknowledgment byte. Contended locks are simply refused; the client's
//! retry loop does the waiting.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::ProtocolVersion;
use crate::error::{MutexError, Result};
use crate::protocol::{Ack, Action, Request, WireCodec, codec_for};
use crate::thread_pool::{SharedQueueThreadPool, ThreadPool};

const ACCEPT_POLL: Duration = Duration::from_millis(10);
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Read timeout for the rest of a request once its first byte arrived.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Current holder of every locked key.
#[derive(Debug, Default)]
pub struct LockTable {
    holders: Mutex<HashMap<String, String>>,
}

impl LockTable {
    /// Perform `request` and return the acknowledgment to send back.
    pub fn apply(&self, request: &Request) -> Ack {
        let mut holders = self.holders.lock().unwrap_or_else(|p| p.into_inner());
        match request.action {
            Action::Lock => {
                if holders.contains_key(&request.key) {
                    return Ack::Failure;
                }
                holders.insert(request.key.clone(), request.source.clone());
            }
            Action::Unlock | Action::ResetByKey => {
                holders.remove(&request.key);
            }
            Action::ResetBySource => {
                holders.retain(|_, source| *source != request.source);
            }
        }
        Ack::Success
    }

    /// Source address holding `key`, if it is locked.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.holders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }
}

#[derive(Debug, Default)]
struct ServerState {
    table: LockTable,
    shutdown: AtomicBool,
    served: AtomicU64,
}

/// Lock server bound to a TCP address.
pub struct LockServer {
    listener: TcpListener,
    thread_pool: SharedQueueThreadPool,
    codec: &'static dyn WireCodec,
    state: Arc<ServerState>,
}

impl LockServer {
    /// Bind to `addr`, speaking `version`.
    pub fn bind(addr: impl ToSocketAddrs, version: ProtocolVersion) -> Result<Self> {
        let thread_pool = SharedQueueThreadPool::new(num_cpus::get() as u32)?;
        let listener = TcpListener::bind(addr)?;
        // Non-blocking so the accept loop can observe the shutdown flag.
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            thread_pool,
            codec: codec_for(version),
            state: Arc::new(ServerState::default()),
        })
    }

    /// A handle for inspecting and stopping the server from elsewhere.
    pub fn handle(&self) -> Result<ServerHandle> {
        Ok(ServerHandle {
            addr: self.listener.local_addr()?,
            state: self.state.clone(),
        })
    }

    /// Serve until [`ServerHandle::shutdown`] is called.
    pub fn run(self) -> Result<()> {
        log::info!(
            "lock server listening on {}, protocol {}",
            self.listener.local_addr()?,
            self.codec.version()
        );

        while !self.state.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    log::debug!("accepted connection from {peer}");
                    let state = self.state.clone();
                    let codec = self.codec;
                    self.thread_pool.spawn(move || {
                        if let Err(e) = handle_connection(stream, codec, &state) {
                            log::error!("error handling {peer}: {e}");
                        }
                    })?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    if self.state.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    return Err(e.into());
                }
            }
        }

        log::info!("lock server stopped accepting connections");
        // Dropping the pool waits for the open connections to finish.
        Ok(())
    }

    /// Run the server on a background thread.
    pub fn spawn(self) -> Result<RunningServer> {
        let handle = self.handle()?;
        let thread = thread::Builder::new()
            .name("lockcenter-server".to_string())
            .spawn(move || self.run())?;
        Ok(RunningServer {
            handle,
            thread: Some(thread),
        })
    }
}

/// Cheap, cloneable view of a running [`LockServer`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Address the server listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Requests answered so far, successful or not.
    pub fn requests_served(&self) -> u64 {
        self.state.served.load(Ordering::SeqCst)
    }

    /// Source address holding `key`, if it is locked.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.state.table.holder(key)
    }

    /// Ask the server to stop.
    pub fn shutdown(&self) {
        log::info!("shutting down lock server");
        self.state.shutdown.store(true, Ordering::Relaxed);
    }
}

/// A server running on its own thread; stopped and joined on drop.
pub struct RunningServer {
    handle: ServerHandle,
    thread: Option<JoinHandle<Result<()>>>,
}

impl RunningServer {
    /// Handle of the running server.
    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    /// `host:port` string clients can connect to.
    pub fn addr(&self) -> String {
        self.handle.local_addr().to_string()
    }

    /// Stop the server and wait for it to exit.
    pub fn stop(mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        self.handle.shutdown();
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                Err(MutexError::Io(io::Error::other("server thread panicked")))
            }),
            None => Ok(()),
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            log::error!("lock server exited with error: {e}");
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    codec: &dyn WireCodec,
    state: &ServerState,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(IDLE_POLL))?;
    let mut first = [0u8; 1];
    loop {
        // Wait for the next request without consuming it, so idle
        // connections still notice a shutdown.
        match stream.peek(&mut first) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                if state.shutdown.load(Ordering::Relaxed) {
                    return Ok(());
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        let decoded = codec.decode_request(&mut stream);
        stream.set_read_timeout(Some(IDLE_POLL))?;
        let (ack, keep_open) = match decoded {
            Ok(request) => {
                let ack = state.table.apply(&request);
                log::debug!("{request:?} -> {ack:?}");
                (ack, true)
            }
            // Framing is lost after a malformed request.
            Err(MutexError::InvalidRequest(msg)) => {
                log::warn!("malformed request: {msg}");
                (Ack::Failure, false)
            }
            Err(e) => return Err(e),
        };
        state.served.fetch_add(1, Ordering::SeqCst);
        stream.write_all(&[ack.to_byte()])?;
        stream.flush()?;
        if !keep_open {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_until_unlocked() {
        let table = LockTable::default();
        assert_eq!(table.apply(&Request::lock("k", Some("a"))), Ack::Success);
        assert_eq!(table.apply(&Request::lock("k", Some("b"))), Ack::Failure);
        assert_eq!(table.holder("k").as_deref(), Some("a"));
        assert_eq!(table.apply(&Request::unlock("k")), Ack::Success);
        assert_eq!(table.apply(&Request::lock("k", Some("b"))), Ack::Success);
        assert_eq!(table.holder("k").as_deref(), Some("b"));
    }

    #[test]
    fn clearing_a_free_key_succeeds() {
        let table = LockTable::default();
        assert_eq!(table.apply(&Request::unlock("nobody")), Ack::Success);
        assert_eq!(table.apply(&Request::reset_by_key("nobody")), Ack::Success);
    }

    #[test]
    fn reset_by_source_only_clears_that_source() {
        let table = LockTable::default();
        table.apply(&Request::lock("a", Some("10.0.0.5")));
        table.apply(&Request::lock("b", Some("10.0.0.5")));
        table.apply(&Request::lock("c", Some("10.0.0.6")));
        table.apply(&Request::lock("d", None));

        assert_eq!(table.apply(&Request::reset_by_source(Some("10.0.0.5"))), Ack::Success);
        assert_eq!(table.holder("a"), None);
        assert_eq!(table.holder("b"), None);
        assert_eq!(table.holder("c").as_deref(), Some("10.0.0.6"));

        // The empty tag is a literal selector, not a wildcard.
        assert_eq!(table.apply(&Request::reset_by_source(None)), Ack::Success);
        assert_eq!(table.holder("d"), None);
        assert_eq!(table.holder("c").as_deref(), Some("10.0.0.6"));
    }

    #[test]
    fn slow_request_bytes_are_still_decoded() {
        use std::io::Read;

        let server = LockServer::bind("127.0.0.1:0", ProtocolVersion::Current)
            .unwrap()
            .spawn()
            .unwrap();
        let mut stream = TcpStream::connect(server.addr()).unwrap();
        stream.write_all(&[2]).unwrap();
        // Longer than the idle poll between the action byte and the key.
        thread::sleep(IDLE_POLL + Duration::from_millis(100));
        stream.write_all(&[1, b'k']).unwrap();

        let mut ack = [0u8; 1];
        stream.read_exact(&mut ack).unwrap();
        assert_eq!(ack[0], Ack::Success.to_byte());
        server.stop().unwrap();
    }
}
