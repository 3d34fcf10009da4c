use super::connection::{reject_overloaded, serve_connection};
use crate::lifecycle::Engine;
use crate::runtime_config::ServerConfig;
use crate::worker_pool::{RejectReason, WorkerPool, WorkerPoolConfig, WorkerPoolMetrics};
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Stopped = 0,
    Starting = 1,
    Started = 2,
}

impl ServerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ServerState::Starting,
            2 => ServerState::Started,
            _ => ServerState::Stopped,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Started => "started",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server is already starting")]
    AlreadyStarting,
    #[error("server is already started")]
    AlreadyStarted,
    #[error("server is not started")]
    NotStarted,
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn server threads: {0}")]
    Spawn(#[source] io::Error),
    #[error("{0} server thread(s) panicked")]
    WorkerPanicked(usize),
}

/// Accept thread plus worker pool serving one [`Engine`].
pub struct Server {
    engine: Engine,
    config: ServerConfig,
    state: AtomicU8,
    interrupt: Arc<AtomicBool>,
    acceptor: Mutex<Option<JoinHandle<usize>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    metrics: Mutex<Option<Arc<WorkerPoolMetrics>>>,
}

impl Server {
    /// `config.protocol_version` replaces the engine's server protocol.
    #[must_use]
    pub fn new(engine: Engine, config: ServerConfig) -> Self {
        Self {
            engine: engine.with_server_protocol(config.protocol_version),
            config,
            state: AtomicU8::new(ServerState::Stopped as u8),
            interrupt: Arc::new(AtomicBool::new(false)),
            acceptor: Mutex::new(None),
            local_addr: Mutex::new(None),
            metrics: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Flag that stops the accept loop when set. Hand it to a signal handler.
    #[must_use]
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Bound address once started; reflects the real port when configured
    /// with port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pool counters of the current (or last) run.
    #[must_use]
    pub fn metrics(&self) -> Option<Arc<WorkerPoolMetrics>> {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
    }

    /// Bind the listener, start the workers and the accept thread.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyStarting`] / [`ServerError::AlreadyStarted`]
    /// when not stopped; [`ServerError::Bind`] or [`ServerError::Spawn`]
    /// when setup fails, in which case the server is stopped again.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        if let Err(current) = self.state.compare_exchange(
            ServerState::Stopped as u8,
            ServerState::Starting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(match ServerState::from_u8(current) {
                ServerState::Starting => ServerError::AlreadyStarting,
                _ => ServerError::AlreadyStarted,
            });
        }
        match self.launch() {
            Ok(addr) => {
                self.state
                    .store(ServerState::Started as u8, Ordering::Release);
                info!(
                    addr = %addr,
                    threads = self.config.thread_pool,
                    queue_bound = self.config.queue_bound,
                    "Server started"
                );
                Ok(addr)
            }
            Err(e) => {
                self.state
                    .store(ServerState::Stopped as u8, Ordering::Release);
                error!(error = %e, "Server failed to start");
                Err(e)
            }
        }
    }

    fn launch(&self) -> Result<SocketAddr, ServerError> {
        self.interrupt.store(false, Ordering::Release);
        let listener = bind_listener(&self.config)?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: self.config.bind_addr(),
            source,
        })?;

        let engine = self.engine.clone();
        let timeout = self.config.socket_timeout;
        let worker_interrupt = Arc::clone(&self.interrupt);
        let pool = WorkerPool::new(
            WorkerPoolConfig::new(
                self.config.thread_pool.max(1),
                self.config.queue_bound,
                self.config.backpressure,
            ),
            move |stream: TcpStream| {
                serve_connection(&engine, stream, timeout, &worker_interrupt);
            },
        )
        .map_err(ServerError::Spawn)?;
        *self.metrics.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(pool.metrics()));

        let interrupt = Arc::clone(&self.interrupt);
        let acceptor = thread::Builder::new()
            .name("arbor-acceptor".to_string())
            .spawn(move || accept_loop(&listener, pool, &interrupt))
            .map_err(ServerError::Spawn)?;

        *self.acceptor.lock().unwrap_or_else(PoisonError::into_inner) = Some(acceptor);
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
        Ok(addr)
    }

    /// Raise the interrupt flag and wait for the accept thread and every
    /// worker to finish.
    ///
    /// Requests in progress are completed. Idle keep-alive connections are
    /// closed within a short poll interval rather than after
    /// `socket_timeout`.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotStarted`] when already stopped, and
    /// [`ServerError::WorkerPanicked`] when threads died by panic (the server
    /// is stopped regardless).
    pub fn stop(&self) -> Result<(), ServerError> {
        while self.state() == ServerState::Starting {
            thread::sleep(Duration::from_millis(1));
        }
        let Some(acceptor) = self
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Err(ServerError::NotStarted);
        };

        info!("Stopping server");
        self.interrupt.store(true, Ordering::Release);
        let panicked = match acceptor.join() {
            Ok(workers) => workers,
            Err(_) => 1,
        };
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.interrupt.store(false, Ordering::Release);
        self.state
            .store(ServerState::Stopped as u8, Ordering::Release);
        info!(panicked, "Server stopped");
        if panicked > 0 {
            return Err(ServerError::WorkerPanicked(panicked));
        }
        Ok(())
    }

    /// Start if needed, block until the interrupt flag is raised, then stop.
    ///
    /// # Errors
    ///
    /// Whatever [`Server::start`] or [`Server::stop`] returns.
    pub fn serve_until_interrupted(&self) -> Result<(), ServerError> {
        if self.state() == ServerState::Stopped {
            self.start()?;
        }
        let poll = self.config.accept_poll.max(Duration::from_millis(10));
        while !self.interrupt.load(Ordering::Acquire) {
            thread::sleep(poll);
        }
        self.stop()
    }

    /// Poll the bound address until it accepts a TCP connection.
    ///
    /// # Errors
    ///
    /// `NotConnected` before `start`, `TimedOut` after ~250ms of failed
    /// attempts.
    pub fn wait_ready(&self) -> io::Result<()> {
        let addr = self
            .local_addr()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "server not started"))?;
        for _ in 0..50 {
            if TcpStream::connect(addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.state() != ServerState::Stopped {
            if let Err(e) = self.stop() {
                warn!(error = %e, "Server did not stop cleanly on drop");
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Listener with `SO_REUSEADDR`, the configured backlog, and a receive
/// timeout so `accept` wakes up every `accept_poll`.
fn bind_listener(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let bind_addr = config.bind_addr();
    let bind_err = |source: io::Error| ServerError::Bind {
        addr: bind_addr.clone(),
        source,
    };
    let addr = bind_addr
        .to_socket_addrs()
        .map_err(bind_err)?
        .next()
        .ok_or_else(|| bind_err(io::Error::new(io::ErrorKind::InvalidInput, "no address resolved")))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SockProtocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket
        .listen(config.socket_queue_size.max(1))
        .map_err(bind_err)?;
    socket
        .set_read_timeout(Some(config.accept_poll.max(Duration::from_millis(1))))
        .map_err(bind_err)?;
    debug!(addr = %addr, backlog = config.socket_queue_size, "Listener bound");
    Ok(socket.into())
}

/// Runs on the accept thread. Returns how many workers panicked.
fn accept_loop(
    listener: &TcpListener,
    mut pool: WorkerPool<TcpStream>,
    interrupt: &AtomicBool,
) -> usize {
    while !interrupt.load(Ordering::Acquire) {
        let stream = match listener.accept() {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "Accepted connection");
                stream
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                thread::sleep(Duration::from_millis(10));
                continue;
            }
        };
        if let Err(rejected) = pool.dispatch(stream) {
            match rejected.reason {
                RejectReason::Shed => reject_overloaded(rejected.item),
                RejectReason::Disconnected => {
                    error!("No workers left; stopping accept loop");
                    break;
                }
            }
        }
    }
    debug!("Accept loop finished; draining workers");
    pool.shutdown()
}
