//! Accept loop and shutdown coordination.
//!
//! [`ChatServer::start`] moves the listener onto its own task and returns a
//! [`ServerHandle`]. Every accepted connection becomes a [`Session`] running
//! on a task in a shared `JoinSet`. [`ServerHandle::stop`] is the only way
//! out: it stops the accept loop, closes every registered session and gives
//! the remaining tasks a grace period before aborting them.

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{broadcast, watch},
    task::{JoinHandle, JoinSet},
    time::{Instant, timeout_at},
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    config::ServerConfig,
    error::{ServerError, SessionError},
    events::{EVENT_CAPACITY, ServerEvent},
    registry::Registry,
    session::{Session, SessionId, close_session},
};

/// A bound, not yet running, chat server.
pub struct ChatServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl ChatServer {
    /// Binds the configured address. Failing to bind is the one fatal listener error.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self::new(listener, config))
    }

    /// Wraps an already bound listener. The configured address is ignored.
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            shared: Arc::new(Shared::new(&config)),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Subscribes to server events. Subscribe before `start` to see `Listening`.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.broadcaster.subscribe()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.shared.broadcaster.registry())
    }

    /// Spawns the accept loop.
    pub fn start(self) -> ServerHandle {
        let ChatServer { listener, shared } = self;
        let local_addr = listener.local_addr().ok();
        if let Some(addr) = local_addr {
            shared.broadcaster.publish(ServerEvent::Listening(addr));
        }

        let acceptor = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        *shared
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(acceptor);

        ServerHandle { shared, local_addr }
    }

    /// Runs until `shutdown` resolves, then stops.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let handle = self.start();
        shutdown.await;
        handle.stop().await;
    }

    pub async fn run_until_ctrl_c(self) {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Cloneable control surface of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.shared.broadcaster.registry())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.broadcaster.subscribe()
    }

    /// Stops the server. Only the first call does any work; later calls
    /// return immediately.
    ///
    /// The accept loop exits and drops the listener, every registered session
    /// is closed, and session tasks get the configured grace period to finish
    /// before they are aborted. Failures along the way are logged and do not
    /// cut the sequence short.
    pub async fn stop(&self) {
        let shared = &self.shared;
        if !shared.running.swap(false, Ordering::AcqRel) {
            debug!("stop requested on a server that is already stopping");
            return;
        }

        info!("chat server shutting down");
        let deadline = Instant::now() + shared.grace_period;
        shared.shutdown_tx.send_replace(true);

        stop_acceptor(shared).await;
        close_registered_sessions(shared, deadline).await;
        retire_session_tasks(shared, deadline).await;

        shared.broadcaster.publish(ServerEvent::Stopped);
        info!("chat server stopped");
    }
}

struct Shared {
    broadcaster: Broadcaster,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<JoinSet<()>>,
    next_id: AtomicU64,
    grace_period: Duration,
}

impl Shared {
    fn new(config: &ServerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            broadcaster: Broadcaster::new(Arc::new(Registry::new()), events, config.send_timeout),
            running: AtomicBool::new(true),
            shutdown_tx,
            acceptor: Mutex::new(None),
            tasks: Mutex::new(JoinSet::new()),
            next_id: AtomicU64::new(1),
            grace_period: config.grace_period,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown_tx.subscribe();

    loop {
        select! {
            _ = shutdown.wait_for(|stopping| *stopping) => break,
            accept_result = listener.accept() => {
                handle_accept_result(accept_result, &shared);
            }
        }
    }

    drop(listener);
    debug!("listener closed");
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, shared: &Arc<Shared>) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, shared),
        Err(err) if shared.is_running() => {
            warn!(error = %err, "failed to accept connection");
            shared
                .broadcaster
                .publish(ServerEvent::Error(format!("failed to accept connection: {err}")));
        }
        Err(err) => debug!(error = %err, "accept failed while stopping"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, shared: &Arc<Shared>) {
    let id = shared.next_id();
    info!(%peer, session = id, "client connected");

    let session = Session::accept(
        id,
        stream,
        shared.broadcaster.clone(),
        shared.shutdown_tx.subscribe(),
    )
    .with_peer(peer);

    let mut tasks = shared.tasks();
    shared
        .broadcaster
        .publish(ServerEvent::Connected { id, peer });
    tasks.spawn(async move {
        if let Err(err) = session.run().await {
            log_session_error(id, peer, &err);
        }
    });

    // Reap finished sessions so the set only holds live connections.
    while let Some(finished) = tasks.try_join_next() {
        if let Err(err) = finished {
            warn!(error = %err, "session task failed");
        }
    }
}

fn log_session_error(id: SessionId, peer: SocketAddr, err: &SessionError) {
    match err {
        SessionError::ClosedBeforeName | SessionError::EmptyName => {
            info!(%peer, session = id, reason = %err, "client rejected")
        }
        _ => warn!(%peer, session = id, error = ?err, "client connection closed with error"),
    }
}

async fn stop_acceptor(shared: &Shared) {
    let acceptor = shared
        .acceptor
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(acceptor) = acceptor {
        if let Err(err) = acceptor.await {
            warn!(error = %err, "accept loop ended abnormally");
        }
    }
}

async fn close_registered_sessions(shared: &Shared, deadline: Instant) {
    let registry = shared.broadcaster.registry();
    let sessions = registry.snapshot().await;
    debug!(count = sessions.len(), "closing registered sessions");

    let closing = join_all(
        sessions
            .iter()
            .map(|session| close_session(session, &shared.broadcaster)),
    );
    if timeout_at(deadline, closing).await.is_err() {
        warn!("grace period elapsed while closing sessions");
    }

    let leftover = registry.clear().await;
    if leftover > 0 {
        debug!(leftover, "cleared sessions that did not finish closing");
    }
}

async fn retire_session_tasks(shared: &Shared, deadline: Instant) {
    let mut tasks = std::mem::take(&mut *shared.tasks());

    if timeout_at(deadline, drain_tasks(&mut tasks)).await.is_err() {
        warn!(
            remaining = tasks.len(),
            "grace period elapsed; aborting session tasks"
        );
        tasks.shutdown().await;
    }
}

async fn drain_tasks(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            if err.is_panic() {
                warn!(error = %err, "session task panicked");
            }
        }
    }
}
