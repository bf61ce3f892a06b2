//! One client connection and its lifecycle.
//!
//! A connection is split in two. The [`Session`] owns the read half and runs
//! the protocol loop on its own task. The [`SessionHandle`] owns the write
//! half plus the lifecycle flags and is shared, through an `Arc`, with the
//! [`Registry`](crate::registry::Registry) so that broadcasts and shutdown can
//! reach the connection without touching the reader.
//!
//! ```text
//! Connecting -> AwaitingName -> Active -> Closing -> Closed
//! ```

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf},
    select,
    sync::{Mutex as AsyncMutex, watch},
};
use tracing::{debug, info};

use crate::{
    broadcast::Broadcaster,
    error::SessionError,
    events::ServerEvent,
    message::{Message, QUIT_COMMAND, read_line, write_line},
};

pub type SessionId = u64;

pub const EMPTY_NAME_NOTICE: &str = "display name must not be empty";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingName,
    Active,
    Closing,
    Closed,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct SessionHandle {
    id: SessionId,
    name: OnceLock<String>,
    writer: AsyncMutex<Option<BoxedWriter>>,
    state: Mutex<SessionState>,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new<W>(id: SessionId, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (close_tx, _) = watch::channel(false);
        Self {
            id,
            name: OnceLock::new(),
            writer: AsyncMutex::new(Some(Box::new(writer))),
            state: Mutex::new(SessionState::Connecting),
            closed: AtomicBool::new(false),
            close_tx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Assigns the display name. Only the first call has an effect.
    pub fn set_name(&self, name: impl Into<String>) {
        let _ = self.name.set(name.into());
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes one line to this client. Fails with `NotConnected` once the
    /// writer has been shut down.
    pub async fn send_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => write_line(writer, line).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "session writer already closed",
            )),
        }
    }

    pub fn request_close(&self) {
        self.close_tx.send_replace(true);
    }

    pub async fn close_requested(&self) {
        let mut requested = self.close_tx.subscribe();
        // The sender lives in `self`, so this can only return once the flag is set.
        let _ = requested.wait_for(|requested| *requested).await;
    }

    fn begin_close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.set_state(SessionState::Closing);
        true
    }

    async fn shutdown_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(error) = writer.shutdown().await {
                debug!(session = self.id, %error, "failed to shut down session writer");
            }
        }
    }
}

/// Runs the `Closing -> Closed` transition: unregister, tell the remaining
/// sessions, release the socket. Only the first call does anything.
pub async fn close_session(handle: &SessionHandle, broadcaster: &Broadcaster) {
    if !handle.begin_close() {
        return;
    }
    handle.request_close();

    if broadcaster.registry().remove(handle.id()).await.is_some() {
        let name = handle.name().unwrap_or_default().to_string();
        info!(session = handle.id(), %name, "client left");
        broadcaster
            .broadcast(&Message::left(&name), Some(handle.id()))
            .await;
        broadcaster.publish(ServerEvent::Left {
            id: handle.id(),
            name,
        });
    }

    handle.shutdown_writer().await;
    handle.set_state(SessionState::Closed);
}

enum Input {
    Line(String),
    Eof,
    Interrupted,
}

pub struct Session<R> {
    handle: Arc<SessionHandle>,
    reader: R,
    broadcaster: Broadcaster,
    shutdown: watch::Receiver<bool>,
    peer: Option<SocketAddr>,
}

impl<S> Session<BufReader<ReadHalf<S>>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn accept(
        id: SessionId,
        stream: S,
        broadcaster: Broadcaster,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let handle = Arc::new(SessionHandle::new(id, writer));
        Session::new(handle, BufReader::new(reader), broadcaster, shutdown)
    }
}

impl<R> Session<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(
        handle: Arc<SessionHandle>,
        reader: R,
        broadcaster: Broadcaster,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handle,
            reader,
            broadcaster,
            shutdown,
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    pub async fn run(mut self) -> Result<(), SessionError> {
        let outcome = self.serve().await;
        close_session(&self.handle, &self.broadcaster).await;
        outcome
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        self.handle.set_state(SessionState::AwaitingName);

        let name = match self.next_input().await? {
            Input::Line(name) if name.is_empty() => {
                let notice = Message::notice(EMPTY_NAME_NOTICE).to_string();
                if let Err(error) = self.handle.send_line(&notice).await {
                    debug!(session = self.handle.id(), %error, "failed to send name rejection");
                }
                return Err(SessionError::EmptyName);
            }
            Input::Line(name) => name,
            Input::Eof => return Err(SessionError::ClosedBeforeName),
            Input::Interrupted => return Ok(()),
        };

        self.join(&name).await?;

        loop {
            match self.next_input().await? {
                Input::Line(line) if line == QUIT_COMMAND => {
                    debug!(session = self.handle.id(), "client sent quit");
                    break;
                }
                Input::Line(body) => self.relay(&name, body).await,
                Input::Eof => {
                    debug!(session = self.handle.id(), "client closed the connection");
                    break;
                }
                Input::Interrupted => break,
            }
        }

        Ok(())
    }

    async fn join(&mut self, name: &str) -> Result<(), SessionError> {
        let id = self.handle.id();
        self.handle.set_name(name);
        self.broadcaster
            .registry()
            .add(Arc::clone(&self.handle))
            .await?;
        self.handle.set_state(SessionState::Active);

        info!(peer = ?self.peer, session = id, %name, "client joined");

        self.broadcaster
            .broadcast(&Message::joined(name), Some(id))
            .await;
        let roster = self.broadcaster.registry().names().await;
        self.broadcaster
            .broadcast(&Message::Roster(roster), Some(id))
            .await;

        // Published last so observers know the notices have been written.
        self.broadcaster.publish(ServerEvent::Joined {
            id,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn relay(&self, name: &str, body: String) {
        let message = Message::chat(name, body);
        self.broadcaster
            .broadcast(&message, Some(self.handle.id()))
            .await;
        self.broadcaster
            .publish(ServerEvent::Relayed(message.to_string()));
    }

    async fn next_input(&mut self) -> io::Result<Input> {
        let Session {
            handle,
            reader,
            shutdown,
            ..
        } = self;

        select! {
            biased;
            _ = handle.close_requested() => Ok(Input::Interrupted),
            _ = shutdown.wait_for(|stopping| *stopping) => Ok(Input::Interrupted),
            line = read_line(reader) => Ok(match line? {
                Some(line) => Input::Line(line),
                None => Input::Eof,
            }),
        }
    }
}
