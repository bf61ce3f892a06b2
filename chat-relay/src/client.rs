//! Client side of the line protocol.
//!
//! [`ChatClient`] owns the connection and reports everything a front end
//! needs to render through a channel of [`ClientEvent`]s, so a terminal or
//! GUI never has to speak the protocol itself.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    error::ClientError,
    message::{QUIT_COMMAND, read_line, write_line},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A line received from the server.
    Message(String),
    /// Something went wrong; the text is meant for a human.
    Error(String),
    /// `true` once connected, `false` once the connection is gone.
    Connection(bool),
}

pub struct ChatClient {
    name: String,
    writer: Option<OwnedWriteHalf>,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ClientEvent>,
    listener: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Connects, announces `name`, and starts listening for server lines.
    pub async fn connect(
        addr: SocketAddr,
        name: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        info!("connected to {}", addr);

        let (reader, mut writer) = stream.into_split();
        write_line(&mut writer, name).await?;

        let (events, receiver) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let _ = events.send(ClientEvent::Connection(true));

        let listener = tokio::spawn(listen(
            BufReader::new(reader),
            Arc::clone(&connected),
            events.clone(),
        ));

        let client = Self {
            name: name.to_string(),
            writer: Some(writer),
            connected,
            events,
            listener: Some(listener),
        };
        Ok((client, receiver))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Sends one chat line. Blank text is not sent and yields `Ok(false)`.
    pub async fn send_message(&mut self, text: &str) -> Result<bool, ClientError> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        if text.contains(['\n', '\r']) {
            return Err(ClientError::MultiLine);
        }
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        write_line(writer, text).await?;
        Ok(true)
    }

    /// Says goodbye and closes the connection. Does nothing if already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        let writer = self.writer.take();
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(mut writer) = writer {
            if let Err(err) = write_line(&mut writer, QUIT_COMMAND).await {
                let _ = self
                    .events
                    .send(ClientEvent::Error(format!("Error during disconnect: {err}")));
            }
            if let Err(err) = writer.shutdown().await {
                debug!(error = %err, "failed to shut down client writer");
            }
        }
        let _ = self.events.send(ClientEvent::Connection(false));
    }
}

async fn listen(
    mut reader: BufReader<OwnedReadHalf>,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    loop {
        match read_line(&mut reader).await {
            Ok(Some(line)) => {
                if events.send(ClientEvent::Message(line)).is_err() {
                    debug!("event receiver dropped; stopping listener");
                    return;
                }
            }
            Ok(None) => {
                if connected.swap(false, Ordering::AcqRel) {
                    debug!("server closed the connection");
                    let _ = events.send(ClientEvent::Connection(false));
                }
                return;
            }
            Err(err) => {
                if connected.swap(false, Ordering::AcqRel) {
                    let _ = events.send(ClientEvent::Error(format!(
                        "Lost connection to server: {err}"
                    )));
                    let _ = events.send(ClientEvent::Connection(false));
                }
                return;
            }
        }
    }
}
