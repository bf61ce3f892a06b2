use std::{io, sync::Arc, time::Duration};

use tokio::{sync::broadcast, time::timeout};
use tracing::debug;

use crate::{
    events::ServerEvent,
    message::Message,
    registry::Registry,
    session::{SessionHandle, SessionId},
};

/// Fans messages out to registered sessions, one recipient at a time.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    events: broadcast::Sender<ServerEvent>,
    send_timeout: Option<Duration>,
}

impl Broadcaster {
    pub fn new(
        registry: Arc<Registry>,
        events: broadcast::Sender<ServerEvent>,
        send_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            events,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, event: ServerEvent) {
        // Having no subscribers is the normal case for a headless server.
        let _ = self.events.send(event);
    }

    /// Returns how many recipients accepted the line.
    pub async fn broadcast(&self, message: &Message, excluding: Option<SessionId>) -> usize {
        let line = message.to_string();
        let recipients = self.registry.snapshot().await;

        let mut delivered = 0;
        for recipient in recipients {
            if Some(recipient.id()) == excluding {
                continue;
            }

            match self.deliver(&recipient, &line).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    debug!(session = recipient.id(), %error, "delivery failed; closing recipient");
                    recipient.request_close();
                }
            }
        }
        delivered
    }

    async fn deliver(&self, recipient: &SessionHandle, line: &str) -> io::Result<()> {
        match self.send_timeout {
            None => recipient.send_line(line).await,
            Some(limit) => match timeout(limit, recipient.send_line(line)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("write did not complete within {limit:?}"),
                )),
            },
        }
    }
}
