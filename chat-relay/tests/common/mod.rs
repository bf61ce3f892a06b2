#![allow(dead_code)]

use std::{net::SocketAddr, path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use chat_relay::{
    config::ServerConfig,
    events::ServerEvent,
    message::{read_line, write_line},
    server::{ChatServer, ServerHandle},
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::broadcast::{self, error::RecvError},
    time::timeout,
};

pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TestServer {
    pub handle: ServerHandle,
    pub addr: SocketAddr,
    pub events: broadcast::Receiver<ServerEvent>,
}

impl TestServer {
    pub async fn start(grace_period: Duration) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let config = ServerConfig::default().with_grace_period(grace_period)?;
        let server = ChatServer::new(listener, config);
        let events = server.subscribe();
        let handle = server.start();
        let addr = handle
            .local_addr()
            .context("server should know its address")?;
        Ok(Self {
            handle,
            addr,
            events,
        })
    }

    /// Connects, sends `name`, and waits until the server reports the join.
    pub async fn join(&mut self, name: &str) -> Result<Peer> {
        let mut peer = Peer::connect(self.addr).await?;
        peer.send(name).await?;
        self.wait_for(|event| matches!(event, ServerEvent::Joined { name: joined, .. } if joined == name))
            .await
            .with_context(|| format!("waiting for {name} to join"))?;
        Ok(peer)
    }

    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Result<ServerEvent>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        let events = &mut self.events;
        timeout(READ_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Ok(event) if predicate(&event) => return Ok(event),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(anyhow!("event channel closed")),
                }
            }
        })
        .await
        .map_err(|_| anyhow!("timed out waiting for server event"))?
    }

    pub async fn wait_for_left(&mut self, name: &str) -> Result<ServerEvent> {
        self.wait_for(|event| matches!(event, ServerEvent::Left { name: left, .. } if left == name))
            .await
            .with_context(|| format!("waiting for {name} to leave"))
    }
}

pub struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local_addr: SocketAddr,
}

impl Peer {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let local_addr = stream.local_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            local_addr,
        })
    }

    /// The address the server sees as this peer.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn send(&mut self, line: &str) -> Result<()> {
        write_line(&mut self.writer, line).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Option<String>> {
        recv_line(&mut self.reader).await
    }

    pub async fn expect(&mut self, expected: &str) -> Result<()> {
        match self.recv().await? {
            Some(line) if line == expected => Ok(()),
            Some(line) => Err(anyhow!("expected '{expected}', got '{line}'")),
            None => Err(anyhow!("expected '{expected}', got end of stream")),
        }
    }

    /// Reads until the server closes the connection, returning what was skipped.
    pub async fn drain_until_closed(&mut self) -> Result<Vec<String>> {
        let mut skipped = Vec::new();
        while let Some(line) = self.recv().await? {
            skipped.push(line);
        }
        Ok(skipped)
    }

    /// Skips the join and roster notices for `names`, checking the join lines.
    pub async fn drain_joins(&mut self, names: &[&str]) -> Result<()> {
        for name in names {
            self.expect(&format!("SERVER: {name} has joined the chat"))
                .await?;
            match self.recv().await? {
                Some(line) if line.starts_with("Connected users: ") => {}
                other => return Err(anyhow!("expected a roster after {name} joined, got {other:?}")),
            }
        }
        Ok(())
    }

    pub async fn finish_writing(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

pub fn roster(names: &[&str]) -> String {
    let mut line = String::from("Connected users: ");
    for name in names {
        line.push_str(name);
        line.push_str(", ");
    }
    line
}

/// Reads one line with the line terminator stripped; `None` at end of stream.
pub async fn recv_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    timeout(READ_TIMEOUT, read_line(reader))
        .await
        .map_err(|_| anyhow!("timed out waiting for line"))?
        .map_err(Into::into)
}

pub async fn expect_some_line<R>(reader: &mut R, description: &str) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    match recv_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

/// The `chat_relay` binary running as a terminal client.
pub struct ClientProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    pub async fn spawn(binary: &Path, name: &str, addr: &str) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(["client", "--name", name, "--server", addr])
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn client {name}"))?;

        let stdin = child.stdin.take().context("client stdin missing after spawn")?;
        let stdout = child.stdout.take().context("client stdout missing after spawn")?;
        let mut process = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        let banner = process.expect_line("waiting for connect banner").await?;
        if banner != format!("*** connected as {name}") {
            return Err(anyhow!("expected connect banner for {name}, got '{banner}'"));
        }
        Ok(process)
    }

    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        write_line(&mut self.stdin, line)
            .await
            .with_context(|| format!("failed to send line '{line}'"))
    }

    pub async fn expect_line(&mut self, description: &str) -> Result<String> {
        expect_some_line(&mut self.stdout, description).await
    }

    pub async fn wait_success(&mut self, name: &str) -> Result<()> {
        let status = timeout(READ_TIMEOUT, self.child.wait())
            .await
            .map_err(|_| anyhow!("{name} did not exit"))?
            .with_context(|| format!("failed to await {name} process"))?;
        if !status.success() {
            return Err(anyhow!("{name} exited with status {status}"));
        }
        Ok(())
    }
}

/// Discards everything left on a child's stdout so the pipe never fills.
pub async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while let Ok(bytes) = reader.read_line(&mut buffer).await {
        if bytes == 0 {
            break;
        }
        buffer.clear();
    }
}
