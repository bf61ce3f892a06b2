use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::mpsc,
};
use tracing::warn;

use crate::{
    cli::ClientArgs,
    client::{ChatClient, ClientEvent},
    message::QUIT_COMMAND,
};

/// Interactive terminal chat: stdin lines go to the server, server lines go
/// to stdout.
pub async fn run(args: ClientArgs) -> Result<()> {
    let (client, events) = ChatClient::connect(args.server, &args.name)
        .await
        .with_context(|| format!("failed to join chat at {}", args.server))?;

    chat_loop(client, events, BufReader::new(tokio::io::stdin()), &args.name).await
}

async fn chat_loop<I>(
    mut client: ChatClient,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    mut input_lines: I,
    name: &str,
) -> Result<()>
where
    I: AsyncBufRead + Unpin,
{
    let mut input = String::new();

    loop {
        select! {
            event = events.recv() => {
                if !handle_event(event, name).await? {
                    break;
                }
            }
            bytes_read = input_lines.read_line(&mut input) => {
                let keep_going = handle_stdin_input(bytes_read, &input, &mut client).await?;
                // Only a completed read may clear; a cancelled one keeps its partial line.
                input.clear();
                if !keep_going {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn handle_event(event: Option<ClientEvent>, name: &str) -> Result<bool> {
    match event {
        Some(ClientEvent::Message(line)) => {
            write_stdout(&line).await?;
            Ok(true)
        }
        Some(ClientEvent::Error(message)) => {
            write_stderr(&format!("!!! {message}")).await?;
            Ok(true)
        }
        Some(ClientEvent::Connection(true)) => {
            write_stdout(&format!("*** connected as {name}")).await?;
            Ok(true)
        }
        Some(ClientEvent::Connection(false)) | None => {
            write_stdout("*** disconnected from server").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    client: &mut ChatClient,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text == QUIT_COMMAND {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    client.send_message(text).await?;
    Ok(true)
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{net::TcpListener, time::timeout};

    use super::*;
    use crate::message::{read_line, write_line};

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn partial_input_survives_a_server_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, events) = ChatClient::connect(addr, "alice").await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (server_reader, mut server_writer) = stream.into_split();
        let mut server_reader = BufReader::new(server_reader);
        assert_eq!(
            read_line(&mut server_reader).await.unwrap().as_deref(),
            Some("alice")
        );

        let (input_reader, mut input_writer) = tokio::io::duplex(64);
        let chat = tokio::spawn(async move {
            chat_loop(client, events, BufReader::new(input_reader), "alice").await
        });

        input_writer.write_all(b"hel").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        write_line(&mut server_writer, "SERVER: ping").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        input_writer.write_all(b"lo\n/quit\n").await.unwrap();

        let relayed = timeout(WAIT, read_line(&mut server_reader))
            .await
            .expect("timed out waiting for chat line")
            .unwrap();
        assert_eq!(relayed.as_deref(), Some("hello"));

        timeout(WAIT, chat)
            .await
            .expect("chat loop should end after /quit")
            .unwrap()
            .unwrap();
        let goodbye = timeout(WAIT, read_line(&mut server_reader)).await.unwrap().unwrap();
        assert_eq!(goodbye.as_deref(), Some(QUIT_COMMAND));
    }
}
