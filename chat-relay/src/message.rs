use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Chat body that asks the server to end the session.
pub const QUIT_COMMAND: &str = "/quit";

/// Sender shown on notices generated by the server itself.
pub const SERVER_SENDER: &str = "SERVER";

pub const ROSTER_PREFIX: &str = "Connected users: ";

/// One line the server sends to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `<name>: <body>`
    Chat { name: String, body: String },
    /// `SERVER: <text>`
    Notice(String),
    /// `Connected users: <name>, <name>, `
    Roster(Vec<String>),
}

impl Message {
    pub fn chat(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Chat {
            name: name.into(),
            body: body.into(),
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice(text.into())
    }

    pub fn joined(name: &str) -> Self {
        Self::notice(format!("{name} has joined the chat"))
    }

    pub fn left(name: &str) -> Self {
        Self::notice(format!("{name} has left the chat"))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Chat { name, body } => write!(f, "{name}: {body}"),
            Message::Notice(text) => write!(f, "{SERVER_SENDER}: {text}"),
            Message::Roster(names) => {
                // Every name carries a trailing separator, the last one included.
                f.write_str(ROSTER_PREFIX)?;
                for name in names {
                    write!(f, "{name}, ")?;
                }
                Ok(())
            }
        }
    }
}

/// Reads one line with its terminator stripped. `None` means the peer closed
/// the stream. Blank lines are returned as empty strings.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let content_len = line.trim_end_matches(LINE_ENDINGS).len();
    line.truncate(content_len);
    Ok(Some(line))
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    // One write per line keeps concurrent writers from interleaving partial lines.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
