//! STOMP 1.1 frame encoding and decoding.
//!
//! A frame is a command line, header lines, a blank line and a body terminated
//! by a NUL octet:
//!
//! ```text
//! SEND
//! destination:/queue/test
//! content-length:5
//!
//! hello^@
//! ```

use crate::error::{PublisherError, Result};
use crate::headers::Headers;
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Largest frame body accepted from the broker.
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Disconnect,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Disconnect => "DISCONNECT",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    // CONNECT and CONNECTED predate header escaping and carry raw values.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = PublisherError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CONNECT" => Ok(Command::Connect),
            "CONNECTED" => Ok(Command::Connected),
            "SEND" => Ok(Command::Send),
            "DISCONNECT" => Ok(Command::Disconnect),
            "RECEIPT" => Ok(Command::Receipt),
            "ERROR" => Ok(Command::Error),
            other => Err(PublisherError::Session(format!(
                "unexpected frame command [{}]",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            command,
            headers,
            body,
        }
    }

    pub fn connect(headers: &Headers) -> Self {
        Self::new(Command::Connect, headers.clone(), Vec::new())
    }

    /// A SEND frame with a `content-length` header appended for the body.
    pub fn send(headers: &Headers, body: &str) -> Self {
        let mut headers = headers.clone();
        headers.set("content-length", body.len().to_string());
        Self::new(Command::Send, headers, body.as_bytes().to_vec())
    }

    pub fn disconnect(headers: &Headers) -> Self {
        Self::new(Command::Disconnect, headers.clone(), Vec::new())
    }

    /// Body decoded as UTF-8, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());

        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');
        for (key, value) in self.headers.iter() {
            if escape {
                out.extend_from_slice(escape_header(key).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(key.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

fn escape_header(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            ':' => escaped.push_str("\\c"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_header(raw: &str) -> Result<String> {
    let mut unescaped = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => unescaped.push('\\'),
            Some('n') => unescaped.push('\n'),
            Some('c') => unescaped.push(':'),
            other => {
                return Err(PublisherError::Session(format!(
                    "invalid header escape sequence [\\{}]",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(unescaped)
}

fn trim_eol(line: &str) -> &str {
    line.trim_end_matches('\n').trim_end_matches('\r')
}

/// Reads one frame, skipping any heart-beat EOLs in front of it.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let command = loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(PublisherError::Session(
                "connection closed by broker".to_string(),
            ));
        }
        let trimmed = trim_eol(&line);
        if !trimmed.is_empty() {
            break trimmed.parse::<Command>()?;
        }
    };

    let mut headers = Headers::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(PublisherError::Session(format!(
                "connection closed inside {} frame headers",
                command
            )));
        }
        let trimmed = trim_eol(&line);
        if trimmed.is_empty() {
            break;
        }
        let (key, value) = trimmed.split_once(':').ok_or_else(|| {
            PublisherError::Session(format!("malformed header line [{}]", trimmed))
        })?;
        let (key, value) = if command.escapes_headers() {
            (unescape_header(key)?, unescape_header(value)?)
        } else {
            (key.to_string(), value.to_string())
        };
        // repeated headers: the first occurrence wins
        if !headers.contains_key(&key) {
            headers.set(key, value);
        }
    }

    let body = match headers.get("content-length") {
        Some(length) => {
            let length = length.trim().parse::<usize>().map_err(|_| {
                PublisherError::Session(format!("invalid content-length [{}]", length))
            })?;
            if length > MAX_BODY_SIZE {
                return Err(oversized_body(length));
            }
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).await?;
            if reader.read_u8().await? != 0 {
                return Err(PublisherError::Session(
                    "frame body not terminated by NUL".to_string(),
                ));
            }
            body
        }
        None => {
            let mut body = Vec::new();
            let limit = MAX_BODY_SIZE as u64 + 1;
            (&mut *reader).take(limit).read_until(0, &mut body).await?;
            match body.pop() {
                Some(0) => body,
                _ if body.len() >= MAX_BODY_SIZE => return Err(oversized_body(body.len() + 1)),
                _ => {
                    return Err(PublisherError::Session(
                        "connection closed inside frame body".to_string(),
                    ))
                }
            }
        }
    };

    Ok(Frame {
        command,
        headers,
        body,
    })
}

fn oversized_body(length: usize) -> PublisherError {
    PublisherError::Session(format!(
        "frame body of {} bytes exceeds the {} byte limit",
        length, MAX_BODY_SIZE
    ))
}
