//! STOMP messaging sessions and the connector that opens them.
//!
//! The [`Publisher`](crate::Publisher) talks to the broker only through the
//! [`Connector`] and [`Session`] traits, so the transport and protocol layers
//! can be swapped out in tests.

use crate::error::{PublisherError, Result};
use crate::frame::{read_frame, Command, Frame};
use crate::headers::Headers;
use crate::transport::{dial, BoxedStream, TransportKind};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

/// An open messaging session. Owns its transport exclusively.
#[async_trait]
pub trait Session: Send {
    /// Publishes `body` with `headers`.
    async fn send(&mut self, headers: &Headers, body: &str) -> Result<()>;

    /// Ends the protocol conversation with a DISCONNECT frame.
    async fn disconnect(&mut self, headers: &Headers) -> Result<()>;

    /// Shuts the underlying transport down.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports and negotiates sessions over them.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open_transport(&self, kind: TransportKind, address: &str) -> Result<BoxedStream>;

    async fn open_session(
        &self,
        stream: BoxedStream,
        headers: &Headers,
    ) -> Result<Box<dyn Session>>;
}

/// Session behaviour shared by every frame exchange.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Upper bound for any single wait on the broker.
    pub timeout: Duration,
    /// Request a RECEIPT for every SEND and for DISCONNECT.
    pub receipts: bool,
}

/// The default connector: [`dial`] followed by a STOMP CONNECT handshake.
#[derive(Debug, Clone, Copy)]
pub struct StompConnector {
    options: SessionOptions,
}

impl StompConnector {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for StompConnector {
    async fn open_transport(&self, kind: TransportKind, address: &str) -> Result<BoxedStream> {
        dial(kind, address, self.options.timeout).await
    }

    async fn open_session(
        &self,
        stream: BoxedStream,
        headers: &Headers,
    ) -> Result<Box<dyn Session>> {
        let session = StompSession::connect(stream, headers, self.options).await?;
        Ok(Box::new(session))
    }
}

pub struct StompSession {
    stream: BufReader<BoxedStream>,
    options: SessionOptions,
}

impl StompSession {
    /// Sends CONNECT and waits for the broker's CONNECTED.
    pub async fn connect(
        stream: BoxedStream,
        headers: &Headers,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut session = Self {
            stream: BufReader::new(stream),
            options,
        };

        session.write_frame(&Frame::connect(headers)).await?;
        let reply = session.next_frame().await?;
        match reply.command {
            Command::Connected => {
                info!(
                    version = reply.headers.get("version").unwrap_or("1.0"),
                    server = reply.headers.get("server").unwrap_or("unknown"),
                    "STOMP session established"
                );
                Ok(session)
            }
            Command::Error => Err(broker_error(&reply)),
            other => Err(PublisherError::Session(format!(
                "expected CONNECTED, broker replied with {}",
                other
            ))),
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        debug!(
            command = %frame.command,
            headers = ?frame.headers.keys().collect::<Vec<_>>(),
            "writing frame"
        );
        let bytes = frame.encode();
        let stream = self.stream.get_mut();
        stream
            .write_all(&bytes)
            .await
            .map_err(|e| PublisherError::Session(format!("{} failed: {}", frame.command, e)))?;
        stream
            .flush()
            .await
            .map_err(|e| PublisherError::Session(format!("{} failed: {}", frame.command, e)))
    }

    async fn next_frame(&mut self) -> Result<Frame> {
        let wait = self.options.timeout;
        timeout(wait, read_frame(&mut self.stream))
            .await
            .map_err(|_| PublisherError::Timeout(wait.as_millis() as u64))?
    }

    fn with_receipt(&self, headers: &Headers) -> (Headers, Option<String>) {
        let mut headers = headers.clone();
        if !self.options.receipts {
            return (headers, None);
        }
        let id = Uuid::now_v7().to_string();
        headers.set("receipt", id.as_str());
        (headers, Some(id))
    }

    async fn await_receipt(&mut self, id: &str) -> Result<()> {
        loop {
            let frame = self.next_frame().await?;
            match frame.command {
                Command::Receipt if frame.headers.get("receipt-id") == Some(id) => return Ok(()),
                Command::Receipt => {
                    debug!(
                        receipt_id = ?frame.headers.get("receipt-id"),
                        "ignoring stale receipt"
                    )
                }
                Command::Error => return Err(broker_error(&frame)),
                other => {
                    return Err(PublisherError::Session(format!(
                        "expected RECEIPT, broker replied with {}",
                        other
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl Session for StompSession {
    async fn send(&mut self, headers: &Headers, body: &str) -> Result<()> {
        let (headers, receipt) = self.with_receipt(headers);
        self.write_frame(&Frame::send(&headers, body)).await?;
        if let Some(id) = receipt {
            self.await_receipt(&id).await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self, headers: &Headers) -> Result<()> {
        let (headers, receipt) = self.with_receipt(headers);
        self.write_frame(&Frame::disconnect(&headers)).await?;
        if let Some(id) = receipt {
            self.await_receipt(&id).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .get_mut()
            .shutdown()
            .await
            .map_err(|e| PublisherError::Transport(format!("close failed: {}", e)))
    }
}

fn broker_error(frame: &Frame) -> PublisherError {
    let message = frame.headers.get("message").unwrap_or("broker error");
    let body = frame.body_text();
    if body.trim().is_empty() {
        PublisherError::Session(message.to_string())
    } else {
        PublisherError::Session(format!("{}: {}", message, body.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};
    use tokio_test::io::Builder;

    const OPTIONS: SessionOptions = SessionOptions {
        timeout: Duration::from_secs(5),
        receipts: false,
    };

    fn connect_headers() -> Headers {
        Headers::new()
            .with("host", "broker:61613")
            .with("accept-version", "1.1")
    }

    #[tokio::test]
    async fn test_connect_and_send() {
        let mock = Builder::new()
            .write(b"CONNECT\nhost:broker:61613\naccept-version:1.1\n\n\0")
            .read(b"CONNECTED\nversion:1.1\n\n\0")
            .write(b"SEND\ndestination:TEST\ncontent-length:5\n\nhello\0")
            .write(b"DISCONNECT\nhost:broker\\c61613\naccept-version:1.1\n\n\0")
            .build();

        let mut session = StompSession::connect(Box::new(mock), &connect_headers(), OPTIONS)
            .await
            .unwrap();

        let publish = Headers::new().with("destination", "TEST");
        session.send(&publish, "hello").await.unwrap();
        session.disconnect(&connect_headers()).await.unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejected_by_broker() {
        let mock = Builder::new()
            .write(b"CONNECT\nhost:broker:61613\naccept-version:1.1\n\n\0")
            .read(b"ERROR\nmessage:Authentication failed\n\nbad passcode\0")
            .build();

        let result = StompSession::connect(Box::new(mock), &connect_headers(), OPTIONS).await;
        match result {
            Err(PublisherError::Session(msg)) => {
                assert_eq!(msg, "Authentication failed: bad passcode")
            }
            _ => panic!("Expected session error"),
        }
    }

    #[tokio::test]
    async fn test_connect_unexpected_reply() {
        let mock = Builder::new()
            .write(b"CONNECT\nhost:broker:61613\naccept-version:1.1\n\n\0")
            .read(b"RECEIPT\nreceipt-id:1\n\n\0")
            .build();

        let result = StompSession::connect(Box::new(mock), &connect_headers(), OPTIONS).await;
        assert!(matches!(result, Err(PublisherError::Session(_))));
    }

    // Minimal broker on the far end of a duplex pipe: answers CONNECT, then
    // acknowledges receipts until `reject` matches a body.
    async fn receipt_broker(stream: DuplexStream, reject: &'static str) {
        let mut stream = BufReader::new(stream);
        while let Ok(frame) = read_frame(&mut stream).await {
            let reply = if frame.command == Command::Connect {
                Frame::new(
                    Command::Connected,
                    Headers::new().with("version", "1.1"),
                    Vec::new(),
                )
            } else if frame.body_text() == reject {
                Frame::new(
                    Command::Error,
                    Headers::new().with("message", "rejected"),
                    Vec::new(),
                )
            } else if let Some(id) = frame.headers.get("receipt") {
                Frame::new(
                    Command::Receipt,
                    Headers::new().with("receipt-id", id),
                    Vec::new(),
                )
            } else {
                continue;
            };
            if stream.get_mut().write_all(&reply.encode()).await.is_err() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_send_waits_for_receipt() {
        let (client, server) = duplex(4096);
        let broker = tokio::spawn(receipt_broker(server, "poison"));

        let options = SessionOptions {
            receipts: true,
            ..OPTIONS
        };
        let mut session = StompSession::connect(Box::new(client), &connect_headers(), options)
            .await
            .unwrap();
        let publish = Headers::new().with("destination", "TEST");

        session.send(&publish, "first").await.unwrap();
        session.send(&publish, "second").await.unwrap();
        match session.send(&publish, "poison").await {
            Err(PublisherError::Session(msg)) => assert_eq!(msg, "rejected"),
            other => panic!("Expected session error, got {:?}", other.err()),
        }

        session.disconnect(&connect_headers()).await.unwrap();
        session.close().await.unwrap();
        drop(session);
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_to_closed_transport_is_session_error() {
        let (client, server) = duplex(4096);
        let broker = tokio::spawn(async move {
            let mut stream = BufReader::new(server);
            let _ = read_frame(&mut stream).await;
            let reply = Frame::new(Command::Connected, Headers::new(), Vec::new());
            stream.get_mut().write_all(&reply.encode()).await.unwrap();
            // dropping the stream closes the pipe
        });

        let mut session = StompSession::connect(Box::new(client), &connect_headers(), OPTIONS)
            .await
            .unwrap();
        broker.await.unwrap();

        let result = session.send(&Headers::new(), "lost").await;
        assert!(matches!(result, Err(PublisherError::Session(_))));
    }

    #[tokio::test]
    async fn test_connect_times_out() {
        let (client, _server) = duplex(4096);
        let options = SessionOptions {
            timeout: Duration::from_millis(50),
            receipts: false,
        };

        let result = StompSession::connect(Box::new(client), &connect_headers(), options).await;
        assert!(matches!(result, Err(PublisherError::Timeout(50))));
    }
}
