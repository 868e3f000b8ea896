use crate::{
    config::Config,
    error::{PublisherError, Result},
    headers::{connection_headers, publish_headers, Headers, HostnameSource, SystemHostname},
    message::{RecentMessages, StreamSummary},
    retry::RetryStrategy,
    session::{Connector, Session, SessionOptions, StompConnector},
    transport::TransportKind,
};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// The only message protocol the publisher speaks.
pub const STOMP: &str = "STOMP";

/// Publishes text messages to one destination on a STOMP broker.
///
/// A `Publisher` owns one transport connection and the STOMP session running
/// over it. When a send fails it tears the session down, reconnects to the
/// same broker and resends, up to [`Config::max_retries`] times with
/// exponential backoff.
///
/// # Examples
///
/// ```no_run
/// use stomp_publisher::{Publisher, TransportKind};
///
/// #[tokio::main]
/// async fn main() -> Result<(), stomp_publisher::PublisherError> {
///     let mut publisher = Publisher::new(Default::default());
///     publisher.set_publish_headers("/queue/orders", "me", "publisher", "1.0.0", "json");
///
///     publisher.connect(TransportKind::Plain, "STOMP", "localhost:61613").await?;
///     publisher.send("{\"id\": 42}").await?;
///     publisher.disconnect().await?;
///
///     Ok(())
/// }
/// ```
pub struct Publisher {
    config: Config,
    connector: Box<dyn Connector>,
    hostname: Box<dyn HostnameSource>,
    session: Option<Box<dyn Session>>,
    transport_kind: Option<TransportKind>,
    protocol: Option<String>,
    connection_headers: Headers,
    publish_headers: Headers,
    headers_ready: bool,
    recent: RecentMessages,
    target_address: Option<String>,
}

impl Publisher {
    /// Creates a disconnected publisher that dials real TCP/TLS transports.
    pub fn new(config: Config) -> Self {
        let connector = StompConnector::new(SessionOptions {
            timeout: config.timeout,
            receipts: config.receipts,
        });
        Self::with_connector(config, connector)
    }

    /// Creates a disconnected publisher that opens sessions through `connector`.
    pub fn with_connector(config: Config, connector: impl Connector + 'static) -> Self {
        Self {
            config,
            connector: Box::new(connector),
            hostname: Box::new(SystemHostname),
            session: None,
            transport_kind: None,
            protocol: None,
            connection_headers: Headers::new(),
            publish_headers: Headers::new(),
            headers_ready: false,
            recent: RecentMessages::default(),
            target_address: None,
        }
    }

    /// Replaces the source of the `hostname` publish header.
    pub fn with_hostname_source(mut self, source: impl HostnameSource + 'static) -> Self {
        self.hostname = Box::new(source);
        self
    }

    /// The configuration this publisher was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether a session is open.
    ///
    /// True only between a successful [`connect`](Self::connect) and a
    /// [`disconnect`](Self::disconnect), or a send whose retries all failed.
    ///
    /// # Examples
    ///
    /// ```
    /// use stomp_publisher::Publisher;
    ///
    /// let publisher = Publisher::new(Default::default());
    /// assert!(!publisher.is_connected());
    /// ```
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Whether [`set_publish_headers`](Self::set_publish_headers) has run.
    pub fn headers_ready(&self) -> bool {
        self.headers_ready
    }

    /// Headers attached to every published message.
    pub fn publish_headers(&self) -> &Headers {
        &self.publish_headers
    }

    /// Headers sent with CONNECT and DISCONNECT on the current connection.
    pub fn connection_headers(&self) -> &Headers {
        &self.connection_headers
    }

    /// The last two messages handed to [`send`](Self::send), newest first.
    pub fn recent_messages(&self) -> &RecentMessages {
        &self.recent
    }

    /// The `host:port` of the broker last connected to.
    pub fn active_target(&self) -> Option<&str> {
        self.target_address.as_deref()
    }

    /// Opens a transport to `address` and negotiates a messaging session over it.
    ///
    /// `protocol` is matched case-insensitively; only `"STOMP"` is supported.
    /// On success the transport kind, protocol and address are retained so a
    /// failed send can reconnect without outside input.
    ///
    /// # Errors
    ///
    /// * [`PublisherError::Precondition`] if already connected
    /// * [`PublisherError::Transport`] or [`PublisherError::Timeout`] if the
    ///   broker cannot be reached
    /// * [`PublisherError::UnsupportedProtocol`] for any protocol but STOMP; the
    ///   transport that was opened is shut down first
    /// * [`PublisherError::Session`] if the broker refuses the session
    pub async fn connect(
        &mut self,
        transport: TransportKind,
        protocol: &str,
        address: &str,
    ) -> Result<()> {
        if self.is_connected() {
            return Err(PublisherError::Precondition("already connected".to_string()));
        }

        info!(%address, %transport, "connecting");
        let mut stream = self
            .connector
            .open_transport(transport, address)
            .await
            .inspect_err(|e| warn!(%address, error = %e, "failed to connect"))?;
        info!(%address, "transport connected");

        if !protocol.eq_ignore_ascii_case(STOMP) {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "closing transport after protocol rejection");
            }
            return Err(PublisherError::UnsupportedProtocol(protocol.to_string()));
        }

        let headers = connection_headers(
            address,
            &self.config.accept_version,
            self.config.credentials.as_ref(),
        );
        debug!(headers = ?headers.keys().collect::<Vec<_>>(), "STOMP connection headers");

        let session = self
            .connector
            .open_session(stream, &headers)
            .await
            .map_err(|e| match e {
                PublisherError::Session(msg) => PublisherError::Session(format!(
                    "failed to connect [{}][{}] on host {}: {}",
                    transport, protocol, address, msg
                )),
                other => other,
            })?;

        self.session = Some(session);
        self.connection_headers = headers;
        self.transport_kind = Some(transport);
        self.protocol = Some(protocol.to_string());
        self.target_address = Some(address.to_string());
        Ok(())
    }

    /// Connects with the transport, protocol and broker address from the config.
    pub async fn connect_configured(&mut self) -> Result<()> {
        let transport = self.config.transport;
        let protocol = self.config.protocol.clone();
        let address = self.config.address();
        self.connect(transport, &protocol, &address).await
    }

    /// Sends DISCONNECT with the connection headers, then closes the transport.
    ///
    /// Both steps always run and the publisher is disconnected afterwards even
    /// when one of them fails; the first failure is returned.
    ///
    /// # Errors
    ///
    /// * [`PublisherError::Precondition`] if not connected
    /// * [`PublisherError::Session`] if the DISCONNECT frame fails
    /// * [`PublisherError::Transport`] if closing the transport fails
    pub async fn disconnect(&mut self) -> Result<()> {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| PublisherError::Precondition("not connected".to_string()))?;

        let disconnected = session.disconnect(&self.connection_headers).await;
        let closed = session.close().await;
        info!(broker = ?self.target_address, "disconnected");
        disconnected.and(closed)
    }

    /// Builds the headers attached to every published message.
    ///
    /// The set is, in order: `destination`, `username`, `version`
    /// (`"<client_name> <client_version>"`), `format`, `persistent: true`,
    /// `priority: 5` and `hostname` (`"unknown"` when the lookup fails).
    /// Calling it again replaces values rather than adding entries.
    ///
    /// A `destination` starting with `/topic/` names a topic; anything else
    /// names a queue. The name is passed to the broker unchanged.
    pub fn set_publish_headers(
        &mut self,
        destination: &str,
        sender: &str,
        client_name: &str,
        client_version: &str,
        format: &str,
    ) {
        let headers = publish_headers(
            destination,
            sender,
            client_name,
            client_version,
            format,
            self.hostname.as_ref(),
        );
        debug!(?headers, "publish headers");
        self.publish_headers.extend(&headers);
        self.headers_ready = true;
    }

    /// Publishes one message, reconnecting and resending on failure.
    ///
    /// The message is recorded in [`recent_messages`](Self::recent_messages)
    /// before the first attempt. If the send fails, the publisher waits
    /// `retry_delay * 2^attempt`, tears the session down, reconnects to the
    /// same broker and resends the payloads chosen by
    /// [`Config::resend_policy`], up to [`Config::max_retries`] times.
    ///
    /// # Errors
    ///
    /// * [`PublisherError::Precondition`] if [`set_publish_headers`](Self::set_publish_headers)
    ///   has not run, or the publisher is not connected
    /// * [`PublisherError::Session`] once every retry has failed, naming the
    ///   last error; the publisher is left disconnected
    /// * the first send error unchanged when `max_retries` is 0 or the
    ///   error is not retryable
    pub async fn send(&mut self, message: &str) -> Result<()> {
        if !self.headers_ready {
            return Err(PublisherError::Precondition(
                "publish headers not set".to_string(),
            ));
        }
        if !self.is_connected() {
            return Err(PublisherError::Precondition("not connected".to_string()));
        }

        self.recent.push(message);
        let err = match self.send_once(message).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        warn!(
            failed = message,
            previous = ?self.recent.previous(),
            error = %err,
            "failed to send"
        );
        if !err.is_retryable() {
            return Err(err);
        }
        self.retry(message, err).await
    }

    /// Publishes every non-empty line of the file at `path`, in order.
    ///
    /// Stops at the first line that cannot be sent and returns its error.
    /// Returns the number of lines sent.
    ///
    /// # Errors
    ///
    /// * [`PublisherError::FileRead`] if the file cannot be read
    /// * any error from [`send`](Self::send)
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| PublisherError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;

        let mut sent = 0;
        for line in text.split('\n').filter(|line| !line.is_empty()) {
            debug!(line, "sending");
            self.send(line).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Publishes lines from `reader` until end of input.
    ///
    /// Newlines are stripped and empty lines skipped. Bytes that are not
    /// valid UTF-8 are replaced with U+FFFD. A line that cannot be sent is
    /// logged and counted, and reading carries on. A read error ends the
    /// stream like end of input does.
    pub async fn send_stream<R>(&mut self, mut reader: R) -> StreamSummary
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = StreamSummary::default();
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "stopped reading input");
                    break;
                }
            }
            if line.is_empty() || line == b"\n" {
                continue;
            }

            let message = String::from_utf8_lossy(&line).replace('\n', "");
            match self.send(&message).await {
                Ok(()) => {
                    debug!(line = %message, "sent");
                    summary.sent += 1;
                }
                Err(e) => {
                    error!(line = %message, error = %e, "send failed");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    async fn send_once(&mut self, body: &str) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| PublisherError::Precondition("not connected".to_string()))?;
        session.send(&self.publish_headers, body).await
    }

    async fn retry(&mut self, failed: &str, first_error: PublisherError) -> Result<()> {
        let strategy = RetryStrategy::new(self.config.max_retries, self.config.retry_delay);
        if strategy.max_retries() == 0 {
            return Err(first_error);
        }

        let payloads: Vec<String> = self
            .config
            .resend_policy
            .payloads(failed, self.recent.previous())
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut last_error = first_error;
        for attempt in 0..strategy.max_retries() {
            strategy.wait(attempt).await;
            self.teardown().await;

            info!(
                attempt = attempt + 1,
                broker = ?self.target_address,
                "attempting reconnect"
            );
            if let Err(e) = self.reconnect().await {
                warn!(attempt = attempt + 1, error = %e, "reconnect failed");
                last_error = e;
                continue;
            }

            match self.resend(&payloads).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "resend failed");
                    last_error = e;
                }
            }
        }

        self.teardown().await;
        Err(PublisherError::Session(format!(
            "send failed after {} retries: {}",
            strategy.max_retries(),
            last_error
        )))
    }

    // Drops the session whatever the outcome of DISCONNECT and close.
    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.disconnect(&self.connection_headers).await {
                debug!(error = %e, "disconnect during teardown failed");
            }
            if let Err(e) = session.close().await {
                debug!(error = %e, "close during teardown failed");
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        let (transport, protocol, address) = match (
            self.transport_kind,
            self.protocol.clone(),
            self.target_address.clone(),
        ) {
            (Some(transport), Some(protocol), Some(address)) => (transport, protocol, address),
            _ => {
                return Err(PublisherError::Precondition(
                    "no earlier connection to re-establish".to_string(),
                ))
            }
        };
        self.connect(transport, &protocol, &address).await
    }

    async fn resend(&mut self, payloads: &[String]) -> Result<()> {
        for payload in payloads {
            info!(payload = %payload, "resending");
            self.send_once(payload).await?;
        }
        Ok(())
    }
}
