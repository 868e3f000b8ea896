use crate::error::{PublisherError, Result};
use crate::retry::ResendPolicy;
use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// STOMP protocol version offered in the CONNECT frame.
pub const DEFAULT_ACCEPT_VERSION: &str = "1.1";

/// Login and passcode sent in the CONNECT frame.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub passcode: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, passcode: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            passcode: passcode.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("passcode", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub protocol: String,
    pub credentials: Option<Credentials>,
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_ms", rename = "retry_delay_ms")]
    pub retry_delay: Duration,
    pub resend_policy: ResendPolicy,
    pub receipts: bool,
    pub accept_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 61613,
            transport: TransportKind::Plain,
            protocol: "STOMP".to_string(),
            credentials: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            resend_policy: ResendPolicy::Failed,
            receipts: false,
            accept_version: DEFAULT_ACCEPT_VERSION.to_string(),
        }
    }
}

impl Config {
    /// Broker address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loads a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PublisherError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        if config.host.is_empty() {
            return Err(PublisherError::Config("host must not be empty".to_string()));
        }
        Ok(config)
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Starts from an existing configuration, e.g. one loaded from a file.
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets host and port from a `host:port` string.
    pub fn address(mut self, address: &str) -> Result<Self> {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            PublisherError::Config(format!("broker address [{}] is not host:port", address))
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            PublisherError::Config(format!("broker address [{}] has an invalid port", address))
        })?;
        self.config.host = host.to_string();
        self.config.port = port;
        Ok(self)
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.protocol = protocol.into();
        self
    }

    pub fn credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.config.credentials = Some(Credentials::new(login, passcode));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout = Duration::from_millis(ms);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay = Duration::from_millis(ms);
        self
    }

    pub fn resend_policy(mut self, policy: ResendPolicy) -> Self {
        self.config.resend_policy = policy;
        self
    }

    pub fn receipts(mut self, enabled: bool) -> Self {
        self.config.receipts = enabled;
        self
    }

    pub fn accept_version(mut self, version: impl Into<String>) -> Self {
        self.config.accept_version = version.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
