//! Ordered STOMP header sets and the builders for connection and publish headers.

use crate::config::Credentials;

pub const UNKNOWN_HOSTNAME: &str = "unknown";

/// Header key/value pairs in insertion order, keyed by name.
///
/// Setting an existing key replaces its value in place, so rebuilding a header
/// set never produces duplicate or conflicting entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Merges `other` into `self`, last write wins.
    pub fn extend(&mut self, other: &Headers) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

/// Source of the local host name reported in the `hostname` publish header.
pub trait HostnameSource: Send + Sync {
    fn hostname(&self) -> Option<String>;
}

impl<F> HostnameSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn hostname(&self) -> Option<String> {
        self()
    }
}

/// Looks the host name up from the kernel, falling back to the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostname;

impl HostnameSource for SystemHostname {
    fn hostname(&self) -> Option<String> {
        ["/proc/sys/kernel/hostname", "/etc/hostname"]
            .iter()
            .filter_map(|path| std::fs::read_to_string(path).ok())
            .chain(["HOSTNAME", "COMPUTERNAME"].iter().filter_map(|var| std::env::var(var).ok()))
            .map(|name| name.trim().to_string())
            .find(|name| !name.is_empty())
    }
}

/// Headers for the CONNECT frame.
pub fn connection_headers(
    address: &str,
    accept_version: &str,
    credentials: Option<&Credentials>,
) -> Headers {
    let mut headers = Headers::new()
        .with("host", address)
        .with("accept-version", accept_version);
    if let Some(credentials) = credentials {
        headers.set("login", credentials.login.as_str());
        headers.set("passcode", credentials.passcode.as_str());
    }
    headers
}

/// Headers attached to every SEND frame of a publishing run.
pub fn publish_headers(
    destination: &str,
    sender: &str,
    client_name: &str,
    client_version: &str,
    format: &str,
    hostname: &dyn HostnameSource,
) -> Headers {
    let hostname = hostname
        .hostname()
        .unwrap_or_else(|| UNKNOWN_HOSTNAME.to_string());

    Headers::new()
        .with("destination", destination)
        .with("username", sender)
        .with("version", format!("{} {}", client_name, client_version))
        .with("format", format)
        .with("persistent", "true")
        .with("priority", "5")
        .with("hostname", hostname)
}
