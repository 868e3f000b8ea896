//! # STOMP Publisher
//!
//! Publish text messages to a queue or topic on a STOMP message broker
//! (ActiveMQ, Artemis, RabbitMQ's STOMP plugin, ...).
//!
//! A [`Publisher`] owns one transport connection (plain TCP or TLS) and the
//! STOMP 1.1 session running over it. Messages can come from a string, from
//! every line of a file, or from a live line stream such as standard input.
//! When a send fails the publisher reconnects to the same broker and resends,
//! with a bounded number of attempts and exponential backoff.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stomp_publisher::{ConfigBuilder, Publisher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigBuilder::new()
//!         .host("broker.example.com")
//!         .port(61613)
//!         .max_retries(5)
//!         .build();
//!
//!     let mut publisher = Publisher::new(config);
//!     publisher.set_publish_headers("/topic/events", "me", "publisher", "1.0.0", "json");
//!     publisher.connect_configured().await?;
//!
//!     publisher.send("{\"event\": \"started\"}").await?;
//!     let sent = publisher.send_file("events.jsonl").await?;
//!     println!("sent {} more messages", sent);
//!
//!     publisher.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Destinations
//!
//! A destination name starting with `/topic/` publishes to a topic; any other
//! name publishes to a queue. Names are passed to the broker unchanged.
//!
//! ## Retry behaviour
//!
//! See [`Publisher::send`] and [`ResendPolicy`]. The default policy resends the
//! message whose send failed; [`ResendPolicy::Previous`] reproduces the legacy
//! behaviour of resending the message before it.

pub mod config;
pub mod error;
pub mod frame;
pub mod headers;
pub mod message;
pub mod publisher;
mod retry;
pub mod session;
pub mod transport;

pub use config::{Config, ConfigBuilder, Credentials};
pub use error::{PublisherError, Result};
pub use headers::{Headers, HostnameSource, SystemHostname};
pub use message::{RecentMessages, StreamSummary};
pub use publisher::{Publisher, STOMP};
pub use retry::ResendPolicy;
pub use session::{Connector, Session, SessionOptions, StompConnector, StompSession};
pub use transport::{BoxedStream, TransportKind};
