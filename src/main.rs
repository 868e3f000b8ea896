//! Command-line publisher.
//!
//! ```bash
//! # one message to a queue
//! publisher -b broker.example.com:61613 -q ORDERS -m '{"id": 1}' -o json
//!
//! # every line of a file to a topic, over TLS
//! publisher -b broker.example.com:61614 -p ssl -q /topic/events -f events.txt
//!
//! # lines from standard input until Ctrl-D
//! tail -f app.log | publisher -b localhost:61613 -q LOGS -f -
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgGroup, Parser};
use stomp_publisher::{
    Config, ConfigBuilder, Publisher, PublisherError, ResendPolicy, Result, TransportKind,
};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

const NAME: &str = "publisher";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const SENDER: &str = "me";

#[derive(Parser, Debug)]
#[command(
    name = "publisher",
    version,
    about = "Publish messages to a STOMP message broker",
    group(ArgGroup::new("source").required(true).args(["data", "file"]))
)]
struct Args {
    /// Broker address, fully.qualified.broker:port
    #[arg(short, long)]
    broker: Option<String>,

    /// Destination queue; prefix with /topic/ for a topic
    #[arg(short, long)]
    queue: String,

    /// Message to send
    #[arg(short = 'm', long = "data")]
    data: Option<String>,

    /// File whose lines are sent, or '-' for standard input
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Transport to use: 'tcp' or 'ssl' [default: tcp]
    #[arg(short, long)]
    protocol: Option<TransportKind>,

    /// Message format: 'json', 'xml', 'csv', 'keyvalue', 'sql', 'unformatted', ...
    #[arg(short = 'o', long, default_value = "default")]
    format: String,

    /// Username override
    #[arg(long, env = "PUBLISHER_USERNAME")]
    username: Option<String>,

    /// Password override
    #[arg(long, env = "PUBLISHER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// JSON configuration file; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reconnect attempts after a failed send
    #[arg(long)]
    max_retries: Option<u32>,

    /// Delay before the first reconnect, doubled for each further attempt
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Wait for a broker receipt after every message
    #[arg(long)]
    receipts: bool,

    /// After reconnecting, resend the message before the failed one first
    #[arg(long)]
    resend_previous: bool,

    /// Turn on verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Turn on debug logging
    #[arg(short, long)]
    debug: bool,
}

fn init_logging(verbose: bool, debug: bool) {
    let level = if debug {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    // RUST_LOG overrides the flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("stomp_publisher={level},publisher={level},warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn build_config(args: &Args) -> Result<Config> {
    let base = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    let mut builder = ConfigBuilder::from_config(base);

    match &args.broker {
        Some(broker) => builder = builder.address(broker)?,
        None if args.config.is_none() => {
            return Err(PublisherError::Config(
                "need --broker (or a --config file naming one)".to_string(),
            ))
        }
        None => {}
    }
    if let Some(transport) = args.protocol {
        builder = builder.transport(transport);
    }
    if let Some(username) = &args.username {
        builder = builder.credentials(username, args.password.clone().unwrap_or_default());
    }
    if let Some(retries) = args.max_retries {
        builder = builder.max_retries(retries);
    }
    if let Some(delay) = args.retry_delay_ms {
        builder = builder.retry_delay_ms(delay);
    }
    if args.receipts {
        builder = builder.receipts(true);
    }
    if args.resend_previous {
        builder = builder.resend_policy(ResendPolicy::Previous);
    }
    Ok(builder.build())
}

async fn run(args: Args) -> Result<()> {
    let config = build_config(&args)?;
    let target = config.address();

    let mut publisher = Publisher::new(config);
    publisher.set_publish_headers(&args.queue, SENDER, NAME, VERSION, &args.format);

    publisher.connect_configured().await?;
    println!("Connect succeeded");

    if let Some(data) = &args.data {
        println!("Sending message to {}", target);
        publisher.send(data).await?;
        println!("--message: \"{}\"\n---------------------------------", data);
    }

    if let Some(file) = &args.file {
        if file.as_path() == Path::new("-") {
            println!("Sending 'stdin' to {}, (ctrl-D when finished)", target);
            let stdin = BufReader::new(tokio::io::stdin());
            let summary = publisher.send_stream(stdin).await;
            println!(
                "\nsent {} line(s), {} failed\n---------------------------------",
                summary.sent, summary.failed
            );
        } else {
            println!("Sending file {} to {}", file.display(), target);
            let sent = publisher.send_file(file).await?;
            println!("sent {} line(s)", sent);
        }
    }

    publisher.disconnect().await?;
    println!("Disconnect succeeded");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.debug);
    println!("{} {}", NAME, VERSION);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(args: &[&str]) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("publisher").chain(args.iter().copied()))
    }

    #[test]
    fn test_requires_a_message_source() {
        assert!(parse(&["-b", "broker:61613", "-q", "TEST"]).is_err());
        assert!(parse(&["-b", "broker:61613", "-q", "TEST", "-m", "hi", "-f", "x.txt"]).is_err());
        assert!(parse(&["-b", "broker:61613", "-q", "TEST", "-m", "hi"]).is_ok());
    }

    #[test]
    fn test_requires_a_queue() {
        assert!(parse(&["-b", "broker:61613", "-m", "hi"]).is_err());
    }

    #[test]
    fn test_transport_flag() {
        let args = parse(&["-b", "b:1", "-q", "Q", "-m", "x", "-p", "ssl"]).unwrap();
        assert_eq!(args.protocol, Some(TransportKind::Encrypted));

        assert!(parse(&["-b", "b:1", "-q", "Q", "-m", "x", "-p", "udp"]).is_err());
    }

    #[test]
    fn test_build_config_from_flags() {
        let args = parse(&[
            "-b",
            "mq.example.com:61614",
            "-q",
            "/topic/events",
            "-f",
            "-",
            "-p",
            "ssl",
            "--username",
            "joebob",
            "--password",
            "pw",
            "--max-retries",
            "9",
            "--retry-delay-ms",
            "250",
            "--receipts",
            "--resend-previous",
        ])
        .unwrap();

        let config = build_config(&args).unwrap();
        assert_eq!(config.address(), "mq.example.com:61614");
        assert_eq!(config.transport, TransportKind::Encrypted);
        let credentials = config.credentials.unwrap();
        assert_eq!(credentials.login, "joebob");
        assert_eq!(credentials.passcode, "pw");
        assert_eq!(config.max_retries, 9);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert!(config.receipts);
        assert_eq!(config.resend_policy, ResendPolicy::Previous);
    }

    #[test]
    fn test_build_config_needs_broker() {
        let args = parse(&["-q", "Q", "-m", "x"]).unwrap();
        assert!(matches!(build_config(&args), Err(PublisherError::Config(_))));
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("publisher.json");
        let json = r#"{"host":"file-host","port":1000,"transport":"ssl","max_retries":1}"#;
        std::fs::write(&path, json).unwrap();

        let args = parse(&[
            "--config",
            path.to_str().unwrap(),
            "-q",
            "Q",
            "-m",
            "x",
            "--max-retries",
            "4",
        ])
        .unwrap();

        let config = build_config(&args).unwrap();
        assert_eq!(config.address(), "file-host:1000");
        assert_eq!(config.transport, TransportKind::Encrypted);
        assert_eq!(config.max_retries, 4);
    }
}
