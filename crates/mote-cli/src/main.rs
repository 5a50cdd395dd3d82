//! Mote CLI
//!
//! Security-context derivation and dual-stack datagram tools

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mote_crypto::{AeadAlgorithm, ContextDeriver, EndpointContext, KeyAgreementAlgorithm};
use mote_transport::{ChannelConfig, Datagram, DatagramChannel, Endpoint};
use tracing_subscriber::EnvFilter;

use config::Config;

/// Mote - OSCOAP key derivation and UDP channel tools
#[derive(Parser)]
#[command(name = "mote")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive sender and recipient keys and base IVs
    Derive {
        /// Master secret (hex)
        #[arg(long)]
        secret: Option<String>,

        /// Sender identifier (hex, or text with --text-ids)
        #[arg(long)]
        sender: Option<String>,

        /// Recipient identifier (hex, or text with --text-ids)
        #[arg(long)]
        recipient: Option<String>,

        /// Master salt (hex)
        #[arg(long)]
        salt: Option<String>,

        /// AEAD algorithm, by name or COSE identifier
        #[arg(long)]
        aead: Option<AeadAlgorithm>,

        /// Key-agreement algorithm, by name or COSE identifier
        #[arg(long)]
        key_agreement: Option<KeyAgreementAlgorithm>,

        /// Read --sender and --recipient as UTF-8 text
        #[arg(long)]
        text_ids: bool,
    },

    /// Print datagrams arriving on a channel
    Listen {
        /// Port for the wildcard sockets
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind a single socket to this address instead
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Send every datagram back to its source
        #[arg(long)]
        echo: bool,
    },

    /// Send one datagram
    Send {
        /// Destination address
        #[arg(required = true)]
        destination: Endpoint,

        /// Payload
        #[arg(required = true)]
        message: String,

        /// Payload is hex
        #[arg(long)]
        hex: bool,

        /// Local port
        #[arg(short, long)]
        port: Option<u16>,

        /// Wait this long for a reply, in milliseconds
        #[arg(long, default_value_t = 0)]
        wait_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.validate()?;

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Derive {
            secret,
            sender,
            recipient,
            salt,
            aead,
            key_agreement,
            text_ids,
        } => {
            let params = DeriveParams {
                secret,
                sender,
                recipient,
                salt,
                aead,
                key_agreement,
                text_ids,
            };
            derive(params, &config)?;
        }
        Commands::Listen { port, bind, echo } => {
            listen(channel_config(&config, port, bind), echo).await?;
        }
        Commands::Send {
            destination,
            message,
            hex,
            port,
            wait_ms,
        } => {
            let payload = if hex {
                hex::decode(&message)?
            } else {
                message.into_bytes()
            };
            send(
                channel_config(&config, port, None),
                destination,
                payload,
                Duration::from_millis(wait_ms),
            )
            .await?;
        }
    }

    Ok(())
}

struct DeriveParams {
    secret: Option<String>,
    sender: Option<String>,
    recipient: Option<String>,
    salt: Option<String>,
    aead: Option<AeadAlgorithm>,
    key_agreement: Option<KeyAgreementAlgorithm>,
    text_ids: bool,
}

/// Derive and print a security context; flags override the config file.
fn derive(params: DeriveParams, config: &Config) -> anyhow::Result<()> {
    let security = &config.security;

    let secret = required_hex("secret", params.secret.as_ref().or(security.master_secret.as_ref()))?;
    let sender_id = identifier("sender", params.sender, params.text_ids, security.sender_id.as_ref())?;
    let recipient_id = identifier(
        "recipient",
        params.recipient,
        params.text_ids,
        security.recipient_id.as_ref(),
    )?;
    let salt = params
        .salt
        .as_ref()
        .or(security.salt.as_ref())
        .map(hex::decode)
        .transpose()?;
    let aead = params.aead.unwrap_or(security.aead);
    let key_agreement = params.key_agreement.unwrap_or(security.key_agreement);

    tracing::info!(%aead, %key_agreement, "Deriving security context");

    let deriver = ContextDeriver::new(tracing::info_span!("derive"));
    let context = deriver.derive(
        &secret,
        &sender_id,
        &recipient_id,
        salt.as_deref(),
        aead,
        key_agreement,
    )?;

    println!("AEAD: {aead} (COSE {})", aead.cose_id());
    println!(
        "Key agreement: {key_agreement} (COSE {})",
        key_agreement.cose_id()
    );
    println!();
    print_endpoint("Sender", context.sender());
    println!();
    print_endpoint("Recipient", context.recipient());

    Ok(())
}

fn print_endpoint(role: &str, endpoint: &EndpointContext) {
    println!("{role}:");
    println!("  ID:      {}", hex::encode(endpoint.id()));
    println!("  Key:     {}", hex::encode(endpoint.key()));
    println!("  Base IV: {}", hex::encode(endpoint.base_iv()));
}

fn required_hex(name: &str, value: Option<&String>) -> anyhow::Result<Vec<u8>> {
    let value = value.ok_or_else(|| anyhow::anyhow!("--{name} is required"))?;
    hex::decode(value).map_err(|e| anyhow::anyhow!("--{name} is not valid hex: {e}"))
}

fn identifier(
    name: &str,
    flag: Option<String>,
    text: bool,
    configured: Option<&String>,
) -> anyhow::Result<Vec<u8>> {
    match flag {
        Some(value) if text => Ok(value.into_bytes()),
        Some(value) => required_hex(name, Some(&value)),
        None => required_hex(name, configured),
    }
}

fn channel_config(config: &Config, port: Option<u16>, bind: Option<SocketAddr>) -> ChannelConfig {
    let mut channel = config.channel.clone();
    if let Some(port) = port {
        channel.port = port;
    }
    if let Some(bind) = bind {
        channel.local_endpoint = Some(bind);
    }
    channel
}

/// Run a channel until Ctrl+C, printing what arrives.
async fn listen(config: ChannelConfig, echo: bool) -> anyhow::Result<()> {
    let channel = DatagramChannel::new(config);
    let (_, mut incoming) = channel.subscribe_channel();
    channel.start()?;

    println!("Listening on: {}", channel.local_endpoint());
    if let Some(backup) = channel.backup_endpoint() {
        println!("IPv4 backup: {backup}");
    }
    println!("Echo: {echo}");
    println!("Press Ctrl+C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(datagram) = incoming.recv() => {
                print_datagram(&datagram);
                if echo {
                    channel.send(datagram.payload.clone(), datagram.source);
                }
            }
            _ = &mut shutdown => break,
        }
    }

    println!("\nShutting down...");
    channel.stop();

    let stats = channel.stats();
    println!(
        "Received {} datagrams ({} bytes), sent {}",
        stats.packets_received, stats.bytes_received, stats.packets_sent
    );
    Ok(())
}

/// Send one datagram and optionally wait for a reply.
async fn send(
    config: ChannelConfig,
    destination: Endpoint,
    payload: Vec<u8>,
    wait: Duration,
) -> anyhow::Result<()> {
    let channel = DatagramChannel::new(config);
    let (_, mut incoming) = channel.subscribe_channel();
    channel.start()?;

    let len = payload.len();
    channel.send(payload, destination);

    // Sends complete on the channel's own task.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        let stats = channel.stats();
        if stats.send_errors > 0 {
            anyhow::bail!("Failed to send to {destination}");
        }
        if stats.packets_sent > 0 {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("Timed out sending to {destination}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    println!(
        "Sent {len} bytes to {destination} from {}",
        channel.local_endpoint()
    );

    if !wait.is_zero() {
        match tokio::time::timeout(wait, incoming.recv()).await {
            Ok(Some(reply)) => print_datagram(&reply),
            _ => println!("No reply within {} ms", wait.as_millis()),
        }
    }

    channel.stop();
    Ok(())
}

fn print_datagram(datagram: &Datagram) {
    let truncated = if datagram.truncated { " (truncated)" } else { "" };
    println!(
        "{} bytes from {}{truncated}: {}",
        datagram.payload.len(),
        datagram.source,
        render_payload(&datagram.payload)
    );
}

/// Printable UTF-8 as text, anything else as hex.
fn render_payload(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) if !text.chars().any(char::is_control) => format!("{text:?}"),
        _ => hex::encode(payload),
    }
}
