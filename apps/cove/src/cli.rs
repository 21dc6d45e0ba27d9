use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "cove")]
#[command(about = "Cove collaboration relay and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a room and print every update it relays
    Tail {
        /// Relay URL (e.g., ws://localhost:8000)
        #[arg(short, long, default_value = "ws://localhost:8000")]
        url: String,

        /// Room to watch
        #[arg(short, long)]
        room: String,
    },

    /// Send one hex-encoded update payload into a room
    Send {
        /// Relay URL (e.g., ws://localhost:8000)
        #[arg(short, long, default_value = "ws://localhost:8000")]
        url: String,

        /// Room to send to
        #[arg(short, long)]
        room: String,

        /// Payload as hex digits (whitespace allowed), e.g. "aa bb 01"
        payload: String,
    },
}

async fn connect(url: &str, room: &str) -> Result<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
> {
    let ws_url = format!("{}/api/sync/{}", url.trim_end_matches('/'), room);
    debug!("Connecting to {}", ws_url);

    match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok((stream, _))) => Ok(stream),
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", ws_url, e);
            Err(anyhow::anyhow!("Connection failed: {}", e))
        }
        Err(_) => {
            error!("Connection timeout after 5 seconds");
            Err(anyhow::anyhow!("Connection timeout - is the relay running?"))
        }
    }
}

/// Watch a room: print the replay snapshot (if any) and every subsequent
/// broadcast until interrupted.
pub async fn run_tail(url: String, room: String) -> Result<()> {
    let stream = connect(&url, &room).await?;
    let (_write, mut read) = stream.split();

    println!("Watching room {room} (ctrl-c to stop)");
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Binary(data) => {
                println!("{} bytes: {:02x?}", data.len(), &data[..data.len().min(32)]);
            }
            Message::Close(_) => {
                println!("Room closed the connection");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Send a single payload into a room and exit.
pub async fn run_send(url: String, room: String, payload: String) -> Result<()> {
    let bytes = parse_hex_payload(&payload)?;
    let stream = connect(&url, &room).await?;
    let (mut write, _read) = stream.split();

    write.send(Message::Binary(bytes.clone().into())).await?;
    write.send(Message::Close(None)).await?;
    println!("Sent {} bytes to room {room}", bytes.len());
    Ok(())
}

fn parse_hex_payload(s: &str) -> Result<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    anyhow::ensure!(!digits.is_empty(), "payload is empty");
    anyhow::ensure!(
        digits.len() % 2 == 0,
        "hex payload must have an even number of digits"
    );
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| anyhow::anyhow!("invalid hex at offset {}: {}", i, e))
        })
        .collect()
}
