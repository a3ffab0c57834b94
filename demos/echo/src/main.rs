//! Echo server and client over `JsonProtocol`.
//!
//! ```text
//! echo server [addr]                 # default 127.0.0.1:7000
//! echo client [addr] [text ...]      # sends each word, prints the replies
//! ```
//!
//! Set `RUST_LOG=debug` to watch sessions open and close.

use std::time::Duration;

use netter::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:7000";
const SEND_QUEUE_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Say { text: String },
    Echo { session: String, text: String },
}

type EchoProtocol = JsonProtocol<Frame>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Server side: answers every `Say` with an `Echo` tagged with the
/// session that received it.
struct EchoBack;

impl Handler<EchoProtocol> for EchoBack {
    async fn handle(&self, session: &Session<EchoProtocol>, frame: Frame) {
        let Frame::Say { text } = frame else {
            tracing::warn!(id = %session.id(), "client sent an echo frame, ignoring");
            return;
        };
        let reply = Frame::Echo {
            session: session.id().to_string(),
            text,
        };
        if let Err(e) = session.send(reply).await {
            tracing::debug!(id = %session.id(), error = %e, "reply not sent");
        }
    }
}

/// Client side: forwards replies to `main`.
struct Replies(mpsc::UnboundedSender<Frame>);

impl Handler<EchoProtocol> for Replies {
    async fn handle(&self, _session: &Session<EchoProtocol>, frame: Frame) {
        let _ = self.0.send(frame);
    }
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

async fn serve(addr: &str) -> Result<(), NetterError> {
    let server = listen(
        Network::Tcp,
        addr,
        EchoProtocol::new(),
        EchoBack,
        SEND_QUEUE_SIZE,
    )
    .await?;
    let endpoint = server.local_endpoint()?;
    tracing::info!(%endpoint, "echo server ready");

    server
        .run(|session| {
            let id = session.id();
            session.set_close_callback(move |_| tracing::info!(%id, "client left"));
            tracing::info!(%id, peer = %session.connection().peer, "client joined");
            session.start();
        })
        .await
}

async fn client(addr: &str, words: Vec<String>) -> Result<(), NetterError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = dial(Network::Tcp, addr, EchoProtocol::new(), Replies(tx), 0).await?;

    let count = words.len();
    for text in words {
        session.send(Frame::Say { text }).await?;
    }

    for _ in 0..count {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(Frame::Echo { session: id, text })) => println!("[{id}] {text}"),
            Ok(Some(other)) => tracing::warn!(?other, "unexpected frame"),
            Ok(None) | Err(_) => {
                tracing::error!("no reply from server");
                break;
            }
        }
    }

    let _ = session.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_default();
    let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());

    match mode.as_str() {
        "server" => serve(&addr).await?,
        "client" => {
            let mut words: Vec<String> = args.collect();
            if words.is_empty() {
                words.push("hello".to_string());
            }
            client(&addr, words).await?;
        }
        _ => {
            eprintln!("usage: echo <server|client> [addr] [text ...]");
            std::process::exit(2);
        }
    }
    Ok(())
}
