//! A terminal chat over the wireforge protocol.
//!
//! Run a server:
//!
//! ```text
//! cargo run -p chat -- server 127.0.0.1:26950
//! ```
//!
//! Then any number of clients (up to the server's capacity):
//!
//! ```text
//! cargo run -p chat -- client 127.0.0.1:26950 alice
//! ```
//!
//! Lines typed into a client broadcast to everyone else. `/ping` measures
//! the round trip to the server, `/quit` leaves.

use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use wireforge::prelude::*;

#[tokio::main]
async fn main() -> Result<(), WireforgeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("server") => {
            let addr = args
                .get(1)
                .cloned()
                .unwrap_or_else(|| "0.0.0.0:26950".to_string());
            run_server(addr).await
        }
        Some("client") => {
            let addr = args
                .get(1)
                .cloned()
                .unwrap_or_else(|| "127.0.0.1:26950".to_string());
            let pseudo = args.get(2).cloned().unwrap_or_default();
            run_client(addr, pseudo).await
        }
        _ => {
            eprintln!("usage: chat server [addr] | chat client [addr] [pseudo]");
            Ok(())
        }
    }
}

async fn run_server(addr: String) -> Result<(), WireforgeError> {
    let server = Server::new(ServerConfig {
        addr,
        max_clients: 8,
        name: "Chat Demo".to_string(),
    });
    server.start().await?;
    tracing::info!("press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(TransportError::AcceptFailed)?;
    server.stop().await?;
    Ok(())
}

async fn run_client(addr: String, pseudo: String) -> Result<(), WireforgeError> {
    let client = Client::new();
    client.connect(&addr, &pseudo).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => break,
        };
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/ping" => client.ping().await?,
            text => client.send_message(ClientId::BROADCAST, text).await?,
        }
        if !client.is_connected() {
            break;
        }
    }
    client.disconnect().await;
    Ok(())
}
