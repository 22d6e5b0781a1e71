//! Greeting server. Answers every request with `"Hello " + body`.
//!
//! Run with:
//!   cargo run --example hello-server --features socket
//!
//! In another terminal:
//!   cargo run --example concurrent-client --features socket

use std::sync::Arc;

use multiplex::frame::Packet;
use multiplex::socket::{HandlerError, Serializer, Server, ServerConfig, StringSerializer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::new()
        .handle(|packet: Packet, serializer: Arc<StringSerializer>| async move {
            let name = serializer.unserialize(packet.into_body())?;
            Ok::<_, HandlerError>(format!("Hello {name}"))
        })
        .bind("127.0.0.1", 9601, &ServerConfig::default())
        .await?;

    if let Some(addr) = server.local_addr() {
        eprintln!("Listening on {addr}");
    }

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    server.start().await?;
    Ok(())
}
