//! Fires many requests at once over a single connection.
//!
//! Start the server first:
//!   cargo run --example hello-server --features socket
//!
//! Then:
//!   cargo run --example concurrent-client --features socket

use std::time::Instant;

use multiplex::socket::{Client, ClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::builder("127.0.0.1", 9601)
        .config(ClientConfig {
            heartbeat: None,
            ..ClientConfig::default()
        })
        .build();

    let started = Instant::now();
    let mut tasks = Vec::new();
    for i in 0..1000 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client.request(&format!("request {i}")).await
        }));
    }

    let mut ok = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => ok += 1,
            Err(err) => eprintln!("request failed: {err}"),
        }
    }

    eprintln!(
        "{ok} responses over one connection in {:?}",
        started.elapsed()
    );
    client.close();
    Ok(())
}
