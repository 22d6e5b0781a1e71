//! Request/response multiplexing over a single TCP connection.
//!
//! This is the "just works" layer. A [`Client`] lets many concurrent callers
//! share one connection: each request gets a fresh id, responses are routed
//! back to the caller waiting on that id, and the connection is kept alive,
//! re-established and rotated behind the scenes. A [`Server`] answers every
//! request concurrently with a user handler.
//!
//! ```no_run
//! use multiplex_socket::{Client, HandlerError, Server, ServerConfig};
//!
//! # async fn demo() -> multiplex_socket::Result<()> {
//! let server = Server::new()
//!     .handle(|_packet, _serializer| async { Ok::<_, HandlerError>("Hello World.".to_string()) })
//!     .bind("127.0.0.1", 9601, &ServerConfig::default())
//!     .await?;
//! tokio::spawn(server.start());
//!
//! let client = Client::new("127.0.0.1", 9601);
//! assert_eq!(client.request(&"Hello.".to_string()).await?, "Hello World.");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod id;
pub mod manager;
pub mod serializer;
pub mod server;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Result, SocketError};
pub use id::{IdGenerator, SequenceIdGenerator};
pub use manager::{ChannelManager, QueueReceiver, WaitError, Waiter, WriteQueue};
pub use serializer::{JsonSerializer, SerializeError, Serializer, StringSerializer};
pub use server::{HandlerError, HandlerResult, Server};
