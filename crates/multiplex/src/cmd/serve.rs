use std::sync::Arc;

use multiplex_frame::Packet;
use multiplex_socket::{HandlerError, Serializer, Server, StringSerializer};

use crate::cmd::ServeArgs;
use crate::exit::{socket_error, CliResult, SUCCESS};
use crate::output::{print_listening, OutputFormat};

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let server = Server::new()
        .handle(greet)
        .bind(&args.host, args.port, &args.server_config())
        .await
        .map_err(|err| socket_error("bind failed", err))?;

    if let Some(addr) = server.local_addr() {
        print_listening(addr, format);
    }

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(err) => tracing::warn!(error = %err, "failed to install ctrl-c handler"),
        }
    });

    server
        .start()
        .await
        .map_err(|err| socket_error("server failed", err))?;
    Ok(SUCCESS)
}

async fn greet(packet: Packet, serializer: Arc<StringSerializer>) -> Result<String, HandlerError> {
    let id = packet.id();
    let name = serializer.unserialize(packet.into_body())?;
    tracing::debug!(id, %name, "greeting");
    Ok(format!("Hello {name}"))
}
