use std::time::Instant;

use multiplex_socket::Client;

use crate::cmd::RequestArgs;
use crate::exit::{socket_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_exchanges, Exchange, OutputFormat};

pub async fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let client = Client::builder(args.client.host.clone(), args.client.port)
        .config(args.client.client_config()?)
        .build();
    client
        .connect()
        .await
        .map_err(|err| socket_error("connect failed", err))?;

    let tasks: Vec<_> = args
        .payloads
        .into_iter()
        .map(|payload| {
            let client = client.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = client.request(&payload).await;
                (payload, result, started.elapsed())
            })
        })
        .collect();

    let mut exchanges = Vec::with_capacity(tasks.len());
    let mut first_error = None;
    for task in tasks {
        let (request, result, elapsed) = task
            .await
            .map_err(|err| CliError::new(INTERNAL, format!("request task failed: {err}")))?;
        let exchange = match result {
            Ok(response) => Exchange {
                request,
                response: Some(response),
                error: None,
                elapsed_ms: elapsed.as_millis(),
            },
            Err(err) => {
                let message = err.to_string();
                first_error.get_or_insert(err);
                Exchange {
                    request,
                    response: None,
                    error: Some(message),
                    elapsed_ms: elapsed.as_millis(),
                }
            }
        };
        exchanges.push(exchange);
    }
    client.close();

    print_exchanges(&exchanges, format);
    match first_error {
        None => Ok(SUCCESS),
        Some(err) if exchanges.iter().all(|exchange| exchange.error.is_some()) => {
            Err(socket_error("request failed", err))
        }
        Some(_) => Ok(FAILURE),
    }
}
