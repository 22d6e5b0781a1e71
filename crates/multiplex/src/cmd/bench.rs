use std::time::Instant;

use multiplex_socket::Client;

use crate::cmd::BenchArgs;
use crate::exit::{socket_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_bench, BenchReport, OutputFormat};

pub async fn run(args: BenchArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be greater than zero"));
    }

    let client = Client::builder(args.client.host.clone(), args.client.port)
        .config(args.client.client_config()?)
        .build();
    client
        .connect()
        .await
        .map_err(|err| socket_error("connect failed", err))?;

    let started = Instant::now();
    let tasks: Vec<_> = (0..args.count)
        .map(|_| {
            let client = client.clone();
            let payload = args.payload.clone();
            tokio::spawn(async move { client.request(&payload).await })
        })
        .collect();

    let mut failed = 0;
    for task in tasks {
        match task.await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "request failed");
                failed += 1;
            }
            Err(err) => {
                tracing::warn!(error = %err, "request task failed");
                failed += 1;
            }
        }
    }
    let elapsed = started.elapsed();
    client.close();

    let report = BenchReport::new(args.client.addr(), args.count, failed, elapsed);
    print_bench(&report, format);

    Ok(if failed == 0 { SUCCESS } else { FAILURE })
}
