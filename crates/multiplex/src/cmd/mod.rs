use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use multiplex_socket::{ClientConfig, ServerConfig};

use crate::exit::{io_error, socket_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod bench;
pub mod request;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a greeting server that answers every request with "Hello <body>".
    Serve(ServeArgs),
    /// Send payloads concurrently over one connection and print the responses.
    Request(RequestArgs),
    /// Measure throughput of many concurrent requests over one connection.
    Bench(BenchArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => block_on(serve::run(args, format)),
        Command::Request(args) => block_on(request::run(args, format)),
        Command::Bench(args) => block_on(bench::run(args, format)),
        Command::Version(args) => version::run(args),
    }
}

fn block_on<F: Future<Output = CliResult<i32>>>(future: F) -> CliResult<i32> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))?
        .block_on(future)
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind.
    pub host: String,
    /// Port to bind; 0 picks a free one.
    pub port: u16,
    /// Maximum frame size in bytes, length prefix included.
    #[arg(long, env = "MULTIPLEX_PACKAGE_MAX_LENGTH")]
    pub package_max_length: Option<usize>,
}

impl ServeArgs {
    pub fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::default();
        if let Some(max) = self.package_max_length {
            config.package_max_length = max;
        }
        config
    }
}

/// Client settings shared by `request` and `bench`.
#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// JSON client config file; flags below override it.
    #[arg(long, value_name = "FILE", env = "MULTIPLEX_CONFIG")]
    pub config: Option<PathBuf>,
    /// Response timeout (e.g. 10s, 500ms).
    #[arg(long, env = "MULTIPLEX_RECV_TIMEOUT")]
    pub recv_timeout: Option<String>,
    /// Connect timeout (e.g. 1s, 500ms).
    #[arg(long, env = "MULTIPLEX_CONNECT_TIMEOUT")]
    pub connect_timeout: Option<String>,
    /// Maximum frame size in bytes, length prefix included.
    #[arg(long, env = "MULTIPLEX_PACKAGE_MAX_LENGTH")]
    pub package_max_length: Option<usize>,
}

impl ClientArgs {
    /// Defaults, then the config file, then flags. Heartbeats are off for
    /// one-shot commands unless the file turns them on.
    pub fn client_config(&self) -> CliResult<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|err| {
                    io_error(&format!("failed reading {}", path.display()), err)
                })?;
                ClientConfig::from_json(&json)
                    .map_err(|err| socket_error(&format!("invalid config {}", path.display()), err))?
            }
            None => ClientConfig {
                heartbeat: None,
                ..ClientConfig::default()
            },
        };

        if let Some(timeout) = &self.recv_timeout {
            config.recv_timeout = parse_duration(timeout)?;
        }
        if let Some(timeout) = &self.connect_timeout {
            config.connect_timeout = parse_duration(timeout)?;
        }
        if let Some(max) = self.package_max_length {
            config.package_max_length = max;
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    #[command(flatten)]
    pub client: ClientArgs,
    /// Payloads to send; all are in flight at once.
    #[arg(required = true, num_args = 1..)]
    pub payloads: Vec<String>,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    #[command(flatten)]
    pub client: ClientArgs,
    /// Number of requests.
    #[arg(long, short = 'n', default_value = "10000")]
    pub count: usize,
    /// Payload sent with every request.
    #[arg(long, default_value = "World")]
    pub payload: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
