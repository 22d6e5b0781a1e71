use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One request and what came back for it.
#[derive(Debug, Serialize)]
pub struct Exchange {
    pub request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub addr: String,
    pub requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
    pub requests_per_sec: f64,
}

impl BenchReport {
    pub fn new(addr: String, requests: usize, failed: usize, elapsed: Duration) -> Self {
        let seconds = elapsed.as_secs_f64();
        let requests_per_sec = if seconds > 0.0 {
            (requests - failed) as f64 / seconds
        } else {
            0.0
        };
        Self {
            addr,
            requests,
            succeeded: requests - failed,
            failed,
            elapsed_ms: elapsed.as_millis(),
            requests_per_sec,
        }
    }
}

#[derive(Serialize)]
struct Listening<'a> {
    event: &'a str,
    addr: String,
}

pub fn print_listening(addr: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&Listening {
            event: "listening",
            addr: addr.to_string(),
        }),
        OutputFormat::Raw => println!("{addr}"),
        OutputFormat::Table | OutputFormat::Pretty => println!("listening on {addr}"),
    }
    let _ = std::io::stdout().flush();
}

pub fn print_exchanges(exchanges: &[Exchange], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for exchange in exchanges {
                print_json(exchange);
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["REQUEST", "RESPONSE", "MS"]);
            for exchange in exchanges {
                table.add_row(vec![
                    exchange.request.clone(),
                    outcome(exchange),
                    exchange.elapsed_ms.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for exchange in exchanges {
                println!(
                    "request={} response={} ms={}",
                    exchange.request,
                    outcome(exchange),
                    exchange.elapsed_ms
                );
            }
        }
        OutputFormat::Raw => {
            for exchange in exchanges {
                if let Some(response) = &exchange.response {
                    print_raw(response.as_bytes());
                    print_raw(b"\n");
                }
            }
        }
    }
}

pub fn print_bench(report: &BenchReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDR", "REQUESTS", "FAILED", "ELAPSED MS", "REQ/S"])
                .add_row(vec![
                    report.addr.clone(),
                    report.requests.to_string(),
                    report.failed.to_string(),
                    report.elapsed_ms.to_string(),
                    format!("{:.0}", report.requests_per_sec),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "addr={} requests={} failed={} elapsed_ms={} req_per_sec={:.0}",
                report.addr,
                report.requests,
                report.failed,
                report.elapsed_ms,
                report.requests_per_sec
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn outcome(exchange: &Exchange) -> String {
    match (&exchange.response, &exchange.error) {
        (Some(response), _) => response.clone(),
        (None, Some(error)) => format!("error: {error}"),
        (None, None) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bench_report_throughput() {
        let report = BenchReport::new("127.0.0.1:9601".into(), 1000, 0, Duration::from_secs(2));
        assert_eq!(report.succeeded, 1000);
        assert_eq!(report.elapsed_ms, 2000);
        assert!((report.requests_per_sec - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bench_report_counts_failures() {
        let report = BenchReport::new("x".into(), 10, 4, Duration::from_secs(1));
        assert_eq!(report.succeeded, 6);
        assert!((report.requests_per_sec - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn exchange_json_omits_missing_fields() {
        let exchange = Exchange {
            request: "World".into(),
            response: Some("Hello World".into()),
            error: None,
            elapsed_ms: 3,
        };
        let json = serde_json::to_string(&exchange).unwrap();
        assert!(json.contains("\"response\":\"Hello World\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn outcome_prefers_response() {
        let failed = Exchange {
            request: "x".into(),
            response: None,
            error: Some("recv channel [1] closed".into()),
            elapsed_ms: 0,
        };
        assert_eq!(outcome(&failed), "error: recv channel [1] closed");
    }
}
