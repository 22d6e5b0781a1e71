#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

struct ServeProcess {
    child: Child,
    port: u16,
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Start `multiplex serve` on a free port and wait for its address line.
fn spawn_server() -> ServeProcess {
    let mut child = Command::new(env!("CARGO_BIN_EXE_multiplex"))
        .args(["--log-level", "error", "--format", "raw"])
        .args(["serve", "127.0.0.1", "0"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("serve should print its address");
    let port = line
        .trim()
        .rsplit(':')
        .next()
        .and_then(|port| port.parse().ok())
        .unwrap_or_else(|| panic!("unexpected serve output: {line:?}"));

    ServeProcess { child, port }
}

fn multiplex(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_multiplex"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("multiplex should run")
}

#[test]
fn request_against_serve_greets_every_payload() {
    let server = spawn_server();
    let port = server.port.to_string();

    let output = multiplex(&[
        "--format", "json", "request", "127.0.0.1", &port, "World", "Hyperf",
    ]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"request\":\"World\",\"response\":\"Hello World\""));
    assert!(stdout.contains("\"request\":\"Hyperf\",\"response\":\"Hello Hyperf\""));
}

#[test]
fn raw_request_prints_only_responses() {
    let server = spawn_server();
    let port = server.port.to_string();

    let output = multiplex(&["--format", "raw", "request", "127.0.0.1", &port, "World"]);

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "Hello World\n");
}

#[test]
fn bench_reports_no_failures() {
    let server = spawn_server();
    let port = server.port.to_string();

    let output = multiplex(&[
        "--format", "json", "bench", "127.0.0.1", &port, "--count", "200",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"requests\":200"));
    assert!(stdout.contains("\"failed\":0"));
}

#[test]
fn version_prints_package_version() {
    let output = multiplex(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("multiplex {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn version_extended_reports_build_target() {
    let output = multiplex(&["version", "--extended"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: multiplex"));
    assert!(stdout.contains("build_target: "));
}

#[test]
fn request_to_closed_port_fails() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        listener.local_addr().expect("local addr").port()
    };

    let output = multiplex(&["request", "127.0.0.1", &port.to_string(), "World"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn silent_server_times_out_with_124() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let port = listener.local_addr().expect("local addr").port();
    // Accept and hold the connection without ever answering.
    let holder = thread::spawn(move || {
        let accepted = listener.accept();
        thread::sleep(Duration::from_secs(3));
        drop(accepted);
    });

    let output = multiplex(&[
        "request",
        "127.0.0.1",
        &port.to_string(),
        "World",
        "--recv-timeout",
        "300ms",
    ]);
    assert_eq!(output.status.code(), Some(124));

    let _ = holder.join();
}

#[test]
fn invalid_duration_is_usage_error() {
    let output = multiplex(&[
        "request",
        "127.0.0.1",
        "9601",
        "World",
        "--recv-timeout",
        "soon",
    ]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn serve_on_busy_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let port = listener.local_addr().expect("local addr").port();

    let output = multiplex(&["serve", "127.0.0.1", &port.to_string()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("bind failed"));
}
