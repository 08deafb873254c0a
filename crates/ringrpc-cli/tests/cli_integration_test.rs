//! CLI Integration Tests
//!
//! Runs the `ringrpc` binary: `serve` in the background, `call` against it.
//! Addresses use `127.0.0.1` with a port picked by the OS.

use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Test Helpers
// ============================================================================

fn ringrpc_bin() -> &'static str {
    env!("CARGO_BIN_EXE_ringrpc")
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Kills the server when dropped.
struct ServeProcess {
    child: Child,
    addr: String,
}

impl ServeProcess {
    fn start(extra: &[&str]) -> Self {
        let addr = format!("127.0.0.1:{}", free_port());
        let child = Command::new(ringrpc_bin())
            .arg("serve")
            .arg("-b")
            .arg(&addr)
            .arg("--standalone")
            .args(extra)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to start ringrpc serve");

        let deadline = Instant::now() + Duration::from_secs(10);
        while TcpStream::connect(&addr).is_err() {
            assert!(Instant::now() < deadline, "server did not start on {}", addr);
            thread::sleep(Duration::from_millis(50));
        }

        Self { child, addr }
    }
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn call(args: &[&str]) -> Output {
    Command::new(ringrpc_bin())
        .arg("call")
        .args(args)
        .output()
        .expect("failed to run ringrpc call")
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_call_greet() {
    let server = ServeProcess::start(&[]);
    let output = call(&["-n", &server.addr, "Greeter", "greet", "-t", "String", "-a", "[\"Ann\"]"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "\"Hello, Ann\"");
}

#[test]
fn test_call_add_with_msgpack_and_blocking_server() {
    let server = ServeProcess::start(&["--blocking"]);
    let output = call(&[
        "-n", &server.addr,
        "Greeter", "add",
        "-t", "int", "-t", "int",
        "-a", "[2, 40]",
        "--serializer", "msgpack",
        "--blocking",
    ]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "42");
}

#[test]
fn test_call_unknown_method_fails() {
    let server = ServeProcess::start(&[]);
    let output = call(&["-n", &server.addr, "Greeter", "wave"]);

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_blocking_server_with_advertise_serves_calls() {
    let server = ServeProcess::start(&["--blocking", "--advertise", "10.0.0.5:7000"]);
    let output = call(&["-n", &server.addr, "Greeter", "greet", "-t", "String", "-a", "[\"Bo\"]"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "\"Hello, Bo\"");
}

#[test]
fn test_call_without_nodes_uses_registry() {
    let registry = format!("127.0.0.1:{}", free_port());
    let output = Command::new(ringrpc_bin())
        .env("RINGRPC_CONNECT_TIMEOUT_MS", "300")
        .args(["call", "-r", &registry, "Greeter", "greet", "-t", "String", "-a", "[\"Ann\"]"])
        .output()
        .expect("failed to run ringrpc call");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains(&registry));
}

#[test]
fn test_serve_fails_without_registry() {
    let registry = format!("127.0.0.1:{}", free_port());
    let status = Command::new(ringrpc_bin())
        .env("RINGRPC_CONNECT_TIMEOUT_MS", "300")
        .args(["serve", "-b", "127.0.0.1:0", "-r", &registry])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("failed to run ringrpc serve");

    assert!(!status.success());
}

#[test]
fn test_call_rejects_mismatched_args() {
    let output = call(&["-n", "127.0.0.1:1", "Greeter", "greet", "-t", "String", "-a", "[]"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("argument"));
}
