use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn bin_path() -> String {
    std::env::var("CARGO_BIN_EXE_modbus-proxy").unwrap_or_else(|_| {
        let candidates = [
            "../../target/release/modbus-proxy",
            "../../target/debug/modbus-proxy",
            "target/release/modbus-proxy",
            "target/debug/modbus-proxy",
        ];
        for candidate in candidates {
            if std::path::Path::new(candidate).exists() {
                return candidate.to_string();
            }
        }
        panic!("Failed to locate modbus-proxy binary. Expected CARGO_BIN_EXE_modbus-proxy.");
    })
}

fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local address");
    format!("127.0.0.1:{}", addr.port())
}

fn wait_for_port(addr: &str) {
    let start = Instant::now();
    while start.elapsed() < IO_TIMEOUT {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("nothing listening on {addr}");
}

/// Device that answers every request with a single register equal to the
/// request's transaction id.
fn spawn_device() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind device");
    let addr = listener.local_addr().expect("device address");
    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut request = [0u8; 12];
        while stream.read_exact(&mut request).is_ok() {
            let reply = [
                request[0], request[1], 0x00, 0x00, 0x00, 0x05, request[6], 0x03, 0x02,
                request[0], request[1],
            ];
            if stream.write_all(&reply).is_err() {
                return;
            }
        }
    });
    addr
}

struct ProxyProcess {
    child: Child,
}

impl ProxyProcess {
    fn start(args: &[&str], wait_on: &str) -> Self {
        let child = Command::new(bin_path())
            .args(args)
            .spawn()
            .expect("Failed to start modbus-proxy");
        wait_for_port(wait_on);
        Self { child }
    }
}

impl Drop for ProxyProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn exchange(addr: &str, tid: u16) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).expect("connect to proxy");
    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    let [hi, lo] = tid.to_be_bytes();
    stream
        .write_all(&[hi, lo, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
        .unwrap();
    let mut reply = vec![0u8; 11];
    stream.read_exact(&mut reply).expect("read response");
    reply
}

fn http(addr: &str, method: &str, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect to control API");
    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    write!(
        stream,
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).unwrap();
    raw
}

#[test]
fn test_forwards_with_target_flag() {
    let device = spawn_device();
    let listen = free_addr();
    let _proxy = ProxyProcess::start(
        &["--listen", &listen, "--target", &device.to_string(), "--no-control"],
        &listen,
    );

    let reply = exchange(&listen, 0x0a0b);
    assert_eq!(
        reply,
        vec![0x0a, 0x0b, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x0a, 0x0b]
    );
}

#[test]
fn test_control_api_starts_proxy() {
    let device = spawn_device();
    let control = free_addr();
    let _proxy = ProxyProcess::start(&["--control-addr", &control], &control);

    let status = http(&control, "GET", "/api/proxy/status", "");
    assert!(status.contains(r#""running":false"#), "{status}");

    let listen = free_addr();
    let port = listen.rsplit(':').next().unwrap();
    let body = format!(
        r#"{{"listen_host":"127.0.0.1","listen_port":{port},"target_host":"127.0.0.1","target_port":{}}}"#,
        device.port()
    );
    let started = http(&control, "POST", "/api/proxy/start", &body);
    assert!(started.contains(r#""status":"started""#), "{started}");

    assert_eq!(exchange(&listen, 7)[0..2], [0x00, 0x07]);

    let stopped = http(&control, "POST", "/api/proxy/stop", "");
    assert!(stopped.contains(r#""status":"stopped""#), "{stopped}");
}

#[test]
fn test_run_seconds_exits_cleanly() {
    let device = spawn_device();
    let listen = free_addr();
    let status = Command::new(bin_path())
        .args([
            "--listen",
            &listen,
            "--target",
            &device.to_string(),
            "--no-control",
            "--run-seconds",
            "1",
        ])
        .status()
        .expect("run modbus-proxy");
    assert!(status.success());
}

#[test]
fn test_unreachable_target_exits_with_failure() {
    let dead = free_addr();
    let status = Command::new(bin_path())
        .args(["--listen", &free_addr(), "--target", &dead, "--no-control"])
        .status()
        .expect("run modbus-proxy");
    assert!(!status.success());
}
