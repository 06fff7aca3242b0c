#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-connection Modbus/TCP device on loopback.
///
/// Every request frame is recorded, then passed to the responder. The
/// responder returns the frames to write back, or `None` to hang up.
pub struct SimulatedDevice {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SimulatedDevice {
    pub fn start<F>(mut respond: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<Vec<u8>>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind simulated device");
        let addr = listener.local_addr().expect("device address");
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            while let Some(request) = read_frame(&mut stream) {
                log.lock().unwrap().push(request.clone());
                match respond(&request) {
                    Some(replies) => {
                        for reply in replies {
                            if stream.write_all(&reply).is_err() {
                                return;
                            }
                        }
                    }
                    None => return,
                }
            }
        });

        Self { addr, received }
    }

    /// Answers every FC03 request with one register holding its transaction id.
    pub fn echo_tid() -> Self {
        Self::start(|request| {
            let tid = u16::from_be_bytes([request[0], request[1]]);
            Some(vec![read_holding_response(request, &[tid])])
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }

    pub fn wait_for_requests(&self, count: usize) -> Vec<Vec<u8>> {
        let start = std::time::Instant::now();
        while start.elapsed() < IO_TIMEOUT {
            let received = self.received();
            if received.len() >= count {
                return received;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!(
            "device saw {} requests, expected {}",
            self.received().len(),
            count
        );
    }
}

/// Reads exactly one MBAP-delimited frame; `None` on EOF or error.
pub fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0u8; 6];
    stream.read_exact(&mut header).ok()?;
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut frame = header.to_vec();
    frame.resize(6 + length, 0);
    stream.read_exact(&mut frame[6..]).ok()?;
    Some(frame)
}

pub fn read_holding_request(tid: u16, unit: u8, start: u16, count: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(12);
    frame.extend_from_slice(&tid.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00, 0x00, 0x06, unit, 0x03]);
    frame.extend_from_slice(&start.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    frame
}

pub fn read_holding_response(request: &[u8], registers: &[u16]) -> Vec<u8> {
    let byte_count = registers.len() * 2;
    let length = (3 + byte_count) as u16;
    let mut frame = Vec::with_capacity(9 + byte_count);
    frame.extend_from_slice(&request[0..4]);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(request[6]);
    frame.push(0x03);
    frame.push(byte_count as u8);
    for reg in registers {
        frame.extend_from_slice(&reg.to_be_bytes());
    }
    frame
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect to proxy");
    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    stream.set_nodelay(true).unwrap();
    stream
}

pub fn exchange(stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).expect("write request");
    read_frame(stream).expect("read response")
}

/// Loopback address with the proxy's actual port, for proxies bound to 0.0.0.0.
pub fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], addr.port()))
}
