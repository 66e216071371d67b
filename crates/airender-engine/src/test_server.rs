//! Single-threaded HTTP responder used by the unit tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }
}

pub(crate) struct CannedServer {
    pub base_url: String,
    addr: SocketAddr,
    handle: JoinHandle<Vec<CapturedRequest>>,
}

impl CannedServer {
    /// Waits for the server thread and returns what it received. A server
    /// still waiting for a connection is woken by an empty one and stops.
    pub fn finish(self) -> Vec<CapturedRequest> {
        if !self.handle.is_finished() {
            drop(TcpStream::connect(self.addr));
        }
        self.handle.join().unwrap_or_default()
    }
}

/// Answers one connection per canned `(status, body)` pair, in order.
pub(crate) fn serve(responses: Vec<(u16, String)>) -> std::io::Result<CannedServer> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let base_url = format!("http://{addr}");
    let handle = thread::spawn(move || {
        let mut captured = Vec::new();
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                break;
            };
            let Ok(request) = read_request(&mut stream) else {
                break;
            };
            if request.method.is_empty() {
                break;
            }
            captured.push(request);
            if write_response(&mut stream, status, &body).is_err() {
                break;
            }
        }
        captured
    });
    Ok(CannedServer {
        base_url,
        addr,
        handle,
    })
}

/// Accepts one connection and never answers it.
pub(crate) fn serve_silent(hold: Duration) -> std::io::Result<CannedServer> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let base_url = format!("http://{addr}");
    let handle = thread::spawn(move || {
        if let Ok((_stream, _)) = listener.accept() {
            thread::sleep(hold);
        }
        Vec::new()
    });
    Ok(CannedServer {
        base_url,
        addr,
        handle,
    })
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(key, _)| key == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(body.as_bytes())?;
    stream.flush()
}
