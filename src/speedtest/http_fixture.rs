//! Minimal in-process HTTP/1.1 server for exercising the transfer workers
//! and the latency probe against a real socket.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Canned behavior for every request the fixture receives.
#[derive(Clone, Copy)]
pub enum Respond {
    /// `200 OK` with a body of this many `b'x'` bytes.
    OkWithBody(usize),
    /// A fixed non-success status with an empty body.
    Status(u16),
    /// Drop the connection without answering.
    Hangup,
}

/// Binds a listener on localhost and serves `respond` to every request on
/// every connection until the returned handle is dropped with the runtime.
pub async fn spawn(respond: Respond) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve_connection(stream, respond));
        }
    });

    addr
}

async fn serve_connection(mut stream: TcpStream, respond: Respond) {
    let mut buf = vec![0u8; 16 * 1024];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        // Read until the end of the request head.
        let head_end = loop {
            if let Some(pos) = find_head_end(&pending) {
                break pos;
            }
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
            }
        };

        let head = String::from_utf8_lossy(&pending[..head_end]).to_string();
        let body_len = content_length(&head);
        pending.drain(..head_end + 4);

        // Drain the request body before answering.
        while pending.len() < body_len {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
            }
        }
        pending.drain(..body_len);

        match respond {
            Respond::OkWithBody(len) => {
                let header =
                    format!("HTTP/1.1 200 OK\r\ncontent-length: {len}\r\n\r\n");
                if stream.write_all(header.as_bytes()).await.is_err() {
                    return;
                }
                let body = vec![b'x'; len];
                if stream.write_all(&body).await.is_err() {
                    return;
                }
            }
            Respond::Status(code) => {
                let header = format!(
                    "HTTP/1.1 {code} Nope\r\ncontent-length: 0\r\n\r\n"
                );
                if stream.write_all(header.as_bytes()).await.is_err() {
                    return;
                }
            }
            Respond::Hangup => return,
        }
    }
}

fn find_head_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}
