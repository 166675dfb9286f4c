//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use traffic_shadow::capture::{TcpFlags, TcpSegment};
use traffic_shadow::reassembly::{FlowMeta, SinkError, StreamFactory, StreamSink};

/// A request as received by the mock backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Every value of a header, in order.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Mock backend that records every request and answers 200.
pub struct RecordingBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RecordingBackend {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until at least `count` requests arrived or `timeout` passed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<RecordedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.requests.lock().unwrap().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.requests()
    }
}

/// Start a recording backend on an ephemeral localhost port.
pub async fn start_recording_backend() -> RecordingBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&requests);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let recorded = Arc::clone(&recorded);
                    tokio::spawn(serve_connection(socket, recorded));
                }
                Err(_) => break,
            }
        }
    });

    RecordingBackend { addr, requests }
}

/// Keep-alive loop: parse each request, record it, answer 200.
async fn serve_connection(mut socket: TcpStream, recorded: Arc<Mutex<Vec<RecordedRequest>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let parsed = {
            let mut headers = [httparse::EMPTY_HEADER; 64];
            let mut req = httparse::Request::new(&mut headers);
            match req.parse(&buf) {
                Ok(httparse::Status::Complete(len)) => {
                    let headers: Vec<(String, String)> = req
                        .headers
                        .iter()
                        .map(|h| {
                            (
                                h.name.to_string(),
                                String::from_utf8_lossy(h.value).into_owned(),
                            )
                        })
                        .collect();
                    let body_len = headers
                        .iter()
                        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    Some((
                        req.method.unwrap_or("").to_string(),
                        req.path.unwrap_or("").to_string(),
                        headers,
                        len,
                        body_len,
                    ))
                }
                Ok(httparse::Status::Partial) => None,
                Err(_) => return,
            }
        };

        match parsed {
            Some((method, path, headers, head_len, body_len)) if buf.len() >= head_len + body_len => {
                let body = buf[head_len..head_len + body_len].to_vec();
                buf.drain(..head_len + body_len);
                recorded.lock().unwrap().push(RecordedRequest {
                    method,
                    path,
                    headers,
                    body,
                });
                if socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                    .await
                    .is_err()
                {
                    return;
                }
            }
            _ => match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            },
        }
    }
}

/// Build the segments of one client → server TCP stream: SYN, data split into
/// `mss`-sized segments, then FIN.
pub fn client_stream(client: &str, server: &str, isn: u32, data: &[u8], mss: usize) -> Vec<TcpSegment> {
    let src: SocketAddr = client.parse().unwrap();
    let dst: SocketAddr = server.parse().unwrap();
    let segment = |seq: u32, flags: TcpFlags, payload: Bytes| TcpSegment {
        src,
        dst,
        seq,
        flags,
        payload,
        timestamp: SystemTime::now(),
    };

    let mut out = vec![segment(isn, TcpFlags { syn: true, ..TcpFlags::default() }, Bytes::new())];
    let ack = TcpFlags { ack: true, ..TcpFlags::default() };
    let mut seq = isn.wrapping_add(1);
    for chunk in data.chunks(mss.max(1)) {
        out.push(segment(seq, ack, Bytes::copy_from_slice(chunk)));
        seq = seq.wrapping_add(chunk.len() as u32);
    }
    out.push(segment(seq, TcpFlags { fin: true, ack: true, ..TcpFlags::default() }, Bytes::new()));
    out
}

/// Everything a recording sink saw.
#[derive(Debug, Default)]
pub struct RecordedStream {
    pub meta: Option<FlowMeta>,
    pub data: Vec<u8>,
    pub finished: u32,
}

struct RecordingSink(Arc<Mutex<RecordedStream>>);

impl StreamSink for RecordingSink {
    fn deliver(&mut self, data: Bytes) -> Result<(), SinkError> {
        self.0.lock().unwrap().data.extend_from_slice(&data);
        Ok(())
    }

    fn finish(self: Box<Self>) {
        self.0.lock().unwrap().finished += 1;
    }
}

/// Stream factory that records each flow's bytes in memory.
#[derive(Clone, Default)]
pub struct RecordingFactory {
    pub streams: Arc<Mutex<Vec<Arc<Mutex<RecordedStream>>>>>,
}

impl StreamFactory for RecordingFactory {
    fn new_stream(&mut self, meta: &FlowMeta) -> Box<dyn StreamSink> {
        let stream = Arc::new(Mutex::new(RecordedStream {
            meta: Some(*meta),
            ..RecordedStream::default()
        }));
        self.streams.lock().unwrap().push(Arc::clone(&stream));
        Box::new(RecordingSink(stream))
    }
}
