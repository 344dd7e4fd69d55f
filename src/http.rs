//! Minimal HTTP/1.1 GET sub-surface dispatched by C5. Only enough of the
//! protocol to read one request line and answer with one response; no
//! keep-alive, no headers beyond what's required.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAX_REQUEST_LINE: usize = 8 * 1024;

#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn handle(&self, query: HashMap<String, String>) -> serde_json::Value;
}

pub struct FnHttpHandler<F>(pub F);

#[async_trait]
impl<F> HttpHandler for FnHttpHandler<F>
where
    F: Fn(HashMap<String, String>) -> serde_json::Value + Send + Sync,
{
    async fn handle(&self, query: HashMap<String, String>) -> serde_json::Value {
        (self.0)(query)
    }
}

/// Reads the rest of the request line (the `"GET"` prefix is already
/// consumed by the dispatcher), parses `/path?k=v&k=v`, invokes the
/// optional handler, and writes a single `200 OK` response.
pub async fn serve_one_request(
    mut stream: TcpStream,
    handler: Option<std::sync::Arc<dyn HttpHandler>>,
) -> std::io::Result<()> {
    let rest = read_request_line(&mut stream).await?;
    let query = parse_query(&rest);

    let body = match handler {
        Some(h) => serde_json::to_string(&h.handle(query).await).unwrap_or_else(|_| "null".into()),
        None => "OK".to_string(),
    };

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_request_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte).await? == 0 {
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            buf.push(byte[0]);
        }
        if buf.len() > MAX_REQUEST_LINE {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Parses `" /path?k=v&k=v HTTP/1.1"` (the bytes following the already
/// consumed `"GET"`) into its query-string key/value map.
fn parse_query(rest: &str) -> HashMap<String, String> {
    let target = rest.trim().split_whitespace().next().unwrap_or("");
    let query_part = match target.split_once('?') {
        Some((_, q)) => q,
        None => return HashMap::new(),
    };

    query_part
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            Some((percent_decode(k), percent_decode(v)))
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
