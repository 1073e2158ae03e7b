use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::TrackerError;

use super::url::TrackerUrl;

/// Issues a blocking HTTP/1.1 GET against a tracker and returns the
/// response body. The HTTP client itself is a consumed collaborator per
/// the core's scope; this is the minimal request/response plumbing the
/// TrackerClient needs to drive it synchronously from a worker thread
/// (the Receiver's event loop only ever waits on the header, per the
/// concurrency model).
pub fn get(url: &TrackerUrl, query: &str, timeout: Duration) -> Result<Vec<u8>, TrackerError> {
    let addr = format!("{}:{}", url.host, url.port);
    let mut stream = TcpStream::connect(&addr).map_err(|e| TrackerError::Connect(e.to_string()))?;
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|e| TrackerError::Io(e.to_string()))?;
    stream
        .set_write_timeout(Some(timeout))
        .map_err(|e| TrackerError::Io(e.to_string()))?;

    let separator = if url.path.contains('?') { "&" } else { "?" };
    let request = format!(
        "GET {}{}{} HTTP/1.1\r\nHost: {}\r\nUser-Agent: engine/0.1\r\nConnection: close\r\n\r\n",
        url.path, separator, query, url.host,
    );

    stream
        .write_all(request.as_bytes())
        .map_err(|e| TrackerError::Io(e.to_string()))?;

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .map_err(|e| TrackerError::Io(e.to_string()))?;

    parse_response_body(&raw)
}

fn parse_response_body(raw: &[u8]) -> Result<Vec<u8>, TrackerError> {
    let separator = b"\r\n\r\n";
    let split_at = raw
        .windows(separator.len())
        .position(|window| window == separator)
        .ok_or_else(|| TrackerError::MalformedResponse("no header/body separator".into()))?;

    Ok(raw[split_at + separator.len()..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_body_after_header_separator() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nd8:intervali1800ee";
        let body = parse_response_body(raw).unwrap();
        assert_eq!(body, b"d8:intervali1800ee");
    }

    #[test]
    fn missing_separator_is_an_error() {
        let raw = b"not a valid http response";
        assert!(parse_response_body(raw).is_err());
    }
}
