use crate::error::CodecError;
use rustc_hash::FxHashMap;

/// A response record, serialized to wire bytes by [`HttpResponse::serialize`]
/// and parsed back from an upstream's bytes by [`HttpResponse::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: FxHashMap<String, String>,
    pub body: Vec<u8>,
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        HttpResponse {
            status: 200,
            headers: FxHashMap::default(),
            body: Vec::new(),
        }
    }
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status,
            headers: FxHashMap::default(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// `HTTP/1.1 <status> <reason>\r\n` + headers + blank line + body.
    /// `Content-Length`/`Content-Type` are filled in here if the caller
    /// didn't already set them.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 256);
        out.extend_from_slice(b"HTTP/1.1 ");
        out.extend_from_slice(self.status.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(reason_phrase(self.status).as_bytes());
        out.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if !self.headers.contains_key("Content-Length") {
            out.extend_from_slice(b"Content-Length: ");
            out.extend_from_slice(self.body.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if !self.headers.contains_key("Content-Type") {
            out.extend_from_slice(b"Content-Type: text/html; charset=UTF-8\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Parses a status line, headers, and body out of an upstream's raw
    /// response bytes, turning an upstream's reply into a response record.
    pub fn parse(raw: &[u8]) -> Result<Self, CodecError> {
        let (status_line, mut cursor) = next_line(raw);
        let mut tokens = status_line.split(|&b| b == b' ').filter(|t| !t.is_empty());
        let _version = tokens
            .next()
            .ok_or_else(|| CodecError::MalformedRequest("status line has no version".into()))?;
        let status_token = tokens
            .next()
            .ok_or_else(|| CodecError::MalformedRequest("status line has no status code".into()))?;
        let status: u16 = std::str::from_utf8(status_token)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CodecError::MalformedRequest("status code is not a number".into()))?;

        let mut headers = FxHashMap::default();
        loop {
            let (line, rest) = next_line(cursor);
            if line.is_empty() {
                cursor = rest;
                break;
            }
            let sep = line
                .windows(2)
                .position(|w| w == b": ")
                .ok_or_else(|| CodecError::MalformedRequest("header missing ': '".into()))?;
            headers.insert(
                String::from_utf8_lossy(&line[..sep]).into_owned(),
                String::from_utf8_lossy(&line[sep + 2..]).into_owned(),
            );
            cursor = rest;
            if cursor.is_empty() {
                break;
            }
        }

        Ok(HttpResponse {
            status,
            headers,
            body: cursor.to_vec(),
        })
    }
}

fn next_line(buf: &[u8]) -> (&[u8], &[u8]) {
    match buf.iter().position(|&b| b == b'\n') {
        Some(idx) => {
            let mut end = idx;
            if end > 0 && buf[end - 1] == b'\r' {
                end -= 1;
            }
            (&buf[..end], &buf[idx + 1..])
        }
        None => (buf, &[]),
    }
}
