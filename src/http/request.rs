use crate::error::CodecError;
use rustc_hash::FxHashMap;

/// A parsed HTTP/1.1 request. Immutable after [`HttpRequest::parse`] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: FxHashMap<String, String>,
    pub body: Vec<u8>,
    /// The exact bytes this request was parsed from, kept around so proxy
    /// handlers can forward the request verbatim.
    pub raw: Vec<u8>,
}

/// Splits off the next line terminated by `\n` (a preceding `\r` is also
/// stripped). Accepts bare `\n`. Returns `(line, rest)`; if no terminator
/// is found the whole buffer is treated as the final, unterminated line.
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

fn split_tokens(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(|&b| b == b' ').filter(|part| !part.is_empty())
}

impl HttpRequest {
    /// Parses one full request out of `raw`. Fails when the request line has
    /// fewer than two tokens or a header line has no `": "` separator.
    pub fn parse(raw: &[u8]) -> Result<Self, CodecError> {
        let (request_line, mut cursor) = next_line(raw);

        let mut tokens = split_tokens(request_line);
        let method = tokens.next().ok_or_else(|| {
            CodecError::MalformedRequest("request line has no method".into())
        })?;
        let url = tokens.next().ok_or_else(|| {
            CodecError::MalformedRequest("request line has no url".into())
        })?;
        // The HTTP version token (if present) is intentionally ignored.

        let method = String::from_utf8_lossy(method).into_owned();
        let url = String::from_utf8_lossy(url).into_owned();
        if method.is_empty() || url.is_empty() {
            return Err(CodecError::MalformedRequest(
                "method and url must be non-empty".into(),
            ));
        }

        let mut headers = FxHashMap::default();
        loop {
            let (line, rest) = next_line(cursor);
            if line.is_empty() {
                cursor = rest;
                break;
            }
            let sep = find_subslice(line, b": ").ok_or_else(|| {
                CodecError::MalformedRequest(format!(
                    "header line has no ': ' separator: {:?}",
                    String::from_utf8_lossy(line)
                ))
            })?;
            let name = String::from_utf8_lossy(&line[..sep]).into_owned();
            let value = String::from_utf8_lossy(&line[sep + 2..]).into_owned();
            headers.insert(name, value);
            cursor = rest;
            if cursor.is_empty() {
                // Reached end of buffer without a blank line; treat as a
                // bodyless request rather than erroring.
                break;
            }
        }

        Ok(HttpRequest {
            method,
            url,
            headers,
            body: cursor.to_vec(),
            raw: raw.to_vec(),
        })
    }

    /// Case-sensitive header lookup. Match criteria keys are compared
    /// literally against the name as it appeared on the wire.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_url_and_headers() {
        let raw = b"GET /static/logo.png HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.url, "/static/logo.png");
        assert_eq!(req.header("Host"), Some("example.com"));
        assert_eq!(req.header("Accept"), Some("*/*"));
        assert!(req.body.is_empty());
        assert_eq!(req.raw, raw);
    }

    #[test]
    fn accepts_bare_lf_line_endings() {
        let raw = b"GET / HTTP/1.1\nHost: example.com\n\n";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.url, "/");
        assert_eq!(req.header("Host"), Some("example.com"));
    }

    #[test]
    fn duplicate_headers_collapse_to_last_seen() {
        let raw = b"GET / HTTP/1.1\r\nX-Tag: first\r\nX-Tag: second\r\n\r\n";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.header("X-Tag"), Some("second"));
    }

    #[test]
    fn body_is_everything_after_the_blank_line() {
        let raw = b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn rejects_request_line_with_one_token() {
        let raw = b"GET\r\n\r\n";
        assert!(matches!(
            HttpRequest::parse(raw),
            Err(CodecError::MalformedRequest(_))
        ));
    }

    #[test]
    fn rejects_header_line_without_colon_space() {
        let raw = b"GET / HTTP/1.1\r\nBrokenHeader\r\n\r\n";
        assert!(matches!(
            HttpRequest::parse(raw),
            Err(CodecError::MalformedRequest(_))
        ));
    }
}
