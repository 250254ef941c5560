//! The reverse proxy handler: forwards a matched request verbatim to
//! one fixed upstream and returns whatever it replies with.

use super::upstream::{Fixed, UpstreamCaller};
use super::{Handler, HandlerResult};
use crate::config::MatchCriteria;
use crate::error::ConfigError;
use crate::http::HttpRequest;
use crate::server::cooperative::{CoopTask, TaskIo};

pub struct ReverseProxyHandler {
    criteria: MatchCriteria,
    upstream: Fixed,
}

impl ReverseProxyHandler {
    pub fn new(criteria: MatchCriteria, context: &serde_json::Value) -> Result<Self, ConfigError> {
        let send_to = context.get("send_to").ok_or(ConfigError::MissingField {
            handler_type: "reverseProxy",
            field: "context.send_to",
        })?;
        let host = send_to
            .get("host")
            .and_then(|v| v.as_str())
            .ok_or(ConfigError::MissingField {
                handler_type: "reverseProxy",
                field: "context.send_to.host",
            })?
            .to_string();
        let port = send_to
            .get("port")
            .and_then(|v| v.as_u64())
            .ok_or(ConfigError::MissingField {
                handler_type: "reverseProxy",
                field: "context.send_to.port",
            })? as u16;

        Ok(ReverseProxyHandler {
            criteria,
            upstream: Fixed { host, port },
        })
    }
}

impl Handler for ReverseProxyHandler {
    fn criteria(&self) -> &MatchCriteria {
        &self.criteria
    }

    fn handle(&self, req: &HttpRequest) -> HandlerResult {
        UpstreamCaller::call_blocking(&self.upstream, &req.raw).map_err(Into::into)
    }

    fn may_block(&self) -> bool {
        true
    }

    fn handle_cooperative(&self, req: &HttpRequest, io: TaskIo) -> Box<dyn CoopTask> {
        UpstreamCaller::call_cooperative(&self.upstream, req.raw.clone(), io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn req(raw: &'static [u8]) -> HttpRequest {
        HttpRequest::parse(raw).unwrap()
    }

    #[test]
    fn forwards_the_request_and_returns_the_upstreams_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).unwrap();
            assert!(String::from_utf8_lossy(&buf[..n]).starts_with("GET /widgets"));
            stream
                .write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nOK")
                .unwrap();
        });

        let mut criteria = HashMap::new();
        criteria.insert("url".to_string(), vec!["/widgets".to_string()]);
        let context = serde_json::json!({"send_to": {"host": "127.0.0.1", "port": port}});
        let handler = ReverseProxyHandler::new(criteria, &context).unwrap();

        let response = handler
            .handle(&req(b"GET /widgets HTTP/1.1\r\nHost: x\r\n\r\n"))
            .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body, b"OK");
        server.join().unwrap();
    }

    #[test]
    fn unreachable_upstream_is_a_handler_error() {
        let mut criteria = HashMap::new();
        criteria.insert("url".to_string(), vec!["/widgets".to_string()]);
        let context = serde_json::json!({"send_to": {"host": "127.0.0.1", "port": 1u16}});
        let handler = ReverseProxyHandler::new(criteria, &context).unwrap();
        assert!(handler
            .handle(&req(b"GET /widgets HTTP/1.1\r\n\r\n"))
            .is_err());
    }
}
