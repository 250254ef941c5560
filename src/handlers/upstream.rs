//! Shared upstream-calling machinery for [`ReverseProxyHandler`] and
//! [`LoadBalancingHandler`]: the two only differ in how they pick an
//! upstream, so that's the one thing factored out as a trait. An
//! [`UpstreamCaller`] knows how to talk to one chosen `(host, port)`,
//! blocking or cooperative; an [`UpstreamSelector`] knows which
//! `(host, port)` to hand it next.
//!
//! [`ReverseProxyHandler`]: super::ReverseProxyHandler
//! [`LoadBalancingHandler`]: super::LoadBalancingHandler

use crate::error::UpstreamError;
use crate::http::HttpResponse;
use crate::server::cooperative::{CoopStep, CoopTask, TaskIo};
use mio::Interest;
use std::io::{self, Read, Write};
use std::net::{TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_UPSTREAM_RESPONSE: usize = 1024 * 1024;

/// Picks which upstream a call should go to. Pure and non-blocking — the
/// actual connection is [`UpstreamCaller`]'s job.
pub trait UpstreamSelector: Send + Sync {
    fn select(&self) -> Result<(String, u16), UpstreamError>;
}

/// Always the same upstream, used by [`ReverseProxyHandler`](super::ReverseProxyHandler).
pub struct Fixed {
    pub host: String,
    pub port: u16,
}

impl UpstreamSelector for Fixed {
    fn select(&self) -> Result<(String, u16), UpstreamError> {
        Ok((self.host.clone(), self.port))
    }
}

/// Cycles through a fixed list in order, one upstream per call. An atomic
/// counter rather than a mutex-guarded index: the increment is the entire
/// critical section.
pub struct RoundRobin {
    upstreams: Vec<(String, u16)>,
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new(upstreams: Vec<(String, u16)>) -> Self {
        RoundRobin {
            upstreams,
            counter: AtomicUsize::new(0),
        }
    }
}

impl UpstreamSelector for RoundRobin {
    fn select(&self) -> Result<(String, u16), UpstreamError> {
        if self.upstreams.is_empty() {
            return Err(UpstreamError::Unavailable(
                "load balancer has no upstreams configured".to_string(),
            ));
        }
        let i = self.counter.fetch_add(1, Ordering::Relaxed) % self.upstreams.len();
        Ok(self.upstreams[i].clone())
    }
}

/// Draws a number in `[0, 1)` and picks whichever upstream's half-open
/// `[lo, hi)` range contains it, reporting
/// [`UpstreamError::UnreachableRange`] if none does rather than falling
/// through to an arbitrary default.
pub struct Weighted {
    upstreams: Vec<(String, u16, (f64, f64))>,
}

impl Weighted {
    pub fn new(upstreams: Vec<(String, u16, (f64, f64))>) -> Self {
        Weighted { upstreams }
    }
}

/// Pure selection logic, separated from the RNG so it can be tested with
/// fixed draws.
fn pick_weighted(
    draw: f64,
    upstreams: &[(String, u16, (f64, f64))],
) -> Result<(String, u16), UpstreamError> {
    for (host, port, (lo, hi)) in upstreams {
        if draw >= *lo && draw < *hi {
            return Ok((host.clone(), *port));
        }
    }
    Err(UpstreamError::UnreachableRange(draw))
}

impl UpstreamSelector for Weighted {
    fn select(&self) -> Result<(String, u16), UpstreamError> {
        pick_weighted(rand::random::<f64>(), &self.upstreams)
    }
}

/// Talks to a chosen upstream: forwards the client's raw request bytes,
/// reads the reply to EOF, and parses it. Owns no state of its own — every
/// call is independent.
pub struct UpstreamCaller;

impl UpstreamCaller {
    /// The blocking path used by Models A and B.
    pub fn call_blocking(
        selector: &dyn UpstreamSelector,
        raw_request: &[u8],
    ) -> Result<HttpResponse, UpstreamError> {
        let (host, port) = selector.select()?;
        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| UpstreamError::Unavailable(format!("cannot resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| UpstreamError::Unavailable(format!("no address for {host}:{port}")))?;

        let mut stream = StdTcpStream::connect_timeout(&addr, UPSTREAM_TIMEOUT)
            .map_err(|e| UpstreamError::Unavailable(format!("connect to {host}:{port} failed: {e}")))?;
        stream
            .set_read_timeout(Some(UPSTREAM_TIMEOUT))
            .and_then(|_| stream.set_write_timeout(Some(UPSTREAM_TIMEOUT)))
            .map_err(|e| UpstreamError::Unavailable(format!("could not configure socket: {e}")))?;

        stream
            .write_all(raw_request)
            .map_err(|e| UpstreamError::Unavailable(format!("send to {host}:{port} failed: {e}")))?;

        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .map_err(|e| UpstreamError::Unavailable(format!("read from {host}:{port} failed: {e}")))?;

        HttpResponse::parse(&buf).map_err(|e| UpstreamError::Malformed(e.to_string()))
    }

    /// The cooperative path used by Model C: a state machine that registers
    /// itself with the connection's shared [`TaskIo`] while it waits on the
    /// upstream socket, and hands control back to the scheduler in between.
    pub fn call_cooperative(
        selector: &dyn UpstreamSelector,
        raw_request: Vec<u8>,
        io: TaskIo,
    ) -> Box<dyn CoopTask> {
        match selector.select() {
            Ok((host, port)) => Box::new(UpstreamTask::new(host, port, raw_request, io)),
            Err(e) => Box::new(ImmediateUpstreamFailure(Some(e))),
        }
    }
}

struct ImmediateUpstreamFailure(Option<UpstreamError>);

impl CoopTask for ImmediateUpstreamFailure {
    fn step(&mut self) -> CoopStep {
        CoopStep::Ready(Err(self
            .0
            .take()
            .expect("ImmediateUpstreamFailure stepped twice")
            .into()))
    }
}

enum UpstreamPhase {
    Writing {
        stream: mio::net::TcpStream,
        data: Vec<u8>,
        offset: usize,
    },
    Reading {
        stream: mio::net::TcpStream,
        buf: Vec<u8>,
    },
}

/// Proxies one request cooperatively: connect, send, read to EOF, parse.
/// Reuses the connection's token across all three phases the way the client
/// side of [`super::super::server::cooperative::ConnectionTask`] does.
/// Carries the same `UPSTREAM_TIMEOUT` deadline as the blocking path, since
/// nothing else bounds how long a parked task waits on the upstream socket.
struct UpstreamTask {
    host: String,
    port: u16,
    io: TaskIo,
    phase: Option<Result<UpstreamPhase, UpstreamError>>,
    deadline: Instant,
}

impl UpstreamTask {
    fn new(host: String, port: u16, request: Vec<u8>, io: TaskIo) -> Self {
        let phase = Self::connect(&host, port).map(|stream| UpstreamPhase::Writing {
            stream,
            data: request,
            offset: 0,
        });
        UpstreamTask {
            host,
            port,
            io,
            phase: Some(phase),
            deadline: Instant::now() + UPSTREAM_TIMEOUT,
        }
    }

    fn connect(host: &str, port: u16) -> Result<mio::net::TcpStream, UpstreamError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| UpstreamError::Unavailable(format!("cannot resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| UpstreamError::Unavailable(format!("no address for {host}:{port}")))?;
        mio::net::TcpStream::connect(addr)
            .map_err(|e| UpstreamError::Unavailable(format!("connect to {host}:{port} failed: {e}")))
    }
}

impl CoopTask for UpstreamTask {
    fn step(&mut self) -> CoopStep {
        loop {
            let mut phase = match self.phase.take().expect("UpstreamTask stepped after completion") {
                Ok(phase) => phase,
                Err(e) => return CoopStep::Ready(Err(e.into())),
            };

            if Instant::now() >= self.deadline {
                let stream = match &mut phase {
                    UpstreamPhase::Writing { stream, .. } => stream,
                    UpstreamPhase::Reading { stream, .. } => stream,
                };
                let _ = self.io.deregister(stream);
                return CoopStep::Ready(Err(UpstreamError::Unavailable(format!(
                    "{}:{} timed out after {UPSTREAM_TIMEOUT:?}",
                    self.host, self.port
                ))
                .into()));
            }

            match phase {
                UpstreamPhase::Writing {
                    mut stream,
                    data,
                    mut offset,
                } => match stream.write(&data[offset..]) {
                    Ok(0) => {
                        return CoopStep::Ready(Err(UpstreamError::Unavailable(format!(
                            "{}:{} closed the connection while sending",
                            self.host, self.port
                        ))
                        .into()))
                    }
                    Ok(n) => {
                        offset += n;
                        if offset >= data.len() {
                            self.phase = Some(Ok(UpstreamPhase::Reading {
                                stream,
                                buf: Vec::new(),
                            }));
                        } else {
                            self.phase = Some(Ok(UpstreamPhase::Writing { stream, data, offset }));
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        if self.io.register(&mut stream, Interest::WRITABLE).is_err() {
                            return CoopStep::Ready(Err(UpstreamError::Unavailable(
                                "failed to register upstream socket".to_string(),
                            )
                            .into()));
                        }
                        self.phase = Some(Ok(UpstreamPhase::Writing { stream, data, offset }));
                        return CoopStep::Pending(Interest::WRITABLE);
                    }
                    Err(e) => {
                        return CoopStep::Ready(Err(UpstreamError::Unavailable(format!(
                            "send to {}:{} failed: {e}",
                            self.host, self.port
                        ))
                        .into()))
                    }
                },
                UpstreamPhase::Reading { mut stream, mut buf } => {
                    let mut chunk = [0u8; 8192];
                    match stream.read(&mut chunk) {
                        Ok(0) => {
                            let _ = self.io.deregister(&mut stream);
                            let result = HttpResponse::parse(&buf)
                                .map_err(|e| UpstreamError::Malformed(e.to_string()).into());
                            return CoopStep::Ready(result);
                        }
                        Ok(n) => {
                            if buf.len() + n > MAX_UPSTREAM_RESPONSE {
                                let _ = self.io.deregister(&mut stream);
                                return CoopStep::Ready(Err(UpstreamError::Malformed(format!(
                                    "{}:{} response exceeded {MAX_UPSTREAM_RESPONSE} bytes",
                                    self.host, self.port
                                ))
                                .into()));
                            }
                            buf.extend_from_slice(&chunk[..n]);
                            self.phase = Some(Ok(UpstreamPhase::Reading { stream, buf }));
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            if self.io.register(&mut stream, Interest::READABLE).is_err() {
                                return CoopStep::Ready(Err(UpstreamError::Unavailable(
                                    "failed to register upstream socket".to_string(),
                                )
                                .into()));
                            }
                            self.phase = Some(Ok(UpstreamPhase::Reading { stream, buf }));
                            return CoopStep::Pending(Interest::READABLE);
                        }
                        Err(e) => {
                            return CoopStep::Ready(Err(UpstreamError::Unavailable(format!(
                                "read from {}:{} failed: {e}",
                                self.host, self.port
                            ))
                            .into()))
                        }
                    }
                }
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        Some(self.deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_in_order() {
        let rr = RoundRobin::new(vec![
            ("a".into(), 1),
            ("b".into(), 2),
            ("c".into(), 3),
        ]);
        let picks: Vec<String> = (0..7).map(|_| rr.select().unwrap().0).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn weighted_picks_the_range_containing_the_draw() {
        let upstreams = vec![
            ("a".to_string(), 1u16, (0.0, 0.5)),
            ("b".to_string(), 2u16, (0.5, 0.9)),
            ("c".to_string(), 3u16, (0.9, 1.0)),
        ];
        assert_eq!(pick_weighted(0.10, &upstreams).unwrap().0, "a");
        assert_eq!(pick_weighted(0.65, &upstreams).unwrap().0, "b");
        assert_eq!(pick_weighted(0.99, &upstreams).unwrap().0, "c");
    }

    #[test]
    fn weighted_draw_outside_every_range_is_an_error() {
        let upstreams = vec![("a".to_string(), 1u16, (0.0, 0.4))];
        assert!(matches!(
            pick_weighted(0.9, &upstreams),
            Err(UpstreamError::UnreachableRange(_))
        ));
    }
}
