//! The cooperative I/O runtime: a single-threaded scheduler that drives
//! suspendable tasks to completion, parking each one on a `(fd, event)` pair
//! until a readiness selector reports it, with no preemption.
//!
//! A task is an explicit state machine whose `step()` either finishes or
//! asks to be parked on a [`mio::Interest`], the same suspend/resume shape
//! a generator-based dispatcher gets from `yield`, spelled out by hand.

use crate::handlers::{Handler, HandlerError};
use crate::http::{HttpRequest, HttpResponse};
use crate::server::Dispatcher;
use log::{debug, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A suspendable computation. Only [`ConnectionTask`] is ever registered
/// directly with the [`Scheduler`]; handler-level tasks (upstream calls) are
/// driven internally by the connection task that owns them, propagating
/// their result up the chain.
pub trait CoopTask {
    fn step(&mut self) -> CoopStep;

    /// When this task must give up waiting, if ever. The scheduler polls
    /// this so a task parked on a socket that never becomes ready still
    /// gets a chance to fail instead of blocking its connection forever.
    fn deadline(&self) -> Option<Instant> {
        None
    }
}

pub enum CoopStep {
    /// The task registered its own interest with the shared registry and
    /// must be parked until that condition is reported.
    Pending(Interest),
    Ready(Result<HttpResponse, HandlerError>),
}

/// A task's handle onto the scheduler's shared registry and its own stable
/// token. Handler tasks use this to (de)register whichever socket they're
/// currently waiting on — the client socket while reading/writing, an
/// upstream socket while proxying — reusing one token per connection for its
/// entire lifetime, since at most one socket is ever awaited at a time.
#[derive(Clone)]
pub struct TaskIo {
    registry: Rc<mio::Registry>,
    token: Token,
}

impl TaskIo {
    pub fn register<S>(&self, source: &mut S, interest: Interest) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        self.registry.register(source, self.token, interest)
    }

    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        self.registry.deregister(source)
    }
}

const LISTENER_TOKEN: Token = Token(0);

enum Phase {
    Reading {
        stream: TcpStream,
        buf: Vec<u8>,
    },
    Running {
        stream: TcpStream,
        inner: Box<dyn CoopTask>,
    },
    Writing {
        stream: TcpStream,
        data: Vec<u8>,
        offset: usize,
    },
}

/// The per-connection pipeline, itself a cooperative task: read a request,
/// run the matching handler, write the response.
struct ConnectionTask {
    io: TaskIo,
    dispatcher: Arc<Dispatcher>,
    phase: Option<Phase>,
}

impl ConnectionTask {
    fn new(stream: TcpStream, io: TaskIo, dispatcher: Arc<Dispatcher>) -> Self {
        ConnectionTask {
            io,
            dispatcher,
            phase: Some(Phase::Reading {
                stream,
                buf: Vec::with_capacity(4096),
            }),
        }
    }

    fn no_match_response() -> HttpResponse {
        HttpResponse::new(
            400,
            b"No handler could handle your request, check the matching criteria in settings.json"
                .to_vec(),
        )
    }

    fn error_response(err: &HandlerError) -> HttpResponse {
        use crate::error::UpstreamError;
        match err {
            HandlerError::Upstream(UpstreamError::Unavailable(r)) => {
                HttpResponse::new(502, r.clone().into_bytes())
            }
            HandlerError::Upstream(UpstreamError::Malformed(r)) => {
                HttpResponse::new(502, r.clone().into_bytes())
            }
            HandlerError::Upstream(UpstreamError::UnreachableRange(r)) => HttpResponse::new(
                502,
                format!("load balancer misconfigured: no range contains {r}").into_bytes(),
            ),
            HandlerError::Cancelled => HttpResponse::new(502, b"upstream call cancelled".to_vec()),
        }
    }
}

impl CoopTask for ConnectionTask {
    fn step(&mut self) -> CoopStep {
        loop {
            match self.phase.take().expect("ConnectionTask stepped after completion") {
                Phase::Reading { mut stream, mut buf } => {
                    let mut chunk = [0u8; crate::server::READ_CHUNK];
                    match stream.read(&mut chunk) {
                        Ok(0) => return CoopStep::Ready(Err(HandlerError::Cancelled)),
                        Ok(n) => {
                            self.dispatcher.stats.add_bytes_recv(n as u64);
                            buf.extend_from_slice(&chunk[..n]);
                            match HttpRequest::parse(&buf) {
                                Ok(req) => {
                                    self.dispatcher.stats.inc_requests_recv();
                                    let matched = self
                                        .dispatcher
                                        .handlers
                                        .iter()
                                        .find(|h| h.should_handle(&req))
                                        .cloned();
                                    let _ = self.io.deregister(&mut stream);
                                    match matched {
                                        Some(handler) => {
                                            let inner =
                                                handler.handle_cooperative(&req, self.io.clone());
                                            self.phase = Some(Phase::Running { stream, inner });
                                        }
                                        None => {
                                            let data = Self::no_match_response().serialize();
                                            self.phase = Some(Phase::Writing {
                                                stream,
                                                data,
                                                offset: 0,
                                            });
                                        }
                                    }
                                }
                                Err(_) => {
                                    let data = HttpResponse::new(400, b"malformed request".to_vec())
                                        .serialize();
                                    self.phase = Some(Phase::Writing {
                                        stream,
                                        data,
                                        offset: 0,
                                    });
                                }
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            if self.io.register(&mut stream, Interest::READABLE).is_err() {
                                return CoopStep::Ready(Err(HandlerError::Cancelled));
                            }
                            self.phase = Some(Phase::Reading { stream, buf });
                            return CoopStep::Pending(Interest::READABLE);
                        }
                        Err(_) => return CoopStep::Ready(Err(HandlerError::Cancelled)),
                    }
                }
                Phase::Running { stream, mut inner } => match inner.step() {
                    CoopStep::Pending(interest) => {
                        self.phase = Some(Phase::Running { stream, inner });
                        return CoopStep::Pending(interest);
                    }
                    CoopStep::Ready(result) => {
                        let response = match result {
                            Ok(resp) => resp,
                            Err(err) => {
                                warn!("handler failed: {err}");
                                Self::error_response(&err)
                            }
                        };
                        let mut stream = stream;
                        let data = response.serialize();
                        let _ = self.io.register(&mut stream, Interest::WRITABLE);
                        let _ = self.io.deregister(&mut stream);
                        self.phase = Some(Phase::Writing {
                            stream,
                            data,
                            offset: 0,
                        });
                    }
                },
                Phase::Writing {
                    mut stream,
                    data,
                    mut offset,
                } => match stream.write(&data[offset..]) {
                    Ok(0) => return CoopStep::Ready(Err(HandlerError::Cancelled)),
                    Ok(n) => {
                        offset += n;
                        self.dispatcher.stats.add_bytes_sent(n as u64);
                        if offset >= data.len() {
                            self.dispatcher.stats.inc_responses_sent();
                            return CoopStep::Ready(Ok(HttpResponse::default()));
                        }
                        self.phase = Some(Phase::Writing { stream, data, offset });
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        if self.io.register(&mut stream, Interest::WRITABLE).is_err() {
                            return CoopStep::Ready(Err(HandlerError::Cancelled));
                        }
                        self.phase = Some(Phase::Writing { stream, data, offset });
                        return CoopStep::Pending(Interest::WRITABLE);
                    }
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        return CoopStep::Ready(Err(HandlerError::Cancelled))
                    }
                    Err(_) => return CoopStep::Ready(Err(HandlerError::Cancelled)),
                },
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match &self.phase {
            Some(Phase::Running { inner, .. }) => inner.deadline(),
            _ => None,
        }
    }
}

/// Drives every accepted connection as a [`ConnectionTask`] from a single OS
/// thread: a ready queue, a readiness selector, no preemption.
pub struct Scheduler {
    poll: Poll,
    events: Events,
    registry: Rc<mio::Registry>,
    listener: TcpListener,
    ready: VecDeque<Token>,
    tasks: HashMap<Token, ConnectionTask>,
    next_token: usize,
    dispatcher: Arc<Dispatcher>,
}

impl Scheduler {
    pub fn bind(addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> io::Result<Self> {
        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let registry = Rc::new(poll.registry().try_clone()?);
        Ok(Scheduler {
            poll,
            events: Events::with_capacity(1024),
            registry,
            listener,
            ready: VecDeque::new(),
            tasks: HashMap::new(),
            next_token: 1,
            dispatcher,
        })
    }

    /// Runs until `should_stop` reports true and no connections remain in
    /// flight. Checked once per trip through the ready queue, so shutdown is
    /// prompt but doesn't abandon in-progress responses.
    pub fn run(&mut self, mut should_stop: impl FnMut() -> bool) -> io::Result<()> {
        loop {
            while let Some(token) = self.ready.pop_front() {
                if token == LISTENER_TOKEN {
                    self.accept_all()?;
                    continue;
                }
                let Some(task) = self.tasks.get_mut(&token) else {
                    continue;
                };
                match task.step() {
                    CoopStep::Pending(_) => {}
                    CoopStep::Ready(_) => {
                        self.tasks.remove(&token);
                    }
                }
            }

            if should_stop() && self.tasks.is_empty() {
                return Ok(());
            }

            let now = Instant::now();
            for (&token, task) in &self.tasks {
                if task.deadline().is_some_and(|deadline| deadline <= now) {
                    self.ready.push_back(token);
                }
            }

            self.poll
                .poll(&mut self.events, Some(Duration::from_millis(200)))?;
            for event in self.events.iter() {
                self.ready.push_back(event.token());
            }
        }
    }

    fn accept_all(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    self.registry
                        .register(&mut stream, token, Interest::READABLE)?;
                    let io = TaskIo {
                        registry: self.registry.clone(),
                        token,
                    };
                    debug!("cooperative: accepted connection as {token:?}");
                    self.tasks
                        .insert(token, ConnectionTask::new(stream, io, self.dispatcher.clone()));
                    self.ready.push_back(token);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}
