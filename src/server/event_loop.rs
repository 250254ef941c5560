//! Model A — single-threaded event loop. A readiness selector
//! multiplexes the listening socket and every accepted connection; each
//! readable client is served synchronously, in full, before the loop moves
//! on. No handler may block this thread without stalling every other
//! in-flight connection — the dispatcher warns at startup if one might.

use super::Dispatcher;
use log::warn;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

const LISTENER: Token = Token(0);

pub fn run(
    addr: SocketAddr,
    dispatcher: &Dispatcher,
    mut should_stop: impl FnMut() -> bool,
) -> io::Result<()> {
    for handler in &dispatcher.handlers {
        if handler.may_block() {
            warn!(
                "Model A (event-loop) is running a handler that can block on upstream I/O; \
                 a slow or unresponsive upstream will stall every other connection"
            );
            break;
        }
    }

    let mut listener = TcpListener::bind(addr)?;
    let mut poll = Poll::new()?;
    poll.registry()
        .register(&mut listener, LISTENER, Interest::READABLE)?;
    let mut events = Events::with_capacity(1024);
    let mut connections: HashMap<Token, TcpStream> = HashMap::new();
    let mut next_token = 1usize;

    loop {
        if should_stop() {
            return Ok(());
        }
        poll.poll(&mut events, Some(Duration::from_millis(200)))?;

        for event in events.iter() {
            if event.token() == LISTENER {
                loop {
                    match listener.accept() {
                        Ok((mut stream, _addr)) => {
                            let token = Token(next_token);
                            next_token += 1;
                            poll.registry()
                                .register(&mut stream, token, Interest::READABLE)?;
                            connections.insert(token, stream);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => return Err(e),
                    }
                }
                continue;
            }

            if let Some(mut stream) = connections.remove(&event.token()) {
                serve_one(&mut stream, dispatcher);
                let _ = poll.registry().deregister(&mut stream);
            }
        }
    }
}

/// One-shot read, dispatch, spin-write, close — run synchronously on the
/// single event-loop thread.
fn serve_one(stream: &mut TcpStream, dispatcher: &Dispatcher) {
    let mut buf = vec![0u8; super::READ_CHUNK];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(_) => return,
    };
    if n == 0 {
        return;
    }
    buf.truncate(n);
    dispatcher.stats.add_bytes_recv(n as u64);

    let response = match super::parse_one_shot(&buf) {
        Ok(req) => dispatcher.dispatch(&req),
        Err(resp) => resp,
    };

    let data = response.serialize();
    let mut offset = 0;
    while offset < data.len() {
        match stream.write(&data[offset..]) {
            Ok(0) => break,
            Ok(n) => {
                offset += n;
                dispatcher.stats.add_bytes_sent(n as u64);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => break,
            Err(_) => break,
        }
    }
}
