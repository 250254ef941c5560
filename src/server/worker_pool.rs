//! Model B — thread-per-request with a fixed worker pool. One
//! selector thread owns the `mio::Poll` and only ever decides *whether* a
//! client is ready to be served; a pool of worker threads does the actual
//! blocking read/dispatch/write. The **in-service set** is what keeps the
//! selector from handing the same socket to two workers at once.

use super::Dispatcher;
use log::warn;
use mio::net::{TcpListener, TcpStream as MioTcpStream};
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WORKER_COUNT: usize = 50;
const LISTENER: Token = Token(0);

pub fn run(
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    mut should_stop: impl FnMut() -> bool,
) -> io::Result<()> {
    let (job_tx, job_rx) = mpsc::channel::<(Token, MioTcpStream)>();
    let job_rx = Arc::new(Mutex::new(job_rx));
    let in_service: Arc<Mutex<HashSet<Token>>> = Arc::new(Mutex::new(HashSet::new()));

    let workers: Vec<_> = (0..WORKER_COUNT)
        .map(|_| {
            let job_rx = job_rx.clone();
            let dispatcher = dispatcher.clone();
            let in_service = in_service.clone();
            thread::spawn(move || worker_loop(job_rx, dispatcher, in_service))
        })
        .collect();

    let mut listener = TcpListener::bind(addr)?;
    let mut poll = Poll::new()?;
    poll.registry()
        .register(&mut listener, LISTENER, Interest::READABLE)?;
    let mut events = Events::with_capacity(1024);
    let mut connections: HashMap<Token, MioTcpStream> = HashMap::new();
    let mut next_token = 1usize;

    loop {
        if should_stop() {
            break;
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
                        Err(e) => {
                            warn!("accept failed: {e}");
                            break;
                        }
                    }
                }
                continue;
            }

            let token = event.token();
            let mut marked = in_service.lock();
            if marked.contains(&token) {
                // Already handed to a worker; this is the selector noticing
                // readiness again before the worker has closed the socket.
                continue;
            }
            if let Some(mut stream) = connections.remove(&token) {
                marked.insert(token);
                drop(marked);
                let _ = poll.registry().deregister(&mut stream);
                if job_tx.send((token, stream)).is_err() {
                    in_service.lock().remove(&token);
                }
            }
        }
    }

    drop(job_tx);
    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}

/// Dequeues one ready socket at a time, converts it back to a blocking
/// stream (mio sockets are always non-blocking), and runs the per-connection
/// contract to completion before going back for the next job.
fn worker_loop(
    job_rx: Arc<Mutex<mpsc::Receiver<(Token, MioTcpStream)>>>,
    dispatcher: Arc<Dispatcher>,
    in_service: Arc<Mutex<HashSet<Token>>>,
) {
    loop {
        let job = {
            let rx = job_rx.lock();
            rx.recv()
        };
        let Ok((token, mio_stream)) = job else {
            return;
        };

        let mut stream = unsafe { TcpStream::from_raw_fd(mio_stream.into_raw_fd()) };
        let _ = stream.set_nonblocking(false);

        serve_one(&mut stream, &dispatcher);
        in_service.lock().remove(&token);
    }
}

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
    if stream.write_all(&data).is_ok() {
        dispatcher.stats.add_bytes_sent(data.len() as u64);
    }
}
