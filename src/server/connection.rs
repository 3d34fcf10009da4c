use crate::lifecycle::{Engine, Served};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Read timeout slice while waiting for a request, so an idle connection
/// notices `interrupt` quickly.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Written straight to the socket when the queue sheds a connection.
pub(crate) const SERVICE_UNAVAILABLE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Serve requests on `stream` until it stops being persistent, the peer
/// goes away, or `interrupt` is raised while no request is in progress.
pub(crate) fn serve_connection(
    engine: &Engine,
    stream: TcpStream,
    timeout: Duration,
    interrupt: &AtomicBool,
) {
    let peer = stream.peer_addr().ok();
    if let Err(e) = configure(&stream, timeout) {
        warn!(peer = ?peer, error = %e, "Failed to configure accepted socket");
        return;
    }
    let read_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(peer = ?peer, error = %e, "Failed to clone accepted socket");
            return;
        }
    };
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(stream);

    let mut served = 0u64;
    loop {
        match await_request(&mut reader, timeout, interrupt) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                debug!(peer = ?peer, error = %e, "Connection read failed");
                break;
            }
        }
        match engine.serve(&mut reader, &mut writer, peer) {
            Ok(Served::Completed { keep_alive }) => {
                served += 1;
                if !keep_alive || interrupt.load(Ordering::Acquire) {
                    break;
                }
            }
            Ok(Served::Idle) => break,
            Err(e) => {
                debug!(peer = ?peer, error = %e, "Connection write failed");
                break;
            }
        }
    }

    if let Err(e) = writer.flush() {
        debug!(peer = ?peer, error = %e, "Final flush failed");
    }
    if let Ok(stream) = writer.into_inner() {
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            // the peer may already be gone
            debug!(peer = ?peer, error = %e, "Socket shutdown failed");
        }
    }
    debug!(peer = ?peer, requests = served, "Connection closed");
}

/// Wait until request bytes are buffered. `false` when the peer closed, the
/// idle `timeout` ran out, or `interrupt` was raised first.
fn await_request(
    reader: &mut BufReader<TcpStream>,
    timeout: Duration,
    interrupt: &AtomicBool,
) -> io::Result<bool> {
    if !reader.buffer().is_empty() {
        return Ok(true);
    }
    let slice = if timeout.is_zero() { IDLE_POLL } else { IDLE_POLL.min(timeout) };
    reader.get_ref().set_read_timeout(Some(slice))?;
    let started = Instant::now();
    let ready = loop {
        if interrupt.load(Ordering::Acquire) {
            break false;
        }
        match reader.fill_buf() {
            Ok(buf) => break !buf.is_empty(),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if !timeout.is_zero() && started.elapsed() >= timeout {
                    break false;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    };
    reader
        .get_ref()
        .set_read_timeout((!timeout.is_zero()).then_some(timeout))?;
    Ok(ready)
}

fn configure(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    let timeout = (!timeout.is_zero()).then_some(timeout);
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;
    stream.set_nodelay(true)
}

/// Refuse a connection the pool could not take.
pub(crate) fn reject_overloaded(mut stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    if let Err(e) = stream.write_all(SERVICE_UNAVAILABLE) {
        debug!(peer = ?peer, error = %e, "Failed to send 503 to shed connection");
    }
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        debug!(peer = ?peer, error = %e, "Socket shutdown failed");
    }
}
