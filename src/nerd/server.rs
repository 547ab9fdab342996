//! Unix-socket front end for the channel registry.
//!
//! A listener thread accepts clients and spawns one reader thread per
//! client. Neither touches registry state: they forward `Connected`,
//! `Request` and `Closed` messages over a bounded channel that the main loop
//! drains with [`NerdServer::poll`]. Messages that do not fit are dropped and
//! counted.

use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::config::NerdConfig;
use crate::error::ChannelError;

use super::channel::{ChannelRegistry, SubscriberId};
use super::protocol::MAX_REQUEST_LEN;

#[derive(Debug)]
pub(crate) enum ControlMsg {
    Connected { subscriber: SubscriberId, stream: UnixStream },
    Request { subscriber: SubscriberId, line: String },
    Closed { subscriber: SubscriberId },
}

fn forward(tx: &Sender<ControlMsg>, dropped: &AtomicU64, msg: ControlMsg) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReadLine {
    Line(String),
    TooLong,
    Eof,
}

/// Reads one request line, buffering at most `MAX_REQUEST_LEN + 1` bytes.
fn read_request_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<ReadLine> {
    let limit = MAX_REQUEST_LEN as u64 + 1;
    buf.clear();
    let n = reader.by_ref().take(limit).read_until(b'\n', buf)?;
    if n == 0 {
        return Ok(ReadLine::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if n as u64 >= limit {
        return Ok(ReadLine::TooLong);
    }
    let line = String::from_utf8(std::mem::take(buf)).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(ReadLine::Line(line))
}

fn reader_loop(subscriber: SubscriberId, stream: UnixStream, tx: &Sender<ControlMsg>, dropped: &AtomicU64) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        match read_request_line(&mut reader, &mut buf) {
            Ok(ReadLine::Line(line)) => {
                if !forward(tx, dropped, ControlMsg::Request { subscriber, line }) {
                    return;
                }
            }
            Ok(ReadLine::TooLong) => {
                warn!(%subscriber, max = MAX_REQUEST_LEN, "request line too long, closing client");
                break;
            }
            Ok(ReadLine::Eof) => break,
            Err(err) => {
                debug!(%subscriber, error = %err, "nerd client read failed");
                break;
            }
        }
    }
    forward(tx, dropped, ControlMsg::Closed { subscriber });
}

fn accept_loop(
    listener: &UnixListener,
    write_timeout: Duration,
    tx: &Sender<ControlMsg>,
    dropped: &Arc<AtomicU64>,
    stopping: &AtomicBool,
) {
    for conn in listener.incoming() {
        if stopping.load(Ordering::Acquire) {
            break;
        }
        let stream = match conn {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "nerd accept failed");
                continue;
            }
        };

        let subscriber = SubscriberId::new();
        let read_half = match stream.try_clone() {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "failed to clone subscriber socket");
                continue;
            }
        };
        if let Err(err) = stream.set_write_timeout(Some(write_timeout)) {
            warn!(error = %err, "failed to set subscriber write timeout");
        }
        if !forward(tx, dropped, ControlMsg::Connected { subscriber, stream }) {
            break;
        }
        debug!(%subscriber, "nerd client accepted");

        let reader_tx = tx.clone();
        let reader_dropped = Arc::clone(dropped);
        let spawned = thread::Builder::new()
            .name("nebcore-nerd-client".to_string())
            .spawn(move || reader_loop(subscriber, read_half, &reader_tx, &reader_dropped));
        if let Err(err) = spawned {
            warn!(%subscriber, error = %err, "failed to spawn nerd reader");
        }
    }
}

/// Listening socket plus the queue of client messages waiting for the main loop.
#[derive(Debug)]
pub struct NerdServer {
    path: PathBuf,
    control_rx: Receiver<ControlMsg>,
    dropped_messages: Arc<AtomicU64>,
    stopping: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl NerdServer {
    /// Binds `cfg.socket_path` (replacing a stale socket file) and starts
    /// the listener thread.
    pub fn bind(cfg: &NerdConfig) -> Result<Self, ChannelError> {
        let path = cfg.socket_path.clone();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;

        let (control_tx, control_rx) = bounded::<ControlMsg>(cfg.control_queue_capacity.max(1));
        let dropped_messages = Arc::new(AtomicU64::new(0));
        let stopping = Arc::new(AtomicBool::new(false));
        let write_timeout = Duration::from_millis(cfg.write_timeout_ms.max(1));

        let thread_dropped = Arc::clone(&dropped_messages);
        let thread_stopping = Arc::clone(&stopping);
        let join = thread::Builder::new()
            .name("nebcore-nerd-listen".to_string())
            .spawn(move || accept_loop(&listener, write_timeout, &control_tx, &thread_dropped, &thread_stopping))?;

        info!(path = %path.display(), "nerd listening");
        Ok(Self {
            path,
            control_rx,
            dropped_messages,
            stopping,
            join: Some(join),
        })
    }

    /// Filesystem path of the listening socket.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies every queued client message to `registry` without blocking.
    ///
    /// Returns the number of messages handled.
    pub fn poll(&self, registry: &ChannelRegistry) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.control_rx.try_recv() {
            handled += 1;
            match msg {
                ControlMsg::Connected { subscriber, stream } => {
                    if let Err(err) = registry.add_subscriber(subscriber, Box::new(stream)) {
                        debug!(%subscriber, error = %err, "subscriber not added");
                    }
                }
                ControlMsg::Request { subscriber, line } => {
                    if let Err(err) = registry.handle_request(subscriber, &line) {
                        warn!(%subscriber, status = err.status(), error = %err, "nerd request failed");
                    }
                }
                ControlMsg::Closed { subscriber } => match registry.cancel_subscriber(subscriber) {
                    Ok(_) | Err(ChannelError::UnknownSubscriber { .. }) => {}
                    Err(err) => warn!(%subscriber, error = %err, "failed to cancel subscriber"),
                },
            }
        }
        handled
    }

    /// Client messages discarded because the control queue was full.
    #[must_use]
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Stops accepting clients and removes the socket file.
    pub fn shutdown(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        self.stopping.store(true, Ordering::Release);
        // Wake the blocked accept.
        let _ = UnixStream::connect(&self.path);
        if join.join().is_err() {
            warn!("nerd listener thread panicked");
        }
        let _ = fs::remove_file(&self.path);
        info!(path = %self.path.display(), "nerd stopped");
    }
}

impl Drop for NerdServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
