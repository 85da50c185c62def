//! Operation log (AOF) writer: a bounded single-producer/single-consumer
//! ring buffer fed by the reactor thread, drained on a timer by a
//! background thread that appends to the configured log file.
//!
//! The log is declared non-authoritative for recovery (segment files are
//! the source of truth), so backpressure on the queue drops the command
//! rather than blocking the reactor.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_queue::ArrayQueue;

pub struct AofWriter {
    queue: Arc<ArrayQueue<Bytes>>,
}

impl AofWriter {
    pub fn new(capacity: usize) -> Self {
        Self { queue: Arc::new(ArrayQueue::new(capacity)) }
    }

    /// Queues the canonical RESP-encoded bytes of an accepted write command.
    /// Drops the command and logs a warning if the queue is full.
    pub fn push(&self, command: Bytes) {
        if self.queue.push(command).is_err() {
            tracing::warn!("AOF queue full, dropping command");
        }
    }

    /// Spawns the background flush thread, draining the queue every
    /// `period` and appending to `path`.
    pub fn spawn(&self, path: PathBuf, period: Duration) -> AofHandle {
        let queue = Arc::clone(&self.queue);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("foxbat-aof".to_string())
            .spawn(move || aof_loop(&queue, &path, period, &thread_stop))
            .expect("failed to spawn AOF thread");

        AofHandle { stop, handle: Some(handle) }
    }
}

fn aof_loop(queue: &ArrayQueue<Bytes>, path: &PathBuf, period: Duration, stop: &AtomicBool) {
    let mut file = match open_log(path) {
        Ok(f) => f,
        Err(err) => {
            tracing::warn!(%err, "failed to open AOF log file, writer thread exiting");
            return;
        }
    };

    while !stop.load(Ordering::Relaxed) {
        thread::sleep(period);
        drain_into(queue, &mut file);
    }
    drain_into(queue, &mut file);
}

fn drain_into(queue: &ArrayQueue<Bytes>, file: &mut File) {
    let mut wrote = false;
    while let Some(bytes) = queue.pop() {
        if let Err(err) = file.write_all(&bytes) {
            tracing::warn!(%err, "failed to append to AOF log");
            return;
        }
        wrote = true;
    }
    if wrote {
        if let Err(err) = file.flush() {
            tracing::warn!(%err, "failed to flush AOF log");
        }
    }
}

fn open_log(path: &PathBuf) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Handle to the background flush thread; stops and joins it on drop.
pub struct AofHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AofHandle {
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AofHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
